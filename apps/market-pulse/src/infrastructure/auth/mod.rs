//! Static Token Authorizer
//!
//! Validates client tokens against a fixed table loaded from configuration.
//!
//! # Format
//!
//! `AUTH_TOKENS` is a comma-separated list of `token=subscriber` pairs. A
//! pair may carry an expiry as a unix timestamp in seconds:
//!
//! ```text
//! AUTH_TOKENS=dev-token=alice,kiosk-token=lobby@1767225600
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::application::ports::{AuthError, Authorization, Authorizer};
use crate::domain::subscription::SubscriberId;

// =============================================================================
// Error Types
// =============================================================================

/// Malformed token table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenTableError {
    /// No tokens were configured.
    #[error("token table is empty")]
    Empty,

    /// An entry is not `token=subscriber[@expiry]`.
    #[error("malformed token entry #{index}: {reason}")]
    Malformed {
        /// Zero-based position of the entry.
        index: usize,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The same token appears twice.
    #[error("duplicate token at entry #{index}")]
    Duplicate {
        /// Zero-based position of the second occurrence.
        index: usize,
    },
}

// =============================================================================
// Authorizer
// =============================================================================

/// [`Authorizer`] backed by an in-memory token table.
pub struct StaticTokenAuthorizer {
    tokens: HashMap<String, Authorization>,
}

impl std::fmt::Debug for StaticTokenAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenAuthorizer")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl StaticTokenAuthorizer {
    /// Parse a token table.
    ///
    /// # Errors
    ///
    /// Returns [`TokenTableError`] if the table is empty, an entry is
    /// malformed, or a token is listed twice.
    pub fn parse(table: &str) -> Result<Self, TokenTableError> {
        let mut tokens = HashMap::new();

        for (index, entry) in table
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .enumerate()
        {
            let (token, grant) = parse_entry(index, entry)?;
            if tokens.insert(token.to_string(), grant).is_some() {
                return Err(TokenTableError::Duplicate { index });
            }
        }

        if tokens.is_empty() {
            return Err(TokenTableError::Empty);
        }

        tracing::info!(tokens = tokens.len(), "Loaded static token table");
        Ok(Self { tokens })
    }

    /// Number of configured tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are configured. Always `false` for a parsed table.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn parse_entry(index: usize, entry: &str) -> Result<(&str, Authorization), TokenTableError> {
    let malformed = |reason| TokenTableError::Malformed { index, reason };

    let (token, grant) = entry.split_once('=').ok_or_else(|| malformed("missing '='"))?;
    let token = token.trim();
    if token.is_empty() {
        return Err(malformed("empty token"));
    }

    let (subscriber, expiry) = match grant.split_once('@') {
        Some((subscriber, expiry)) => (subscriber.trim(), Some(expiry.trim())),
        None => (grant.trim(), None),
    };
    if subscriber.is_empty() {
        return Err(malformed("empty subscriber"));
    }

    let expires_at = expiry
        .map(|raw| {
            raw.parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                .ok_or_else(|| malformed("expiry is not a unix timestamp"))
        })
        .transpose()?;

    Ok((
        token,
        Authorization {
            subscriber_id: SubscriberId::new(subscriber),
            expires_at,
        },
    ))
}

#[async_trait]
impl Authorizer for StaticTokenAuthorizer {
    async fn validate(&self, token: &str) -> Result<Authorization, AuthError> {
        let grant = self.tokens.get(token).ok_or(AuthError::Invalid)?;
        if grant.is_expired_at(Utc::now()) {
            return Err(AuthError::Expired);
        }
        Ok(grant.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
