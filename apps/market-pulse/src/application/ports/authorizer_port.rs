//! Authorizer Port (Driver Port)
//!
//! Maps an opaque client token to a stable subscriber identity. Session
//! mechanics live outside the engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::subscription::SubscriberId;

/// A validated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Identity the token maps to.
    pub subscriber_id: SubscriberId,
    /// When the token stops being valid, if it expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Authorization {
    /// Whether the token has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }
}

/// Authorization failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No token supplied.
    #[error("missing token")]
    Missing,
    /// Token unknown.
    #[error("invalid token")]
    Invalid,
    /// Token known but past its expiry.
    #[error("token expired")]
    Expired,
}

/// Port for token validation.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Validate a token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the token is missing, unknown or expired.
    async fn validate(&self, token: &str) -> Result<Authorization, AuthError>;
}
