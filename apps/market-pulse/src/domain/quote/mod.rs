//! Quote Domain Types
//!
//! Canonical representation of tickers and quote payloads shared by the
//! cache, the scheduler, the alert evaluator and the client-facing APIs.
//!
//! # Ticker normalization
//!
//! Tickers arrive from clients in arbitrary casing and with stray whitespace.
//! [`Ticker::parse`] trims, upper-cases and validates them; anything that is
//! not a plausible instrument identifier is rejected so it never reaches the
//! upstream provider.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Ticker
// =============================================================================

/// Maximum accepted ticker length after normalization.
pub const MAX_TICKER_LEN: usize = 15;

/// A normalized instrument identifier (e.g. `AAPL`, `BRK.B`, `^GSPC`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    /// Parse and normalize a raw ticker string.
    ///
    /// # Errors
    ///
    /// Returns [`TickerError`] when the trimmed value is empty, too long, or
    /// contains characters outside `A-Z 0-9 . - ^ =`.
    pub fn parse(raw: &str) -> Result<Self, TickerError> {
        let normalized = raw.trim().to_ascii_uppercase();

        if normalized.is_empty() {
            return Err(TickerError::Empty);
        }
        if normalized.len() > MAX_TICKER_LEN {
            return Err(TickerError::TooLong(normalized));
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='))
        {
            return Err(TickerError::InvalidCharacters(normalized));
        }

        Ok(Self(normalized))
    }

    /// Parse every candidate, silently dropping the ones that are not valid
    /// tickers. Duplicates collapse.
    pub fn parse_many<I, S>(raw: I) -> BTreeSet<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter()
            .filter_map(|candidate| match Self::parse(candidate.as_ref()) {
                Ok(ticker) => Some(ticker),
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring unknown ticker");
                    None
                }
            })
            .collect()
    }

    /// The normalized ticker text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Ticker {
    type Error = TickerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Ticker> for String {
    fn from(ticker: Ticker) -> Self {
        ticker.0
    }
}

/// Ticker validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickerError {
    /// Blank input.
    #[error("ticker is empty")]
    Empty,
    /// Longer than [`MAX_TICKER_LEN`].
    #[error("ticker {0} exceeds {MAX_TICKER_LEN} characters")]
    TooLong(String),
    /// Contains characters no exchange symbol uses.
    #[error("ticker {0} contains invalid characters")]
    InvalidCharacters(String),
}

// =============================================================================
// Quotes
// =============================================================================

/// Quote fields as delivered by the upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Last traded price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Absolute change versus previous close.
    #[serde(with = "rust_decimal::serde::float")]
    pub change_absolute: Decimal,
    /// Percentage change versus previous close.
    #[serde(with = "rust_decimal::serde::float")]
    pub change_percent: Decimal,
    /// Session volume.
    pub volume: u64,
}

/// A cached quote together with its fetch stamp and lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Instrument this entry describes.
    pub ticker: Ticker,
    /// Quote payload.
    pub quote: Quote,
    /// When the fetch that produced this entry started.
    pub fetched_at: DateTime<Utc>,
    /// Time-to-live measured from `fetched_at`.
    pub ttl: Duration,
}

impl CacheEntry {
    /// Create a new cache entry.
    #[must_use]
    pub const fn new(ticker: Ticker, quote: Quote, fetched_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            ticker,
            quote,
            fetched_at,
            ttl,
        }
    }

    /// Instant after which this entry is no longer fresh.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.fetched_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the entry is still within its TTL at `now`.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    /// Remaining lifetime at `now`, `None` once expired.
    #[must_use]
    pub fn remaining_ttl_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at() - now)
            .to_std()
            .ok()
            .filter(|d| !d.is_zero())
    }

    /// Client-facing view of this entry.
    #[must_use]
    pub fn snapshot(&self) -> QuoteSnapshot {
        QuoteSnapshot {
            quote: self.quote.clone(),
            as_of: self.fetched_at,
        }
    }
}

/// Quote payload as served to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSnapshot {
    /// Quote fields.
    #[serde(flatten)]
    pub quote: Quote,
    /// Fetch stamp of the underlying cache entry.
    pub as_of: DateTime<Utc>,
}

/// Snapshot for a set of tickers. Tickers without data are absent.
pub type Snapshot = BTreeMap<Ticker, QuoteSnapshot>;

// =============================================================================
// Tests
// =============================================================================
