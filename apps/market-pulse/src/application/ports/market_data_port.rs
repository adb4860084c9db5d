//! Market Data Source Port (Driven Port)
//!
//! Interface to the upstream quote provider.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::quote::{Quote, Ticker};

/// Quotes keyed by ticker. Partial results are normal: tickers the provider
/// did not return are simply absent.
pub type QuoteBatch = HashMap<Ticker, Quote>;

/// Upstream fetch error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Provider could not be reached.
    #[error("Market data source unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// Request exceeded its deadline.
    #[error("Market data fetch timed out after {timeout_ms}ms")]
    Timeout {
        /// Deadline that was exceeded.
        timeout_ms: u64,
    },

    /// Provider rejected the request (bad key, quota).
    #[error("Market data source rejected request: HTTP {status}")]
    Rejected {
        /// HTTP status returned.
        status: u16,
    },

    /// Response body could not be decoded.
    #[error("Malformed market data response: {message}")]
    Malformed {
        /// Decode error details.
        message: String,
    },
}

/// Port for fetching quotes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch quotes for a batch of tickers in as few upstream calls as the
    /// provider allows.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] only when nothing could be fetched; partial
    /// failures are reported by omission.
    async fn fetch_batch(&self, tickers: &[Ticker]) -> Result<QuoteBatch, FetchError>;
}
