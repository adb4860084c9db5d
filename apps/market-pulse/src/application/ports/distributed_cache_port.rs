//! Distributed Cache Port (Driven Port)
//!
//! Optional shared cache tier. The engine treats every call as best-effort:
//! errors degrade to local-only caching.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::quote::{CacheEntry, Ticker};

/// Distributed cache failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DistributedCacheError {
    /// Backend unreachable or connection dropped.
    #[error("Distributed cache unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// Stored value could not be (de)serialized.
    #[error("Distributed cache codec error: {message}")]
    Codec {
        /// Error details.
        message: String,
    },
}

/// Port for the shared cache tier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DistributedCache: Send + Sync {
    /// Backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Read an entry. `Ok(None)` on miss.
    async fn get(&self, ticker: &Ticker) -> Result<Option<CacheEntry>, DistributedCacheError>;

    /// Write an entry that the backend expires after `ttl`.
    async fn put(&self, entry: &CacheEntry, ttl: Duration) -> Result<(), DistributedCacheError>;

    /// Remove one entry.
    async fn invalidate(&self, ticker: &Ticker) -> Result<(), DistributedCacheError>;

    /// Remove every entry this engine owns.
    async fn flush_all(&self) -> Result<(), DistributedCacheError>;
}
