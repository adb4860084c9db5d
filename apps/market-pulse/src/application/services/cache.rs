//! Two-Tier Quote Cache
//!
//! A local in-process tier with per-entry TTL in front of an optional shared
//! distributed tier.
//!
//! # Read path
//!
//! ```text
//! local (fresh) ──hit──► entry
//!      │ miss
//!      ▼
//! distributed (if configured and not backing off) ──hit──► back-fill local ──► entry
//!      │ miss / error / timeout
//!      ▼
//!    miss (caller decides whether to fetch)
//! ```
//!
//! # Coherence
//!
//! Every entry carries the stamp of the fetch that produced it. A write with
//! an older stamp than the stored entry is rejected, so a slow fetch that
//! finishes after a newer one can never roll a ticker back in time.
//!
//! # Distributed tier failures
//!
//! Each call is bounded by a short timeout. After a failure the tier is
//! bypassed for a retry window, so a dead backend costs at most one timeout
//! per window instead of one per request.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::application::ports::{DistributedCache, DistributedCacheError};
use crate::domain::quote::{CacheEntry, Ticker};
use crate::infrastructure::metrics::{self, CacheTierLabel};

// =============================================================================
// Settings
// =============================================================================

/// Cache behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Lifetime of a freshly fetched entry.
    pub ttl: Duration,
    /// How long past expiry an entry may still be served while the source
    /// is unreachable.
    pub stale_grace: Duration,
    /// Deadline for every distributed tier call.
    pub distributed_timeout: Duration,
    /// How long the distributed tier is bypassed after a failure.
    pub distributed_retry_after: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            stale_grace: Duration::from_secs(300),
            distributed_timeout: Duration::from_millis(250),
            distributed_retry_after: Duration::from_secs(30),
        }
    }
}

/// Result of a [`CacheTier::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Entry written.
    Stored,
    /// A newer entry is already cached; nothing written.
    Stale,
}

// =============================================================================
// Distributed Tier Guard
// =============================================================================

/// Tracks distributed tier health and the bypass window.
struct DistributedGuard {
    backend: Arc<dyn DistributedCache>,
    bypass_until: Mutex<Option<Instant>>,
    errors: AtomicU64,
    timeout: Duration,
    retry_after: Duration,
}

impl std::fmt::Debug for DistributedGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedGuard")
            .field("backend", &self.backend.name())
            .field("bypass_until", &*self.bypass_until.lock())
            .field("errors", &self.errors.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl DistributedGuard {
    fn is_available(&self) -> bool {
        let mut bypass = self.bypass_until.lock();
        match *bypass {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                *bypass = None;
                tracing::info!(backend = self.backend.name(), "Retrying distributed cache tier");
                true
            }
            None => true,
        }
    }

    /// Run one backend call under the timeout, opening the bypass window on
    /// failure.
    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, DistributedCacheError>>,
    {
        if !self.is_available() {
            return None;
        }

        let error = match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", self.timeout.as_millis()),
        };

        self.errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_distributed_error(operation);
        *self.bypass_until.lock() = Some(Instant::now() + self.retry_after);

        tracing::warn!(
            backend = self.backend.name(),
            operation,
            error = %error,
            retry_after_secs = self.retry_after.as_secs(),
            "Distributed cache tier unavailable, degrading to local-only"
        );
        None
    }
}

// =============================================================================
// Cache Tier
// =============================================================================

/// Two-tier quote cache shared by the scheduler, the alert path and the
/// client APIs.
#[derive(Debug)]
pub struct CacheTier {
    local: RwLock<HashMap<Ticker, CacheEntry>>,
    distributed: Option<DistributedGuard>,
    settings: CacheSettings,
}

impl CacheTier {
    /// Local-only cache.
    #[must_use]
    pub fn local_only(settings: CacheSettings) -> Self {
        Self {
            local: RwLock::new(HashMap::new()),
            distributed: None,
            settings,
        }
    }

    /// Cache with a distributed tier behind the local one.
    #[must_use]
    pub fn with_distributed(settings: CacheSettings, backend: Arc<dyn DistributedCache>) -> Self {
        Self {
            local: RwLock::new(HashMap::new()),
            distributed: Some(DistributedGuard {
                backend,
                bypass_until: Mutex::new(None),
                errors: AtomicU64::new(0),
                timeout: settings.distributed_timeout,
                retry_after: settings.distributed_retry_after,
            }),
            settings,
        }
    }

    /// Configured entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.settings.ttl
    }

    /// Fresh entry for `ticker`, or `None` on miss.
    pub async fn get(&self, ticker: &Ticker) -> Option<CacheEntry> {
        self.get_at(ticker, Utc::now()).await
    }

    /// [`get`](Self::get) evaluated at `now`.
    pub async fn get_at(&self, ticker: &Ticker, now: DateTime<Utc>) -> Option<CacheEntry> {
        let local = self
            .local
            .read()
            .get(ticker)
            .filter(|entry| entry.is_fresh_at(now))
            .cloned();
        if let Some(entry) = local {
            metrics::record_cache_hit(CacheTierLabel::Local);
            return Some(entry);
        }

        if let Some(guard) = &self.distributed {
            let remote = guard
                .call("get", guard.backend.get(ticker))
                .await
                .flatten()
                .filter(|entry| &entry.ticker == ticker && entry.is_fresh_at(now));

            if let Some(entry) = remote {
                metrics::record_cache_hit(CacheTierLabel::Distributed);
                self.store_local(entry.clone());
                return Some(entry);
            }
        }

        metrics::record_cache_miss();
        None
    }

    /// Fresh entries for several tickers. Misses are absent.
    pub async fn get_many(&self, tickers: &[Ticker]) -> HashMap<Ticker, CacheEntry> {
        let now = Utc::now();
        join_all(tickers.iter().map(|ticker| self.get_at(ticker, now)))
            .await
            .into_iter()
            .flatten()
            .map(|entry| (entry.ticker.clone(), entry))
            .collect()
    }

    /// Expired local entry still inside the stale grace window.
    ///
    /// Only for degraded operation when the source cannot be reached.
    #[must_use]
    pub fn get_stale(&self, ticker: &Ticker) -> Option<CacheEntry> {
        self.get_stale_at(ticker, Utc::now())
    }

    /// [`get_stale`](Self::get_stale) evaluated at `now`.
    #[must_use]
    pub fn get_stale_at(&self, ticker: &Ticker, now: DateTime<Utc>) -> Option<CacheEntry> {
        self.local
            .read()
            .get(ticker)
            .filter(|entry| self.within_stale_window(entry, now))
            .cloned()
    }

    /// Write an entry. Local always; distributed best-effort.
    pub async fn put(&self, entry: CacheEntry) -> PutOutcome {
        if self.store_local(entry.clone()) == PutOutcome::Stale {
            metrics::record_stale_write();
            tracing::debug!(
                ticker = %entry.ticker,
                fetched_at = %entry.fetched_at,
                "Rejected cache write older than stored entry"
            );
            return PutOutcome::Stale;
        }

        // Remote expiry tracks the local one, not a fresh full TTL.
        if let Some(guard) = &self.distributed
            && let Some(ttl) = entry.remaining_ttl_at(Utc::now())
        {
            guard.call("put", guard.backend.put(&entry, ttl)).await;
        }

        PutOutcome::Stored
    }

    /// Remove one ticker from both tiers.
    pub async fn invalidate(&self, ticker: &Ticker) {
        self.local.write().remove(ticker);
        if let Some(guard) = &self.distributed {
            guard.call("invalidate", guard.backend.invalidate(ticker)).await;
        }
        tracing::info!(ticker = %ticker, "Cache entry invalidated");
    }

    /// Drop every entry from both tiers.
    pub async fn flush_all(&self) {
        let dropped = {
            let mut local = self.local.write();
            let n = local.len();
            local.clear();
            n
        };
        if let Some(guard) = &self.distributed {
            guard.call("flush_all", guard.backend.flush_all()).await;
        }
        tracing::info!(local_entries = dropped, "Cache flushed");
    }

    /// Drop local entries past the stale window. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    /// [`purge_expired`](Self::purge_expired) evaluated at `now`.
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut local = self.local.write();
        let before = local.len();
        local.retain(|_, entry| self.within_stale_window(entry, now));
        before - local.len()
    }

    /// Health snapshot.
    #[must_use]
    pub fn status(&self) -> CacheStatus {
        CacheStatus {
            local_entries: self.local.read().len(),
            distributed: self.distributed.as_ref().map(|guard| DistributedStatus {
                backend: guard.backend.name(),
                available: guard
                    .bypass_until
                    .lock()
                    .is_none_or(|until| Instant::now() >= until),
                errors: guard.errors.load(Ordering::Relaxed),
            }),
        }
    }

    fn store_local(&self, entry: CacheEntry) -> PutOutcome {
        let mut local = self.local.write();
        if let Some(existing) = local.get(&entry.ticker)
            && existing.fetched_at > entry.fetched_at
        {
            return PutOutcome::Stale;
        }
        local.insert(entry.ticker.clone(), entry);
        PutOutcome::Stored
    }

    fn within_stale_window(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(self.settings.stale_grace)
            .ok()
            .and_then(|grace| entry.expires_at().checked_add_signed(grace))
            .is_none_or(|limit| now < limit)
    }
}

/// Cache health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    /// Entries held by the local tier (fresh or within the stale window).
    pub local_entries: usize,
    /// Distributed tier status, `None` when not configured.
    pub distributed: Option<DistributedStatus>,
}

/// Distributed tier health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributedStatus {
    /// Backend name.
    pub backend: &'static str,
    /// `false` while inside a bypass window.
    pub available: bool,
    /// Failures since startup.
    pub errors: u64,
}

// =============================================================================
// Tests
// =============================================================================
