//! Polling Scheduler
//!
//! Fixed-interval background job that refreshes every subscribed ticker with
//! one deduplicated upstream call per tick.
//!
//! # Tick
//!
//! 1. Evict idle subscriptions.
//! 2. Snapshot the union of watched tickers (empty → done).
//! 3. One batch fetch under `fetch_timeout`, with no lock held.
//! 4. For each returned ticker, write the cache and then evaluate alerts.
//!
//! Upstream failures never end the loop: the tick is recorded as failed,
//! cached entries stay authoritative until they expire, and the next tick
//! retries.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;

use crate::application::ports::{FetchError, MarketDataSource, QuoteBatch};
use crate::application::services::alerts::AlertEvaluator;
use crate::application::services::cache::{CacheTier, PutOutcome};
use crate::application::services::periodic::PeriodicJob;
use crate::domain::quote::{CacheEntry, Ticker};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::metrics::{self, TickOutcome};

// =============================================================================
// Settings
// =============================================================================

/// Scheduler timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Time between ticks.
    pub interval: Duration,
    /// Deadline for the batch fetch. Always shorter than `interval`.
    pub fetch_timeout: Duration,
    /// Subscriptions idle longer than this are evicted.
    pub idle_window: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
            idle_window: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// Fetch
// =============================================================================

/// Fetch a batch under a deadline, stamping it with the time the fetch
/// started. Quotes for tickers that were not asked for are dropped.
pub(crate) async fn fetch_stamped(
    source: &dyn MarketDataSource,
    tickers: &[Ticker],
    timeout: Duration,
) -> Result<(DateTime<Utc>, QuoteBatch), FetchError> {
    let fetched_at = Utc::now();

    let mut batch = tokio::time::timeout(timeout, source.fetch_batch(tickers))
        .await
        .map_err(|_| FetchError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })??;

    let requested: BTreeSet<&Ticker> = tickers.iter().collect();
    batch.retain(|ticker, _| requested.contains(ticker));

    Ok((fetched_at, batch))
}

// =============================================================================
// Status
// =============================================================================

/// Scheduler state shared with the health endpoint.
#[derive(Debug, Default)]
pub struct SchedulerStatus {
    ticks: AtomicU64,
    failed_ticks: AtomicU64,
    consecutive_failures: AtomicU64,
    last_tick_at: RwLock<Option<DateTime<Utc>>>,
    last_success_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    watched_tickers: AtomicU64,
}

impl SchedulerStatus {
    fn record_success(&self, watched: usize) {
        let now = Utc::now();
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.watched_tickers.store(watched as u64, Ordering::Relaxed);
        *self.last_tick_at.write() = Some(now);
        *self.last_success_at.write() = Some(now);
        *self.last_error.write() = None;
    }

    fn record_failure(&self, watched: usize, error: &FetchError) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.failed_ticks.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.watched_tickers.store(watched as u64, Ordering::Relaxed);
        *self.last_tick_at.write() = Some(Utc::now());
        *self.last_error.write() = Some(error.to_string());
    }

    /// Whether at least one tick has completed.
    #[must_use]
    pub fn has_ticked(&self) -> bool {
        self.ticks.load(Ordering::Relaxed) > 0
    }

    /// Point-in-time copy for serialization.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerStatusSnapshot {
        SchedulerStatusSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            watched_tickers: self.watched_tickers.load(Ordering::Relaxed),
            last_tick_at: *self.last_tick_at.read(),
            last_success_at: *self.last_success_at.read(),
            last_error: self.last_error.read().clone(),
        }
    }
}

/// Serializable scheduler status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatusSnapshot {
    /// Completed ticks.
    pub ticks: u64,
    /// Ticks whose batch fetch failed.
    pub failed_ticks: u64,
    /// Failed ticks since the last success.
    pub consecutive_failures: u64,
    /// Tickers in the union at the last tick.
    pub watched_tickers: u64,
    /// When the last tick finished.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// When the last tick without a fetch failure finished.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Fetch error from the last failed tick, cleared on success.
    pub last_error: Option<String>,
}

// =============================================================================
// Tick Report
// =============================================================================

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Subscriptions evicted for inactivity.
    pub evicted: usize,
    /// Tickers requested upstream (the union).
    pub requested: BTreeSet<Ticker>,
    /// Tickers written to the cache.
    pub fetched: BTreeSet<Ticker>,
    /// Requested tickers that produced no fresh entry.
    pub failed: BTreeSet<Ticker>,
    /// Writes rejected because a newer entry was already cached.
    pub stale_rejected: usize,
    /// Alert rules fired.
    pub alerts_fired: usize,
    /// Whether the batch fetch itself failed.
    pub fetch_error: Option<String>,
    /// Wall time.
    pub duration: Duration,
}

// =============================================================================
// Polling Scheduler
// =============================================================================

/// Refreshes the cache for the subscription union on every tick.
pub struct PollingScheduler {
    registry: Arc<SubscriptionRegistry>,
    source: Arc<dyn MarketDataSource>,
    cache: Arc<CacheTier>,
    evaluator: Arc<AlertEvaluator>,
    settings: SchedulerSettings,
    status: Arc<SchedulerStatus>,
}

impl PollingScheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        source: Arc<dyn MarketDataSource>,
        cache: Arc<CacheTier>,
        evaluator: Arc<AlertEvaluator>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            registry,
            source,
            cache,
            evaluator,
            settings,
            status: Arc::new(SchedulerStatus::default()),
        }
    }

    /// Shared status handle.
    #[must_use]
    pub fn status(&self) -> Arc<SchedulerStatus> {
        Arc::clone(&self.status)
    }

    /// Configured timing.
    #[must_use]
    pub const fn settings(&self) -> SchedulerSettings {
        self.settings
    }

    /// Run one tick.
    pub async fn tick(&self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport {
            evicted: self.registry.evict_idle(self.settings.idle_window).len(),
            ..TickReport::default()
        };
        if report.evicted > 0 {
            tracing::info!(evicted = report.evicted, "Evicted idle subscriptions");
        }

        let purged = self.cache.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired cache entries");
        }

        let stats = self.registry.stats();
        metrics::set_subscriptions(stats.subscriber_count, stats.ticker_count);

        report.requested = self.registry.active_tickers();
        if report.requested.is_empty() {
            self.status.record_success(0);
            report.duration = started.elapsed();
            metrics::record_tick(TickOutcome::Idle, report.duration);
            tracing::trace!("No subscriptions, skipping fetch");
            return report;
        }

        let tickers: Vec<Ticker> = report.requested.iter().cloned().collect();
        let (fetched_at, batch) =
            match fetch_stamped(self.source.as_ref(), &tickers, self.settings.fetch_timeout).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        tickers = tickers.len(),
                        "Batch fetch failed, serving cached entries until next tick"
                    );
                    self.status.record_failure(tickers.len(), &e);
                    report.failed = report.requested.clone();
                    report.fetch_error = Some(e.to_string());
                    report.duration = started.elapsed();
                    metrics::record_fetch(tickers.len(), 0);
                    metrics::record_tick(TickOutcome::Failed, report.duration);
                    return report;
                }
            };

        metrics::record_fetch(tickers.len(), batch.len());

        let ttl = self.cache.ttl();
        let outcomes = join_all(batch.into_iter().map(|(ticker, quote)| async move {
            let price = quote.price;
            let entry = CacheEntry::new(ticker.clone(), quote, fetched_at, ttl);
            match self.cache.put(entry).await {
                // Alerts see a price only once its cache write has landed.
                PutOutcome::Stored => {
                    let fired = self.evaluator.evaluate(&ticker, price).await;
                    (ticker, PutOutcome::Stored, fired)
                }
                PutOutcome::Stale => (ticker, PutOutcome::Stale, 0),
            }
        }))
        .await;

        for (ticker, outcome, fired) in outcomes {
            report.alerts_fired += fired;
            match outcome {
                PutOutcome::Stored => {
                    report.fetched.insert(ticker);
                }
                PutOutcome::Stale => report.stale_rejected += 1,
            }
        }

        report.failed = report
            .requested
            .difference(&report.fetched)
            .cloned()
            .collect();

        if !report.failed.is_empty() {
            tracing::debug!(
                failed = report.failed.len(),
                "Tickers missing from batch, keeping cached entries"
            );
        }

        self.status.record_success(tickers.len());
        report.duration = started.elapsed();
        metrics::record_tick(TickOutcome::Fetched, report.duration);

        tracing::info!(
            requested = report.requested.len(),
            fetched = report.fetched.len(),
            failed = report.failed.len(),
            stale_rejected = report.stale_rejected,
            alerts_fired = report.alerts_fired,
            duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            "Tick complete"
        );

        report
    }
}

#[async_trait]
impl PeriodicJob for PollingScheduler {
    fn name(&self) -> &'static str {
        "polling-scheduler"
    }

    async fn run_once(&self) {
        self.tick().await;
    }
}
