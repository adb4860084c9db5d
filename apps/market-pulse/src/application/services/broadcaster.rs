//! Stream Broadcaster
//!
//! Serves cached quotes to clients two ways:
//!
//! - **Pull**: [`StreamBroadcaster::get_snapshot`] answers from the cache,
//!   fetching all misses in one on-demand batch.
//! - **Push**: [`StreamBroadcaster::open_stream`] spawns one task per
//!   connection that emits a snapshot every cadence tick until the client
//!   goes away, the token expires or the server shuts down.
//!
//! # Push stream lifecycle
//!
//! ```text
//! open_stream ─► register connection-scoped subscription
//!      │
//!      ▼
//!  ┌─────────── select ───────────┐
//!  │ cadence tick → emit snapshot │
//!  │ receiver dropped → stop      │
//!  │ shutdown token → stop        │
//!  └──────────────────────────────┘
//!      │
//!      ▼
//! guard drop ─► subscription removed, active count decremented
//! ```
//!
//! The first event uses pull semantics so a new client sees data at once;
//! later events read the cache only and never call upstream.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::MarketDataSource;
use crate::application::services::cache::{CacheTier, PutOutcome};
use crate::application::services::scheduler::fetch_stamped;
use crate::domain::quote::{CacheEntry, Snapshot, Ticker};
use crate::domain::subscription::{SubscriberId, SubscriptionRegistry};
use crate::infrastructure::metrics;

/// Push stream and on-demand fetch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Time between push events.
    pub interval: Duration,
    /// Events buffered per connection before new ones are dropped.
    pub buffer: usize,
    /// Deadline for an on-demand batch fetch.
    pub fetch_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            buffer: 16,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// One push stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Current snapshot for the connection's tickers.
    Quotes(Snapshot),
    /// The token expired; no further events follow.
    Expired,
}

/// Removes a stream's subscription and count when its task ends, however
/// it ends.
struct StreamGuard {
    registry: Arc<SubscriptionRegistry>,
    connection: SubscriberId,
    active: Arc<AtomicUsize>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry.unsubscribe_all(&self.connection);
        let remaining = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_streams(remaining);
        tracing::debug!(connection = %self.connection, active_streams = remaining, "Push stream closed");
    }
}

/// Pull and push delivery of cached quotes.
pub struct StreamBroadcaster {
    cache: Arc<CacheTier>,
    source: Arc<dyn MarketDataSource>,
    registry: Arc<SubscriptionRegistry>,
    settings: StreamSettings,
    active: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl StreamBroadcaster {
    /// Create a broadcaster. Streams end when `shutdown` is cancelled.
    #[must_use]
    pub fn new(
        cache: Arc<CacheTier>,
        source: Arc<dyn MarketDataSource>,
        registry: Arc<SubscriptionRegistry>,
        settings: StreamSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cache,
            source,
            registry,
            settings,
            active: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    /// Number of open push streams.
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Snapshot for `tickers`, fetching every cache miss in one batch.
    ///
    /// Tickers that are neither cached nor returned by the source fall back
    /// to a recently expired entry, and are otherwise absent.
    pub async fn get_snapshot(&self, tickers: &BTreeSet<Ticker>) -> Snapshot {
        let wanted: Vec<Ticker> = tickers.iter().cloned().collect();
        let mut entries = self.cache.get_many(&wanted).await;

        let missing: Vec<Ticker> = wanted
            .into_iter()
            .filter(|ticker| !entries.contains_key(ticker))
            .collect();

        if !missing.is_empty() {
            match fetch_stamped(self.source.as_ref(), &missing, self.settings.fetch_timeout).await {
                Ok((fetched_at, batch)) => {
                    for (ticker, quote) in batch {
                        let entry = CacheEntry::new(ticker.clone(), quote, fetched_at, self.cache.ttl());
                        match self.cache.put(entry.clone()).await {
                            PutOutcome::Stored => {
                                entries.insert(ticker, entry);
                            }
                            // A newer tick landed while we were fetching.
                            PutOutcome::Stale => {
                                if let Some(newer) = self.cache.get(&ticker).await {
                                    entries.insert(ticker, newer);
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        missing = missing.len(),
                        "On-demand fetch failed"
                    );
                }
            }
        }

        self.fill_stale(&missing, &mut entries);

        entries
            .into_iter()
            .map(|(ticker, entry)| (ticker, entry.snapshot()))
            .collect()
    }

    /// Snapshot from the cache alone.
    async fn cached_snapshot(&self, tickers: &[Ticker]) -> Snapshot {
        let mut entries = self.cache.get_many(tickers).await;
        self.fill_stale(tickers, &mut entries);

        entries
            .into_iter()
            .map(|(ticker, entry)| (ticker, entry.snapshot()))
            .collect()
    }

    fn fill_stale(
        &self,
        tickers: &[Ticker],
        entries: &mut HashMap<Ticker, CacheEntry>,
    ) {
        for ticker in tickers {
            if !entries.contains_key(ticker)
                && let Some(stale) = self.cache.get_stale(ticker)
            {
                tracing::debug!(ticker = %ticker, as_of = %stale.fetched_at, "Serving stale entry");
                entries.insert(ticker.clone(), stale);
            }
        }
    }

    /// Open a push stream for `tickers`.
    ///
    /// The returned stream yields one [`StreamEvent::Quotes`] per cadence
    /// tick. Dropping it ends the background task within one tick.
    pub fn open_stream(
        self: &Arc<Self>,
        subscriber: &SubscriberId,
        tickers: BTreeSet<Ticker>,
        expires_at: Option<DateTime<Utc>>,
    ) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.settings.buffer.max(1));

        let connection = SubscriberId::new(format!("{subscriber}#stream-{}", Uuid::new_v4()));
        self.registry.subscribe(&connection, &tickers);

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_streams(active);
        tracing::info!(
            subscriber = %subscriber,
            connection = %connection,
            tickers = tickers.len(),
            active_streams = active,
            "Push stream opened"
        );

        let guard = StreamGuard {
            registry: Arc::clone(&self.registry),
            connection,
            active: Arc::clone(&self.active),
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_stream(guard, tickers.into_iter().collect(), expires_at, tx)
                .await;
        });

        ReceiverStream::new(rx)
    }

    async fn run_stream(
        &self,
        guard: StreamGuard,
        tickers: Vec<Ticker>,
        expires_at: Option<DateTime<Utc>>,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut first = true;

        let expiry_deadline = expires_at.map(|expiry| {
            let remaining = (expiry - Utc::now()).to_std().unwrap_or_default();
            Instant::now() + remaining
        });

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    tracing::debug!(connection = %guard.connection, "Push stream stopped by shutdown");
                    break;
                }
                () = tx.closed() => {
                    tracing::debug!(connection = %guard.connection, "Push client disconnected");
                    break;
                }
                () = sleep_until_expiry(expiry_deadline) => {
                    tracing::info!(connection = %guard.connection, "Push stream token expired");
                    let _ = tx.try_send(StreamEvent::Expired);
                    break;
                }
                _ = interval.tick() => {}
            }

            if tx.is_closed() {
                break;
            }

            // Wall-clock check covers clock adjustments the monotonic timer misses.
            if expires_at.is_some_and(|expiry| Utc::now() >= expiry) {
                tracing::info!(connection = %guard.connection, "Push stream token expired");
                let _ = tx.try_send(StreamEvent::Expired);
                break;
            }

            let build = async {
                if first {
                    let wanted: BTreeSet<Ticker> = tickers.iter().cloned().collect();
                    self.get_snapshot(&wanted).await
                } else {
                    self.cached_snapshot(&tickers).await
                }
            };
            let snapshot = tokio::select! {
                snapshot = build => snapshot,
                () = tx.closed() => break,
                () = self.shutdown.cancelled() => break,
            };
            first = false;

            self.registry.touch(&guard.connection);

            match tx.try_send(StreamEvent::Quotes(snapshot)) {
                Ok(()) => metrics::record_stream_event(),
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection = %guard.connection, "Push client lagging, event dropped");
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }

        drop(guard);
    }
}

/// Resolves at `deadline`, never when there is none.
async fn sleep_until_expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
