//! Subscription Registry
//!
//! Tracks which tickers each subscriber (a client session or a push-stream
//! connection) is watching.
//!
//! # Design
//!
//! The registry keeps:
//! - The ticker set and last activity time of every subscriber
//! - A reference count per ticker across all subscribers
//!
//! The union of watched tickers is the key set of the reference-count map,
//! so the scheduler reads it in O(unique tickers) and a ticker watched by a
//! hundred sessions is still fetched once.
//!
//! All state sits behind a single `RwLock`. Every operation is one short
//! critical section over in-memory maps; nothing awaits or performs I/O
//! while holding it, so readers never observe a half-applied change.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::quote::Ticker;

// =============================================================================
// Types
// =============================================================================

/// Opaque identifier of a subscriber, supplied by the authorization layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    /// Wrap an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One subscriber's declared interest.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Tickers being watched.
    pub tickers: BTreeSet<Ticker>,
    /// Last subscribe/unsubscribe/touch from this subscriber.
    pub last_activity_at: Instant,
}

/// Changes to the global ticker universe caused by one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Tickers that had no watcher before this operation.
    pub added: BTreeSet<Ticker>,
    /// Tickers that lost their last watcher.
    pub removed: BTreeSet<Ticker>,
}

impl SubscriptionChanges {
    /// Check if the ticker universe changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    subscriptions: HashMap<SubscriberId, Subscription>,
    ticker_refcount: HashMap<Ticker, usize>,
}

impl RegistryState {
    fn add(&mut self, subscriber: &SubscriberId, tickers: &BTreeSet<Ticker>, now: Instant) -> BTreeSet<Ticker> {
        // A subscription never exists with an empty set.
        if tickers.is_empty() {
            return BTreeSet::new();
        }

        let subscription = self
            .subscriptions
            .entry(subscriber.clone())
            .or_insert_with(|| Subscription {
                tickers: BTreeSet::new(),
                last_activity_at: now,
            });
        subscription.last_activity_at = now;

        let mut added = BTreeSet::new();
        for ticker in tickers {
            if !subscription.tickers.insert(ticker.clone()) {
                continue;
            }

            let refcount = self.ticker_refcount.entry(ticker.clone()).or_insert(0);
            *refcount += 1;
            if *refcount == 1 {
                added.insert(ticker.clone());
            }
        }

        added
    }

    fn remove(&mut self, subscriber: &SubscriberId, tickers: &BTreeSet<Ticker>, now: Instant) -> BTreeSet<Ticker> {
        let Some(subscription) = self.subscriptions.get_mut(subscriber) else {
            return BTreeSet::new();
        };
        subscription.last_activity_at = now;

        let mut dropped = Vec::new();
        for ticker in tickers {
            if subscription.tickers.remove(ticker) {
                dropped.push(ticker.clone());
            }
        }

        if subscription.tickers.is_empty() {
            self.subscriptions.remove(subscriber);
        }

        self.release(dropped)
    }

    fn remove_subscriber(&mut self, subscriber: &SubscriberId) -> BTreeSet<Ticker> {
        self.subscriptions
            .remove(subscriber)
            .map(|subscription| self.release(subscription.tickers))
            .unwrap_or_default()
    }

    /// Decrement reference counts, returning tickers whose count hit zero.
    fn release(&mut self, tickers: impl IntoIterator<Item = Ticker>) -> BTreeSet<Ticker> {
        let mut removed = BTreeSet::new();
        for ticker in tickers {
            if let Some(refcount) = self.ticker_refcount.get_mut(&ticker) {
                *refcount = refcount.saturating_sub(1);
                if *refcount == 0 {
                    self.ticker_refcount.remove(&ticker);
                    removed.insert(ticker);
                }
            }
        }
        removed
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Concurrency-safe map from subscriber to watched tickers.
///
/// # Example
///
/// ```rust
/// use std::collections::BTreeSet;
/// use market_pulse::domain::quote::Ticker;
/// use market_pulse::domain::subscription::{SubscriberId, SubscriptionRegistry};
///
/// let registry = SubscriptionRegistry::new();
/// let tsla: BTreeSet<_> = [Ticker::parse("tsla").unwrap()].into();
///
/// let changes = registry.subscribe(&SubscriberId::new("a"), &tsla);
/// assert!(changes.added.contains(&Ticker::parse("TSLA").unwrap()));
///
/// // A second watcher does not change the fetched universe.
/// let changes = registry.subscribe(&SubscriberId::new("b"), &tsla);
/// assert!(changes.is_empty());
/// assert_eq!(registry.active_tickers().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add tickers to a subscriber's set, creating the subscription if absent.
    pub fn subscribe(&self, subscriber: &SubscriberId, tickers: &BTreeSet<Ticker>) -> SubscriptionChanges {
        self.subscribe_at(subscriber, tickers, Instant::now())
    }

    /// [`subscribe`](Self::subscribe) with an explicit activity time.
    pub fn subscribe_at(
        &self,
        subscriber: &SubscriberId,
        tickers: &BTreeSet<Ticker>,
        now: Instant,
    ) -> SubscriptionChanges {
        let added = self.state.write().add(subscriber, tickers, now);
        SubscriptionChanges {
            added,
            removed: BTreeSet::new(),
        }
    }

    /// Remove tickers from a subscriber's set. An emptied subscription is deleted.
    pub fn unsubscribe(&self, subscriber: &SubscriberId, tickers: &BTreeSet<Ticker>) -> SubscriptionChanges {
        let removed = self.state.write().remove(subscriber, tickers, Instant::now());
        SubscriptionChanges {
            added: BTreeSet::new(),
            removed,
        }
    }

    /// Delete a subscriber and everything it watches.
    pub fn unsubscribe_all(&self, subscriber: &SubscriberId) -> SubscriptionChanges {
        let removed = self.state.write().remove_subscriber(subscriber);
        SubscriptionChanges {
            added: BTreeSet::new(),
            removed,
        }
    }

    /// Refresh a subscriber's activity time. Returns `false` if it is unknown.
    pub fn touch(&self, subscriber: &SubscriberId) -> bool {
        self.touch_at(subscriber, Instant::now())
    }

    /// [`touch`](Self::touch) with an explicit activity time.
    pub fn touch_at(&self, subscriber: &SubscriberId, now: Instant) -> bool {
        self.state
            .write()
            .subscriptions
            .get_mut(subscriber)
            .map(|subscription| subscription.last_activity_at = now)
            .is_some()
    }

    /// Union of all tickers watched by live subscriptions.
    #[must_use]
    pub fn active_tickers(&self) -> BTreeSet<Ticker> {
        self.state.read().ticker_refcount.keys().cloned().collect()
    }

    /// Tickers watched by one subscriber.
    #[must_use]
    pub fn subscriber_tickers(&self, subscriber: &SubscriberId) -> BTreeSet<Ticker> {
        self.state
            .read()
            .subscriptions
            .get(subscriber)
            .map(|s| s.tickers.clone())
            .unwrap_or_default()
    }

    /// Remove subscriptions idle for longer than `max_idle`.
    ///
    /// Returns the evicted subscriber IDs.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<SubscriberId> {
        self.evict_idle_at(max_idle, Instant::now())
    }

    /// [`evict_idle`](Self::evict_idle) evaluated at `now`.
    pub fn evict_idle_at(&self, max_idle: Duration, now: Instant) -> Vec<SubscriberId> {
        let mut state = self.state.write();

        let idle: Vec<SubscriberId> = state
            .subscriptions
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_activity_at) > max_idle)
            .map(|(id, _)| id.clone())
            .collect();

        for subscriber in &idle {
            state.remove_subscriber(subscriber);
        }

        idle
    }

    /// Current registry size.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            subscriber_count: state.subscriptions.len(),
            ticker_count: state.ticker_refcount.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry size statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Number of live subscriptions.
    pub subscriber_count: usize,
    /// Number of unique tickers across all subscriptions.
    pub ticker_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
