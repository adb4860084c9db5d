//! Market Data Engine
//!
//! The single service object wiring subscriptions, the cache, the scheduler,
//! alert evaluation and stream delivery together. Constructed once at
//! process start with its collaborators injected; every client-facing call
//! validates the caller's token before touching any shared state.

use std::collections::BTreeSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    AlertRepository, AlertStoreError, AuthError, Authorization, Authorizer, DistributedCache,
    MarketDataSource, Notifier,
};
use crate::application::services::alerts::AlertEvaluator;
use crate::application::services::broadcaster::{StreamBroadcaster, StreamEvent, StreamSettings};
use crate::application::services::cache::{CacheSettings, CacheStatus, CacheTier};
use crate::application::services::periodic::PeriodicTask;
use crate::application::services::scheduler::{
    PollingScheduler, SchedulerSettings, SchedulerStatusSnapshot,
};
use crate::domain::alert::{AlertCondition, AlertId, AlertRule, AlertRuleError, OwnerId};
use crate::domain::quote::{Snapshot, Ticker};
use crate::domain::subscription::{SubscriptionRegistry, SubscriptionStats};

// =============================================================================
// Errors
// =============================================================================

/// Client-facing engine error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Token missing, unknown or expired. Nothing was changed.
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    /// Request was well-formed but unusable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Referenced resource does not exist for this caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// Backing store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<AlertStoreError> for EngineError {
    fn from(e: AlertStoreError) -> Self {
        match e {
            AlertStoreError::NotFound(id) => Self::NotFound(format!("alert {id}")),
            AlertStoreError::Unavailable { .. } => Self::Storage(e.to_string()),
        }
    }
}

impl From<AlertRuleError> for EngineError {
    fn from(e: AlertRuleError) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Cache tiers.
    pub cache: CacheSettings,
    /// Polling scheduler.
    pub scheduler: SchedulerSettings,
    /// Push streams and on-demand fetches.
    pub stream: StreamSettings,
    /// Tolerance for `equal` alert rules.
    pub equal_tolerance: Decimal,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            scheduler: SchedulerSettings::default(),
            stream: StreamSettings::default(),
            equal_tolerance: crate::domain::alert::DEFAULT_EQUAL_TOLERANCE,
        }
    }
}

/// External collaborators.
pub struct EngineDependencies {
    /// Upstream quote provider.
    pub source: Arc<dyn MarketDataSource>,
    /// Optional shared cache tier.
    pub distributed_cache: Option<Arc<dyn DistributedCache>>,
    /// Alert rule storage.
    pub alerts: Arc<dyn AlertRepository>,
    /// Alert delivery.
    pub notifier: Arc<dyn Notifier>,
    /// Token validation.
    pub authorizer: Arc<dyn Authorizer>,
}

/// Point-in-time engine health.
#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    /// Scheduler counters.
    pub scheduler: SchedulerStatusSnapshot,
    /// Cache tiers.
    pub cache: CacheStatus,
    /// Registry size.
    pub subscriptions: SubscriptionStats,
    /// Open push streams.
    pub active_streams: usize,
}

// =============================================================================
// Engine
// =============================================================================

/// Market data dissemination engine.
pub struct MarketDataEngine {
    authorizer: Arc<dyn Authorizer>,
    registry: Arc<SubscriptionRegistry>,
    cache: Arc<CacheTier>,
    scheduler: Arc<PollingScheduler>,
    evaluator: Arc<AlertEvaluator>,
    broadcaster: Arc<StreamBroadcaster>,
    shutdown: CancellationToken,
}

impl MarketDataEngine {
    /// Wire the engine. `shutdown` stops the scheduler and every push stream.
    #[must_use]
    pub fn new(
        deps: EngineDependencies,
        settings: EngineSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());

        let cache = Arc::new(match deps.distributed_cache {
            Some(backend) => CacheTier::with_distributed(settings.cache, backend),
            None => CacheTier::local_only(settings.cache),
        });

        let evaluator = Arc::new(AlertEvaluator::new(
            deps.alerts,
            deps.notifier,
            settings.equal_tolerance,
        ));

        let scheduler = Arc::new(PollingScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&deps.source),
            Arc::clone(&cache),
            Arc::clone(&evaluator),
            settings.scheduler,
        ));

        let broadcaster = Arc::new(StreamBroadcaster::new(
            Arc::clone(&cache),
            deps.source,
            Arc::clone(&registry),
            settings.stream,
            shutdown.clone(),
        ));

        Self {
            authorizer: deps.authorizer,
            registry,
            cache,
            scheduler,
            evaluator,
            broadcaster,
            shutdown,
        }
    }

    /// Start the polling loop on the runtime.
    pub fn spawn_scheduler(&self) -> JoinHandle<()> {
        PeriodicTask::new(
            Arc::clone(&self.scheduler),
            self.scheduler.settings().interval,
            self.shutdown.child_token(),
        )
        .spawn()
    }

    /// The scheduler, for driving ticks directly.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<PollingScheduler> {
        &self.scheduler
    }

    /// The cache, for administrative invalidation.
    #[must_use]
    pub const fn cache(&self) -> &Arc<CacheTier> {
        &self.cache
    }

    /// Current health.
    #[must_use]
    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            scheduler: self.scheduler.status().snapshot(),
            cache: self.cache.status(),
            subscriptions: self.registry.stats(),
            active_streams: self.broadcaster.active_streams(),
        }
    }

    /// Ready once a tick has completed, or when nothing needs fetching.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.scheduler.status().has_ticked() || self.registry.stats().ticker_count == 0
    }

    async fn authorize(&self, token: Option<&str>) -> Result<Authorization, EngineError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::Missing)?;
        let authorization = self
            .authorizer
            .validate(token)
            .await
            .inspect_err(|e| tracing::debug!(error = %e, "Rejected token"))?;
        if authorization.is_expired_at(chrono::Utc::now()) {
            return Err(AuthError::Expired.into());
        }
        Ok(authorization)
    }

    /// Add tickers to the caller's subscription. Returns the full watched set.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unauthorized`] on a bad token.
    pub async fn subscribe<S: AsRef<str>>(
        &self,
        token: Option<&str>,
        tickers: &[S],
    ) -> Result<BTreeSet<Ticker>, EngineError> {
        let auth = self.authorize(token).await?;
        let tickers = Ticker::parse_many(tickers);

        if !tickers.is_empty() {
            let changes = self.registry.subscribe(&auth.subscriber_id, &tickers);
            tracing::info!(
                subscriber = %auth.subscriber_id,
                tickers = tickers.len(),
                new_tickers = changes.added.len(),
                "Subscribed"
            );
        }

        Ok(self.registry.subscriber_tickers(&auth.subscriber_id))
    }

    /// Remove tickers from the caller's subscription. Returns what remains.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unauthorized`] on a bad token.
    pub async fn unsubscribe<S: AsRef<str>>(
        &self,
        token: Option<&str>,
        tickers: &[S],
    ) -> Result<BTreeSet<Ticker>, EngineError> {
        let auth = self.authorize(token).await?;
        let tickers = Ticker::parse_many(tickers);

        let changes = self.registry.unsubscribe(&auth.subscriber_id, &tickers);
        tracing::info!(
            subscriber = %auth.subscriber_id,
            tickers = tickers.len(),
            released_tickers = changes.removed.len(),
            "Unsubscribed"
        );

        Ok(self.registry.subscriber_tickers(&auth.subscriber_id))
    }

    /// Drop the caller's subscription entirely.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unauthorized`] on a bad token.
    pub async fn unsubscribe_all(&self, token: Option<&str>) -> Result<(), EngineError> {
        let auth = self.authorize(token).await?;
        let changes = self.registry.unsubscribe_all(&auth.subscriber_id);
        tracing::info!(
            subscriber = %auth.subscriber_id,
            released_tickers = changes.removed.len(),
            "Unsubscribed from all tickers"
        );
        Ok(())
    }

    /// Pull snapshot. Unknown or unavailable tickers are absent.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unauthorized`] on a bad token.
    pub async fn get_snapshot<S: AsRef<str>>(
        &self,
        token: Option<&str>,
        tickers: &[S],
    ) -> Result<Snapshot, EngineError> {
        self.authorize(token).await?;
        let tickers = Ticker::parse_many(tickers);
        if tickers.is_empty() {
            return Ok(Snapshot::new());
        }
        Ok(self.broadcaster.get_snapshot(&tickers).await)
    }

    /// Open a push stream.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unauthorized`] on a bad token,
    /// [`EngineError::InvalidRequest`] when no ticker is valid.
    pub async fn open_stream<S: AsRef<str>>(
        &self,
        token: Option<&str>,
        tickers: &[S],
    ) -> Result<ReceiverStream<StreamEvent>, EngineError> {
        let auth = self.authorize(token).await?;
        let tickers = Ticker::parse_many(tickers);
        if tickers.is_empty() {
            return Err(EngineError::InvalidRequest(
                "stream requires at least one valid ticker".into(),
            ));
        }
        Ok(self
            .broadcaster
            .open_stream(&auth.subscriber_id, tickers, auth.expires_at))
    }

    /// Create an alert rule owned by the caller.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidRequest`] for an invalid ticker or a
    /// non-positive target.
    pub async fn create_alert(
        &self,
        token: Option<&str>,
        ticker: &str,
        target_price: Decimal,
        condition: AlertCondition,
    ) -> Result<AlertRule, EngineError> {
        let auth = self.authorize(token).await?;
        let ticker =
            Ticker::parse(ticker).map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
        let rule = AlertRule::new(owner_of(&auth), ticker, target_price, condition)?;
        Ok(self.evaluator.create(rule).await?)
    }

    /// The caller's alert rules.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unauthorized`] on a bad token.
    pub async fn list_alerts(&self, token: Option<&str>) -> Result<Vec<AlertRule>, EngineError> {
        let auth = self.authorize(token).await?;
        Ok(self.evaluator.list(&owner_of(&auth)).await?)
    }

    /// Delete one of the caller's alert rules.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] when the caller owns no such rule.
    pub async fn delete_alert(&self, token: Option<&str>, id: AlertId) -> Result<(), EngineError> {
        let auth = self.authorize(token).await?;
        self.evaluator.delete(&owner_of(&auth), id).await?;
        tracing::info!(alert_id = %id, owner = %auth.subscriber_id, "Alert deleted");
        Ok(())
    }
}

fn owner_of(auth: &Authorization) -> OwnerId {
    OwnerId::new(auth.subscriber_id.as_str())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::ports::MockMarketDataSource;
    use crate::domain::alert::AlertNotification;
    use crate::domain::subscription::SubscriberId;
    use crate::infrastructure::alerts::InMemoryAlertStore;

    struct OneToken;

    #[async_trait]
    impl Authorizer for OneToken {
        async fn validate(&self, token: &str) -> Result<Authorization, AuthError> {
            match token {
                "good" => Ok(Authorization {
                    subscriber_id: SubscriberId::new("alice"),
                    expires_at: None,
                }),
                _ => Err(AuthError::Invalid),
            }
        }
    }

    struct SilentNotifier;

    impl Notifier for SilentNotifier {
        fn notify(&self, _owner: &OwnerId, _notification: AlertNotification) {}
    }

    fn engine(source: MockMarketDataSource) -> MarketDataEngine {
        MarketDataEngine::new(
            EngineDependencies {
                source: Arc::new(source),
                distributed_cache: None,
                alerts: Arc::new(InMemoryAlertStore::new()),
                notifier: Arc::new(SilentNotifier),
                authorizer: Arc::new(OneToken),
            },
            EngineSettings::default(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn bad_token_has_no_side_effects() {
        let mut source = MockMarketDataSource::new();
        source.expect_fetch_batch().never();
        let engine = engine(source);

        let result = engine.subscribe(Some("bad"), &["AAPL"]).await;
        assert!(matches!(result, Err(EngineError::Unauthorized(AuthError::Invalid))));

        let result = engine.get_snapshot(None, &["AAPL"]).await;
        assert!(matches!(result, Err(EngineError::Unauthorized(AuthError::Missing))));

        assert_eq!(engine.health().subscriptions, SubscriptionStats::default());
    }

    #[tokio::test]
    async fn unknown_tickers_are_silently_dropped() {
        let engine = engine(MockMarketDataSource::new());

        let watched = engine
            .subscribe(Some("good"), &["aapl", "not a ticker", ""])
            .await
            .unwrap();

        assert_eq!(watched, BTreeSet::from([Ticker::parse("AAPL").unwrap()]));
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let engine = engine(MockMarketDataSource::new());

        engine.subscribe(Some("good"), &["TSLA"]).await.unwrap();
        let watched = engine.subscribe(Some("good"), &["tsla"]).await.unwrap();

        assert_eq!(watched.len(), 1);
        assert_eq!(engine.health().subscriptions.ticker_count, 1);
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_before_tick_fetches_nothing() {
        let mut source = MockMarketDataSource::new();
        source.expect_fetch_batch().never();
        let engine = engine(source);

        engine.subscribe(Some("good"), &["TSLA"]).await.unwrap();
        let remaining = engine.unsubscribe(Some("good"), &["TSLA"]).await.unwrap();
        engine.scheduler().tick().await;

        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn stream_requires_a_valid_ticker() {
        let engine = engine(MockMarketDataSource::new());

        let result = engine.open_stream(Some("good"), &["???"]).await;

        assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn alert_lifecycle_through_engine() {
        let mut source = MockMarketDataSource::new();
        source
            .expect_fetch_batch()
            .returning(|_| Ok(HashMap::from([(Ticker::parse("TSLA").unwrap(), quote(dec!(300)))])));
        let engine = engine(source);

        let rule = engine
            .create_alert(Some("good"), "tsla", dec!(280), AlertCondition::Above)
            .await
            .unwrap();
        assert!(rule.active);

        engine.subscribe(Some("good"), &["TSLA"]).await.unwrap();
        let report = engine.scheduler().tick().await;
        assert_eq!(report.alerts_fired, 1);

        let listed = engine.list_alerts(Some("good")).await.unwrap();
        assert!(!listed[0].active);

        engine.delete_alert(Some("good"), rule.id).await.unwrap();
        assert!(matches!(
            engine.delete_alert(Some("good"), rule.id).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn alert_validation() {
        let engine = engine(MockMarketDataSource::new());

        assert!(matches!(
            engine
                .create_alert(Some("good"), "", dec!(10), AlertCondition::Above)
                .await,
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            engine
                .create_alert(Some("good"), "AAPL", dec!(-1), AlertCondition::Below)
                .await,
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn ready_when_nothing_subscribed() {
        let engine = engine(MockMarketDataSource::new());
        assert!(engine.is_ready());
    }

    fn quote(price: Decimal) -> crate::domain::quote::Quote {
        crate::domain::quote::Quote {
            price,
            change_absolute: dec!(0),
            change_percent: dec!(0),
            volume: 0,
        }
    }
}
