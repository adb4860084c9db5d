#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Pulse - Market Data Dissemination Engine
//!
//! Keeps per-client ticker subscriptions, polls an upstream quote provider
//! once per interval for the deduplicated union of all subscribed tickers,
//! caches results in a local tier backed by an optional Redis tier, fires
//! one-shot price alerts, and serves quotes over pull (JSON) and push
//! (Server-Sent Events) APIs.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `quote`: Tickers, quotes, cache entries, snapshots
//!   - `subscription`: Concurrent subscription registry with idle eviction
//!   - `alert`: Alert rules and their one-way trigger transition
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Market data source, distributed cache, alert store,
//!     notifier, authorizer
//!   - `services`: Cache tier, polling scheduler, alert evaluator, stream
//!     broadcaster, and the `MarketDataEngine` that wires them
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `provider`: HTTP batch quote client
//!   - `cache`: Redis distributed tier
//!   - `alerts`, `notify`, `auth`: Alert storage, delivery, token validation
//!   - `http`: Client API
//!   - `config`, `health`, `metrics`, `telemetry`: Process plumbing
//!
//! # Data Flow
//!
//! ```text
//!                 ┌──────────────┐  union   ┌───────────────────┐
//!  subscribe ────►│ Subscription │────────► │ PollingScheduler  │── fetch_batch ──► Provider
//!                 │   Registry   │          └─────────┬─────────┘
//!                 └──────────────┘                    │ put (monotonic)
//!                                                     ▼
//!                                  ┌────────────────────────────────┐
//!                                  │ CacheTier  local ◄──► Redis    │
//!                                  └───────┬───────────────┬────────┘
//!                         evaluate (after  │               │ read
//!                         put completes)   ▼               ▼
//!                               ┌────────────────┐  ┌───────────────────┐
//!                               │ AlertEvaluator │  │ StreamBroadcaster │──► snapshot / SSE
//!                               └───────┬────────┘  └───────────────────┘
//!                                       ▼
//!                                    Notifier
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::alert::{AlertCondition, AlertId, AlertNotification, AlertRule, OwnerId};
pub use domain::quote::{CacheEntry, Quote, QuoteSnapshot, Snapshot, Ticker, TickerError};
pub use domain::subscription::{
    SubscriberId, SubscriptionChanges, SubscriptionRegistry, SubscriptionStats,
};

// Ports
pub use application::ports::{
    AlertRepository, AlertStoreError, AuthError, Authorization, Authorizer, DistributedCache,
    DistributedCacheError, FetchError, MarketDataSource, Notifier, QuoteBatch,
};

// Services
pub use application::services::{
    CacheSettings, CacheTier, EngineDependencies, EngineError, EngineHealth, EngineSettings,
    MarketDataEngine, SchedulerSettings, StreamEvent, StreamSettings, TickReport,
};

// Infrastructure config
pub use infrastructure::config::{
    AlertSettings, ConfigError, EngineConfig, ProviderSettings, RedisSettings, ServerSettings,
};

// Adapters
pub use infrastructure::alerts::InMemoryAlertStore;
pub use infrastructure::auth::{StaticTokenAuthorizer, TokenTableError};
pub use infrastructure::cache::RedisCache;
pub use infrastructure::notify::{LoggingNotifier, WebhookNotifier};
pub use infrastructure::provider::HttpQuoteProvider;

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::http::{ApiServer, ApiServerError, create_router};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
