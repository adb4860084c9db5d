//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `CacheTier`: two-tier quote cache
//! - `PollingScheduler`: periodic batch refresh of subscribed tickers
//! - `AlertEvaluator`: one-shot alert evaluation
//! - `StreamBroadcaster`: pull snapshots and push streams
//! - `MarketDataEngine`: the facade wiring all of the above

pub mod alerts;
pub mod broadcaster;
pub mod cache;
pub mod engine;
pub mod periodic;
pub mod scheduler;

pub use alerts::AlertEvaluator;
pub use broadcaster::{StreamBroadcaster, StreamEvent, StreamSettings};
pub use cache::{CacheSettings, CacheStatus, CacheTier, DistributedStatus, PutOutcome};
pub use engine::{
    EngineDependencies, EngineError, EngineHealth, EngineSettings, MarketDataEngine,
};
pub use periodic::{PeriodicJob, PeriodicTask};
pub use scheduler::{
    PollingScheduler, SchedulerSettings, SchedulerStatus, SchedulerStatusSnapshot, TickReport,
};
