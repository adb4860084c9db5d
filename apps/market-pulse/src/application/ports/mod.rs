//! Port Interfaces
//!
//! Contracts between the engine and the systems around it, following the
//! hexagonal layout used throughout the crate. Adapters live in
//! `infrastructure`; tests substitute hand-written fakes or mockall mocks.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MarketDataSource`: batch quote fetching from the upstream provider
//! - `DistributedCache`: optional shared cache tier
//! - `AlertRepository`: alert rule storage with compare-and-swap triggering
//! - `Notifier`: fire-and-forget alert delivery
//!
//! ## Driver Ports (Inbound)
//!
//! - `Authorizer`: maps a client token to a subscriber identity

mod alert_repository_port;
mod authorizer_port;
mod distributed_cache_port;
mod market_data_port;
mod notifier_port;

pub use alert_repository_port::{AlertRepository, AlertStoreError};
pub use authorizer_port::{AuthError, Authorization, Authorizer};
pub use distributed_cache_port::{DistributedCache, DistributedCacheError};
pub use market_data_port::{FetchError, MarketDataSource, QuoteBatch};
pub use notifier_port::Notifier;

#[cfg(test)]
pub use alert_repository_port::MockAlertRepository;
#[cfg(test)]
pub use distributed_cache_port::MockDistributedCache;
#[cfg(test)]
pub use market_data_port::MockMarketDataSource;
#[cfg(test)]
pub use notifier_port::MockNotifier;
