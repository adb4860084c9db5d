//! Alert Repository Port (Driven Port)
//!
//! Storage for alert rules. `try_trigger` is the single place a rule moves
//! from active to inactive and must be atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::alert::{AlertId, AlertRule, OwnerId};
use crate::domain::quote::Ticker;

/// Alert storage error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AlertStoreError {
    /// Rule does not exist.
    #[error("Alert not found: {0}")]
    NotFound(AlertId),

    /// Backend failure.
    #[error("Alert store unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },
}

/// Port for alert rule persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Store a new rule.
    async fn insert(&self, rule: AlertRule) -> Result<(), AlertStoreError>;

    /// Active rules for one ticker.
    async fn active_for_ticker(&self, ticker: &Ticker) -> Result<Vec<AlertRule>, AlertStoreError>;

    /// Atomically deactivate a rule if and only if it is still active,
    /// recording the trigger price and time.
    ///
    /// Returns the updated rule when this call won the transition, `None`
    /// when the rule was already inactive or has been deleted.
    async fn try_trigger(
        &self,
        id: AlertId,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Option<AlertRule>, AlertStoreError>;

    /// All rules (active or not) owned by `owner`.
    async fn list_for_owner(&self, owner: &OwnerId) -> Result<Vec<AlertRule>, AlertStoreError>;

    /// Delete a rule owned by `owner`. Rules owned by someone else are
    /// reported as [`AlertStoreError::NotFound`].
    async fn remove(&self, owner: &OwnerId, id: AlertId) -> Result<(), AlertStoreError>;
}
