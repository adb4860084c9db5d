//! Alert Evaluator
//!
//! Checks freshly fetched prices against active alert rules. Only rules for
//! the evaluated ticker are loaded, and a matching rule is fired through the
//! repository's compare-and-swap so concurrent evaluations of the same rule
//! produce exactly one notification.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::application::ports::{AlertRepository, AlertStoreError, Notifier};
use crate::domain::alert::{AlertId, AlertNotification, AlertRule, OwnerId};
use crate::domain::quote::Ticker;
use crate::infrastructure::metrics;

/// Evaluates and manages alert rules.
pub struct AlertEvaluator {
    repository: Arc<dyn AlertRepository>,
    notifier: Arc<dyn Notifier>,
    tolerance: Decimal,
}

impl AlertEvaluator {
    /// Create an evaluator. `tolerance` applies to `equal` rules.
    #[must_use]
    pub fn new(
        repository: Arc<dyn AlertRepository>,
        notifier: Arc<dyn Notifier>,
        tolerance: Decimal,
    ) -> Self {
        Self {
            repository,
            notifier,
            tolerance,
        }
    }

    /// Evaluate every active rule for `ticker` at `price`.
    ///
    /// Returns the number of rules this call fired. Storage errors are
    /// logged and count as zero; the rules stay active for the next tick.
    pub async fn evaluate(&self, ticker: &Ticker, price: Decimal) -> usize {
        let rules = match self.repository.active_for_ticker(ticker).await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(ticker = %ticker, error = %e, "Failed to load alert rules");
                return 0;
            }
        };

        let mut fired = 0;
        for rule in rules
            .into_iter()
            .filter(|rule| rule.should_fire(price, self.tolerance))
        {
            match self.repository.try_trigger(rule.id, price, Utc::now()).await {
                Ok(Some(triggered)) => {
                    fired += 1;
                    self.dispatch(&triggered, price);
                }
                Ok(None) => {
                    tracing::debug!(alert_id = %rule.id, "Alert already triggered elsewhere");
                }
                Err(e) => {
                    tracing::warn!(alert_id = %rule.id, error = %e, "Failed to trigger alert");
                }
            }
        }

        fired
    }

    fn dispatch(&self, rule: &AlertRule, price: Decimal) {
        let notification = AlertNotification {
            alert_id: rule.id,
            ticker: rule.ticker.clone(),
            condition: rule.condition,
            target_price: rule.target_price,
            triggered_price: price,
            triggered_at: rule.triggered_at.unwrap_or_else(Utc::now),
        };

        metrics::record_alert_fired();
        tracing::info!(
            alert_id = %rule.id,
            owner = %rule.owner_id,
            ticker = %rule.ticker,
            condition = %rule.condition,
            target = %rule.target_price,
            price = %price,
            "Alert fired"
        );

        self.notifier.notify(&rule.owner_id, notification);
    }

    /// Store a new rule.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn create(&self, rule: AlertRule) -> Result<AlertRule, AlertStoreError> {
        self.repository.insert(rule.clone()).await?;
        tracing::info!(
            alert_id = %rule.id,
            owner = %rule.owner_id,
            ticker = %rule.ticker,
            "Alert created"
        );
        Ok(rule)
    }

    /// Rules owned by `owner`, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn list(&self, owner: &OwnerId) -> Result<Vec<AlertRule>, AlertStoreError> {
        let mut rules = self.repository.list_for_owner(owner).await?;
        rules.sort_by_key(|rule| rule.created_at);
        Ok(rules)
    }

    /// Delete one of `owner`'s rules.
    ///
    /// # Errors
    ///
    /// [`AlertStoreError::NotFound`] when no such rule is owned by `owner`.
    pub async fn delete(&self, owner: &OwnerId, id: AlertId) -> Result<(), AlertStoreError> {
        self.repository.remove(owner, id).await
    }
}
