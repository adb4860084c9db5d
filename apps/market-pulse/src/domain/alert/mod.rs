//! Price Alerts
//!
//! A rule fires once, on the first evaluated price that satisfies its
//! condition, and is never re-armed. Rules move active → inactive exactly
//! once; the transition itself is performed by the alert repository's
//! compare-and-swap.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::quote::Ticker;

/// Default tolerance for [`AlertCondition::Equal`]: one cent.
pub const DEFAULT_EQUAL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Unique alert identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Owner of alert rules. Supplied by the authorization layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
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

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Price comparison a rule waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    /// Price strictly above target.
    Above,
    /// Price strictly below target.
    Below,
    /// Price within `tolerance` of target, inclusive.
    Equal,
}

impl AlertCondition {
    /// Check the condition against a price.
    #[must_use]
    pub fn matches(self, price: Decimal, target: Decimal, tolerance: Decimal) -> bool {
        match self {
            Self::Above => price > target,
            Self::Below => price < target,
            Self::Equal => (price - target).abs() <= tolerance,
        }
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Above => "above",
            Self::Below => "below",
            Self::Equal => "equal",
        };
        f.write_str(s)
    }
}

/// A one-shot price alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    /// Rule identifier.
    pub id: AlertId,
    /// Who receives the notification.
    pub owner_id: OwnerId,
    /// Watched instrument.
    pub ticker: Ticker,
    /// Price the condition compares against.
    #[serde(with = "rust_decimal::serde::float")]
    pub target_price: Decimal,
    /// Comparison.
    pub condition: AlertCondition,
    /// `false` once fired.
    pub active: bool,
    /// When the rule fired.
    pub triggered_at: Option<DateTime<Utc>>,
    /// Price that fired the rule.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub triggered_price: Option<Decimal>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    /// Create a new active rule.
    ///
    /// # Errors
    ///
    /// Returns [`AlertRuleError::NonPositiveTarget`] if `target_price <= 0`.
    pub fn new(
        owner_id: OwnerId,
        ticker: Ticker,
        target_price: Decimal,
        condition: AlertCondition,
    ) -> Result<Self, AlertRuleError> {
        if target_price <= Decimal::ZERO {
            return Err(AlertRuleError::NonPositiveTarget(target_price));
        }

        Ok(Self {
            id: AlertId::new(),
            owner_id,
            ticker,
            target_price,
            condition,
            active: true,
            triggered_at: None,
            triggered_price: None,
            created_at: Utc::now(),
        })
    }

    /// Whether an active rule should fire at `price`.
    #[must_use]
    pub fn should_fire(&self, price: Decimal, tolerance: Decimal) -> bool {
        self.active && self.condition.matches(price, self.target_price, tolerance)
    }

    /// Mark the rule as fired. Returns `false` if it was already inactive.
    pub fn trigger(&mut self, price: Decimal, at: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.triggered_at = Some(at);
        self.triggered_price = Some(price);
        true
    }
}

/// Invalid alert rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlertRuleError {
    /// Target price must be positive.
    #[error("target price must be positive, got {0}")]
    NonPositiveTarget(Decimal),
}

/// Payload sent to an owner when one of their rules fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertNotification {
    /// Fired rule.
    pub alert_id: AlertId,
    /// Instrument.
    pub ticker: Ticker,
    /// Condition that held.
    pub condition: AlertCondition,
    /// Rule target.
    #[serde(with = "rust_decimal::serde::float")]
    pub target_price: Decimal,
    /// Price that fired it.
    #[serde(with = "rust_decimal::serde::float")]
    pub triggered_price: Decimal,
    /// Fire time.
    pub triggered_at: DateTime<Utc>,
}

impl AlertNotification {
    /// Human-readable message line.
    #[must_use]
    pub fn message(&self) -> String {
        format!(
            "{} is {} {} (last {})",
            self.ticker, self.condition, self.target_price, self.triggered_price
        )
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;

    #[test_case(AlertCondition::Above, dec!(101), true ; "above fires over target")]
    #[test_case(AlertCondition::Above, dec!(100), false ; "above ignores equal")]
    #[test_case(AlertCondition::Above, dec!(99), false ; "above ignores under")]
    #[test_case(AlertCondition::Below, dec!(99), true ; "below fires under target")]
    #[test_case(AlertCondition::Below, dec!(100), false ; "below ignores equal")]
    #[test_case(AlertCondition::Equal, dec!(100.01), true ; "equal within tolerance")]
    #[test_case(AlertCondition::Equal, dec!(99.99), true ; "equal within tolerance under")]
    #[test_case(AlertCondition::Equal, dec!(100.02), false ; "equal outside tolerance")]
    fn condition_table(condition: AlertCondition, price: Decimal, expected: bool) {
        assert_eq!(
            condition.matches(price, dec!(100), DEFAULT_EQUAL_TOLERANCE),
            expected
        );
    }

    #[test]
    fn default_tolerance_is_one_cent() {
        assert_eq!(DEFAULT_EQUAL_TOLERANCE, dec!(0.01));
    }

    #[test]
    fn rejects_non_positive_target() {
        let ticker = Ticker::parse("AAPL").unwrap();
        let result = AlertRule::new(OwnerId::new("o"), ticker, dec!(0), AlertCondition::Above);
        assert_eq!(result, Err(AlertRuleError::NonPositiveTarget(dec!(0))));
    }

    #[test]
    fn trigger_is_one_shot() {
        let ticker = Ticker::parse("AAPL").unwrap();
        let mut rule =
            AlertRule::new(OwnerId::new("o"), ticker, dec!(100), AlertCondition::Above).unwrap();

        let now = Utc::now();
        assert!(rule.trigger(dec!(101), now));
        assert!(!rule.trigger(dec!(105), now));

        assert!(!rule.active);
        assert_eq!(rule.triggered_price, Some(dec!(101)));
        assert!(!rule.should_fire(dec!(200), DEFAULT_EQUAL_TOLERANCE));
    }

    #[test]
    fn rule_serializes_for_api() {
        let ticker = Ticker::parse("msft").unwrap();
        let rule =
            AlertRule::new(OwnerId::new("o"), ticker, dec!(410.5), AlertCondition::Below).unwrap();

        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["ticker"], "MSFT");
        assert_eq!(json["condition"], "below");
        assert_eq!(json["targetPrice"], serde_json::json!(410.5));
        assert_eq!(json["active"], true);
        assert!(json["triggeredPrice"].is_null());
    }
}
