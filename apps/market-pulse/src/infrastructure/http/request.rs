//! HTTP request DTOs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::alert::AlertCondition;

/// Body of subscribe and unsubscribe calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickersRequest {
    /// Raw ticker strings; invalid ones are ignored.
    pub tickers: Vec<String>,
}

/// Query string of snapshot and stream calls.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickersQuery {
    /// Comma-delimited ticker list.
    #[serde(default)]
    pub tickers: String,
}

impl TickersQuery {
    /// Split the ticker list on commas.
    #[must_use]
    pub fn split(&self) -> Vec<&str> {
        self.tickers
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .collect()
    }
}

/// Query parameter carrying a token, for clients that cannot set headers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenQuery {
    /// Capability token.
    pub token: Option<String>,
}

/// Body of alert creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlertRequest {
    /// Instrument to watch.
    pub ticker: String,
    /// Price the condition compares against.
    pub target_price: Decimal,
    /// `above`, `below` or `equal`.
    pub condition: AlertCondition,
}
