//! Alert notification adapters.
//!
//! - [`LoggingNotifier`]: writes each notification to the log.
//! - [`WebhookNotifier`]: POSTs each notification as JSON to a fixed URL.

mod logging;
mod webhook;

pub use logging::LoggingNotifier;
pub use webhook::{WebhookError, WebhookNotifier, WebhookPayload};
