use crate::application::ports::Notifier;
use crate::domain::alert::{AlertNotification, OwnerId};
use crate::infrastructure::metrics;

/// Notifier that only logs. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl LoggingNotifier {
    /// Create a logging notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Notifier for LoggingNotifier {
    fn notify(&self, owner: &OwnerId, notification: AlertNotification) {
        tracing::info!(
            owner = %owner,
            alert_id = %notification.alert_id,
            ticker = %notification.ticker,
            triggered_price = %notification.triggered_price,
            message = %notification.message(),
            "Alert notification"
        );
        metrics::record_notification(true);
    }
}
