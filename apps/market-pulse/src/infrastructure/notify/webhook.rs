use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::application::ports::Notifier;
use crate::domain::alert::{AlertNotification, OwnerId};
use crate::infrastructure::metrics;

/// Per-request timeout for webhook deliveries.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Retries after the first failed attempt.
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Webhook notifier construction failure.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// HTTP client could not be built.
    #[error("failed to build webhook client: {0}")]
    Client(String),
}

/// JSON body POSTed for each fired alert.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// Rule owner.
    pub owner_id: OwnerId,
    /// Human-readable summary.
    pub message: String,
    /// Structured notification.
    pub alert: AlertNotification,
}

/// Notifier that delivers alerts to an HTTP endpoint.
///
/// Each delivery runs on its own spawned task with bounded retries, so
/// [`Notifier::notify`] returns immediately.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Client`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, WebhookError> {
        Self::with_options(url, DEFAULT_TIMEOUT, DEFAULT_MAX_RETRIES)
    }

    /// Create a notifier with an explicit timeout and retry budget.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Client`] if the HTTP client cannot be built.
    pub fn with_options(
        url: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WebhookError::Client(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            client,
            max_retries,
        })
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn deliver(self, payload: WebhookPayload) {
        let alert_id = payload.alert.alert_id;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt - 1))).await;
                tracing::debug!(%alert_id, attempt, "Retrying webhook delivery");
            }

            match self.client.post(&self.url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(%alert_id, status = %response.status(), "Webhook delivered");
                    metrics::record_notification(true);
                    return;
                }
                Ok(response) => {
                    tracing::warn!(%alert_id, status = %response.status(), attempt, "Webhook rejected");
                }
                Err(e) => {
                    tracing::warn!(%alert_id, error = %e, attempt, "Webhook request failed");
                }
            }
        }

        tracing::error!(%alert_id, url = %self.url, "Webhook delivery abandoned");
        metrics::record_notification(false);
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, owner: &OwnerId, notification: AlertNotification) {
        let payload = WebhookPayload {
            owner_id: owner.clone(),
            message: notification.message(),
            alert: notification,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.clone().deliver(payload));
            }
            Err(_) => {
                tracing::error!(
                    alert_id = %payload.alert.alert_id,
                    "No async runtime, dropping webhook notification"
                );
                metrics::record_notification(false);
            }
        }
    }
}
