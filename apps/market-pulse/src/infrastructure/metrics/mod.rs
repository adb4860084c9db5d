//! Prometheus Metrics Module
//!
//! Exposes engine metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Scheduler**: Ticks, tick duration, tickers requested/fetched/failed
//! - **Cache**: Hits by tier, misses, stale writes, distributed tier errors
//! - **Alerts**: Rules fired, notifications sent
//! - **Streams**: Active push streams, events sent
//! - **Subscriptions**: Live subscribers and unique tickers
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder, so
//! tests never need to set one up.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed (another global recorder is
/// already set).
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Scheduler
    describe_counter!(
        "market_pulse_ticks_total",
        "Scheduler ticks by outcome"
    );
    describe_histogram!(
        "market_pulse_tick_duration_seconds",
        "Wall time of one scheduler tick"
    );
    describe_counter!(
        "market_pulse_tickers_requested_total",
        "Tickers requested from the upstream provider"
    );
    describe_counter!(
        "market_pulse_tickers_fetched_total",
        "Tickers returned by the upstream provider"
    );
    describe_counter!(
        "market_pulse_tickers_failed_total",
        "Requested tickers the upstream provider did not return"
    );

    // Cache
    describe_counter!(
        "market_pulse_cache_hits_total",
        "Cache hits by tier"
    );
    describe_counter!("market_pulse_cache_misses_total", "Cache misses");
    describe_counter!(
        "market_pulse_cache_stale_writes_total",
        "Cache writes rejected for carrying an older fetch stamp"
    );
    describe_counter!(
        "market_pulse_cache_distributed_errors_total",
        "Distributed cache tier failures by operation"
    );

    // Alerts
    describe_counter!("market_pulse_alerts_fired_total", "Alert rules fired");
    describe_counter!(
        "market_pulse_notifications_total",
        "Alert notifications by delivery outcome"
    );

    // Streams
    describe_gauge!("market_pulse_active_streams", "Open push streams");
    describe_counter!(
        "market_pulse_stream_events_total",
        "Events written to push streams"
    );

    // Subscriptions
    describe_gauge!("market_pulse_subscribers", "Live subscriptions");
    describe_gauge!(
        "market_pulse_unique_tickers",
        "Unique tickers across all subscriptions"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Cache tier label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTierLabel {
    /// In-process tier.
    Local,
    /// Shared tier.
    Distributed,
}

impl CacheTierLabel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Distributed => "distributed",
        }
    }
}

/// Scheduler tick outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing subscribed.
    Idle,
    /// Batch fetch returned data.
    Fetched,
    /// Batch fetch failed or timed out.
    Failed,
}

impl TickOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetched => "fetched",
            Self::Failed => "failed",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a completed scheduler tick.
pub fn record_tick(outcome: TickOutcome, duration: Duration) {
    counter!("market_pulse_ticks_total", "outcome" => outcome.as_str()).increment(1);
    histogram!("market_pulse_tick_duration_seconds").record(duration.as_secs_f64());
}

/// Record the size of one upstream batch.
pub fn record_fetch(requested: usize, fetched: usize) {
    counter!("market_pulse_tickers_requested_total").increment(requested as u64);
    counter!("market_pulse_tickers_fetched_total").increment(fetched as u64);
    counter!("market_pulse_tickers_failed_total")
        .increment(requested.saturating_sub(fetched) as u64);
}

/// Record a cache hit.
pub fn record_cache_hit(tier: CacheTierLabel) {
    counter!("market_pulse_cache_hits_total", "tier" => tier.as_str()).increment(1);
}

/// Record a cache miss across all tiers.
pub fn record_cache_miss() {
    counter!("market_pulse_cache_misses_total").increment(1);
}

/// Record a write rejected by the monotonic fetch stamp check.
pub fn record_stale_write() {
    counter!("market_pulse_cache_stale_writes_total").increment(1);
}

/// Record a distributed cache failure.
pub fn record_distributed_error(operation: &'static str) {
    counter!(
        "market_pulse_cache_distributed_errors_total",
        "operation" => operation
    )
    .increment(1);
}

/// Record a fired alert rule.
pub fn record_alert_fired() {
    counter!("market_pulse_alerts_fired_total").increment(1);
}

/// Record a notification delivery attempt.
pub fn record_notification(delivered: bool) {
    let outcome = if delivered { "delivered" } else { "failed" };
    counter!("market_pulse_notifications_total", "outcome" => outcome).increment(1);
}

/// Update the open push stream count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_streams(count: usize) {
    gauge!("market_pulse_active_streams").set(count as f64);
}

/// Record an event written to a push stream.
pub fn record_stream_event() {
    counter!("market_pulse_stream_events_total").increment(1);
}

/// Update subscription gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(subscribers: usize, unique_tickers: usize) {
    gauge!("market_pulse_subscribers").set(subscribers as f64);
    gauge!("market_pulse_unique_tickers").set(unique_tickers as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_tier_label_as_str() {
        assert_eq!(CacheTierLabel::Local.as_str(), "local");
        assert_eq!(CacheTierLabel::Distributed.as_str(), "distributed");
    }

    #[test]
    fn tick_outcome_as_str() {
        assert_eq!(TickOutcome::Idle.as_str(), "idle");
        assert_eq!(TickOutcome::Fetched.as_str(), "fetched");
        assert_eq!(TickOutcome::Failed.as_str(), "failed");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick(TickOutcome::Idle, Duration::from_millis(1));
        record_fetch(3, 2);
        set_active_streams(0);
    }
}
