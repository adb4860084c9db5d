//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, engine status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (first tick completed)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{EngineHealth, MarketDataEngine};
use crate::infrastructure::metrics::get_metrics_handle;

/// Consecutive failed ticks after which the engine reports unhealthy.
const UNHEALTHY_AFTER_FAILED_TICKS: u64 = 5;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Engine version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Scheduler, cache, subscription and stream status.
    #[serde(flatten)]
    pub engine: EngineHealth,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Upstream failing or distributed cache down, still serving.
    Degraded,
    /// Upstream unreachable for an extended period.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    engine: Arc<MarketDataEngine>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, engine: Arc<MarketDataEngine>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            engine,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the router without binding a port.
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.engine.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let engine = state.engine.health();

    HealthResponse {
        status: determine_health_status(&engine),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        engine,
    }
}

fn determine_health_status(engine: &EngineHealth) -> HealthStatus {
    let failures = engine.scheduler.consecutive_failures;
    let distributed_down = engine
        .cache
        .distributed
        .as_ref()
        .is_some_and(|d| !d.available);

    if failures >= UNHEALTHY_AFTER_FAILED_TICKS {
        HealthStatus::Unhealthy
    } else if failures > 0 || distributed_down {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::application::services::{CacheStatus, DistributedStatus, SchedulerStatusSnapshot};
    use crate::domain::subscription::SubscriptionStats;

    use super::*;

    fn engine_health(consecutive_failures: u64, distributed_available: Option<bool>) -> EngineHealth {
        EngineHealth {
            scheduler: SchedulerStatusSnapshot {
                ticks: 10,
                failed_ticks: consecutive_failures,
                consecutive_failures,
                watched_tickers: 3,
                last_tick_at: Some(Utc::now()),
                last_success_at: None,
                last_error: None,
            },
            cache: CacheStatus {
                local_entries: 3,
                distributed: distributed_available.map(|available| DistributedStatus {
                    backend: "redis",
                    available,
                    errors: 0,
                }),
            },
            subscriptions: SubscriptionStats {
                subscriber_count: 2,
                ticker_count: 3,
            },
            active_streams: 1,
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_all_good() {
        assert_eq!(
            determine_health_status(&engine_health(0, Some(true))),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(&engine_health(0, None)),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn determine_status_degraded() {
        assert_eq!(
            determine_health_status(&engine_health(1, None)),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(&engine_health(0, Some(false))),
            HealthStatus::Degraded
        );
    }

    #[test]
    fn determine_status_unhealthy() {
        assert_eq!(
            determine_health_status(&engine_health(UNHEALTHY_AFTER_FAILED_TICKS, None)),
            HealthStatus::Unhealthy
        );
    }
}
