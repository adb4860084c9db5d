//! Market Pulse Binary
//!
//! Starts the market data dissemination engine.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-pulse
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `PROVIDER_API_KEY`: Upstream quote provider API key
//! - `AUTH_TOKENS`: Client tokens, `token=subscriber[@unix_expiry],...`
//!
//! ## Optional
//! - `MARKET_PULSE_HTTP_PORT`: Client API port (default: 8080)
//! - `MARKET_PULSE_HEALTH_PORT`: Health check and metrics port (default: 8082)
//! - `SCHEDULER_INTERVAL_SECS`: Polling interval (default: 30)
//! - `CACHE_REDIS_URL`: Enables the Redis cache tier (default: unset)
//! - `ALERT_WEBHOOK_URL`: Alert notification webhook (default: log only)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log filter (default: `market_pulse=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_pulse::application::ports::{DistributedCache, Notifier};
use market_pulse::infrastructure::telemetry;
use market_pulse::{
    ApiServer, EngineConfig, EngineDependencies, HealthServer, HealthServerState,
    HttpQuoteProvider, InMemoryAlertStore, LoggingNotifier, MarketDataEngine, RedisCache,
    StaticTokenAuthorizer, WebhookNotifier, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Market Pulse");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = EngineConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Adapters
    let source = Arc::new(
        HttpQuoteProvider::new(&config.provider).context("failed to build quote provider")?,
    );

    let distributed_cache = match &config.redis {
        Some(redis) => Some(Arc::new(
            RedisCache::new(redis).context("invalid Redis settings")?,
        ) as Arc<dyn DistributedCache>),
        None => None,
    };

    let notifier: Arc<dyn Notifier> = match &config.alerts.webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url.clone()).context("failed to build webhook notifier")?,
        ),
        None => Arc::new(LoggingNotifier::new()),
    };

    let authorizer = Arc::new(
        StaticTokenAuthorizer::parse(config.auth_tokens()).context("invalid AUTH_TOKENS")?,
    );

    // Engine
    let engine = Arc::new(MarketDataEngine::new(
        EngineDependencies {
            source,
            distributed_cache,
            alerts: Arc::new(InMemoryAlertStore::new()),
            notifier,
            authorizer,
        },
        config.engine_settings(),
        shutdown_token.clone(),
    ));

    let scheduler_handle = engine.spawn_scheduler();

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&engine),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Client API server
    let api_server = ApiServer::new(
        config.server.http_port,
        Arc::clone(&engine),
        shutdown_token.clone(),
    );
    let api_shutdown = shutdown_token.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "API server error");
            api_shutdown.cancel();
        }
    });

    tracing::info!("Market Pulse ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(scheduler_handle, api_handle, health_handle);
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out, exiting anyway"
        );
    }

    tracing::info!("Market Pulse stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &EngineConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        health_port = config.server.health_port,
        interval_secs = config.scheduler.interval.as_secs(),
        cache_ttl_secs = config.cache.ttl.as_secs(),
        distributed_cache = config.redis.is_some(),
        webhook = config.alerts.webhook_url.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        provider = %config.provider.base_url,
        batch_size = config.provider.batch_size,
        stream_interval_secs = config.stream.interval.as_secs(),
        idle_window_secs = config.scheduler.idle_window.as_secs(),
        "Engine tuning"
    );
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or a fatal server error).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Server failure, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
