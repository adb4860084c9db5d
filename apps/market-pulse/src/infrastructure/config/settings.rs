//! Engine Configuration Settings
//!
//! Configuration types for the engine, loaded from environment variables.
//! Absent variables fall back to defaults; present but malformed ones are
//! fatal, so a typo in an interval never silently becomes the default.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::services::{
    CacheSettings, EngineSettings, SchedulerSettings, StreamSettings,
};
use crate::domain::alert::DEFAULT_EQUAL_TOLERANCE;

/// Upstream quote provider settings.
#[derive(Clone)]
pub struct ProviderSettings {
    /// Base URL, e.g. `https://financialmodelingprep.com/api/v3`.
    pub base_url: String,
    api_key: String,
    /// Maximum tickers per upstream request.
    pub batch_size: usize,
    /// Deadline for a single upstream request.
    pub request_timeout: Duration,
}

impl ProviderSettings {
    /// Default provider base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://financialmodelingprep.com/api/v3";

    /// Create provider settings.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            batch_size: 50,
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("batch_size", &self.batch_size)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Distributed cache (Redis) settings.
#[derive(Clone)]
pub struct RedisSettings {
    url: String,
    /// Prefix for every key the engine writes.
    pub key_prefix: String,
    /// Connect and per-operation deadline.
    pub timeout: Duration,
}

impl RedisSettings {
    /// Default key prefix.
    pub const DEFAULT_KEY_PREFIX: &'static str = "market-pulse:quote:";

    /// Create Redis settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: Self::DEFAULT_KEY_PREFIX.to_string(),
            timeout: Duration::from_millis(250),
        }
    }

    /// Connection URL (may embed a password).
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSettings")
            .field("url", &"[REDACTED]")
            .field("key_prefix", &self.key_prefix)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Alert settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertSettings {
    /// Tolerance for `equal` rules.
    pub equal_tolerance: Decimal,
    /// Webhook receiving alert notifications; log-only when unset.
    pub webhook_url: Option<String>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            equal_tolerance: DEFAULT_EQUAL_TOLERANCE,
            webhook_url: None,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Client API port.
    pub http_port: u16,
    /// Health check and metrics port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8080,
            health_port: 8082,
        }
    }
}

/// Complete engine configuration.
#[derive(Clone)]
pub struct EngineConfig {
    /// Server ports.
    pub server: ServerSettings,
    /// Polling scheduler.
    pub scheduler: SchedulerSettings,
    /// Cache tiers.
    pub cache: CacheSettings,
    /// Distributed cache; local-only when `None`.
    pub redis: Option<RedisSettings>,
    /// Push streams.
    pub stream: StreamSettings,
    /// Alerts.
    pub alerts: AlertSettings,
    /// Upstream provider.
    pub provider: ProviderSettings,
    auth_tokens: String,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("server", &self.server)
            .field("scheduler", &self.scheduler)
            .field("cache", &self.cache)
            .field("redis", &self.redis)
            .field("stream", &self.stream)
            .field("alerts", &self.alerts)
            .field("provider", &self.provider)
            .field("auth_tokens", &"[REDACTED]")
            .finish()
    }
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, a value is
    /// malformed, or the combination fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let server = ServerSettings {
            http_port: env.parse_or("MARKET_PULSE_HTTP_PORT", ServerSettings::default().http_port)?,
            health_port: env.parse_or(
                "MARKET_PULSE_HEALTH_PORT",
                ServerSettings::default().health_port,
            )?,
        };

        let scheduler = SchedulerSettings {
            interval: env.secs_or("SCHEDULER_INTERVAL_SECS", SchedulerSettings::default().interval)?,
            fetch_timeout: env.millis_or(
                "SCHEDULER_FETCH_TIMEOUT_MS",
                SchedulerSettings::default().fetch_timeout,
            )?,
            idle_window: env.secs_or(
                "SUBSCRIPTION_IDLE_SECS",
                SchedulerSettings::default().idle_window,
            )?,
        };

        let cache = CacheSettings {
            ttl: env.secs_or("CACHE_TTL_SECS", CacheSettings::default().ttl)?,
            stale_grace: env.secs_or("CACHE_STALE_GRACE_SECS", CacheSettings::default().stale_grace)?,
            distributed_timeout: env.millis_or(
                "CACHE_REDIS_TIMEOUT_MS",
                CacheSettings::default().distributed_timeout,
            )?,
            distributed_retry_after: env.secs_or(
                "CACHE_DISTRIBUTED_RETRY_SECS",
                CacheSettings::default().distributed_retry_after,
            )?,
        };

        let redis = env.optional("CACHE_REDIS_URL").map(|url| RedisSettings {
            url,
            key_prefix: env
                .optional("CACHE_KEY_PREFIX")
                .unwrap_or_else(|| RedisSettings::DEFAULT_KEY_PREFIX.to_string()),
            timeout: cache.distributed_timeout,
        });

        let stream = StreamSettings {
            interval: env.secs_or("STREAM_INTERVAL_SECS", StreamSettings::default().interval)?,
            buffer: env.parse_or("STREAM_BUFFER", StreamSettings::default().buffer)?,
            fetch_timeout: scheduler.fetch_timeout,
        };

        let alerts = AlertSettings {
            equal_tolerance: env.parse_or("ALERT_EQUAL_TOLERANCE", DEFAULT_EQUAL_TOLERANCE)?,
            webhook_url: env.optional("ALERT_WEBHOOK_URL"),
        };

        let defaults = ProviderSettings::new(ProviderSettings::DEFAULT_BASE_URL, "");
        let provider = ProviderSettings {
            base_url: env
                .optional("PROVIDER_BASE_URL")
                .unwrap_or(defaults.base_url)
                .trim_end_matches('/')
                .to_string(),
            api_key: env.required("PROVIDER_API_KEY")?,
            batch_size: env.parse_or("PROVIDER_BATCH_SIZE", defaults.batch_size)?,
            request_timeout: env.millis_or("PROVIDER_REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
        };

        let config = Self {
            server,
            scheduler,
            cache,
            redis,
            stream,
            alerts,
            provider,
            auth_tokens: env.required("AUTH_TOKENS")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.interval.is_zero() {
            return Err(ConfigError::Invalid("SCHEDULER_INTERVAL_SECS must be > 0".into()));
        }
        if self.scheduler.fetch_timeout >= self.scheduler.interval {
            return Err(ConfigError::Invalid(
                "SCHEDULER_FETCH_TIMEOUT_MS must be shorter than SCHEDULER_INTERVAL_SECS".into(),
            ));
        }
        // One chunk's deadline must expire before the batch deadline, or a
        // single hung chunk discards the chunks that already answered.
        if self.provider.request_timeout >= self.scheduler.fetch_timeout {
            return Err(ConfigError::Invalid(
                "PROVIDER_REQUEST_TIMEOUT_MS must be shorter than SCHEDULER_FETCH_TIMEOUT_MS".into(),
            ));
        }
        if self.cache.distributed_timeout.is_zero() {
            return Err(ConfigError::Invalid("CACHE_REDIS_TIMEOUT_MS must be > 0".into()));
        }
        if self.cache.distributed_timeout >= self.scheduler.fetch_timeout {
            return Err(ConfigError::Invalid(
                "CACHE_REDIS_TIMEOUT_MS must be shorter than SCHEDULER_FETCH_TIMEOUT_MS".into(),
            ));
        }
        if self.stream.interval.is_zero() {
            return Err(ConfigError::Invalid("STREAM_INTERVAL_SECS must be > 0".into()));
        }
        if self.stream.buffer == 0 {
            return Err(ConfigError::Invalid("STREAM_BUFFER must be > 0".into()));
        }
        if self.cache.ttl.is_zero() {
            return Err(ConfigError::Invalid("CACHE_TTL_SECS must be > 0".into()));
        }
        if self.alerts.equal_tolerance.is_sign_negative() {
            return Err(ConfigError::Invalid("ALERT_EQUAL_TOLERANCE must be >= 0".into()));
        }
        if self.provider.batch_size == 0 {
            return Err(ConfigError::Invalid("PROVIDER_BATCH_SIZE must be > 0".into()));
        }
        Ok(())
    }

    /// Raw `AUTH_TOKENS` specification.
    #[must_use]
    pub fn auth_tokens(&self) -> &str {
        &self.auth_tokens
    }

    /// Engine tuning derived from this configuration.
    #[must_use]
    pub const fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            cache: self.cache,
            scheduler: self.scheduler,
            stream: self.stream,
            equal_tolerance: self.alerts.equal_tolerance,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
        /// Parser message.
        reason: String,
    },
    /// Values parse but do not fit together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value, `None` when absent or blank.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        match (self.0)(key) {
            None => Err(ConfigError::MissingEnvVar(key.to_string())),
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(v) => Ok(v.trim().to_string()),
        }
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key).map_or(Ok(default), |value| {
            value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
                value,
            })
        })
    }

    fn secs_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse_or(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse_or(key, default_ms).map(Duration::from_millis)
    }
}
