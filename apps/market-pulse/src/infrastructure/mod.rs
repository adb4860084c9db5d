//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the process-level HTTP surfaces.

/// In-memory alert rule storage.
pub mod alerts;

/// Static token authorizer.
pub mod auth;

/// Redis distributed cache tier.
pub mod cache;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Client-facing HTTP API (JSON + Server-Sent Events).
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Alert notification delivery.
pub mod notify;

/// Upstream quote provider client.
pub mod provider;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
