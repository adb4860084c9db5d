//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (provider, cache, alerts, auth).
pub mod ports;

/// Application services: cache, scheduler, alerts, broadcasting.
pub mod services;
