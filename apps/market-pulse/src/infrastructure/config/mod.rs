//! Configuration Module
//!
//! Configuration loading for the engine and its adapters.

mod settings;

pub use settings::{
    AlertSettings, ConfigError, EngineConfig, ProviderSettings, RedisSettings, ServerSettings,
};
