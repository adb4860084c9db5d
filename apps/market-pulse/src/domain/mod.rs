//! Domain Layer - Core market data types and business rules.
//!
//! Pure in-memory types with no I/O. Everything here is synchronous and
//! safe to share across tasks.

/// Tickers, quotes and cache entries.
pub mod quote;

/// Subscription tracking with idle eviction.
pub mod subscription;

/// One-shot price alert rules.
pub mod alert;
