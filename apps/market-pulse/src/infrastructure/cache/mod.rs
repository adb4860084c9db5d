//! Distributed cache adapters.

mod redis;

pub use self::redis::RedisCache;
