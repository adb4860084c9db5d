//! Redis Distributed Cache
//!
//! Stores each [`CacheEntry`] as JSON under `"{prefix}{ticker}"` with a
//! server-side expiry (`SET key value EX ttl`). The connection is opened
//! lazily on first use and re-attempted on the next call after a failure,
//! so the engine starts even when Redis is down.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;

use crate::application::ports::{DistributedCache, DistributedCacheError};
use crate::domain::quote::{CacheEntry, Ticker};
use crate::infrastructure::config::RedisSettings;

/// Keys requested per `SCAN` round trip.
const SCAN_COUNT: usize = 500;

/// Redis-backed [`DistributedCache`].
pub struct RedisCache {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    key_prefix: String,
    connect_timeout: Duration,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("key_prefix", &self.key_prefix)
            .field("connected", &self.connection.initialized())
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Create a cache client. Does not connect.
    ///
    /// # Errors
    ///
    /// Returns [`DistributedCacheError::Unavailable`] if the URL is invalid.
    pub fn new(settings: &RedisSettings) -> Result<Self, DistributedCacheError> {
        let client = redis::Client::open(settings.url()).map_err(unavailable)?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            key_prefix: settings.key_prefix.clone(),
            connect_timeout: settings.timeout,
        })
    }

    fn key(&self, ticker: &Ticker) -> String {
        format!("{}{}", self.key_prefix, ticker.as_str())
    }

    /// `SCAN cursor MATCH {prefix}* COUNT n`; never blocks the server the
    /// way `KEYS` does on a large keyspace.
    fn scan_command(&self, cursor: u64) -> redis::Cmd {
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(format!("{}*", self.key_prefix))
            .arg("COUNT")
            .arg(SCAN_COUNT);
        cmd
    }

    async fn connection(&self) -> Result<ConnectionManager, DistributedCacheError> {
        self.connection
            .get_or_try_init(|| async {
                let manager = tokio::time::timeout(
                    self.connect_timeout,
                    ConnectionManager::new(self.client.clone()),
                )
                .await
                .map_err(|_| DistributedCacheError::Unavailable {
                    message: format!("connect timed out after {:?}", self.connect_timeout),
                })?
                .map_err(unavailable)?;

                tracing::info!(prefix = %self.key_prefix, "Connected to Redis");
                Ok(manager)
            })
            .await
            .cloned()
    }
}

fn unavailable(e: redis::RedisError) -> DistributedCacheError {
    DistributedCacheError::Unavailable {
        message: e.to_string(),
    }
}

fn codec(e: &serde_json::Error) -> DistributedCacheError {
    DistributedCacheError::Codec {
        message: e.to_string(),
    }
}

#[async_trait]
impl DistributedCache for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, ticker: &Ticker) -> Result<Option<CacheEntry>, DistributedCacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(self.key(ticker)).await.map_err(unavailable)?;

        raw.map(|json| serde_json::from_str(&json).map_err(|e| codec(&e)))
            .transpose()
    }

    async fn put(&self, entry: &CacheEntry, ttl: Duration) -> Result<(), DistributedCacheError> {
        let json = serde_json::to_string(entry).map_err(|e| codec(&e))?;
        let seconds = ttl.as_secs().max(1);

        let mut conn = self.connection().await?;
        let () = conn
            .set_ex(self.key(&entry.ticker), json, seconds)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn invalidate(&self, ticker: &Ticker) -> Result<(), DistributedCacheError> {
        let mut conn = self.connection().await?;
        let () = conn.del(self.key(ticker)).await.map_err(unavailable)?;
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), DistributedCacheError> {
        let mut conn = self.connection().await?;
        let mut cursor = 0u64;
        let mut deleted = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .scan_command(cursor)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;

            if !keys.is_empty() {
                deleted += keys.len();
                let () = conn.del(keys).await.map_err(unavailable)?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::info!(keys = deleted, "Flushed distributed cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> RedisSettings {
        let mut settings = RedisSettings::new(url);
        settings.timeout = Duration::from_millis(200);
        settings
    }

    #[test]
    fn keys_use_prefix() {
        let cache = RedisCache::new(&settings("redis://127.0.0.1:6379/")).unwrap();
        assert_eq!(
            cache.key(&Ticker::parse("brk.b").unwrap()),
            "market-pulse:quote:BRK.B"
        );
    }

    #[test]
    fn flush_scans_by_prefix() {
        let mut settings = settings("redis://127.0.0.1:6379/");
        settings.key_prefix = "mp:".into();
        let cache = RedisCache::new(&settings).unwrap();

        let packed = String::from_utf8(cache.scan_command(42).get_packed_command()).unwrap();
        let args: Vec<&str> = packed
            .split("\r\n")
            .filter(|line| !line.starts_with(['*', '$']) && !line.is_empty())
            .collect();

        assert_eq!(args, vec!["SCAN", "42", "MATCH", "mp:*", "COUNT", "500"]);
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(matches!(
            RedisCache::new(&settings("not a url")),
            Err(DistributedCacheError::Unavailable { .. })
        ));
    }

    #[test]
    fn debug_hides_url() {
        let cache = RedisCache::new(&settings("redis://:hunter2@127.0.0.1:6379/")).unwrap();
        assert!(!format!("{cache:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        // Port 1 is reserved and refuses connections.
        let cache = RedisCache::new(&settings("redis://127.0.0.1:1/")).unwrap();

        let result = cache.get(&Ticker::parse("AAPL").unwrap()).await;

        assert!(matches!(
            result,
            Err(DistributedCacheError::Unavailable { .. })
        ));
        assert!(!cache.connection.initialized());
    }
}
