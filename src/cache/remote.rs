// Remote KV cache tier (Redis).

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{info, warn};

/// Redis-backed tier. Every operation returns a Result that the layer
/// downgrades to a warning: the engine never depends on the remote tier
/// being reachable.
pub struct RedisTier {
    manager: ConnectionManager,
}

impl RedisTier {
    /// Connects to the remote tier; returns None (after logging) when the
    /// connection cannot be established so the layer degrades to
    /// memory-only from the start.
    pub async fn connect(url: &str) -> Option<Self> {
        let client = match redis::Client::open(url) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    component = "cache",
                    event = "redis_url_invalid",
                    error = %e,
                    "invalid redis url, remote tier disabled"
                );
                return None;
            }
        };

        match ConnectionManager::new(client).await {
            Ok(manager) => {
                info!(
                    component = "cache",
                    event = "redis_connected",
                    "remote cache tier connected"
                );
                Some(Self { manager })
            }
            Err(e) => {
                warn!(
                    component = "cache",
                    event = "redis_connect_failed",
                    error = %e,
                    "remote cache tier unreachable, running memory-only"
                );
                None
            }
        }
    }

    /// Returns the payload and its remaining TTL in seconds.
    pub async fn get_with_ttl(&self, key: &str) -> redis::RedisResult<Option<(String, i64)>> {
        let mut conn = self.manager.clone();
        let payload: Option<String> = conn.get(key).await?;
        match payload {
            Some(payload) => {
                let ttl: i64 = conn.ttl(key).await?;
                Ok(Some((payload, ttl.max(0))))
            }
            None => Ok(None),
        }
    }

    pub async fn set_ex(&self, key: &str, payload: &str, ttl_seconds: i64) -> redis::RedisResult<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, payload, ttl_seconds.max(1) as u64)
            .await
    }

    pub async fn delete(&self, key: &str) -> redis::RedisResult<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await
    }

    /// Deletes every key matching the pattern; returns the count.
    pub async fn clear_pattern(&self, pattern: &str) -> redis::RedisResult<usize> {
        let mut conn = self.manager.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let count = keys.len();
        conn.del::<_, ()>(keys).await?;
        Ok(count)
    }

    pub async fn exists(&self, key: &str) -> redis::RedisResult<bool> {
        let mut conn = self.manager.clone();
        conn.exists(key).await
    }

    pub async fn ttl(&self, key: &str) -> redis::RedisResult<i64> {
        let mut conn = self.manager.clone();
        conn.ttl(key).await
    }

    /// Total keys on the remote side, for the stats surface.
    pub async fn db_size(&self) -> redis::RedisResult<i64> {
        let mut conn = self.manager.clone();
        redis::cmd("DBSIZE").query_async(&mut conn).await
    }
}
