// Two-tier cache facade used by the fetch pipeline and the scheduler.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CacheCfg;

use super::memory::MemoryTier;
use super::remote::RedisTier;

const DEFAULT_TTL: Duration = Duration::from_secs(900);

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_bytes: usize,
    pub remote_connected: bool,
    pub remote_keys: i64,
    pub key_ttls: Vec<(String, i64)>,
}

/// Two tiers with one key space: the in-process map answers first, the
/// remote KV backfills it (carrying the remaining TTL over). Remote
/// failures never surface to callers; the affected call degrades to
/// memory-only behavior and logs at warn.
pub struct CacheLayer {
    memory: MemoryTier,
    remote: Option<RedisTier>,
    default_ttl: Duration,
}

impl CacheLayer {
    pub async fn connect(cfg: Option<&CacheCfg>) -> Arc<Self> {
        let default_ttl = cfg.and_then(|c| c.default_ttl).unwrap_or(DEFAULT_TTL);
        let remote = match cfg.and_then(|c| c.redis_url.as_deref()) {
            Some(url) => RedisTier::connect(url).await,
            None => None,
        };
        Arc::new(Self {
            memory: MemoryTier::new(),
            remote,
            default_ttl,
        })
    }

    /// Memory-only layer for tests and standalone runs.
    pub fn memory_only() -> Arc<Self> {
        Arc::new(Self {
            memory: MemoryTier::new(),
            remote: None,
            default_ttl: DEFAULT_TTL,
        })
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some((payload, _)) = self.memory.get(key) {
            match serde_json::from_str(&payload) {
                Ok(value) => return Some(value),
                Err(e) => {
                    warn!(
                        component = "cache",
                        event = "memory_decode_failed",
                        key = key,
                        error = %e,
                        "dropping undecodable memory entry"
                    );
                    self.memory.delete(key);
                }
            }
        }

        let remote = self.remote.as_ref()?;
        match remote.get_with_ttl(key).await {
            Ok(Some((payload, ttl))) => match serde_json::from_str(&payload) {
                Ok(value) => {
                    if ttl > 0 {
                        self.memory.set(key, payload, ttl);
                    }
                    debug!(
                        component = "cache",
                        event = "remote_hit",
                        key = key,
                        ttl_seconds = ttl,
                        "remote tier hit repopulated memory"
                    );
                    Some(value)
                }
                Err(e) => {
                    warn!(
                        component = "cache",
                        event = "remote_decode_failed",
                        key = key,
                        error = %e,
                        "remote payload undecodable"
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(
                    component = "cache",
                    event = "remote_get_failed",
                    key = key,
                    error = %e,
                    "remote tier read failed, memory-only for this call"
                );
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    component = "cache",
                    event = "encode_failed",
                    key = key,
                    error = %e,
                    "payload not serializable, skipping cache write"
                );
                return;
            }
        };
        let ttl_seconds = ttl.as_secs() as i64;
        self.memory.set(key, payload.clone(), ttl_seconds);

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.set_ex(key, &payload, ttl_seconds).await {
                warn!(
                    component = "cache",
                    event = "remote_set_failed",
                    key = key,
                    error = %e,
                    "remote tier write failed, entry kept in memory only"
                );
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        self.memory.delete(key);
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete(key).await {
                warn!(
                    component = "cache",
                    event = "remote_delete_failed",
                    key = key,
                    error = %e,
                    "remote tier delete failed"
                );
            }
        }
    }

    /// Clears all keys with the prefix on both tiers.
    pub async fn clear_prefix(&self, prefix: &str) -> usize {
        let removed = self.memory.clear_prefix(prefix);
        if let Some(remote) = &self.remote {
            let pattern = format!("{}*", prefix);
            if let Err(e) = remote.clear_pattern(&pattern).await {
                warn!(
                    component = "cache",
                    event = "remote_clear_failed",
                    prefix = prefix,
                    error = %e,
                    "remote tier clear failed"
                );
            }
        }
        removed
    }

    pub async fn exists(&self, key: &str) -> bool {
        if self.memory.exists(key) {
            return true;
        }
        if let Some(remote) = &self.remote {
            match remote.exists(key).await {
                Ok(found) => return found,
                Err(e) => {
                    warn!(
                        component = "cache",
                        event = "remote_exists_failed",
                        key = key,
                        error = %e,
                        "remote tier exists failed"
                    );
                }
            }
        }
        false
    }

    /// Remaining TTL in seconds from the first tier that knows the key.
    pub async fn ttl(&self, key: &str) -> Option<i64> {
        if let Some(ttl) = self.memory.ttl(key) {
            return Some(ttl);
        }
        if let Some(remote) = &self.remote {
            match remote.ttl(key).await {
                Ok(ttl) if ttl > 0 => return Some(ttl),
                Ok(_) => return None,
                Err(e) => {
                    warn!(
                        component = "cache",
                        event = "remote_ttl_failed",
                        key = key,
                        error = %e,
                        "remote tier ttl failed"
                    );
                }
            }
        }
        None
    }

    pub async fn stats(&self) -> CacheStats {
        let remote_keys = match &self.remote {
            Some(remote) => remote.db_size().await.unwrap_or(-1),
            None => 0,
        };
        CacheStats {
            memory_entries: self.memory.len(),
            memory_bytes: self.memory.approx_bytes(),
            remote_connected: self.remote.is_some(),
            remote_keys,
            key_ttls: self.memory.key_ttls(),
        }
    }

    #[cfg(test)]
    pub fn force_expire(&self, key: &str) {
        self.memory.force_expire(key);
    }
}
