// In-process cache tier.

use dashmap::DashMap;

use crate::time;

struct MemoryEntry {
    payload: String,
    expires_at_unix: i64,
}

/// Concurrent in-process map of serialized payloads with absolute expiry.
pub struct MemoryTier {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns the payload and its remaining TTL in seconds.
    /// Expired entries are evicted on access.
    pub fn get(&self, key: &str) -> Option<(String, i64)> {
        let now = time::unix();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at_unix > now {
                return Some((entry.payload.clone(), entry.expires_at_unix - now));
            }
        } else {
            return None;
        }
        // Expired: drop outside the read guard.
        self.entries.remove(key);
        None
    }

    pub fn set(&self, key: &str, payload: String, ttl_seconds: i64) {
        if ttl_seconds <= 0 {
            self.entries.remove(key);
            return;
        }
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                payload,
                expires_at_unix: time::unix() + ttl_seconds,
            },
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every entry whose key starts with the prefix; returns the
    /// number of removed entries.
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| prefix.is_empty() || e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remaining TTL in seconds, or None when absent/expired.
    pub fn ttl(&self, key: &str) -> Option<i64> {
        self.get(key).map(|(_, ttl)| ttl)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Approximate payload memory held by the tier.
    pub fn approx_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.key().len() + e.value().payload.len())
            .sum()
    }

    /// Snapshot of keys with remaining TTLs for the stats surface.
    pub fn key_ttls(&self) -> Vec<(String, i64)> {
        let now = time::unix();
        self.entries
            .iter()
            .filter(|e| e.value().expires_at_unix > now)
            .map(|e| (e.key().clone(), e.value().expires_at_unix - now))
            .collect()
    }

    /// Backdates an entry so it reads as expired.
    #[cfg(test)]
    pub fn force_expire(&self, key: &str) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at_unix = time::unix() - 1;
        }
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}
