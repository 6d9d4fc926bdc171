// Package cache provides the two-tier (memory + remote KV) TTL cache.

pub mod layer;
pub mod memory;
pub mod remote;

#[cfg(test)]
mod layer_test;

pub use layer::{CacheLayer, CacheStats};
pub use memory::MemoryTier;

/// Cache key for one source's item list.
pub fn source_key(source_id: &str) -> String {
    format!("source:{}", source_id)
}
