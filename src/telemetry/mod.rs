// Package telemetry is the read-only observer over cache-protection and
// cache-metric state.

use std::sync::Arc;

use serde::Serialize;

use crate::source::wrapper::SourceCacheStatus;
use crate::source::SourceRegistry;

/// Global rollup across every source.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalCacheStatus {
    pub sources: usize,
    pub sources_with_items: usize,
    pub total_cached_items: usize,
    pub total_hits: u64,
    pub total_misses: u64,
    pub hit_ratio: f64,
    pub empty_protections: u64,
    pub error_protections: u64,
    pub shrink_protections: u64,
    /// Sources whose recent protections exceed the health threshold.
    pub flagged_sources: Vec<String>,
}

/// Read-only telemetry over the registry. Snapshots are taken by value;
/// nothing here writes runtime state.
pub struct CacheTelemetry {
    registry: Arc<SourceRegistry>,
}

impl CacheTelemetry {
    pub fn new(registry: Arc<SourceRegistry>) -> Arc<Self> {
        Arc::new(Self { registry })
    }

    /// Detailed status of one source (20-event protection history).
    pub fn source_status(&self, source_id: &str) -> Option<SourceCacheStatus> {
        self.registry.get(source_id).map(|s| s.cache_status(true))
    }

    /// Summary status for every source (5-event protection history).
    pub fn all_statuses(&self) -> Vec<SourceCacheStatus> {
        self.registry
            .all()
            .iter()
            .map(|s| s.cache_status(false))
            .collect()
    }

    /// Aggregated totals and health flags across the engine.
    pub fn global_status(&self) -> GlobalCacheStatus {
        let statuses = self.all_statuses();

        let mut rollup = GlobalCacheStatus {
            sources: statuses.len(),
            sources_with_items: 0,
            total_cached_items: 0,
            total_hits: 0,
            total_misses: 0,
            hit_ratio: 0.0,
            empty_protections: 0,
            error_protections: 0,
            shrink_protections: 0,
            flagged_sources: Vec::new(),
        };

        for status in &statuses {
            if status.cache_state.has_items {
                rollup.sources_with_items += 1;
            }
            rollup.total_cached_items += status.cache_state.items_count;
            rollup.total_hits += status.metrics.cache_hit_count;
            rollup.total_misses += status.metrics.cache_miss_count;
            rollup.empty_protections += status.protection.empty_protection_count;
            rollup.error_protections += status.protection.error_protection_count;
            rollup.shrink_protections += status.protection.shrink_protection_count;
            if status.flagged {
                rollup.flagged_sources.push(status.source_id.clone());
            }
        }

        rollup.hit_ratio =
            rollup.total_hits as f64 / (rollup.total_hits + rollup.total_misses).max(1) as f64;
        rollup.flagged_sources.sort();
        rollup
    }
}
