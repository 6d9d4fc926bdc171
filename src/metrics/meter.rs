use crate::controller::metrics;
use crate::source::wrapper::ProtectionKind;

pub const CACHE_HITS: &str = "cache_hits";
pub const CACHE_MISSES: &str = "cache_misses";
pub const CACHE_UPDATES: &str = "cache_updates";
pub const FETCH_ERRORS: &str = "fetch_errors";
pub const EXTENDED_VALIDITY_HITS: &str = "extended_validity_hits";

pub const EMPTY_PROTECTIONS: &str = "empty_protections";
pub const ERROR_PROTECTIONS: &str = "error_protections";
pub const SHRINK_PROTECTIONS: &str = "shrink_protections";

pub const FETCHES_TOTAL: &str = "fetches_total";
pub const FETCHES_FAILED: &str = "fetches_failed";
pub const ITEMS_FETCHED: &str = "items_fetched";
pub const ITEMS_CREATED: &str = "items_created";
pub const ITEMS_UPDATED: &str = "items_updated";
pub const PERSIST_ERRORS: &str = "persist_errors";

pub const SOURCES_REGISTERED: &str = "sources_registered";
pub const SOURCES_FETCHING: &str = "sources_fetching";

/// Adds cache hits.
pub fn add_cache_hits(value: u64) {
    metrics::inc_cache_hits(value);
}

/// Adds cache misses.
pub fn add_cache_misses(value: u64) {
    metrics::inc_cache_misses(value);
}

/// Adds cache updates.
pub fn add_cache_updates(value: u64) {
    metrics::inc_cache_updates(value);
}

/// Adds fetch errors.
pub fn add_fetch_errors(value: u64) {
    metrics::inc_fetch_errors(value);
}

/// Adds cache hits served beyond the base TTL (extended validity).
pub fn add_extended_validity_hits(value: u64) {
    metrics::inc_extended_validity_hits(value);
}

/// Adds cache-protection events of the given kind.
pub fn add_protections(kind: ProtectionKind, value: u64) {
    match kind {
        ProtectionKind::Empty => metrics::inc_empty_protections(value),
        ProtectionKind::Error => metrics::inc_error_protections(value),
        ProtectionKind::Shrink => metrics::inc_shrink_protections(value),
    }
}

/// Adds completed fetches (successes and failures).
pub fn add_fetches(total: u64, failed: u64) {
    metrics::inc_fetches(total, failed);
}

/// Adds fetched / persisted item counters.
pub fn add_item_stats(fetched: u64, created: u64, updated: u64) {
    metrics::inc_item_stats(fetched, created, updated);
}

/// Adds persistence errors.
pub fn add_persist_errors(value: u64) {
    metrics::inc_persist_errors(value);
}

/// Sets the number of registered sources.
pub fn set_sources_registered(value: u64) {
    metrics::set_sources_registered(value);
}

/// Sets the number of sources currently fetching.
pub fn set_sources_fetching(value: u64) {
    metrics::set_sources_fetching(value);
}
