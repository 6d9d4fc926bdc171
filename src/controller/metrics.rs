//! Metrics controller with simple atomic counters and Prometheus formatting.

use axum::{response::IntoResponse, routing::get, Router};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::http::Controller;

pub const PROMETHEUS_METRICS_PATH: &str = "/metrics";

// Atomic counters for engine metrics
static CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static CACHE_MISSES: AtomicU64 = AtomicU64::new(0);
static CACHE_UPDATES: AtomicU64 = AtomicU64::new(0);
static FETCH_ERRORS: AtomicU64 = AtomicU64::new(0);
static EXTENDED_VALIDITY_HITS: AtomicU64 = AtomicU64::new(0);

static EMPTY_PROTECTIONS: AtomicU64 = AtomicU64::new(0);
static ERROR_PROTECTIONS: AtomicU64 = AtomicU64::new(0);
static SHRINK_PROTECTIONS: AtomicU64 = AtomicU64::new(0);

static FETCHES_TOTAL: AtomicU64 = AtomicU64::new(0);
static FETCHES_FAILED: AtomicU64 = AtomicU64::new(0);
static ITEMS_FETCHED: AtomicU64 = AtomicU64::new(0);
static ITEMS_CREATED: AtomicU64 = AtomicU64::new(0);
static ITEMS_UPDATED: AtomicU64 = AtomicU64::new(0);
static PERSIST_ERRORS: AtomicU64 = AtomicU64::new(0);

// Gauges
static SOURCES_REGISTERED: AtomicU64 = AtomicU64::new(0);
static SOURCES_FETCHING: AtomicU64 = AtomicU64::new(0);

pub fn inc_cache_hits(value: u64) {
    CACHE_HITS.fetch_add(value, Ordering::Relaxed);
}

pub fn inc_cache_misses(value: u64) {
    CACHE_MISSES.fetch_add(value, Ordering::Relaxed);
}

pub fn inc_cache_updates(value: u64) {
    CACHE_UPDATES.fetch_add(value, Ordering::Relaxed);
}

pub fn inc_fetch_errors(value: u64) {
    FETCH_ERRORS.fetch_add(value, Ordering::Relaxed);
}

pub fn inc_extended_validity_hits(value: u64) {
    EXTENDED_VALIDITY_HITS.fetch_add(value, Ordering::Relaxed);
}

pub fn inc_empty_protections(value: u64) {
    EMPTY_PROTECTIONS.fetch_add(value, Ordering::Relaxed);
}

pub fn inc_error_protections(value: u64) {
    ERROR_PROTECTIONS.fetch_add(value, Ordering::Relaxed);
}

pub fn inc_shrink_protections(value: u64) {
    SHRINK_PROTECTIONS.fetch_add(value, Ordering::Relaxed);
}

pub fn inc_fetches(total: u64, failed: u64) {
    FETCHES_TOTAL.fetch_add(total, Ordering::Relaxed);
    FETCHES_FAILED.fetch_add(failed, Ordering::Relaxed);
}

pub fn inc_item_stats(fetched: u64, created: u64, updated: u64) {
    ITEMS_FETCHED.fetch_add(fetched, Ordering::Relaxed);
    ITEMS_CREATED.fetch_add(created, Ordering::Relaxed);
    ITEMS_UPDATED.fetch_add(updated, Ordering::Relaxed);
}

pub fn inc_persist_errors(value: u64) {
    PERSIST_ERRORS.fetch_add(value, Ordering::Relaxed);
}

pub fn set_sources_registered(value: u64) {
    SOURCES_REGISTERED.store(value, Ordering::Relaxed);
}

pub fn set_sources_fetching(value: u64) {
    SOURCES_FETCHING.store(value, Ordering::Relaxed);
}

/// Initializes the Prometheus exporter for process-level metrics.
/// Must run before the tokio runtime starts.
pub fn init_prometheus_exporter() -> Result<(), String> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn render_counter(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!(
        "# HELP newswire_{name} {help}\n# TYPE newswire_{name} counter\nnewswire_{name} {value}\n"
    ));
}

fn render_gauge(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!(
        "# HELP newswire_{name} {help}\n# TYPE newswire_{name} gauge\nnewswire_{name} {value}\n"
    ));
}

/// Renders all engine metrics in the Prometheus text exposition format.
pub fn render() -> String {
    let mut out = String::with_capacity(4096);

    render_counter(&mut out, "cache_hits", "Cache hits", CACHE_HITS.load(Ordering::Relaxed));
    render_counter(&mut out, "cache_misses", "Cache misses", CACHE_MISSES.load(Ordering::Relaxed));
    render_counter(&mut out, "cache_updates", "Cache updates", CACHE_UPDATES.load(Ordering::Relaxed));
    render_counter(&mut out, "fetch_errors", "Fetch errors", FETCH_ERRORS.load(Ordering::Relaxed));
    render_counter(
        &mut out,
        "extended_validity_hits",
        "Cache hits served beyond the base TTL",
        EXTENDED_VALIDITY_HITS.load(Ordering::Relaxed),
    );
    render_counter(
        &mut out,
        "empty_protections",
        "Empty-result cache protections",
        EMPTY_PROTECTIONS.load(Ordering::Relaxed),
    );
    render_counter(
        &mut out,
        "error_protections",
        "Error cache protections",
        ERROR_PROTECTIONS.load(Ordering::Relaxed),
    );
    render_counter(
        &mut out,
        "shrink_protections",
        "Shrink cache protections",
        SHRINK_PROTECTIONS.load(Ordering::Relaxed),
    );
    render_counter(&mut out, "fetches_total", "Completed fetches", FETCHES_TOTAL.load(Ordering::Relaxed));
    render_counter(&mut out, "fetches_failed", "Failed fetches", FETCHES_FAILED.load(Ordering::Relaxed));
    render_counter(&mut out, "items_fetched", "Items fetched", ITEMS_FETCHED.load(Ordering::Relaxed));
    render_counter(&mut out, "items_created", "Items inserted", ITEMS_CREATED.load(Ordering::Relaxed));
    render_counter(&mut out, "items_updated", "Items updated", ITEMS_UPDATED.load(Ordering::Relaxed));
    render_counter(&mut out, "persist_errors", "Persistence errors", PERSIST_ERRORS.load(Ordering::Relaxed));
    render_gauge(
        &mut out,
        "sources_registered",
        "Registered sources",
        SOURCES_REGISTERED.load(Ordering::Relaxed),
    );
    render_gauge(
        &mut out,
        "sources_fetching",
        "Sources currently fetching",
        SOURCES_FETCHING.load(Ordering::Relaxed),
    );

    out
}

/// PrometheusMetricsController serves the /metrics endpoint.
pub struct PrometheusMetricsController;

impl PrometheusMetricsController {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PrometheusMetricsController {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller for PrometheusMetricsController {
    fn add_route(&self, router: Router) -> Router {
        router.route(
            PROMETHEUS_METRICS_PATH,
            get(|| async { render().into_response() }),
        )
    }
}
