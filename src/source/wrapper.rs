// Cache-enhanced source wrapper: the protected entry point around fetch().

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::{source_key, CacheLayer};
use crate::config::SourceDescriptor;
use crate::metrics::meter;
use crate::model::NewsItem;
use crate::time;

use super::normalize::FingerprintSet;
use super::strategy::{FetchError, FetchStrategy};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const PROTECTION_HISTORY_CAP: usize = 20;
const DEDUP_FINGERPRINT_CAP: usize = 1000;

/// Shrink protection fires when the cache holds more than this many items
/// and the fresh result is below the ratio of the cached size.
const SHRINK_MIN_CACHED: usize = 5;
const SHRINK_RATIO: f64 = 0.3;

/// Number of recent protections that flags a source as unhealthy.
const PROTECTION_FLAG_THRESHOLD: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionKind {
    Empty,
    Error,
    Shrink,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProtectionEvent {
    pub kind: ProtectionKind,
    pub at_unix: i64,
    pub cached_size: usize,
    pub new_size: Option<usize>,
    pub error: Option<String>,
}

#[derive(Default)]
struct ProtectionState {
    empty_count: u64,
    error_count: u64,
    shrink_count: u64,
    /// Resettable rolling counter (cleared by clear_cache; the per-kind
    /// counters above are historical and survive).
    protection_count: u64,
    last_protection_unix: i64,
    history: VecDeque<ProtectionEvent>,
}

#[derive(Default)]
struct MetricsCell {
    cache_hit: AtomicU64,
    cache_miss: AtomicU64,
    empty_result: AtomicU64,
    fetch_error: AtomicU64,
    cache_update: AtomicU64,
    extended_validity: AtomicU64,
    current_cache_size: AtomicU64,
    max_cache_size: AtomicU64,
    last_fetch_duration_ms: AtomicU64,
}

struct CacheEntryState {
    items: Vec<NewsItem>,
    last_update_unix: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheConfigStatus {
    pub update_interval_seconds: i64,
    pub cache_ttl_seconds: i64,
    pub adaptive_enabled: bool,
    pub validity_factor: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStateStatus {
    pub has_items: bool,
    pub items_count: usize,
    pub last_update_unix: i64,
    pub cache_age_seconds: i64,
    pub is_expired: bool,
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProtectionStatus {
    pub protection_count: u64,
    pub empty_protection_count: u64,
    pub error_protection_count: u64,
    pub shrink_protection_count: u64,
    pub last_protection_unix: i64,
    pub recent: Vec<ProtectionEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsStatus {
    pub cache_hit_count: u64,
    pub cache_miss_count: u64,
    pub hit_ratio: f64,
    pub empty_result_count: u64,
    pub fetch_error_count: u64,
    pub cache_update_count: u64,
    pub extended_validity_count: u64,
    pub current_cache_size: u64,
    pub max_cache_size: u64,
    pub last_fetch_duration_ms: u64,
}

/// Per-source cache status exposed to the telemetry observer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceCacheStatus {
    pub source_id: String,
    pub source_name: String,
    pub cache_config: CacheConfigStatus,
    pub cache_state: CacheStateStatus,
    pub protection: ProtectionStatus,
    pub metrics: MetricsStatus,
    /// True when recent protections exceed the health threshold.
    pub flagged: bool,
}

/// Composable wrapper owning a fetch strategy.
///
/// `get_news` is the only public read path: it serves valid cache as a
/// copy, serializes the underlying `fetch()` behind a per-source mutex,
/// and applies the protection ladder (error / empty / shrink) so a
/// transient upstream anomaly can never wipe a healthy cache. It never
/// returns an error.
pub struct CachedSource {
    descriptor: Arc<SourceDescriptor>,
    strategy: Box<dyn FetchStrategy>,
    cache: Arc<CacheLayer>,
    fetch_lock: tokio::sync::Mutex<()>,
    state: RwLock<CacheEntryState>,
    hydrated: AtomicBool,
    metrics: MetricsCell,
    protection: Mutex<ProtectionState>,
    fetch_timeout: Duration,
    validity_factor: f64,
    random_delay: Option<(Duration, Duration)>,
    /// `use_cache: false` disables serving from cache (every call is a
    /// miss); the cached copy is still maintained for the protection
    /// ladder.
    use_cache: bool,
}

impl CachedSource {
    pub fn new(
        descriptor: Arc<SourceDescriptor>,
        strategy: Box<dyn FetchStrategy>,
        cache: Arc<CacheLayer>,
        fetch_timeout: Option<Duration>,
    ) -> Arc<Self> {
        let bag = descriptor.bag();
        let validity_factor = bag.f64("cache_validity_factor", 1.0).clamp(1.0, 3.0);
        let random_delay = bag.bool("use_random_delay", false).then(|| {
            (
                bag.secs("min_delay", 1),
                bag.secs("max_delay", 5),
            )
        });
        let use_cache = bag.bool("use_cache", true);

        Arc::new(Self {
            descriptor,
            strategy,
            cache,
            fetch_lock: tokio::sync::Mutex::new(()),
            state: RwLock::new(CacheEntryState {
                items: Vec::new(),
                last_update_unix: 0,
            }),
            hydrated: AtomicBool::new(false),
            metrics: MetricsCell::default(),
            protection: Mutex::new(ProtectionState::default()),
            fetch_timeout: fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT),
            validity_factor,
            random_delay,
            use_cache,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.descriptor.source_id
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    /// The cache-protected entry point. Always returns a list.
    pub async fn get_news(&self, force_update: bool) -> Vec<NewsItem> {
        let started = Instant::now();

        if !self.hydrated.swap(true, Ordering::Relaxed) {
            self.hydrate_from_layer().await;
        }

        let (valid, extended) = self.cache_validity();
        if !force_update && valid {
            self.metrics.cache_hit.fetch_add(1, Ordering::Relaxed);
            meter::add_cache_hits(1);
            if extended {
                self.metrics.extended_validity.fetch_add(1, Ordering::Relaxed);
                meter::add_extended_validity_hits(1);
            }
            let items = self.state.read().items.clone();
            debug!(
                component = "source",
                event = "cache_hit",
                source_id = %self.descriptor.source_id,
                items = items.len(),
                extended = extended,
                "serving cached items"
            );
            self.finish_metrics(started);
            return items;
        }

        self.metrics.cache_miss.fetch_add(1, Ordering::Relaxed);
        meter::add_cache_misses(1);

        // Single-flight: within this source fetches are strictly
        // serialized; concurrent callers queue here.
        let _flight = self.fetch_lock.lock().await;

        if let Some((min, max)) = self.random_delay {
            let span = max.saturating_sub(min);
            let jitter = if span.is_zero() {
                min
            } else {
                min + span.mul_f64(rand::thread_rng().gen::<f64>())
            };
            tokio::time::sleep(jitter).await;
        }

        let outcome = match tokio::time::timeout(self.fetch_timeout, self.strategy.fetch()).await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout)),
        };

        let cached_len = self.state.read().items.len();

        let items = match outcome {
            Err(e) => {
                self.metrics.fetch_error.fetch_add(1, Ordering::Relaxed);
                meter::add_fetch_errors(1);
                error!(
                    component = "source",
                    event = "fetch_failed",
                    source_id = %self.descriptor.source_id,
                    error = %e,
                    cached_items = cached_len,
                    "fetch failed"
                );
                if cached_len > 0 {
                    self.record_protection(ProtectionKind::Error, cached_len, None, Some(e.to_string()));
                    self.state.read().items.clone()
                } else {
                    Vec::new()
                }
            }
            Ok(raw_items) => {
                let new_items = self.dedup_within_fetch(raw_items);
                let new_len = new_items.len();

                if new_len == 0 && cached_len > 0 {
                    self.metrics.empty_result.fetch_add(1, Ordering::Relaxed);
                    self.record_protection(ProtectionKind::Empty, cached_len, Some(0), None);
                    self.state.read().items.clone()
                } else if cached_len > SHRINK_MIN_CACHED
                    && new_len > 0
                    && (new_len as f64) < SHRINK_RATIO * cached_len as f64
                {
                    self.record_protection(ProtectionKind::Shrink, cached_len, Some(new_len), None);
                    self.state.read().items.clone()
                } else {
                    self.update_cache(new_items.clone()).await;
                    new_items
                }
            }
        };

        self.finish_metrics(started);
        items
    }

    /// Replaces the cached list and publishes it to the two-tier cache.
    /// An empty list never overwrites a non-empty cache, even when a
    /// caller reaches this without going through `get_news`.
    pub(crate) async fn update_cache(&self, new_items: Vec<NewsItem>) {
        let old_len = self.state.read().items.len();
        if new_items.is_empty() && old_len > 0 {
            warn!(
                component = "source",
                event = "empty_update_rejected",
                source_id = %self.descriptor.source_id,
                cached_items = old_len,
                "refusing to overwrite non-empty cache with empty list"
            );
            return;
        }

        let new_len = new_items.len();
        {
            let mut state = self.state.write();
            state.items = new_items.clone();
            state.last_update_unix = time::unix();
        }

        let ttl = Duration::from_secs(self.descriptor.cache_ttl_secs().max(1) as u64);
        self.cache
            .set(&source_key(&self.descriptor.source_id), &new_items, ttl)
            .await;

        self.metrics.cache_update.fetch_add(1, Ordering::Relaxed);
        meter::add_cache_updates(1);

        if old_len > 0 {
            let change = (new_len as f64 - old_len as f64).abs() / old_len as f64;
            if change > 0.5 {
                info!(
                    component = "source",
                    event = "cache_size_shifted",
                    source_id = %self.descriptor.source_id,
                    old_items = old_len,
                    new_items = new_len,
                    "cache size changed significantly"
                );
            }
        }
    }

    /// Wipes the cached list on both tiers and resets the rolling
    /// protection counter. Historical per-kind counters survive.
    pub async fn clear_cache(&self) {
        let old_len = {
            let mut state = self.state.write();
            let old = state.items.len();
            state.items = Vec::new();
            state.last_update_unix = 0;
            old
        };
        self.cache
            .delete(&source_key(&self.descriptor.source_id))
            .await;
        self.protection.lock().protection_count = 0;

        info!(
            component = "source",
            event = "cache_cleared",
            source_id = %self.descriptor.source_id,
            dropped_items = old_len,
            "cache cleared"
        );
    }

    /// Releases strategy resources (browser sessions and the like).
    pub async fn shutdown(&self) {
        self.strategy.shutdown().await;
    }

    /// Re-publishes the in-process list to the shared tier with the
    /// remaining TTL. Used by the orchestrator's shutdown hook so a
    /// restart can hydrate from where this process left off.
    pub async fn flush_to_layer(&self) {
        let (items, age) = {
            let state = self.state.read();
            (state.items.clone(), time::age_seconds(state.last_update_unix))
        };
        if items.is_empty() {
            return;
        }
        let remaining = self.descriptor.cache_ttl_secs() - age;
        if remaining <= 0 {
            return;
        }
        self.cache
            .set(
                &source_key(&self.descriptor.source_id),
                &items,
                Duration::from_secs(remaining as u64),
            )
            .await;
    }

    /// Default rule: valid iff the cache holds items and is younger than
    /// ttl * validity_factor. Returns (valid, served-beyond-base-ttl).
    fn cache_validity(&self) -> (bool, bool) {
        if !self.use_cache {
            return (false, false);
        }
        let state = self.state.read();
        if state.items.is_empty() {
            return (false, false);
        }
        let age = time::age_seconds(state.last_update_unix);
        let ttl = self.descriptor.cache_ttl_secs();
        let effective = (ttl as f64 * self.validity_factor) as i64;
        let valid = age < effective;
        let extended = valid && age >= ttl;
        (valid, extended)
    }

    /// Drops exact title duplicates emitted within a single fetch.
    fn dedup_within_fetch(&self, items: Vec<NewsItem>) -> Vec<NewsItem> {
        let mut fingerprints = FingerprintSet::new(DEDUP_FINGERPRINT_CAP);
        let before = items.len();
        let deduped: Vec<NewsItem> = items
            .into_iter()
            .filter(|item| !fingerprints.check_and_insert(&item.title))
            .collect();
        if deduped.len() < before {
            debug!(
                component = "source",
                event = "titles_deduplicated",
                source_id = %self.descriptor.source_id,
                dropped = before - deduped.len(),
                "dropped duplicate titles within fetch"
            );
        }
        deduped
    }

    fn record_protection(
        &self,
        kind: ProtectionKind,
        cached_size: usize,
        new_size: Option<usize>,
        error: Option<String>,
    ) {
        let mut protection = self.protection.lock();
        match kind {
            ProtectionKind::Empty => protection.empty_count += 1,
            ProtectionKind::Error => protection.error_count += 1,
            ProtectionKind::Shrink => protection.shrink_count += 1,
        }
        protection.protection_count += 1;
        protection.last_protection_unix = time::unix();
        if protection.history.len() >= PROTECTION_HISTORY_CAP {
            protection.history.pop_front();
        }
        let at_unix = protection.last_protection_unix;
        protection.history.push_back(ProtectionEvent {
            kind,
            at_unix,
            cached_size,
            new_size,
            error: error.clone(),
        });
        let rolling = protection.protection_count;
        drop(protection);

        meter::add_protections(kind, 1);
        warn!(
            component = "source",
            event = "cache_protection",
            source_id = %self.descriptor.source_id,
            kind = ?kind,
            cached_items = cached_size,
            new_items = new_size.map(|n| n as i64).unwrap_or(-1),
            error = error.as_deref().unwrap_or(""),
            "cache protection engaged, serving cached items"
        );
        if rolling > PROTECTION_FLAG_THRESHOLD {
            warn!(
                component = "source",
                event = "protection_flag",
                source_id = %self.descriptor.source_id,
                protections = rolling,
                "protections firing repeatedly, upstream needs attention"
            );
        }
    }

    /// Repopulates local state from the two-tier cache after a restart.
    /// The entry age is reconstructed from the remaining TTL.
    async fn hydrate_from_layer(&self) {
        if !self.state.read().items.is_empty() {
            return;
        }
        let key = source_key(&self.descriptor.source_id);
        let Some(items) = self.cache.get::<Vec<NewsItem>>(&key).await else {
            return;
        };
        if items.is_empty() {
            return;
        }
        let remaining = self.cache.ttl(&key).await.unwrap_or(0);
        let ttl = self.descriptor.cache_ttl_secs();
        let age = (ttl - remaining).clamp(0, ttl);

        let mut state = self.state.write();
        if state.items.is_empty() {
            info!(
                component = "source",
                event = "cache_hydrated",
                source_id = %self.descriptor.source_id,
                items = items.len(),
                age_seconds = age,
                "local cache hydrated from shared tier"
            );
            state.items = items;
            state.last_update_unix = time::unix() - age;
        }
    }

    fn finish_metrics(&self, started: Instant) {
        let size = self.state.read().items.len() as u64;
        self.metrics
            .current_cache_size
            .store(size, Ordering::Relaxed);
        self.metrics.max_cache_size.fetch_max(size, Ordering::Relaxed);
        self.metrics
            .last_fetch_duration_ms
            .store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Point-in-time status for the telemetry observer.
    /// `detail` widens the protection history from 5 to the full 20.
    pub fn cache_status(&self, detail: bool) -> SourceCacheStatus {
        let bag = self.descriptor.bag();
        let (valid, _) = self.cache_validity();
        let state = self.state.read();
        let age = time::age_seconds(state.last_update_unix);
        let ttl = self.descriptor.cache_ttl_secs();

        let protection = self.protection.lock();
        let take = if detail { PROTECTION_HISTORY_CAP } else { 5 };
        let recent: Vec<ProtectionEvent> = protection
            .history
            .iter()
            .rev()
            .take(take)
            .cloned()
            .collect();

        let hits = self.metrics.cache_hit.load(Ordering::Relaxed);
        let misses = self.metrics.cache_miss.load(Ordering::Relaxed);

        SourceCacheStatus {
            source_id: self.descriptor.source_id.clone(),
            source_name: self.descriptor.name.clone(),
            cache_config: CacheConfigStatus {
                update_interval_seconds: self.descriptor.update_interval_secs(),
                cache_ttl_seconds: ttl,
                adaptive_enabled: bag.bool("enable_adaptive", true),
                validity_factor: self.validity_factor,
            },
            cache_state: CacheStateStatus {
                has_items: !state.items.is_empty(),
                items_count: state.items.len(),
                last_update_unix: state.last_update_unix,
                cache_age_seconds: age.min(i64::MAX / 2),
                is_expired: age >= ttl,
                valid,
            },
            protection: ProtectionStatus {
                protection_count: protection.protection_count,
                empty_protection_count: protection.empty_count,
                error_protection_count: protection.error_count,
                shrink_protection_count: protection.shrink_count,
                last_protection_unix: protection.last_protection_unix,
                recent,
            },
            metrics: MetricsStatus {
                cache_hit_count: hits,
                cache_miss_count: misses,
                hit_ratio: hits as f64 / (hits + misses).max(1) as f64,
                empty_result_count: self.metrics.empty_result.load(Ordering::Relaxed),
                fetch_error_count: self.metrics.fetch_error.load(Ordering::Relaxed),
                cache_update_count: self.metrics.cache_update.load(Ordering::Relaxed),
                extended_validity_count: self.metrics.extended_validity.load(Ordering::Relaxed),
                current_cache_size: self.metrics.current_cache_size.load(Ordering::Relaxed),
                max_cache_size: self.metrics.max_cache_size.load(Ordering::Relaxed),
                last_fetch_duration_ms: self.metrics.last_fetch_duration_ms.load(Ordering::Relaxed),
            },
            flagged: protection.protection_count > PROTECTION_FLAG_THRESHOLD,
        }
    }

    /// Backdates the cache so validity tests can cross the TTL boundary.
    #[cfg(test)]
    pub fn force_cache_age(&self, seconds: i64) {
        let mut state = self.state.write();
        state.last_update_unix = time::unix() - seconds;
    }

    /// Last-update timestamp, exposed for protection tests.
    #[cfg(test)]
    pub fn last_update_unix(&self) -> i64 {
        self.state.read().last_update_unix
    }

    /// Marks the wrapper as hydrated so tests skip the shared-tier read.
    #[cfg(test)]
    pub fn skip_hydration(&self) {
        self.hydrated.store(true, Ordering::Relaxed);
    }
}
