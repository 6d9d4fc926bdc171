// Proxy pool registry, selection policy and health accounting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{ProxyCfg, ProxySeed};
use crate::time;

pub const DEFAULT_GROUP: &str = "default";
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_HEALTH_URL: &str = "https://www.baidu.com";
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Disable threshold: a proxy flips to ERROR once its success rate drops
/// below this percentage with at least MIN_REQUESTS_FOR_DISABLE samples.
const DISABLE_SUCCESS_RATE: f64 = 30.0;
const MIN_REQUESTS_FOR_DISABLE: u64 = 10;

/// Probability of picking the best-ranked candidate instead of a random one.
const HEAD_PICK_PROBABILITY: f64 = 0.8;

/// EMA weight for a new response-time sample.
const RESPONSE_TIME_EMA_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    Active,
    Error,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyStats {
    pub status: ProxyStatus,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Percentage, 0-100.
    pub success_rate: f64,
    pub avg_response_time: f64,
    pub last_check_unix: i64,
    pub last_error: Option<String>,
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self {
            status: ProxyStatus::Active,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            success_rate: 100.0,
            avg_response_time: 0.0,
            last_check_unix: 0,
            last_error: None,
        }
    }
}

/// One proxy pool entry. Connection identity is immutable; the health
/// stats are mutated under a per-record mutex.
pub struct ProxyRecord {
    pub id: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub group: String,
    pub priority: i32,
    pub health_url: Option<String>,
    stats: Mutex<ProxyStats>,
}

impl ProxyRecord {
    fn from_seed(seed: &ProxySeed) -> Self {
        Self {
            id: seed.id.clone(),
            protocol: seed.protocol.clone(),
            host: seed.host.clone(),
            port: seed.port,
            username: seed.username.clone(),
            password: seed.password.clone(),
            group: seed
                .group
                .clone()
                .unwrap_or_else(|| DEFAULT_GROUP.to_string()),
            priority: seed.priority.unwrap_or(0),
            health_url: seed.health_url.clone(),
            stats: Mutex::new(ProxyStats::default()),
        }
    }

    /// Builds the proxy URL, including credentials when configured.
    pub fn proxy_url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!(
                "{}://{}:{}@{}:{}",
                self.protocol,
                urlencoding::encode(user),
                urlencoding::encode(pass),
                self.host,
                self.port
            ),
            _ => format!("{}://{}:{}", self.protocol, self.host, self.port),
        }
    }

    pub fn stats(&self) -> ProxyStats {
        self.stats.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.stats.lock().status == ProxyStatus::Active
    }

    fn rank(&self) -> (i32, f64) {
        let stats = self.stats.lock();
        (self.priority, stats.success_rate)
    }
}

/// Serializable registry view for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyView {
    pub id: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub group: String,
    pub priority: i32,
    #[serde(flatten)]
    pub stats: ProxyStats,
}

/// Process-wide proxy pool.
///
/// The registry map is behind a read-write lock (many readers, writers
/// only during refresh/add/remove); each record's counters sit behind
/// their own mutex so reports from concurrent fetches never contend on
/// the registry.
pub struct ProxyManager {
    registry: RwLock<HashMap<String, Arc<ProxyRecord>>>,
    seeds: Mutex<Vec<ProxySeed>>,
    refresh_interval: Duration,
    last_refresh: AtomicI64,
    refreshing: AtomicBool,
    default_health_url: String,
}

impl ProxyManager {
    pub fn new(cfg: Option<&ProxyCfg>) -> Arc<Self> {
        let refresh_interval = cfg
            .and_then(|c| c.refresh_interval)
            .unwrap_or(DEFAULT_REFRESH_INTERVAL);
        let default_health_url = cfg
            .and_then(|c| c.health_url.clone())
            .unwrap_or_else(|| DEFAULT_HEALTH_URL.to_string());
        let seeds = cfg.map(|c| c.seeds.clone()).unwrap_or_default();

        let mut map = HashMap::with_capacity(seeds.len());
        for seed in &seeds {
            map.insert(seed.id.clone(), Arc::new(ProxyRecord::from_seed(seed)));
        }
        if !map.is_empty() {
            info!(
                component = "proxy",
                event = "pool_seeded",
                proxies = map.len(),
                "proxy pool seeded from configuration"
            );
        }

        Arc::new(Self {
            registry: RwLock::new(map),
            seeds: Mutex::new(seeds),
            refresh_interval,
            last_refresh: AtomicI64::new(time::unix()),
            refreshing: AtomicBool::new(false),
            default_health_url,
        })
    }

    /// Returns one active proxy for the source under the selection policy,
    /// or None when the group (and the default fallback) has no candidates.
    pub async fn get(&self, source_id: Option<&str>, group: &str) -> Option<Arc<ProxyRecord>> {
        if time::age_seconds(self.last_refresh.load(Ordering::Relaxed))
            > self.refresh_interval.as_secs() as i64
        {
            self.refresh().await;
        }

        let registry = self.registry.read().await;

        let mut candidates: Vec<Arc<ProxyRecord>> = registry
            .values()
            .filter(|p| p.group == group && p.is_active())
            .cloned()
            .collect();

        if candidates.is_empty() && group != DEFAULT_GROUP {
            warn!(
                component = "proxy",
                event = "group_fallback",
                group = group,
                source_id = source_id.unwrap_or(""),
                "no active proxies in requested group, falling back to default"
            );
            candidates = registry
                .values()
                .filter(|p| p.group == DEFAULT_GROUP && p.is_active())
                .cloned()
                .collect();
        }

        if candidates.is_empty() {
            return None;
        }

        candidates.sort_by(|a, b| {
            let (ap, ar) = a.rank();
            let (bp, br) = b.rank();
            bp.cmp(&ap)
                .then(br.partial_cmp(&ar).unwrap_or(std::cmp::Ordering::Equal))
        });

        let mut rng = rand::thread_rng();
        let pick = if candidates.len() > 1 && rng.gen::<f64>() >= HEAD_PICK_PROBABILITY {
            rng.gen_range(0..candidates.len())
        } else {
            0
        };
        Some(candidates[pick].clone())
    }

    /// Records the outcome of one request through the proxy.
    /// Counters update atomically under the record mutex; a proxy whose
    /// success rate drops below the threshold flips to ERROR and stops
    /// being selected.
    pub async fn report(&self, proxy_id: &str, success: bool, elapsed_seconds: Option<f64>) {
        let record = {
            let registry = self.registry.read().await;
            match registry.get(proxy_id) {
                Some(r) => r.clone(),
                None => {
                    warn!(
                        component = "proxy",
                        event = "report_unknown",
                        proxy_id = proxy_id,
                        "status report for unknown proxy"
                    );
                    return;
                }
            }
        };

        let mut stats = record.stats.lock();
        stats.total_requests += 1;
        if success {
            stats.successful_requests += 1;
            if let Some(elapsed) = elapsed_seconds {
                stats.avg_response_time = if stats.avg_response_time == 0.0 {
                    elapsed
                } else {
                    (1.0 - RESPONSE_TIME_EMA_WEIGHT) * stats.avg_response_time
                        + RESPONSE_TIME_EMA_WEIGHT * elapsed
                };
            }
        } else {
            stats.failed_requests += 1;
        }
        stats.success_rate =
            (stats.successful_requests as f64 / stats.total_requests as f64) * 100.0;

        if stats.success_rate < DISABLE_SUCCESS_RATE
            && stats.total_requests >= MIN_REQUESTS_FOR_DISABLE
            && stats.status == ProxyStatus::Active
        {
            stats.status = ProxyStatus::Error;
            warn!(
                component = "proxy",
                event = "proxy_disabled",
                proxy_id = %record.id,
                success_rate = stats.success_rate,
                total_requests = stats.total_requests,
                "proxy success rate below threshold, marked as errored"
            );
        }
    }

    /// Probes one proxy (or every proxy) through its health URL.
    pub async fn health_check(&self, proxy_id: Option<&str>) {
        let targets: Vec<Arc<ProxyRecord>> = {
            let registry = self.registry.read().await;
            match proxy_id {
                Some(id) => registry.get(id).cloned().into_iter().collect(),
                None => registry.values().cloned().collect(),
            }
        };

        for record in targets {
            let url = record
                .health_url
                .clone()
                .unwrap_or_else(|| self.default_health_url.clone());
            let started = std::time::Instant::now();
            let outcome = Self::probe(&record, &url).await;
            let elapsed = started.elapsed().as_secs_f64();

            let mut stats = record.stats.lock();
            stats.last_check_unix = time::unix();
            match outcome {
                Ok(()) => {
                    info!(
                        component = "proxy",
                        event = "health_check_passed",
                        proxy_id = %record.id,
                        elapsed_seconds = elapsed,
                        "proxy health check passed"
                    );
                    stats.status = ProxyStatus::Active;
                    stats.avg_response_time = elapsed;
                    stats.last_error = None;
                }
                Err(e) => {
                    warn!(
                        component = "proxy",
                        event = "health_check_failed",
                        proxy_id = %record.id,
                        error = %e,
                        "proxy health check failed"
                    );
                    stats.status = ProxyStatus::Error;
                    stats.last_error = Some(e);
                }
            }
        }
    }

    async fn probe(record: &ProxyRecord, url: &str) -> Result<(), String> {
        let proxy =
            reqwest::Proxy::all(record.proxy_url()).map_err(|e| format!("proxy url: {}", e))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .build()
            .map_err(|e| format!("client build: {}", e))?;

        let response = client.get(url).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("health check status: {}", response.status()));
        }
        Ok(())
    }

    /// Reloads the pool from the configured seeds.
    /// Rate-limited to once per refresh interval; existing records keep
    /// their accumulated stats.
    pub async fn refresh(&self) {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        if time::age_seconds(self.last_refresh.load(Ordering::Relaxed))
            < self.refresh_interval.as_secs() as i64
        {
            self.refreshing.store(false, Ordering::Relaxed);
            return;
        }

        let seeds = self.seeds.lock().clone();
        let mut registry = self.registry.write().await;

        let mut next: HashMap<String, Arc<ProxyRecord>> = HashMap::with_capacity(seeds.len());
        for seed in &seeds {
            match registry.remove(&seed.id) {
                Some(existing) => {
                    next.insert(seed.id.clone(), existing);
                }
                None => {
                    next.insert(seed.id.clone(), Arc::new(ProxyRecord::from_seed(seed)));
                }
            }
        }
        *registry = next;
        self.last_refresh.store(time::unix(), Ordering::Relaxed);

        info!(
            component = "proxy",
            event = "pool_refreshed",
            proxies = registry.len(),
            "proxy pool refreshed"
        );
        self.refreshing.store(false, Ordering::Relaxed);
    }

    /// Adds a proxy to the pool (and to the seed list for future refreshes).
    pub async fn add(&self, seed: ProxySeed) {
        let record = Arc::new(ProxyRecord::from_seed(&seed));
        {
            let mut seeds = self.seeds.lock();
            seeds.retain(|s| s.id != seed.id);
            seeds.push(seed.clone());
        }
        self.registry.write().await.insert(seed.id.clone(), record);
        info!(
            component = "proxy",
            event = "proxy_added",
            proxy_id = %seed.id,
            "proxy added to pool"
        );
    }

    /// Removes a proxy from the pool; returns true when it existed.
    pub async fn remove(&self, proxy_id: &str) -> bool {
        self.seeds.lock().retain(|s| s.id != proxy_id);
        let removed = self.registry.write().await.remove(proxy_id).is_some();
        if removed {
            info!(
                component = "proxy",
                event = "proxy_removed",
                proxy_id = proxy_id,
                "proxy removed from pool"
            );
        }
        removed
    }

    /// Returns a point-in-time view of the pool for the admin surface.
    pub async fn snapshot(&self) -> Vec<ProxyView> {
        let registry = self.registry.read().await;
        let mut views: Vec<ProxyView> = registry
            .values()
            .map(|r| ProxyView {
                id: r.id.clone(),
                protocol: r.protocol.clone(),
                host: r.host.clone(),
                port: r.port,
                group: r.group.clone(),
                priority: r.priority,
                stats: r.stats(),
            })
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }
}
