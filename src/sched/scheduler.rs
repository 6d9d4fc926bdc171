// Adaptive scheduler: decides who runs when, drives fetches, records
// outcomes and persists items.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, Timelike};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerCfg;
use crate::metrics::meter;
use crate::persist::{self, NewsStore};
use crate::source::SourceRegistry;
use crate::time;

use super::state::SourceRuntimeState;

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_CONCURRENCY: usize = 16;
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Result of one driven fetch, as exposed on the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub source_id: String,
    pub count: usize,
    pub new_items: usize,
    pub updated_items: usize,
    pub elapsed_ms: u64,
    pub success: bool,
}

/// One row of `status()`.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub name: String,
    pub category: Option<String>,
    pub default_interval_seconds: i64,
    pub adaptive_interval_seconds: i64,
    pub last_fetch_unix: i64,
    pub next_fetch_unix: i64,
    pub success_rate: f64,
    pub frequency_score: f64,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub is_running: bool,
}

/// Drives every registered source: single-flight per source, bounded
/// global fan-out, adaptive interval bookkeeping and persistence of the
/// fetched items.
pub struct AdaptiveScheduler {
    shutdown_token: CancellationToken,
    registry: Arc<SourceRegistry>,
    store: Arc<dyn NewsStore>,
    states: Mutex<HashMap<String, SourceRuntimeState>>,
    running: Mutex<HashSet<String>>,
    semaphore: Arc<Semaphore>,
    check_interval: Duration,
    grace_period: Duration,
}

impl AdaptiveScheduler {
    pub fn new(
        shutdown_token: CancellationToken,
        cfg: Option<&SchedulerCfg>,
        registry: Arc<SourceRegistry>,
        store: Arc<dyn NewsStore>,
    ) -> Arc<Self> {
        let mut states = HashMap::with_capacity(registry.len());
        for source in registry.all() {
            let state = SourceRuntimeState::from_descriptor(source.descriptor());
            info!(
                component = "sched",
                event = "source_registered",
                source_id = %state.source_id,
                update_interval_seconds = state.default_interval,
                adaptive = state.enable_adaptive,
                "source registered"
            );
            states.insert(state.source_id.clone(), state);
        }

        let concurrency = cfg
            .and_then(|c| c.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY)
            .max(1);

        Arc::new(Self {
            shutdown_token,
            registry,
            store,
            states: Mutex::new(states),
            running: Mutex::new(HashSet::new()),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            check_interval: cfg
                .and_then(|c| c.check_interval)
                .unwrap_or(DEFAULT_CHECK_INTERVAL),
            grace_period: cfg
                .and_then(|c| c.grace_period)
                .unwrap_or(DEFAULT_GRACE_PERIOD),
        })
    }

    /// True iff the source exists, is not mid-fetch, and its effective
    /// interval has elapsed.
    pub fn should_fetch(&self, source_id: &str) -> bool {
        if self.running.lock().contains(source_id) {
            return false;
        }
        self.states
            .lock()
            .get(source_id)
            .map(|s| s.is_due())
            .unwrap_or(false)
    }

    /// Single-flight fetch entry. Returns None when the source is
    /// unknown, already fetching, or not yet due (and not forced).
    pub async fn fetch(self: &Arc<Self>, source_id: &str, force: bool) -> Option<FetchOutcome> {
        let source = match self.registry.get(source_id) {
            Some(source) => source,
            None => {
                error!(
                    component = "sched",
                    event = "unknown_source",
                    source_id = source_id,
                    "fetch requested for unknown source"
                );
                return None;
            }
        };

        {
            let mut running = self.running.lock();
            if running.contains(source_id) {
                warn!(
                    component = "sched",
                    event = "already_fetching",
                    source_id = source_id,
                    "fetch suppressed by single-flight"
                );
                return None;
            }
            if !force && !self.states.lock().get(source_id).map(|s| s.is_due()).unwrap_or(false) {
                return None;
            }
            running.insert(source_id.to_string());
            meter::set_sources_fetching(running.len() as u64);
        }

        let started = Instant::now();
        let items = source.get_news(force).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = if items.is_empty() {
            // An empty list covers both "nothing upstream" and "error
            // suppressed by the wrapper"; either way it reads as failure
            // for the adaptive policy.
            self.with_state(source_id, |state| {
                state.record_failure("fetch returned no items".to_string())
            });
            meter::add_fetches(1, 1);
            warn!(
                component = "sched",
                event = "fetch_empty",
                source_id = source_id,
                elapsed_ms = elapsed_ms,
                "fetch produced no items"
            );
            FetchOutcome {
                source_id: source_id.to_string(),
                count: 0,
                new_items: 0,
                updated_items: 0,
                elapsed_ms,
                success: false,
            }
        } else {
            let newest_age = items
                .iter()
                .map(|i| i.published_at.timestamp())
                .max()
                .map(|newest| (time::unix() - newest).max(0));

            let stats = persist::upsert_items(self.store.as_ref(), &items).await;
            if let Err(e) = self
                .store
                .update_source_timestamp(source_id, time::unix())
                .await
            {
                warn!(
                    component = "sched",
                    event = "timestamp_update_failed",
                    source_id = source_id,
                    error = %e,
                    "source timestamp update failed"
                );
            }

            let hour = Local::now().hour();
            self.with_state(source_id, |state| {
                state.record_success(items.len(), newest_age, hour)
            });
            meter::add_fetches(1, 0);
            meter::add_item_stats(items.len() as u64, stats.created as u64, stats.updated as u64);

            info!(
                component = "sched",
                event = "fetch_succeeded",
                source_id = source_id,
                items = items.len(),
                new_items = stats.created,
                updated_items = stats.updated,
                elapsed_ms = elapsed_ms,
                "fetch finished"
            );
            FetchOutcome {
                source_id: source_id.to_string(),
                count: items.len(),
                new_items: stats.created,
                updated_items: stats.updated,
                elapsed_ms,
                success: true,
            }
        };

        {
            let mut running = self.running.lock();
            running.remove(source_id);
            meter::set_sources_fetching(running.len() as u64);
        }
        Some(outcome)
    }

    /// Dispatches every due source as an independent task, bounded by the
    /// global semaphore. Does not await the dispatched fetches.
    pub async fn tick(self: &Arc<Self>) {
        let running = self.running.lock().clone();
        let due: Vec<String> = {
            let states = self.states.lock();
            states
                .values()
                .filter(|s| !running.contains(&s.source_id) && s.is_due())
                .map(|s| s.source_id.clone())
                .collect()
        };

        if due.is_empty() {
            return;
        }
        debug!(
            component = "sched",
            event = "tick",
            due = due.len(),
            "dispatching due sources"
        );

        for source_id in due {
            let scheduler = self.clone();
            let semaphore = self.semaphore.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                scheduler.fetch(&source_id, false).await;
            });
        }
    }

    /// Loop: tick every check interval until cancelled, then wait out the
    /// grace period for in-flight fetches.
    pub async fn run(self: Arc<Self>) {
        info!(
            component = "sched",
            event = "started",
            check_interval_seconds = self.check_interval.as_secs(),
            "scheduler loop started"
        );

        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        let deadline = Instant::now() + self.grace_period;
        while !self.running.lock().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let stragglers = self.running.lock().len();
        if stragglers > 0 {
            warn!(
                component = "sched",
                event = "grace_exceeded",
                in_flight = stragglers,
                "fetches still in flight after grace period"
            );
        }
        info!(component = "sched", event = "stopped", "scheduler loop stopped");
    }

    /// Point-in-time view of every source's scheduling state.
    pub fn status(&self) -> Vec<SourceStatus> {
        let running = self.running.lock().clone();
        let states = self.states.lock();

        let mut rows: Vec<SourceStatus> = states
            .values()
            .map(|state| {
                let descriptor = self.registry.get(&state.source_id);
                SourceStatus {
                    source_id: state.source_id.clone(),
                    name: descriptor
                        .as_ref()
                        .map(|s| s.descriptor().name.clone())
                        .unwrap_or_default(),
                    category: descriptor
                        .as_ref()
                        .and_then(|s| s.descriptor().category.clone()),
                    default_interval_seconds: state.default_interval,
                    adaptive_interval_seconds: state.effective_interval(),
                    last_fetch_unix: state.last_fetch_unix,
                    next_fetch_unix: if state.last_fetch_unix > 0 {
                        state.last_fetch_unix + state.effective_interval()
                    } else {
                        time::unix()
                    },
                    success_rate: state.success_rate,
                    frequency_score: state.frequency_score,
                    consecutive_errors: state.consecutive_error_count,
                    last_error: state.last_error.clone(),
                    is_running: running.contains(&state.source_id),
                }
            })
            .collect();
        rows.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        rows
    }

    /// Runs a closure against one source's runtime state.
    fn with_state<F: FnOnce(&mut SourceRuntimeState)>(&self, source_id: &str, f: F) {
        if let Some(state) = self.states.lock().get_mut(source_id) {
            f(state);
        }
    }

    /// Snapshot of one source's runtime state.
    pub fn state_of(&self, source_id: &str) -> Option<SourceRuntimeState> {
        self.states.lock().get(source_id).cloned()
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }
}
