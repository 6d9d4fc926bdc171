// Frequency-tier runners over the adaptive scheduler.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::info;

use crate::sched::{AdaptiveScheduler, FetchOutcome};
use crate::source::CachedSource;

/// High: <= 15 min. Medium: 15-45 min. Low: > 45 min.
const HIGH_CUTOFF_SECONDS: i64 = 900;
const MEDIUM_CUTOFF_SECONDS: i64 = 2700;

/// Concurrency cap for one tier run's fan-out.
const TIER_FANOUT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    High,
    Medium,
    Low,
    All,
}

impl Tier {
    pub fn matches(&self, update_interval_seconds: i64) -> bool {
        match self {
            Tier::High => update_interval_seconds <= HIGH_CUTOFF_SECONDS,
            Tier::Medium => {
                update_interval_seconds > HIGH_CUTOFF_SECONDS
                    && update_interval_seconds <= MEDIUM_CUTOFF_SECONDS
            }
            Tier::Low => update_interval_seconds > MEDIUM_CUTOFF_SECONDS,
            Tier::All => true,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "high" => Some(Tier::High),
            "medium" => Some(Tier::Medium),
            "low" => Some(Tier::Low),
            "all" => Some(Tier::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub tier: Tier,
    pub sources: Vec<String>,
    pub fetched: usize,
    pub skipped: usize,
    pub failures: usize,
    pub total_items: usize,
    pub new_items: usize,
}

/// Tier runner: lists the sources whose configured interval matches the
/// tier and delegates to the scheduler with bounded fan-out. Re-entry is
/// suppressed by the scheduler's single-flight, so runs are idempotent.
pub struct TaskOrchestrator {
    scheduler: Arc<AdaptiveScheduler>,
}

impl TaskOrchestrator {
    pub fn new(scheduler: Arc<AdaptiveScheduler>) -> Arc<Self> {
        Arc::new(Self { scheduler })
    }

    fn tier_sources(&self, tier: Tier) -> Vec<Arc<CachedSource>> {
        self.scheduler
            .registry()
            .all()
            .into_iter()
            .filter(|s| tier.matches(s.descriptor().update_interval_secs()))
            .collect()
    }

    /// Fetches every source in the tier (gated by due-ness, like a
    /// scheduler tick) and aggregates the outcomes.
    pub async fn fetch_tier(&self, tier: Tier) -> BatchResult {
        let sources = self.tier_sources(tier);
        let ids: Vec<String> = sources
            .iter()
            .map(|s| s.source_id().to_string())
            .collect();

        info!(
            component = "orchestrator",
            event = "tier_run_started",
            tier = ?tier,
            sources = ids.len(),
            "tier run started"
        );

        let outcomes: Vec<Option<FetchOutcome>> = stream::iter(ids.clone())
            .map(|source_id| {
                let scheduler = self.scheduler.clone();
                async move { scheduler.fetch(&source_id, false).await }
            })
            .buffer_unordered(TIER_FANOUT)
            .collect()
            .await;

        let mut result = BatchResult {
            tier,
            sources: ids,
            fetched: 0,
            skipped: 0,
            failures: 0,
            total_items: 0,
            new_items: 0,
        };
        for outcome in outcomes {
            match outcome {
                Some(outcome) => {
                    result.fetched += 1;
                    result.total_items += outcome.count;
                    result.new_items += outcome.new_items;
                    if !outcome.success {
                        result.failures += 1;
                    }
                }
                None => result.skipped += 1,
            }
        }

        info!(
            component = "orchestrator",
            event = "tier_run_finished",
            tier = ?tier,
            fetched = result.fetched,
            skipped = result.skipped,
            failures = result.failures,
            total_items = result.total_items,
            new_items = result.new_items,
            "tier run finished"
        );
        result
    }

    pub async fn fetch_all(&self) -> BatchResult {
        self.fetch_tier(Tier::All).await
    }

    pub async fn fetch_one(&self, source_id: &str, force: bool) -> Option<FetchOutcome> {
        self.scheduler.fetch(source_id, force).await
    }

    /// Shutdown hooks: release strategy resources (browser sessions) and
    /// flush in-process cache state to the shared tier.
    pub async fn shutdown(&self) {
        for source in self.scheduler.registry().all() {
            source.shutdown().await;
            source.flush_to_layer().await;
        }
        info!(
            component = "orchestrator",
            event = "shutdown_hooks_ran",
            "orchestrator shutdown hooks finished"
        );
    }
}
