// Per-source mutable scheduling state and the adaptive interval policy.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::SourceDescriptor;
use crate::time;

const HISTORY_CAP: usize = 10;

const DEFAULT_MIN_INTERVAL: i64 = 600;
const DEFAULT_MAX_INTERVAL: i64 = 7200;

/// EMA weight of a new outcome in the rolling success rate.
const SUCCESS_EMA_WEIGHT: f64 = 0.1;
/// EMA weight of a new sample in the upstream-freshness score.
const FREQUENCY_EMA_WEIGHT: f64 = 0.3;

/// Standalone backoff applied on a failed or empty fetch.
const FAILURE_BACKOFF_FACTOR: f64 = 1.5;

/// Daytime window (local hours, inclusive) with the busier refresh bias.
const DAY_START_HOUR: u32 = 8;
const DAY_END_HOUR: u32 = 21;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub at_unix: i64,
    pub item_count: usize,
    pub success: bool,
    pub error: Option<String>,
}

/// Mutable scheduling state for one source, owned by the scheduler.
#[derive(Debug, Clone)]
pub struct SourceRuntimeState {
    pub source_id: String,
    pub default_interval: i64,
    pub min_interval: i64,
    pub max_interval: i64,
    pub enable_adaptive: bool,
    /// Seconds between fetches, kept inside [min_interval, max_interval].
    pub adaptive_interval: i64,
    pub last_fetch_unix: i64,
    pub last_fetch_item_count: usize,
    /// EMA over recent fetch outcomes, 0.0-1.0.
    pub success_rate: f64,
    /// EMA over inferred upstream freshness, 0.0-1.0.
    pub frequency_score: f64,
    /// Mean item growth per second across the history window.
    pub avg_growth_rate: f64,
    pub consecutive_error_count: u32,
    pub last_error: Option<String>,
    pub history: VecDeque<HistoryEntry>,
}

impl SourceRuntimeState {
    pub fn from_descriptor(descriptor: &SourceDescriptor) -> Self {
        let bag = descriptor.bag();
        let default_interval = descriptor.update_interval_secs();
        let min_interval = bag.i64("min_interval", DEFAULT_MIN_INTERVAL).max(1);
        let max_interval = bag.i64("max_interval", DEFAULT_MAX_INTERVAL).max(min_interval);

        Self {
            source_id: descriptor.source_id.clone(),
            default_interval,
            min_interval,
            max_interval,
            enable_adaptive: bag.bool("enable_adaptive", true),
            adaptive_interval: default_interval.clamp(min_interval, max_interval),
            last_fetch_unix: 0,
            last_fetch_item_count: 0,
            success_rate: 1.0,
            frequency_score: 0.5,
            avg_growth_rate: 0.0,
            consecutive_error_count: 0,
            last_error: None,
            history: VecDeque::with_capacity(HISTORY_CAP),
        }
    }

    /// The wait the scheduler honors between fetches of this source.
    pub fn effective_interval(&self) -> i64 {
        if self.enable_adaptive {
            self.adaptive_interval
        } else {
            self.default_interval
        }
    }

    pub fn is_due(&self) -> bool {
        time::age_seconds(self.last_fetch_unix) >= self.effective_interval()
    }

    /// Maps the age of the newest item to a freshness sample.
    pub fn frequency_sample(newest_age_seconds: i64) -> f64 {
        match newest_age_seconds {
            age if age < 300 => 0.9,
            age if age < 900 => 0.7,
            age if age < 1800 => 0.5,
            age if age < 3600 => 0.3,
            _ => 0.1,
        }
    }

    /// Records a successful fetch and recomputes the adaptive interval.
    /// `newest_age_seconds` is `now - max(published_at)` when the batch
    /// carried timestamps; `hour` is the local hour used for the
    /// time-of-day bias (passed in so the policy stays testable).
    pub fn record_success(&mut self, item_count: usize, newest_age_seconds: Option<i64>, hour: u32) {
        self.success_rate = (1.0 - SUCCESS_EMA_WEIGHT) * self.success_rate + SUCCESS_EMA_WEIGHT;
        self.consecutive_error_count = 0;
        self.last_error = None;

        if let Some(age) = newest_age_seconds {
            let sample = Self::frequency_sample(age);
            self.frequency_score = (1.0 - FREQUENCY_EMA_WEIGHT) * self.frequency_score
                + FREQUENCY_EMA_WEIGHT * sample;
        }

        self.push_history(item_count, true, None);
        self.last_fetch_unix = time::unix();
        self.last_fetch_item_count = item_count;

        if self.enable_adaptive {
            self.recompute_interval(hour);
        }
    }

    /// Records a failed (or empty) fetch: success EMA decays and the
    /// interval backs off independently of the score policy.
    pub fn record_failure(&mut self, error: String) {
        self.success_rate = (1.0 - SUCCESS_EMA_WEIGHT) * self.success_rate;
        self.consecutive_error_count += 1;
        self.last_error = Some(error.clone());

        self.push_history(0, false, Some(error));
        self.last_fetch_unix = time::unix();
        self.last_fetch_item_count = 0;

        if self.enable_adaptive {
            let was = self.adaptive_interval;
            self.adaptive_interval = ((self.adaptive_interval as f64 * FAILURE_BACKOFF_FACTOR)
                as i64)
                .min(self.max_interval);
            if self.adaptive_interval != was {
                info!(
                    component = "sched",
                    event = "interval_backoff",
                    source_id = %self.source_id,
                    from_seconds = was,
                    to_seconds = self.adaptive_interval,
                    "interval increased after failure"
                );
            }
        }
    }

    fn push_history(&mut self, item_count: usize, success: bool, error: Option<String>) {
        if self.history.len() >= HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(HistoryEntry {
            at_unix: time::unix(),
            item_count,
            success,
            error,
        });
    }

    /// Score-banded interval recomputation over the history window.
    /// Needs at least two entries; the band factors compound on the
    /// current interval so consecutive strong scores walk it toward the
    /// bound, while the middle band reverts to the configured default.
    fn recompute_interval(&mut self, hour: u32) {
        if self.history.len() < 2 {
            return;
        }

        let mut growth_sum = 0.0;
        for pair in self.history.iter().zip(self.history.iter().skip(1)) {
            let (prev, curr) = pair;
            let dt = (curr.at_unix - prev.at_unix) as f64;
            if dt > 0.0 {
                growth_sum += (curr.item_count as f64 - prev.item_count as f64) / dt;
            }
        }
        self.avg_growth_rate = growth_sum / (self.history.len() - 1) as f64;

        let successes = self.history.iter().filter(|h| h.success).count();
        let history_success_rate = successes as f64 / self.history.len() as f64;

        let score = 0.6 * self.frequency_score + 0.4 * history_success_rate;

        let was = self.adaptive_interval;
        let current = self.adaptive_interval as f64;
        let mut next = if score > 0.8 {
            (current * 0.5).max(self.min_interval as f64)
        } else if score > 0.6 {
            (current * 0.8).max(self.min_interval as f64)
        } else if score > 0.4 {
            self.default_interval as f64
        } else if score > 0.2 {
            (current * 1.2).min(self.max_interval as f64)
        } else {
            (current * 1.5).min(self.max_interval as f64)
        };

        // Daytime runs hotter, nighttime cools down.
        if (DAY_START_HOUR..=DAY_END_HOUR).contains(&hour) {
            next = (next * 0.9).max(self.min_interval as f64);
        } else {
            next = (next * 1.1).min(self.max_interval as f64);
        }

        self.adaptive_interval = (next as i64).clamp(self.min_interval, self.max_interval);

        if self.adaptive_interval != was {
            debug!(
                component = "sched",
                event = "interval_adjusted",
                source_id = %self.source_id,
                score = score,
                from_seconds = was,
                to_seconds = self.adaptive_interval,
                "adaptive interval recomputed"
            );
        }
    }
}
