// Package sched provides the adaptive scheduler that decides when each
// source is fetched.

pub mod scheduler;
pub mod state;

#[cfg(test)]
mod scheduler_test;
#[cfg(test)]
mod state_test;

pub use scheduler::{AdaptiveScheduler, FetchOutcome, SourceStatus};
pub use state::SourceRuntimeState;
