// Package orchestrator groups sources into frequency tiers and triggers
// the scheduler.

pub mod tiers;

#[cfg(test)]
mod tiers_test;

pub use tiers::{BatchResult, TaskOrchestrator, Tier};
