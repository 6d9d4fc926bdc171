// Package source provides the per-source fetch contract, its strategies
// and the cache-protection wrapper.

pub mod dates;
pub mod normalize;
pub mod registry;
pub mod strategy;
pub mod wrapper;

#[cfg(test)]
mod dates_test;

pub use registry::SourceRegistry;
pub use strategy::{FetchError, FetchStrategy};
pub use wrapper::CachedSource;
