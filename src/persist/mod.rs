// Package persist defines the store interface the engine consumes and a
// memory-backed implementation for tests and standalone runs.

pub mod store;

pub use store::{upsert_items, MemoryStore, NewsCreate, NewsRecord, NewsStore, NewsUpdate, UpsertStats};
