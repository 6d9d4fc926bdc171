// Package proxy provides the process-wide proxy pool with health accounting.

pub mod manager;

#[cfg(test)]
mod manager_test;

pub use manager::{ProxyManager, ProxyRecord, ProxyStatus};
