// HTTP controllers for the admin/status surface.

pub mod cache_status;
pub mod fetch;
pub mod metrics;
pub mod probe;
pub mod proxies;
pub mod status;

pub use cache_status::CacheStatusController;
pub use fetch::FetchController;
pub use metrics::PrometheusMetricsController;
pub use probe::HealthController;
pub use proxies::ProxyController;
pub use status::SchedulerStatusController;
