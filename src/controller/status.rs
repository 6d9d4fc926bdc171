// Scheduler status controller.

use std::sync::Arc;

use axum::{response::IntoResponse, routing::get, Json, Router};

use crate::http::Controller;
use crate::sched::AdaptiveScheduler;

/// SchedulerStatusController exposes per-source scheduling state.
pub struct SchedulerStatusController {
    scheduler: Arc<AdaptiveScheduler>,
}

impl SchedulerStatusController {
    pub fn new(scheduler: Arc<AdaptiveScheduler>) -> Self {
        Self { scheduler }
    }
}

impl Controller for SchedulerStatusController {
    fn add_route(&self, router: Router) -> Router {
        let scheduler = self.scheduler.clone();
        router.route(
            "/status",
            get(move || {
                let scheduler = scheduler.clone();
                async move { Json(scheduler.status()).into_response() }
            }),
        )
    }
}
