// Cache telemetry controllers: per-source detail and the global rollup.

use std::sync::Arc;

use axum::extract::Path;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};

use crate::http::Controller;
use crate::telemetry::CacheTelemetry;

/// CacheStatusController serves cache-protection telemetry snapshots.
pub struct CacheStatusController {
    telemetry: Arc<CacheTelemetry>,
}

impl CacheStatusController {
    pub fn new(telemetry: Arc<CacheTelemetry>) -> Self {
        Self { telemetry }
    }
}

impl Controller for CacheStatusController {
    fn add_route(&self, router: Router) -> Router {
        let global = self.telemetry.clone();
        let list = self.telemetry.clone();
        let detail = self.telemetry.clone();

        router
            .route(
                "/cache/status",
                get(move || {
                    let telemetry = global.clone();
                    async move { Json(telemetry.global_status()).into_response() }
                }),
            )
            .route(
                "/cache/status/sources",
                get(move || {
                    let telemetry = list.clone();
                    async move { Json(telemetry.all_statuses()).into_response() }
                }),
            )
            .route(
                "/cache/status/sources/:source_id",
                get(move |Path(source_id): Path<String>| {
                    let telemetry = detail.clone();
                    async move {
                        match telemetry.source_status(&source_id) {
                            Some(status) => Json(status).into_response(),
                            None => (StatusCode::NOT_FOUND, "unknown source").into_response(),
                        }
                    }
                }),
            )
    }
}
