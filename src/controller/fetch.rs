// Manual fetch triggers: one source or a frequency tier.

use std::sync::Arc;

use axum::extract::{Path, Query};
use axum::{http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde::Deserialize;

use crate::http::Controller;
use crate::orchestrator::{TaskOrchestrator, Tier};

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    #[serde(default)]
    pub force: bool,
}

/// FetchController triggers fetches through the orchestrator.
pub struct FetchController {
    orchestrator: Arc<TaskOrchestrator>,
}

impl FetchController {
    pub fn new(orchestrator: Arc<TaskOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

impl Controller for FetchController {
    fn add_route(&self, router: Router) -> Router {
        let one = self.orchestrator.clone();
        let tier = self.orchestrator.clone();

        router
            .route(
                "/fetch/sources/:source_id",
                post(
                    move |Path(source_id): Path<String>, Query(query): Query<FetchQuery>| {
                        let orchestrator = one.clone();
                        async move {
                            match orchestrator.fetch_one(&source_id, query.force).await {
                                Some(outcome) => Json(outcome).into_response(),
                                None => (
                                    StatusCode::CONFLICT,
                                    "source unknown, already fetching, or not due",
                                )
                                    .into_response(),
                            }
                        }
                    },
                ),
            )
            .route(
                "/fetch/tiers/:tier",
                post(move |Path(raw): Path<String>| {
                    let orchestrator = tier.clone();
                    async move {
                        match Tier::parse(&raw) {
                            Some(tier) => {
                                Json(orchestrator.fetch_tier(tier).await).into_response()
                            }
                            None => (StatusCode::BAD_REQUEST, "unknown tier").into_response(),
                        }
                    }
                }),
            )
    }
}
