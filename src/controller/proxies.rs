// Proxy pool controller: snapshot plus health-check and refresh triggers.

use std::sync::Arc;

use axum::extract::Path;
use axum::{http::StatusCode, response::IntoResponse, routing::get, routing::post, Json, Router};

use crate::http::Controller;
use crate::proxy::ProxyManager;

/// ProxyController exposes proxy pool state and maintenance triggers.
pub struct ProxyController {
    manager: Arc<ProxyManager>,
}

impl ProxyController {
    pub fn new(manager: Arc<ProxyManager>) -> Self {
        Self { manager }
    }
}

impl Controller for ProxyController {
    fn add_route(&self, router: Router) -> Router {
        let snapshot = self.manager.clone();
        let check_all = self.manager.clone();
        let check_one = self.manager.clone();
        let refresh = self.manager.clone();
        let remove = self.manager.clone();

        router
            .route(
                "/proxies",
                get(move || {
                    let manager = snapshot.clone();
                    async move { Json(manager.snapshot().await).into_response() }
                }),
            )
            .route(
                "/proxies/health-check",
                post(move || {
                    let manager = check_all.clone();
                    async move {
                        manager.health_check(None).await;
                        Json(manager.snapshot().await).into_response()
                    }
                }),
            )
            .route(
                "/proxies/:proxy_id/health-check",
                post(move |Path(proxy_id): Path<String>| {
                    let manager = check_one.clone();
                    async move {
                        manager.health_check(Some(&proxy_id)).await;
                        Json(manager.snapshot().await).into_response()
                    }
                }),
            )
            .route(
                "/proxies/refresh",
                post(move || {
                    let manager = refresh.clone();
                    async move {
                        manager.refresh().await;
                        Json(manager.snapshot().await).into_response()
                    }
                }),
            )
            .route(
                "/proxies/:proxy_id",
                axum::routing::delete(move |Path(proxy_id): Path<String>| {
                    let manager = remove.clone();
                    async move {
                        if manager.remove(&proxy_id).await {
                            StatusCode::NO_CONTENT.into_response()
                        } else {
                            (StatusCode::NOT_FOUND, "unknown proxy").into_response()
                        }
                    }
                }),
            )
    }
}
