// Health probe controller.

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};

use crate::http::Controller;

const SUCCESS_RESPONSE: &str = r#"{
  "status": 200,
  "message": "ok"
}"#;

/// HealthController answers liveness checks for the engine process.
pub struct HealthController;

impl HealthController {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HealthController {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller for HealthController {
    fn add_route(&self, router: Router) -> Router {
        router.route(
            "/healthz",
            get(|| async { (StatusCode::OK, SUCCESS_RESPONSE).into_response() }),
        )
    }
}
