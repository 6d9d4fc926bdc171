// Admin/status HTTP server.

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

use crate::config::{Config, ConfigTrait};

/// A controller contributes one route group to the admin router.
pub trait Controller: Send + Sync {
    fn add_route(&self, router: Router) -> Router;
}

/// Admin HTTP server exposing health, scheduler status, cache telemetry
/// and proxy pool state. The news-serving API lives elsewhere; this
/// surface exists for operators.
pub struct AdminServer {
    shutdown_token: CancellationToken,
    config: Config,
    router: Router,
}

impl AdminServer {
    pub fn new(
        shutdown_token: CancellationToken,
        config: Config,
        controllers: Vec<Box<dyn Controller>>,
    ) -> Arc<Self> {
        let mut router = Router::new();
        for controller in &controllers {
            router = controller.add_route(router);
        }
        router = router.layer(TimeoutLayer::new(Duration::from_secs(30)));

        Arc::new(Self {
            shutdown_token,
            config,
            router,
        })
    }

    /// Starts the server (blocking until shutdown).
    pub async fn listen_and_serve(&self) -> Result<()> {
        let api_cfg = self.config.api().context("API configuration is required")?;

        let name = api_cfg.name.as_deref().unwrap_or("newswire");
        let port = api_cfg.port.as_deref().unwrap_or("8030");
        let port = port.trim_start_matches(':');

        let addr: SocketAddr = format!("0.0.0.0:{}", port)
            .parse()
            .context("Failed to parse server address")?;

        info!(
            component = "server",
            event = "started",
            name = name,
            port = port,
            "admin server started"
        );

        let listener = TcpListener::bind(&addr)
            .await
            .context("Failed to bind TCP listener")?;

        let shutdown_token = self.shutdown_token.clone();
        let serve_future =
            axum::serve(listener, self.router.clone()).with_graceful_shutdown(async move {
                shutdown_token.cancelled().await;
            });

        if let Err(e) = serve_future.await {
            error!(
                component = "server",
                event = "listen_and_serve_failed",
                name = name,
                port = port,
                error = %e,
                "admin server failed to listen and serve"
            );
            return Err(e.into());
        }

        info!(
            component = "server",
            event = "stopped",
            name = name,
            port = port,
            "admin server stopped"
        );

        Ok(())
    }
}
