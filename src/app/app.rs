// Main engine application implementation.

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::CacheLayer;
use crate::config::{Config, ConfigTrait};
use crate::controller;
use crate::http::{AdminServer, Controller, HttpClient};
use crate::orchestrator::TaskOrchestrator;
use crate::persist::{MemoryStore, NewsStore};
use crate::proxy::ProxyManager;
use crate::sched::AdaptiveScheduler;
use crate::source::strategy::browser::sweep_orphans;
use crate::source::strategy::{BrowserDriver, HeadlessChromiumDriver};
use crate::source::SourceRegistry;
use crate::telemetry::CacheTelemetry;

/// Encapsulates the engine: proxy pool, HTTP substrate, cache tiers,
/// source registry, scheduler, orchestrator and the admin server.
pub struct App {
    shutdown_token: CancellationToken,
    scheduler: Arc<AdaptiveScheduler>,
    orchestrator: Arc<TaskOrchestrator>,
    server: Arc<AdminServer>,
}

impl App {
    /// Wires every component from configuration. The store defaults to
    /// the in-memory implementation; a relational adapter slots in
    /// through the same trait.
    pub async fn new(shutdown_token: CancellationToken, cfg: Config) -> Result<Self> {
        Self::with_store(shutdown_token, cfg, Arc::new(MemoryStore::new())).await
    }

    pub async fn with_store(
        shutdown_token: CancellationToken,
        cfg: Config,
        store: Arc<dyn NewsStore>,
    ) -> Result<Self> {
        let proxy_manager = ProxyManager::new(cfg.proxy());
        let http = HttpClient::new(cfg.http(), proxy_manager.clone());
        let cache = CacheLayer::connect(cfg.cache()).await;

        let driver = HeadlessChromiumDriver::new(None);
        // Reap browser processes a previous run left behind. The session
        // root is the marker, so unrelated browsers are never touched.
        let session_root = std::env::temp_dir().join("newswire-browser");
        sweep_orphans(driver.process_name_pattern(), Some(&session_root));

        let registry = Arc::new(SourceRegistry::build(
            &cfg,
            http,
            cache,
            driver,
            cfg.scheduler().and_then(|s| s.fetch_timeout),
        )?);

        let scheduler = AdaptiveScheduler::new(
            shutdown_token.clone(),
            cfg.scheduler(),
            registry.clone(),
            store,
        );
        let orchestrator = TaskOrchestrator::new(scheduler.clone());
        let telemetry = CacheTelemetry::new(registry);

        let controllers: Vec<Box<dyn Controller>> = vec![
            Box::new(controller::HealthController::new()),
            Box::new(controller::PrometheusMetricsController::new()),
            Box::new(controller::SchedulerStatusController::new(scheduler.clone())),
            Box::new(controller::CacheStatusController::new(telemetry)),
            Box::new(controller::ProxyController::new(proxy_manager)),
            Box::new(controller::FetchController::new(orchestrator.clone())),
        ];
        let server = AdminServer::new(shutdown_token.clone(), cfg, controllers);

        Ok(Self {
            shutdown_token,
            scheduler,
            orchestrator,
            server,
        })
    }

    /// Starts the scheduler loop and the admin server; returns once both
    /// background tasks are launched.
    pub async fn serve(&self, gsh: Arc<crate::shutdown::GracefulShutdown>) -> Result<()> {
        let scheduler = self.scheduler.clone();
        let orchestrator = self.orchestrator.clone();
        let gsh_sched = gsh.clone();
        gsh.add(1);
        tokio::task::spawn(async move {
            scheduler.run().await;
            orchestrator.shutdown().await;
            gsh_sched.done();
        });

        let server = self.server.clone();
        let gsh_server = gsh.clone();
        gsh.add(1);
        tokio::task::spawn(async move {
            if let Err(e) = server.listen_and_serve().await {
                error!(
                    component = "app",
                    scope = "server",
                    event = "serve_failed",
                    error = %e,
                    "admin server failed to serve"
                );
            }
            gsh_server.done();
        });

        info!(component = "app", event = "started", "application lifecycle");
        Ok(())
    }

    /// Cancels everything; the graceful-shutdown handler collects the
    /// registered tasks.
    pub fn close(&self) {
        self.shutdown_token.cancel();
        info!(component = "app", event = "stopped", "application lifecycle");
    }

    pub fn scheduler(&self) -> &Arc<AdaptiveScheduler> {
        &self.scheduler
    }

    pub fn orchestrator(&self) -> &Arc<TaskOrchestrator> {
        &self.orchestrator
    }
}
