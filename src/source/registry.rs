// Source provider: materializes cache-wrapped source instances from the
// configuration table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::cache::CacheLayer;
use crate::config::{Config, ConfigTrait, SourceDescriptor, StrategyKind};
use crate::http::HttpClient;
use crate::metrics::meter;

use super::strategy::{
    BrowserDriver, BrowserStrategy, FetchStrategy, JsonApiStrategy, RssStrategy,
    WebScrapeStrategy,
};
use super::wrapper::CachedSource;

/// Explicit registration map built at startup: `source_id` to its wrapped
/// instance. Read-mostly; rebuilds are whole-registry swaps.
pub struct SourceRegistry {
    sources: HashMap<String, Arc<CachedSource>>,
}

impl SourceRegistry {
    /// Builds every enabled source from configuration. Unknown kinds and
    /// broken descriptors are logged and skipped; a duplicate id is a
    /// hard error (configuration hygiene, enforced loudly).
    pub fn build(
        cfg: &Config,
        http: Arc<HttpClient>,
        cache: Arc<CacheLayer>,
        driver: Arc<dyn BrowserDriver>,
        fetch_timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut sources: HashMap<String, Arc<CachedSource>> = HashMap::new();

        for descriptor in cfg.sources() {
            if !descriptor.is_enabled() {
                info!(
                    component = "registry",
                    event = "source_disabled",
                    source_id = %descriptor.source_id,
                    "skipping disabled source"
                );
                continue;
            }

            let strategy = match Self::make_strategy(descriptor, &http, &driver) {
                Ok(strategy) => strategy,
                Err(e) => {
                    warn!(
                        component = "registry",
                        event = "source_skipped",
                        source_id = %descriptor.source_id,
                        kind = %descriptor.kind,
                        error = %e,
                        "source could not be materialized"
                    );
                    continue;
                }
            };

            let wrapped = CachedSource::new(
                Arc::new(descriptor.clone()),
                strategy,
                cache.clone(),
                fetch_timeout,
            );
            if sources
                .insert(descriptor.source_id.clone(), wrapped)
                .is_some()
            {
                anyhow::bail!("duplicate source_id: {}", descriptor.source_id);
            }
        }

        info!(
            component = "registry",
            event = "built",
            sources = sources.len(),
            "source registry built"
        );
        meter::set_sources_registered(sources.len() as u64);

        Ok(Self { sources })
    }

    fn make_strategy(
        descriptor: &SourceDescriptor,
        http: &Arc<HttpClient>,
        driver: &Arc<dyn BrowserDriver>,
    ) -> Result<Box<dyn FetchStrategy>, String> {
        let kind = descriptor
            .parse_kind()
            .ok_or_else(|| format!("unknown source kind: {}", descriptor.kind))?;

        let strategy: Box<dyn FetchStrategy> = match kind {
            StrategyKind::JsonApi => Box::new(
                JsonApiStrategy::new(descriptor, http.clone()).map_err(|e| e.to_string())?,
            ),
            StrategyKind::WebScrape | StrategyKind::CustomSelectors => Box::new(
                WebScrapeStrategy::new(descriptor, kind, http.clone())
                    .map_err(|e| e.to_string())?,
            ),
            StrategyKind::Rss => {
                Box::new(RssStrategy::new(descriptor, http.clone()).map_err(|e| e.to_string())?)
            }
            StrategyKind::BrowserAutomated => Box::new(
                BrowserStrategy::new(descriptor, http.clone(), driver.clone())
                    .map_err(|e| e.to_string())?,
            ),
        };
        Ok(strategy)
    }

    /// Registry for a hand-built set of sources (tests, embedding).
    pub fn from_sources(sources: Vec<Arc<CachedSource>>) -> Self {
        let sources = sources
            .into_iter()
            .map(|s| (s.source_id().to_string(), s))
            .collect();
        Self { sources }
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<CachedSource>> {
        self.sources.get(source_id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<CachedSource>> {
        let mut all: Vec<Arc<CachedSource>> = self.sources.values().cloned().collect();
        all.sort_by(|a, b| a.source_id().cmp(b.source_id()));
        all
    }

    pub fn by_category(&self, category: &str) -> Vec<Arc<CachedSource>> {
        self.all()
            .into_iter()
            .filter(|s| s.descriptor().category.as_deref() == Some(category))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
