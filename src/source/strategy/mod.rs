// Fetch strategies: the kind-specific implementations behind one contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::{SourceDescriptor, StrategyKind};
use crate::http::{RequestError, RequestSpec, ResponseKind};
use crate::http::useragent::UserAgentPool;
use crate::model::NewsItem;

pub mod browser;
pub mod json_api;
pub mod rss;
pub mod web_scrape;

pub use browser::{BrowserDriver, BrowserStrategy, HeadlessChromiumDriver};
pub use json_api::JsonApiStrategy;
pub use rss::RssStrategy;
pub use web_scrape::WebScrapeStrategy;

/// Failure taxonomy for one fetch. The wrapper treats every variant the
/// same way (error protection); the distinction feeds logs and telemetry.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] RequestError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("strategy error: {0}")]
    Strategy(String),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// The strategy-specific primitive: one attempt to pull the current item
/// list from upstream. Strategies normalize items before returning them;
/// caching, protection and metrics belong to the wrapper.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn fetch(&self) -> Result<Vec<NewsItem>, FetchError>;

    /// Releases any long-lived resources (browser sessions, drivers).
    async fn shutdown(&self) {}
}

/// Identity fields every strategy stamps onto its items.
#[derive(Debug, Clone)]
pub struct SourceMeta {
    pub source_id: String,
    pub source_name: String,
    pub category: Option<String>,
    pub country: Option<String>,
    pub language: Option<String>,
}

impl SourceMeta {
    pub fn from_descriptor(descriptor: &SourceDescriptor) -> Self {
        Self {
            source_id: descriptor.source_id.clone(),
            source_name: descriptor.name.clone(),
            category: descriptor.category.clone(),
            country: descriptor.country.clone(),
            language: descriptor.language.clone(),
        }
    }

    /// Applies the source identity and optional defaults to an item.
    pub fn stamp(&self, item: &mut NewsItem) {
        item.source_id = self.source_id.clone();
        item.source_name = self.source_name.clone();
        if item.category.is_none() {
            item.category = self.category.clone();
        }
        if item.country.is_none() {
            item.country = self.country.clone();
        }
        if item.language.is_none() {
            item.language = self.language.clone();
        }
    }
}

/// Per-source network settings resolved out of the descriptor's config
/// bag; turns strategy URLs into ready [`RequestSpec`]s.
pub struct NetProfile {
    headers: Vec<(String, String)>,
    user_agents: Option<UserAgentPool>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    total_timeout: Option<Duration>,
    max_retries: Option<u32>,
    retry_delay: Option<Duration>,
    verify_tls: Option<bool>,
    needs_proxy: bool,
    proxy_group: Option<String>,
    proxy_fallback: bool,
    encoding: Option<String>,
    source_id: String,
}

impl NetProfile {
    pub fn from_descriptor(descriptor: &SourceDescriptor) -> Self {
        let bag = descriptor.bag();
        let pinned_agents = bag.string_list("user_agents");

        Self {
            headers: bag.string_map("headers").into_iter().collect(),
            user_agents: if pinned_agents.is_empty() {
                None
            } else {
                Some(UserAgentPool::new(pinned_agents))
            },
            connect_timeout: descriptor
                .config
                .contains_key("connect_timeout")
                .then(|| bag.secs("connect_timeout", 10)),
            read_timeout: descriptor
                .config
                .contains_key("read_timeout")
                .then(|| bag.secs("read_timeout", 30)),
            total_timeout: descriptor
                .config
                .contains_key("total_timeout")
                .then(|| bag.secs("total_timeout", 60)),
            max_retries: descriptor
                .config
                .contains_key("max_retries")
                .then(|| bag.i64("max_retries", 3) as u32),
            retry_delay: descriptor
                .config
                .contains_key("retry_delay")
                .then(|| bag.secs("retry_delay", 1)),
            verify_tls: descriptor
                .config
                .contains_key("verify_tls")
                .then(|| bag.bool("verify_tls", true)),
            needs_proxy: bag.bool("need_proxy", false),
            proxy_group: bag.str("proxy_group").map(str::to_string),
            proxy_fallback: bag.bool("proxy_fallback", true),
            encoding: bag.str("encoding").map(str::to_string),
            source_id: descriptor.source_id.clone(),
        }
    }

    /// Builds a request for the strategy, carrying the source's network
    /// overrides and proxy hints.
    pub fn request(&self, url: &str, kind: ResponseKind) -> RequestSpec {
        let mut spec = RequestSpec::get(url).kind(kind);
        spec.headers = self.headers.clone();
        spec.connect_timeout = self.connect_timeout;
        spec.read_timeout = self.read_timeout;
        spec.total_timeout = self.total_timeout;
        spec.max_retries = self.max_retries;
        spec.retry_base_delay = self.retry_delay;
        spec.verify_tls = self.verify_tls;
        spec.needs_proxy = self.needs_proxy;
        spec.proxy_group = self.proxy_group.clone();
        spec.proxy_fallback = self.proxy_fallback;
        spec.source_id = Some(self.source_id.clone());
        spec.user_agent = self.user_agents.as_ref().map(|p| p.next().to_string());
        spec.encoding = self.encoding.clone();
        spec
    }
}
