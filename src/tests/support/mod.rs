// Shared fixtures for the end-to-end scenarios.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheLayer;
use crate::config::{new_test_config, test_descriptor, ConfigTrait, StrategyKind};
use crate::model::NewsItem;
use crate::persist::MemoryStore;
use crate::sched::AdaptiveScheduler;
use crate::source::strategy::{FetchError, FetchStrategy};
use crate::source::{CachedSource, SourceRegistry};

/// Builds items with ids stable across calls (fresh published timestamps,
/// identity derived from the URL alone).
pub fn make_items(source_id: &str, count: usize) -> Vec<NewsItem> {
    let published = Local::now() - ChronoDuration::seconds(120);
    (0..count)
        .map(|i| {
            let url = format!("https://example.com/{}/{}", source_id, i);
            let title = format!("{} 新闻 {}", source_id, i);
            let id = NewsItem::derive_id(source_id, &url, None, None);
            NewsItem::new(
                id,
                title,
                url,
                source_id.to_string(),
                format!("{} 测试源", source_id),
                published,
            )
        })
        .collect()
}

/// One scripted fetch outcome.
pub enum Script {
    Items(Vec<NewsItem>),
    Fail(String),
}

/// Strategy that plays back a queue of scripted outcomes; the queue's
/// last entry repeats once drained.
pub struct ScriptedStrategy {
    steps: Mutex<VecDeque<Script>>,
    pub calls: AtomicU64,
}

impl ScriptedStrategy {
    pub fn new(steps: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicU64::new(0),
        })
    }
}

pub struct SharedScripted(pub Arc<ScriptedStrategy>);

#[async_trait]
impl FetchStrategy for SharedScripted {
    fn kind(&self) -> StrategyKind {
        StrategyKind::JsonApi
    }

    async fn fetch(&self) -> Result<Vec<NewsItem>, FetchError> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        let mut steps = self.0.steps.lock();
        let step = if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().map(|s| match s {
                Script::Items(items) => Script::Items(items.clone()),
                Script::Fail(message) => Script::Fail(message.clone()),
            })
        };
        match step {
            Some(Script::Items(items)) => Ok(items),
            Some(Script::Fail(message)) => Err(FetchError::Strategy(message)),
            None => Ok(Vec::new()),
        }
    }
}

/// Wraps a scripted strategy into a cache-enhanced source.
/// `update_interval` zero keeps the source always due for the scheduler.
pub fn scripted_source(
    source_id: &str,
    update_interval: Duration,
    cache_ttl: Duration,
    steps: Vec<Script>,
) -> (Arc<CachedSource>, Arc<ScriptedStrategy>) {
    let strategy = ScriptedStrategy::new(steps);
    let mut descriptor = test_descriptor(source_id, "json_api", update_interval);
    descriptor.cache_ttl = Some(cache_ttl);
    // The adaptive floor would otherwise widen a zero interval.
    descriptor
        .config
        .insert("enable_adaptive".to_string(), serde_json::json!(false));
    let source = CachedSource::new(
        Arc::new(descriptor),
        Box::new(SharedScripted(strategy.clone())),
        CacheLayer::memory_only(),
        Some(Duration::from_secs(5)),
    );
    source.skip_hydration();
    (source, strategy)
}

/// Scheduler over hand-built sources with a fresh memory store.
pub fn engine_with(
    sources: Vec<Arc<CachedSource>>,
) -> (Arc<AdaptiveScheduler>, Arc<SourceRegistry>, Arc<MemoryStore>) {
    let cfg = new_test_config();
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(SourceRegistry::from_sources(sources));
    let scheduler = AdaptiveScheduler::new(
        CancellationToken::new(),
        cfg.scheduler(),
        registry.clone(),
        store.clone(),
    );
    (scheduler, registry, store)
}

/// Minimal HTTP stub: answers every request on a loopback port with the
/// given body and counts the requests it served.
pub struct StubServer {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicU64>,
}

impl StubServer {
    pub async fn spawn(content_type: &'static str, body: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        let hits = Arc::new(AtomicU64::new(0));
        let hits_clone = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                hits_clone.fetch_add(1, Ordering::SeqCst);
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buffer = [0u8; 4096];
                    let _ = socket.read(&mut buffer).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        content_type,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }
}
