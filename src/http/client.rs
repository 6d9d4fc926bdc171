// Resilient HTTP substrate: retries with backoff, UA rotation, proxy
// selection and strict timeout discipline for every fetch strategy.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::Http as HttpCfg;
use crate::proxy::ProxyManager;

use super::useragent::UserAgentPool;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Origins that are unreachable without a proxy from the default vantage
/// point. A URL whose host matches implies `needs_proxy` regardless of the
/// per-source configuration.
pub const PROXIED_DOMAINS: [&str; 8] = [
    "github.com",
    "bloomberg.com",
    "ft.com",
    "bbc.co.uk",
    "ycombinator.com",
    "reuters.com",
    "v2ex.com",
    "producthunt.com",
];

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("http status {0}")]
    Status(u16),
    #[error("malformed payload: {0}")]
    Protocol(String),
    #[error("proxy failure via {proxy_id}: {message}")]
    Proxy { proxy_id: String, message: String },
}

impl RequestError {
    /// Transport failures, timeouts, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::Transport(_) | RequestError::Timeout(_) => true,
            RequestError::Status(code) => *code == 429 || *code >= 500,
            RequestError::Protocol(_) => false,
            RequestError::Proxy { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Text,
    Json,
    Bytes,
}

#[derive(Debug)]
pub enum ResponseBody {
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub body: ResponseBody,
}

impl Response {
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn json(&self) -> Option<&serde_json::Value> {
        match &self.body {
            ResponseBody::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.body {
            ResponseBody::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// One outbound request. Strategy code fills the fields it cares about and
/// leaves the rest to the engine-wide defaults.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub json_body: Option<serde_json::Value>,
    pub kind: ResponseKind,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub total_timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub retry_base_delay: Option<Duration>,
    pub verify_tls: Option<bool>,
    /// Explicit proxy URL; bypasses the proxy manager entirely.
    pub proxy_url: Option<String>,
    pub needs_proxy: bool,
    pub proxy_group: Option<String>,
    pub proxy_fallback: bool,
    pub source_id: Option<String>,
    pub user_agent: Option<String>,
    /// Charset hint for TEXT responses from legacy origins.
    pub encoding: Option<String>,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            json_body: None,
            kind: ResponseKind::Text,
            connect_timeout: None,
            read_timeout: None,
            total_timeout: None,
            max_retries: None,
            retry_base_delay: None,
            verify_tls: None,
            proxy_url: None,
            needs_proxy: false,
            proxy_group: None,
            proxy_fallback: true,
            source_id: None,
            user_agent: None,
            encoding: None,
        }
    }

    pub fn kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }
}

struct Defaults {
    max_retries: u32,
    retry_base_delay: Duration,
    connect_timeout: Duration,
    read_timeout: Duration,
    total_timeout: Duration,
    verify_tls: bool,
    proxied_domains: Vec<String>,
}

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Shared HTTP substrate.
///
/// Holds one `reqwest::Client` per (proxy, verify_tls) pair so connection
/// pools are reused but never shared across incompatible proxy settings.
pub struct HttpClient {
    defaults: Defaults,
    proxy_manager: Arc<ProxyManager>,
    user_agents: UserAgentPool,
    rate: Option<Arc<DirectRateLimiter>>,
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl HttpClient {
    pub fn new(cfg: Option<&HttpCfg>, proxy_manager: Arc<ProxyManager>) -> Arc<Self> {
        let defaults = Defaults {
            max_retries: cfg.and_then(|c| c.max_retries).unwrap_or(DEFAULT_MAX_RETRIES),
            retry_base_delay: cfg
                .and_then(|c| c.retry_base_delay)
                .unwrap_or(DEFAULT_RETRY_BASE_DELAY),
            connect_timeout: cfg
                .and_then(|c| c.connect_timeout)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: cfg
                .and_then(|c| c.read_timeout)
                .unwrap_or(DEFAULT_READ_TIMEOUT),
            total_timeout: cfg
                .and_then(|c| c.total_timeout)
                .unwrap_or(DEFAULT_TOTAL_TIMEOUT),
            verify_tls: cfg.and_then(|c| c.verify_tls).unwrap_or(true),
            proxied_domains: {
                let configured = cfg.map(|c| c.proxied_domains.clone()).unwrap_or_default();
                if configured.is_empty() {
                    PROXIED_DOMAINS.iter().map(|s| s.to_string()).collect()
                } else {
                    configured
                }
            },
        };

        let rate = cfg.and_then(|c| c.rate).filter(|r| *r > 0).map(|r| {
            let quota = Quota::per_second(NonZeroU32::new(r as u32).unwrap());
            Arc::new(RateLimiter::direct(quota))
        });

        Arc::new(Self {
            defaults,
            proxy_manager,
            user_agents: UserAgentPool::builtin(),
            rate,
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// True when the URL's host sits behind the geo-restricted allowlist.
    pub fn host_implies_proxy(&self, url: &str) -> bool {
        let host = match url::Url::parse(url) {
            Ok(u) => match u.host_str() {
                Some(h) => h.to_ascii_lowercase(),
                None => return false,
            },
            Err(_) => return false,
        };
        self.defaults
            .proxied_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
    }

    /// Executes the request with retries, UA rotation and the proxy
    /// decision rule. Each attempt reports proxied outcomes back to the
    /// proxy manager; with `proxy_fallback` the attempts after a proxy
    /// failure go direct.
    pub async fn request(&self, spec: &RequestSpec) -> Result<Response, RequestError> {
        let max_attempts = spec
            .max_retries
            .unwrap_or(self.defaults.max_retries)
            .max(1);
        let base_delay = spec
            .retry_base_delay
            .unwrap_or(self.defaults.retry_base_delay);

        let mut use_proxy = spec.needs_proxy
            || spec.proxy_url.is_some()
            || self.host_implies_proxy(&spec.url);

        let mut last_err: Option<RequestError> = None;

        for attempt in 1..=max_attempts {
            if let Some(rate) = &self.rate {
                rate.until_ready().await;
            }

            // Resolve the proxy for this attempt. A missing candidate in
            // the requested group degrades to a direct request.
            let mut proxy_id: Option<String> = None;
            let mut proxy_url: Option<String> = None;
            if use_proxy {
                if let Some(explicit) = &spec.proxy_url {
                    proxy_url = Some(explicit.clone());
                } else {
                    let group = spec.proxy_group.as_deref().unwrap_or("default");
                    match self
                        .proxy_manager
                        .get(spec.source_id.as_deref(), group)
                        .await
                    {
                        Some(record) => {
                            proxy_id = Some(record.id.clone());
                            proxy_url = Some(record.proxy_url());
                        }
                        None => {
                            warn!(
                                component = "http",
                                event = "proxy_unavailable",
                                url = %spec.url,
                                group = group,
                                "proxy required but none available, going direct"
                            );
                            use_proxy = false;
                        }
                    }
                }
            }

            let started = Instant::now();
            let result = self
                .execute_once(spec, proxy_url.as_deref())
                .await;
            let elapsed = started.elapsed().as_secs_f64();

            if let Some(id) = &proxy_id {
                self.proxy_manager
                    .report(id, result.is_ok(), result.is_ok().then_some(elapsed))
                    .await;
            }

            match result {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let proxied = proxy_url.is_some();
                    debug!(
                        component = "http",
                        event = "attempt_failed",
                        url = %spec.url,
                        attempt = attempt,
                        proxied = proxied,
                        error = %err,
                        "request attempt failed"
                    );

                    if proxied && spec.proxy_fallback {
                        // One recovery path through a direct connection.
                        use_proxy = false;
                    } else if !err.is_retryable() {
                        return Err(err);
                    }

                    last_err = Some(err);
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff_delay(base_delay, attempt)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| RequestError::Transport("no attempts made".into())))
    }

    /// Runs many GET requests under a concurrency cap. Individual failures
    /// stay individual: the batch itself never fails.
    pub async fn batch(
        self: &Arc<Self>,
        specs: Vec<RequestSpec>,
        concurrency: usize,
    ) -> Vec<Result<Response, RequestError>> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));
        let futures = specs.into_iter().map(|spec| {
            let semaphore = semaphore.clone();
            let client = self.clone();
            async move {
                let _permit = semaphore.acquire().await;
                client.request(&spec).await
            }
        });
        futures::future::join_all(futures).await
    }

    async fn execute_once(
        &self,
        spec: &RequestSpec,
        proxy_url: Option<&str>,
    ) -> Result<Response, RequestError> {
        let verify_tls = spec.verify_tls.unwrap_or(self.defaults.verify_tls);
        let connect_timeout = spec.connect_timeout.unwrap_or(self.defaults.connect_timeout);
        let read_timeout = spec.read_timeout.unwrap_or(self.defaults.read_timeout);
        let client = self.client_for(proxy_url, verify_tls, connect_timeout, read_timeout)?;

        let total_timeout = spec.total_timeout.unwrap_or(self.defaults.total_timeout);
        let mut request = client
            .request(spec.method.clone(), &spec.url)
            .timeout(total_timeout);

        if !spec.query.is_empty() {
            request = request.query(&spec.query);
        }
        for (name, value) in &spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let user_agent = spec
            .user_agent
            .clone()
            .unwrap_or_else(|| self.user_agents.next().to_string());
        request = request.header(reqwest::header::USER_AGENT, user_agent);
        if let Some(body) = &spec.json_body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RequestError::Timeout(total_timeout)
            } else if let Some(id) = proxy_url {
                RequestError::Proxy {
                    proxy_id: id.to_string(),
                    message: e.to_string(),
                }
            } else {
                RequestError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(RequestError::Status(status));
        }

        let raw = response
            .bytes()
            .await
            .map_err(|e| RequestError::Transport(format!("read body: {}", e)))?;

        let body = match spec.kind {
            ResponseKind::Bytes => ResponseBody::Bytes(raw.to_vec()),
            ResponseKind::Text => ResponseBody::Text(crate::source::normalize::decode_text(
                &raw,
                spec.encoding.as_deref(),
            )),
            ResponseKind::Json => {
                let value: serde_json::Value = serde_json::from_slice(&raw)
                    .map_err(|e| RequestError::Protocol(format!("malformed json: {}", e)))?;
                ResponseBody::Json(value)
            }
        };

        Ok(Response { status, body })
    }

    /// Returns a pooled client for the proxy/TLS combination, building it
    /// on first use. Sessions are never shared across different proxy
    /// settings.
    fn client_for(
        &self,
        proxy_url: Option<&str>,
        verify_tls: bool,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<reqwest::Client, RequestError> {
        let key = format!(
            "{}|{}|{}|{}",
            proxy_url.unwrap_or(""),
            verify_tls,
            connect_timeout.as_millis(),
            read_timeout.as_millis()
        );
        let mut clients = self.clients.lock();
        if let Some(existing) = clients.get(&key) {
            return Ok(existing.clone());
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .gzip(true);

        if let Some(raw) = proxy_url {
            let proxy = reqwest::Proxy::all(raw).map_err(|e| RequestError::Proxy {
                proxy_id: raw.to_string(),
                message: format!("invalid proxy url: {}", e),
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| RequestError::Transport(format!("client build: {}", e)))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

/// Exponential backoff with jitter: `base * 2^(attempt-1) * rand(0.5, 1.5)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1)) as f64;
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(base.as_secs_f64() * factor * jitter)
}
