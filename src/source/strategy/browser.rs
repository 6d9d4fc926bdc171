// Browser-automation strategy: acquire / navigate / wait / extract /
// release with a guaranteed release path and orphan-process cleanup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{SourceDescriptor, StrategyKind};
use crate::http::HttpClient;
use crate::model::NewsItem;
use crate::time;

use super::web_scrape::{parse_with_selectors, SelectorMap, WebScrapeStrategy};
use super::{FetchError, FetchStrategy, SourceMeta};

const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_WAIT: Duration = Duration::from_secs(5);
const DEFAULT_SCROLL_PASSES: u32 = 3;
const DEFAULT_BINARY: &str = "chromium";

/// Identity of one ephemeral browser session: a unique working directory
/// and a throwaway debug port. The directory doubles as the marker used
/// to find orphaned processes later.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub work_dir: PathBuf,
    pub debug_port: u16,
    pub headless: bool,
    pub wait: Duration,
}

/// One live browser session.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), FetchError>;
    async fn wait_for_content(&mut self);
    async fn scroll_to_load(&mut self, passes: u32);
    async fn extract(&mut self) -> Result<String, FetchError>;
    async fn release(&mut self);
}

/// Driver seam: acquires sessions and names the process pattern its
/// subprocesses can be recognized by.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn acquire(&self, spec: &SessionSpec) -> Result<Box<dyn BrowserSession>, FetchError>;
    fn process_name_pattern(&self) -> &str;
}

/// Driver backed by a headless Chromium binary. Navigation renders the
/// page with a virtual-time budget and captures the final DOM.
pub struct HeadlessChromiumDriver {
    binary: String,
}

impl HeadlessChromiumDriver {
    pub fn new(binary: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            binary: binary.unwrap_or_else(|| DEFAULT_BINARY.to_string()),
        })
    }
}

#[async_trait]
impl BrowserDriver for HeadlessChromiumDriver {
    async fn acquire(&self, spec: &SessionSpec) -> Result<Box<dyn BrowserSession>, FetchError> {
        tokio::fs::create_dir_all(&spec.work_dir)
            .await
            .map_err(|e| FetchError::Strategy(format!("session workdir: {}", e)))?;
        Ok(Box::new(ChromiumSession {
            binary: self.binary.clone(),
            spec: spec.clone(),
            html: None,
        }))
    }

    fn process_name_pattern(&self) -> &str {
        &self.binary
    }
}

struct ChromiumSession {
    binary: String,
    spec: SessionSpec,
    html: Option<String>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<(), FetchError> {
        let mut command = Command::new(&self.binary);
        if self.spec.headless {
            command.arg("--headless=new");
        }
        command
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--no-first-run")
            .arg(format!("--user-data-dir={}", self.spec.work_dir.display()))
            .arg(format!("--remote-debugging-port={}", self.spec.debug_port))
            .arg(format!(
                "--virtual-time-budget={}",
                self.spec.wait.as_millis()
            ))
            .arg("--dump-dom")
            .arg(url)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| FetchError::Strategy(format!("spawn {}: {}", self.binary, e)))?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| FetchError::Strategy(format!("browser wait: {}", e)))?;

        if !output.status.success() {
            return Err(FetchError::Strategy(format!(
                "browser exited with {}",
                output.status
            )));
        }

        let html = String::from_utf8_lossy(&output.stdout).into_owned();
        if html.trim().is_empty() {
            return Err(FetchError::Strategy("browser produced an empty DOM".into()));
        }
        self.html = Some(html);
        Ok(())
    }

    async fn wait_for_content(&mut self) {
        // Rendering already consumed the virtual-time budget in navigate.
        debug!(
            component = "browser",
            event = "wait_elapsed",
            wait_ms = self.spec.wait.as_millis() as u64,
            "content wait folded into navigation"
        );
    }

    async fn scroll_to_load(&mut self, passes: u32) {
        // DOM-dump sessions cannot scroll after the fact; the virtual-time
        // budget stands in for the lazy-load window.
        debug!(
            component = "browser",
            event = "scroll_skipped",
            passes = passes,
            "scroll heuristic not applicable to dom-dump session"
        );
    }

    async fn extract(&mut self) -> Result<String, FetchError> {
        self.html
            .take()
            .ok_or_else(|| FetchError::Strategy("extract before successful navigation".into()))
    }

    async fn release(&mut self) {
        self.html = None;
        if let Err(e) = tokio::fs::remove_dir_all(&self.spec.work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    component = "browser",
                    event = "workdir_cleanup_failed",
                    work_dir = %self.spec.work_dir.display(),
                    error = %e,
                    "failed to remove session workdir"
                );
            }
        }
    }
}

/// Browser-backed strategy. Every fetch runs a fresh session under a hard
/// total timeout; release runs on all exit paths, and timeouts trigger a
/// targeted orphan sweep keyed on the session's working directory.
pub struct BrowserStrategy {
    meta: SourceMeta,
    driver: Arc<dyn BrowserDriver>,
    url: String,
    selectors: SelectorMap,
    headless: bool,
    wait: Duration,
    total_timeout: Duration,
    scroll_passes: u32,
    work_root: PathBuf,
    fallback: Option<WebScrapeStrategy>,
}

impl BrowserStrategy {
    pub fn new(
        descriptor: &SourceDescriptor,
        http: Arc<HttpClient>,
        driver: Arc<dyn BrowserDriver>,
    ) -> Result<Self, FetchError> {
        let bag = descriptor.bag();
        let url = descriptor
            .url
            .clone()
            .ok_or_else(|| FetchError::Strategy("browser source requires a url".into()))?;
        let selectors = SelectorMap::from_descriptor(descriptor)?;

        let fallback = if bag.bool("use_http_fallback", false) {
            Some(WebScrapeStrategy::new(
                descriptor,
                StrategyKind::WebScrape,
                http,
            )?)
        } else {
            None
        };

        let work_root = bag
            .str("browser_work_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("newswire-browser"));

        Ok(Self {
            meta: SourceMeta::from_descriptor(descriptor),
            driver,
            url,
            selectors,
            headless: bag.bool("headless", true),
            wait: bag.secs("selenium_wait_time", DEFAULT_WAIT.as_secs()),
            total_timeout: bag.secs("selenium_timeout", DEFAULT_TOTAL_TIMEOUT.as_secs()),
            scroll_passes: bag.i64("scroll_passes", DEFAULT_SCROLL_PASSES as i64) as u32,
            work_root,
            fallback,
        })
    }

    fn session_spec(&self) -> SessionSpec {
        let mut rng = rand::thread_rng();
        let dir = format!(
            "session-{}-{:08x}",
            time::unix_millis(),
            rng.gen::<u32>()
        );
        SessionSpec {
            work_dir: self.work_root.join(dir),
            debug_port: rng.gen_range(9300..9900),
            headless: self.headless,
            wait: self.wait,
        }
    }

    async fn run_session(&self, spec: &SessionSpec) -> Result<Vec<NewsItem>, FetchError> {
        let mut session = self.driver.acquire(spec).await?;
        let html = {
            let result = self.drive(session.as_mut()).await;
            session.release().await;
            result?
        };
        parse_with_selectors(&html, &self.selectors, &self.url, &self.meta)
    }

    async fn drive(&self, session: &mut dyn BrowserSession) -> Result<String, FetchError> {
        session.navigate(&self.url).await?;
        session.wait_for_content().await;
        session.scroll_to_load(self.scroll_passes).await;
        session.extract().await
    }
}

#[async_trait]
impl FetchStrategy for BrowserStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BrowserAutomated
    }

    async fn fetch(&self) -> Result<Vec<NewsItem>, FetchError> {
        let spec = self.session_spec();

        let outcome = tokio::time::timeout(self.total_timeout, self.run_session(&spec)).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                // The session future was dropped mid-flight; make sure its
                // subprocess tree does not outlive it.
                sweep_orphans(self.driver.process_name_pattern(), Some(&spec.work_dir));
                let _ = std::fs::remove_dir_all(&spec.work_dir);
                Err(FetchError::Timeout(self.total_timeout))
            }
        };

        match result {
            Ok(items) => Ok(items),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        component = "browser",
                        event = "http_fallback",
                        source_id = %self.meta.source_id,
                        error = %e,
                        "browser fetch failed, retrying over plain http"
                    );
                    fallback.fetch().await
                }
                None => Err(e),
            },
        }
    }

    async fn shutdown(&self) {
        sweep_orphans(self.driver.process_name_pattern(), Some(&self.work_root));
        let _ = std::fs::remove_dir_all(&self.work_root);
    }
}

/// Terminates processes matching the browser name pattern whose command
/// line references the marker path. Used on shutdown and after per-fetch
/// timeouts to reap drivers that escaped their session.
pub fn sweep_orphans(name_pattern: &str, marker: Option<&Path>) {
    let refresh = RefreshKind::new().with_processes(ProcessRefreshKind::new());
    let system = System::new_with_specifics(refresh);
    let marker_str = marker.map(|p| p.display().to_string());

    let mut killed = 0usize;
    for process in system.processes().values() {
        if !process.name().contains(name_pattern) {
            continue;
        }
        let cmdline = process.cmd().join(" ");
        if let Some(marker) = &marker_str {
            if !cmdline.contains(marker.as_str()) {
                continue;
            }
        }
        if process.kill() {
            killed += 1;
        }
    }

    if killed > 0 {
        info!(
            component = "browser",
            event = "orphans_swept",
            pattern = name_pattern,
            killed = killed,
            "terminated orphaned browser processes"
        );
    }
}
