// Configuration loading and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

pub const PROD: &str = "prod";
#[allow(dead_code)]
pub const DEV: &str = "dev";
#[allow(dead_code)]
pub const TEST: &str = "test";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Engine {
    #[serde(rename = "engine")]
    pub engine: EngineBox,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineBox {
    pub env: String,
    pub logs: Option<Logs>,
    pub runtime: Option<Runtime>,
    pub api: Option<Api>,
    pub http: Option<Http>,
    pub cache: Option<CacheCfg>,
    pub proxy: Option<ProxyCfg>,
    pub scheduler: Option<SchedulerCfg>,
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logs {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Runtime {
    pub num_cpus: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Api {
    pub name: Option<String>,
    pub port: Option<String>,
}

/// Outbound HTTP substrate settings shared by every source.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Http {
    /// Outbound requests per second across the whole engine.
    pub rate: Option<usize>,
    #[serde(rename = "max_retries")]
    pub max_retries: Option<u32>,
    #[serde(rename = "retry_base_delay", with = "humantime_serde", default)]
    pub retry_base_delay: Option<Duration>,
    #[serde(rename = "connect_timeout", with = "humantime_serde", default)]
    pub connect_timeout: Option<Duration>,
    #[serde(rename = "read_timeout", with = "humantime_serde", default)]
    pub read_timeout: Option<Duration>,
    #[serde(rename = "total_timeout", with = "humantime_serde", default)]
    pub total_timeout: Option<Duration>,
    #[serde(rename = "verify_tls")]
    pub verify_tls: Option<bool>,
    /// Hosts for which proxying is implied regardless of per-source config.
    #[serde(rename = "proxied_domains", default)]
    pub proxied_domains: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheCfg {
    #[serde(rename = "redis_url")]
    pub redis_url: Option<String>,
    #[serde(rename = "default_ttl", with = "humantime_serde", default)]
    pub default_ttl: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyCfg {
    #[serde(rename = "refresh_interval", with = "humantime_serde", default)]
    pub refresh_interval: Option<Duration>,
    #[serde(rename = "health_url")]
    pub health_url: Option<String>,
    #[serde(default)]
    pub seeds: Vec<ProxySeed>,
}

/// One statically configured proxy pool entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxySeed {
    pub id: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub group: Option<String>,
    pub priority: Option<i32>,
    #[serde(rename = "health_url")]
    pub health_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerCfg {
    #[serde(rename = "check_interval", with = "humantime_serde", default)]
    pub check_interval: Option<Duration>,
    pub concurrency: Option<usize>,
    #[serde(rename = "fetch_timeout", with = "humantime_serde", default)]
    pub fetch_timeout: Option<Duration>,
    #[serde(rename = "grace_period", with = "humantime_serde", default)]
    pub grace_period: Option<Duration>,
    #[serde(rename = "enable_adaptive")]
    pub enable_adaptive: Option<bool>,
}

/// Immutable configuration record for one news source.
///
/// The typed fields mirror the source table; everything strategy- or
/// network-specific lives in the free-form `config` bag, whose recognized
/// keys are read through [`SourceBag`]. Unknown keys are preserved.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceDescriptor {
    #[serde(rename = "source_id")]
    pub source_id: String,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub kind: String,
    pub category: Option<String>,
    pub country: Option<String>,
    pub language: Option<String>,
    #[serde(rename = "update_interval", with = "humantime_serde", default)]
    pub update_interval: Option<Duration>,
    #[serde(rename = "cache_ttl", with = "humantime_serde", default)]
    pub cache_ttl: Option<Duration>,
    pub priority: Option<i32>,
    pub status: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

/// Strategy discriminator parsed out of `SourceDescriptor::kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    JsonApi,
    WebScrape,
    Rss,
    BrowserAutomated,
    CustomSelectors,
}

impl SourceDescriptor {
    pub fn parse_kind(&self) -> Option<StrategyKind> {
        match self.kind.as_str() {
            "json_api" => Some(StrategyKind::JsonApi),
            "web_scrape" => Some(StrategyKind::WebScrape),
            "rss" => Some(StrategyKind::Rss),
            "browser_automated" => Some(StrategyKind::BrowserAutomated),
            "custom_selectors" => Some(StrategyKind::CustomSelectors),
            _ => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self.status.as_deref() {
            None => true,
            Some(s) => s.eq_ignore_ascii_case("active"),
        }
    }

    pub fn update_interval_secs(&self) -> i64 {
        self.update_interval
            .map(|d| d.as_secs() as i64)
            .unwrap_or(1800)
    }

    pub fn cache_ttl_secs(&self) -> i64 {
        self.cache_ttl.map(|d| d.as_secs() as i64).unwrap_or(900)
    }

    pub fn bag(&self) -> SourceBag<'_> {
        SourceBag { map: &self.config }
    }
}

/// Typed reader over the free-form per-source `config` bag.
pub struct SourceBag<'a> {
    map: &'a HashMap<String, serde_json::Value>,
}

impl<'a> SourceBag<'a> {
    pub fn str(&self, key: &str) -> Option<&'a str> {
        self.map.get(key).and_then(|v| v.as_str())
    }

    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.map
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn bool(&self, key: &str, default: bool) -> bool {
        self.map.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn i64(&self, key: &str, default: i64) -> i64 {
        self.map.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    pub fn f64(&self, key: &str, default: f64) -> f64 {
        self.map.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    pub fn secs(&self, key: &str, default: u64) -> Duration {
        Duration::from_secs(self.i64(key, default as i64).max(0) as u64)
    }

    pub fn string_map(&self, key: &str) -> HashMap<String, String> {
        self.map
            .get(key)
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// Config trait
pub trait ConfigTrait {
    fn logs(&self) -> Option<&Logs>;
    fn is_prod(&self) -> bool;
    #[allow(dead_code)]
    fn is_test(&self) -> bool;
    fn runtime(&self) -> &Runtime;
    fn api(&self) -> Option<&Api>;
    fn http(&self) -> Option<&Http>;
    fn cache(&self) -> Option<&CacheCfg>;
    fn proxy(&self) -> Option<&ProxyCfg>;
    fn scheduler(&self) -> Option<&SchedulerCfg>;
    fn sources(&self) -> &[SourceDescriptor];
    fn source(&self, source_id: &str) -> Option<&SourceDescriptor>;
}

// Config type alias for convenience
pub type Config = Engine;

impl ConfigTrait for Config {
    fn logs(&self) -> Option<&Logs> {
        self.engine.logs.as_ref()
    }

    fn is_prod(&self) -> bool {
        self.engine.env == PROD
    }

    fn is_test(&self) -> bool {
        self.engine.env == TEST
    }

    fn runtime(&self) -> &Runtime {
        const DEFAULT: &Runtime = &Runtime { num_cpus: 0 };
        self.engine.runtime.as_ref().unwrap_or(DEFAULT)
    }

    fn api(&self) -> Option<&Api> {
        self.engine.api.as_ref()
    }

    fn http(&self) -> Option<&Http> {
        self.engine.http.as_ref()
    }

    fn cache(&self) -> Option<&CacheCfg> {
        self.engine.cache.as_ref()
    }

    fn proxy(&self) -> Option<&ProxyCfg> {
        self.engine.proxy.as_ref()
    }

    fn scheduler(&self) -> Option<&SchedulerCfg> {
        self.engine.scheduler.as_ref()
    }

    fn sources(&self) -> &[SourceDescriptor] {
        &self.engine.sources
    }

    fn source(&self, source_id: &str) -> Option<&SourceDescriptor> {
        self.engine
            .sources
            .iter()
            .find(|s| s.source_id == source_id)
    }
}

impl Config {
    /// Loads configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let abs_path = path
            .canonicalize()
            .with_context(|| format!("failed to resolve absolute config filepath: {:?}", path))?;

        let data = std::fs::read_to_string(&abs_path)
            .with_context(|| format!("read config yaml file {:?}", abs_path))?;

        let cfg: Engine = serde_yaml::from_str(&data)
            .with_context(|| format!("unmarshal yaml from {:?}", abs_path))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects configurations a running engine cannot tolerate.
    /// Source ids must be unique: downstream tables key on them, so a
    /// duplicate is a load error rather than a silent rename.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for src in &self.engine.sources {
            if src.source_id.trim().is_empty() {
                anyhow::bail!("source with empty source_id (name: {:?})", src.name);
            }
            if !seen.insert(src.source_id.as_str()) {
                anyhow::bail!("duplicate source_id in configuration: {}", src.source_id);
            }
        }
        for seed in self
            .engine
            .proxy
            .iter()
            .flat_map(|p| p.seeds.iter())
        {
            match seed.protocol.as_str() {
                "http" | "https" | "socks5" => {}
                other => anyhow::bail!("proxy {}: unsupported protocol {}", seed.id, other),
            }
        }
        Ok(())
    }
}

// Test config is always available for integration tests
mod test_config;
#[allow(dead_code)]
pub use test_config::{new_test_config, test_descriptor};
