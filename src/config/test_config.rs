//! Canned configuration used by unit and e2e tests.

use std::collections::HashMap;
use std::time::Duration;

use super::{
    Api, CacheCfg, Engine, EngineBox, Http, Logs, ProxyCfg, Runtime, SchedulerCfg,
    SourceDescriptor,
};

/// Builds an engine config with no sources, no redis and no proxies.
pub fn new_test_config() -> Engine {
    Engine {
        engine: EngineBox {
            env: super::TEST.to_string(),
            logs: Some(Logs {
                level: Some("debug".to_string()),
            }),
            runtime: Some(Runtime { num_cpus: 0 }),
            api: Some(Api {
                name: Some("newswire-test".to_string()),
                port: Some("0".to_string()),
            }),
            http: Some(Http {
                rate: Some(1000),
                max_retries: Some(1),
                retry_base_delay: Some(Duration::from_millis(10)),
                connect_timeout: Some(Duration::from_secs(2)),
                read_timeout: Some(Duration::from_secs(2)),
                total_timeout: Some(Duration::from_secs(5)),
                verify_tls: Some(true),
                proxied_domains: vec![],
            }),
            cache: Some(CacheCfg {
                redis_url: None,
                default_ttl: Some(Duration::from_secs(900)),
            }),
            proxy: Some(ProxyCfg {
                refresh_interval: Some(Duration::from_secs(300)),
                health_url: None,
                seeds: vec![],
            }),
            scheduler: Some(SchedulerCfg {
                check_interval: Some(Duration::from_millis(50)),
                concurrency: Some(4),
                fetch_timeout: Some(Duration::from_secs(5)),
                grace_period: Some(Duration::from_secs(1)),
                enable_adaptive: Some(true),
            }),
            sources: vec![],
        },
    }
}

/// Builds a descriptor for a single test source.
pub fn test_descriptor(source_id: &str, kind: &str, update_interval: Duration) -> SourceDescriptor {
    SourceDescriptor {
        source_id: source_id.to_string(),
        name: format!("{} (test)", source_id),
        description: None,
        url: None,
        kind: kind.to_string(),
        category: Some("test".to_string()),
        country: Some("CN".to_string()),
        language: Some("zh".to_string()),
        update_interval: Some(update_interval),
        cache_ttl: Some(Duration::from_secs(900)),
        priority: Some(0),
        status: Some("active".to_string()),
        config: HashMap::new(),
    }
}
