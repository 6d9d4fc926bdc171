// End-to-end scenarios across registry, wrapper, scheduler and substrate.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::{new_test_config, test_descriptor, ConfigTrait, ProxyCfg, ProxySeed};
    use crate::http::{HttpClient, RequestSpec, ResponseKind};
    use crate::persist::MemoryStore;
    use crate::proxy::ProxyManager;
    use crate::sched::AdaptiveScheduler;
    use crate::source::strategy::HeadlessChromiumDriver;
    use crate::source::SourceRegistry;
    use crate::support::{engine_with, make_items, scripted_source, Script, StubServer};
    use crate::telemetry::CacheTelemetry;
    use crate::cache::CacheLayer;
    use tokio_util::sync::CancellationToken;

    fn telegraph_json() -> String {
        let items: Vec<serde_json::Value> = (0..5)
            .map(|i| {
                serde_json::json!({
                    "id": 9000 + i,
                    "title": format!("电报快讯 {}", i),
                    "url": format!("https://example.com/telegraph/{}", i),
                    "ctime": chrono::Local::now().timestamp() - 60,
                })
            })
            .collect();
        serde_json::json!({"code": 0, "data": {"roll_data": items}}).to_string()
    }

    /// S1: a JSON API source with a long TTL serves the second call from
    /// cache, without touching the upstream again.
    #[tokio::test]
    async fn test_s1_cache_hit_serves_second_call() {
        let server = StubServer::spawn("application/json", telegraph_json()).await;

        let mut cfg = new_test_config();
        let mut descriptor =
            test_descriptor("cls-telegraph", "json_api", Duration::from_secs(0));
        descriptor.cache_ttl = Some(Duration::from_secs(3600));
        descriptor.config.insert(
            "api_url".to_string(),
            serde_json::json!(server.url("/nodeapi/telegraphList")),
        );
        descriptor
            .config
            .insert("data_path".to_string(), serde_json::json!("data.roll_data"));
        // Zero interval keeps the source always due, so the cache decides.
        descriptor
            .config
            .insert("enable_adaptive".to_string(), serde_json::json!(false));
        cfg.engine.sources = vec![descriptor];

        let proxies = ProxyManager::new(cfg.proxy());
        let http = HttpClient::new(cfg.http(), proxies);
        let registry = Arc::new(
            SourceRegistry::build(
                &cfg,
                http,
                CacheLayer::memory_only(),
                HeadlessChromiumDriver::new(None),
                Some(Duration::from_secs(5)),
            )
            .expect("registry"),
        );
        let store = Arc::new(MemoryStore::new());
        let scheduler = AdaptiveScheduler::new(
            CancellationToken::new(),
            cfg.scheduler(),
            registry.clone(),
            store.clone(),
        );

        let first = scheduler
            .fetch("cls-telegraph", false)
            .await
            .expect("first fetch");
        assert!(first.success);
        assert_eq!(first.count, 5);
        assert_eq!(first.new_items, 5);
        assert_eq!(store.len(), 5);
        assert_eq!(server.hit_count(), 1);

        let second = scheduler
            .fetch("cls-telegraph", false)
            .await
            .expect("second fetch");
        assert_eq!(second.count, 5);
        assert_eq!(second.new_items, 0);
        assert_eq!(server.hit_count(), 1, "second call must not hit upstream");

        let telemetry = CacheTelemetry::new(registry);
        let status = telemetry.source_status("cls-telegraph").expect("status");
        assert_eq!(status.metrics.cache_hit_count, 1);
        assert_eq!(status.metrics.cache_miss_count, 1);
    }

    /// S2: an upstream that suddenly returns an empty list is absorbed by
    /// empty protection; nothing new reaches the store.
    #[tokio::test]
    async fn test_s2_empty_protection_end_to_end() {
        let (source, strategy) = scripted_source(
            "empty-prot-src",
            Duration::from_secs(0),
            Duration::from_secs(3600),
            vec![
                Script::Items(make_items("empty-prot-src", 10)),
                Script::Items(Vec::new()),
            ],
        );
        let (scheduler, registry, store) = engine_with(vec![source]);

        let primed = scheduler
            .fetch("empty-prot-src", false)
            .await
            .expect("prime fetch");
        assert_eq!(primed.count, 10);
        assert_eq!(store.len(), 10);

        let protected = scheduler
            .fetch("empty-prot-src", true)
            .await
            .expect("protected fetch");
        assert_eq!(protected.count, 10);
        assert_eq!(protected.new_items, 0, "no new rows during protection");
        assert_eq!(store.len(), 10);
        assert_eq!(strategy.calls.load(std::sync::atomic::Ordering::SeqCst), 2);

        let telemetry = CacheTelemetry::new(registry);
        let status = telemetry.source_status("empty-prot-src").expect("status");
        assert_eq!(status.protection.empty_protection_count, 1);
        assert_eq!(status.cache_state.items_count, 10);
    }

    /// S3: a sharp shrink is rejected once, then a plausible partial
    /// refresh (>= 30%) replaces the cache.
    #[tokio::test]
    async fn test_s3_shrink_protection_end_to_end() {
        let (source, _) = scripted_source(
            "shrink-prot-src",
            Duration::from_secs(0),
            Duration::from_secs(3600),
            vec![
                Script::Items(make_items("shrink-prot-src", 30)),
                Script::Items(make_items("shrink-prot-src", 5)),
                Script::Items(make_items("shrink-prot-src", 20)),
            ],
        );
        let (scheduler, registry, store) = engine_with(vec![source]);

        let primed = scheduler
            .fetch("shrink-prot-src", false)
            .await
            .expect("prime fetch");
        assert_eq!(primed.count, 30);
        assert_eq!(store.len(), 30);

        let shrunk = scheduler
            .fetch("shrink-prot-src", true)
            .await
            .expect("shrunk fetch");
        assert_eq!(shrunk.count, 30, "shrink must serve cached list");

        let telemetry = CacheTelemetry::new(registry.clone());
        let status = telemetry.source_status("shrink-prot-src").expect("status");
        assert_eq!(status.protection.shrink_protection_count, 1);

        let partial = scheduler
            .fetch("shrink-prot-src", true)
            .await
            .expect("partial fetch");
        assert_eq!(partial.count, 20, "plausible refresh replaces cache");

        let status = CacheTelemetry::new(registry)
            .source_status("shrink-prot-src")
            .expect("status");
        assert_eq!(status.protection.shrink_protection_count, 1);
        assert_eq!(status.cache_state.items_count, 20);
    }

    /// S4: a dead proxy costs one failed (and reported) attempt, then the
    /// fallback goes direct and succeeds.
    #[tokio::test]
    async fn test_s4_proxy_fallback_end_to_end() {
        let server = StubServer::spawn("application/json", telegraph_json()).await;

        let cfg = new_test_config();
        let proxies = ProxyManager::new(Some(&ProxyCfg {
            refresh_interval: Some(Duration::from_secs(300)),
            health_url: None,
            seeds: vec![ProxySeed {
                id: "dead-proxy".to_string(),
                protocol: "socks5".to_string(),
                host: "127.0.0.1".to_string(),
                port: 9,
                username: None,
                password: None,
                group: Some("default".to_string()),
                priority: Some(1),
                health_url: None,
            }],
        }));
        let http = HttpClient::new(cfg.http(), proxies.clone());

        let mut spec = RequestSpec::get(server.url("/api/list")).kind(ResponseKind::Json);
        spec.needs_proxy = true;
        spec.proxy_fallback = true;
        spec.max_retries = Some(2);
        spec.source_id = Some("proxied-src".to_string());

        let response = http.request(&spec).await.expect("fallback succeeds");
        assert_eq!(response.status, 200);
        assert!(response.json().is_some());
        assert_eq!(server.hit_count(), 1);

        let snapshot = proxies.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].stats.total_requests, 1);
        assert_eq!(snapshot[0].stats.failed_requests, 1);
        assert_eq!(snapshot[0].stats.successful_requests, 0);
    }

    /// A batch run returns per-URL results; one unreachable URL never
    /// fails the whole batch.
    #[tokio::test]
    async fn test_batch_isolates_per_url_failures() {
        let server = StubServer::spawn("application/json", telegraph_json()).await;

        let cfg = new_test_config();
        let proxies = ProxyManager::new(cfg.proxy());
        let http = HttpClient::new(cfg.http(), proxies);

        let mut dead = RequestSpec::get("http://127.0.0.1:1/unroutable").kind(ResponseKind::Json);
        dead.max_retries = Some(1);
        let specs = vec![
            RequestSpec::get(server.url("/a")).kind(ResponseKind::Json),
            dead,
            RequestSpec::get(server.url("/b")).kind(ResponseKind::Json),
        ];

        let results = http.batch(specs, 2).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert_eq!(server.hit_count(), 2);
    }

    /// Global telemetry rolls protection counters and hits up across
    /// sources.
    #[tokio::test]
    async fn test_global_rollup_aggregates_sources() {
        let (healthy, _) = scripted_source(
            "rollup-healthy",
            Duration::from_secs(0),
            Duration::from_secs(3600),
            vec![Script::Items(make_items("rollup-healthy", 4))],
        );
        let (broken, _) = scripted_source(
            "rollup-broken",
            Duration::from_secs(0),
            Duration::from_secs(3600),
            vec![
                Script::Items(make_items("rollup-broken", 6)),
                Script::Fail("upstream down".to_string()),
            ],
        );
        let (scheduler, registry, _) = engine_with(vec![healthy, broken]);

        scheduler.fetch("rollup-healthy", false).await.expect("healthy");
        scheduler.fetch("rollup-broken", false).await.expect("prime broken");
        scheduler.fetch("rollup-broken", true).await.expect("broken protected");

        let rollup = CacheTelemetry::new(registry).global_status();
        assert_eq!(rollup.sources, 2);
        assert_eq!(rollup.sources_with_items, 2);
        assert_eq!(rollup.total_cached_items, 10);
        assert_eq!(rollup.error_protections, 1);
        assert_eq!(rollup.empty_protections, 0);
        assert!(rollup.flagged_sources.is_empty());
    }
}
