#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Local;
    use tokio_util::sync::CancellationToken;

    use crate::cache::CacheLayer;
    use crate::config::{new_test_config, test_descriptor, ConfigTrait, StrategyKind};
    use crate::model::NewsItem;
    use crate::orchestrator::{TaskOrchestrator, Tier};
    use crate::persist::MemoryStore;
    use crate::sched::AdaptiveScheduler;
    use crate::source::strategy::{FetchError, FetchStrategy};
    use crate::source::{CachedSource, SourceRegistry};

    struct CountingStrategy {
        source_id: String,
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl FetchStrategy for CountingStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::JsonApi
        }

        async fn fetch(&self) -> Result<Vec<NewsItem>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let published = Local::now();
            let url = format!("https://example.com/{}/0", self.source_id);
            let id = NewsItem::derive_id(&self.source_id, &url, None, None);
            Ok(vec![NewsItem::new(
                id,
                format!("{} headline", self.source_id),
                url,
                self.source_id.clone(),
                "Test".to_string(),
                published,
            )])
        }
    }

    fn make_source(source_id: &str, update_interval: Duration) -> (Arc<CachedSource>, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        let descriptor = test_descriptor(source_id, "json_api", update_interval);
        let source = CachedSource::new(
            Arc::new(descriptor),
            Box::new(CountingStrategy {
                source_id: source_id.to_string(),
                calls: calls.clone(),
            }),
            CacheLayer::memory_only(),
            Some(Duration::from_secs(5)),
        );
        source.skip_hydration();
        (source, calls)
    }

    fn make_orchestrator(
        sources: Vec<Arc<CachedSource>>,
    ) -> Arc<TaskOrchestrator> {
        let cfg = new_test_config();
        let registry = Arc::new(SourceRegistry::from_sources(sources));
        let scheduler = AdaptiveScheduler::new(
            CancellationToken::new(),
            cfg.scheduler(),
            registry,
            Arc::new(MemoryStore::new()),
        );
        TaskOrchestrator::new(scheduler)
    }

    #[test]
    fn test_tier_boundaries() {
        assert!(Tier::High.matches(600));
        assert!(Tier::High.matches(900));
        assert!(!Tier::High.matches(901));

        assert!(Tier::Medium.matches(901));
        assert!(Tier::Medium.matches(2700));
        assert!(!Tier::Medium.matches(900));
        assert!(!Tier::Medium.matches(2701));

        assert!(Tier::Low.matches(2701));
        assert!(!Tier::Low.matches(2700));

        assert!(Tier::All.matches(600) && Tier::All.matches(86400));
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!(Tier::parse("high"), Some(Tier::High));
        assert_eq!(Tier::parse("MEDIUM"), Some(Tier::Medium));
        assert_eq!(Tier::parse("Low"), Some(Tier::Low));
        assert_eq!(Tier::parse("all"), Some(Tier::All));
        assert_eq!(Tier::parse("hourly"), None);
    }

    /// fetch_tier(HIGH) exercises only the fast source; fetch_tier(LOW)
    /// only the slow one.
    #[tokio::test]
    async fn test_tier_dispatch_is_exclusive() {
        let (fast, fast_calls) = make_source("fast-src", Duration::from_secs(600));
        let (slow, slow_calls) = make_source("slow-src", Duration::from_secs(3600));
        let orchestrator = make_orchestrator(vec![fast, slow]);

        let result = orchestrator.fetch_tier(Tier::High).await;
        assert_eq!(result.sources, vec!["fast-src".to_string()]);
        assert_eq!(result.fetched, 1);
        assert_eq!(fast_calls.load(Ordering::SeqCst), 1);
        assert_eq!(slow_calls.load(Ordering::SeqCst), 0);

        let result = orchestrator.fetch_tier(Tier::Low).await;
        assert_eq!(result.sources, vec!["slow-src".to_string()]);
        assert_eq!(slow_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fast_calls.load(Ordering::SeqCst), 1);
    }

    /// Re-running a tier before the sources are due again skips them.
    #[tokio::test]
    async fn test_tier_rerun_is_idempotent() {
        let (fast, fast_calls) = make_source("idem-src", Duration::from_secs(600));
        let orchestrator = make_orchestrator(vec![fast]);

        let first = orchestrator.fetch_tier(Tier::High).await;
        assert_eq!(first.fetched, 1);

        let second = orchestrator.fetch_tier(Tier::High).await;
        assert_eq!(second.fetched, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(fast_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_all_covers_every_tier() {
        let (fast, fast_calls) = make_source("all-fast", Duration::from_secs(600));
        let (medium, medium_calls) = make_source("all-medium", Duration::from_secs(1800));
        let (slow, slow_calls) = make_source("all-slow", Duration::from_secs(7200));
        let orchestrator = make_orchestrator(vec![fast, medium, slow]);

        let result = orchestrator.fetch_all().await;

        assert_eq!(result.fetched, 3);
        assert_eq!(result.total_items, 3);
        assert_eq!(fast_calls.load(Ordering::SeqCst), 1);
        assert_eq!(medium_calls.load(Ordering::SeqCst), 1);
        assert_eq!(slow_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_one_delegates_to_scheduler() {
        let (fast, fast_calls) = make_source("one-src", Duration::from_secs(600));
        let orchestrator = make_orchestrator(vec![fast]);

        let outcome = orchestrator.fetch_one("one-src", true).await.expect("ran");
        assert!(outcome.success);
        assert_eq!(fast_calls.load(Ordering::SeqCst), 1);
        assert!(orchestrator.fetch_one("ghost", true).await.is_none());
    }
}
