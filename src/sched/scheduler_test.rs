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
    use crate::persist::MemoryStore;
    use crate::sched::AdaptiveScheduler;
    use crate::source::strategy::{FetchError, FetchStrategy};
    use crate::source::{CachedSource, SourceRegistry};

    /// Returns a fixed number of items on every call; optionally slow.
    struct StaticStrategy {
        source_id: String,
        count: usize,
        delay: Option<Duration>,
        calls: AtomicU64,
        fresh_seconds: i64,
    }

    #[async_trait]
    impl FetchStrategy for StaticStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::JsonApi
        }

        async fn fetch(&self) -> Result<Vec<NewsItem>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let published = Local::now() - chrono::Duration::seconds(self.fresh_seconds);
            Ok((0..self.count)
                .map(|i| {
                    let url = format!("https://example.com/{}/{}", self.source_id, i);
                    let title = format!("{} 条目 {}", self.source_id, i);
                    // Ids stay stable across calls so upserts resolve to
                    // the same stored rows.
                    let id = NewsItem::derive_id(&self.source_id, &url, None, None);
                    NewsItem::new(
                        id,
                        title,
                        url,
                        self.source_id.clone(),
                        "Test".to_string(),
                        published,
                    )
                })
                .collect())
        }
    }

    struct SharedStrategy(Arc<StaticStrategy>);

    #[async_trait]
    impl FetchStrategy for SharedStrategy {
        fn kind(&self) -> StrategyKind {
            self.0.kind()
        }
        async fn fetch(&self) -> Result<Vec<NewsItem>, FetchError> {
            self.0.fetch().await
        }
    }

    fn make_source(
        source_id: &str,
        update_interval: Duration,
        count: usize,
        delay: Option<Duration>,
    ) -> (Arc<CachedSource>, Arc<StaticStrategy>) {
        let strategy = Arc::new(StaticStrategy {
            source_id: source_id.to_string(),
            count,
            delay,
            calls: AtomicU64::new(0),
            fresh_seconds: 60,
        });
        let mut descriptor = test_descriptor(source_id, "json_api", update_interval);
        // Keep unforced re-fetches possible right after a fetch.
        descriptor.cache_ttl = Some(Duration::from_secs(0));
        let source = CachedSource::new(
            Arc::new(descriptor),
            Box::new(SharedStrategy(strategy.clone())),
            CacheLayer::memory_only(),
            Some(Duration::from_secs(5)),
        );
        source.skip_hydration();
        (source, strategy)
    }

    fn make_scheduler(
        sources: Vec<Arc<CachedSource>>,
    ) -> (Arc<AdaptiveScheduler>, Arc<MemoryStore>, CancellationToken) {
        let cfg = new_test_config();
        let token = CancellationToken::new();
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(SourceRegistry::from_sources(sources));
        let scheduler = AdaptiveScheduler::new(
            token.clone(),
            cfg.scheduler(),
            registry,
            store.clone(),
        );
        (scheduler, store, token)
    }

    #[tokio::test]
    async fn test_fetch_unknown_source_returns_none() {
        let (scheduler, _, _) = make_scheduler(vec![]);
        assert!(scheduler.fetch("ghost", true).await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_persists_items_and_updates_state() {
        let (source, strategy) =
            make_source("persist-src", Duration::from_secs(0), 5, None);
        let (scheduler, store, _) = make_scheduler(vec![source]);

        let outcome = scheduler.fetch("persist-src", false).await.expect("fetched");

        assert!(outcome.success);
        assert_eq!(outcome.count, 5);
        assert_eq!(outcome.new_items, 5);
        assert_eq!(outcome.updated_items, 0);
        assert_eq!(store.len(), 5);
        assert!(store.source_timestamp("persist-src").is_some());
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);

        let state = scheduler.state_of("persist-src").expect("state");
        assert!(state.last_fetch_unix > 0);
        assert_eq!(state.last_fetch_item_count, 5);

        // Same items again: all updates, nothing new.
        let outcome = scheduler.fetch("persist-src", true).await.expect("fetched");
        assert_eq!(outcome.new_items, 0);
        assert_eq!(outcome.updated_items, 5);
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn test_unforced_fetch_respects_interval() {
        let (source, strategy) =
            make_source("gated-src", Duration::from_secs(1800), 3, None);
        let (scheduler, _, _) = make_scheduler(vec![source]);

        assert!(scheduler.should_fetch("gated-src"));
        assert!(scheduler.fetch("gated-src", false).await.is_some());

        // Interval has not elapsed: unforced is skipped, forced runs.
        assert!(!scheduler.should_fetch("gated-src"));
        assert!(scheduler.fetch("gated-src", false).await.is_none());
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
        assert!(scheduler.fetch("gated-src", true).await.is_some());
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 2);
    }

    /// Concurrent fetches of one source: single-flight admits one, the
    /// loser reports a suppressed (None) result.
    #[tokio::test]
    async fn test_single_flight_suppresses_concurrent_entry() {
        let (source, strategy) = make_source(
            "flight-src",
            Duration::from_secs(0),
            2,
            Some(Duration::from_millis(100)),
        );
        let (scheduler, _, _) = make_scheduler(vec![source]);

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.fetch("flight-src", true).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = scheduler.fetch("flight-src", true).await;

        assert!(second.is_none(), "second entry must be suppressed");
        assert!(first.await.expect("join").is_some());
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_fetch_counts_as_failure_and_backs_off() {
        let (source, _) = make_source("empty-src", Duration::from_secs(1800), 0, None);
        let (scheduler, store, _) = make_scheduler(vec![source]);

        let before = scheduler.state_of("empty-src").expect("state");
        let outcome = scheduler.fetch("empty-src", true).await.expect("ran");

        assert!(!outcome.success);
        assert_eq!(outcome.count, 0);
        assert!(store.is_empty());

        let after = scheduler.state_of("empty-src").expect("state");
        assert!(after.adaptive_interval > before.adaptive_interval);
        assert_eq!(after.consecutive_error_count, 1);
        assert!(after.success_rate < before.success_rate);
    }

    #[tokio::test]
    async fn test_persistence_errors_do_not_fail_the_fetch() {
        let (source, _) = make_source("flaky-store-src", Duration::from_secs(0), 3, None);
        let (scheduler, store, _) = make_scheduler(vec![source.clone()]);

        // Poison one row; the other two must still land.
        let poisoned = source.get_news(true).await[0].id.clone();
        store.fail_original_id(&poisoned);

        let outcome = scheduler
            .fetch("flaky-store-src", true)
            .await
            .expect("fetched");

        assert!(outcome.success);
        assert_eq!(outcome.count, 3);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_status_reports_every_source() {
        let (source_a, _) = make_source("status-a", Duration::from_secs(600), 1, None);
        let (source_b, _) = make_source("status-b", Duration::from_secs(3600), 1, None);
        let (scheduler, _, _) = make_scheduler(vec![source_a, source_b]);

        scheduler.fetch("status-a", true).await.expect("fetched");

        let status = scheduler.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].source_id, "status-a");
        assert!(status[0].last_fetch_unix > 0);
        assert!(status[0].next_fetch_unix > status[0].last_fetch_unix);
        assert_eq!(status[1].source_id, "status-b");
        assert_eq!(status[1].last_fetch_unix, 0);
        assert!(!status[1].is_running);
    }

    /// The run loop dispatches due sources and stops on cancellation.
    #[tokio::test]
    async fn test_run_loop_dispatches_and_stops() {
        let (source, strategy) = make_source("loop-src", Duration::from_secs(0), 2, None);
        let (scheduler, _, token) = make_scheduler(vec![source]);

        let runner = tokio::spawn(scheduler.clone().run());
        tokio::time::sleep(Duration::from_millis(300)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("run loop must stop after cancellation")
            .expect("join");

        assert!(strategy.calls.load(Ordering::SeqCst) >= 1);
    }
}
