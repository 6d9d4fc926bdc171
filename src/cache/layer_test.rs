#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{Local, TimeZone};

    use crate::cache::{source_key, CacheLayer};
    use crate::model::NewsItem;

    fn items(source_id: &str, count: usize) -> Vec<NewsItem> {
        let published = Local.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let url = format!("https://example.com/{}/{}", source_id, i);
                let title = format!("标题 {}", i);
                let id = NewsItem::derive_id(source_id, &url, Some(&title), Some(&published));
                let mut item = NewsItem::new(
                    id,
                    title,
                    url,
                    source_id.to_string(),
                    "Test Source".to_string(),
                    published,
                );
                item.extra
                    .insert("rank".to_string(), serde_json::json!(i));
                item
            })
            .collect()
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips_items() {
        let cache = CacheLayer::memory_only();
        let key = source_key("src-a");
        let original = items("src-a", 5);

        cache.set(&key, &original, Duration::from_secs(60)).await;
        let loaded: Vec<NewsItem> = cache.get(&key).await.expect("cache hit");

        assert_eq!(loaded, original);
        assert_eq!(loaded[3].extra.get("rank"), Some(&serde_json::json!(3)));
    }

    #[tokio::test]
    async fn test_get_miss_on_unknown_key() {
        let cache = CacheLayer::memory_only();
        let loaded: Option<Vec<NewsItem>> = cache.get("source:ghost").await;
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = CacheLayer::memory_only();
        let key = source_key("src-b");
        cache.set(&key, &items("src-b", 2), Duration::from_secs(60)).await;
        assert!(cache.exists(&key).await);

        cache.force_expire(&key);
        let loaded: Option<Vec<NewsItem>> = cache.get(&key).await;
        assert!(loaded.is_none());
        assert!(!cache.exists(&key).await);
    }

    #[tokio::test]
    async fn test_ttl_reports_remaining_seconds() {
        let cache = CacheLayer::memory_only();
        let key = source_key("src-c");
        cache.set(&key, &items("src-c", 1), Duration::from_secs(120)).await;

        let ttl = cache.ttl(&key).await.expect("ttl");
        assert!(ttl > 100 && ttl <= 120, "unexpected ttl {}", ttl);
        assert!(cache.ttl("source:ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_and_clear_prefix() {
        let cache = CacheLayer::memory_only();
        cache
            .set(&source_key("a"), &items("a", 1), Duration::from_secs(60))
            .await;
        cache
            .set(&source_key("b"), &items("b", 1), Duration::from_secs(60))
            .await;
        cache.set("other:x", &items("x", 1), Duration::from_secs(60)).await;

        cache.delete(&source_key("a")).await;
        assert!(!cache.exists(&source_key("a")).await);

        let removed = cache.clear_prefix("source:").await;
        assert_eq!(removed, 1);
        assert!(!cache.exists(&source_key("b")).await);
        assert!(cache.exists("other:x").await);
    }

    #[tokio::test]
    async fn test_stats_counts_entries() {
        let cache = CacheLayer::memory_only();
        cache
            .set(&source_key("a"), &items("a", 3), Duration::from_secs(60))
            .await;
        cache
            .set(&source_key("b"), &items("b", 1), Duration::from_secs(60))
            .await;

        let stats = cache.stats().await;
        assert_eq!(stats.memory_entries, 2);
        assert!(stats.memory_bytes > 0);
        assert!(!stats.remote_connected);
        assert_eq!(stats.key_ttls.len(), 2);
    }

    /// Zero or negative TTL never materializes an entry.
    #[tokio::test]
    async fn test_zero_ttl_is_not_stored() {
        let cache = CacheLayer::memory_only();
        cache
            .set(&source_key("z"), &items("z", 1), Duration::from_secs(0))
            .await;
        assert!(!cache.exists(&source_key("z")).await);
    }
}
