#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::new_test_config;
    use crate::config::ConfigTrait;
    use crate::http::client::{backoff_delay, HttpClient, RequestError};
    use crate::http::useragent::{UserAgentPool, DEFAULT_USER_AGENTS};
    use crate::proxy::ProxyManager;

    fn test_client() -> Arc<HttpClient> {
        let cfg = new_test_config();
        let proxies = ProxyManager::new(cfg.proxy());
        HttpClient::new(cfg.http(), proxies)
    }

    /// backoff = base * 2^(attempt-1) * rand(0.5, 1.5)
    #[test]
    fn test_backoff_delay_bounds() {
        let base = Duration::from_millis(100);
        for attempt in 1..=4u32 {
            let factor = 2u64.pow(attempt - 1) as f64;
            for _ in 0..50 {
                let delay = backoff_delay(base, attempt).as_secs_f64();
                let low = 0.1 * factor * 0.5;
                let high = 0.1 * factor * 1.5;
                assert!(
                    delay >= low && delay <= high,
                    "attempt {}: {} outside [{}, {}]",
                    attempt,
                    delay,
                    low,
                    high
                );
            }
        }
    }

    #[test]
    fn test_user_agent_rotation_round_robin() {
        let pool = UserAgentPool::builtin();
        assert!(pool.len() >= 5);
        let first = pool.next().to_string();
        for _ in 1..pool.len() {
            assert_ne!(pool.next(), first);
        }
        // Wraps back around to the first agent.
        assert_eq!(pool.next(), first);
    }

    #[test]
    fn test_user_agent_pool_pinned_list() {
        let pool = UserAgentPool::new(vec!["agent-a".into(), "agent-b".into()]);
        assert_eq!(pool.next(), "agent-a");
        assert_eq!(pool.next(), "agent-b");
        assert_eq!(pool.next(), "agent-a");
    }

    #[test]
    fn test_default_agents_are_desktop_class() {
        for ua in DEFAULT_USER_AGENTS {
            assert!(ua.starts_with("Mozilla/5.0"), "unexpected agent: {}", ua);
            assert!(!ua.contains("iPhone") && !ua.contains("Android"));
        }
    }

    /// Hosts on the geo-restricted allowlist imply proxying, including
    /// subdomains; everything else does not.
    #[test]
    fn test_host_implies_proxy_allowlist() {
        let client = test_client();
        assert!(client.host_implies_proxy("https://github.com/trending"));
        assert!(client.host_implies_proxy("https://www.bloomberg.com/markets"));
        assert!(client.host_implies_proxy("https://news.ycombinator.com/news"));
        assert!(client.host_implies_proxy("https://www.bbc.co.uk/news"));
        assert!(!client.host_implies_proxy("https://www.cls.cn/telegraph"));
        assert!(!client.host_implies_proxy("https://notgithub.com/x"));
        assert!(!client.host_implies_proxy("not a url"));
    }

    #[test]
    fn test_retryable_error_classification() {
        assert!(RequestError::Transport("conn reset".into()).is_retryable());
        assert!(RequestError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(RequestError::Status(429).is_retryable());
        assert!(RequestError::Status(500).is_retryable());
        assert!(RequestError::Status(503).is_retryable());
        assert!(!RequestError::Status(404).is_retryable());
        assert!(!RequestError::Status(403).is_retryable());
        assert!(!RequestError::Protocol("bad json".into()).is_retryable());
    }
}
