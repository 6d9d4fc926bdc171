// Desktop User-Agent rotation for outbound requests.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Built-in rotation list of modern desktop browser agents.
pub const DEFAULT_USER_AGENTS: [&str; 6] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
];

/// Round-robin pool over a fixed agent list.
/// Sources with pinned `user_agents` get their own pool; everything else
/// shares the built-in rotation.
pub struct UserAgentPool {
    agents: Vec<String>,
    next: AtomicUsize,
}

impl UserAgentPool {
    pub fn new(agents: Vec<String>) -> Self {
        let agents = if agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            agents
        };
        Self {
            agents,
            next: AtomicUsize::new(0),
        }
    }

    pub fn builtin() -> Self {
        Self::new(Vec::new())
    }

    pub fn next(&self) -> &str {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.agents.len();
        &self.agents[idx]
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.agents.len()
    }
}
