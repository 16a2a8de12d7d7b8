//! Advisory sliding-window rate limiter
//!
//! State lives in process memory only. It is lost on restart and is not
//! shared between instances, so it throttles abuse and nothing more.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: usize,
    /// Seconds until the oldest request in the window expires (0 when allowed).
    pub retry_after_secs: u64,
}

struct Windows {
    hits: HashMap<String, VecDeque<Instant>>,
    last_sweep: Instant,
}

impl Windows {
    /// Drop every key with no hit inside the window. Runs at most once per
    /// window, so caller-chosen keys cannot accumulate.
    fn sweep(&mut self, now: Instant, window: Duration) {
        if now.saturating_duration_since(self.last_sweep) < window {
            return;
        }
        self.hits.retain(|_, hits| {
            hits.back()
                .is_some_and(|newest| now.saturating_duration_since(*newest) < window)
        });
        self.last_sweep = now;
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<Mutex<Windows>>,
}

impl RateLimiter {
    pub fn new_in_memory() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(Mutex::new(Windows {
                hits: HashMap::new(),
                last_sweep: Instant::now(),
            })),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Record a request for `key` and report whether it fits in the window.
    pub async fn check(&self, key: &str) -> RateLimitResult {
        self.check_at(key, Instant::now()).await
    }

    async fn check_at(&self, key: &str, now: Instant) -> RateLimitResult {
        let mut windows = self.windows.lock().await;
        windows.sweep(now, self.config.window);
        let hits = windows.hits.entry(key.to_string()).or_default();

        while let Some(oldest) = hits.front() {
            if now.saturating_duration_since(*oldest) >= self.config.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() >= self.config.max_requests {
            let retry_after = hits
                .front()
                .map(|oldest| {
                    self.config
                        .window
                        .saturating_sub(now.saturating_duration_since(*oldest))
                })
                .unwrap_or(self.config.window);

            return RateLimitResult {
                allowed: false,
                remaining: 0,
                retry_after_secs: retry_after.as_secs().max(1),
            };
        }

        hits.push_back(now);
        RateLimitResult {
            allowed: true,
            remaining: self.config.max_requests - hits.len(),
            retry_after_secs: 0,
        }
    }
}
