//! Rate limiter collaborator (spec.md §4.7 stock `ratelimit_route` filter).
//! Injectable via the [`RateLimiter`] trait; [`InMemoryRateLimiter`] is a
//! fixed-window counter, grounded on the teacher's `dashmap`-backed
//! request-counting pattern.

use dashmap::DashMap;
use std::time::{Duration, Instant};

pub trait RateLimiter: Send + Sync {
    /// Returns `false` if `key` has exceeded its allowance in the current
    /// window. `log_only` callers should ignore the result and never block.
    fn allow(&self, key: &str) -> bool;
}

struct Window {
    started: Instant,
    count: u32,
}

pub struct InMemoryRateLimiter {
    limit_per_window: u32,
    window: Duration,
    state: DashMap<String, Window>,
}

impl InMemoryRateLimiter {
    pub fn new(limit_per_window: u32, window: Duration) -> Self {
        InMemoryRateLimiter {
            limit_per_window,
            window,
            state: DashMap::new(),
        }
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        InMemoryRateLimiter::new(100, Duration::from_secs(1))
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.state.entry(key.to_string()).or_insert_with(|| Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) > self.window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= self.limit_per_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_once_limit_exceeded_within_window() {
        let rl = InMemoryRateLimiter::new(2, Duration::from_secs(60));
        assert!(rl.allow("a"));
        assert!(rl.allow("a"));
        assert!(!rl.allow("a"));
        assert!(rl.allow("b"));
    }
}
