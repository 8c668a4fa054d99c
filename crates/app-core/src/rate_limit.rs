//! Sliding-window invitation limiter
//!
//! Keeps, per sender, the timestamps of invitations issued within the window.
//! Entries older than the window are pruned lazily whenever the sender is
//! checked or recorded; there is no background sweep.
//!
//! This is a best-effort anti-abuse control. A check and the subsequent
//! record are separate steps, so two concurrent invitations right at the
//! boundary may both pass.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::clock::Clock;

/// Rate limiter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum events per window
    pub limit: usize,
    /// Window length
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { limit: 10, window: Duration::hours(24) }
    }
}

impl RateLimitConfig {
    /// Set the per-window limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set the window length
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Per-key sliding-window counter
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    log: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    /// Create a limiter reading time from `clock`
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, log: Mutex::new(HashMap::new()) }
    }

    /// Active configuration
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Check whether `key` has used up its allowance
    pub fn is_limited(&self, key: &str) -> bool {
        self.used(key) >= self.config.limit
    }

    /// Number of events `key` has in the current window
    pub fn used(&self, key: &str) -> usize {
        let now = self.clock.now();
        let mut log = self.log.lock();
        let Some(entries) = log.get_mut(key) else {
            return 0;
        };
        self.prune(entries, now);
        let used = entries.len();
        if used == 0 {
            log.remove(key);
        }
        used
    }

    /// Record a successful event for `key`
    pub fn record(&self, key: &str) {
        let now = self.clock.now();
        let mut log = self.log.lock();
        let entries = log.entry(key.to_string()).or_default();
        self.prune(entries, now);
        entries.push_back(now);
    }

    fn prune(&self, entries: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        while entries.front().is_some_and(|t| now - *t >= self.config.window) {
            entries.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(limit: usize) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(RateLimitConfig::default().limit(limit), clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.limit, 10);
        assert_eq!(config.window, Duration::hours(24));
    }

    #[test]
    fn test_limit_reached() {
        let (_, limiter) = limiter(3);
        for _ in 0..3 {
            assert!(!limiter.is_limited("s"));
            limiter.record("s");
        }
        assert!(limiter.is_limited("s"));
        assert!(!limiter.is_limited("other"));
    }

    #[test]
    fn test_window_slides() {
        let (clock, limiter) = limiter(2);
        limiter.record("s");
        clock.advance(Duration::hours(12));
        limiter.record("s");
        assert!(limiter.is_limited("s"));

        // First entry expires exactly 24h after it was recorded
        clock.advance(Duration::hours(12));
        assert_eq!(limiter.used("s"), 1);
        assert!(!limiter.is_limited("s"));
    }

    #[test]
    fn test_expired_keys_are_dropped() {
        let (clock, limiter) = limiter(2);
        limiter.record("s");
        clock.advance(Duration::days(2));
        assert_eq!(limiter.used("s"), 0);
        assert!(limiter.log.lock().is_empty());
    }
}
