//! Per-host request spacing

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Shared map of the next allowed request slot per host
#[derive(Debug)]
pub struct HostRateLimiter {
    delay: Duration,
    next_slot: DashMap<String, Instant>,
}

impl HostRateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: DashMap::new(),
        }
    }

    /// Reserve the next slot for `host` and return how long to wait for it.
    ///
    /// The read-modify-write happens under the map's shard lock, so two
    /// callers never receive the same slot.
    pub fn reserve(&self, host: &str) -> Duration {
        let now = Instant::now();
        let mut slot = self.next_slot.entry(host.to_lowercase()).or_insert(now);
        let granted = (*slot).max(now);
        *slot = granted + self.delay;
        granted.saturating_duration_since(now)
    }

    /// Wait until `host` may be contacted again
    pub async fn acquire(&self, host: &str) {
        let wait = self.reserve(host);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    pub fn hosts(&self) -> usize {
        self.next_slot.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_spaced_per_host() {
        let limiter = HostRateLimiter::new(Duration::from_millis(200));

        assert!(limiter.reserve("a.test").is_zero());
        let second = limiter.reserve("a.test");
        assert!(second > Duration::from_millis(150));
        let third = limiter.reserve("A.TEST");
        assert!(third > Duration::from_millis(350));

        assert!(limiter.reserve("b.test").is_zero());
        assert_eq!(limiter.hosts(), 2);
    }

    #[test]
    fn test_zero_delay_never_waits() {
        let limiter = HostRateLimiter::new(Duration::ZERO);
        for _ in 0..3 {
            assert!(limiter.reserve("a.test").is_zero());
        }
    }

    #[tokio::test]
    async fn test_acquire_sleeps() {
        let limiter = HostRateLimiter::new(Duration::from_millis(30));
        let start = Instant::now();
        limiter.acquire("a.test").await;
        limiter.acquire("a.test").await;
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
