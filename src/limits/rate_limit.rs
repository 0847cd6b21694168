//! Sliding-window rate limiter for AI-class commands, keyed by principal.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

/// Per-principal sliding-window rate limiter.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    buckets: Mutex<HashMap<i64, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or deny a request. Returns `(allowed, remaining)` where
    /// `remaining` is the number of further requests the principal may make
    /// in the current window. A limit of 0 means unlimited.
    pub fn check_and_consume(&self, principal: i64) -> (bool, u32) {
        if self.max_requests == 0 {
            return (true, u32::MAX);
        }

        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(principal).or_default();

        Self::prune(bucket, now, self.window);

        if bucket.len() >= self.max_requests as usize {
            warn!(
                principal,
                count = bucket.len(),
                max = self.max_requests,
                "Rate limit exceeded"
            );
            return (false, 0);
        }

        bucket.push_back(now);
        (true, self.max_requests - bucket.len() as u32)
    }

    /// Seconds until the principal's oldest in-window request expires.
    /// Zero when the principal is not currently limited.
    pub fn retry_after_secs(&self, principal: i64) -> u64 {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        let Some(bucket) = buckets.get_mut(&principal) else {
            return 0;
        };
        Self::prune(bucket, now, self.window);
        if bucket.len() < self.max_requests as usize {
            return 0;
        }
        match bucket.front() {
            Some(oldest) => {
                let elapsed = now.duration_since(*oldest);
                self.window.saturating_sub(elapsed).as_secs().max(1)
            }
            None => 0,
        }
    }

    /// Remaining requests for a principal without consuming one.
    pub fn remaining(&self, principal: i64) -> u32 {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        let Some(bucket) = buckets.get_mut(&principal) else {
            return self.max_requests;
        };
        Self::prune(bucket, now, self.window);
        self.max_requests.saturating_sub(bucket.len() as u32)
    }

    /// Drop buckets whose most recent entry is older than twice the window.
    /// Called periodically to bound memory.
    pub fn sweep(&self) {
        let now = Instant::now();
        let stale_cutoff = self.window * 2;
        let mut buckets = self.buckets.lock().unwrap();
        buckets.retain(|_, bucket| {
            bucket
                .back()
                .is_some_and(|last| now.duration_since(*last) < stale_cutoff)
        });
    }

    fn prune(bucket: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while bucket
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            bucket.pop_front();
        }
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check_and_consume(1).0);
        assert!(limiter.check_and_consume(1).0);
        assert!(limiter.check_and_consume(1).0);
        assert!(!limiter.check_and_consume(1).0);
    }

    #[test]
    fn test_remaining_counts_down() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert_eq!(limiter.check_and_consume(1), (true, 2));
        assert_eq!(limiter.check_and_consume(1), (true, 1));
        assert_eq!(limiter.check_and_consume(1), (true, 0));
        assert_eq!(limiter.check_and_consume(1), (false, 0));
    }

    #[test]
    fn test_principals_isolated() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check_and_consume(1).0);
        assert!(limiter.check_and_consume(2).0);
        assert!(!limiter.check_and_consume(1).0);
        assert!(!limiter.check_and_consume(2).0);
    }

    #[test]
    fn test_zero_limit_unlimited() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        for _ in 0..1000 {
            assert!(limiter.check_and_consume(7).0);
        }
    }

    #[test]
    fn test_window_expiry_readmits() {
        let limiter = RateLimiter::new(1, Duration::from_millis(40));
        assert!(limiter.check_and_consume(1).0);
        assert!(!limiter.check_and_consume(1).0);
        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check_and_consume(1).0);
    }

    #[test]
    fn test_retry_after_positive_when_limited() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.check_and_consume(1);
        let wait = limiter.retry_after_secs(1);
        assert!(wait >= 1 && wait <= 60);
        assert_eq!(limiter.retry_after_secs(2), 0);
    }

    #[test]
    fn test_sweep_evicts_stale_buckets() {
        let limiter = RateLimiter::new(5, Duration::from_millis(10));
        limiter.check_and_consume(1);
        limiter.check_and_consume(2);
        assert_eq!(limiter.bucket_count(), 2);
        std::thread::sleep(Duration::from_millis(30));
        limiter.sweep();
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_sweep_keeps_recent_buckets() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        limiter.check_and_consume(1);
        limiter.sweep();
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_sliding_window_bound_holds() {
        // No more than `max` admissions land inside any window.
        let limiter = RateLimiter::new(4, Duration::from_secs(60));
        let mut admitted = 0;
        for _ in 0..50 {
            if limiter.check_and_consume(9).0 {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 4);
    }
}
