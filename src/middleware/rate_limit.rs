//! Per-key sliding-window admission control.
//!
//! In-memory, single-instance. Keys are client IPs; each key holds the
//! monotonic timestamps of its admitted requests within the window.
//! `record` is called only after the downstream handler returned 200, so
//! failed requests never count against the bucket.

use dashmap::DashMap;
use std::time::{Duration, Instant};

pub struct SlidingWindowRateLimiter {
    max_requests: usize,
    window: Duration,
    buckets: DashMap<String, Vec<Instant>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(max_requests: usize, window_seconds: f64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs_f64(window_seconds),
            buckets: DashMap::new(),
        }
    }

    /// Returns `(allowed, retry_after_seconds)`; `retry_after` is 0 when
    /// allowed, otherwise at least 1.
    pub fn is_allowed(&self, key: &str) -> (bool, u64) {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(key.to_string()).or_default();
        bucket.retain(|t| now.duration_since(*t) < self.window);

        if bucket.len() < self.max_requests {
            return (true, 0);
        }

        // Full — next slot opens when the oldest timestamp ages out.
        let oldest = bucket.iter().min().copied().unwrap_or(now);
        let remaining = self
            .window
            .saturating_sub(now.duration_since(oldest))
            .as_secs_f64();
        let retry_after = (remaining.floor() as u64 + 1).max(1);
        (false, retry_after)
    }

    /// Record an admitted request. Call after the response committed.
    pub fn record(&self, key: &str) {
        self.buckets
            .entry(key.to_string())
            .or_default()
            .push(Instant::now());
    }
}
