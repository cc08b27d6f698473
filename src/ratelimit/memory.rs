//! In-process sliding window rate limiter.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::{RateLimitBackend, RateLimitDecision};
use crate::error::Result;

/// Sliding window rate limiter with one window per identifier.
///
/// Tracks admission timestamps and admits at most `capacity` requests per
/// identifier within any trailing `window`. Denied attempts are not
/// recorded, so a client that keeps retrying regains capacity as soon as
/// its oldest admission leaves the window.
///
/// Each identifier's window lives in its own `DashMap` entry; checks for
/// different clients never contend on a shared lock. Identifiers whose
/// admissions have all expired are swept at most once per window, so the
/// map only holds clients seen within roughly the last two windows.
pub struct SlidingWindowLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
    capacity: u32,
    window: Duration,
    last_sweep: Mutex<Instant>,
}

impl SlidingWindowLimiter {
    /// Creates a new rate limiter.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum requests allowed within the window
    /// * `window` - Duration of the sliding window
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            capacity,
            window,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Returns the number of requests `identifier` can make immediately.
    pub fn available(&self, identifier: &str) -> u32 {
        let now = Instant::now();
        match self.windows.get_mut(identifier) {
            Some(mut timestamps) => {
                Self::evict(&mut timestamps, now, self.window);
                self.capacity.saturating_sub(timestamps.len() as u32)
            }
            None => self.capacity,
        }
    }

    /// Number of identifiers currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Drops every identifier with no admission left in the window.
    ///
    /// Must not be called while holding a guard into `windows`.
    fn sweep_expired(&self, now: Instant) {
        let Ok(mut last) = self.last_sweep.try_lock() else {
            // Another caller is already sweeping.
            return;
        };
        if now.duration_since(*last) < self.window {
            return;
        }
        *last = now;
        drop(last);

        let before = self.windows.len();
        self.windows.retain(|_, timestamps| {
            Self::evict(timestamps, now, self.window);
            !timestamps.is_empty()
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, remaining = self.windows.len(), "Swept idle rate limit windows");
        }
    }

    fn evict(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&ts) = timestamps.front() {
            if now.duration_since(ts) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl RateLimitBackend for SlidingWindowLimiter {
    async fn limit(&self, identifier: &str) -> Result<RateLimitDecision> {
        let now = Instant::now();
        self.sweep_expired(now);

        let mut timestamps = self
            .windows
            .entry(identifier.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity as usize));

        Self::evict(&mut timestamps, now, self.window);

        let success = (timestamps.len() as u32) < self.capacity;
        if success {
            timestamps.push_back(now);
        }

        // Time until the oldest admission leaves the window.
        let until_reset = timestamps
            .front()
            .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
            .unwrap_or_default();
        let reset = Utc::now().timestamp_millis().max(0) as u64 + until_reset.as_millis() as u64;
        let remaining = self.capacity.saturating_sub(timestamps.len() as u32);
        let empty = timestamps.is_empty();
        drop(timestamps);

        // A denied client with nothing in its window (zero capacity) holds no state.
        if empty {
            self.windows.remove_if(identifier, |_, ts| ts.is_empty());
        }

        Ok(RateLimitDecision {
            success,
            limit: self.capacity,
            remaining,
            reset,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admits_up_to_capacity() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));
        for expected_remaining in [2, 1, 0] {
            let d = limiter.limit("ip").await.unwrap();
            assert!(d.success);
            assert_eq!(d.remaining, expected_remaining);
            assert_eq!(d.limit, 3);
        }
        let d = limiter.limit("ip").await.unwrap();
        assert!(!d.success);
        assert_eq!(d.remaining, 0);
    }

    #[tokio::test]
    async fn test_identifiers_are_isolated() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.limit("a").await.unwrap().success);
        assert!(!limiter.limit("a").await.unwrap().success);
        assert!(limiter.limit("b").await.unwrap().success);
        assert_eq!(limiter.tracked(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = SlidingWindowLimiter::new(10, Duration::from_secs(60));
        for _ in 0..5 {
            assert!(limiter.limit("ip").await.unwrap().success);
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        for _ in 0..5 {
            assert!(limiter.limit("ip").await.unwrap().success);
        }
        assert!(!limiter.limit("ip").await.unwrap().success);

        // The first five admissions expire; the later five are still counted.
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(limiter.available("ip"), 5);
        for _ in 0..5 {
            assert!(limiter.limit("ip").await.unwrap().success);
        }
        assert!(!limiter.limit("ip").await.unwrap().success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_attempts_do_not_extend_the_window() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.limit("ip").await.unwrap().success);
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(10)).await;
            assert!(!limiter.limit("ip").await.unwrap().success);
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.limit("ip").await.unwrap().success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_identifiers_are_swept() {
        let limiter = SlidingWindowLimiter::new(10, Duration::from_secs(60));
        for i in 0..5000 {
            assert!(limiter.limit(&format!("spoofed-{}", i)).await.unwrap().success);
        }
        assert_eq!(limiter.tracked(), 5000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(limiter.limit("real").await.unwrap().success);
        assert_eq!(limiter.tracked(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_active_identifiers() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.limit("old").await.unwrap().success);
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(limiter.limit("recent").await.unwrap().success);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(limiter.limit("new").await.unwrap().success);
        assert_eq!(limiter.tracked(), 2);
        assert_eq!(limiter.available("recent"), 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_tracks_nothing() {
        let limiter = SlidingWindowLimiter::new(0, Duration::from_secs(60));
        for i in 0..10 {
            assert!(!limiter.limit(&format!("ip-{}", i)).await.unwrap().success);
        }
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_available_for_unknown_identifier() {
        let limiter = SlidingWindowLimiter::new(10, Duration::from_secs(60));
        assert_eq!(limiter.available("nobody"), 10);
    }
}
