// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Rate Limiting
//!
//! Per-user token bucket applied to inbound chat frames. Buckets are shared
//! by all of a user's sessions, so opening more windows does not raise the
//! allowance.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::identity::UserId;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn full(capacity: f64) -> Self {
        TokenBucket {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_consume(&mut self, capacity: f64, refill_per_sec: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rate limiter keyed by user. A limit of zero disables limiting.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<UserId, TokenBucket>>,
    max_per_minute: u32,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        RateLimiter {
            buckets: Mutex::new(HashMap::new()),
            max_per_minute,
        }
    }

    /// Tries to consume a token. Returns false if the user is rate limited.
    pub fn consume(&self, user_id: &UserId) -> bool {
        if self.max_per_minute == 0 {
            return true;
        }
        let capacity = self.max_per_minute as f64;
        let mut buckets = self.buckets.lock();
        buckets
            .entry(user_id.clone())
            .or_insert_with(|| TokenBucket::full(capacity))
            .try_consume(capacity, capacity / 60.0)
    }

    /// Drops buckets idle longer than `max_idle`. Returns how many were removed.
    pub fn cleanup_inactive(&self, max_idle: Duration) -> usize {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let before = buckets.len();
        buckets.retain(|_, b| now.duration_since(b.last_update) < max_idle);
        before - buckets.len()
    }

    pub fn tracked_users(&self) -> usize {
        self.buckets.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[test]
    fn test_allows_burst_up_to_limit() {
        let limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.consume(&user("u1")));
        }
        assert!(!limiter.consume(&user("u1")));
    }

    #[test]
    fn test_users_have_separate_buckets() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.consume(&user("u1")));
        assert!(limiter.consume(&user("u1")));
        assert!(!limiter.consume(&user("u1")));

        assert!(limiter.consume(&user("u2")));
    }

    #[test]
    fn test_zero_disables_limiting() {
        let limiter = RateLimiter::new(0);
        for _ in 0..1000 {
            assert!(limiter.consume(&user("u1")));
        }
        assert_eq!(limiter.tracked_users(), 0);
    }

    #[test]
    fn test_refills_over_time() {
        // 600/min = 10 tokens per second
        let limiter = RateLimiter::new(600);
        for _ in 0..600 {
            limiter.consume(&user("u1"));
        }
        assert!(!limiter.consume(&user("u1")));

        thread::sleep(Duration::from_millis(250));
        assert!(limiter.consume(&user("u1")));
    }

    #[test]
    fn test_cleanup_inactive() {
        let limiter = RateLimiter::new(10);
        limiter.consume(&user("u1"));
        limiter.consume(&user("u2"));

        assert_eq!(limiter.cleanup_inactive(Duration::from_secs(3600)), 0);
        assert_eq!(limiter.tracked_users(), 2);

        thread::sleep(Duration::from_millis(10));
        limiter.consume(&user("u1"));
        assert_eq!(limiter.cleanup_inactive(Duration::from_millis(5)), 1);
        assert_eq!(limiter.tracked_users(), 1);
    }
}
