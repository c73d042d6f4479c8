// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Limiting
//!
//! Caps concurrent sockets. A slot is held for the lifetime of the
//! per-socket task and released when its permit drops.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    slots: Arc<Semaphore>,
    max_connections: usize,
}

/// RAII slot; dropping it frees the connection slot.
#[derive(Debug)]
pub struct ConnectionGuard {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionLimiter {
    pub fn new(max_connections: usize) -> Self {
        ConnectionLimiter {
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Takes a slot, or `None` when at capacity.
    pub fn try_acquire(&self) -> Option<ConnectionGuard> {
        self.slots
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| ConnectionGuard { _permit: permit })
    }

    pub fn active_count(&self) -> usize {
        self.max_connections - self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_allows_under_limit() {
        let limiter = ConnectionLimiter::new(3);
        let _g1 = limiter.try_acquire().expect("first");
        let _g2 = limiter.try_acquire().expect("second");
        assert_eq!(limiter.active_count(), 2);
    }

    #[test]
    fn test_rejects_at_limit() {
        let limiter = ConnectionLimiter::new(2);
        let _g1 = limiter.try_acquire().unwrap();
        let _g2 = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let limiter = ConnectionLimiter::new(1);
        {
            let _guard = limiter.try_acquire().unwrap();
            assert_eq!(limiter.active_count(), 1);
        }
        assert_eq!(limiter.active_count(), 0);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_zero_max_connections_rejects_all() {
        let limiter = ConnectionLimiter::new(0);
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.max_connections(), 0);
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_limit() {
        let limiter = ConnectionLimiter::new(10);
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || {
                    let guard = limiter.try_acquire();
                    assert!(limiter.active_count() <= 10);
                    thread::sleep(std::time::Duration::from_millis(5));
                    guard.is_some()
                })
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert!(granted >= 10);
        assert_eq!(limiter.active_count(), 0);
    }
}
