// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat messages as they flow through the relay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::identity::UserId;

/// One chat message. Immutable once created; delivered or queued exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Relay-wide monotonic id.
    pub id: u64,
    pub from: UserId,
    pub to: UserId,
    /// Trimmed, non-empty UTF-8 body.
    pub body: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub ts_millis: u64,
}

/// Hands out monotonic message ids.
#[derive(Debug, Default)]
pub struct MessageIds {
    next: AtomicU64,
}

impl MessageIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a message from a raw inbound frame.
    ///
    /// Leading and trailing whitespace is trimmed; a body that is empty after
    /// trimming yields `None` and consumes no id.
    pub fn compose(&self, from: &UserId, to: &UserId, raw: &str) -> Option<Message> {
        let body = raw.trim();
        if body.is_empty() {
            return None;
        }
        Some(Message {
            id: self.next.fetch_add(1, Ordering::Relaxed) + 1,
            from: from.clone(),
            to: to.clone(),
            body: body.to_string(),
            ts_millis: now_millis(),
        })
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
