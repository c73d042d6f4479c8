// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Offline Backlog
//!
//! Bounded per-recipient buffers for messages sent while the recipient has
//! no live session. Entries are kept in send order and flushed when a session
//! for the matching conversation attaches.
//!
//! [`DeliveryQueue`] is a plain data structure with no locking of its own;
//! [`Backlog`] owns one queue per recipient behind a single mutex. The router
//! holds that mutex across "look up recipient, then enqueue" and across
//! "register session, then drain", which is what keeps a queued message from
//! being stranded by a concurrent reconnect.

use std::collections::{HashMap, VecDeque};

use parking_lot::{Mutex, MutexGuard};

use crate::identity::UserId;
use crate::message::Message;

/// Default per-recipient capacity.
pub const DEFAULT_CAPACITY: usize = 200;

/// FIFO of undelivered messages for one recipient, bounded at `capacity`.
///
/// When full, the oldest entry is evicted to make room ("keep most recent").
#[derive(Debug)]
pub struct DeliveryQueue {
    entries: VecDeque<Message>,
    capacity: usize,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        DeliveryQueue {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Appends a message, returning the evicted oldest entry if the queue was full.
    pub fn push(&mut self, msg: Message) -> Option<Message> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(msg);
        evicted
    }

    /// Returns and removes every entry, oldest first.
    pub fn drain_all(&mut self) -> Vec<Message> {
        self.entries.drain(..).collect()
    }

    /// Returns and removes the entries sent by `sender`, oldest first.
    /// Entries from other senders keep their relative order.
    pub fn drain_from(&mut self, sender: &UserId) -> Vec<Message> {
        let (taken, kept): (VecDeque<Message>, VecDeque<Message>) =
            self.entries.drain(..).partition(|m| &m.from == sender);
        self.entries = kept;
        taken.into()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-recipient queues. Obtained through [`Backlog::lock`].
#[derive(Debug)]
pub struct Queues {
    capacity: usize,
    by_recipient: HashMap<UserId, DeliveryQueue>,
    evicted_total: u64,
}

impl Queues {
    /// Queues a message for `msg.to`. Returns the evicted entry on overflow.
    pub fn push(&mut self, msg: Message) -> Option<Message> {
        let capacity = self.capacity;
        let evicted = self
            .by_recipient
            .entry(msg.to.clone())
            .or_insert_with(|| DeliveryQueue::new(capacity))
            .push(msg);
        if evicted.is_some() {
            self.evicted_total += 1;
        }
        evicted
    }

    /// Drains the recipient's entries that were sent by `sender`.
    pub fn drain_from(&mut self, recipient: &UserId, sender: &UserId) -> Vec<Message> {
        let Some(queue) = self.by_recipient.get_mut(recipient) else {
            return Vec::new();
        };
        let drained = queue.drain_from(sender);
        if queue.is_empty() {
            self.by_recipient.remove(recipient);
        }
        drained
    }

    /// Drains every entry queued for the recipient.
    pub fn drain_all(&mut self, recipient: &UserId) -> Vec<Message> {
        self.by_recipient
            .remove(recipient)
            .map(|mut q| q.drain_all())
            .unwrap_or_default()
    }

    pub fn size(&self, recipient: &UserId) -> usize {
        self.by_recipient.get(recipient).map_or(0, DeliveryQueue::size)
    }

    /// Total queued messages across all recipients.
    pub fn total(&self) -> usize {
        self.by_recipient.values().map(DeliveryQueue::size).sum()
    }

    /// Number of recipients with at least one queued message.
    pub fn recipient_count(&self) -> usize {
        self.by_recipient.len()
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }
}

/// Shared backlog for all offline recipients.
#[derive(Debug)]
pub struct Backlog {
    queues: Mutex<Queues>,
}

impl Backlog {
    pub fn new(capacity: usize) -> Self {
        Backlog {
            queues: Mutex::new(Queues {
                capacity: capacity.max(1),
                by_recipient: HashMap::new(),
                evicted_total: 0,
            }),
        }
    }

    /// Locks the backlog for a compound operation. Never hold the guard
    /// across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock()
    }

    pub fn push(&self, msg: Message) -> Option<Message> {
        self.lock().push(msg)
    }

    pub fn drain_all(&self, recipient: &UserId) -> Vec<Message> {
        self.lock().drain_all(recipient)
    }

    pub fn size(&self, recipient: &UserId) -> usize {
        self.lock().size(recipient)
    }

    pub fn total(&self) -> usize {
        self.lock().total()
    }

    pub fn evicted_total(&self) -> u64 {
        self.lock().evicted_total()
    }

    pub fn recipient_count(&self) -> usize {
        self.lock().recipient_count()
    }
}

impl Default for Backlog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
