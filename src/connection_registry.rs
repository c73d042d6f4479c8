// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Registry
//!
//! Tracks live sessions per user so the router can find delivery targets.
//! The registry is the authoritative presence source: a user is online
//! exactly when at least one of their sessions is registered.
//!
//! Each session is reachable through a [`SessionHandle`], which carries the
//! sending half of that session's bounded outbound channel and a shutdown
//! signal. Registry operations take the lock for a single map update or a
//! snapshot copy and never block on the network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tokio::sync::{mpsc, Notify};

use crate::error::RelayError;
use crate::identity::{SessionId, UserId};
use crate::message::Message;

/// Routing handle for one live session. Cloned into registry snapshots.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub owner: UserId,
    /// Conversation partner the socket was opened for.
    pub peer: UserId,
    pub created_at: SystemTime,
    outbound: mpsc::Sender<Arc<Message>>,
    shutdown: Arc<Notify>,
}

/// Session-side ends of a [`SessionHandle`].
#[derive(Debug)]
pub struct SessionChannels {
    pub outbound: mpsc::Receiver<Arc<Message>>,
    pub shutdown: Arc<Notify>,
}

impl SessionHandle {
    /// Creates a handle plus the receiving ends the session task drives.
    pub fn new(owner: UserId, peer: UserId, buffer: usize) -> (Self, SessionChannels) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let shutdown = Arc::new(Notify::new());
        let handle = SessionHandle {
            id: SessionId::new(),
            owner,
            peer,
            created_at: SystemTime::now(),
            outbound: tx,
            shutdown: shutdown.clone(),
        };
        (
            handle,
            SessionChannels {
                outbound: rx,
                shutdown,
            },
        )
    }

    /// Queues a message on the session's outbound channel without waiting.
    ///
    /// A full buffer (slow consumer) or a closed one (session tearing down)
    /// is a write failure for this session only.
    pub fn try_deliver(&self, msg: Arc<Message>) -> Result<(), RelayError> {
        self.outbound
            .try_send(msg)
            .map_err(|_| RelayError::WriteFailure)
    }

    /// Asks the session task to close (server-initiated shutdown).
    pub fn request_shutdown(&self) {
        // notify_one stores a permit, so a task that is mid-write still sees it
        self.shutdown.notify_one();
    }

    /// Whether this session is the conversation window for `peer`.
    pub fn is_scoped_to(&self, peer: &UserId) -> bool {
        &self.peer == peer
    }
}

/// Thread-safe registry of live sessions, keyed by owner.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<UserId, Vec<SessionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session under its owner. Re-registering the same session is a no-op.
    pub fn register(&self, handle: SessionHandle) {
        let mut sessions = self.sessions.write();
        let entry = sessions.entry(handle.owner.clone()).or_default();
        if entry.iter().all(|s| s.id != handle.id) {
            entry.push(handle);
        }
    }

    /// Removes a session. Returns false if it was not registered, which
    /// happens on double close.
    pub fn unregister(&self, user_id: &UserId, session_id: SessionId) -> bool {
        let mut sessions = self.sessions.write();
        let Some(entry) = sessions.get_mut(user_id) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|s| s.id != session_id);
        let removed = entry.len() < before;
        if entry.is_empty() {
            sessions.remove(user_id);
        }
        removed
    }

    /// Snapshot of the user's live sessions. Empty means offline.
    pub fn sessions_for(&self, user_id: &UserId) -> Vec<SessionHandle> {
        self.sessions
            .read()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.sessions
            .read()
            .get(user_id)
            .is_some_and(|s| !s.is_empty())
    }

    /// Number of live sessions for one user.
    pub fn session_count_for(&self, user_id: &UserId) -> usize {
        self.sessions.read().get(user_id).map_or(0, Vec::len)
    }

    /// Total number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().values().map(Vec::len).sum()
    }

    /// Number of users with at least one live session.
    pub fn online_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Signals every registered session to close. Returns how many were signalled.
    pub fn shutdown_all(&self) -> usize {
        let sessions = self.sessions.read();
        let mut count = 0;
        for handle in sessions.values().flatten() {
            handle.request_shutdown();
            count += 1;
        }
        count
    }
}
