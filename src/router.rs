// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Router
//!
//! Resolves a message's recipient to live sessions and forwards it, or
//! parks it in the recipient's backlog when they are offline.
//!
//! Fan-out policy: if the recipient has sessions opened for the sender's
//! conversation, only those receive the message; otherwise every session
//! of the recipient does. Forwarding is a non-blocking push onto each
//! target's outbound channel, so one slow or dead session never holds up
//! the others.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::backlog::Backlog;
use crate::connection_registry::{ConnectionRegistry, SessionHandle};
use crate::identity::UserId;
use crate::message::{Message, MessageIds};
use crate::metrics::RelayMetrics;

/// Why a message (or a queued entry) was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Evicted from a full backlog to make room for a newer message.
    BacklogOverflow,
    /// Every target session failed to accept the frame.
    WriteFailure,
}

impl DropReason {
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::BacklogOverflow => "backlog_overflow",
            DropReason::WriteFailure => "write_failure",
        }
    }
}

/// Result of dispatching one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Forwarded to this many live sessions.
    Delivered(usize),
    /// Recipient offline; stored in their backlog.
    Queued,
    Dropped(DropReason),
}

/// Full dispatch result, including any backlog entry the message displaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcome: DeliveryOutcome,
    /// Oldest backlog entry evicted to make room. Its outcome is
    /// `Dropped(BacklogOverflow)`; it is reported here and nowhere else.
    pub evicted: Option<Message>,
}

/// Routes messages between sessions. Shared by every session task.
pub struct Router {
    registry: Arc<ConnectionRegistry>,
    backlog: Arc<Backlog>,
    ids: MessageIds,
    metrics: RelayMetrics,
}

impl Router {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        backlog: Arc<Backlog>,
        metrics: RelayMetrics,
    ) -> Self {
        Router {
            registry,
            backlog,
            ids: MessageIds::new(),
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn backlog(&self) -> &Arc<Backlog> {
        &self.backlog
    }

    /// Builds a message from an inbound frame. `None` for blank bodies.
    pub fn compose(&self, from: &UserId, to: &UserId, raw: &str) -> Option<Message> {
        self.ids.compose(from, to, raw)
    }

    /// Registers a session and takes the backlog entries for its conversation.
    ///
    /// Registration and drain happen under the backlog lock, the same lock
    /// dispatch holds while deciding to enqueue. A concurrent message is
    /// therefore either in the returned batch or is routed live to the new
    /// session after it. The caller must write the batch before anything
    /// from the session's outbound channel.
    pub fn attach(&self, handle: SessionHandle) -> Vec<Message> {
        let (owner, peer) = (handle.owner.clone(), handle.peer.clone());
        let (pending, depth) = {
            let mut queues = self.backlog.lock();
            self.registry.register(handle);
            let pending = queues.drain_from(&owner, &peer);
            (pending, queues.total())
        };
        self.metrics.sessions_open.inc();
        self.metrics.backlog_messages.set(depth as i64);
        pending
    }

    /// Removes a session from the registry. Safe to call more than once.
    pub fn detach(&self, handle: &SessionHandle) -> bool {
        let removed = self.registry.unregister(&handle.owner, handle.id);
        if removed {
            self.metrics.sessions_open.dec();
        }
        removed
    }

    /// Routes one message, returning only its outcome.
    pub fn dispatch(&self, msg: Message) -> DeliveryOutcome {
        self.dispatch_report(msg).outcome
    }

    /// Routes one message.
    pub fn dispatch_report(&self, msg: Message) -> DispatchReport {
        let started = Instant::now();
        let report = self.route(msg);
        self.metrics
            .message_duration
            .observe(started.elapsed().as_secs_f64());
        report
    }

    fn route(&self, msg: Message) -> DispatchReport {
        let mut queues = self.backlog.lock();
        let sessions = self.registry.sessions_for(&msg.to);
        if sessions.is_empty() {
            let msg_id = msg.id;
            let evicted = queues.push(msg);
            let depth = queues.total();
            drop(queues);

            self.metrics.messages_queued.inc();
            self.metrics.backlog_messages.set(depth as i64);
            if let Some(ref old) = evicted {
                warn!(
                    evicted_id = old.id,
                    recipient = %old.to,
                    "Backlog full, evicted oldest message"
                );
                self.metrics
                    .messages_dropped
                    .with_label_values(&[DropReason::BacklogOverflow.label()])
                    .inc();
            }
            debug!(message_id = msg_id, "Recipient offline, message queued");
            return DispatchReport {
                outcome: DeliveryOutcome::Queued,
                evicted,
            };
        }

        // A recipient attached for another conversation can still have
        // entries queued from this sender. They go out ahead of `msg`.
        let stranded = queues.drain_from(&msg.to, &msg.from);
        let targets = select_targets(sessions, &msg.from);
        let mut failed = vec![false; targets.len()];

        // Channel pushes never block, so forwarding under the lock keeps
        // concurrent dispatches for one pair in arrival order.
        if !stranded.is_empty() {
            debug!(
                message_id = msg.id,
                count = stranded.len(),
                "Forwarding queued entries ahead of live message"
            );
            for entry in stranded {
                let delivered = self.forward(&targets, &mut failed, &Arc::new(entry));
                self.record_forward(delivered);
            }
            self.metrics.backlog_messages.set(queues.total() as i64);
        }
        let delivered = self.forward(&targets, &mut failed, &Arc::new(msg));
        drop(queues);

        let outcome = self.record_forward(delivered);
        DispatchReport {
            outcome,
            evicted: None,
        }
    }

    /// Pushes `msg` to each target that has not failed during this dispatch.
    /// A target that fails is asked to shut down and skipped afterwards, so
    /// it never receives a later entry without an earlier one.
    fn forward(
        &self,
        targets: &[SessionHandle],
        failed: &mut [bool],
        msg: &Arc<Message>,
    ) -> usize {
        let mut delivered = 0;
        for (target, failed) in targets.iter().zip(failed.iter_mut()) {
            if *failed {
                continue;
            }
            match target.try_deliver(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        session = %target.id.short(),
                        message_id = msg.id,
                        "Forward failed ({}), closing session",
                        e
                    );
                    target.request_shutdown();
                    *failed = true;
                }
            }
        }
        delivered
    }

    fn record_forward(&self, delivered: usize) -> DeliveryOutcome {
        if delivered > 0 {
            self.metrics.messages_delivered.inc_by(delivered as u64);
            DeliveryOutcome::Delivered(delivered)
        } else {
            self.metrics
                .messages_dropped
                .with_label_values(&[DropReason::WriteFailure.label()])
                .inc();
            DeliveryOutcome::Dropped(DropReason::WriteFailure)
        }
    }
}

/// Applies the fan-out policy to a recipient's live sessions.
fn select_targets(sessions: Vec<SessionHandle>, sender: &UserId) -> Vec<SessionHandle> {
    if sessions.iter().any(|s| s.is_scoped_to(sender)) {
        sessions
            .into_iter()
            .filter(|s| s.is_scoped_to(sender))
            .collect()
    } else {
        sessions
    }
}
