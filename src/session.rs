// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Session lifecycle.
//!
//! ```text
//! CONNECTING ──validated──▶ OPEN ──close/shutdown/write error──▶ CLOSING ──unregistered──▶ CLOSED
//!      └──────────────refused (AuthMismatch, bad path)──────────────────────────────────────▲
//! ```

use std::fmt;

use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Open) | (Connecting, Closed) | (Open, Closing) | (Closing, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connecting => "CONNECTING",
            SessionState::Open => "OPEN",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Why a session left OPEN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client closed the socket or the stream ended. Normal path.
    TransportDisconnect,
    IdleTimeout,
    WriteFailure,
    /// Server-initiated: slow consumer or relay shutdown.
    ServerShutdown,
    /// Refused during CONNECTING, or a fatal error on an inbound frame.
    Refused(RelayError),
}

/// What an inbound WebSocket frame means to an OPEN session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A chat message body, untrimmed.
    Chat(String),
    /// The client started the close handshake.
    Close,
    /// Binary, ping, pong and raw frames carry nothing for the relay.
    Ignored { kind: &'static str, len: usize },
}

impl From<WsMessage> for InboundFrame {
    fn from(frame: WsMessage) -> Self {
        match frame {
            WsMessage::Text(text) => InboundFrame::Chat(text),
            WsMessage::Close(_) => InboundFrame::Close,
            WsMessage::Binary(data) => InboundFrame::Ignored {
                kind: "binary",
                len: data.len(),
            },
            WsMessage::Ping(data) => InboundFrame::Ignored {
                kind: "ping",
                len: data.len(),
            },
            WsMessage::Pong(data) => InboundFrame::Ignored {
                kind: "pong",
                len: data.len(),
            },
            WsMessage::Frame(frame) => InboundFrame::Ignored {
                kind: "frame",
                len: frame.len(),
            },
        }
    }
}

/// Tracks one socket's state and rejects illegal transitions.
#[derive(Debug)]
pub struct Lifecycle {
    label: String,
    state: SessionState,
}

impl Lifecycle {
    pub fn new(label: impl Into<String>) -> Self {
        Lifecycle {
            label: label.into(),
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Moves to `next`. Returns false (and stays put) on an illegal transition.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                "[{}] Ignoring illegal transition {} -> {}",
                self.label, self.state, next
            );
            return false;
        }
        debug!("[{}] {} -> {}", self.label, self.state, next);
        self.state = next;
        true
    }
}
