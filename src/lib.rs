// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Real-time direct-messaging relay.
//!
//! Clients open `/ws/{selfId}/{peerId}` and exchange plain-text frames.
//! Messages for recipients without a live session wait in a bounded
//! per-recipient backlog and are flushed, in order, when they reconnect.

pub mod auth;
pub mod backlog;
pub mod config;
pub mod connection_limit;
pub mod connection_registry;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod http;
pub mod identity;
pub mod message;
pub mod metrics;
pub mod rate_limit;
pub mod router;
pub mod server;
pub mod session;

pub use error::RelayError;
pub use identity::{SessionId, UserId};
pub use message::Message;
pub use router::{DeliveryOutcome, DropReason, Router};
pub use server::Relay;
