// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Error Taxonomy
//!
//! Registry and backlog operations never fail; everything here is scoped to
//! a single session (refusal at handshake, a rejected frame, a failed write)
//! or to startup configuration.

use thiserror::Error;

use crate::identity::UserId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Upgrade path is not `/ws/{selfId}/{peerId}`.
    #[error("invalid connection path: {0}")]
    InvalidPath(String),

    /// A path segment is not a syntactically valid user id.
    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),

    /// The socket claims an owner other than the authenticated caller.
    #[error("identity mismatch: socket claims {claimed}, caller is {authenticated}")]
    AuthMismatch {
        claimed: UserId,
        authenticated: UserId,
    },

    /// No usable credentials were presented while authentication is required.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Inbound frame exceeds the configured byte limit. The session stays open.
    #[error("message too large: {size} bytes (limit {limit})")]
    MessageTooLarge { size: usize, limit: usize },

    /// Inbound frame exceeds the sender's rate limit. The session stays open.
    #[error("rate limited")]
    RateLimited,

    /// Writing to the transport (or the session's outbound buffer) failed.
    #[error("write to session failed")]
    WriteFailure,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    /// Whether the error ends the session rather than just the current frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RelayError::MessageTooLarge { .. } | RelayError::RateLimited
        )
    }

    /// Short label used for metrics and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            RelayError::InvalidPath(_) => "invalid_path",
            RelayError::InvalidUserId(_) => "invalid_user_id",
            RelayError::AuthMismatch { .. } => "auth_mismatch",
            RelayError::Unauthenticated(_) => "unauthenticated",
            RelayError::MessageTooLarge { .. } => "too_large",
            RelayError::RateLimited => "rate_limited",
            RelayError::WriteFailure => "write_failure",
            RelayError::Config(_) => "config",
        }
    }
}
