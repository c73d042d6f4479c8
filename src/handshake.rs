// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Upgrade request capture and route parsing.
//!
//! The relay serves one WebSocket route, `/ws/{selfId}/{peerId}`. The path
//! and any bearer token are captured from the HTTP upgrade request while
//! tungstenite performs the handshake; validation happens afterwards, once
//! the session exists, so refusals can be reported with a close frame.

use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use crate::error::RelayError;
use crate::identity::UserId;

/// What the relay needs from the HTTP upgrade request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub path: String,
    /// Bearer token from `Authorization`, or `?token=` for browser clients
    /// that cannot set headers on a WebSocket.
    pub token: Option<String>,
}

impl UpgradeRequest {
    pub fn from_request(req: &Request) -> Self {
        let header_token = req
            .headers()
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.trim().to_string());

        let query_token = req.uri().query().and_then(|q| {
            q.split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(k, _)| *k == "token")
                .map(|(_, v)| v.to_string())
        });

        UpgradeRequest {
            path: req.uri().path().to_string(),
            token: header_token.or(query_token).filter(|t| !t.is_empty()),
        }
    }
}

/// Returns a handshake callback that records the upgrade request into `slot`.
pub fn capture(
    slot: &mut Option<UpgradeRequest>,
) -> impl FnOnce(&Request, Response) -> Result<Response, ErrorResponse> + '_ {
    move |req: &Request, response: Response| {
        *slot = Some(UpgradeRequest::from_request(req));
        Ok(response)
    }
}

/// The (owner, peer) pair a socket is opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub owner: UserId,
    pub peer: UserId,
}

/// Parses `/ws/{selfId}/{peerId}` (a trailing slash is tolerated).
pub fn parse_route(path: &str) -> Result<Route, RelayError> {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let mut segments = trimmed.split('/');

    match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(""), Some("ws"), Some(owner), Some(peer), None) => Ok(Route {
            owner: UserId::parse(owner)?,
            peer: UserId::parse(peer)?,
        }),
        _ => Err(RelayError::InvalidPath(path.to_string())),
    }
}
