// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Server Configuration
//!
//! Configuration loaded from `RELAY_*` environment variables on top of defaults.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::backlog;
use crate::error::RelayError;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// WebSocket listen address.
    pub listen_addr: SocketAddr,
    /// Health, presence and metrics listen address.
    pub metrics_addr: SocketAddr,
    /// Maximum concurrent sockets.
    pub max_connections: usize,
    /// Maximum inbound text frame size in bytes.
    pub max_message_size: usize,
    /// Per-recipient backlog capacity (oldest evicted beyond this).
    pub backlog_capacity: usize,
    /// Per-session outbound buffer, in messages.
    pub outbound_buffer: usize,
    /// Inbound messages per minute per user. Zero disables limiting.
    pub rate_limit_per_min: u32,
    /// Seconds without an inbound frame before a session is closed.
    pub idle_timeout_secs: u64,
    /// Seconds allowed for the WebSocket upgrade (slowloris protection).
    pub handshake_timeout_secs: u64,
    /// HS256 secret shared with the auth service. `None` trusts the path identity.
    pub auth_secret: Option<String>,
    /// Bearer token protecting `/metrics`.
    pub metrics_token: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            metrics_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            max_connections: 1000,
            max_message_size: 64 * 1024,
            backlog_capacity: backlog::DEFAULT_CAPACITY,
            outbound_buffer: 256,
            rate_limit_per_min: 120,
            idle_timeout_secs: 300, // 5 minutes
            handshake_timeout_secs: 10,
            auth_secret: None,
            metrics_token: None,
        }
    }
}

/// Overwrites `target` when `var` is set and parses; bad values are logged and ignored.
fn override_from_env<T: FromStr>(var: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("Ignoring unparsable {}={:?}", var, raw),
        }
    }
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        override_from_env("RELAY_LISTEN_ADDR", &mut config.listen_addr);
        override_from_env("RELAY_METRICS_ADDR", &mut config.metrics_addr);
        override_from_env("RELAY_MAX_CONNECTIONS", &mut config.max_connections);
        override_from_env("RELAY_MAX_MESSAGE_SIZE", &mut config.max_message_size);
        override_from_env("RELAY_BACKLOG_CAPACITY", &mut config.backlog_capacity);
        override_from_env("RELAY_OUTBOUND_BUFFER", &mut config.outbound_buffer);
        override_from_env("RELAY_RATE_LIMIT", &mut config.rate_limit_per_min);
        override_from_env("RELAY_IDLE_TIMEOUT", &mut config.idle_timeout_secs);
        override_from_env("RELAY_HANDSHAKE_TIMEOUT", &mut config.handshake_timeout_secs);

        config.auth_secret = std::env::var("RELAY_AUTH_SECRET")
            .ok()
            .filter(|s| !s.is_empty());
        config.metrics_token = std::env::var("RELAY_METRICS_TOKEN")
            .ok()
            .filter(|s| !s.is_empty());

        config
    }

    /// Rejects settings the relay cannot run with.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.backlog_capacity == 0 {
            return Err(RelayError::Config("backlog_capacity must be > 0".into()));
        }
        if self.max_message_size == 0 {
            return Err(RelayError::Config("max_message_size must be > 0".into()));
        }
        if self.outbound_buffer == 0 {
            return Err(RelayError::Config("outbound_buffer must be > 0".into()));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}
