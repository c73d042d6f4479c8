// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Prometheus Metrics for the DM Relay
//!
//! Provides observability metrics for monitoring the relay server.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;

/// Relay server metrics.
#[derive(Clone)]
pub struct RelayMetrics {
    /// Registry for all metrics.
    pub registry: Arc<Registry>,

    // Connection metrics
    /// Total WebSocket connections accepted.
    pub connections_total: IntCounter,
    /// Current active WebSocket connections.
    pub connections_active: IntGauge,
    /// Connection errors (handshake failures, capacity rejections, etc.).
    pub connection_errors: IntCounter,
    /// Sessions refused during identity validation.
    pub auth_failures: IntCounter,
    /// Sessions currently registered (OPEN).
    pub sessions_open: IntGauge,

    // Message metrics
    /// Inbound chat messages accepted from clients.
    pub messages_received: IntCounter,
    /// Per-session deliveries (one message fanned out to two sessions counts twice).
    pub messages_delivered: IntCounter,
    /// Messages placed in an offline backlog.
    pub messages_queued: IntCounter,
    /// Messages dropped, by reason (`backlog_overflow`, `write_failure`).
    pub messages_dropped: IntCounterVec,
    /// Inbound frames rejected, by reason (`too_large`, `rate_limited`).
    pub messages_rejected: IntCounterVec,
    /// Dispatch duration in seconds.
    pub message_duration: Histogram,

    // Backlog
    /// Messages currently waiting in offline backlogs.
    pub backlog_messages: IntGauge,
}

impl RelayMetrics {
    /// Creates a new metrics instance with all collectors registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = IntCounter::with_opts(Opts::new(
            "relay_connections_total",
            "Total WebSocket connections accepted",
        ))
        .expect("valid metric");

        let connections_active = IntGauge::with_opts(Opts::new(
            "relay_connections_active",
            "Current active WebSocket connections",
        ))
        .expect("valid metric");

        let connection_errors = IntCounter::with_opts(Opts::new(
            "relay_connection_errors_total",
            "Total connection errors",
        ))
        .expect("valid metric");

        let auth_failures = IntCounter::with_opts(Opts::new(
            "relay_auth_failures_total",
            "Sessions refused during identity validation",
        ))
        .expect("valid metric");

        let sessions_open = IntGauge::with_opts(Opts::new(
            "relay_sessions_open",
            "Sessions currently registered",
        ))
        .expect("valid metric");

        let messages_received = IntCounter::with_opts(Opts::new(
            "relay_messages_received_total",
            "Chat messages received from clients",
        ))
        .expect("valid metric");

        let messages_delivered = IntCounter::with_opts(Opts::new(
            "relay_messages_delivered_total",
            "Per-session message deliveries",
        ))
        .expect("valid metric");

        let messages_queued = IntCounter::with_opts(Opts::new(
            "relay_messages_queued_total",
            "Messages queued for offline recipients",
        ))
        .expect("valid metric");

        let messages_dropped = IntCounterVec::new(
            Opts::new("relay_messages_dropped_total", "Messages dropped"),
            &["reason"],
        )
        .expect("valid metric");

        let messages_rejected = IntCounterVec::new(
            Opts::new(
                "relay_messages_rejected_total",
                "Inbound frames rejected",
            ),
            &["reason"],
        )
        .expect("valid metric");

        let message_duration = Histogram::with_opts(HistogramOpts::new(
            "relay_message_duration_seconds",
            "Message dispatch duration in seconds",
        ))
        .expect("valid metric");

        let backlog_messages = IntGauge::with_opts(Opts::new(
            "relay_backlog_messages",
            "Messages waiting in offline backlogs",
        ))
        .expect("valid metric");

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(connections_total.clone()),
            Box::new(connections_active.clone()),
            Box::new(connection_errors.clone()),
            Box::new(auth_failures.clone()),
            Box::new(sessions_open.clone()),
            Box::new(messages_received.clone()),
            Box::new(messages_delivered.clone()),
            Box::new(messages_queued.clone()),
            Box::new(messages_dropped.clone()),
            Box::new(messages_rejected.clone()),
            Box::new(message_duration.clone()),
            Box::new(backlog_messages.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .expect("metric names are unique");
        }

        RelayMetrics {
            registry: Arc::new(registry),
            connections_total,
            connections_active,
            connection_errors,
            auth_failures,
            sessions_open,
            messages_received,
            messages_delivered,
            messages_queued,
            messages_dropped,
            messages_rejected,
            message_duration,
            backlog_messages,
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
