// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! DM Relay Server
//!
//! Provides:
//! - WebSocket endpoint `/ws/{selfId}/{peerId}` for live chat
//! - Offline backlog with in-order flush on reconnect
//! - HTTP endpoints for health, presence and Prometheus metrics

use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use dm_relay::config::RelayConfig;
use dm_relay::http::{create_router, HttpState};
use dm_relay::metrics::RelayMetrics;
use dm_relay::server::Relay;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dm_relay=info")),
        )
        .init();

    let config = RelayConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("Starting DM Relay Server v{}", env!("CARGO_PKG_VERSION"));
    info!("WebSocket: {}", config.listen_addr);
    info!("Health/metrics endpoint: {}", config.metrics_addr);
    info!(
        "Backlog capacity: {} per recipient, idle timeout: {}s",
        config.backlog_capacity, config.idle_timeout_secs
    );

    let metrics = RelayMetrics::new();
    let relay = Relay::from_config(&config, metrics.clone());

    if relay.authenticator().requires_token() {
        info!("Session auth: bearer token required");
    } else {
        warn!("Session auth: RELAY_AUTH_SECRET not set, trusting path identity");
    }

    if config.metrics_token.is_some() {
        info!("Metrics endpoint protected with bearer token");
    } else if !config.metrics_addr.ip().is_loopback() {
        warn!("Metrics exposed on non-localhost without auth token");
    }

    // Start HTTP server for health/presence/metrics
    let http_state = HttpState {
        metrics,
        metrics_token: config.metrics_token.clone(),
        registry: relay.router().registry().clone(),
        backlog: relay.router().backlog().clone(),
        started_at: Instant::now(),
    };
    let http_listener = match TcpListener::bind(config.metrics_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind HTTP listener on {}: {}", config.metrics_addr, e);
            std::process::exit(1);
        }
    };
    tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, create_router(http_state)).await {
            error!("HTTP server failed: {}", e);
        }
    });

    // Start cleanup task for rate limiters (remove stale user buckets)
    let cleanup_rate_limiter = relay.rate_limiter().clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(600)).await;
            let removed = cleanup_rate_limiter.cleanup_inactive(Duration::from_secs(1800));
            if removed > 0 {
                info!("Cleaned up {} stale rate limiter entries", removed);
            }
        }
    });

    let listener = match TcpListener::bind(config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind WebSocket listener on {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };
    info!("WebSocket server listening on {}", config.listen_addr);

    relay.serve(listener, shutdown_signal()).await;
    info!("Relay stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        // Never resolve; keep serving
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
