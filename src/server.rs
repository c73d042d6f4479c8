// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket accept loop.
//!
//! Owns the shared relay state, admits sockets under the connection limit,
//! performs the upgrade with a handshake timeout and hands each session to
//! its own task. On shutdown every open session is told to close and is
//! given a short grace period to finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::backlog::Backlog;
use crate::config::RelayConfig;
use crate::connection_limit::{ConnectionGuard, ConnectionLimiter};
use crate::connection_registry::ConnectionRegistry;
use crate::handler::{self, ConnectionDeps};
use crate::handshake;
use crate::metrics::RelayMetrics;
use crate::rate_limit::RateLimiter;
use crate::router::Router;

/// How long open sessions get to close after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A configured relay, ready to serve a listener.
pub struct Relay {
    deps: ConnectionDeps,
    limiter: ConnectionLimiter,
    handshake_timeout: Duration,
}

impl Relay {
    /// Builds the registry, backlog and router described by `config`.
    pub fn from_config(config: &RelayConfig, metrics: RelayMetrics) -> Self {
        let router = Arc::new(Router::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(Backlog::new(config.backlog_capacity)),
            metrics.clone(),
        ));

        Relay {
            deps: ConnectionDeps {
                router,
                authenticator: Arc::new(Authenticator::from_secret(
                    config.auth_secret.as_deref(),
                )),
                rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_per_min)),
                metrics,
                max_message_size: config.max_message_size,
                outbound_buffer: config.outbound_buffer,
                idle_timeout: config.idle_timeout(),
            },
            limiter: ConnectionLimiter::new(config.max_connections),
            handshake_timeout: config.handshake_timeout(),
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.deps.router
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.deps.rate_limiter
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.deps.authenticator
    }

    /// Accepts sockets until `shutdown` resolves, then closes every session.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let Relay {
            deps,
            limiter,
            handshake_timeout,
        } = self;
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}

                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            deps.metrics.connection_errors.inc();
                            continue;
                        }
                    };

                    let Some(guard) = limiter.try_acquire() else {
                        warn!(
                            "Connection rejected: at max capacity ({}/{})",
                            limiter.active_count(),
                            limiter.max_connections()
                        );
                        deps.metrics.connection_errors.inc();
                        drop(stream);
                        continue;
                    };

                    debug!("Accepted TCP connection from {}", addr);
                    sessions.spawn(accept_socket(stream, deps.clone(), handshake_timeout, guard));
                }
            }
        }

        let notified = deps.router.registry().shutdown_all();
        info!("Shutting down: closing {} session(s)", notified);

        let drained = timeout(SHUTDOWN_GRACE, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "{} session task(s) still running after grace period, aborting",
                sessions.len()
            );
            sessions.shutdown().await;
        }
    }
}

/// Upgrades one TCP stream and runs its session to completion.
async fn accept_socket(
    stream: TcpStream,
    deps: ConnectionDeps,
    handshake_timeout: Duration,
    _guard: ConnectionGuard,
) {
    let mut captured = None;
    // Bounded so clients that never finish the upgrade cannot hold a slot
    let upgraded = timeout(
        handshake_timeout,
        accept_hdr_async(stream, handshake::capture(&mut captured)),
    )
    .await;

    match upgraded {
        Ok(Ok(ws_stream)) => {
            deps.metrics.connections_total.inc();
            deps.metrics.connections_active.inc();

            let upgrade = captured.take().unwrap_or_default();
            let metrics = deps.metrics.clone();
            handler::handle_connection(ws_stream, upgrade, deps).await;

            metrics.connections_active.dec();
        }
        Ok(Err(e)) => {
            debug!("WebSocket handshake failed: {}", e);
            deps.metrics.connection_errors.inc();
        }
        Err(_) => {
            warn!("WebSocket handshake timeout");
            deps.metrics.connection_errors.inc();
        }
    }
    // _guard dropped here, releasing the connection slot
}
