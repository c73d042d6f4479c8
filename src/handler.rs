// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connection Handler
//!
//! Drives one socket through its lifecycle: identity validation, registry
//! attach with backlog flush, the read/write loop, and teardown.
//!
//! Every inbound text frame is one chat message from the socket's owner to
//! its peer. Every outbound text frame is one message body; sender
//! attribution is implied by which conversation socket it arrives on.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{sleep, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::connection_registry::{SessionChannels, SessionHandle};
use crate::error::RelayError;
use crate::handshake::{parse_route, Route, UpgradeRequest};
use crate::message::Message;
use crate::metrics::RelayMetrics;
use crate::rate_limit::RateLimiter;
use crate::router::{DeliveryOutcome, DropReason, Router};
use crate::session::{CloseReason, InboundFrame, Lifecycle, SessionState};

/// Shared dependencies for handling a WebSocket connection.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub router: Arc<Router>,
    pub authenticator: Arc<Authenticator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: RelayMetrics,
    pub max_message_size: usize,
    pub outbound_buffer: usize,
    pub idle_timeout: Duration,
}

/// Validates the upgrade request: route shape, id syntax, and caller identity.
pub fn validate_upgrade(
    upgrade: &UpgradeRequest,
    authenticator: &Authenticator,
) -> Result<Route, RelayError> {
    let route = parse_route(&upgrade.path)?;
    authenticator.authenticate(&route.owner, upgrade.token.as_deref())?;
    Ok(route)
}

/// Handles one inbound text frame. `Ok(None)` means the frame was blank and
/// silently dropped; no message was created and nothing was dispatched.
pub fn handle_text_frame(
    deps: &ConnectionDeps,
    session: &SessionHandle,
    text: &str,
) -> Result<Option<DeliveryOutcome>, RelayError> {
    if text.len() > deps.max_message_size {
        return Err(RelayError::MessageTooLarge {
            size: text.len(),
            limit: deps.max_message_size,
        });
    }
    if text.trim().is_empty() {
        return Ok(None);
    }
    if !deps.rate_limiter.consume(&session.owner) {
        return Err(RelayError::RateLimited);
    }
    let Some(msg) = deps.router.compose(&session.owner, &session.peer, text) else {
        return Ok(None);
    };
    deps.metrics.messages_received.inc();
    Ok(Some(deps.router.dispatch(msg)))
}

/// Handles a WebSocket connection from upgrade to close.
pub async fn handle_connection<S>(
    mut ws_stream: WebSocketStream<S>,
    upgrade: UpgradeRequest,
    deps: ConnectionDeps,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let label = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let mut lifecycle = Lifecycle::new(label.as_str());

    // CONNECTING
    let route = match validate_upgrade(&upgrade, &deps.authenticator) {
        Ok(route) => route,
        Err(e) => {
            warn!("[{}] Session refused: {}", label, e);
            deps.metrics.auth_failures.inc();
            let frame = CloseFrame {
                code: CloseCode::Policy,
                reason: e.label().into(),
            };
            let _ = ws_stream.close(Some(frame)).await;
            lifecycle.advance(SessionState::Closed);
            return CloseReason::Refused(e);
        }
    };

    let (handle, mut channels) =
        SessionHandle::new(route.owner, route.peer, deps.outbound_buffer);
    let (mut write, mut read) = ws_stream.split();

    // OPEN: register and take the backlog for this conversation before
    // anything else is read or written
    let pending = deps.router.attach(handle.clone());
    lifecycle.advance(SessionState::Open);
    debug!(
        "[{}] Session open (owner: {}, peer: {}, backlog: {})",
        label,
        handle.owner,
        handle.peer,
        pending.len()
    );

    let reason = match flush_backlog(&mut write, pending, &deps.metrics).await {
        Ok(()) => run_session(&mut write, &mut read, &deps, &handle, &mut channels, &label).await,
        Err(abandoned) => {
            warn!(
                "[{}] Backlog flush failed, {} message(s) abandoned",
                label, abandoned
            );
            CloseReason::WriteFailure
        }
    };

    // CLOSING: leave the registry first so no new traffic is routed here
    lifecycle.advance(SessionState::Closing);
    deps.router.detach(&handle);
    discard_unsent(&mut channels, &deps.metrics, &label);

    let close_frame = match reason {
        CloseReason::ServerShutdown => Some(CloseFrame {
            code: CloseCode::Away,
            reason: "going away".into(),
        }),
        CloseReason::IdleTimeout => Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "idle timeout".into(),
        }),
        CloseReason::Refused(ref e) => Some(CloseFrame {
            code: CloseCode::Policy,
            reason: e.label().into(),
        }),
        _ => None,
    };
    if let Some(frame) = close_frame {
        let _ = write.send(WsMessage::Close(Some(frame))).await;
    }
    let _ = write.close().await;

    lifecycle.advance(SessionState::Closed);
    let age = handle.created_at.elapsed().unwrap_or_default();
    info!(
        "[{}] Session {} after {}s ({:?})",
        label,
        lifecycle.state(),
        age.as_secs(),
        reason
    );
    reason
}

/// Writes flushed backlog entries in order. On failure returns how many
/// entries (including the failed one) were abandoned.
async fn flush_backlog<S>(
    write: &mut SplitSink<WebSocketStream<S>, WsMessage>,
    pending: Vec<Message>,
    metrics: &RelayMetrics,
) -> Result<(), usize>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let total = pending.len();
    for (sent, msg) in pending.into_iter().enumerate() {
        if write.send(WsMessage::Text(msg.body)).await.is_err() {
            let abandoned = total - sent;
            metrics
                .messages_dropped
                .with_label_values(&[DropReason::WriteFailure.label()])
                .inc_by(abandoned as u64);
            return Err(abandoned);
        }
        metrics.messages_delivered.inc();
    }
    Ok(())
}

/// Read/write loop for an OPEN session. Returns why the session is closing.
async fn run_session<S>(
    write: &mut SplitSink<WebSocketStream<S>, WsMessage>,
    read: &mut futures_util::stream::SplitStream<WebSocketStream<S>>,
    deps: &ConnectionDeps,
    handle: &SessionHandle,
    channels: &mut SessionChannels,
    label: &str,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let idle = sleep(deps.idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            biased;

            _ = channels.shutdown.notified() => {
                break CloseReason::ServerShutdown;
            }

            outbound = channels.outbound.recv() => {
                let Some(msg) = outbound else {
                    break CloseReason::ServerShutdown;
                };
                if let Err(e) = write.send(WsMessage::Text(msg.body.clone())).await {
                    debug!("[{}] Write failed: {}", label, e);
                    deps.metrics
                        .messages_dropped
                        .with_label_values(&[DropReason::WriteFailure.label()])
                        .inc();
                    break CloseReason::WriteFailure;
                }
                // Traffic in either direction keeps the session alive
                idle.as_mut().reset(Instant::now() + deps.idle_timeout);
            }

            _ = &mut idle => {
                warn!("[{}] Idle timeout", label);
                break CloseReason::IdleTimeout;
            }

            inbound = read.next() => {
                let frame = match inbound {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        debug!("[{}] Read error: {}", label, e);
                        break CloseReason::TransportDisconnect;
                    }
                    None => break CloseReason::TransportDisconnect,
                };
                idle.as_mut().reset(Instant::now() + deps.idle_timeout);

                match InboundFrame::from(frame) {
                    InboundFrame::Chat(text) => match handle_text_frame(deps, handle, &text) {
                        Ok(Some(outcome)) => debug!("[{}] Dispatched: {:?}", label, outcome),
                        Ok(None) => debug!("[{}] Blank frame dropped", label),
                        Err(e) => {
                            warn!("[{}] Frame rejected: {}", label, e);
                            deps.metrics
                                .messages_rejected
                                .with_label_values(&[e.label()])
                                .inc();
                            if e.is_fatal() {
                                break CloseReason::Refused(e);
                            }
                        }
                    },
                    InboundFrame::Close => break CloseReason::TransportDisconnect,
                    // Ping/pong replies are handled by the transport
                    InboundFrame::Ignored { kind, len } => {
                        debug!("[{}] Ignoring {} frame ({} bytes)", label, kind, len);
                    }
                }
            }
        }
    }
}

/// Drops frames routed to a session that will never write them. Runs after
/// detach so no dispatch can target the session once its channel is closed.
fn discard_unsent(channels: &mut SessionChannels, metrics: &RelayMetrics, label: &str) -> u64 {
    channels.outbound.close();
    let mut unsent = 0u64;
    while channels.outbound.try_recv().is_ok() {
        unsent += 1;
    }
    if unsent > 0 {
        debug!("[{}] Discarding {} unsent message(s)", label, unsent);
        metrics
            .messages_dropped
            .with_label_values(&[DropReason::WriteFailure.label()])
            .inc_by(unsent);
    }
    unsent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::Backlog;
    use crate::connection_registry::ConnectionRegistry;
    use crate::identity::UserId;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn deps(max_message_size: usize, rate_limit: u32) -> ConnectionDeps {
        let metrics = RelayMetrics::new();
        ConnectionDeps {
            router: Arc::new(Router::new(
                Arc::new(ConnectionRegistry::new()),
                Arc::new(Backlog::default()),
                metrics.clone(),
            )),
            authenticator: Arc::new(Authenticator::Trusting),
            rate_limiter: Arc::new(RateLimiter::new(rate_limit)),
            metrics,
            max_message_size,
            outbound_buffer: 16,
            idle_timeout: Duration::from_secs(5),
        }
    }

    fn session(owner: &str, peer: &str) -> SessionHandle {
        SessionHandle::new(user(owner), user(peer), 4).0
    }

    #[test]
    fn test_text_frame_is_dispatched_to_peer() {
        let deps = deps(1024, 0);
        let outcome = handle_text_frame(&deps, &session("u1", "u2"), " hello ").unwrap();
        assert_eq!(outcome, Some(DeliveryOutcome::Queued));

        let queued = deps.router.backlog().drain_all(&user("u2"));
        assert_eq!(queued[0].body, "hello");
        assert_eq!(queued[0].from, user("u1"));
        assert_eq!(deps.metrics.messages_received.get(), 1);
    }

    #[test]
    fn test_blank_frame_creates_no_message() {
        let deps = deps(1024, 0);
        assert_eq!(
            handle_text_frame(&deps, &session("u1", "u2"), "   \n\t").unwrap(),
            None
        );
        assert_eq!(deps.router.backlog().total(), 0);
        assert_eq!(deps.metrics.messages_received.get(), 0);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let deps = deps(8, 0);
        let err = handle_text_frame(&deps, &session("u1", "u2"), "123456789").unwrap_err();
        assert_eq!(err, RelayError::MessageTooLarge { size: 9, limit: 8 });
        assert!(!err.is_fatal());
        assert_eq!(deps.router.backlog().total(), 0);
    }

    #[test]
    fn test_rate_limited_frame_rejected() {
        let deps = deps(1024, 1);
        let s = session("u1", "u2");
        assert!(handle_text_frame(&deps, &s, "one").is_ok());
        assert_eq!(
            handle_text_frame(&deps, &s, "two"),
            Err(RelayError::RateLimited)
        );
        assert_eq!(deps.router.backlog().size(&user("u2")), 1);
    }

    #[test]
    fn test_closing_session_leaves_registry_before_discarding() {
        let deps = deps(1024, 0);
        let (handle, mut channels) = SessionHandle::new(user("u2"), user("u1"), 4);
        deps.router.attach(handle.clone());

        let msg = deps.router.compose(&user("u1"), &user("u2"), "in flight").unwrap();
        assert_eq!(deps.router.dispatch(msg), DeliveryOutcome::Delivered(1));

        deps.router.detach(&handle);
        assert_eq!(discard_unsent(&mut channels, &deps.metrics, "t"), 1);

        // With the session gone the next message waits in the backlog
        let late = deps.router.compose(&user("u1"), &user("u2"), "late").unwrap();
        assert_eq!(deps.router.dispatch(late), DeliveryOutcome::Queued);
        assert_eq!(
            deps.metrics
                .messages_dropped
                .with_label_values(&[DropReason::WriteFailure.label()])
                .get(),
            1
        );
    }

    #[test]
    fn test_validate_upgrade_mismatch() {
        let secret = "s3cret";
        let token =
            crate::auth::sign_token(secret, &user("u3"), Duration::from_secs(60)).unwrap();
        let upgrade = UpgradeRequest {
            path: "/ws/u1/u2".into(),
            token: Some(token),
        };
        let auth = Authenticator::from_secret(Some(secret));
        assert!(matches!(
            validate_upgrade(&upgrade, &auth),
            Err(RelayError::AuthMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_upgrade_bad_path() {
        let upgrade = UpgradeRequest {
            path: "/chat".into(),
            token: None,
        };
        assert!(matches!(
            validate_upgrade(&upgrade, &Authenticator::Trusting),
            Err(RelayError::InvalidPath(_))
        ));
    }
}
