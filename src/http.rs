// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! HTTP Server for Health, Presence and Metrics Endpoints
//!
//! Served on a separate port from the WebSocket relay.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::backlog::Backlog;
use crate::connection_registry::ConnectionRegistry;
use crate::identity::UserId;
use crate::metrics::RelayMetrics;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub metrics: RelayMetrics,
    pub metrics_token: Option<String>,
    pub registry: Arc<ConnectionRegistry>,
    pub backlog: Arc<Backlog>,
    pub started_at: Instant,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    users_online: usize,
    sessions: usize,
    backlog_messages: usize,
    backlog_recipients: usize,
    backlog_evicted: u64,
}

#[derive(Debug, Serialize)]
struct PresenceResponse {
    user_id: UserId,
    online: bool,
    sessions: usize,
    queued: usize,
}

/// Middleware to check bearer token for metrics endpoint.
async fn metrics_auth_middleware(
    State(state): State<HttpState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/metrics" {
        if let Some(ref expected_token) = state.metrics_token {
            let is_authorized = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .is_some_and(|token| token == expected_token);

            if !is_authorized {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    "Unauthorized",
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

/// Creates the HTTP router.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/presence/:user_id", get(presence_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_auth_middleware,
        ))
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "dm-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/presence/{userId}", "/metrics"]
    }))
}

/// Health check - always 200 while the process is serving.
async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        users_online: state.registry.online_count(),
        sessions: state.registry.session_count(),
        backlog_messages: state.backlog.total(),
        backlog_recipients: state.backlog.recipient_count(),
        backlog_evicted: state.backlog.evicted_total(),
    })
}

async fn presence_handler(
    State(state): State<HttpState>,
    Path(raw): Path<String>,
) -> Response {
    let user_id = match UserId::parse(&raw) {
        Ok(id) => id,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    };

    Json(PresenceResponse {
        online: state.registry.is_online(&user_id),
        sessions: state.registry.session_count_for(&user_id),
        queued: state.backlog.size(&user_id),
        user_id,
    })
    .into_response()
}

async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    // Refresh gauges before encoding
    state
        .metrics
        .backlog_messages
        .set(state.backlog.total() as i64);
    state
        .metrics
        .sessions_open
        .set(state.registry.session_count() as i64);

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_registry::SessionHandle;
    use crate::message::MessageIds;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn create_test_state(metrics_token: Option<&str>) -> HttpState {
        HttpState {
            metrics: RelayMetrics::new(),
            metrics_token: metrics_token.map(str::to_string),
            registry: Arc::new(ConnectionRegistry::new()),
            backlog: Arc::new(Backlog::default()),
            started_at: Instant::now(),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = create_router(create_test_state(None));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_requires_token_when_configured() {
        let state = create_test_state(Some("scrape"));

        let denied = create_router(state.clone())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = create_router(state)
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .header("authorization", "Bearer scrape")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ignores_metrics_token() {
        let (status, body) = get_json(create_router(create_test_state(Some("t"))), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["users_online"], 0);
        assert_eq!(body["backlog_recipients"], 0);
        assert_eq!(body["backlog_evicted"], 0);
    }

    #[tokio::test]
    async fn test_presence_reports_sessions_and_backlog() {
        let state = create_test_state(None);
        let (handle, _channels) = SessionHandle::new(user("u2"), user("u1"), 4);
        state.registry.register(handle);
        let ids = MessageIds::new();
        state
            .backlog
            .push(ids.compose(&user("u1"), &user("u3"), "hi").unwrap());

        let (status, online) = get_json(create_router(state.clone()), "/presence/u2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(online["online"], true);
        assert_eq!(online["sessions"], 1);

        let (_, offline) = get_json(create_router(state), "/presence/u3").await;
        assert_eq!(offline["online"], false);
        assert_eq!(offline["queued"], 1);
    }

    #[tokio::test]
    async fn test_presence_rejects_invalid_id() {
        let (status, body) =
            get_json(create_router(create_test_state(None)), "/presence/bad%20id").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }
}
