// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for relay integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use dm_relay::config::RelayConfig;
use dm_relay::metrics::RelayMetrics;
use dm_relay::{Relay, Router, UserId};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A relay serving on an ephemeral localhost port.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub router: Arc<Router>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestRelay {
    pub async fn start() -> Self {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(config: RelayConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().unwrap();
        let relay = Relay::from_config(&config, RelayMetrics::new());
        let router = relay.router().clone();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(relay.serve(listener, async {
            let _ = rx.await;
        }));

        TestRelay {
            addr,
            router,
            shutdown: Some(tx),
            task,
        }
    }

    pub fn url(&self, owner: &str, peer: &str) -> String {
        format!("ws://{}/ws/{}/{}", self.addr, owner, peer)
    }

    /// Opens a socket and waits until the relay has registered it.
    pub async fn connect(&self, owner: &str, peer: &str) -> Client {
        let before = self.router.registry().session_count_for(&user(owner));
        let (ws, _) = connect_async(self.url(owner, peer))
            .await
            .expect("connect failed");
        self.wait_for_sessions(owner, before + 1).await;
        ws
    }

    pub async fn wait_for_sessions(&self, owner: &str, count: usize) {
        let id = user(owner);
        wait_until(|| self.router.registry().session_count_for(&id) == count).await;
    }

    pub async fn wait_for_backlog(&self, recipient: &str, count: usize) {
        let id = user(recipient);
        wait_until(|| self.router.backlog().size(&id) == count).await;
    }

    /// Triggers graceful shutdown and waits for the accept loop to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        timeout(Duration::from_secs(10), &mut self.task)
            .await
            .expect("relay did not stop")
            .expect("relay task panicked");
    }
}

/// Config for tests: no rate limiting, trusting auth.
pub fn test_config() -> RelayConfig {
    RelayConfig {
        rate_limit_per_min: 0,
        ..RelayConfig::default()
    }
}

pub fn user(id: &str) -> UserId {
    UserId::parse(id).unwrap()
}

/// Polls `cond` every 5ms for up to 5 seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn send_text(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string()))
        .await
        .expect("send failed");
}

/// Receives the next text frame, failing after 5 seconds.
pub async fn recv_text(ws: &mut Client) -> String {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("read error");
        match frame {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {:?}", other),
        }
    }
}

/// Returns the next frame, or `None` if nothing arrives within `wait`.
pub async fn try_recv(ws: &mut Client, wait: Duration) -> Option<Message> {
    match timeout(wait, ws.next()).await {
        Ok(Some(Ok(frame))) => Some(frame),
        _ => None,
    }
}
