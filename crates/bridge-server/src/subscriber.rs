//! Client side of the real-time channel, for processes that consume bridge
//! events (the desktop app, the CLI, tests).
//!
//! Reconnects every few seconds after a drop, but only while the bridge was
//! last known to be connected. Cancelling the token is the `disconnect()`.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bridge_core::dedup::DedupFilter;
use bridge_core::errors::BridgeError;
use bridge_core::events::WireEvent;
use bridge_core::state::ConnectionState;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Why the read loop ended.
enum LinkEnd {
    Closed,
    Cancelled,
    ReceiverGone,
}

pub struct RealtimeSubscriber {
    url: String,
    reconnect_delay: Duration,
    dedup: DedupFilter,
    last_status: Option<ConnectionState>,
}

impl RealtimeSubscriber {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: RECONNECT_DELAY,
            dedup: DedupFilter::default(),
            last_status: None,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn last_status(&self) -> Option<ConnectionState> {
        self.last_status
    }

    /// Apply one text frame. Returns the event to deliver, if any.
    fn route(&mut self, text: &str) -> Option<WireEvent> {
        let event = match WireEvent::parse(text) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("ignoring frame of unknown type");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "unparseable frame");
                return None;
            }
        };
        match &event {
            WireEvent::Status { status } => self.last_status = Some(*status),
            WireEvent::IncomingMessage(msg) => {
                if !self.dedup.admit(&msg.from, msg.timestamp) {
                    debug!(from = %msg.from, timestamp = msg.timestamp, "duplicate message dropped");
                    return None;
                }
            }
            _ => {}
        }
        Some(event)
    }

    async fn read_until_closed(
        &mut self,
        url: &str,
        events: &mpsc::Sender<WireEvent>,
        cancel: &CancellationToken,
    ) -> Result<LinkEnd, BridgeError> {
        let (mut ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| BridgeError::Network(format!("websocket connect failed: {e}")))?;
        info!(url, "real-time link open");
        // An open link means the bridge is up
        self.last_status = Some(ConnectionState::Connected);

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(LinkEnd::Cancelled);
                }
                frame = ws.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = self.route(text.as_str()) {
                        if events.send(event).await.is_err() {
                            return Ok(LinkEnd::ReceiverGone);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(LinkEnd::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "real-time link error");
                    return Ok(LinkEnd::Closed);
                }
            }
        }
    }

    /// Run until cancelled, the receiver is dropped, or the link drops while
    /// the bridge isn't known to be connected. Fails only if the very first
    /// connection attempt fails.
    pub async fn run(
        mut self,
        events: mpsc::Sender<WireEvent>,
        cancel: CancellationToken,
    ) -> Result<(), BridgeError> {
        let url = self.url.clone();
        let mut ever_connected = false;
        loop {
            match self.read_until_closed(&url, &events, &cancel).await {
                Ok(LinkEnd::Cancelled | LinkEnd::ReceiverGone) => return Ok(()),
                Ok(LinkEnd::Closed) => {
                    ever_connected = true;
                    info!("real-time link closed");
                }
                Err(e) if !ever_connected => return Err(e),
                Err(e) => debug!(error = %e, "reconnect attempt failed"),
            }

            if self.last_status != Some(ConnectionState::Connected) {
                info!(status = ?self.last_status, "bridge not connected, not reconnecting");
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    pub fn spawn(
        self,
        events: mpsc::Sender<WireEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<(), BridgeError>> {
        tokio::spawn(self.run(events, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::ws::{Message as AxMessage, WebSocket, WebSocketUpgrade};
    use axum::extract::State;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use futures::SinkExt;

    /// Each connection gets the next script; the server closes after sending it.
    #[derive(Clone)]
    struct Script {
        sessions: Arc<Vec<Vec<String>>>,
        connections: Arc<AtomicUsize>,
    }

    async fn spawn_server(sessions: Vec<Vec<String>>) -> (SocketAddr, Arc<AtomicUsize>) {
        async fn upgrade(ws: WebSocketUpgrade, State(script): State<Script>) -> impl IntoResponse {
            ws.on_upgrade(move |socket| serve(socket, script))
        }
        async fn serve(mut socket: WebSocket, script: Script) {
            let n = script.connections.fetch_add(1, Ordering::SeqCst);
            let frames = script.sessions.get(n).cloned().unwrap_or_default();
            for frame in frames {
                if socket.send(AxMessage::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            if n + 1 < script.sessions.len() {
                let _ = socket.close().await;
            } else {
                // Last script: hold the link open
                while let Some(Ok(_)) = socket.recv().await {}
            }
        }

        let connections = Arc::new(AtomicUsize::new(0));
        let script = Script {
            sessions: Arc::new(sessions),
            connections: connections.clone(),
        };
        let app = Router::new().route("/", get(upgrade)).with_state(script);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, connections)
    }

    fn incoming(from: &str, ts: i64) -> String {
        format!(
            r#"{{"type":"incoming_message","from":"{from}","phone":"x","realPhone":null,"contactName":null,"pushname":null,"body":"hi","hasMedia":false,"mediaType":null,"timestamp":{ts}}}"#
        )
    }

    const CONNECTED: &str = r#"{"type":"status","status":"connected"}"#;
    const DISCONNECTED: &str = r#"{"type":"status","status":"disconnected"}"#;

    #[test]
    fn routing_ignores_unknown_and_dedups() {
        let mut sub = RealtimeSubscriber::new("ws://unused");
        assert!(sub.route(r#"{"type":"typing","from":"x"}"#).is_none());
        assert!(sub.route("not json").is_none());
        assert!(sub.route(&incoming("1@c.us", 10)).is_some());
        assert!(sub.route(&incoming("1@c.us", 10)).is_none());
        assert!(sub.route(&incoming("1@c.us", 11)).is_some());
        assert!(sub.route(DISCONNECTED).is_some());
        assert_eq!(sub.last_status(), Some(ConnectionState::Disconnected));
    }

    #[tokio::test]
    async fn reconnects_and_dedups_replayed_messages() {
        let (addr, connections) = spawn_server(vec![
            vec![CONNECTED.into(), incoming("1@c.us", 100)],
            vec![CONNECTED.into(), incoming("1@c.us", 100), incoming("1@c.us", 101)],
        ])
        .await;
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = RealtimeSubscriber::new(format!("ws://{addr}"))
            .with_reconnect_delay(Duration::from_millis(50))
            .spawn(tx, cancel.clone());

        let mut messages = Vec::new();
        while messages.len() < 2 {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let WireEvent::IncomingMessage(msg) = event {
                messages.push(msg.timestamp);
            }
        }
        assert_eq!(messages, vec![100, 101]);
        assert_eq!(connections.load(Ordering::SeqCst), 2);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn no_reconnect_after_bridge_reports_disconnected() {
        let (addr, connections) = spawn_server(vec![
            vec![CONNECTED.into(), DISCONNECTED.into()],
            vec![CONNECTED.into()],
        ])
        .await;
        let (tx, mut rx) = mpsc::channel(16);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            RealtimeSubscriber::new(format!("ws://{addr}"))
                .with_reconnect_delay(Duration::from_millis(20))
                .run(tx, CancellationToken::new()),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
        assert_eq!(connections.load(Ordering::SeqCst), 1);
        assert!(matches!(rx.recv().await, Some(WireEvent::Status { .. })));
    }

    #[tokio::test]
    async fn first_connect_failure_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let (tx, _rx) = mpsc::channel(1);
        let err = RealtimeSubscriber::new(format!("ws://{addr}"))
            .run(tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Network(_)));
    }

    #[tokio::test]
    async fn cancel_stops_pending_reconnect() {
        let (addr, connections) = spawn_server(vec![vec![CONNECTED.into()], vec![]]).await;
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = RealtimeSubscriber::new(format!("ws://{addr}"))
            .with_reconnect_delay(Duration::from_secs(3600))
            .spawn(tx, cancel.clone());

        for _ in 0..100 {
            if connections.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap();
        assert!(result.unwrap().is_ok());
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }
}
