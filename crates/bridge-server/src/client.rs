use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bridge_core::ids::SubscriberId;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const SUBSCRIBER_TIMEOUT: Duration = Duration::from_secs(90);

/// A connected real-time subscriber.
pub struct Subscriber {
    pub id: SubscriberId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Subscriber {
    fn new(id: SubscriberId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed) && !self.tx.is_closed()
    }

    fn mark_closed(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < SUBSCRIBER_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Every open real-time connection, keyed by id.
pub struct SubscriberRegistry {
    subscribers: DashMap<SubscriberId, Arc<Subscriber>>,
    max_send_queue: usize,
}

impl SubscriberRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            max_send_queue,
        }
    }

    pub fn register(&self) -> (SubscriberId, mpsc::Receiver<String>) {
        self.register_with(None)
    }

    /// Register with `first` already queued, so it precedes any broadcast
    /// the new subscriber can observe.
    pub fn register_with(&self, first: Option<String>) -> (SubscriberId, mpsc::Receiver<String>) {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue.max(1));
        if let Some(frame) = first {
            // Fresh channel with room for at least one frame
            let _ = tx.try_send(frame);
        }
        self.subscribers
            .insert(id.clone(), Arc::new(Subscriber::new(id.clone(), tx)));
        (id, rx)
    }

    pub fn unregister(&self, id: &SubscriberId) {
        if let Some((_, sub)) = self.subscribers.remove(id) {
            sub.mark_closed();
        }
    }

    fn get(&self, id: &SubscriberId) -> Option<Arc<Subscriber>> {
        self.subscribers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Queue a frame for one subscriber. A full queue drops the frame.
    pub fn send_to(&self, id: &SubscriberId, frame: String) -> bool {
        let Some(sub) = self.get(id) else {
            return false;
        };
        match sub.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                tracing::warn!(
                    subscriber_id = %id,
                    frame_len = frame.len(),
                    "send queue full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue one serialized frame for every open subscriber. Returns how
    /// many accepted it.
    pub fn broadcast(&self, frame: &str) -> usize {
        let open: Vec<SubscriberId> = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().is_connected())
            .map(|entry| entry.key().clone())
            .collect();
        open.iter()
            .filter(|id| self.send_to(id, frame.to_string()))
            .count()
    }

    pub fn count(&self) -> usize {
        self.subscribers.len()
    }

    /// Drop subscribers that stopped answering pings.
    pub fn cleanup_dead(&self) -> usize {
        let dead: Vec<SubscriberId> = self
            .subscribers
            .iter()
            .filter(|entry| !entry.value().is_alive() || !entry.value().is_connected())
            .map(|entry| entry.key().clone())
            .collect();
        for id in &dead {
            self.unregister(id);
            tracing::info!(subscriber_id = %id, "removed dead subscriber");
        }
        dead.len()
    }
}

/// Pump queued frames out and pings on a heartbeat; read pongs back.
/// Returns once either side closes.
pub async fn handle_ws_connection(
    socket: WebSocket,
    id: SubscriberId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<SubscriberRegistry>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = id.clone();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping.tick().await;
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(subscriber_id = %writer_id, "sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_id = id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Pong(_) => {
                    if let Some(sub) = reader_registry.get(&reader_id) {
                        sub.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                // Push-only channel: subscriber frames are ignored
                WsMessage::Text(text) => {
                    tracing::trace!(subscriber_id = %reader_id, len = text.len(), "ignoring inbound frame");
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }
    registry.unregister(&id);
    tracing::info!(subscriber_id = %id, "subscriber disconnected");
}

pub fn start_cleanup_task(
    registry: Arc<SubscriberRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let removed = registry.cleanup_dead();
            if removed > 0 {
                tracing::info!(removed, "subscriber cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister() {
        let registry = SubscriberRegistry::new(8);
        let (a, _rx_a) = registry.register();
        let (b, _rx_b) = registry.register();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("sub_"));
        assert_eq!(registry.count(), 2);

        registry.unregister(&a);
        assert_eq!(registry.count(), 1);
        registry.unregister(&a);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn broadcast_skips_closed_subscribers() {
        let registry = SubscriberRegistry::new(8);
        let (_a, mut rx_a) = registry.register();
        let (_b, rx_b) = registry.register();
        let (_c, mut rx_c) = registry.register();
        drop(rx_b);

        assert_eq!(registry.broadcast(r#"{"type":"status","status":"connected"}"#), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
    }

    #[test]
    fn first_frame_precedes_broadcasts() {
        let registry = Arc::new(SubscriberRegistry::new(8));
        let stop = Arc::new(AtomicBool::new(false));
        let broadcaster = {
            let registry = Arc::clone(&registry);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    registry.broadcast("later");
                }
            })
        };

        let mut receivers = Vec::new();
        for _ in 0..200 {
            receivers.push(registry.register_with(Some("status".into())).1);
        }
        stop.store(true, Ordering::Relaxed);
        broadcaster.join().unwrap();

        for mut rx in receivers {
            assert_eq!(rx.try_recv().unwrap(), "status");
        }
    }

    #[test]
    fn full_queue_drops_frame() {
        let registry = SubscriberRegistry::new(2);
        let (id, _rx) = registry.register();
        assert!(registry.send_to(&id, "1".into()));
        assert!(registry.send_to(&id, "2".into()));
        assert!(!registry.send_to(&id, "3".into()));
    }

    #[test]
    fn send_to_unknown_subscriber() {
        let registry = SubscriberRegistry::new(2);
        assert!(!registry.send_to(&SubscriberId::new(), "x".into()));
    }

    #[test]
    fn cleanup_removes_silent_and_closed() {
        let registry = SubscriberRegistry::new(8);
        let (silent, _rx1) = registry.register();
        let (_closed, rx2) = registry.register();
        let (_alive, _rx3) = registry.register();
        drop(rx2);
        registry
            .get(&silent)
            .unwrap()
            .last_pong
            .store(0, Ordering::Relaxed);

        assert_eq!(registry.cleanup_dead(), 2);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn pong_keeps_subscriber_alive() {
        let (tx, _rx) = mpsc::channel(1);
        let sub = Subscriber::new(SubscriberId::new(), tx);
        sub.last_pong.store(0, Ordering::Relaxed);
        assert!(!sub.is_alive());
        sub.record_pong();
        assert!(sub.is_alive());
    }
}
