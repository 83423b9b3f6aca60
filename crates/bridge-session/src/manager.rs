//! Owns the one WhatsApp session: its connection state, the client handle,
//! and the typed event stream everything downstream consumes.
//!
//! Every state write goes through [`SessionManager::transition`], which emits
//! exactly one `Status` event per real change. Connect, the health check, the
//! supervisor, send failures and client state reports all funnel through it,
//! so a burst of overlapping reports can never produce duplicate events.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use bridge_core::errors::BridgeError;
use bridge_core::groups::{ParticipantsChanged, RawGroup};
use bridge_core::identity::{self, ResolvedIdentity};
use bridge_core::media;
use bridge_core::message::{ClientEvent, MediaPayload, RawAck, RawContact, RawMessage, SendReceipt};
use bridge_core::phone::{self, ChatId};
use bridge_core::state::ConnectionState;

use crate::client::{MediaFile, StartOutcome, WhatsAppClient};

const EVENT_CAPACITY: usize = 256;

/// Upper bound on one contact lookup while resolving a sender.
pub const CONTACT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Typed events published by the session manager.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Connection state actually changed.
    Status {
        state: ConnectionState,
        reason: String,
    },
    Message(RawMessage),
    Ack(RawAck),
    /// Pairing artifact to show the operator, unchanged.
    Pairing { qr: String },
    /// Raw state string reported by the client library.
    StateChange { raw: String },
    Participants(ParticipantsChanged),
}

pub struct SessionManager {
    client: Arc<dyn WhatsAppClient>,
    session_name: String,
    state: Mutex<ConnectionState>,
    /// Serializes connect attempts.
    connect_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(client: Arc<dyn WhatsAppClient>, session_name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            session_name: session_name.into(),
            state: Mutex::new(ConnectionState::Initializing),
            connect_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    /// Move to `next`. Returns `false` (and emits nothing) when already there.
    pub fn transition(&self, next: ConnectionState, reason: &str) -> bool {
        let mut state = self.state.lock();
        if *state == next {
            return false;
        }
        let prev = *state;
        *state = next;
        info!(from = %prev, to = %next, reason, "session state changed");
        // Sent under the lock so concurrent transitions publish in order
        let _ = self.events.send(SessionEvent::Status {
            state: next,
            reason: reason.to_string(),
        });
        true
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Start the session. A no-op when already connected.
    #[instrument(skip(self), fields(session = %self.session_name))]
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            debug!("already connected");
            return Ok(());
        }

        match self.client.start(&self.session_name).await {
            Ok(StartOutcome::Connected) => {
                self.transition(ConnectionState::Connected, "session started");
                Ok(())
            }
            Ok(StartOutcome::PairingRequired { qr }) => {
                info!("pairing required, waiting for the device to scan");
                self.publish(SessionEvent::Pairing { qr });
                Ok(())
            }
            Ok(StartOutcome::Starting) => {
                debug!("client still starting");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "session start failed");
                self.transition(ConnectionState::Disconnected, "session start failed");
                Err(e)
            }
        }
    }

    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        if let Err(e) = self.client.close().await {
            warn!(error = %e, "error closing session");
        }
        self.transition(ConnectionState::Disconnected, "disconnect requested");
    }

    fn ensure_ready(&self) -> Result<(), BridgeError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BridgeError::SessionNotReady)
        }
    }

    /// A stale handle means the session is gone, whatever the last report said.
    fn observe_send_error(&self, err: BridgeError) -> BridgeError {
        if let BridgeError::SessionDetached(detail) = &err {
            warn!(detail = %detail, "session handle detached");
            self.transition(ConnectionState::Disconnected, "session handle detached");
        }
        err
    }

    #[instrument(skip(self, body), fields(chat_id = %chat))]
    pub async fn send_text(&self, chat: &ChatId, body: &str) -> Result<SendReceipt, BridgeError> {
        self.ensure_ready()?;
        self.client
            .send_text(chat, body)
            .await
            .map_err(|e| self.observe_send_error(e))
    }

    /// Send a base64 media payload. Falls back to a temp file when the
    /// in-memory path fails; the file is removed on every exit path.
    #[instrument(skip(self, payload), fields(chat_id = %chat))]
    pub async fn send_media(
        &self,
        chat: &ChatId,
        payload: &MediaPayload,
    ) -> Result<SendReceipt, BridgeError> {
        self.ensure_ready()?;

        let clean = media::sanitize_base64(&payload.data);
        let bytes = media::decode_media(&clean)?;
        let filename = media::compose_filename(
            payload.filename.as_deref(),
            &bytes,
            payload.media_type.as_deref(),
        );
        let caption = payload.caption.as_deref().filter(|c| !c.is_empty());
        debug!(filename = %filename, size = bytes.len(), "sending media");

        let file = MediaFile {
            base64: &clean,
            filename: &filename,
            caption,
            mime: Some(media::mime_for_filename(&filename)),
        };
        let primary_err = match self.client.send_file_base64(chat, file).await {
            Ok(receipt) => return Ok(receipt),
            Err(e @ BridgeError::SessionDetached(_)) => return Err(self.observe_send_error(e)),
            Err(e) => e,
        };
        warn!(error = %primary_err, "in-memory media send failed, retrying from temp file");

        let ext = filename.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("bin");
        let tmp = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&format!(".{ext}"))
            .tempfile()
            .map_err(|e| BridgeError::DeliveryFailed(format!("failed to create temp file: {e}")))?;
        tokio::fs::write(tmp.path(), &bytes)
            .await
            .map_err(|e| BridgeError::DeliveryFailed(format!("failed to write temp file: {e}")))?;

        let result = self
            .client
            .send_file_path(chat, tmp.path(), &filename, caption)
            .await
            .map(|mut receipt| {
                receipt.fallback = true;
                receipt
            })
            .map_err(|e| self.observe_send_error(e));
        drop(tmp);
        result
    }

    /// Compare the client's view with the last known state and reconcile.
    pub async fn check_health(&self) {
        let connected = match self.client.connection_state().await {
            Ok(raw) => ConnectionState::from_client_state(&raw) == Some(ConnectionState::Connected),
            Err(e) => {
                debug!(error = %e, "connection state lookup failed");
                false
            }
        };
        match (connected, self.state()) {
            (false, ConnectionState::Connected) => {
                warn!("health check failed");
                self.transition(ConnectionState::Disconnected, "health check failed");
            }
            (true, current) if !current.is_connected() => {
                self.transition(ConnectionState::Connected, "health check recovered");
            }
            _ => {}
        }
    }

    pub fn spawn_health_check(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => manager.check_health().await,
                }
            }
            debug!("health check stopped");
        })
    }

    /// Reconnect whenever the session is `disconnected`, every `delay`.
    /// A pending pairing (`initializing`) is left alone.
    pub fn spawn_supervisor(
        self: &Arc<Self>,
        delay: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                if manager.state() != ConnectionState::Disconnected {
                    continue;
                }
                info!("attempting reconnect");
                if let Err(e) = manager.connect().await {
                    warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "reconnect failed");
                }
            }
            debug!("supervisor stopped");
        })
    }

    /// Apply client events in order and republish them as session events.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<ClientEvent>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                manager.handle_client_event(event);
            }
            debug!("client event stream closed");
        })
    }

    pub fn handle_client_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::Message(msg) => self.publish(SessionEvent::Message(msg)),
            ClientEvent::Ack(ack) => self.publish(SessionEvent::Ack(ack)),
            ClientEvent::Pairing(qr) => self.publish(SessionEvent::Pairing { qr }),
            ClientEvent::Participants(change) => self.publish(SessionEvent::Participants(change)),
            ClientEvent::State(raw) => {
                self.publish(SessionEvent::StateChange { raw: raw.clone() });
                if let Some(next) = ConnectionState::from_client_state(&raw) {
                    self.transition(next, &format!("client reported {raw}"));
                }
            }
        }
    }

    /// The only path to the client's contact records.
    pub async fn lookup_contact(&self, id: &str) -> Result<Option<RawContact>, BridgeError> {
        self.client.get_contact(id).await
    }

    /// Resolve a sender, swallowing lookup failures into a weaker result.
    ///
    /// Direct senders carry their number and skip the lookup. Anonymized
    /// senders get one lookup bounded by [`CONTACT_LOOKUP_TIMEOUT`].
    pub async fn resolve_identity(&self, sender_id: &str) -> ResolvedIdentity {
        if phone::is_direct_id(sender_id) {
            return identity::resolve(sender_id, None);
        }
        let contact = match tokio::time::timeout(CONTACT_LOOKUP_TIMEOUT, self.lookup_contact(sender_id)).await {
            Ok(Ok(contact)) => contact,
            Ok(Err(e)) => {
                debug!(sender = sender_id, error = %e, "contact lookup failed");
                None
            }
            Err(_) => {
                warn!(sender = sender_id, "contact lookup timed out");
                None
            }
        };
        identity::resolve(sender_id, contact.as_ref())
    }

    /// Groups the account belongs to. Requires a connected session.
    pub async fn groups(&self) -> Result<Vec<RawGroup>, BridgeError> {
        self.ensure_ready()?;
        self.client
            .get_all_groups()
            .await
            .map_err(|e| self.observe_send_error(e))
    }
}
