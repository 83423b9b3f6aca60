//! Turns session events into subscriber frames, in order, and forwards
//! inbound messages to the backend.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bridge_core::contacts::{ContactBook, MatchQuery};
use bridge_core::credential::BearerToken;
use bridge_core::events::WireEvent;
use bridge_core::message::{InboundEvent, RawMessage};
use bridge_core::phone;
use bridge_delivery::IncomingSink;
use bridge_session::{SessionEvent, SessionManager};

use crate::client::SubscriberRegistry;

/// Coarse media class of an inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    /// Media flag set, type not recognized.
    Unknown,
}

impl MediaKind {
    pub fn classify(msg: &RawMessage) -> Option<Self> {
        match msg.kind.as_deref() {
            Some("image") => Some(Self::Image),
            Some("video") => Some(Self::Video),
            Some("audio" | "ptt") => Some(Self::Audio),
            Some("document") => Some(Self::Document),
            Some("sticker") => Some(Self::Sticker),
            _ if msg.has_media => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn placeholder(self) -> &'static str {
        match self {
            Self::Image => "📷 [Image]",
            Self::Video => "🎥 [Video]",
            Self::Audio => "🎵 [Audio]",
            Self::Document => "📄 [Document]",
            Self::Sticker => "🎨 [Sticker]",
            Self::Unknown => "📎 [Media]",
        }
    }
}

/// Inline base64 (a JPEG thumbnail or a data URL) rather than human text.
fn is_inline_data(text: &str) -> bool {
    text.starts_with("/9j/") || text.starts_with("data:")
}

/// Subscriber-facing text: media payloads become placeholders, a human
/// caption is kept in front of the placeholder.
pub fn display_body(msg: &RawMessage, kind: Option<MediaKind>) -> String {
    let Some(kind) = kind else {
        return msg
            .body
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or("[No content]")
            .to_string();
    };
    if matches!(kind, MediaKind::Sticker | MediaKind::Unknown) {
        return kind.placeholder().to_string();
    }
    let caption = msg
        .caption
        .as_deref()
        .or(msg.body.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty() && !is_inline_data(t));
    match caption {
        Some(text) => format!("{text} {}", kind.placeholder()),
        None => kind.placeholder().to_string(),
    }
}

/// Only one-to-one chats reach subscribers.
pub fn is_direct_message(msg: &RawMessage) -> bool {
    !msg.is_group_msg && !phone::is_group_or_broadcast(&msg.from)
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Backend target for inbound messages.
#[derive(Clone)]
pub struct Forwarder {
    pub sink: Arc<dyn IncomingSink>,
    pub credential: BearerToken,
}

pub struct Fanout {
    session: Arc<SessionManager>,
    registry: Arc<SubscriberRegistry>,
    contacts: Arc<ContactBook>,
    forwarder: Option<Forwarder>,
}

impl Fanout {
    pub fn new(
        session: Arc<SessionManager>,
        registry: Arc<SubscriberRegistry>,
        contacts: Arc<ContactBook>,
        forwarder: Option<Forwarder>,
    ) -> Self {
        Self {
            session,
            registry,
            contacts,
            forwarder,
        }
    }

    /// Normalize a direct message: placeholders, identity, contact match.
    pub async fn build_inbound(&self, msg: &RawMessage) -> InboundEvent {
        let kind = MediaKind::classify(msg);
        let identity = self.session.resolve_identity(&msg.from).await;
        let pushname = identity.push_name.clone().or_else(|| msg.notify_name.clone());

        let trusted_phone = identity
            .phone
            .as_deref()
            .filter(|_| !identity.likely_not_phone);
        let query = MatchQuery {
            sender_id: &msg.from,
            phone: trusted_phone,
            name: identity.name.as_deref().or(pushname.as_deref()),
        };
        // A saved name that matches nobody still leaves the push name to try
        let matched = self.contacts.match_and_learn(&query).or_else(|| {
            let retry = pushname.as_deref().filter(|p| query.name != Some(*p))?;
            self.contacts.match_and_learn(&MatchQuery {
                name: Some(retry),
                ..query
            })
        });
        let contact_id = matched.map(|(contact, rule)| {
            debug!(contact_id = %contact.id, rule = ?rule, "matched known contact");
            contact.id
        });

        InboundEvent {
            from: msg.from.clone(),
            phone: phone::local_part(&msg.from).to_string(),
            real_phone: identity.phone,
            contact_name: identity.name,
            pushname,
            body: display_body(msg, kind),
            has_media: msg.has_media || kind.is_some(),
            media_type: kind.map(|k| match (k, msg.kind.as_deref()) {
                (MediaKind::Unknown, _) | (_, None) => "unknown".to_string(),
                (_, Some(raw)) => raw.to_string(),
            }),
            timestamp: msg.timestamp.unwrap_or_else(now_secs),
            contact_id,
        }
    }

    fn push(&self, event: &WireEvent) {
        match event.to_json() {
            Ok(frame) => {
                self.registry.broadcast(&frame);
            }
            Err(e) => warn!(error = %e, "failed to serialize frame"),
        }
    }

    fn forward(&self, event: &InboundEvent) {
        let Some(forwarder) = self.forwarder.clone() else {
            return;
        };
        let event = event.clone();
        tokio::spawn(async move {
            if let Err(e) = forwarder
                .sink
                .forward_incoming(&forwarder.credential, &event)
                .await
            {
                warn!(from = %event.from, error = %e, "failed to forward incoming message");
            }
        });
    }

    pub async fn handle(&self, event: SessionEvent) {
        match event {
            SessionEvent::Message(msg) => {
                if !is_direct_message(&msg) {
                    debug!(from = %msg.from, "skipping group or broadcast message");
                    return;
                }
                let inbound = self.build_inbound(&msg).await;
                info!(
                    from = %inbound.from,
                    media_type = inbound.media_type.as_deref().unwrap_or("text"),
                    contact_id = inbound.contact_id.as_deref().unwrap_or_default(),
                    "incoming message"
                );
                self.push(&WireEvent::IncomingMessage(inbound.clone()));
                self.forward(&inbound);
            }
            SessionEvent::Ack(ack) => self.push(&WireEvent::ack(ack.message_id, ack.ack)),
            SessionEvent::Status { state, .. } => self.push(&WireEvent::status(state)),
            SessionEvent::StateChange { raw } => {
                self.push(&WireEvent::StateChange { state: raw, qr: None })
            }
            SessionEvent::Pairing { qr } => self.push(&WireEvent::StateChange {
                state: "pairing".into(),
                qr: Some(qr),
            }),
            SessionEvent::Participants(change) => {
                debug!(group = %change.group_id, action = ?change.action, "group membership changed")
            }
        }
    }
}

/// Consume the session's event stream until it closes or `cancel` fires.
pub fn spawn_fanout(
    fanout: Arc<Fanout>,
    mut rx: broadcast::Receiver<SessionEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => event,
            };
            match event {
                Ok(event) => fanout.handle(event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "fan-out lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("session event stream closed");
                    break;
                }
            }
        }
    })
}
