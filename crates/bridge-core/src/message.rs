use serde::{Deserialize, Serialize};

// ── Client-library records ──────────────────────────────────────────────

/// A message as emitted by the WhatsApp client library, before normalization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessage {
    /// Network-assigned message id.
    pub id: Option<String>,
    /// Sender id: `<digits>@c.us` or anonymized `<opaque>@lid`.
    pub from: String,
    pub body: Option<String>,
    pub caption: Option<String>,
    /// Library message type (`chat`, `image`, `ptt`, ...).
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub is_group_msg: bool,
    pub has_media: bool,
    /// Seconds since the epoch, as reported by the network.
    pub timestamp: Option<i64>,
    /// Profile name the sender chose for themselves.
    pub notify_name: Option<String>,
}

/// Delivery/read receipt for a message the bridge sent earlier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAck {
    pub message_id: Option<String>,
    /// -1 error, 0 clock, 1 sent, 2 delivered, 3 read, 4 played.
    pub ack: i64,
}

/// Contact record as the client library exposes it. Every field is optional
/// and loosely formatted; [`crate::identity::resolve`] sorts it out.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawContact {
    pub name: Option<String>,
    pub short_name: Option<String>,
    pub formatted_name: Option<String>,
    pub pushname: Option<String>,
    pub formatted_number: Option<String>,
    pub number: Option<String>,
    /// `id._serialized`, e.g. `123456789012345@lid`.
    pub serialized_id: Option<String>,
    /// `id.user`, the bare local part.
    pub user: Option<String>,
}

impl RawContact {
    /// Name the address book shows for this contact.
    pub fn display_name(&self) -> Option<&str> {
        [&self.name, &self.short_name, &self.formatted_name]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|n| !n.trim().is_empty())
    }
}

/// Event pushed by the client library.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    Message(RawMessage),
    Ack(RawAck),
    /// Pairing artifact (QR payload) to show the operator, forwarded unchanged.
    Pairing(String),
    /// Raw session state string (`CONNECTED`, `browserClose`, ...).
    State(String),
    Participants(crate::groups::ParticipantsChanged),
}

// ── Outbound ────────────────────────────────────────────────────────────

/// Media attached to an outbound message; `data` is base64, possibly a data URL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    #[serde(alias = "media_data")]
    pub data: String,
    #[serde(default, alias = "media_type")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

/// One queued message as served by the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub whatsapp_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub media: Option<MediaPayload>,
}

/// Input to the outbound pipeline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SendRequest {
    pub phone: String,
    pub whatsapp_id: Option<String>,
    pub body: String,
    pub contact_id: Option<String>,
    /// Queue entry this send settles; `None` for direct REST sends.
    pub queue_id: Option<String>,
}

impl SendRequest {
    pub fn text(phone: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            body: body.into(),
            ..Default::default()
        }
    }
}

impl From<&OutboundMessage> for SendRequest {
    fn from(msg: &OutboundMessage) -> Self {
        Self {
            phone: msg.phone.clone(),
            whatsapp_id: msg.whatsapp_id.clone(),
            body: msg.content.clone(),
            contact_id: msg.contact_id.clone(),
            queue_id: Some(msg.id.clone()),
        }
    }
}

/// What the client library returns for an accepted send.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: Option<String>,
    /// Media went out through the temp-file path.
    #[serde(default)]
    pub fallback: bool,
}

/// Terminal result of one pipeline send.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    #[serde(skip)]
    pub attempts: u32,
}

impl DeliveryOutcome {
    pub fn sent(receipt: SendReceipt, provider: &str, attempts: u32) -> Self {
        Self {
            success: true,
            provider: Some(provider.to_string()),
            message_id: receipt.message_id,
            fallback: receipt.fallback,
            attempts,
            ..Default::default()
        }
    }

    pub fn failed(error: &crate::errors::BridgeError, attempts: u32) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            error_type: Some(error.error_kind().to_string()),
            attempts,
            ..Default::default()
        }
    }
}

/// Queue status reported back to the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// Status update for one queue entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub message_id: String,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn from_outcome(queue_id: &str, outcome: &DeliveryOutcome) -> Self {
        Self {
            message_id: queue_id.to_string(),
            status: if outcome.success {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Failed
            },
            whatsapp_message_id: outcome.message_id.clone(),
            error: outcome.error.clone(),
        }
    }
}

// ── Inbound ─────────────────────────────────────────────────────────────

/// Normalized incoming notification pushed to subscribers and the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    /// Raw sender id.
    pub from: String,
    /// Sender id without its suffix.
    pub phone: String,
    /// Best-effort real phone number, digits only.
    pub real_phone: Option<String>,
    pub contact_name: Option<String>,
    pub pushname: Option<String>,
    /// Text with media replaced by placeholders.
    pub body: String,
    pub has_media: bool,
    pub media_type: Option<String>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
}

impl InboundEvent {
    /// Composite key consumers deduplicate on.
    pub fn dedup_key(&self) -> (String, i64) {
        (self.from.clone(), self.timestamp)
    }
}
