use serde::{Deserialize, Serialize};

use crate::message::InboundEvent;
use crate::state::ConnectionState;

/// Frames pushed to real-time subscribers. Flat JSON objects keyed by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireEvent {
    #[serde(rename = "status")]
    Status { status: ConnectionState },

    #[serde(rename = "incoming_message")]
    IncomingMessage(InboundEvent),

    #[serde(rename = "message_ack")]
    MessageAck {
        #[serde(rename = "messageId")]
        message_id: Option<String>,
        ack: i64,
        #[serde(rename = "ackStatus", default, skip_serializing_if = "Option::is_none")]
        ack_status: Option<String>,
    },

    /// Raw library state, or `pairing` with the QR payload attached.
    #[serde(rename = "state_change")]
    StateChange {
        state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        qr: Option<String>,
    },
}

/// Event kinds a subscriber understands.
const KNOWN_TYPES: &[&str] = &["status", "incoming_message", "message_ack", "state_change"];

impl WireEvent {
    pub fn status(status: ConnectionState) -> Self {
        Self::Status { status }
    }

    pub fn ack(message_id: Option<String>, ack: i64) -> Self {
        Self::MessageAck {
            message_id,
            ack,
            ack_status: ack_label(ack).map(str::to_string),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a frame. Unknown `type`s (and frames without one) yield
    /// `Ok(None)` so newer servers don't break older subscribers.
    pub fn parse(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let known = value
            .get("type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| KNOWN_TYPES.contains(&t));
        if !known {
            return Ok(None);
        }
        serde_json::from_value(value).map(Some)
    }
}

/// Human label for an ack level.
pub fn ack_label(ack: i64) -> Option<&'static str> {
    match ack {
        -1 => Some("error"),
        0 => Some("pending"),
        1 => Some("sent"),
        2 => Some("delivered"),
        3 => Some("read"),
        4 => Some("played"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_frame_shape() {
        let json = WireEvent::status(ConnectionState::Connected).to_json().unwrap();
        assert_eq!(json, r#"{"type":"status","status":"connected"}"#);
    }

    #[test]
    fn incoming_message_is_flat() {
        let event = WireEvent::IncomingMessage(InboundEvent {
            from: "2348012345678@c.us".into(),
            phone: "2348012345678".into(),
            real_phone: Some("2348012345678".into()),
            contact_name: Some("Ada".into()),
            pushname: None,
            body: "Amen".into(),
            has_media: false,
            media_type: None,
            timestamp: 1_700_000_000,
            contact_id: None,
        });
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "incoming_message");
        assert_eq!(value["realPhone"], "2348012345678");
        assert_eq!(value["body"], "Amen");

        let parsed = WireEvent::parse(&value.to_string()).unwrap().unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn ack_frame_carries_label() {
        let value = serde_json::to_value(WireEvent::ack(Some("wamid-1".into()), 3)).unwrap();
        assert_eq!(value["type"], "message_ack");
        assert_eq!(value["messageId"], "wamid-1");
        assert_eq!(value["ackStatus"], "read");
    }

    #[test]
    fn state_change_omits_missing_qr() {
        let value = serde_json::to_value(WireEvent::StateChange {
            state: "CONFLICT".into(),
            qr: None,
        })
        .unwrap();
        assert!(value.get("qr").is_none());
    }

    #[test]
    fn unknown_types_are_ignored() {
        assert_eq!(WireEvent::parse(r#"{"type":"typing","from":"x"}"#).unwrap(), None);
        assert_eq!(WireEvent::parse(r#"{"hello":1}"#).unwrap(), None);
        assert!(WireEvent::parse("not json").is_err());
    }
}
