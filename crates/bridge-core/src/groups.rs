//! Group records: what the client library lists, what the backend syncs,
//! and the two group-side queues (welcomes and group broadcasts).

use serde::{Deserialize, Deserializer, Serialize};

use crate::message::{DeliveryStatus, RawContact};
use crate::phone;

/// A group as listed by the client library.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawGroup {
    /// `<digits>@g.us`
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub participant_count: usize,
}

/// One row of a group sync.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub whatsapp_group_id: String,
    pub name: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub member_count: usize,
}

impl From<&RawGroup> for GroupRecord {
    fn from(group: &RawGroup) -> Self {
        Self {
            whatsapp_group_id: group.id.clone(),
            name: group
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or("Unnamed Group")
                .to_string(),
            description: group.description.clone(),
            avatar_url: group.avatar_url.clone(),
            member_count: group.participant_count,
        }
    }
}

/// Backend's answer to a sync.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GroupSyncReport {
    pub synced: usize,
    pub new: usize,
    pub updated: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
    #[serde(other)]
    Other,
}

impl ParticipantAction {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "add" | "join" => Self::Add,
            "remove" | "leave" => Self::Remove,
            "promote" => Self::Promote,
            "demote" => Self::Demote,
            _ => Self::Other,
        }
    }
}

/// Membership change in a group the session belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct ParticipantsChanged {
    pub group_id: String,
    pub action: ParticipantAction,
    pub who: Vec<String>,
    pub by: Option<String>,
}

/// Join notification for the backend.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemberJoined {
    pub whatsapp_id: String,
    pub name: String,
    pub phone: String,
    /// RFC 3339.
    pub joined_at: String,
}

impl MemberJoined {
    /// Push name first (what members call themselves in groups), then the
    /// address-book name.
    pub fn new(member_id: &str, contact: Option<&RawContact>, joined_at: String) -> Self {
        let name = contact
            .and_then(|c| c.pushname.as_deref().or(c.display_name()))
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("Unknown")
            .to_string();
        let phone = contact
            .and_then(|c| c.user.as_deref())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| phone::local_part(member_id))
            .to_string();
        Self {
            whatsapp_id: member_id.to_string(),
            name,
            phone,
            joined_at,
        }
    }
}

/// Backend ids arrive as numbers or strings depending on the table.
fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }
    Ok(match Id::deserialize(d)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Welcome message owed to a new group member.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct WelcomeEntry {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub phone: String,
    pub message: String,
    #[serde(default)]
    pub group_name: Option<String>,
}

/// Message queued for a whole group.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct GroupMessage {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub group_id: String,
    pub content: String,
}

/// Status report for one group message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupMessageStatus {
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl GroupMessageStatus {
    pub fn sent(at: String) -> Self {
        Self {
            status: DeliveryStatus::Sent,
            sent_at: Some(at),
            error_message: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            sent_at: None,
            error_message: Some(error.into()),
        }
    }
}
