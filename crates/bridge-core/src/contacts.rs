use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::phone;

/// A contact from the backend directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnownContact {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    /// Sender id this contact was last seen writing from.
    #[serde(default)]
    pub whatsapp_id: Option<String>,
}

/// What an inbound sender is known by.
#[derive(Clone, Debug, Default)]
pub struct MatchQuery<'a> {
    pub sender_id: &'a str,
    pub phone: Option<&'a str>,
    pub name: Option<&'a str>,
}

/// Rule that produced a match, in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    Binding,
    PhoneSuffix,
    Name,
}

/// Find the known contact an inbound sender belongs to. First rule wins;
/// `None` means a new, unknown sender.
pub fn match_contact<'c>(
    contacts: &'c [KnownContact],
    query: &MatchQuery<'_>,
) -> Option<(&'c KnownContact, MatchRule)> {
    if let Some(c) = contacts
        .iter()
        .find(|c| c.whatsapp_id.as_deref() == Some(query.sender_id))
    {
        return Some((c, MatchRule::Binding));
    }

    if let Some(incoming) = query.phone.filter(|p| !p.is_empty()) {
        if let Some(c) = contacts.iter().find(|c| phone::suffix_match(&c.phone, incoming)) {
            return Some((c, MatchRule::PhoneSuffix));
        }
    }

    let name = query.name.map(str::trim).filter(|n| !n.is_empty())?;
    let name = name.to_lowercase();
    contacts
        .iter()
        .find(|c| {
            let stored = c.name.trim().to_lowercase();
            !stored.is_empty() && (stored.contains(&name) || name.contains(&stored))
        })
        .map(|c| (c, MatchRule::Name))
}

/// Cached contact directory with learned sender-id bindings.
#[derive(Default)]
pub struct ContactBook {
    contacts: RwLock<Vec<KnownContact>>,
    /// sender id → contact id, learned from phone/name matches
    bindings: RwLock<HashMap<String, String>>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached directory, keeping learned bindings for contacts
    /// the backend doesn't know a sender id for yet.
    pub fn replace(&self, contacts: Vec<KnownContact>) {
        *self.contacts.write() = contacts;
    }

    pub fn len(&self) -> usize {
        self.contacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Match a sender and remember the binding for next time.
    pub fn match_and_learn(&self, query: &MatchQuery<'_>) -> Option<(KnownContact, MatchRule)> {
        let contacts = self.contacts.read();

        if let Some(contact_id) = self.bindings.read().get(query.sender_id) {
            if let Some(c) = contacts.iter().find(|c| &c.id == contact_id) {
                return Some((c.clone(), MatchRule::Binding));
            }
        }

        let (contact, rule) = match_contact(&contacts, query)?;
        if rule != MatchRule::Binding {
            self.bindings
                .write()
                .insert(query.sender_id.to_string(), contact.id.clone());
            tracing::debug!(
                sender = query.sender_id,
                contact_id = %contact.id,
                rule = ?rule,
                "learned sender binding"
            );
        }
        Some((contact.clone(), rule))
    }
}
