//! Best-effort recovery of a real phone number and name for an inbound sender.
//!
//! Anonymized `@lid` senders carry no phone number, so the contact record is
//! searched field by field. The first field that yields digits wins. The
//! result is a guess: callers treat `likely_not_phone` results as low
//! confidence when matching contacts.

use serde::{Deserialize, Serialize};

use crate::message::RawContact;
use crate::phone;

/// Which field the phone number came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneSource {
    /// Sender id was already `<digits>@c.us`.
    SenderId,
    DisplayName,
    FormattedNumber,
    Number,
    SerializedId,
    User,
    /// Nothing usable was found.
    Unresolved,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    /// Digits only.
    pub phone: Option<String>,
    pub name: Option<String>,
    pub push_name: Option<String>,
    pub source: PhoneSource,
    pub likely_not_phone: bool,
}

impl ResolvedIdentity {
    pub fn unresolved() -> Self {
        Self {
            phone: None,
            name: None,
            push_name: None,
            source: PhoneSource::Unresolved,
            likely_not_phone: false,
        }
    }
}

/// Resolve a sender id, consulting the contact record when the id is anonymized.
pub fn resolve(sender_id: &str, contact: Option<&RawContact>) -> ResolvedIdentity {
    if phone::is_direct_id(sender_id) {
        let digits = phone::digits_only(phone::local_part(sender_id));
        return ResolvedIdentity {
            phone: (!digits.is_empty()).then_some(digits),
            name: contact.and_then(|c| c.display_name()).map(str::to_string),
            push_name: contact.and_then(|c| c.pushname.clone()),
            source: PhoneSource::SenderId,
            likely_not_phone: false,
        };
    }

    let Some(contact) = contact else {
        return ResolvedIdentity::unresolved();
    };

    let name = contact.display_name().map(str::to_string);
    let (phone, source) = match phone_from_contact(contact) {
        Some((digits, source)) => (Some(digits), source),
        None => (None, PhoneSource::Unresolved),
    };

    let likely_not_phone = phone.as_deref().is_some_and(phone::likely_not_phone);
    if likely_not_phone {
        tracing::warn!(
            sender = sender_id,
            phone = phone.as_deref().unwrap_or_default(),
            source = ?source,
            "resolved value might be a WhatsApp id, not a real phone"
        );
    }

    ResolvedIdentity {
        phone,
        name,
        push_name: contact.pushname.clone(),
        source,
        likely_not_phone,
    }
}

fn phone_from_contact(contact: &RawContact) -> Option<(String, PhoneSource)> {
    if let Some(digits) = contact.display_name().and_then(phone::phone_from_name) {
        return Some((digits, PhoneSource::DisplayName));
    }
    if let Some(digits) = non_empty_digits(contact.formatted_number.as_deref()) {
        return Some((digits, PhoneSource::FormattedNumber));
    }
    if let Some(digits) = non_empty_digits(contact.number.as_deref()) {
        return Some((digits, PhoneSource::Number));
    }
    if let Some(serialized) = contact.serialized_id.as_deref() {
        let local = phone::local_part(serialized);
        if phone::is_plausible_phone(local) {
            return Some((local.to_string(), PhoneSource::SerializedId));
        }
        tracing::debug!(serialized = local, "serialized id doesn't look like a phone");
    }
    non_empty_digits(contact.user.as_deref().map(phone::local_part))
        .map(|digits| (digits, PhoneSource::User))
}

fn non_empty_digits(raw: Option<&str>) -> Option<String> {
    let digits = phone::digits_only(raw?.trim());
    (!digits.is_empty()).then_some(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lid_contact() -> RawContact {
        RawContact {
            serialized_id: Some("98765432101234@lid".into()),
            user: Some("98765432101234".into()),
            ..Default::default()
        }
    }

    #[test]
    fn direct_sender_used_verbatim() {
        let id = resolve("2348012345678@c.us", None);
        assert_eq!(id.phone.as_deref(), Some("2348012345678"));
        assert_eq!(id.source, PhoneSource::SenderId);
    }

    #[test]
    fn lid_without_contact_is_unresolved() {
        let id = resolve("98765432101234@lid", None);
        assert_eq!(id, ResolvedIdentity::unresolved());
    }

    #[test]
    fn phone_like_display_name_beats_formatted_number() {
        let contact = RawContact {
            name: Some("+234 801 234 5678".into()),
            formatted_number: Some("+44 7700 900123".into()),
            ..lid_contact()
        };
        let id = resolve("98765432101234@lid", Some(&contact));
        assert_eq!(id.phone.as_deref(), Some("2348012345678"));
        assert_eq!(id.source, PhoneSource::DisplayName);
    }

    #[test]
    fn formatted_number_beats_raw_number() {
        let contact = RawContact {
            name: Some("Deacon Ade".into()),
            formatted_number: Some("+234 803 000 1111".into()),
            number: Some("2349999999999".into()),
            ..lid_contact()
        };
        let id = resolve("98765432101234@lid", Some(&contact));
        assert_eq!(id.phone.as_deref(), Some("2348030001111"));
        assert_eq!(id.source, PhoneSource::FormattedNumber);
        assert_eq!(id.name.as_deref(), Some("Deacon Ade"));
    }

    #[test]
    fn raw_number_used_when_formatted_blank() {
        let contact = RawContact {
            formatted_number: Some("   ".into()),
            number: Some("2348055550000".into()),
            ..lid_contact()
        };
        let id = resolve("98765432101234@lid", Some(&contact));
        assert_eq!(id.phone.as_deref(), Some("2348055550000"));
        assert_eq!(id.source, PhoneSource::Number);
    }

    #[test]
    fn plausible_serialized_id_accepted() {
        let contact = RawContact {
            serialized_id: Some("2348012345678@c.us".into()),
            user: Some("2348012345678".into()),
            ..Default::default()
        };
        let id = resolve("55555555555555@lid", Some(&contact));
        assert_eq!(id.phone.as_deref(), Some("2348012345678"));
        assert_eq!(id.source, PhoneSource::SerializedId);
        assert!(!id.likely_not_phone);
    }

    #[test]
    fn implausible_serialized_id_falls_back_to_user_and_is_flagged() {
        let contact = RawContact {
            serialized_id: Some("012345678901234@lid".into()),
            user: Some("012345678901234".into()),
            pushname: Some("Grace".into()),
            ..Default::default()
        };
        let id = resolve("012345678901234@lid", Some(&contact));
        assert_eq!(id.phone.as_deref(), Some("012345678901234"));
        assert_eq!(id.source, PhoneSource::User);
        assert!(id.likely_not_phone);
        assert_eq!(id.push_name.as_deref(), Some("Grace"));
    }

    #[test]
    fn empty_contact_resolves_name_only() {
        let contact = RawContact {
            name: Some("Brother Tunde".into()),
            ..Default::default()
        };
        let id = resolve("98765432101234@lid", Some(&contact));
        assert_eq!(id.phone, None);
        assert_eq!(id.source, PhoneSource::Unresolved);
        assert_eq!(id.name.as_deref(), Some("Brother Tunde"));
    }

    #[test]
    fn resolved_phone_is_always_digits() {
        let contacts = [
            RawContact { name: Some("+1 415 555-0123".into()), ..Default::default() },
            RawContact { formatted_number: Some("+234-801-234-5678".into()), ..Default::default() },
            RawContact { number: Some("(0801) 234 5678".into()), ..Default::default() },
        ];
        for contact in &contacts {
            let id = resolve("1@lid", Some(contact));
            let phone = id.phone.expect("phone resolved");
            assert!(phone.chars().all(|c| c.is_ascii_digit()), "got {phone}");
        }
    }

    mod proptests {
        use super::*;
        use proptest::option;
        use proptest::prelude::*;

        /// Free text, phone-ish text and id-ish text, so every branch is reached.
        fn field() -> impl Strategy<Value = Option<String>> {
            option::of(prop_oneof![
                "\\PC{0,24}",
                "\\+?[0-9 ()-]{0,20}",
                "[0-9]{5,16}@(c\\.us|lid)",
            ])
        }

        prop_compose! {
            fn contact()(
                name in field(),
                short_name in field(),
                formatted_name in field(),
                pushname in field(),
                formatted_number in field(),
                number in field(),
                serialized_id in field(),
                user in field(),
            ) -> RawContact {
                RawContact {
                    name,
                    short_name,
                    formatted_name,
                    pushname,
                    formatted_number,
                    number,
                    serialized_id,
                    user,
                }
            }
        }

        proptest! {
            #[test]
            fn resolved_phone_is_ascii_digits(
                sender in "([0-9]{5,16}|\\PC{0,12})@(c\\.us|lid|s\\.whatsapp\\.net)",
                contact in option::of(contact()),
            ) {
                let id = resolve(&sender, contact.as_ref());
                if let Some(phone) = id.phone.as_deref() {
                    prop_assert!(!phone.is_empty());
                    prop_assert!(phone.chars().all(|c| c.is_ascii_digit()), "{phone:?}");
                    prop_assert_ne!(id.source, PhoneSource::Unresolved);
                } else {
                    prop_assert!(!id.likely_not_phone);
                }
            }
        }
    }
}
