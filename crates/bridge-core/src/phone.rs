//! Phone number and chat-id helpers.
//!
//! WhatsApp addresses a direct chat as `<digits>@c.us`; anonymized senders
//! arrive as `<opaque>@lid`. Everything here works on plain digit strings.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::BridgeError;

/// Suffix for a person-to-person chat.
pub const DIRECT_SUFFIX: &str = "@c.us";
/// Suffix used by multi-device clients for direct chats.
pub const DIRECT_SUFFIX_MD: &str = "@s.whatsapp.net";
/// Suffix for anonymized (privacy-preserving) sender ids.
pub const LID_SUFFIX: &str = "@lid";
/// Suffix for group chats.
pub const GROUP_SUFFIX: &str = "@g.us";
/// Sender id of status/story broadcasts.
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// Minimum digits on each side before a suffix comparison is trusted.
const MIN_SUFFIX_DIGITS: usize = 7;

/// Leading group looks like a country calling code, 9–15 digits in total.
static PLAUSIBLE_PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(1|2[0-9]{2}|3[0-9]{2}|4[0-9]{2}|5[0-9]{2}|6[0-9]{2}|7|8[0-9]{2}|9[0-9]{2})[0-9]{8,13}$")
        .unwrap()
});

/// Same calling-code heuristic with a shorter tail, used to flag
/// long results that are probably internal ids.
static REAL_PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(1|2[0-9]{2}|3[0-9]{2}|4[0-9]{2}|5[0-9]{2}|6[0-9]{2}|7|8[0-9]{2}|9[0-9]{2})[0-9]{8,12}$")
        .unwrap()
});

static PHONE_LIKE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9]{10,15}$").unwrap());

/// Strip everything except ASCII digits.
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Local part of a WhatsApp id (`2348012345678@c.us` → `2348012345678`).
pub fn local_part(id: &str) -> &str {
    id.split('@').next().unwrap_or(id)
}

pub fn is_direct_id(id: &str) -> bool {
    id.ends_with(DIRECT_SUFFIX) || id.ends_with(DIRECT_SUFFIX_MD)
}

pub fn is_lid(id: &str) -> bool {
    id.ends_with(LID_SUFFIX)
}

pub fn is_group_or_broadcast(id: &str) -> bool {
    id.ends_with(GROUP_SUFFIX) || id.contains(STATUS_BROADCAST)
}

/// International-dialing heuristic for digits taken from a serialized id.
pub fn is_plausible_phone(digits: &str) -> bool {
    PLAUSIBLE_PHONE.is_match(digits)
}

/// Long digit strings that fail the calling-code heuristic are most
/// likely anonymized ids rather than phone numbers.
pub fn likely_not_phone(digits: &str) -> bool {
    digits.len() > 12 && !REAL_PHONE.is_match(digits)
}

/// A display name that is itself a phone number (`+234 801-234-5678`).
pub fn phone_from_name(name: &str) -> Option<String> {
    let compact: String = name.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
    PHONE_LIKE_NAME
        .is_match(&compact)
        .then(|| digits_only(&compact))
}

/// Last ten digits of a digit string (or all of it when shorter).
pub fn last_ten(digits: &str) -> &str {
    let start = digits.len().saturating_sub(10);
    &digits[start..]
}

/// Compare two phone numbers by their last ten digits, tolerating a
/// leading country code or trunk zero on either side.
pub fn suffix_match(a: &str, b: &str) -> bool {
    let a = digits_only(a);
    let b = digits_only(b);
    if a.len() < MIN_SUFFIX_DIGITS || b.len() < MIN_SUFFIX_DIGITS {
        return false;
    }
    a.contains(last_ten(&b)) || b.contains(last_ten(&a))
}

/// Routing target for an outbound message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve a destination into a chat id.
    ///
    /// A WhatsApp id override containing `@` is used verbatim so replies land
    /// in the sender's thread (required for `@lid` senders). Otherwise the
    /// phone is reduced to digits, a leading trunk `0` is swapped for the
    /// default country code, and the direct-chat suffix is appended.
    pub fn resolve(
        phone: &str,
        whatsapp_id: Option<&str>,
        country_code: &str,
    ) -> Result<Self, BridgeError> {
        if let Some(id) = whatsapp_id.filter(|id| id.contains('@')) {
            return Ok(Self(id.to_string()));
        }

        let mut digits = digits_only(phone);
        if digits.is_empty() {
            return Err(BridgeError::InvalidPayload(format!(
                "destination has no digits: {phone:?}"
            )));
        }
        if let Some(rest) = digits.strip_prefix('0') {
            digits = format!("{country_code}{rest}");
        }
        Ok(Self(format!("{digits}{DIRECT_SUFFIX}")))
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_only_strips_symbols() {
        assert_eq!(digits_only("+234 (801) 234-5678"), "2348012345678");
        assert_eq!(digits_only("abc"), "");
    }

    #[test]
    fn resolve_local_number_gets_country_code() {
        let chat = ChatId::resolve("08012345678", None, "234").unwrap();
        assert_eq!(chat.as_str(), "2348012345678@c.us");
    }

    #[test]
    fn resolve_international_number_kept() {
        let chat = ChatId::resolve("+2348012345678", None, "234").unwrap();
        assert_eq!(chat.as_str(), "2348012345678@c.us");
    }

    #[test]
    fn resolve_prefers_whatsapp_id_override() {
        let chat = ChatId::resolve("08012345678", Some("98765432101234@lid"), "234").unwrap();
        assert_eq!(chat.as_str(), "98765432101234@lid");
    }

    #[test]
    fn resolve_ignores_override_without_delimiter() {
        let chat = ChatId::resolve("08012345678", Some("98765432101234"), "234").unwrap();
        assert_eq!(chat.as_str(), "2348012345678@c.us");
    }

    #[test]
    fn resolve_rejects_empty_destination() {
        let err = ChatId::resolve("n/a", None, "234").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidPayload(_)));
    }

    #[test]
    fn suffix_match_is_symmetric_across_country_codes() {
        assert!(suffix_match("+2348012345678", "08012345678"));
        assert!(suffix_match("08012345678", "+2348012345678"));
    }

    #[test]
    fn suffix_match_rejects_different_numbers() {
        assert!(!suffix_match("+2348012345678", "08099999999"));
    }

    #[test]
    fn suffix_match_requires_enough_digits() {
        assert!(!suffix_match("5678", "+2348012345678"));
        assert!(!suffix_match("", ""));
    }

    #[test]
    fn plausible_phone_heuristic() {
        assert!(is_plausible_phone("2348012345678"));
        assert!(is_plausible_phone("14155550123"));
        assert!(!is_plausible_phone("012345678901"));
        assert!(!is_plausible_phone("123"));
    }

    #[test]
    fn likely_not_phone_flags_long_ids() {
        assert!(!likely_not_phone("2348012345678"));
        assert!(likely_not_phone("0123456789012345"));
        assert!(!likely_not_phone("012345"));
    }

    #[test]
    fn phone_from_name_accepts_formatted_numbers() {
        assert_eq!(phone_from_name("+234 801-234-5678").as_deref(), Some("2348012345678"));
        assert_eq!(phone_from_name("Pastor John"), None);
        assert_eq!(phone_from_name("12345"), None);
    }

    #[test]
    fn id_classification() {
        assert!(is_direct_id("2348012345678@c.us"));
        assert!(is_direct_id("2348012345678@s.whatsapp.net"));
        assert!(is_lid("123456789012345@lid"));
        assert!(is_group_or_broadcast("12036302@g.us"));
        assert!(is_group_or_broadcast("status@broadcast"));
        assert!(!is_group_or_broadcast("2348012345678@c.us"));
        assert_eq!(local_part("2348012345678@c.us"), "2348012345678");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn suffix_match_is_symmetric(a in "[+0-9 ()-]{0,18}", b in "[+0-9 ()-]{0,18}") {
                prop_assert_eq!(suffix_match(&a, &b), suffix_match(&b, &a));
            }

            #[test]
            fn country_code_forms_match_local_form(local in "[1-9][0-9]{9}") {
                let trunk = format!("0{local}");
                let international = format!("+234 {local}");
                prop_assert!(suffix_match(&trunk, &international));
                prop_assert!(suffix_match(&international, &trunk));
            }

            #[test]
            fn name_phones_are_ascii_digits(name in "\\PC{0,20}") {
                if let Some(digits) = phone_from_name(&name) {
                    prop_assert!(!digits.is_empty());
                    prop_assert!(digits.chars().all(|c| c.is_ascii_digit()));
                }
            }
        }
    }
}
