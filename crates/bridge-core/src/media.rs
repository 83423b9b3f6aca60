//! Base64 media sanitation, decoding and file-type sniffing.

use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;

use crate::errors::BridgeError;

static DATA_URL_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^data:[^;,]*(;[^,]*)?,").unwrap());

/// Strip a `data:<mime>;base64,` prefix and every whitespace character.
pub fn sanitize_base64(raw: &str) -> String {
    let trimmed = raw.trim_start();
    let body = match DATA_URL_PREFIX.find(trimmed) {
        Some(m) => &trimmed[m.end()..],
        None => trimmed,
    };
    body.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Sanitize and decode a media payload. Empty or malformed input is rejected.
pub fn decode_media(raw: &str) -> Result<Vec<u8>, BridgeError> {
    let clean = sanitize_base64(raw);
    if clean.is_empty() {
        return Err(BridgeError::InvalidPayload("media data is empty".into()));
    }
    let bytes = STANDARD
        .decode(clean.as_bytes())
        .map_err(|e| BridgeError::InvalidPayload(format!("media data is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(BridgeError::InvalidPayload("media decoded to zero bytes".into()));
    }
    Ok(bytes)
}

/// Guess a file extension from leading magic bytes.
pub fn infer_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if bytes.starts_with(b"%PDF") {
        Some("pdf")
    } else if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        Some("mp4")
    } else {
        None
    }
}

/// Extension implied by a coarse media type, used when sniffing fails.
fn extension_for_media_type(media_type: Option<&str>) -> &'static str {
    match media_type.map(str::to_ascii_lowercase).as_deref() {
        Some("image") => "jpg",
        Some("video") => "mp4",
        Some("audio") => "ogg",
        Some("document") => "pdf",
        _ => "bin",
    }
}

fn has_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
}

/// Pick the filename a media send goes out under.
///
/// A supplied name with an extension wins. Otherwise the extension comes
/// from the magic bytes, then from the coarse media type.
pub fn compose_filename(supplied: Option<&str>, bytes: &[u8], media_type: Option<&str>) -> String {
    let stem = match supplied.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) if has_extension(name) => return name.to_string(),
        Some(name) => name.to_string(),
        None => "file".to_string(),
    };
    let ext = infer_extension(bytes).unwrap_or_else(|| extension_for_media_type(media_type));
    format!("{stem}.{ext}")
}

/// MIME type for a filename's extension.
pub fn mime_for_filename(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "ogg" | "opus" => "audio/ogg",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00];
    const JPG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    const MP4: &[u8] = &[0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p', b'm', b'p', b'4', b'2'];

    #[test]
    fn sanitize_strips_data_url_and_whitespace() {
        let raw = "data:image/png;base64,iVBO\nRw0K\r\n GgoA ";
        assert_eq!(sanitize_base64(raw), "iVBORw0KGgoA");
    }

    #[test]
    fn sanitize_leaves_plain_base64() {
        assert_eq!(sanitize_base64("aGVsbG8="), "aGVsbG8=");
    }

    #[test]
    fn decode_survives_prefix_and_line_breaks() {
        let payloads: [&[u8]; 3] = [PNG, b"%PDF-1.7 minimal", &[0u8; 300]];
        for original in payloads {
            let encoded = encode(original);
            let wrapped: String = encoded
                .as_bytes()
                .chunks(76)
                .map(|c| std::str::from_utf8(c).unwrap())
                .collect::<Vec<_>>()
                .join("\n");
            let noisy = format!("data:application/octet-stream;base64,{wrapped}\n");
            assert_eq!(decode_media(&noisy).unwrap(), original);
        }
    }

    #[test]
    fn decode_rejects_empty() {
        assert!(matches!(decode_media(""), Err(BridgeError::InvalidPayload(_))));
        assert!(matches!(
            decode_media("data:image/png;base64,  \n"),
            Err(BridgeError::InvalidPayload(_))
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode_media("!!!not base64!!!"), Err(BridgeError::InvalidPayload(_))));
    }

    #[test]
    fn magic_bytes() {
        assert_eq!(infer_extension(PNG), Some("png"));
        assert_eq!(infer_extension(JPG), Some("jpg"));
        assert_eq!(infer_extension(b"%PDF-1.4"), Some("pdf"));
        assert_eq!(infer_extension(MP4), Some("mp4"));
        assert_eq!(infer_extension(b"hello"), None);
        assert_eq!(infer_extension(&[]), None);
    }

    #[test]
    fn filename_keeps_supplied_extension() {
        assert_eq!(compose_filename(Some("flyer.jpeg"), PNG, None), "flyer.jpeg");
    }

    #[test]
    fn filename_gets_sniffed_extension() {
        assert_eq!(compose_filename(Some("flyer"), PNG, Some("image")), "flyer.png");
        assert_eq!(compose_filename(Some(".hidden"), MP4, None), ".hidden.mp4");
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(mime_for_filename("flyer.JPG"), "image/jpeg");
        assert_eq!(mime_for_filename("sermon.mp4"), "video/mp4");
        assert_eq!(mime_for_filename("noext"), "application/octet-stream");
    }

    #[test]
    fn filename_falls_back_to_media_type() {
        assert_eq!(compose_filename(None, b"opaque", Some("audio")), "file.ogg");
        assert_eq!(compose_filename(None, PNG, Some("video")), "file.png");
        assert!(compose_filename(Some("x"), b"opaque", None).ends_with(".bin"));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        /// Data-URL prefix, possibly absent.
        fn prefix() -> impl Strategy<Value = String> {
            prop_oneof![
                Just(String::new()),
                "[a-z]{1,11}/[a-z0-9.+-]{1,16}".prop_map(|mime| format!("data:{mime};base64,")),
                Just("data:;base64,".to_string()),
            ]
        }

        /// Spread whitespace through an encoded body at the given offsets.
        fn inject(body: &str, at: &[(usize, char)]) -> String {
            let mut out: Vec<char> = body.chars().collect();
            for &(pos, ws) in at {
                let pos = pos % (out.len() + 1);
                out.insert(pos, ws);
            }
            out.into_iter().collect()
        }

        proptest! {
            #[test]
            fn decode_recovers_wrapped_bytes(
                bytes in proptest::collection::vec(any::<u8>(), 1..512),
                prefix in prefix(),
                breaks in proptest::collection::vec(
                    (any::<usize>(), prop_oneof![Just(' '), Just('\n'), Just('\r'), Just('\t')]),
                    0..24,
                ),
                lead in "[ \n\t]{0,3}",
            ) {
                let noisy = format!("{lead}{prefix}{}", inject(&encode(&bytes), &breaks));
                prop_assert_eq!(decode_media(&sanitize_base64(&noisy)).unwrap(), bytes.clone());
                prop_assert_eq!(decode_media(&noisy).unwrap(), bytes);
            }

            #[test]
            fn sanitized_output_has_no_whitespace(raw in "\\PC{0,64}") {
                prop_assert!(!sanitize_base64(&raw).chars().any(char::is_whitespace));
            }
        }
    }
}
