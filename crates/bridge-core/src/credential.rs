use secrecy::{ExposeSecret, SecretString};

/// Bearer token for backend calls (zeroized on drop, redacted in Debug).
#[derive(Clone)]
pub struct BearerToken(SecretString);

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken([REDACTED])")
    }
}

impl BearerToken {
    /// Wrap a raw token. Blank tokens count as absent.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(SecretString::from(trimmed.to_string())))
    }

    /// Extract the token from an `Authorization: Bearer <token>` header value.
    pub fn from_header(value: &str) -> Option<Self> {
        let (scheme, token) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        Self::new(token)
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Header value for outgoing requests.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.expose())
    }
}

impl From<SecretString> for BearerToken {
    fn from(secret: SecretString) -> Self {
        Self(secret)
    }
}
