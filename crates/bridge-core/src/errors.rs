use std::time::Duration;

/// Typed error hierarchy for bridge operations.
/// Classifies errors as retryable (transient send failures) or terminal.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BridgeError {
    // Terminal for the call, caller should surface "reconnecting"
    #[error("Bridge not connected. Please wait for reconnection.")]
    SessionNotReady,
    #[error("Not authenticated. {0}")]
    Unauthenticated(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("session detached: {0}")]
    SessionDetached(String),

    // Retryable
    #[error("{0}")]
    DeliveryFailed(String),
    #[error("backend error {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),

    // Operational
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

/// Error text fragments that mean the browser-side session handle died.
const DETACHED_MARKERS: &[&str] = &["detached", "target closed", "session closed"];

impl BridgeError {
    /// Standard message for a call made without a bearer credential.
    pub fn missing_credential() -> Self {
        Self::Unauthenticated("Please login.".into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DeliveryFailed(_) | Self::Backend { .. } | Self::Network(_) | Self::Timeout(_)
        )
    }

    /// Classify a raw send failure from the client library.
    pub fn from_send_failure(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if DETACHED_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::SessionDetached(message)
        } else {
            Self::DeliveryFailed(message)
        }
    }

    /// Short classification string for logging and the `errorType` wire field.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::SessionNotReady => "session_not_ready",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::SessionDetached(_) => "session_detached",
            Self::DeliveryFailed(_) => "delivery_failed",
            Self::Backend { .. } => "backend_error",
            Self::Network(_) => "network_error",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify a backend HTTP status code.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthenticated(format!("credential rejected ({status}): {body}")),
            400 | 422 => Self::InvalidPayload(body),
            _ => Self::Backend { status, body },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(BridgeError::DeliveryFailed("boom".into()).is_retryable());
        assert!(BridgeError::Network("tcp".into()).is_retryable());
        assert!(BridgeError::Backend { status: 502, body: "bad gateway".into() }.is_retryable());
        assert!(BridgeError::Timeout(Duration::from_secs(5)).is_retryable());
    }

    #[test]
    fn terminal_classification() {
        assert!(!BridgeError::SessionNotReady.is_retryable());
        assert!(!BridgeError::missing_credential().is_retryable());
        assert!(!BridgeError::InvalidPayload("empty".into()).is_retryable());
        assert!(!BridgeError::SessionDetached("detached Frame".into()).is_retryable());
    }

    #[test]
    fn send_failure_detects_detached_handle() {
        let err = BridgeError::from_send_failure("Attempted to use detached Frame 'A1B2'");
        assert!(matches!(err, BridgeError::SessionDetached(_)));

        let err = BridgeError::from_send_failure("Protocol error: Target closed.");
        assert!(matches!(err, BridgeError::SessionDetached(_)));

        let err = BridgeError::from_send_failure("chat not found");
        assert!(matches!(err, BridgeError::DeliveryFailed(_)));
    }

    #[test]
    fn from_status_mapping() {
        assert!(matches!(
            BridgeError::from_status(401, "expired".into()),
            BridgeError::Unauthenticated(_)
        ));
        assert!(matches!(
            BridgeError::from_status(403, "forbidden".into()),
            BridgeError::Unauthenticated(_)
        ));
        assert!(matches!(
            BridgeError::from_status(400, "bad".into()),
            BridgeError::InvalidPayload(_)
        ));
        assert!(BridgeError::from_status(500, "internal".into()).is_retryable());
    }

    #[test]
    fn unauthenticated_message_prefix() {
        let err = BridgeError::missing_credential();
        assert_eq!(err.to_string(), "Not authenticated. Please login.");
        assert_eq!(err.error_kind(), "unauthenticated");
    }

    #[test]
    fn delivery_failed_displays_raw_message() {
        let err = BridgeError::DeliveryFailed("number not on whatsapp".into());
        assert_eq!(err.to_string(), "number not on whatsapp");
    }
}
