use serde::{Deserialize, Serialize};
use std::fmt;

/// Connectivity of the single WhatsApp session owned by the bridge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Initializing,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    pub fn is_connected(&self) -> bool {
        *self == Self::Connected
    }

    /// Map a raw state string reported by the client library.
    ///
    /// Returns `None` for intermediate states (QR shown, syncing, opening)
    /// that say nothing definite about connectivity.
    pub fn from_client_state(raw: &str) -> Option<Self> {
        match raw {
            "CONNECTED" | "inChat" | "isLogged" | "qrReadSuccess" | "successChat" => {
                Some(Self::Connected)
            }
            "DISCONNECTED" | "CLOSED" | "CONFLICT" | "UNPAIRED" | "UNPAIRED_IDLE"
            | "UNLAUNCHED" | "TIMEOUT" | "browserClose" | "desconnectedMobile"
            | "deleteToken" | "notLogged" | "autocloseCalled" | "serverClose" => {
                Some(Self::Disconnected)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
