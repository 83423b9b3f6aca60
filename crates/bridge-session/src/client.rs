use std::path::Path;

use async_trait::async_trait;

use bridge_core::errors::BridgeError;
use bridge_core::groups::RawGroup;
use bridge_core::message::{RawContact, SendReceipt};
use bridge_core::phone::ChatId;

/// Result of asking the client to start the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Connected,
    /// The device must be paired; `qr` is shown to the operator unchanged.
    PairingRequired { qr: String },
    /// Still booting. The real state arrives later as a client event.
    Starting,
}

/// A file to send from memory. `base64` is already sanitized.
#[derive(Clone, Copy, Debug)]
pub struct MediaFile<'a> {
    pub base64: &'a str,
    pub filename: &'a str,
    pub caption: Option<&'a str>,
    pub mime: Option<&'a str>,
}

/// Operations the bridge needs from a headless WhatsApp web client.
///
/// Group chats use the same send calls with a `@g.us` chat id.
///
/// Events (messages, acks, state reports, participant changes) flow separately as
/// `ClientEvent`s over an mpsc channel handed to the session manager.
#[async_trait]
pub trait WhatsAppClient: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, session: &str) -> Result<StartOutcome, BridgeError>;
    async fn close(&self) -> Result<(), BridgeError>;

    /// Raw state string (`CONNECTED`, `CONFLICT`, ...).
    async fn connection_state(&self) -> Result<String, BridgeError>;

    async fn send_text(&self, chat: &ChatId, body: &str) -> Result<SendReceipt, BridgeError>;
    async fn send_file_base64(
        &self,
        chat: &ChatId,
        file: MediaFile<'_>,
    ) -> Result<SendReceipt, BridgeError>;
    async fn send_file_path(
        &self,
        chat: &ChatId,
        path: &Path,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<SendReceipt, BridgeError>;

    async fn get_contact(&self, id: &str) -> Result<Option<RawContact>, BridgeError>;

    /// Every group the session's account belongs to.
    async fn get_all_groups(&self) -> Result<Vec<RawGroup>, BridgeError>;
}
