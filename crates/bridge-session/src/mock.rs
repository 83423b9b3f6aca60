use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use bridge_core::errors::BridgeError;
use bridge_core::groups::RawGroup;
use bridge_core::message::{RawContact, SendReceipt};
use bridge_core::phone::ChatId;

use crate::client::{MediaFile, StartOutcome, WhatsAppClient};

/// One send the mock accepted or rejected.
#[derive(Clone, Debug, PartialEq)]
pub struct SentRecord {
    pub chat: String,
    pub kind: SentKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SentKind {
    Text(String),
    Base64 { filename: String, caption: Option<String> },
    /// `existed`: the file was on disk when the mock was called.
    File { path: PathBuf, filename: String, existed: bool, len: u64 },
}

/// Scripted client for deterministic tests. Each queue is consumed in order;
/// an empty queue falls back to success.
#[derive(Default)]
pub struct MockClient {
    starts: Mutex<VecDeque<Result<StartOutcome, BridgeError>>>,
    start_delay: Mutex<Option<Duration>>,
    sends: Mutex<VecDeque<Result<SendReceipt, BridgeError>>>,
    base64_sends: Mutex<VecDeque<Result<SendReceipt, BridgeError>>>,
    file_sends: Mutex<VecDeque<Result<SendReceipt, BridgeError>>>,
    state: Mutex<Option<Result<String, BridgeError>>>,
    contacts: Mutex<HashMap<String, RawContact>>,
    contact_error: Mutex<Option<BridgeError>>,
    contact_delay: Mutex<Option<Duration>>,
    groups: Mutex<Vec<RawGroup>>,
    send_delay: Mutex<Option<Duration>>,
    /// chat → sends currently inside `send_text`
    in_flight: Mutex<HashMap<String, usize>>,
    peak_per_chat: Mutex<HashMap<String, usize>>,
    peak_total: AtomicUsize,
    sent: Mutex<Vec<SentRecord>>,
    start_calls: AtomicUsize,
    contact_lookups: AtomicUsize,
    close_calls: AtomicUsize,
    send_calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_start(&self, outcome: Result<StartOutcome, BridgeError>) -> &Self {
        self.starts.lock().push_back(outcome);
        self
    }

    /// Make `start` take this long, to widen race windows in tests.
    pub fn set_start_delay(&self, delay: Duration) -> &Self {
        *self.start_delay.lock() = Some(delay);
        self
    }

    pub fn push_send(&self, result: Result<SendReceipt, BridgeError>) -> &Self {
        self.sends.lock().push_back(result);
        self
    }

    pub fn push_base64_send(&self, result: Result<SendReceipt, BridgeError>) -> &Self {
        self.base64_sends.lock().push_back(result);
        self
    }

    pub fn push_file_send(&self, result: Result<SendReceipt, BridgeError>) -> &Self {
        self.file_sends.lock().push_back(result);
        self
    }

    pub fn set_connection_state(&self, state: Result<String, BridgeError>) -> &Self {
        *self.state.lock() = Some(state);
        self
    }

    pub fn insert_contact(&self, id: &str, contact: RawContact) -> &Self {
        self.contacts.lock().insert(id.to_string(), contact);
        self
    }

    pub fn fail_contact_lookups(&self, error: BridgeError) -> &Self {
        *self.contact_error.lock() = Some(error);
        self
    }

    /// Make `get_contact` take this long.
    pub fn set_contact_delay(&self, delay: Duration) -> &Self {
        *self.contact_delay.lock() = Some(delay);
        self
    }

    pub fn set_groups(&self, groups: Vec<RawGroup>) -> &Self {
        *self.groups.lock() = groups;
        self
    }

    /// Make `send_text` take this long, so overlapping sends are observable.
    pub fn set_send_delay(&self, delay: Duration) -> &Self {
        *self.send_delay.lock() = Some(delay);
        self
    }

    pub fn contact_lookups(&self) -> usize {
        self.contact_lookups.load(Ordering::Relaxed)
    }

    /// Most `send_text` calls ever in progress at once for `chat`.
    pub fn peak_in_flight(&self, chat: &str) -> usize {
        self.peak_per_chat.lock().get(chat).copied().unwrap_or_default()
    }

    /// Most `send_text` calls ever in progress at once, across chats.
    pub fn peak_in_flight_total(&self) -> usize {
        self.peak_total.load(Ordering::Relaxed)
    }

    fn enter(&self, chat: &str) {
        let mut in_flight = self.in_flight.lock();
        let n = in_flight.entry(chat.to_string()).or_default();
        *n += 1;
        let mut peaks = self.peak_per_chat.lock();
        let peak = peaks.entry(chat.to_string()).or_default();
        *peak = (*peak).max(*n);
        let total: usize = in_flight.values().sum();
        self.peak_total.fetch_max(total, Ordering::Relaxed);
    }

    fn leave(&self, chat: &str) {
        if let Some(n) = self.in_flight.lock().get_mut(chat) {
            *n = n.saturating_sub(1);
        }
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::Relaxed)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::Relaxed)
    }

    /// Every send attempt, accepted or not.
    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::Relaxed)
    }

    /// Accepted sends, plus every file-path send (so tests can inspect the path).
    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().clone()
    }

    fn receipt(&self) -> SendReceipt {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        SendReceipt {
            message_id: Some(format!("mock-msg-{n}")),
            fallback: false,
        }
    }

    fn next_result(
        &self,
        queue: &Mutex<VecDeque<Result<SendReceipt, BridgeError>>>,
    ) -> Result<SendReceipt, BridgeError> {
        self.send_calls.fetch_add(1, Ordering::Relaxed);
        queue.lock().pop_front().unwrap_or_else(|| Ok(self.receipt()))
    }
}

#[async_trait]
impl WhatsAppClient for MockClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start(&self, _session: &str) -> Result<StartOutcome, BridgeError> {
        self.start_calls.fetch_add(1, Ordering::Relaxed);
        let delay = *self.start_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.starts
            .lock()
            .pop_front()
            .unwrap_or(Ok(StartOutcome::Connected))
    }

    async fn close(&self) -> Result<(), BridgeError> {
        self.close_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn connection_state(&self) -> Result<String, BridgeError> {
        self.state
            .lock()
            .clone()
            .unwrap_or_else(|| Ok("CONNECTED".to_string()))
    }

    async fn send_text(&self, chat: &ChatId, body: &str) -> Result<SendReceipt, BridgeError> {
        let delay = *self.send_delay.lock();
        if let Some(delay) = delay {
            self.enter(chat.as_str());
            tokio::time::sleep(delay).await;
            self.leave(chat.as_str());
        }
        let result = self.next_result(&self.sends);
        if result.is_ok() {
            self.sent.lock().push(SentRecord {
                chat: chat.to_string(),
                kind: SentKind::Text(body.to_string()),
            });
        }
        result
    }

    async fn send_file_base64(
        &self,
        chat: &ChatId,
        file: MediaFile<'_>,
    ) -> Result<SendReceipt, BridgeError> {
        let result = self.next_result(&self.base64_sends);
        if result.is_ok() {
            self.sent.lock().push(SentRecord {
                chat: chat.to_string(),
                kind: SentKind::Base64 {
                    filename: file.filename.to_string(),
                    caption: file.caption.map(str::to_string),
                },
            });
        }
        result
    }

    async fn send_file_path(
        &self,
        chat: &ChatId,
        path: &Path,
        filename: &str,
        _caption: Option<&str>,
    ) -> Result<SendReceipt, BridgeError> {
        let meta = tokio::fs::metadata(path).await.ok();
        let result = self.next_result(&self.file_sends).map(|mut r| {
            r.fallback = true;
            r
        });
        self.sent.lock().push(SentRecord {
            chat: chat.to_string(),
            kind: SentKind::File {
                path: path.to_path_buf(),
                filename: filename.to_string(),
                existed: meta.is_some(),
                len: meta.map(|m| m.len()).unwrap_or_default(),
            },
        });
        result
    }

    async fn get_contact(&self, id: &str) -> Result<Option<RawContact>, BridgeError> {
        self.contact_lookups.fetch_add(1, Ordering::Relaxed);
        let delay = *self.contact_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.contact_error.lock().clone() {
            return Err(err);
        }
        Ok(self.contacts.lock().get(id).cloned())
    }

    async fn get_all_groups(&self) -> Result<Vec<RawGroup>, BridgeError> {
        Ok(self.groups.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_sends_then_default_success() {
        let mock = MockClient::new();
        mock.push_send(Err(BridgeError::DeliveryFailed("boom".into())));
        let chat = ChatId::from_raw("1@c.us");

        assert!(mock.send_text(&chat, "a").await.is_err());
        let ok = mock.send_text(&chat, "b").await.unwrap();
        assert_eq!(ok.message_id.as_deref(), Some("mock-msg-1"));
        assert_eq!(mock.send_calls(), 2);
        assert_eq!(mock.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tracks_overlapping_sends_per_chat() {
        let mock = MockClient::new();
        mock.set_send_delay(Duration::from_secs(1));
        let a = ChatId::from_raw("1@c.us");
        let b = ChatId::from_raw("2@c.us");
        let (r1, r2, r3) = tokio::join!(mock.send_text(&a, "x"), mock.send_text(&a, "y"), mock.send_text(&b, "z"));
        assert!(r1.is_ok() && r2.is_ok() && r3.is_ok());
        assert_eq!(mock.peak_in_flight("1@c.us"), 2);
        assert_eq!(mock.peak_in_flight("2@c.us"), 1);
        assert_eq!(mock.peak_in_flight_total(), 3);
    }

    #[tokio::test]
    async fn start_defaults_to_connected() {
        let mock = MockClient::new();
        mock.push_start(Ok(StartOutcome::PairingRequired { qr: "qr".into() }));
        assert!(matches!(mock.start("s").await, Ok(StartOutcome::PairingRequired { .. })));
        assert_eq!(mock.start("s").await.unwrap(), StartOutcome::Connected);
        assert_eq!(mock.start_calls(), 2);
    }
}
