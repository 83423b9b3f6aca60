//! Outbound delivery: normalize the destination, send through the session
//! with bounded retries, report the result to the backend queue.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use bridge_core::credential::BearerToken;
use bridge_core::errors::BridgeError;
use bridge_core::message::{
    DeliveryOutcome, MediaPayload, OutboundMessage, SendReceipt, SendRequest, StatusUpdate,
};
use bridge_core::phone::ChatId;
use bridge_session::SessionManager;

use crate::backend::MessageQueue;
use crate::retry::RetryPolicy;

pub struct DeliveryPipeline {
    session: Arc<SessionManager>,
    queue: Arc<dyn MessageQueue>,
    retry: RetryPolicy,
    country_code: String,
    /// One lock per destination chat, held for a whole retry loop.
    chat_locks: DashMap<ChatId, Arc<Mutex<()>>>,
}

impl DeliveryPipeline {
    pub fn new(
        session: Arc<SessionManager>,
        queue: Arc<dyn MessageQueue>,
        retry: RetryPolicy,
        country_code: impl Into<String>,
    ) -> Self {
        Self {
            session,
            queue,
            retry,
            country_code: country_code.into(),
            chat_locks: DashMap::new(),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    /// Run `send` while no other send to `chat` is in flight. Sends to
    /// different chats proceed concurrently.
    async fn exclusive<T, F>(&self, chat: &ChatId, send: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = Arc::clone(
            self.chat_locks
                .entry(chat.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let out = {
            let _guard = lock.lock().await;
            send.await
        };
        drop(lock);
        // Last one out removes the entry
        self.chat_locks
            .remove_if(chat, |_, l| Arc::strong_count(l) == 1);
        out
    }

    /// Single-attempt text send to an already resolved chat, serialized
    /// with every other send to that chat.
    pub async fn send_text_to(&self, chat: &ChatId, body: &str) -> Result<SendReceipt, BridgeError> {
        self.exclusive(chat, self.session.send_text(chat, body)).await
    }

    /// Check the credential and resolve the chat before any attempt is made.
    fn prepare(
        &self,
        request: &SendRequest,
        credential: Option<&BearerToken>,
    ) -> Result<ChatId, BridgeError> {
        if credential.is_none() {
            return Err(BridgeError::missing_credential());
        }
        ChatId::resolve(
            &request.phone,
            request.whatsapp_id.as_deref(),
            &self.country_code,
        )
    }

    fn finish(&self, result: Result<SendReceipt, BridgeError>, attempts: u32) -> DeliveryOutcome {
        match result {
            Ok(receipt) => {
                info!(
                    attempts,
                    message_id = receipt.message_id.as_deref().unwrap_or_default(),
                    fallback = receipt.fallback,
                    "message sent"
                );
                DeliveryOutcome::sent(receipt, self.session.client_name(), attempts)
            }
            Err(e) => {
                warn!(attempts, error = %e, error_type = e.error_kind(), "message failed");
                DeliveryOutcome::failed(&e, attempts)
            }
        }
    }

    /// Send a text message with retries. `max_attempts` overrides the
    /// configured budget for this call.
    pub async fn send_message(
        &self,
        request: &SendRequest,
        credential: Option<&BearerToken>,
        max_attempts: Option<u32>,
    ) -> DeliveryOutcome {
        let chat = match self.prepare(request, credential) {
            Ok(chat) => chat,
            Err(e) => return self.finish(Err(e), 0),
        };
        let span = info_span!(
            "send_message",
            chat_id = %chat,
            message_id = request.queue_id.as_deref().unwrap_or_default()
        );
        async {
            let attempts = self.retry.attempts_for(max_attempts);
            let (result, made) = self
                .exclusive(
                    &chat,
                    self.retry
                        .run(attempts, |_| self.session.send_text(&chat, &request.body)),
                )
                .await;
            self.finish(result, made)
        }
        .instrument(span)
        .await
    }

    pub async fn send_media(
        &self,
        request: &SendRequest,
        media: &MediaPayload,
        credential: Option<&BearerToken>,
        max_attempts: Option<u32>,
    ) -> DeliveryOutcome {
        let chat = match self.prepare(request, credential) {
            Ok(chat) => chat,
            Err(e) => return self.finish(Err(e), 0),
        };
        let span = info_span!(
            "send_media",
            chat_id = %chat,
            message_id = request.queue_id.as_deref().unwrap_or_default()
        );
        async {
            let attempts = self.retry.attempts_for(max_attempts);
            let (result, made) = self
                .exclusive(
                    &chat,
                    self.retry.run(attempts, |_| self.session.send_media(&chat, media)),
                )
                .await;
            self.finish(result, made)
        }
        .instrument(span)
        .await
    }

    /// Send one queue entry and report its fate. A failed report is logged
    /// and leaves the outcome untouched.
    pub async fn deliver(&self, message: &OutboundMessage, credential: &BearerToken) -> DeliveryOutcome {
        let request = SendRequest::from(message);
        let outcome = match &message.media {
            Some(media) => {
                let mut media = media.clone();
                if media.caption.is_none() && !message.content.trim().is_empty() {
                    media.caption = Some(message.content.clone());
                }
                self.send_media(&request, &media, Some(credential), None).await
            }
            None => self.send_message(&request, Some(credential), None).await,
        };

        let update = StatusUpdate::from_outcome(&message.id, &outcome);
        if let Err(e) = self.queue.update_status(credential, &update).await {
            error!(message_id = %message.id, error = %e, "failed to report delivery status");
        }
        outcome
    }

    /// Fetch pending entries and deliver them one at a time, in queue order.
    pub async fn drain(&self, credential: &BearerToken) -> Result<Vec<DeliveryOutcome>, BridgeError> {
        let pending = self.queue.pending(credential).await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = pending.len(), "delivering pending messages");
        let mut outcomes = Vec::with_capacity(pending.len());
        for message in &pending {
            outcomes.push(self.deliver(message, credential).await);
        }
        Ok(outcomes)
    }

    /// Drain the queue every `interval` while the session is connected.
    pub fn spawn_poller(
        self: &Arc<Self>,
        interval: Duration,
        credential: BearerToken,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !pipeline.session.is_connected() {
                    debug!("session not connected, skipping poll");
                    continue;
                }
                match pipeline.drain(&credential).await {
                    Ok(_) => {}
                    Err(BridgeError::Unauthenticated(detail)) => {
                        error!(detail = %detail, "backend rejected bridge credential");
                    }
                    Err(BridgeError::Timeout(_)) => debug!("poll timed out"),
                    Err(e) => warn!(error = %e, "poll failed"),
                }
            }
            debug!("poller stopped");
        })
    }
}
