//! Group management: sync the account's groups to the backend, report
//! new members, and drain the welcome and group-broadcast queues.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bridge_core::clock::{Sleeper, TokioSleeper};
use bridge_core::credential::BearerToken;
use bridge_core::errors::BridgeError;
use bridge_core::groups::{
    GroupMessageStatus, GroupRecord, GroupSyncReport, MemberJoined, ParticipantAction,
    ParticipantsChanged,
};
use bridge_core::phone::ChatId;
use bridge_core::state::ConnectionState;
use bridge_session::manager::CONTACT_LOOKUP_TIMEOUT;
use bridge_session::SessionEvent;

use crate::backend::GroupQueue;
use crate::pipeline::DeliveryPipeline;

/// Default gap between consecutive group-side sends.
pub const DEFAULT_SEND_SPACING: Duration = Duration::from_secs(3);

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub struct GroupManager {
    pipeline: Arc<DeliveryPipeline>,
    queue: Arc<dyn GroupQueue>,
    spacing: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl GroupManager {
    pub fn new(pipeline: Arc<DeliveryPipeline>, queue: Arc<dyn GroupQueue>, spacing: Duration) -> Self {
        Self {
            pipeline,
            queue,
            spacing,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Push every group the account belongs to.
    pub async fn sync(&self, credential: &BearerToken) -> Result<GroupSyncReport, BridgeError> {
        let groups = self.pipeline.session().groups().await?;
        let records: Vec<GroupRecord> = groups.iter().map(GroupRecord::from).collect();
        let report = self.queue.sync_groups(credential, &records).await?;
        info!(
            synced = report.synced,
            new = report.new,
            updated = report.updated,
            "groups synced"
        );
        Ok(report)
    }

    /// Report added members to the backend. Returns how many were accepted.
    pub async fn handle_participants(&self, credential: &BearerToken, change: &ParticipantsChanged) -> usize {
        match change.action {
            ParticipantAction::Add => {}
            ParticipantAction::Remove => {
                info!(group = %change.group_id, members = ?change.who, "members left group");
                return 0;
            }
            other => {
                debug!(group = %change.group_id, action = ?other, "ignoring participant change");
                return 0;
            }
        }

        let mut reported = 0;
        for member in &change.who {
            let session = self.pipeline.session();
            let contact = match tokio::time::timeout(CONTACT_LOOKUP_TIMEOUT, session.lookup_contact(member)).await {
                Ok(Ok(contact)) => contact,
                Ok(Err(e)) => {
                    debug!(member = %member, error = %e, "member lookup failed");
                    None
                }
                Err(_) => {
                    debug!(member = %member, "member lookup timed out");
                    None
                }
            };
            let joined = MemberJoined::new(member, contact.as_ref(), now_rfc3339());
            match self
                .queue
                .member_joined(credential, &change.group_id, &joined)
                .await
            {
                Ok(()) => {
                    info!(group = %change.group_id, member = %member, "new group member reported");
                    reported += 1;
                }
                Err(e) => warn!(group = %change.group_id, member = %member, error = %e, "failed to report new member"),
            }
        }
        reported
    }

    /// Send owed welcomes, one at a time with `spacing` after each send.
    /// A failed entry is logged and left for the next round.
    pub async fn process_welcome_queue(&self, credential: &BearerToken) -> Result<usize, BridgeError> {
        let welcomes = self.queue.welcome_queue(credential).await?;
        if welcomes.is_empty() {
            return Ok(0);
        }
        info!(count = welcomes.len(), "processing welcome messages");

        let mut sent = 0;
        for welcome in &welcomes {
            let chat = match ChatId::resolve(&welcome.phone, Some(&welcome.phone), self.pipeline.country_code()) {
                Ok(chat) => chat,
                Err(e) => {
                    warn!(welcome_id = %welcome.id, error = %e, "unusable welcome destination");
                    continue;
                }
            };
            if let Err(e) = self.pipeline.send_text_to(&chat, &welcome.message).await {
                warn!(welcome_id = %welcome.id, chat_id = %chat, error = %e, "welcome send failed");
                continue;
            }
            info!(
                welcome_id = %welcome.id,
                chat_id = %chat,
                group = welcome.group_name.as_deref().unwrap_or_default(),
                "welcome sent"
            );
            if let Err(e) = self.queue.mark_welcome_sent(credential, &welcome.id).await {
                error!(welcome_id = %welcome.id, error = %e, "failed to mark welcome sent");
            }
            sent += 1;
            self.sleeper.sleep(self.spacing).await;
        }
        Ok(sent)
    }

    /// Send pending group broadcasts and report each one's fate.
    pub async fn process_group_messages(&self, credential: &BearerToken) -> Result<usize, BridgeError> {
        let messages = self.queue.pending_group_messages(credential).await?;
        if messages.is_empty() {
            return Ok(0);
        }
        info!(count = messages.len(), "processing group messages");

        let mut sent = 0;
        for message in &messages {
            let chat = ChatId::from_raw(message.group_id.clone());
            let status = match self.pipeline.send_text_to(&chat, &message.content).await {
                Ok(_) => {
                    info!(message_id = %message.id, chat_id = %chat, "group message sent");
                    sent += 1;
                    GroupMessageStatus::sent(now_rfc3339())
                }
                Err(e) => {
                    warn!(message_id = %message.id, chat_id = %chat, error = %e, "group message failed");
                    GroupMessageStatus::failed(e.to_string())
                }
            };
            let delivered = status.sent_at.is_some();
            if let Err(e) = self.queue.update_group_message(credential, &message.id, &status).await {
                error!(message_id = %message.id, error = %e, "failed to report group message status");
            }
            if delivered {
                self.sleeper.sleep(self.spacing).await;
            }
        }
        Ok(sent)
    }

    /// One polling round: welcomes first, then group broadcasts.
    pub async fn poll_once(&self, credential: &BearerToken) {
        if let Err(e) = self.process_welcome_queue(credential).await {
            warn!(error = %e, "welcome queue poll failed");
        }
        if let Err(e) = self.process_group_messages(credential).await {
            warn!(error = %e, "group message poll failed");
        }
    }

    /// Poll both group queues every `interval` while the session is connected.
    pub fn spawn_poller(
        self: &Arc<Self>,
        interval: Duration,
        credential: BearerToken,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let groups = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !groups.pipeline.session().is_connected() {
                    debug!("session not connected, skipping group poll");
                    continue;
                }
                groups.poll_once(&credential).await;
            }
            debug!("group poller stopped");
        })
    }

    /// Sync on every connect and report members as they join.
    pub fn spawn_event_watch(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<SessionEvent>,
        credential: BearerToken,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let groups = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(SessionEvent::Status { state: ConnectionState::Connected, .. }) => {
                        if let Err(e) = groups.sync(&credential).await {
                            warn!(error = %e, "group sync failed");
                        }
                    }
                    Ok(SessionEvent::Participants(change)) => {
                        groups.handle_participants(&credential, &change).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "group watcher lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
