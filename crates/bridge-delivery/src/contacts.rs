use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bridge_core::contacts::ContactBook;
use bridge_core::credential::BearerToken;
use bridge_core::errors::BridgeError;

use crate::backend::ContactDirectory;

/// Replace the cached directory with a fresh copy from the backend.
pub async fn refresh_contacts(
    directory: &dyn ContactDirectory,
    book: &ContactBook,
    credential: &BearerToken,
) -> Result<usize, BridgeError> {
    let contacts = directory.contacts(credential).await?;
    let count = contacts.len();
    book.replace(contacts);
    debug!(count, "contact book refreshed");
    Ok(count)
}

/// Refresh immediately, then every `interval`. Failures keep the old copy.
pub fn spawn_contact_refresh(
    directory: Arc<dyn ContactDirectory>,
    book: Arc<ContactBook>,
    credential: BearerToken,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = refresh_contacts(directory.as_ref(), &book, &credential).await {
                warn!(error = %e, cached = book.len(), "contact refresh failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_core::contacts::{KnownContact, MatchQuery, MatchRule};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedDirectory(Mutex<VecDeque<Result<Vec<KnownContact>, BridgeError>>>);

    #[async_trait]
    impl ContactDirectory for ScriptedDirectory {
        async fn contacts(&self, _c: &BearerToken) -> Result<Vec<KnownContact>, BridgeError> {
            self.0
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(BridgeError::Network("exhausted".into())))
        }
    }

    fn ada() -> KnownContact {
        KnownContact {
            id: "c1".into(),
            name: "Ada Obi".into(),
            phone: "08012345678".into(),
            whatsapp_id: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_cached_copy() {
        let directory = Arc::new(ScriptedDirectory(Mutex::new(VecDeque::from([
            Ok(vec![ada()]),
            Err(BridgeError::Network("down".into())),
        ]))));
        let book = Arc::new(ContactBook::new());
        let cancel = CancellationToken::new();
        let handle = spawn_contact_refresh(
            directory,
            book.clone(),
            BearerToken::new("tok").unwrap(),
            Duration::from_secs(300),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(book.len(), 1);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(book.len(), 1);

        let query = MatchQuery {
            sender_id: "2348012345678@c.us",
            phone: Some("2348012345678"),
            name: None,
        };
        let (contact, rule) = book.match_and_learn(&query).unwrap();
        assert_eq!(contact.id, "c1");
        assert_eq!(rule, MatchRule::PhoneSuffix);

        cancel.cancel();
        handle.await.unwrap();
    }
}
