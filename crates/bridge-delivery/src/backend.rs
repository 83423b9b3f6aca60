//! HTTP client for the CRM backend: the outbound queue, status reports,
//! inbound forwarding, the contact directory and the group endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use bridge_core::contacts::KnownContact;
use bridge_core::credential::BearerToken;
use bridge_core::errors::BridgeError;
use bridge_core::groups::{
    GroupMessage, GroupMessageStatus, GroupRecord, GroupSyncReport, MemberJoined, WelcomeEntry,
};
use bridge_core::message::{InboundEvent, OutboundMessage, StatusUpdate};

/// Source of queued outbound messages.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Pending messages in FIFO order.
    async fn pending(&self, credential: &BearerToken) -> Result<Vec<OutboundMessage>, BridgeError>;

    async fn update_status(
        &self,
        credential: &BearerToken,
        update: &StatusUpdate,
    ) -> Result<(), BridgeError>;
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn contacts(&self, credential: &BearerToken) -> Result<Vec<KnownContact>, BridgeError>;
}

/// Receives normalized inbound messages.
#[async_trait]
pub trait IncomingSink: Send + Sync {
    async fn forward_incoming(
        &self,
        credential: &BearerToken,
        event: &InboundEvent,
    ) -> Result<(), BridgeError>;
}

/// Group-side backend endpoints: sync, joins, welcomes and group broadcasts.
#[async_trait]
pub trait GroupQueue: Send + Sync {
    async fn sync_groups(
        &self,
        credential: &BearerToken,
        groups: &[GroupRecord],
    ) -> Result<GroupSyncReport, BridgeError>;

    async fn member_joined(
        &self,
        credential: &BearerToken,
        group_id: &str,
        member: &MemberJoined,
    ) -> Result<(), BridgeError>;

    /// Welcomes owed to new members. Empty when the backend has no queue.
    async fn welcome_queue(&self, credential: &BearerToken) -> Result<Vec<WelcomeEntry>, BridgeError>;

    async fn mark_welcome_sent(&self, credential: &BearerToken, id: &str) -> Result<(), BridgeError>;

    /// Pending group broadcasts. Empty when the backend has no queue.
    async fn pending_group_messages(
        &self,
        credential: &BearerToken,
    ) -> Result<Vec<GroupMessage>, BridgeError>;

    async fn update_group_message(
        &self,
        credential: &BearerToken,
        id: &str,
        status: &GroupMessageStatus,
    ) -> Result<(), BridgeError>;
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub base_url: String,
    /// Pairs this bridge with an organization on the backend.
    pub connection_code: Option<String>,
    pub request_timeout: Duration,
    pub status_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct PendingResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    messages: Vec<OutboundMessage>,
}

#[derive(Serialize)]
struct SyncBody<'a> {
    groups: &'a [GroupRecord],
}

#[derive(Serialize)]
struct IncomingBody<'a> {
    #[serde(flatten)]
    event: &'a InboundEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

pub struct BackendClient {
    http: Client,
    config: BackendConfig,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self, BridgeError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BridgeError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn with_code(&self, req: RequestBuilder) -> RequestBuilder {
        match self.config.connection_code.as_deref() {
            Some(code) => req.query(&[("code", code)]),
            None => req,
        }
    }

    async fn execute(
        &self,
        req: RequestBuilder,
        credential: &BearerToken,
        timeout: Duration,
    ) -> Result<Response, BridgeError> {
        let resp = req
            .header("authorization", credential.header_value())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BridgeError::Timeout(timeout)
                } else {
                    BridgeError::Network(e.to_string())
                }
            })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(BridgeError::from_status(status.as_u16(), body))
    }

    async fn json<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        credential: &BearerToken,
    ) -> Result<T, BridgeError> {
        let resp = self
            .execute(req, credential, self.config.request_timeout)
            .await?;
        resp.json()
            .await
            .map_err(|e| BridgeError::Backend { status: 200, body: format!("malformed response: {e}") })
    }

    /// POST with no interesting response body.
    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        credential: &BearerToken,
        body: Option<&B>,
    ) -> Result<(), BridgeError> {
        let mut req = self.with_code(self.http.post(self.url(path)));
        if let Some(body) = body {
            req = req.json(body);
        }
        self.execute(req, credential, self.config.request_timeout)
            .await?;
        Ok(())
    }

    /// GET a list that the backend may not serve at all; 404 reads as empty.
    async fn optional_list<T: DeserializeOwned>(
        &self,
        path: &str,
        credential: &BearerToken,
    ) -> Result<Vec<T>, BridgeError> {
        let req = self.with_code(self.http.get(self.url(path)));
        match self.json(req, credential).await {
            Err(BridgeError::Backend { status: 404, .. }) => {
                debug!(path, "backend has no such queue");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Status of the backend's view of this bridge. Never fails: a timeout
    /// or transport error is reported as `"error: …"`. Without a credential
    /// no request is made.
    pub async fn status(&self, credential: Option<&BearerToken>) -> String {
        let Some(credential) = credential else {
            return "error: Not authenticated".to_string();
        };
        let req = self
            .http
            .get(self.url("/api/whatsapp/status"))
            .header("authorization", credential.header_value());
        let resp = match req.timeout(self.config.status_timeout).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => return "error: timeout".to_string(),
            Err(e) => return format!("error: {e}"),
        };
        let status = resp.status();
        if !status.is_success() {
            return format!("error: backend returned {}", status.as_u16());
        }
        match resp.json::<Value>().await {
            Ok(body) => body["status"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string()),
            Err(e) => format!("error: {e}"),
        }
    }
}

#[async_trait]
impl MessageQueue for BackendClient {
    #[instrument(skip_all)]
    async fn pending(&self, credential: &BearerToken) -> Result<Vec<OutboundMessage>, BridgeError> {
        let req = self.with_code(self.http.get(self.url("/api/bridge/pending-messages")));
        let body: PendingResponse = self.json(req, credential).await?;
        if !body.success {
            debug!("backend reported no pending batch");
            return Ok(Vec::new());
        }
        Ok(body.messages)
    }

    #[instrument(skip_all, fields(message_id = %update.message_id))]
    async fn update_status(
        &self,
        credential: &BearerToken,
        update: &StatusUpdate,
    ) -> Result<(), BridgeError> {
        let req = self
            .with_code(self.http.post(self.url("/api/bridge/update-message-status")))
            .json(update);
        self.execute(req, credential, self.config.request_timeout)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ContactDirectory for BackendClient {
    async fn contacts(&self, credential: &BearerToken) -> Result<Vec<KnownContact>, BridgeError> {
        self.json(self.http.get(self.url("/api/contacts")), credential)
            .await
    }
}

#[async_trait]
impl IncomingSink for BackendClient {
    #[instrument(skip_all, fields(from = %event.from))]
    async fn forward_incoming(
        &self,
        credential: &BearerToken,
        event: &InboundEvent,
    ) -> Result<(), BridgeError> {
        let body = IncomingBody {
            event,
            code: self.config.connection_code.as_deref(),
        };
        let req = self
            .with_code(self.http.post(self.url("/api/whatsapp/incoming")))
            .json(&body);
        self.execute(req, credential, self.config.request_timeout)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl GroupQueue for BackendClient {
    #[instrument(skip_all, fields(count = groups.len()))]
    async fn sync_groups(
        &self,
        credential: &BearerToken,
        groups: &[GroupRecord],
    ) -> Result<GroupSyncReport, BridgeError> {
        let req = self
            .with_code(self.http.post(self.url("/api/groups/sync")))
            .json(&SyncBody { groups });
        self.json(req, credential).await
    }

    #[instrument(skip_all, fields(group_id = %group_id, member = %member.whatsapp_id))]
    async fn member_joined(
        &self,
        credential: &BearerToken,
        group_id: &str,
        member: &MemberJoined,
    ) -> Result<(), BridgeError> {
        self.post(&format!("/api/groups/{group_id}/members/joined"), credential, Some(member))
            .await
    }

    async fn welcome_queue(&self, credential: &BearerToken) -> Result<Vec<WelcomeEntry>, BridgeError> {
        self.optional_list("/api/groups/welcome-queue", credential)
            .await
    }

    #[instrument(skip_all, fields(welcome_id = %id))]
    async fn mark_welcome_sent(&self, credential: &BearerToken, id: &str) -> Result<(), BridgeError> {
        self.post::<Value>(&format!("/api/groups/welcome-queue/{id}/sent"), credential, None)
            .await
    }

    async fn pending_group_messages(
        &self,
        credential: &BearerToken,
    ) -> Result<Vec<GroupMessage>, BridgeError> {
        self.optional_list("/api/groups/messages/pending", credential)
            .await
    }

    #[instrument(skip_all, fields(message_id = %id))]
    async fn update_group_message(
        &self,
        credential: &BearerToken,
        id: &str,
        status: &GroupMessageStatus,
    ) -> Result<(), BridgeError> {
        self.post(&format!("/api/groups/messages/{id}/status"), credential, Some(status))
            .await
    }
}
