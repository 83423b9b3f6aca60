//! Adapter for a WPPConnect-server style gateway: the sidecar process that
//! hosts the headless browser. Commands go out over its REST API; events
//! come back as webhook POSTs, turned into [`ClientEvent`]s by
//! [`parse_webhook`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use bridge_core::credential::BearerToken;
use bridge_core::errors::BridgeError;
use bridge_core::groups::{ParticipantAction, ParticipantsChanged, RawGroup};
use bridge_core::message::{ClientEvent, RawAck, RawContact, RawMessage, SendReceipt};
use bridge_core::phone::{self, ChatId};

use crate::client::{MediaFile, StartOutcome, WhatsAppClient};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub session: String,
    /// Used to mint a token when none is configured.
    pub secret_key: Option<String>,
    pub token: Option<String>,
    pub webhook_url: String,
    pub request_timeout: Duration,
}

pub struct GatewayClient {
    http: Client,
    config: GatewayConfig,
    token: RwLock<Option<BearerToken>>,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, BridgeError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BridgeError::Network(format!("failed to build HTTP client: {e}")))?;
        let token = config.token.as_deref().and_then(BearerToken::new);
        Ok(Self {
            http,
            config,
            token: RwLock::new(token),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/api/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.session,
            path
        )
    }

    async fn bearer(&self) -> Result<BearerToken, BridgeError> {
        if let Some(token) = self.token.read().clone() {
            return Ok(token);
        }
        let Some(secret) = self.config.secret_key.as_deref() else {
            return Err(BridgeError::DeliveryFailed(
                "gateway token missing and no secret key configured".into(),
            ));
        };

        let resp = self
            .http
            .post(self.url(&format!("{secret}/generate-token")))
            .send()
            .await
            .map_err(|e| BridgeError::Network(e.to_string()))?;
        let body = read_json(resp).await?;
        let token = body["token"]
            .as_str()
            .and_then(BearerToken::new)
            .ok_or_else(|| BridgeError::DeliveryFailed("gateway returned no token".into()))?;
        debug!(session = %self.config.session, "minted gateway token");
        *self.token.write() = Some(token.clone());
        Ok(token)
    }

    async fn call(&self, req: RequestBuilder) -> Result<Value, BridgeError> {
        let token = self.bearer().await?;
        let resp = req
            .header("authorization", token.header_value())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BridgeError::Timeout(self.config.request_timeout)
                } else {
                    BridgeError::Network(e.to_string())
                }
            })?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Force a fresh token on the next call
            *self.token.write() = None;
            return Err(BridgeError::DeliveryFailed("gateway rejected token".into()));
        }
        read_json(resp).await
    }

    async fn send(&self, path: &str, body: Value) -> Result<SendReceipt, BridgeError> {
        let value = self.call(self.http.post(self.url(path)).json(&body)).await?;
        if value["status"].as_str() == Some("error") {
            return Err(BridgeError::from_send_failure(error_message(&value)));
        }
        Ok(SendReceipt {
            message_id: first_message_id(&value["response"]),
            fallback: false,
        })
    }
}

async fn read_json(resp: Response) -> Result<Value, BridgeError> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| BridgeError::Network(e.to_string()))?;
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&text)
            .map(|v| error_message(&v))
            .unwrap_or(text);
        return Err(BridgeError::from_send_failure(format!(
            "gateway {}: {message}",
            status.as_u16()
        )));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text)
        .map_err(|e| BridgeError::DeliveryFailed(format!("gateway returned invalid JSON: {e}")))
}

fn error_message(value: &Value) -> String {
    value["message"]
        .as_str()
        .or_else(|| value["error"].as_str())
        .or_else(|| value["response"]["message"].as_str())
        .unwrap_or("gateway reported an error")
        .to_string()
}

/// Gateway responses wrap the sent message in `response`, either as an
/// object or a one-element array.
fn first_message_id(response: &Value) -> Option<String> {
    let msg = match response {
        Value::Array(items) => items.first()?,
        other => other,
    };
    id_string(&msg["id"])
}

/// Message ids arrive as strings or as `{ _serialized }` objects.
fn id_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .or_else(|| value["_serialized"].as_str())
        .map(str::to_string)
}

struct Recipient {
    phone: String,
    is_group: bool,
    is_lid: bool,
}

fn recipient(chat: &ChatId) -> Recipient {
    let id = chat.as_str();
    Recipient {
        phone: phone::local_part(id).to_string(),
        is_group: id.ends_with(GROUP_SUFFIX),
        is_lid: phone::is_lid(id),
    }
}

const GROUP_SUFFIX: &str = "@g.us";

#[async_trait]
impl WhatsAppClient for GatewayClient {
    fn name(&self) -> &str {
        "wppconnect"
    }

    #[instrument(skip(self), fields(gateway = %self.config.base_url))]
    async fn start(&self, session: &str) -> Result<StartOutcome, BridgeError> {
        if session != self.config.session {
            warn!(expected = %self.config.session, got = session, "session name mismatch");
        }
        let value = self
            .call(self.http.post(self.url("start-session")).json(&json!({
                "webhook": self.config.webhook_url,
                "waitQrCode": true,
            })))
            .await?;
        Ok(start_outcome(&value))
    }

    async fn close(&self) -> Result<(), BridgeError> {
        self.call(self.http.post(self.url("close-session"))).await?;
        Ok(())
    }

    async fn connection_state(&self) -> Result<String, BridgeError> {
        let value = self
            .call(self.http.get(self.url("check-connection-session")))
            .await?;
        if value["status"].as_bool() == Some(true) {
            return Ok("CONNECTED".to_string());
        }
        Ok(value["message"]
            .as_str()
            .filter(|m| !m.eq_ignore_ascii_case("connected"))
            .unwrap_or("DISCONNECTED")
            .to_string())
    }

    async fn send_text(&self, chat: &ChatId, body: &str) -> Result<SendReceipt, BridgeError> {
        let to = recipient(chat);
        self.send(
            "send-message",
            json!({ "phone": to.phone, "isGroup": to.is_group, "isLid": to.is_lid, "message": body }),
        )
        .await
    }

    async fn send_file_base64(
        &self,
        chat: &ChatId,
        file: MediaFile<'_>,
    ) -> Result<SendReceipt, BridgeError> {
        let to = recipient(chat);
        let mime = file.mime.unwrap_or("application/octet-stream");
        self.send(
            "send-file-base64",
            json!({
                "phone": to.phone,
                "isGroup": to.is_group,
                "isLid": to.is_lid,
                "base64": format!("data:{mime};base64,{}", file.base64),
                "filename": file.filename,
                "caption": file.caption.unwrap_or_default(),
            }),
        )
        .await
    }

    async fn send_file_path(
        &self,
        chat: &ChatId,
        path: &Path,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<SendReceipt, BridgeError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| BridgeError::DeliveryFailed(format!("failed to read {}: {e}", path.display())))?;
        let to = recipient(chat);
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(bridge_core::media::mime_for_filename(filename))
            .map_err(|e| BridgeError::InvalidPayload(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("phone", to.phone)
            .text("isGroup", to.is_group.to_string())
            .text("isLid", to.is_lid.to_string())
            .text("filename", filename.to_string())
            .text("caption", caption.unwrap_or_default().to_string())
            .part("file", part);

        let value = self
            .call(self.http.post(self.url("send-file")).multipart(form))
            .await?;
        if value["status"].as_str() == Some("error") {
            return Err(BridgeError::from_send_failure(error_message(&value)));
        }
        Ok(SendReceipt {
            message_id: first_message_id(&value["response"]),
            fallback: true,
        })
    }

    async fn get_contact(&self, id: &str) -> Result<Option<RawContact>, BridgeError> {
        let value = self
            .call(self.http.get(self.url(&format!("contact/{id}"))))
            .await?;
        let response = &value["response"];
        if response.is_null() || value["status"].as_str() == Some("error") {
            return Ok(None);
        }
        Ok(Some(contact_from_json(response)))
    }

    async fn get_all_groups(&self) -> Result<Vec<RawGroup>, BridgeError> {
        let value = self.call(self.http.get(self.url("all-groups"))).await?;
        let Some(items) = value["response"].as_array() else {
            return Ok(Vec::new());
        };
        Ok(items.iter().filter_map(group_from_json).collect())
    }
}

/// Map a gateway group chat. Entries without an id are skipped.
pub fn group_from_json(value: &Value) -> Option<RawGroup> {
    let id = id_string(&value["id"])?;
    let meta = &value["groupMetadata"];
    let participants = meta["participants"]
        .as_array()
        .or_else(|| value["participants"].as_array())
        .map(Vec::len)
        .unwrap_or_default();
    Some(RawGroup {
        id,
        name: opt_str(value, "name")
            .or_else(|| opt_str(&value["contact"], "name"))
            .or_else(|| opt_str(meta, "subject")),
        description: opt_str(meta, "desc").or_else(|| opt_str(value, "description")),
        avatar_url: opt_str(value, "profilePicUrl")
            .or_else(|| opt_str(&value["profilePicThumbObj"], "eurl")),
        participant_count: participants,
    })
}

fn participants_from_json(payload: &Value) -> Option<ParticipantsChanged> {
    let group_id = id_string(&payload["groupId"]).or_else(|| id_string(&payload["chatId"]))?;
    let action = payload["action"]
        .as_str()
        .or_else(|| payload["operation"].as_str())
        .map(ParticipantAction::parse)
        .unwrap_or(ParticipantAction::Other);
    let who = match &payload["who"] {
        Value::Array(items) => items.iter().filter_map(id_string).collect(),
        single => id_string(single).into_iter().collect(),
    };
    Some(ParticipantsChanged {
        group_id,
        action,
        who,
        by: id_string(&payload["by"]),
    })
}

fn start_outcome(value: &Value) -> StartOutcome {
    let status = value["status"].as_str().unwrap_or_default();
    let qr = value["qrcode"].as_str().filter(|q| !q.is_empty());
    match (status.to_ascii_uppercase().as_str(), qr) {
        ("CONNECTED", _) | ("INCHAT", _) => StartOutcome::Connected,
        (_, Some(qr)) => StartOutcome::PairingRequired { qr: qr.to_string() },
        _ => StartOutcome::Starting,
    }
}

fn opt_str(value: &Value, key: &str) -> Option<String> {
    value[key]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Map a gateway contact object into the loose client record.
pub fn contact_from_json(value: &Value) -> RawContact {
    let id = &value["id"];
    RawContact {
        name: opt_str(value, "name"),
        short_name: opt_str(value, "shortName"),
        formatted_name: opt_str(value, "formattedName"),
        pushname: opt_str(value, "pushname"),
        formatted_number: opt_str(value, "formattedNumber"),
        number: opt_str(value, "number"),
        serialized_id: id_string(id),
        user: id["user"].as_str().map(str::to_string),
    }
}

const MEDIA_KINDS: &[&str] = &["image", "video", "audio", "ptt", "document", "sticker"];

fn message_from_json(value: &Value) -> RawMessage {
    let kind = opt_str(value, "type");
    let has_media = value["isMedia"].as_bool().unwrap_or(false)
        || value["hasMedia"].as_bool().unwrap_or(false)
        || kind.as_deref().is_some_and(|k| MEDIA_KINDS.contains(&k));
    RawMessage {
        id: id_string(&value["id"]),
        from: opt_str(value, "from").unwrap_or_default(),
        body: opt_str(value, "body").or_else(|| opt_str(value, "content")),
        caption: opt_str(value, "caption"),
        kind,
        is_group_msg: value["isGroupMsg"].as_bool().unwrap_or(false),
        has_media,
        timestamp: value["timestamp"].as_i64().or_else(|| value["t"].as_i64()),
        notify_name: opt_str(value, "notifyName")
            .or_else(|| value["sender"]["pushname"].as_str().map(str::to_string)),
    }
}

/// Translate one webhook body into a client event. Events the bridge
/// doesn't use, and the bridge's own outgoing messages, yield `None`.
pub fn parse_webhook(payload: &Value) -> Option<ClientEvent> {
    let event = payload["event"].as_str()?;
    match event {
        "onmessage" | "onanymessage" | "unreadmessages" => {
            if payload["fromMe"].as_bool() == Some(true) {
                return None;
            }
            let msg = message_from_json(payload);
            (!msg.from.is_empty()).then_some(ClientEvent::Message(msg))
        }
        "onack" => Some(ClientEvent::Ack(RawAck {
            message_id: id_string(&payload["id"]),
            ack: payload["ack"].as_i64().unwrap_or_default(),
        })),
        "qrcode" => opt_str(payload, "qrcode").map(ClientEvent::Pairing),
        "onparticipantschanged" => participants_from_json(payload).map(ClientEvent::Participants),
        "status-find" => opt_str(payload, "status").map(ClientEvent::State),
        "onstatechange" | "state-change" => opt_str(payload, "state")
            .or_else(|| opt_str(payload, "status"))
            .map(ClientEvent::State),
        other => {
            debug!(event = other, "ignoring gateway event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::extract::{Path as AxumPath, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use parking_lot::Mutex;

    #[test]
    fn parses_incoming_message() {
        let payload = json!({
            "event": "onmessage",
            "session": "shepherd-session",
            "id": "false_2348012345678@c.us_3EB0",
            "from": "2348012345678@c.us",
            "body": "Good morning",
            "type": "chat",
            "isGroupMsg": false,
            "t": 1_700_000_000,
            "sender": { "pushname": "Ada" }
        });
        let Some(ClientEvent::Message(msg)) = parse_webhook(&payload) else {
            panic!("expected message");
        };
        assert_eq!(msg.from, "2348012345678@c.us");
        assert_eq!(msg.timestamp, Some(1_700_000_000));
        assert_eq!(msg.notify_name.as_deref(), Some("Ada"));
        assert!(!msg.has_media);
    }

    #[test]
    fn media_kind_sets_has_media() {
        let payload = json!({
            "event": "onmessage",
            "from": "1@lid",
            "type": "ptt",
            "body": "T2dnUw..."
        });
        let Some(ClientEvent::Message(msg)) = parse_webhook(&payload) else {
            panic!("expected message");
        };
        assert!(msg.has_media);
    }

    #[test]
    fn own_messages_ignored() {
        let payload = json!({"event": "onanymessage", "fromMe": true, "from": "me@c.us"});
        assert_eq!(parse_webhook(&payload), None);
    }

    #[test]
    fn parses_ack_qr_and_state() {
        let ack = parse_webhook(&json!({
            "event": "onack",
            "id": {"_serialized": "true_2348012345678@c.us_ABC"},
            "ack": 3
        }));
        assert_eq!(
            ack,
            Some(ClientEvent::Ack(RawAck {
                message_id: Some("true_2348012345678@c.us_ABC".into()),
                ack: 3
            }))
        );

        let qr = parse_webhook(&json!({"event": "qrcode", "qrcode": "data:image/png;base64,AAA"}));
        assert_eq!(qr, Some(ClientEvent::Pairing("data:image/png;base64,AAA".into())));

        let state = parse_webhook(&json!({"event": "status-find", "status": "browserClose"}));
        assert_eq!(state, Some(ClientEvent::State("browserClose".into())));

        assert_eq!(parse_webhook(&json!({"event": "onpresencechanged"})), None);
        assert_eq!(parse_webhook(&json!({"no": "event"})), None);
    }

    #[test]
    fn parses_participant_changes() {
        let event = parse_webhook(&json!({
            "event": "onparticipantschanged",
            "groupId": "120363000000@g.us",
            "action": "add",
            "who": ["2348012345678@c.us", {"_serialized": "98765432101234@lid"}],
            "by": "2348030001111@c.us"
        }));
        assert_eq!(
            event,
            Some(ClientEvent::Participants(ParticipantsChanged {
                group_id: "120363000000@g.us".into(),
                action: ParticipantAction::Add,
                who: vec!["2348012345678@c.us".into(), "98765432101234@lid".into()],
                by: Some("2348030001111@c.us".into()),
            }))
        );
        assert_eq!(parse_webhook(&json!({"event": "onparticipantschanged", "who": []})), None);
    }

    #[test]
    fn group_mapping() {
        let group = group_from_json(&json!({
            "id": {"server": "g.us", "user": "120363000000", "_serialized": "120363000000@g.us"},
            "name": "Youth Choir",
            "groupMetadata": {"desc": "Thursday rehearsals", "participants": [{}, {}, {}]}
        }))
        .unwrap();
        assert_eq!(group.id, "120363000000@g.us");
        assert_eq!(group.name.as_deref(), Some("Youth Choir"));
        assert_eq!(group.description.as_deref(), Some("Thursday rehearsals"));
        assert_eq!(group.participant_count, 3);
        assert!(group_from_json(&json!({"name": "no id"})).is_none());
    }

    #[test]
    fn group_chats_flagged_on_send() {
        let to = recipient(&ChatId::from_raw("120363000000@g.us"));
        assert!(to.is_group);
        assert_eq!(to.phone, "120363000000");
        assert!(!recipient(&ChatId::from_raw("2348012345678@c.us")).is_group);
    }

    #[test]
    fn contact_mapping() {
        let contact = contact_from_json(&json!({
            "id": {"server": "lid", "user": "98765432101234", "_serialized": "98765432101234@lid"},
            "name": "Sister Grace",
            "pushname": "Grace",
            "formattedName": "Sister Grace"
        }));
        assert_eq!(contact.serialized_id.as_deref(), Some("98765432101234@lid"));
        assert_eq!(contact.user.as_deref(), Some("98765432101234"));
        assert_eq!(contact.display_name(), Some("Sister Grace"));
        assert_eq!(contact.number, None);
    }

    #[test]
    fn start_outcome_mapping() {
        assert_eq!(start_outcome(&json!({"status": "CONNECTED"})), StartOutcome::Connected);
        assert_eq!(
            start_outcome(&json!({"status": "QRCODE", "qrcode": "data:image/png;base64,QQ"})),
            StartOutcome::PairingRequired { qr: "data:image/png;base64,QQ".into() }
        );
        assert_eq!(start_outcome(&json!({"status": "INITIALIZING"})), StartOutcome::Starting);
    }

    #[test]
    fn message_id_shapes() {
        assert_eq!(first_message_id(&json!([{"id": "wamid-1"}])).as_deref(), Some("wamid-1"));
        assert_eq!(
            first_message_id(&json!({"id": {"_serialized": "wamid-2"}})).as_deref(),
            Some("wamid-2")
        );
        assert_eq!(first_message_id(&Value::Null), None);
    }

    // ── against a fake gateway ──────────────────────────────────────

    #[derive(Clone, Default)]
    struct Fake {
        auth_headers: Arc<Mutex<Vec<String>>>,
        bodies: Arc<Mutex<Vec<Value>>>,
        fail_base64: bool,
    }

    async fn spawn_fake(fake: Fake) -> SocketAddr {
        async fn token(AxumPath((_s, secret)): AxumPath<(String, String)>) -> Json<Value> {
            Json(json!({"status": "success", "token": format!("tok-{secret}")}))
        }
        async fn send_message(
            State(fake): State<Fake>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> Json<Value> {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            fake.auth_headers.lock().push(auth);
            fake.bodies.lock().push(body);
            Json(json!({"status": "success", "response": [{"id": "true_x@c.us_1"}]}))
        }
        async fn send_base64(State(fake): State<Fake>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
            fake.bodies.lock().push(body);
            if fake.fail_base64 {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"status": "error", "message": "Protocol error: Target closed."})),
                )
            } else {
                (StatusCode::CREATED, Json(json!({"status": "success", "response": {"id": "m-2"}})))
            }
        }
        async fn all_groups() -> Json<Value> {
            Json(json!({"status": "success", "response": [
                {"id": {"_serialized": "120363000000@g.us"}, "name": "Youth Choir",
                 "groupMetadata": {"participants": [{}, {}]}},
                {"id": {"_serialized": "120363111111@g.us"}, "contact": {"name": "Ushers"}}
            ]}))
        }
        async fn check(State(_f): State<Fake>) -> Json<Value> {
            Json(json!({"status": false, "message": "Disconnected"}))
        }

        let app = Router::new()
            .route("/api/{session}/{secret}/generate-token", post(token))
            .route("/api/{session}/send-message", post(send_message))
            .route("/api/{session}/send-file-base64", post(send_base64))
            .route("/api/{session}/check-connection-session", get(check))
            .route("/api/{session}/all-groups", get(all_groups))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn client_for(addr: SocketAddr) -> GatewayClient {
        GatewayClient::new(GatewayConfig {
            base_url: format!("http://{addr}"),
            session: "shepherd-session".into(),
            secret_key: Some("SECRET".into()),
            token: None,
            webhook_url: "http://127.0.0.1:3001/webhook/gateway".into(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn send_text_mints_token_once() {
        let fake = Fake::default();
        let addr = spawn_fake(fake.clone()).await;
        let client = client_for(addr);
        let chat = ChatId::from_raw("2348012345678@c.us");

        let receipt = client.send_text(&chat, "Welcome to church").await.unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("true_x@c.us_1"));
        client.send_text(&chat, "Second").await.unwrap();

        let headers = fake.auth_headers.lock().clone();
        assert_eq!(headers, vec!["Bearer tok-SECRET", "Bearer tok-SECRET"]);
        let first = fake.bodies.lock()[0].clone();
        assert_eq!(first["phone"], "2348012345678");
        assert_eq!(first["isLid"], false);
        assert_eq!(first["message"], "Welcome to church");
    }

    #[tokio::test]
    async fn lists_groups() {
        let addr = spawn_fake(Fake::default()).await;
        let client = client_for(addr);
        let groups = client.get_all_groups().await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].participant_count, 2);
        assert_eq!(groups[1].name.as_deref(), Some("Ushers"));
    }

    #[tokio::test]
    async fn detached_error_classified() {
        let fake = Fake { fail_base64: true, ..Default::default() };
        let addr = spawn_fake(fake).await;
        let client = client_for(addr);
        let err = client
            .send_file_base64(
                &ChatId::from_raw("1@lid"),
                MediaFile { base64: "aGk=", filename: "a.png", caption: None, mime: Some("image/png") },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::SessionDetached(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn disconnected_state_reported() {
        let addr = spawn_fake(Fake::default()).await;
        let client = client_for(addr);
        assert_eq!(client.connection_state().await.unwrap(), "Disconnected");
    }
}
