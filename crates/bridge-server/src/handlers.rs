//! REST handlers: status, direct sends, the gateway webhook, health, logs.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use bridge_core::credential::BearerToken;
use bridge_core::errors::BridgeError;
use bridge_core::message::{ClientEvent, DeliveryOutcome, MediaPayload, SendRequest};
use bridge_delivery::DeliveryPipeline;
use bridge_session::{parse_webhook, SessionManager};
use bridge_telemetry::{LogQuery, SqliteLogSink};

use crate::client::SubscriberRegistry;

/// Shared state for every REST handler.
pub struct HandlerState {
    pub session: Arc<SessionManager>,
    pub pipeline: Arc<DeliveryPipeline>,
    pub registry: Arc<SubscriberRegistry>,
    /// Gateway webhook events go here, toward the session's event pump.
    pub client_events: mpsc::Sender<ClientEvent>,
    /// Fallback when a request carries no bearer token.
    pub credential: Option<BearerToken>,
    pub logs: Option<Arc<SqliteLogSink>>,
    pub ws_port: u16,
    pub started: Instant,
}

impl HandlerState {
    /// Request header first, then the bridge's own token.
    pub fn credential_for(&self, headers: &HeaderMap) -> Option<BearerToken> {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(BearerToken::from_header)
            .or_else(|| self.credential.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBody {
    pub phone: String,
    pub message: String,
    #[serde(default)]
    pub whatsapp_id: Option<String>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMediaBody {
    pub phone: String,
    #[serde(default)]
    pub whatsapp_id: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    pub media_data: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn status_for(error_type: Option<&str>) -> StatusCode {
    match error_type {
        Some("unauthenticated") => StatusCode::UNAUTHORIZED,
        Some("session_not_ready" | "session_detached") => StatusCode::SERVICE_UNAVAILABLE,
        Some("invalid_payload") => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &BridgeError) -> Response {
    outcome_response(DeliveryOutcome::failed(err, 0))
}

fn outcome_response(outcome: DeliveryOutcome) -> Response {
    if outcome.success {
        let mut body = json!({ "success": true, "messageId": outcome.message_id });
        if let Some(provider) = outcome.provider {
            body["provider"] = json!(provider);
        }
        if outcome.fallback {
            body["fallback"] = json!(true);
        }
        return (StatusCode::OK, Json(body)).into_response();
    }
    let status = status_for(outcome.error_type.as_deref());
    let body = json!({
        "success": false,
        "error": outcome.error,
        "errorType": outcome.error_type,
    });
    (status, Json(body)).into_response()
}

fn rejected(rejection: JsonRejection) -> Response {
    error_response(&BridgeError::InvalidPayload(rejection.body_text()))
}

pub async fn status(State(state): State<Arc<HandlerState>>) -> Json<Value> {
    Json(json!({
        "status": state.session.state(),
        "wsPort": state.ws_port,
    }))
}

pub async fn send(
    State(state): State<Arc<HandlerState>>,
    headers: HeaderMap,
    body: Result<Json<SendBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection),
    };
    let credential = state.credential_for(&headers);
    let request = SendRequest {
        phone: body.phone,
        whatsapp_id: body.whatsapp_id,
        body: body.message,
        contact_id: body.contact_id,
        queue_id: None,
    };
    let outcome = state
        .pipeline
        .send_message(&request, credential.as_ref(), body.max_attempts)
        .await;
    outcome_response(outcome)
}

pub async fn send_media(
    State(state): State<Arc<HandlerState>>,
    headers: HeaderMap,
    body: Result<Json<SendMediaBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection),
    };
    let credential = state.credential_for(&headers);
    let request = SendRequest {
        phone: body.phone,
        whatsapp_id: body.whatsapp_id,
        body: body.caption.clone().unwrap_or_default(),
        contact_id: body.contact_id,
        queue_id: None,
    };
    let media = MediaPayload {
        data: body.media_data,
        media_type: body.media_type,
        caption: body.caption,
        filename: body.filename,
    };
    let outcome = state
        .pipeline
        .send_media(&request, &media, credential.as_ref(), body.max_attempts)
        .await;
    outcome_response(outcome)
}

/// Event callback from the gateway sidecar.
pub async fn gateway_webhook(State(state): State<Arc<HandlerState>>, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "ok": false, "error": format!("invalid JSON: {e}") })),
            )
                .into_response();
        }
    };
    match parse_webhook(&payload) {
        Some(event) => {
            if state.client_events.send(event).await.is_err() {
                warn!("session event pump is gone, dropping webhook event");
            }
        }
        None => debug!(event = payload["event"].as_str().unwrap_or("?"), "ignored webhook event"),
    }
    Json(json!({ "ok": true })).into_response()
}

pub async fn health(State(state): State<Arc<HandlerState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime": state.started.elapsed().as_secs(),
        "session": state.session.state(),
        "subscribers": state.registry.count(),
    }))
}

pub async fn logs(State(state): State<Arc<HandlerState>>, Query(query): Query<LogQuery>) -> Response {
    let Some(sink) = state.logs.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "log persistence is disabled" })),
        )
            .into_response();
    };
    match sink.query(&query) {
        Ok(records) => Json(records).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_types_map_to_status_codes() {
        assert_eq!(status_for(Some("unauthenticated")), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(Some("session_not_ready")), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(Some("session_detached")), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(Some("invalid_payload")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(Some("delivery_failed")), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(None), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn send_body_accepts_camel_case() {
        let body: SendBody = serde_json::from_value(json!({
            "phone": "08012345678",
            "message": "hi",
            "whatsappId": "98765432101234@lid",
            "maxAttempts": 5
        }))
        .unwrap();
        assert_eq!(body.whatsapp_id.as_deref(), Some("98765432101234@lid"));
        assert_eq!(body.max_attempts, Some(5));
    }
}
