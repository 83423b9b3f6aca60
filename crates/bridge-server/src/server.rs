use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use bridge_core::contacts::ContactBook;
use bridge_core::credential::BearerToken;
use bridge_core::events::WireEvent;
use bridge_core::message::ClientEvent;
use bridge_delivery::DeliveryPipeline;
use bridge_session::SessionManager;
use bridge_telemetry::SqliteLogSink;

use crate::client::{self, SubscriberRegistry};
use crate::fanout::{self, Fanout, Forwarder};
use crate::handlers::{self, HandlerState};

/// Listener configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub rest_port: u16,
    pub ws_port: u16,
    pub max_send_queue: usize,
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            rest_port: 3001,
            ws_port: 3002,
            max_send_queue: 256,
            body_limit_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Everything the listeners serve from.
pub struct BridgeServices {
    pub session: Arc<SessionManager>,
    pub pipeline: Arc<DeliveryPipeline>,
    pub contacts: Arc<ContactBook>,
    pub forwarder: Option<Forwarder>,
    pub credential: Option<BearerToken>,
    pub logs: Option<Arc<SqliteLogSink>>,
    pub client_events: mpsc::Sender<ClientEvent>,
}

#[derive(Clone)]
struct WsState {
    registry: Arc<SubscriberRegistry>,
    session: Arc<SessionManager>,
}

pub fn build_rest_router(state: Arc<HandlerState>, body_limit: usize) -> Router {
    let cors = CorsLayer::permissive().allow_private_network(true);
    Router::new()
        .route("/api/status", get(handlers::status))
        .route("/api/send", post(handlers::send))
        .route("/api/sendMedia", post(handlers::send_media))
        .route("/api/logs", get(handlers::logs))
        .route("/webhook/gateway", post(handlers::gateway_webhook))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn build_ws_router(state: WsState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Bind both listeners and start the fan-out and cleanup tasks.
pub async fn start(config: ServerConfig, services: BridgeServices) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(SubscriberRegistry::new(config.max_send_queue));
    let cancel = CancellationToken::new();

    let ws_listener = TcpListener::bind((config.host.as_str(), config.ws_port)).await?;
    let ws_addr = ws_listener.local_addr()?;
    let rest_listener = TcpListener::bind((config.host.as_str(), config.rest_port)).await?;
    let rest_addr = rest_listener.local_addr()?;

    let fanout = Arc::new(Fanout::new(
        Arc::clone(&services.session),
        Arc::clone(&registry),
        services.contacts,
        services.forwarder,
    ));
    let fanout_task = fanout::spawn_fanout(fanout, services.session.subscribe(), cancel.clone());
    let cleanup_task = client::start_cleanup_task(
        Arc::clone(&registry),
        Duration::from_secs(60),
        cancel.clone(),
    );

    let handler_state = Arc::new(HandlerState {
        session: Arc::clone(&services.session),
        pipeline: services.pipeline,
        registry: Arc::clone(&registry),
        client_events: services.client_events,
        credential: services.credential,
        logs: services.logs,
        ws_port: ws_addr.port(),
        started: Instant::now(),
    });
    let rest_router = build_rest_router(handler_state, config.body_limit_bytes);
    let ws_router = build_ws_router(WsState {
        registry: Arc::clone(&registry),
        session: services.session,
    });

    let rest_cancel = cancel.clone();
    let rest_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(rest_listener, rest_router)
            .with_graceful_shutdown(rest_cancel.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "REST server failed");
        }
    });
    let ws_cancel = cancel.clone();
    let ws_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(ws_listener, ws_router)
            .with_graceful_shutdown(ws_cancel.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "WebSocket server failed");
        }
    });

    tracing::info!(rest = %rest_addr, ws = %ws_addr, "bridge listening");

    Ok(ServerHandle {
        rest_addr,
        ws_addr,
        registry,
        cancel,
        tasks: vec![rest_task, ws_task, fanout_task, cleanup_task],
    })
}

/// Keeps the listeners and background tasks alive until shut down.
pub struct ServerHandle {
    pub rest_addr: SocketAddr,
    pub ws_addr: SocketAddr,
    pub registry: Arc<SubscriberRegistry>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn rest_port(&self) -> u16 {
        self.rest_addr.port()
    }

    pub fn ws_port(&self) -> u16 {
        self.ws_addr.port()
    }

    /// Stop accepting, stop background tasks, and wait for them.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    // Current status goes out before anything else
    let status = match WireEvent::status(state.session.state()).to_json() {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize status frame");
            None
        }
    };
    let (id, rx) = state.registry.register_with(status);
    tracing::info!(subscriber_id = %id, "subscriber connected");

    client::handle_ws_connection(socket, id, rx, state.registry).await;
}
