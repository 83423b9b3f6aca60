use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bridge_core::contacts::ContactBook;
use bridge_delivery::contacts::spawn_contact_refresh;
use bridge_delivery::{BackendClient, BackendConfig, DeliveryPipeline, GroupManager, RetryPolicy};
use bridge_server::{BridgeServices, Forwarder, ServerConfig};
use bridge_session::{GatewayClient, GatewayConfig, SessionManager};
use bridge_settings::{BridgeSettings, shepherd_home};
use bridge_telemetry::{TelemetryConfig, init_telemetry, parse_level};

/// Gateway events buffered between the webhook and the session.
const CLIENT_EVENT_BUFFER: usize = 256;

#[derive(Parser)]
#[command(name = "shepherd-bridge", version, about = "WhatsApp bridge for the Shepherd follow-up CRM")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge until interrupted.
    Serve {
        /// Settings file. Defaults to ~/.shepherd/bridge.json.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        rest_port: Option<u16>,
        #[arg(long)]
        ws_port: Option<u16>,
    },
    /// Ask the backend whether it sees this bridge.
    Status {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load(config: Option<&PathBuf>) -> Result<BridgeSettings> {
    match config {
        Some(path) => bridge_settings::load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => bridge_settings::load_settings().context("loading settings"),
    }
}

fn backend_client(settings: &BridgeSettings) -> Result<BackendClient> {
    let code = settings.backend.connection_code.trim();
    BackendClient::new(BackendConfig {
        base_url: settings.backend.base_url.clone(),
        connection_code: (!code.is_empty()).then(|| code.to_string()),
        request_timeout: settings.backend.request_timeout(),
        status_timeout: settings.backend.status_timeout(),
    })
    .context("building backend client")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            config,
            rest_port,
            ws_port,
        } => {
            let mut settings = load(config.as_ref())?;
            if let Some(port) = rest_port {
                settings.server.rest_port = port;
            }
            if let Some(port) = ws_port {
                settings.server.ws_port = port;
            }
            serve(settings).await
        }
        Command::Status { config } => {
            let settings = load(config.as_ref())?;
            let backend = backend_client(&settings)?;
            let credential = settings.backend.bearer_token();
            println!("{}", backend.status(credential.as_ref()).await);
            Ok(())
        }
    }
}

async fn serve(settings: BridgeSettings) -> Result<()> {
    let telemetry = init_telemetry(TelemetryConfig {
        log_level: parse_level(&settings.logging.level),
        module_levels: Vec::new(),
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: settings.logging.resolved_db_path(&shepherd_home()),
    });

    let gateway = GatewayClient::new(GatewayConfig {
        base_url: settings.gateway.base_url.clone(),
        session: settings.session.name.clone(),
        secret_key: settings.gateway.secret_key.clone(),
        token: settings.gateway.token.clone(),
        webhook_url: settings.webhook_url(),
        request_timeout: std::time::Duration::from_millis(settings.gateway.request_timeout_ms),
    })
    .context("building gateway client")?;
    let session = Arc::new(SessionManager::new(Arc::new(gateway), settings.session.name.clone()));
    let (client_events, client_rx) = mpsc::channel(CLIENT_EVENT_BUFFER);
    let pump = session.spawn_event_pump(client_rx);

    let backend = Arc::new(backend_client(&settings)?);
    let retry = RetryPolicy::new(settings.delivery.max_attempts, settings.delivery.backoff_base());
    let pipeline = Arc::new(DeliveryPipeline::new(
        Arc::clone(&session),
        backend.clone(),
        retry,
        settings.delivery.default_country_code.clone(),
    ));

    let credential = settings.backend.bearer_token();
    if credential.is_none() {
        tracing::warn!("no backend token configured; queue polling and forwarding are off");
    }

    let cancel = CancellationToken::new();
    let contacts = Arc::new(ContactBook::new());
    let mut tasks = Vec::new();
    if let Some(token) = credential.clone() {
        tasks.push(spawn_contact_refresh(
            backend.clone(),
            Arc::clone(&contacts),
            token,
            settings.backend.contacts_refresh(),
            cancel.clone(),
        ));
    }
    let forwarder = match (&credential, settings.backend.forward_incoming) {
        (Some(token), true) => Some(Forwarder {
            sink: backend.clone(),
            credential: token.clone(),
        }),
        _ => None,
    };

    match (&credential, settings.groups.enabled) {
        (Some(token), true) => {
            let groups = Arc::new(GroupManager::new(
                Arc::clone(&pipeline),
                backend.clone(),
                settings.groups.send_spacing(),
            ));
            // Subscribed before the first connect so the initial sync runs
            tasks.push(groups.spawn_event_watch(session.subscribe(), token.clone(), cancel.clone()));
            tasks.push(groups.spawn_poller(settings.groups.poll_interval(), token.clone(), cancel.clone()));
        }
        (_, false) => tracing::info!("group management disabled"),
        _ => {}
    }

    // Settings are final from here on
    if bridge_settings::init_settings(settings.clone()).is_err() {
        tracing::debug!("settings were already initialized");
    }

    let handle = bridge_server::start(
        ServerConfig {
            host: settings.server.host.clone(),
            rest_port: settings.server.rest_port,
            ws_port: settings.server.ws_port,
            max_send_queue: settings.server.max_send_queue,
            body_limit_bytes: settings.server.body_limit_bytes,
        },
        BridgeServices {
            session: Arc::clone(&session),
            pipeline: Arc::clone(&pipeline),
            contacts,
            forwarder,
            credential: credential.clone(),
            logs: telemetry.log_sink(),
            client_events,
        },
    )
    .await
    .context("starting servers")?;

    tracing::info!(
        rest_port = handle.rest_port(),
        ws_port = handle.ws_port(),
        session = session.session_name(),
        client = session.client_name(),
        "Shepherd bridge ready"
    );

    if let Err(e) = session.connect().await {
        tracing::warn!(error = %e, "initial connect failed, supervisor will retry");
    }
    tasks.push(session.spawn_health_check(settings.session.health_check_interval(), cancel.clone()));
    tasks.push(session.spawn_supervisor(settings.session.reconnect_delay(), cancel.clone()));
    match (&credential, settings.backend.poll_enabled) {
        (Some(token), true) => tasks.push(pipeline.spawn_poller(
            settings.backend.poll_interval(),
            token.clone(),
            cancel.clone(),
        )),
        (_, false) => tracing::info!("queue polling disabled"),
        _ => {}
    }

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;

    tracing::info!("shutting down");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    handle.shutdown().await;
    session.disconnect().await;
    pump.abort();
    Ok(())
}
