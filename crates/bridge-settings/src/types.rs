//! Settings sections. Every struct is camelCase JSON with per-field defaults,
//! so a partial `bridge.json` only needs the keys it changes.

use std::path::PathBuf;
use std::time::Duration;

use bridge_core::BearerToken;
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub gateway: GatewaySettings,
    pub backend: BackendSettings,
    pub delivery: DeliverySettings,
    pub groups: GroupSettings,
    pub logging: LoggingSettings,
}

/// Local REST and WebSocket listeners.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address. Loopback unless the operator opts in.
    pub host: String,
    pub rest_port: u16,
    pub ws_port: u16,
    /// Outgoing frame queue per subscriber.
    pub max_send_queue: usize,
    /// Request body cap in bytes; base64 media makes this large.
    pub body_limit_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            rest_port: 3001,
            ws_port: 3002,
            max_send_queue: 256,
            body_limit_bytes: 50 * 1024 * 1024,
        }
    }
}

/// The single WhatsApp session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Fixed session name; the client persists pairing under it.
    pub name: String,
    pub health_check_interval_ms: u64,
    /// Delay between connect attempts after a failed start.
    pub reconnect_delay_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            name: "shepherd-session".to_string(),
            health_check_interval_ms: 60_000,
            reconnect_delay_ms: 30_000,
        }
    }
}

impl SessionSettings {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Gateway sidecar hosting the headless browser.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    pub base_url: String,
    /// Server secret used to mint a session token when `token` is unset.
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Where the gateway should POST events. Derived from the REST port when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:21465".to_string(),
            secret_key: None,
            token: None,
            webhook_url: None,
            request_timeout_ms: 60_000,
        }
    }
}

/// CRM backend holding the send queue and contacts.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendSettings {
    pub base_url: String,
    /// Bridge connection code appended to queue endpoints.
    pub connection_code: String,
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    pub poll_enabled: bool,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub status_timeout_ms: u64,
    /// Also POST normalized inbound messages to the backend.
    pub forward_incoming: bool,
    pub contacts_refresh_ms: u64,
}

impl std::fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSettings")
            .field("base_url", &self.base_url)
            .field("connection_code", &self.connection_code)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("poll_enabled", &self.poll_enabled)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("forward_incoming", &self.forward_incoming)
            .finish_non_exhaustive()
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            connection_code: String::new(),
            auth_token: None,
            poll_enabled: true,
            poll_interval_ms: 5_000,
            request_timeout_ms: 10_000,
            status_timeout_ms: 5_000,
            forward_incoming: true,
            contacts_refresh_ms: 300_000,
        }
    }
}

impl BackendSettings {
    pub fn bearer_token(&self) -> Option<BearerToken> {
        self.auth_token.as_deref().and_then(BearerToken::new)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn contacts_refresh(&self) -> Duration {
        Duration::from_millis(self.contacts_refresh_ms)
    }
}

/// Outbound retry policy and destination normalization.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliverySettings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// Replaces a leading trunk `0` in local numbers.
    pub default_country_code: String,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            default_country_code: "234".to_string(),
        }
    }
}

impl DeliverySettings {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Group sync, join reports, welcomes and group broadcasts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupSettings {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    /// Gap after each welcome or group message.
    pub send_spacing_ms: u64,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 10_000,
            send_spacing_ms: 3_000,
        }
    }
}

impl GroupSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn send_spacing(&self) -> Duration {
        Duration::from_millis(self.send_spacing_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub log_to_sqlite: bool,
    /// Absolute, or relative to `~/.shepherd`.
    pub db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_sqlite: true,
            db_path: "logs/bridge-logs.db".to_string(),
        }
    }
}

impl LoggingSettings {
    pub fn resolved_db_path(&self, home: &std::path::Path) -> PathBuf {
        let path = PathBuf::from(&self.db_path);
        if path.is_absolute() {
            path
        } else {
            home.join(path)
        }
    }
}

impl BridgeSettings {
    /// Webhook URL the gateway should call back on.
    pub fn webhook_url(&self) -> String {
        self.gateway.webhook_url.clone().unwrap_or_else(|| {
            format!("http://127.0.0.1:{}/webhook/gateway", self.server.rest_port)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bridge_ports() {
        let s = BridgeSettings::default();
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.rest_port, 3001);
        assert_eq!(s.server.ws_port, 3002);
        assert_eq!(s.session.name, "shepherd-session");
        assert_eq!(s.session.health_check_interval(), Duration::from_secs(60));
        assert_eq!(s.backend.poll_interval(), Duration::from_secs(5));
        assert_eq!(s.delivery.max_attempts, 3);
        assert_eq!(s.delivery.default_country_code, "234");
        assert!(s.groups.enabled);
        assert_eq!(s.groups.poll_interval(), Duration::from_secs(10));
        assert_eq!(s.groups.send_spacing(), Duration::from_secs(3));
    }

    #[test]
    fn secrets_never_serialized() {
        let mut s = BridgeSettings::default();
        s.backend.auth_token = Some("tok-123".into());
        s.gateway.secret_key = Some("THISISMYSECURETOKEN".into());
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("tok-123"));
        assert!(!json.contains("THISISMYSECURETOKEN"));
        assert!(!format!("{:?}", s.backend).contains("tok-123"));
    }

    #[test]
    fn bearer_token_ignores_blank() {
        let mut backend = BackendSettings::default();
        assert!(backend.bearer_token().is_none());
        backend.auth_token = Some("  ".into());
        assert!(backend.bearer_token().is_none());
        backend.auth_token = Some("abc".into());
        assert_eq!(backend.bearer_token().unwrap().expose(), "abc");
    }

    #[test]
    fn webhook_url_derived_from_rest_port() {
        let mut s = BridgeSettings::default();
        s.server.rest_port = 4100;
        assert_eq!(s.webhook_url(), "http://127.0.0.1:4100/webhook/gateway");
        s.gateway.webhook_url = Some("http://bridge:3001/webhook/gateway".into());
        assert_eq!(s.webhook_url(), "http://bridge:3001/webhook/gateway");
    }

    #[test]
    fn relative_log_path_joins_home() {
        let logging = LoggingSettings::default();
        let resolved = logging.resolved_db_path(std::path::Path::new("/home/u/.shepherd"));
        assert_eq!(resolved, PathBuf::from("/home/u/.shepherd/logs/bridge-logs.db"));
    }
}
