//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BridgeSettings::default()`]
//! 2. If `~/.shepherd/bridge.json` exists, deep-merge user values over defaults
//! 3. Apply `SHEPHERD_*` environment overrides (highest priority)
//! 4. Validate cross-field constraints

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::BridgeSettings;

/// `~/.shepherd`, falling back to `/tmp/.shepherd` without a home.
pub fn shepherd_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".shepherd")
}

pub fn settings_path() -> PathBuf {
    shepherd_home().join("bridge.json")
}

pub fn load_settings() -> Result<BridgeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BridgeSettings> {
    let mut settings = load_file_layer(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    validate(&settings)?;
    Ok(settings)
}

/// Defaults with the JSON file merged on top. No env, no validation.
pub fn load_file_layer(path: &Path) -> Result<BridgeSettings> {
    let defaults = serde_json::to_value(BridgeSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced, and nulls in
/// `source` leave the target untouched.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SHEPHERD_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored, keeping the file/default value.
pub fn apply_overrides<F>(settings: &mut BridgeSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SHEPHERD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("SHEPHERD_REST_PORT", 1, 65535) {
        settings.server.rest_port = v;
    }
    if let Some(v) = env.u16("SHEPHERD_WS_PORT", 1, 65535) {
        settings.server.ws_port = v;
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = env.string("SHEPHERD_SESSION_NAME") {
        settings.session.name = v;
    }
    if let Some(v) = env.u64("SHEPHERD_HEALTH_CHECK_INTERVAL_MS", 1_000, 3_600_000) {
        settings.session.health_check_interval_ms = v;
    }
    if let Some(v) = env.u64("SHEPHERD_RECONNECT_DELAY_MS", 1_000, 3_600_000) {
        settings.session.reconnect_delay_ms = v;
    }

    // ── Gateway ─────────────────────────────────────────────────────
    if let Some(v) = env.string("SHEPHERD_GATEWAY_URL") {
        settings.gateway.base_url = v;
    }
    if let Some(v) = env.string("SHEPHERD_GATEWAY_SECRET") {
        settings.gateway.secret_key = Some(v);
    }
    if let Some(v) = env.string("SHEPHERD_GATEWAY_TOKEN") {
        settings.gateway.token = Some(v);
    }
    if let Some(v) = env.string("SHEPHERD_WEBHOOK_URL") {
        settings.gateway.webhook_url = Some(v);
    }

    // ── Backend ─────────────────────────────────────────────────────
    if let Some(v) = env.string("SHEPHERD_BACKEND_URL") {
        settings.backend.base_url = v;
    }
    if let Some(v) = env.string("SHEPHERD_CONNECTION_CODE") {
        settings.backend.connection_code = v;
    }
    if let Some(v) = env.string("SHEPHERD_AUTH_TOKEN") {
        settings.backend.auth_token = Some(v);
    }
    if let Some(v) = env.bool("SHEPHERD_POLL_ENABLED") {
        settings.backend.poll_enabled = v;
    }
    if let Some(v) = env.u64("SHEPHERD_POLL_INTERVAL_MS", 500, 600_000) {
        settings.backend.poll_interval_ms = v;
    }
    if let Some(v) = env.bool("SHEPHERD_FORWARD_INCOMING") {
        settings.backend.forward_incoming = v;
    }

    // ── Delivery ────────────────────────────────────────────────────
    if let Some(v) = env.u32("SHEPHERD_MAX_ATTEMPTS", 1, 10) {
        settings.delivery.max_attempts = v;
    }
    if let Some(v) = env.u64("SHEPHERD_BACKOFF_BASE_MS", 10, 60_000) {
        settings.delivery.backoff_base_ms = v;
    }
    if let Some(v) = env.string("SHEPHERD_COUNTRY_CODE") {
        settings.delivery.default_country_code = v;
    }

    // ── Groups ──────────────────────────────────────────────────────
    if let Some(v) = env.bool("SHEPHERD_GROUPS_ENABLED") {
        settings.groups.enabled = v;
    }
    if let Some(v) = env.u64("SHEPHERD_GROUP_POLL_INTERVAL_MS", 1_000, 3_600_000) {
        settings.groups.poll_interval_ms = v;
    }
    if let Some(v) = env.u64("SHEPHERD_GROUP_SEND_SPACING_MS", 0, 60_000) {
        settings.groups.send_spacing_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("SHEPHERD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("SHEPHERD_LOG_TO_SQLITE") {
        settings.logging.log_to_sqlite = v;
    }
    if let Some(v) = env.string("SHEPHERD_LOG_DB") {
        settings.logging.db_path = v;
    }
}

/// Cross-field checks the per-field parsers can't express.
pub fn validate(settings: &BridgeSettings) -> Result<()> {
    if settings.server.rest_port == settings.server.ws_port {
        return Err(SettingsError::InvalidValue(format!(
            "restPort and wsPort are both {}",
            settings.server.rest_port
        )));
    }
    if settings.delivery.max_attempts == 0 {
        return Err(SettingsError::InvalidValue("maxAttempts must be at least 1".into()));
    }
    if !settings
        .delivery
        .default_country_code
        .chars()
        .all(|c| c.is_ascii_digit())
        || settings.delivery.default_country_code.is_empty()
    {
        return Err(SettingsError::InvalidValue(format!(
            "defaultCountryCode must be digits, got {:?}",
            settings.delivery.default_country_code
        )));
    }
    if settings.session.name.trim().is_empty() {
        return Err(SettingsError::InvalidValue("session name is empty".into()));
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.raw(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.raw(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        let val = self.raw(name)?;
        let result = parse_u32_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.raw(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}
