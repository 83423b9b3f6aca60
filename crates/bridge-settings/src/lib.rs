//! # bridge-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BridgeSettings::default()`]
//! 2. **User file**: `~/.shepherd/bridge.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SHEPHERD_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, shepherd_home};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<BridgeSettings> = OnceLock::new();

/// Global settings, loaded on first access. Falls back to compiled defaults
/// if loading fails.
pub fn get_settings() -> &'static BridgeSettings {
    SETTINGS.get_or_init(|| match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            BridgeSettings::default()
        }
    })
}

/// Install settings loaded elsewhere (e.g. from `--config`). Returns the
/// value back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: BridgeSettings) -> std::result::Result<(), BridgeSettings> {
    SETTINGS.set(settings)
}
