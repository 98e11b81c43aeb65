//! Bridge configuration
//!
//! Loaded from TOML at startup, then overlaid with environment variables.
//! Every section has defaults so a partial file (or none at all) is fine;
//! [`BridgeConfig::validate`] decides whether what we ended up with is
//! enough to talk to both systems.

use crate::error::{Error, Result};
use crate::mapping::{ColumnMap, UserMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TRACKER_BASE_URL: &str = "https://app.asana.com/api/1.0";
pub const DEFAULT_LIST_BASE_URL: &str = "https://slack.com/api";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub tracker: TrackerConfig,
    pub list: ListConfig,
    pub sync: SyncSettings,
    /// Explicit logical key → list column id. Wins over sampled columns.
    pub columns: BTreeMap<String, String>,
    /// Tracker user id → list user id.
    pub users: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: BindMode,
}

/// Interface the webhook server listens on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    Loopback,
    #[default]
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub project_id: String,
    pub access_token: Option<String>,
    pub base_url: String,
    /// Webhook signing secret. When unset, the handshake secret is adopted.
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListConfig {
    pub list_id: String,
    pub bot_token: Option<String>,
    pub base_url: String,
    /// Events API signing secret. When unset, list deliveries are not verified.
    pub signing_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// How long a write mark suppresses the mirrored notification.
    pub echo_ttl_ms: u64,
    pub sweep_interval_ms: u64,
    /// Pause before re-reading the list after a change notification.
    pub settle_delay_ms: u64,
    /// Status key whose section receives rows with no usable status.
    pub default_status: String,
    /// Cap on live echo marks; oldest evicted first. Unbounded when unset.
    pub echo_max_entries: Option<usize>,
    pub tracker_link_text: String,
}

// ============================================================
// Defaults
// ============================================================

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000, bind: BindMode::default() }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            access_token: None,
            base_url: DEFAULT_TRACKER_BASE_URL.into(),
            webhook_secret: None,
        }
    }
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            list_id: String::new(),
            bot_token: None,
            base_url: DEFAULT_LIST_BASE_URL.into(),
            signing_secret: None,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            echo_ttl_ms: 10_000,
            sweep_interval_ms: 5_000,
            settle_delay_ms: 500,
            default_status: "open_bugs".into(),
            echo_max_entries: None,
            tracker_link_text: "View in Asana".into(),
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl BridgeConfig {
    /// Load config from a TOML file. A missing file yields defaults; a file
    /// that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content)
                    .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
                tracing::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Overlay values from an arbitrary variable source. Empty values are
    /// treated as unset.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("ASANA_ACCESS_TOKEN") {
            self.tracker.access_token = Some(v);
        }
        if let Some(v) = var("ASANA_PROJECT_ID") {
            self.tracker.project_id = v;
        }
        if let Some(v) = var("ASANA_WEBHOOK_SECRET") {
            self.tracker.webhook_secret = Some(v);
        }
        if let Some(v) = var("LISTBRIDGE_BASE_URL_TRACKER") {
            self.tracker.base_url = v;
        }
        if let Some(v) = var("SLACK_BOT_TOKEN") {
            self.list.bot_token = Some(v);
        }
        if let Some(v) = var("SLACK_LIST_ID") {
            self.list.list_id = v;
        }
        if let Some(v) = var("SLACK_SIGNING_SECRET") {
            self.list.signing_secret = Some(v);
        }
        if let Some(v) = var("LISTBRIDGE_BASE_URL_LIST") {
            self.list.base_url = v;
        }
        if let Some(v) = var("PORT") {
            match v.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %v, "ignoring unparseable PORT"),
            }
        }
    }

    /// Everything needed before the first network call.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.tracker.project_id.trim().is_empty() {
            missing.push("tracker.project_id (ASANA_PROJECT_ID)");
        }
        if self.tracker.access_token.as_deref().map_or(true, |t| t.trim().is_empty()) {
            missing.push("tracker.access_token (ASANA_ACCESS_TOKEN)");
        }
        if self.list.list_id.trim().is_empty() {
            missing.push("list.list_id (SLACK_LIST_ID)");
        }
        if self.list.bot_token.as_deref().map_or(true, |t| t.trim().is_empty()) {
            missing.push("list.bot_token (SLACK_BOT_TOKEN)");
        }
        if !missing.is_empty() {
            return Err(Error::config(format!("missing {}", missing.join(", "))));
        }
        if self.sync.echo_ttl_ms == 0 {
            return Err(Error::config("sync.echo_ttl_ms must be positive"));
        }
        if self.sync.sweep_interval_ms == 0 {
            return Err(Error::config("sync.sweep_interval_ms must be positive"));
        }
        if self.sync.echo_max_entries == Some(0) {
            return Err(Error::config("sync.echo_max_entries must be positive when set"));
        }
        Ok(())
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn column_overrides(&self) -> ColumnMap {
        ColumnMap::from_pairs(self.columns.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    pub fn user_map(&self) -> UserMap {
        UserMap::new(self.users.clone())
    }
}

impl SyncSettings {
    pub fn echo_ttl(&self) -> Duration {
        Duration::from_millis(self.echo_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
