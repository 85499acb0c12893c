//! Configuration loading and config file resolution
//!
//! Resolution priority for the config file path:
//! 1. Command-line argument (highest priority)
//! 2. `LMS_CONFIG` environment variable
//! 3. `<platform config dir>/lms/live.toml`
//!
//! A missing file is not an error: the compiled defaults are used and a
//! warning is logged. Individual values can then be overridden from the
//! environment (see [`TomlConfig::apply_env_overrides`]) and finally from the
//! command line by the binaries.

use crate::events::{NotificationKind, Priority};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "LMS_CONFIG";
/// Environment override for `server_url`
pub const SERVER_ENV_VAR: &str = "LMS_LIVE_SERVER";
/// Environment override for `api_base_url`
pub const API_ENV_VAR: &str = "LMS_LIVE_API";
/// Environment override for `user_id`
pub const USER_ENV_VAR: &str = "LMS_LIVE_USER";
/// Environment override for `token`
pub const TOKEN_ENV_VAR: &str = "LMS_LIVE_TOKEN";

/// Live client configuration file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// WebSocket server base URL (ws:// or wss://)
    pub server_url: String,
    /// Endpoint namespace appended to `server_url`
    pub namespace: String,
    /// HTTP base URL of the poll endpoint
    pub api_base_url: String,
    /// User the connection is opened for
    pub user_id: Option<String>,
    /// Bearer token; normally supplied through the environment instead
    pub token: Option<String>,
    pub logging: LoggingConfig,
    pub reconnect: ReconnectConfig,
    pub polling: PollingConfig,
    pub notifications: NotificationConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:5780".to_string(),
            namespace: "live/analysis".to_string(),
            api_base_url: "http://127.0.0.1:5780".to_string(),
            user_id: None,
            token: None,
            logging: LoggingConfig::default(),
            reconnect: ReconnectConfig::default(),
            polling: PollingConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[reconnect]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Attempts before the connection is declared offline
    pub max_attempts: u32,
    /// Base delay for exponential backoff (milliseconds)
    pub base_delay_ms: u64,
    /// Backoff cap (milliseconds)
    pub max_delay_ms: u64,
    /// Jitter range, 0.0 - 1.0
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            jitter_factor: 0.2,
        }
    }
}

/// `[polling]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Poll timer interval (milliseconds)
    pub interval_ms: u64,
    /// A job without push traffic for this long falls back to polling
    pub push_stale_after_ms: u64,
    /// Whether polling is enabled at startup
    pub auto_refresh: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            push_stale_after_ms: 15_000,
            auto_refresh: true,
        }
    }
}

/// `[notifications]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Maximum retained notifications
    pub capacity: usize,
    /// Notifications below this priority are not ingested
    pub minimum_priority: Priority,
    /// Notification kinds that are never ingested
    pub muted_kinds: Vec<NotificationKind>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            minimum_priority: Priority::Low,
            muted_kinds: Vec::new(),
        }
    }
}

impl TomlConfig {
    /// Apply `LMS_LIVE_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(server) = std::env::var(SERVER_ENV_VAR) {
            self.server_url = server;
        }
        if let Ok(api) = std::env::var(API_ENV_VAR) {
            self.api_base_url = api;
        }
        if let Ok(user) = std::env::var(USER_ENV_VAR) {
            self.user_id = Some(user);
        }
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            self.token = Some(token);
        }
    }

    /// Validate value ranges and URL schemes
    pub fn validate(&self) -> Result<()> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "server_url must use ws:// or wss://, got {}",
                self.server_url
            )));
        }
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "api_base_url must use http:// or https://, got {}",
                self.api_base_url
            )));
        }
        if self.polling.interval_ms == 0 {
            return Err(Error::Config("polling.interval_ms must be greater than 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return Err(Error::Config(format!(
                "reconnect.jitter_factor must be within 0.0 - 1.0, got {}",
                self.reconnect.jitter_factor
            )));
        }
        if self.notifications.capacity == 0 {
            return Err(Error::Config("notifications.capacity must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Full WebSocket endpoint (`server_url` + `/` + `namespace`)
    pub fn endpoint_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let namespace = self.namespace.trim_matches('/');
        if namespace.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, namespace)
        }
    }
}

/// Resolve which config file to read
///
/// Returns `None` when no CLI argument or environment variable is given and
/// the platform has no config directory.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    // Priority 3: Platform config directory
    dirs::config_dir().map(|dir| dir.join("lms").join("live.toml"))
}

/// Load the config file, falling back to defaults when it does not exist
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        info!("No config file location available, using defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Write the config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
