//! Runtime configuration for the live client
//!
//! Built from the lms-common TOML file. Layers apply in order: file,
//! environment, command-line flags. Validation runs once all of them are in.

use crate::connection::ReconnectPolicy;
use crate::error::LiveResult;
use crate::notifications::NotificationPreferences;
use lms_common::config::{load_toml_config, resolve_config_path, TomlConfig};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Full WebSocket endpoint including the namespace
    pub endpoint: String,
    pub api_base_url: String,
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub poll_interval: Duration,
    pub push_stale_after: Duration,
    pub auto_refresh: bool,
    pub notification_capacity: usize,
    pub preferences: NotificationPreferences,
    pub log_level: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::from_toml(&TomlConfig::default())
    }
}

impl LiveConfig {
    pub fn from_toml(config: &TomlConfig) -> Self {
        Self {
            endpoint: config.endpoint_url(),
            api_base_url: config.api_base_url.clone(),
            user_id: config.user_id.clone(),
            token: config.token.clone(),
            reconnect: ReconnectPolicy::from(&config.reconnect),
            poll_interval: Duration::from_millis(config.polling.interval_ms),
            push_stale_after: Duration::from_millis(config.polling.push_stale_after_ms),
            auto_refresh: config.polling.auto_refresh,
            notification_capacity: config.notifications.capacity,
            preferences: NotificationPreferences::from(&config.notifications),
            log_level: config.logging.level.clone(),
        }
    }

    /// Resolve, load, apply environment then flag overrides, and validate
    pub fn load(cli_path: Option<&Path>, overrides: &ConfigOverrides) -> LiveResult<Self> {
        let path = resolve_config_path(cli_path);
        let mut config = load_toml_config(path.as_deref())?;
        config.apply_env_overrides();
        overrides.apply(&mut config);
        config.validate()?;
        Ok(Self::from_toml(&config))
    }
}

/// Command-line values that win over the file and the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Full WebSocket endpoint, namespace included
    pub endpoint: Option<String>,
    pub api_base_url: Option<String>,
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub disable_auto_refresh: bool,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut TomlConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.server_url = endpoint.clone();
            config.namespace.clear();
        }
        if let Some(api) = &self.api_base_url {
            config.api_base_url = api.clone();
        }
        if self.user_id.is_some() {
            config.user_id = self.user_id.clone();
        }
        if self.token.is_some() {
            config.token = self.token.clone();
        }
        if self.disable_auto_refresh {
            config.polling.auto_refresh = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LiveError;
    use lms_common::events::{NotificationKind, Priority};

    #[test]
    fn test_from_toml_converts_units() {
        let mut toml = TomlConfig::default();
        toml.polling.interval_ms = 250;
        toml.reconnect.base_delay_ms = 50;
        toml.notifications.minimum_priority = Priority::High;
        toml.notifications.muted_kinds = vec![NotificationKind::System];

        let config = LiveConfig::from_toml(&toml);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(50));
        assert_eq!(config.endpoint, "ws://127.0.0.1:5780/live/analysis");
        assert_eq!(config.preferences.minimum_priority, Priority::High);
        assert!(config.preferences.muted_kinds.contains(&NotificationKind::System));
    }

    #[test]
    fn test_load_with_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.toml");
        std::fs::write(&path, "namespace = \"rt\"\n[polling]\nauto_refresh = false\n").unwrap();

        let config = LiveConfig::load(Some(&path), &ConfigOverrides::default()).unwrap();
        assert!(config.endpoint.ends_with("/rt"));
        assert!(!config.auto_refresh);
    }

    #[test]
    fn test_flag_overrides_win_and_replace_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.toml");
        std::fs::write(&path, "namespace = \"rt\"\nuser_id = \"from-file\"\n").unwrap();

        let overrides = ConfigOverrides {
            endpoint: Some("wss://lms.example.org/socket".to_string()),
            user_id: Some("from-flag".to_string()),
            disable_auto_refresh: true,
            ..Default::default()
        };
        let config = LiveConfig::load(Some(&path), &overrides).unwrap();
        assert_eq!(config.endpoint, "wss://lms.example.org/socket");
        assert_eq!(config.user_id.as_deref(), Some("from-flag"));
        assert!(!config.auto_refresh);
    }

    #[test]
    fn test_invalid_flag_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.toml");
        std::fs::write(&path, "").unwrap();

        let bad_endpoint = ConfigOverrides {
            endpoint: Some("http://lms.example.org/socket".to_string()),
            ..Default::default()
        };
        let err = LiveConfig::load(Some(&path), &bad_endpoint).unwrap_err();
        assert!(matches!(err, LiveError::Common(lms_common::Error::Config(_))));

        let bad_api = ConfigOverrides {
            api_base_url: Some("ftp://lms.example.org".to_string()),
            ..Default::default()
        };
        let err = LiveConfig::load(Some(&path), &bad_api).unwrap_err();
        assert!(err.to_string().contains("api_base_url"));
    }
}
