//! Unit tests for configuration loading and graceful degradation
//!
//! Tests that manipulate LMS_* environment variables are marked #[serial]
//! so they never run in parallel with each other.

use lms_common::config::{
    load_toml_config, resolve_config_path, write_toml_config, TomlConfig, CONFIG_ENV_VAR,
    SERVER_ENV_VAR, TOKEN_ENV_VAR,
};
use lms_common::events::{NotificationKind, Priority};
use lms_common::Error;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[test]
fn test_defaults_are_valid() {
    let config = TomlConfig::default();
    config.validate().expect("compiled defaults must validate");

    assert_eq!(config.reconnect.max_attempts, 5);
    assert_eq!(config.polling.interval_ms, 5000);
    assert!(config.polling.auto_refresh);
    assert_eq!(config.notifications.capacity, 100);
    assert_eq!(config.endpoint_url(), "ws://127.0.0.1:5780/live/analysis");
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does-not-exist.toml");

    let config = load_toml_config(Some(&path)).expect("missing file must not fail");
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_no_path_uses_defaults() {
    let config = load_toml_config(None).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_partial_file_keeps_section_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.toml");
    std::fs::write(
        &path,
        r#"
server_url = "wss://lms.example.edu"

[polling]
interval_ms = 2000

[notifications]
minimum_priority = "high"
muted_kinds = ["course", "system"]
"#,
    )
    .unwrap();

    let config = load_toml_config(Some(&path)).unwrap();
    assert_eq!(config.server_url, "wss://lms.example.edu");
    assert_eq!(config.polling.interval_ms, 2000);
    assert_eq!(config.polling.push_stale_after_ms, 15_000, "unset keys keep defaults");
    assert_eq!(config.reconnect.max_attempts, 5, "unset sections keep defaults");
    assert_eq!(config.notifications.minimum_priority, Priority::High);
    assert_eq!(
        config.notifications.muted_kinds,
        vec![NotificationKind::Course, NotificationKind::System]
    );
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.toml");
    std::fs::write(&path, "server_url = [not valid").unwrap();

    let err = load_toml_config(Some(&path)).expect_err("malformed TOML must fail");
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_validate_rejects_bad_values() {
    let mut config = TomlConfig::default();
    config.server_url = "http://127.0.0.1:5780".to_string();
    assert!(config.validate().is_err(), "server_url must be a ws URL");

    let mut config = TomlConfig::default();
    config.polling.interval_ms = 0;
    assert!(config.validate().is_err());

    let mut config = TomlConfig::default();
    config.reconnect.jitter_factor = 1.5;
    assert!(config.validate().is_err());
}

#[test]
fn test_endpoint_url_normalizes_slashes() {
    let mut config = TomlConfig::default();
    config.server_url = "ws://host:1/".to_string();
    config.namespace = "/analysis/".to_string();
    assert_eq!(config.endpoint_url(), "ws://host:1/analysis");

    config.namespace = String::new();
    assert_eq!(config.endpoint_url(), "ws://host:1");
}

#[test]
fn test_write_then_load_preserves_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("live.toml");

    let mut config = TomlConfig::default();
    config.user_id = Some("instructor-42".to_string());
    config.reconnect.max_attempts = 3;

    write_toml_config(&config, &path).expect("write should create parent dirs");
    let loaded = load_toml_config(Some(&path)).unwrap();
    assert_eq!(loaded, config);
    assert!(!path.with_extension("toml.tmp").exists(), "temp file is renamed away");
}

#[test]
#[serial]
fn test_resolve_config_path_priority() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/lms-env.toml");

    let cli = PathBuf::from("/tmp/lms-cli.toml");
    assert_eq!(resolve_config_path(Some(Path::new("/tmp/lms-cli.toml"))), Some(cli));
    assert_eq!(
        resolve_config_path(None),
        Some(PathBuf::from("/tmp/lms-env.toml"))
    );

    env::remove_var(CONFIG_ENV_VAR);
    if let Some(path) = resolve_config_path(None) {
        assert!(path.ends_with("lms/live.toml"));
    }
}

#[test]
#[serial]
fn test_env_overrides() {
    env::set_var(SERVER_ENV_VAR, "wss://override.example.edu");
    env::set_var(TOKEN_ENV_VAR, "secret-token");

    let mut config = TomlConfig::default();
    config.apply_env_overrides();

    assert_eq!(config.server_url, "wss://override.example.edu");
    assert_eq!(config.token.as_deref(), Some("secret-token"));

    env::remove_var(SERVER_ENV_VAR);
    env::remove_var(TOKEN_ENV_VAR);
}
