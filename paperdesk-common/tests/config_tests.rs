//! Integration tests for bootstrap configuration
//!
//! Covers TOML write/load round trips, graceful handling of missing files,
//! and ENV -> TOML resolution order.
//!
//! Note: Uses serial_test to prevent ENV variable race conditions.
//! Tests that manipulate PAPERDESK_* variables are marked with #[serial].

use paperdesk_common::config::{
    load_toml_config, resolve_root_folder, resolve_setting, write_toml_config, LoggingConfig,
    TierConfig, TomlConfig, UploadTimingConfig,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn sample_config() -> TomlConfig {
    TomlConfig {
        root_folder: Some(PathBuf::from("/srv/paperdesk")),
        logging: LoggingConfig::default(),
        server_url: Some("https://papers.example.org/api".to_string()),
        api_token: Some("token-123".to_string()),
        port: Some(5810),
        tier: Some(TierConfig {
            name: "free".to_string(),
            max_files_per_batch: 5,
        }),
        upload: UploadTimingConfig::default(),
    }
}

#[test]
fn test_write_then_load_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("paperdesk-upload.toml");

    let config = sample_config();
    write_toml_config(&config, &path).unwrap();

    let loaded = load_toml_config(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_atomic_write_leaves_no_temp_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("paperdesk-upload.toml");

    write_toml_config(&sample_config(), &path).unwrap();

    assert!(path.exists());
    assert!(!temp_dir.path().join("paperdesk-upload.toml.tmp").exists());
}

#[test]
fn test_write_creates_parent_directories() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("dir").join("config.toml");

    write_toml_config(&sample_config(), &path).unwrap();
    assert!(path.exists());
}

#[cfg(unix)]
#[test]
fn test_written_config_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("paperdesk-upload.toml");
    write_toml_config(&sample_config(), &path).unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn test_missing_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("does-not-exist.toml");

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config, TomlConfig::default());
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_malformed_file_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "server_url = [unterminated").unwrap();

    let err = load_toml_config(&path).unwrap_err();
    assert!(err.to_string().contains("Parse TOML failed"));
}

#[test]
#[serial]
fn test_env_setting_overrides_toml() {
    env::set_var("PAPERDESK_TEST_SERVER_URL", "https://env.example.org");

    let resolved = resolve_setting("PAPERDESK_TEST_SERVER_URL", Some("https://toml.example.org"));
    assert_eq!(resolved.as_deref(), Some("https://env.example.org"));

    env::remove_var("PAPERDESK_TEST_SERVER_URL");
}

#[test]
#[serial]
fn test_blank_env_setting_falls_back_to_toml() {
    env::set_var("PAPERDESK_TEST_SERVER_URL", "   ");

    let resolved = resolve_setting("PAPERDESK_TEST_SERVER_URL", Some("https://toml.example.org"));
    assert_eq!(resolved.as_deref(), Some("https://toml.example.org"));

    env::remove_var("PAPERDESK_TEST_SERVER_URL");
}

#[test]
#[serial]
fn test_root_folder_env_beats_toml() {
    env::set_var("PAPERDESK_TEST_ROOT", "/from/env");

    let resolved = resolve_root_folder(None, "PAPERDESK_TEST_ROOT", &sample_config());
    assert_eq!(resolved, PathBuf::from("/from/env"));

    env::remove_var("PAPERDESK_TEST_ROOT");
}
