//! Bootstrap configuration loading and root folder resolution
//!
//! The TOML file holds bootstrap settings only (server URL, port, tier limits,
//! logging). Values are resolved with the priority
//! command line -> environment -> TOML -> built-in default.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "paperdesk.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder for the local database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Base URL of the document processing server
    #[serde(default)]
    pub server_url: Option<String>,

    /// Bearer token issued by the authentication service
    #[serde(default)]
    pub api_token: Option<String>,

    /// Port of the local observer API
    #[serde(default)]
    pub port: Option<u16>,

    /// Subscription tier snapshot from the user profile
    #[serde(default)]
    pub tier: Option<TierConfig>,

    /// Upload session timing
    #[serde(default)]
    pub upload: UploadTimingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Tier snapshot as written in the TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Tier identifier ("free", "pro", ...)
    pub name: String,
    /// Hard ceiling on files per submission
    pub max_files_per_batch: u32,
}

/// Upload session timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTimingConfig {
    /// Delay before a succeeded session is reset to idle
    #[serde(default = "default_auto_reset_secs")]
    pub auto_reset_secs: u64,

    /// Transport request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Interval between processing progress polls (0 disables polling)
    #[serde(default = "default_processing_poll_secs")]
    pub processing_poll_secs: u64,
}

impl Default for UploadTimingConfig {
    fn default() -> Self {
        Self {
            auto_reset_secs: default_auto_reset_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            processing_poll_secs: default_processing_poll_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_auto_reset_secs() -> u64 {
    3
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_processing_poll_secs() -> u64 {
    5
}

/// Default TOML path for a module: `<config dir>/paperdesk/<module>.toml`
pub fn default_config_path(module_name: &str) -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("paperdesk").join(format!("{}.toml", module_name)))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Load TOML configuration
///
/// A missing file is not an error: built-in defaults are returned.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        debug!("No config file at {}, using defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Write TOML configuration atomically (temp file + rename)
///
/// On Unix the file is restricted to 0600 since it may hold the API token.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Resolve a string setting from environment then TOML
///
/// Warns when both sources provide a value; the environment wins.
pub fn resolve_setting(env_var_name: &str, toml_value: Option<&str>) -> Option<String> {
    let env_value = std::env::var(env_var_name)
        .ok()
        .filter(|v| !v.trim().is_empty());
    let toml_value = toml_value.filter(|v| !v.trim().is_empty());

    match (env_value, toml_value) {
        (Some(env), Some(_)) => {
            warn!(
                "{} set in both environment and TOML config. Using environment.",
                env_var_name
            );
            Some(env)
        }
        (Some(env), None) => Some(env),
        (None, Some(toml)) => Some(toml.to_string()),
        (None, None) => None,
    }
}

/// Root folder resolution, in priority order:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent default
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        return PathBuf::from(path);
    }

    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("paperdesk"))
        .unwrap_or_else(|| PathBuf::from("./paperdesk_data"))
}

/// Path of the SQLite database inside a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE_NAME)
}
