//! Configuration resolution for paperdesk-upload
//!
//! Priority: command line -> environment (`PAPERDESK_*`) -> TOML -> default.
//! A value present in more than one source is logged with a warning.

use paperdesk_common::config::{resolve_root_folder, resolve_setting, TomlConfig};
use paperdesk_common::{Error, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::TierPolicy;
use crate::services::OrchestratorConfig;

pub const ENV_SERVER_URL: &str = "PAPERDESK_SERVER_URL";
pub const ENV_API_TOKEN: &str = "PAPERDESK_API_TOKEN";
pub const ENV_PORT: &str = "PAPERDESK_PORT";
pub const ENV_ROOT_FOLDER: &str = "PAPERDESK_ROOT_FOLDER";
pub const ENV_TIER: &str = "PAPERDESK_TIER";
pub const ENV_MAX_FILES_PER_BATCH: &str = "PAPERDESK_MAX_FILES_PER_BATCH";

pub const DEFAULT_PORT: u16 = 5810;
const DEFAULT_TIER: &str = "free";
const DEFAULT_MAX_FILES_PER_BATCH: u32 = 5;

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub server_url: Option<String>,
    pub port: Option<u16>,
    pub root_folder: Option<PathBuf>,
}

/// Fully resolved runtime configuration
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub server_url: String,
    pub api_token: Option<String>,
    pub port: u16,
    pub root_folder: PathBuf,
    pub tier: TierPolicy,
    pub auto_reset_after: Duration,
    pub request_timeout: Duration,
    /// `None` disables processing progress polling
    pub processing_poll_interval: Option<Duration>,
}

fn parse_setting<T: FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid value for {}: '{}' ({})", name, raw, e)))
}

fn with_cli<T>(name: &str, cli: Option<T>, fallback: Option<T>) -> Option<T> {
    match (cli, fallback) {
        (Some(cli), Some(_)) => {
            warn!("{} given on the command line and in config. Using command line.", name);
            Some(cli)
        }
        (Some(cli), None) => Some(cli),
        (None, fallback) => fallback,
    }
}

impl UploadConfig {
    /// Resolve every setting from the command line, environment and TOML
    pub fn resolve(cli: &CliOverrides, toml_config: &TomlConfig) -> Result<Self> {
        let server_url = with_cli(
            "server_url",
            cli.server_url.clone(),
            resolve_setting(ENV_SERVER_URL, toml_config.server_url.as_deref()),
        )
        .ok_or_else(|| {
            Error::Config(format!(
                "Server URL not configured. Set one of:\n\
                 1. Command line: --server-url https://...\n\
                 2. Environment: {}=https://...\n\
                 3. TOML config: server_url = \"https://...\"",
                ENV_SERVER_URL
            ))
        })?;

        let api_token = resolve_setting(ENV_API_TOKEN, toml_config.api_token.as_deref());
        if api_token.is_none() {
            warn!("No API token configured, submissions will be sent unauthenticated");
        }

        let env_port = resolve_setting(ENV_PORT, None)
            .map(|raw| parse_setting::<u16>(ENV_PORT, &raw))
            .transpose()?;
        let port = with_cli("port", cli.port, env_port.or(toml_config.port)).unwrap_or(DEFAULT_PORT);

        let root_folder =
            resolve_root_folder(cli.root_folder.as_deref(), ENV_ROOT_FOLDER, toml_config);

        let tier = resolve_tier(toml_config)?;

        let timing = &toml_config.upload;
        if timing.request_timeout_secs == 0 {
            return Err(Error::Config(
                "upload.request_timeout_secs must be at least 1 second".to_string(),
            ));
        }
        let processing_poll_interval = match timing.processing_poll_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            server_url,
            api_token,
            port,
            root_folder,
            tier,
            auto_reset_after: Duration::from_secs(timing.auto_reset_secs),
            request_timeout: Duration::from_secs(timing.request_timeout_secs),
            processing_poll_interval,
        })
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        OrchestratorConfig {
            auto_reset_after: self.auto_reset_after,
            processing_poll_interval: self
                .processing_poll_interval
                .unwrap_or(defaults.processing_poll_interval),
        }
    }
}

/// Tier snapshot from environment or TOML, falling back to the free tier
fn resolve_tier(toml_config: &TomlConfig) -> Result<TierPolicy> {
    let toml_tier = toml_config.tier.as_ref();
    let name = resolve_setting(ENV_TIER, toml_tier.map(|t| t.name.as_str()));
    let toml_max = toml_tier.map(|t| t.max_files_per_batch.to_string());
    let max = resolve_setting(ENV_MAX_FILES_PER_BATCH, toml_max.as_deref())
        .map(|raw| parse_setting::<u32>(ENV_MAX_FILES_PER_BATCH, &raw))
        .transpose()?;

    let policy = match (name, max) {
        (Some(name), Some(max)) => TierPolicy::new(name, max)?,
        (name, max) => {
            let name = name.unwrap_or_else(|| DEFAULT_TIER.to_string());
            let max = max.unwrap_or(DEFAULT_MAX_FILES_PER_BATCH);
            warn!(
                tier = %name,
                max_files_per_batch = max,
                "Tier not fully configured, using defaults for missing values"
            );
            TierPolicy::new(name, max)?
        }
    };

    info!(
        tier = %policy.tier_name(),
        max_files_per_batch = policy.max_files_per_batch(),
        "Tier policy loaded"
    );
    Ok(policy)
}
