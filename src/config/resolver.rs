//! Precedence resolution for configuration and state.
//!
//! ## Config Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment variables (`TSK_API_URL`)
//! 3. config.kdl (`~/.config/tasksync/config.kdl`, or `$TSK_CONFIG_DIR/config.kdl`)
//! 4. Built-in defaults
//!
//! ## Token Precedence (highest to lowest)
//!
//! 1. `TSK_TOKEN` environment variable
//! 2. state.kdl in the data directory

use std::path::{Path, PathBuf};

use crate::config::schema::{self, OutputFormat, TaskSyncConfig};
use crate::{Error, Result};

/// Default remote API base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:4000/api";

/// Default seconds between connectivity probes in watch mode.
pub const DEFAULT_WATCH_INTERVAL: u64 = 15;

/// Environment variable overriding the API base URL.
pub const API_URL_ENV: &str = "TSK_API_URL";

/// Environment variable supplying an API token.
pub const TOKEN_ENV: &str = "TSK_TOKEN";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "TSK_CONFIG_DIR";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from environment variable
    EnvVar(String),
    /// Value from config.kdl or state.kdl
    File,
    /// Value from CLI flag
    CliFlag,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::File => write!(f, "file"),
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub api_url: Resolved<String>,
    pub output_format: Resolved<OutputFormat>,
    pub watch_interval: Resolved<u64>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            api_url: Resolved::new(DEFAULT_API_URL.to_string(), ValueSource::Default),
            output_format: Resolved::new(OutputFormat::Json, ValueSource::Default),
            watch_interval: Resolved::new(DEFAULT_WATCH_INTERVAL, ValueSource::Default),
        }
    }
}

impl ResolvedConfig {
    /// API base URL without a trailing slash.
    pub fn api_url(&self) -> &str {
        self.api_url.value.trim_end_matches('/')
    }

    pub fn output_format(&self) -> &OutputFormat {
        &self.output_format.value
    }

    pub fn watch_interval(&self) -> u64 {
        self.watch_interval.value
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub output_format: Option<OutputFormat>,
    pub watch_interval: Option<u64>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }
}

/// Path of config.kdl: `$TSK_CONFIG_DIR/config.kdl` or the platform config dir.
pub fn config_kdl_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir).join("config.kdl"));
        }
    }
    dirs::config_dir().map(|dir| dir.join("tasksync").join("config.kdl"))
}

/// Path of state.kdl inside a data directory.
pub fn state_kdl_path(data_dir: &Path) -> PathBuf {
    data_dir.join("state.kdl")
}

/// Resolve configuration from the config file at its standard location.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let file_config = match config_kdl_path() {
        Some(path) => schema::read_config(&path)?,
        None => TaskSyncConfig::default(),
    };
    resolve_config_with(&file_config, overrides)
}

/// Resolve configuration against an already loaded config file.
pub fn resolve_config_with(
    file_config: &TaskSyncConfig,
    overrides: &ConfigOverrides,
) -> Result<ResolvedConfig> {
    let mut result = ResolvedConfig::default();

    if let Some(ref url) = overrides.api_url {
        result.api_url = Resolved::new(url.clone(), ValueSource::CliFlag);
    } else if let Some(url) = env_value(API_URL_ENV) {
        result.api_url = Resolved::new(url, ValueSource::EnvVar(API_URL_ENV.to_string()));
    } else if let Some(ref url) = file_config.api_url {
        result.api_url = Resolved::new(url.clone(), ValueSource::File);
    }

    if !result.api_url.value.starts_with("http://") && !result.api_url.value.starts_with("https://")
    {
        return Err(Error::Config(format!(
            "api url must start with http:// or https:// ({}): {}",
            result.api_url.source, result.api_url.value
        )));
    }

    if let Some(ref format) = overrides.output_format {
        result.output_format = Resolved::new(format.clone(), ValueSource::CliFlag);
    } else if let Some(ref format) = file_config.output_format {
        result.output_format = Resolved::new(format.clone(), ValueSource::File);
    }

    if let Some(interval) = overrides.watch_interval {
        if !schema::WATCH_INTERVAL_RANGE.contains(&interval) {
            return Err(Error::InvalidInput(format!(
                "watch interval must be 1-3600 seconds, got {}",
                interval
            )));
        }
        result.watch_interval = Resolved::new(interval, ValueSource::CliFlag);
    } else if let Some(interval) = file_config.watch_interval {
        result.watch_interval = Resolved::new(interval, ValueSource::File);
    }

    Ok(result)
}

/// Resolve the API token: `TSK_TOKEN` first, then state.kdl.
pub fn resolve_token(data_dir: &Path) -> Result<Option<Resolved<String>>> {
    if let Some(token) = env_value(TOKEN_ENV) {
        return Ok(Some(Resolved::new(
            token,
            ValueSource::EnvVar(TOKEN_ENV.to_string()),
        )));
    }
    let state = schema::read_state(&state_kdl_path(data_dir))?;
    Ok(state
        .auth_token
        .map(|token| Resolved::new(token, ValueSource::File)))
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
