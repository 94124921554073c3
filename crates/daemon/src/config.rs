//! Configuration management for the fsgate daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/fsgate/config.toml`.
//!
//! Precedence, lowest to highest: built-in defaults, the config file,
//! `FSGATE_*` environment variables, command line flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sandbox::{AllowList, SandboxError};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("at least one allowed directory must be configured (sandbox.allowed_dirs, FSGATE_ALLOWED_DIRS or --allowed-dirs)")]
    NoAllowedDirectories,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("request_timeout_secs must be between 0 and 86400, got {0}")]
    InvalidRequestTimeout(u64),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for the per-request deadline (one day).
const MAX_REQUEST_TIMEOUT_SECS: u64 = 86_400;

/// Environment variable overriding the log level.
pub const ENV_LOG_LEVEL: &str = "FSGATE_LOG_LEVEL";

/// Environment variable overriding the allowed directories, comma separated.
pub const ENV_ALLOWED_DIRS: &str = "FSGATE_ALLOWED_DIRS";

/// Main configuration structure for the fsgate daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Filesystem sandbox.
    pub sandbox: SandboxConfig,

    /// Transport selection.
    pub server: ServerConfig,

    /// Per-request limits.
    pub limits: LimitsConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for a daily rolling log file. Logs only go to stderr when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// Filesystem sandbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SandboxConfig {
    /// Root directories every tool call is confined to.
    pub allowed_dirs: Vec<PathBuf>,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Unix socket to listen on. Serves stdin/stdout when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

/// Per-request limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LimitsConfig {
    /// Deadline for a single tool call in seconds (0 = no deadline).
    pub request_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fsgate")
        .join("config.toml")
}

/// Split a comma separated directory list, dropping empty items.
pub fn parse_dir_list(list: &str) -> Vec<PathBuf> {
    list.split(',')
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .collect()
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - FSGATE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - FSGATE_ALLOWED_DIRS: Override allowed directories, comma separated
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            if !level.is_empty() {
                tracing::info!(log_level = %level, "Overriding log_level from environment");
                self.daemon.log_level = level;
            }
        }

        if let Ok(dirs) = std::env::var(ENV_ALLOWED_DIRS) {
            let dirs = parse_dir_list(&dirs);
            if !dirs.is_empty() {
                tracing::info!(count = dirs.len(), "Overriding allowed_dirs from environment");
                self.sandbox.allowed_dirs = dirs;
            }
        }
    }

    /// Replace the allowed directories with a comma separated list, as given
    /// on the command line. An empty list leaves the configuration unchanged.
    pub fn apply_allowed_dirs_flag(&mut self, list: &str) {
        let dirs = parse_dir_list(list);
        if !dirs.is_empty() {
            self.sandbox.allowed_dirs = dirs;
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_dir = self
            .sandbox
            .allowed_dirs
            .iter()
            .any(|dir| !dir.as_os_str().is_empty());
        if !has_dir {
            return Err(ConfigError::NoAllowedDirectories);
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if self.limits.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return Err(ConfigError::InvalidRequestTimeout(
                self.limits.request_timeout_secs,
            ));
        }

        Ok(())
    }

    /// Per-request deadline, if one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.limits.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Build the sandbox allow-list from the configured directories.
    pub fn allow_list(&self) -> Result<AllowList, SandboxError> {
        AllowList::new(&self.sandbox.allowed_dirs)
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    ///
    /// The default path is `~/.config/fsgate/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
