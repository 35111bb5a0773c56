//! Configuration management for the VitaLink client.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/vitalink/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("server.port must not be 0")]
    InvalidPort,

    #[error("server.host must not be empty")]
    EmptyHost,

    #[error("server.identity must not be empty")]
    EmptyServerIdentity,

    #[error("{0} must be between 1 and 3600 seconds, got {1}")]
    InvalidTimeout(&'static str, u64),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the VitaLink client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Records server endpoint.
    pub server: ServerConfig,

    /// Bounds on blocking waits.
    pub timeouts: TimeoutConfig,

    /// Client-local settings.
    pub client: ClientSettings,
}

/// Records server endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Hostname or address of the records server.
    pub host: String,

    /// TCP port of the records server.
    pub port: u16,

    /// Account identifier the server's public key is registered under in the
    /// key store. Used for one-shot exchanges issued before the handshake
    /// has announced the server's key.
    pub identity: String,
}

/// Bounds on blocking waits. Every wait in the session is bounded; expiry
/// surfaces as a timeout error rather than an indefinite hang.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Maximum seconds to wait for the handshake to reach the keyed state.
    pub handshake_secs: u64,

    /// Maximum seconds to wait for a response to one request.
    pub request_secs: u64,
}

/// Client-local settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientSettings {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9009,
            identity: "records-server".to_string(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_secs: 10,
            request_secs: 30,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl TimeoutConfig {
    /// Returns the handshake bound as a [`Duration`].
    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    /// Returns the per-request bound as a [`Duration`].
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vitalink")
        .join("config.toml")
}

impl Config {
    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if self.server.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        if self.server.identity.trim().is_empty() {
            return Err(ConfigError::EmptyServerIdentity);
        }

        for (name, value) in [
            ("timeouts.handshake_secs", self.timeouts.handshake_secs),
            ("timeouts.request_secs", self.timeouts.request_secs),
        ] {
            if value == 0 || value > 3600 {
                return Err(ConfigError::InvalidTimeout(name, value));
            }
        }

        let level = self.client.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.client.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| anyhow::anyhow!("invalid TOML configuration: {e}"))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory: {}", parent.display())
            })?;
        }

        let contents =
            toml::to_string_pretty(self).context("failed to serialize configuration to TOML")?;
        fs::write(path, contents)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;

        tracing::debug!("configuration saved to {:?}", path);
        Ok(())
    }
}
