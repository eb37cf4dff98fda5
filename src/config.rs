//! Configuration management for uniclip.
//!
//! One TOML file drives both roles; the hub reads the `[hub]` table,
//! daemons read `[daemon]`, and both share `[auth]`. Every field has a
//! default so an empty file (or no file at all) yields a working
//! localhost setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Shared credential pair
    #[serde(default)]
    pub auth: AuthConfig,

    /// Hub-side settings
    #[serde(default)]
    pub hub: HubConfig,

    /// Daemon-side settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// The single shared credential pair gating hub access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_pass")]
    pub pass: String,
}

/// Hub-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Address the hub listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Data directory for the clipboard change log; empty disables it
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Daemon-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// WebSocket URL of the hub
    #[serde(default = "default_hub_url")]
    pub hub_url: String,

    /// Identity announced during the handshake; empty means hostname
    #[serde(default)]
    pub identity: String,

    /// Seconds between reconnection attempts
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,

    /// OS clipboard poll interval in milliseconds
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_user() -> String {
    "uniclip".to_string()
}

fn default_pass() -> String {
    "uniclip".to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1:7458".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("uniclip"))
        .unwrap_or_default()
}

fn default_hub_url() -> String {
    "ws://127.0.0.1:7458".to_string()
}

fn default_reconnect_secs() -> u64 {
    10
}

fn default_poll_ms() -> u64 {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            hub: HubConfig::default(),
            daemon: DaemonConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            pass: default_pass(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            hub_url: default_hub_url(),
            identity: String::new(),
            reconnect_secs: default_reconnect_secs(),
            poll_ms: default_poll_ms(),
        }
    }
}

impl Config {
    /// Load from `path`, or fall back to defaults when the file does
    /// not exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };

        let config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str(&raw)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("uniclip").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("uniclip.toml"))
    }

    /// Identity a daemon announces: configured name or the hostname.
    pub fn daemon_identity(&self) -> String {
        if !self.daemon.identity.is_empty() {
            return self.daemon.identity.clone();
        }
        gethostname::gethostname().to_string_lossy().into_owned()
    }

    /// Change-log directory, `None` when disabled.
    pub fn hub_data_dir(&self) -> Option<PathBuf> {
        if self.hub.data_dir.as_os_str().is_empty() {
            None
        } else {
            Some(self.hub.data_dir.clone())
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.user.is_empty() {
            return Err(ConfigError::Validation("auth.user must not be empty".into()));
        }
        if self.daemon.reconnect_secs == 0 {
            return Err(ConfigError::Validation(
                "daemon.reconnect_secs must be at least 1".into(),
            ));
        }
        if self.daemon.poll_ms == 0 {
            return Err(ConfigError::Validation(
                "daemon.poll_ms must be at least 1".into(),
            ));
        }
        if !self.daemon.hub_url.starts_with("ws://") && !self.daemon.hub_url.starts_with("wss://") {
            return Err(ConfigError::Validation(format!(
                "daemon.hub_url must be a ws:// or wss:// URL, got {}",
                self.daemon.hub_url
            )));
        }
        Ok(())
    }
}
