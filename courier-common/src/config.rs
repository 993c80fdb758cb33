//! Process-start configuration for the courier services.
//!
//! Configuration is loaded once at startup from `config.json` in the
//! courier config directory (or an explicit path) and is read-only
//! afterwards. The allow-list in particular is never mutated at
//! runtime; changing it requires a restart.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "COURIER_CONFIG";

/// Get the courier configuration directory (`~/.courier`).
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".courier"))
        .unwrap_or_else(|| PathBuf::from(".courier"))
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Caller authentication settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Session correlation settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Outbound delivery settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the gateway
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Caller authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Application ids permitted to make skill-to-skill calls.
    /// A single `*` entry admits any caller.
    #[serde(default)]
    pub allowed_callers: Vec<String>,

    /// Shared secret used to verify inbound bearer tokens
    #[serde(default)]
    pub token_secret: String,
}

/// Session correlation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds to wait for a host acknowledgment of an end-of-conversation
    /// signal before forcing the session closed
    #[serde(default = "default_edge_timeout_seconds")]
    pub edge_timeout_seconds: u64,

    /// Per-channel overrides of the edit-capability table
    /// (channel id -> supports edit)
    #[serde(default)]
    pub channel_capability_overrides: HashMap<String, bool>,

    /// Path to the sqlite reference store. When absent, references are
    /// held in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

/// Outbound delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum retries after a failed channel send
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff between retries, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8740".to_string()
}

fn default_edge_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allowed_callers: Vec::new(),
            token_secret: String::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            edge_timeout_seconds: default_edge_timeout_seconds(),
            channel_capability_overrides: HashMap::new(),
            store_path: None,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Resolution order: `COURIER_CONFIG` env var, then
    /// `~/.courier/config.json`. A missing file yields defaults;
    /// a malformed file is a startup error.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::load_from(Path::new(&path));
        }
        let path = config_dir().join("config.json");
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    ///
    /// Only programmer-error conditions are rejected here; an empty
    /// allow-list is legal (it rejects every skill caller).
    pub fn validate(&self) -> Result<()> {
        if self.session.edge_timeout_seconds == 0 {
            return Err(Error::Config(
                "session.edge_timeout_seconds must be greater than zero".into(),
            ));
        }
        match self.observability.log_format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(Error::Config(format!(
                    "observability.log_format must be 'json' or 'pretty', got '{other}'"
                )));
            }
        }
        Ok(())
    }
}
