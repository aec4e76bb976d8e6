//! Player configuration.
//!
//! A small TOML file holds the device's stable identity and connection
//! settings. The device id is generated on first run and written back,
//! so the same physical display keeps its identity across restarts and
//! reconnects - the coordinator relies on that stability.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dfc_protocol::DEFAULT_DISCOVERY_PORT;

/// On-disk player configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Stable device identity. Generated on first run when absent.
    #[serde(default)]
    pub device_id: Option<String>,

    /// Human-readable name shown in the coordinator's fleet view.
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Registration credential, when the coordinator requires one.
    #[serde(default)]
    pub credential: Option<String>,

    /// Fallback endpoint (e.g. `ws://10.0.0.5:8460/ws`) used when
    /// discovery times out. Optional; without it the player keeps
    /// probing until a coordinator answers.
    #[serde(default)]
    pub static_endpoint: Option<String>,

    /// UDP port probed for coordinator discovery.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    /// How long to wait for a discovery answer per probe.
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,

    /// Heartbeat cadence used until the coordinator's REGISTER_ACK
    /// supplies its own.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_display_name() -> String {
    "display".to_string()
}

fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}

fn default_discovery_timeout_secs() -> u64 {
    3
}

fn default_heartbeat_interval_secs() -> u64 {
    5
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            display_name: default_display_name(),
            credential: None,
            static_endpoint: None,
            discovery_port: default_discovery_port(),
            discovery_timeout_secs: default_discovery_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl PlayerConfig {
    /// Default config file location: `<config dir>/dfc/player.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("dfc")
            .join("player.toml")
    }

    /// Loads the config, creating defaults when the file is missing, and
    /// ensures a device id exists - generating and persisting one on
    /// first run.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;
            toml::from_str(&raw).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?
        } else {
            Self::default()
        };

        if config.device_id.is_none() {
            config.device_id = Some(format!("display-{}", uuid::Uuid::new_v4()));
            config.save(path)?;
            tracing::info!(
                device_id = ?config.device_id,
                path = %path.display(),
                "generated device identity"
            );
        }

        Ok(config)
    }

    /// Writes the config to disk, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;
        }

        let raw = toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize {
            error: e.to_string(),
        })?;

        std::fs::write(path, raw).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }
}

/// Errors around the player config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("failed to parse config {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("failed to write config {path}: {error}")]
    Write { path: PathBuf, error: String },

    #[error("failed to serialize config: {error}")]
    Serialize { error: String },
}
