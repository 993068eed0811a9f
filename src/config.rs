//! Server Configuration
//!
//! Read from the TOML file named by `MISSION_SERVER_CONFIG`, falling back to
//! `mission-server.toml` in the working directory. Missing files and missing
//! keys fall back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "MISSION_SERVER_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "mission-server.toml";
/// Log filter used until the config is read, and when it sets none
pub const DEFAULT_LOG_FILTER: &str = "mission_server=info";

/// Gameplay rules the engine consults at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineRules {
    /// Zero every counter when a mission is abandoned
    pub reset_progress_on_abandon: bool,
}

impl Default for EngineRules {
    fn default() -> Self {
        Self {
            reset_progress_on_abandon: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_url: String,
    /// Root of the data tree; definitions live in `<data_dir>/missions`
    pub data_dir: PathBuf,
    pub tick_interval_ms: u64,
    pub autosave_interval_secs: u64,
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub log_filter: String,
    pub rules: EngineRules,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:2567".to_string(),
            database_url: "sqlite:missions.db?mode=rwc".to_string(),
            data_dir: PathBuf::from("data"),
            tick_interval_ms: 50,
            autosave_interval_secs: 60,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            rules: EngineRules::default(),
        }
    }
}

impl ServerConfig {
    /// Resolve the config path from the environment and load it
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: ServerConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs.max(1))
    }
}
