use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::errors::ConfigError;

/// Contents of `~/.config/phonebt/config.toml` — the CLI shell's persisted
/// settings. The engine itself never touches the filesystem; these fields
/// just seed an [`EngineConfig`].
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// How long `connect()` waits for the SLC before giving up.
    pub connect_timeout_secs: u64,

    /// Bounded per-subscriber event queue depth.
    pub event_queue_capacity: usize,

    /// Remembered phone to auto-connect to, if any.
    pub default_device_mac: Option<String>,

    /// `tracing_subscriber` env-filter directive, e.g. "info" or "debug".
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            event_queue_capacity: 32,
            default_device_mac: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Returns the path to the config file.
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("phonebt")
            .join("config.toml")
    }

    /// Load and parse the config file. Returns [`ConfigError::NotFound`] with
    /// the expected path if missing.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path();
        if !path.exists() {
            return Err(ConfigError::NotFound { path: path.display().to_string() });
        }
        let raw = fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Write the default config file to the standard path, creating parent
    /// directories if needed.
    pub fn write_default() -> Result<PathBuf, ConfigError> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(&Config::default())?;
        fs::write(&path, toml_str)?;
        Ok(path)
    }

    /// Persist the current state back to the config file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        fs::write(&path, toml_str)?;
        Ok(())
    }

    /// Translate the persisted CLI settings into the library-facing engine
    /// config.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            event_queue_capacity: self.event_queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_maps_to_expected_engine_config() {
        let cfg = Config::default();
        let engine_cfg = cfg.to_engine_config();
        assert_eq!(engine_cfg.connect_timeout, Duration::from_secs(15));
        assert_eq!(engine_cfg.event_queue_capacity, 32);
    }
}
