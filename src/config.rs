//! Configuration for roster-sync

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default storage directory
pub fn default_store_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("roster-sync")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the persistent resource graph
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Well-known resource anchoring the local owner identity
    #[serde(default = "default_owner_uri")]
    pub owner_uri: String,

    /// Write-back quiescence window in milliseconds
    #[serde(default = "default_quiescence_ms")]
    pub quiescence_ms: u64,

    /// Capacity of the inbound event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_owner_uri() -> String {
    "urn:roster:me".to_string()
}

fn default_quiescence_ms() -> u64 {
    500
}

fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            owner_uri: default_owner_uri(),
            quiescence_ms: default_quiescence_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get resource graph database path
    pub fn graph_db_path(&self) -> PathBuf {
        self.store_dir.join("graph.sled")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.store_dir.join("config.toml")
    }

    /// Write-back quiescence window
    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }
}
