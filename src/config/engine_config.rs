//! Engine configuration loaded from TOML.

use super::defaults;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Process-level engine configuration.
///
/// Loaded once at startup, then frozen behind `config::get()`. CLI flags
/// override file values; file values override built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the sled stores and bootstrap JSON files.
    pub data_dir: PathBuf,
    /// Store namespace within the data directory.
    pub keyspace: String,
    /// Suppress JSON bootstrap (nodes joining a populated deployment).
    pub skip_init_data: bool,
    /// Ingest channel bound.
    pub ingest_buffer_size: usize,
    /// Max data items per engine tick.
    pub tick_batch_size: usize,
    /// Action dispatch queue bound.
    pub action_queue_capacity: usize,
    /// Hard timeout for the startup definitions scan, seconds.
    pub admin_fetch_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(defaults::DATA_DIR),
            keyspace: defaults::KEYSPACE.to_string(),
            skip_init_data: false,
            ingest_buffer_size: defaults::INGEST_BUFFER_SIZE,
            tick_batch_size: defaults::TICK_BATCH_SIZE,
            action_queue_capacity: defaults::ACTION_QUEUE_CAPACITY,
            admin_fetch_timeout_secs: defaults::ADMIN_FETCH_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    /// Load configuration using the standard resolution order:
    ///
    /// 1. `KLAXON_CONFIG` environment variable (path to a TOML file)
    /// 2. `klaxon.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("KLAXON_CONFIG") {
            match Self::from_file(Path::new(&path)) {
                Ok(config) => {
                    info!("Loaded engine config from KLAXON_CONFIG={}", path);
                    return config;
                }
                Err(e) => {
                    warn!("Failed to load {}: {} — falling back", path, e);
                }
            }
        }

        let local = Path::new("klaxon.toml");
        if local.exists() {
            match Self::from_file(local) {
                Ok(config) => {
                    info!("Loaded engine config from ./klaxon.toml");
                    return config;
                }
                Err(e) => {
                    warn!("Failed to load ./klaxon.toml: {} — using defaults", e);
                }
            }
        }

        Self::default()
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.keyspace.is_empty() {
            return Err("keyspace must be non-empty".into());
        }
        if self.ingest_buffer_size == 0 {
            return Err("ingest_buffer_size must be >= 1".into());
        }
        if self.tick_batch_size == 0 {
            return Err("tick_batch_size must be >= 1".into());
        }
        if self.action_queue_capacity == 0 {
            return Err("action_queue_capacity must be >= 1".into());
        }
        Ok(())
    }

    /// Root path of the store namespace.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.keyspace)
    }
}
