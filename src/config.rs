use std::path::PathBuf;

use anyhow::Context;
use tracing::trace;

use crate::types::{Asset, CheckConfig, HookConfig};

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory store (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./watchpost.db")
}

/// Event ingestion settings
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct EventdConfig {
    /// Number of concurrent event handlers
    #[serde(default = "crate::util::get_default_handler_count")]
    pub handler_count: usize,

    /// Capacity of the inbound and per-handler queues
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for EventdConfig {
    fn default() -> Self {
        Self {
            handler_count: crate::util::get_default_handler_count(),
            queue_size: default_queue_size(),
        }
    }
}

fn default_queue_size() -> usize {
    100
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct SchedulerdConfig {
    /// Seconds between state refreshes from the store
    #[serde(default = "default_state_refresh_secs")]
    pub state_refresh_secs: u64,
}

impl Default for SchedulerdConfig {
    fn default() -> Self {
        Self {
            state_refresh_secs: default_state_refresh_secs(),
        }
    }
}

fn default_state_refresh_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub eventd: EventdConfig,

    #[serde(default)]
    pub schedulerd: SchedulerdConfig,

    /// Checks written to the store on startup
    #[serde(default)]
    pub checks: Vec<CheckConfig>,

    #[serde(default)]
    pub assets: Vec<Asset>,

    #[serde(default)]
    pub hooks: Vec<HookConfig>,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("could not read config {path}"))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {path}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
