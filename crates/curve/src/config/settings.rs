//! Configuration Types
//!
//! Defines the structure of `curve.toml`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hvac_analytics::{AnalyticsConfig, CollectionLevel};

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

/// Host runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// Directory holding the identity file
    pub state_dir: PathBuf,

    /// Directory transmissions are spooled into
    pub outbox_dir: PathBuf,

    /// Fixed anonymous id; generated and persisted when unset
    pub anonymous_id: Option<String>,

    /// What is shared besides the daily report: minimal, standard or detailed
    pub collection_level: CollectionLevel,

    /// Seconds between clock checks and queue drains
    pub tick_interval_secs: u64,

    /// Buffered commands per installation task
    pub command_buffer: usize,

    /// Seconds to wait for installation tasks on shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./state"),
            outbox_dir: PathBuf::from("./outbox"),
            anonymous_id: None,
            collection_level: CollectionLevel::Standard,
            tick_interval_secs: 60,
            command_buffer: 256,
            shutdown_timeout_secs: 10,
        }
    }
}

impl CollectorSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
