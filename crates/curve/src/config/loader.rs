//! Configuration Loader
//!
//! Reads `curve.toml` from disk and applies environment overrides.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use super::settings::CollectorConfig;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] hvac_analytics::AnalyticsError),
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from `path`, or defaults when no path is given
    ///
    /// Environment variables are applied on top of the file:
    /// - `CURVE_STATE_DIR`: identity directory
    /// - `CURVE_OUTBOX_DIR`: spool directory
    /// - `CURVE_ANONYMOUS_ID`: fixed anonymous id
    pub async fn load(path: Option<&Path>) -> Result<CollectorConfig, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_file(path).await?,
            None => {
                debug!("No config file given, using defaults");
                CollectorConfig::default()
            }
        };

        Self::apply_overrides(&mut config, |key| std::env::var(key).ok());
        config.analytics.validate()?;
        Ok(config)
    }

    async fn load_file(path: &Path) -> Result<CollectorConfig, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await?;
        let config: CollectorConfig = toml::from_str(&content)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Apply `CURVE_*` overrides using `lookup` to read variables
    pub fn apply_overrides(config: &mut CollectorConfig, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("CURVE_STATE_DIR") {
            config.collector.state_dir = dir.into();
        }
        if let Some(dir) = lookup("CURVE_OUTBOX_DIR") {
            config.collector.outbox_dir = dir.into();
        }
        if let Some(id) = lookup("CURVE_ANONYMOUS_ID").filter(|id| !id.trim().is_empty()) {
            config.collector.anonymous_id = Some(id);
        }
    }
}
