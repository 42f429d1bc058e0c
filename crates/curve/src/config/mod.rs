//! Collector Configuration
//!
//! `curve.toml` plus `CURVE_*` environment overrides.

mod loader;
mod settings;

pub use loader::{ConfigError, ConfigLoader};
pub use settings::*;
