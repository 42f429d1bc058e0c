//! Analytics Configuration
//!
//! Tunable thresholds for cycle detection, rate estimation and delivery.

use serde::{Deserialize, Serialize};

use crate::types::{AnalyticsError, Result};

/// How much an installation shares beyond its daily report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionLevel {
    /// Daily report only: cycles, rates and user inputs; weather is ignored
    Minimal,
    /// Daily report plus raw sample batches
    #[default]
    Standard,
    /// Everything, with weather readings carried in the raw batches
    Detailed,
}

impl CollectionLevel {
    pub fn sends_samples(self) -> bool {
        !matches!(self, CollectionLevel::Minimal)
    }

    pub fn records_weather(self) -> bool {
        !matches!(self, CollectionLevel::Minimal)
    }

    pub fn sends_weather(self) -> bool {
        matches!(self, CollectionLevel::Detailed)
    }
}

/// Thresholds and limits used by the analytics engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Cycles shorter than this are treated as relay bounce and discarded
    pub min_cycle_minutes: f64,

    /// Shortest OFF/IDLE span that contributes to the natural drift rate
    pub min_natural_span_minutes: f64,

    /// Contributing cycles/spans needed before a rate is marked reliable
    pub min_reliable_samples: usize,

    /// Days kept in each moving-average window
    pub moving_average_window: usize,

    /// Half-window mean difference below which a trend is STABLE
    pub trend_epsilon: f64,

    /// Plausible indoor temperature range; readings outside it are rejected
    pub min_plausible_temp: f64,
    pub max_plausible_temp: f64,

    /// Raw samples per transmitted batch
    pub sample_batch_size: usize,

    /// Maximum transmissions held locally
    pub queue_capacity: usize,

    /// Transmissions attempted per drain
    pub max_per_drain: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            min_cycle_minutes: 1.0,
            min_natural_span_minutes: 30.0,
            min_reliable_samples: 2,
            moving_average_window: 7,
            trend_epsilon: 0.05,
            min_plausible_temp: -40.0,
            max_plausible_temp: 140.0,
            sample_batch_size: 12,
            queue_capacity: 1000,
            max_per_drain: 10,
        }
    }
}

impl AnalyticsConfig {
    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(self.min_cycle_minutes > 0.0) {
            return Err(AnalyticsError::Config(
                "min_cycle_minutes must be positive".to_string(),
            ));
        }
        if !(self.min_natural_span_minutes > 0.0) {
            return Err(AnalyticsError::Config(
                "min_natural_span_minutes must be positive".to_string(),
            ));
        }
        if self.moving_average_window == 0 {
            return Err(AnalyticsError::Config(
                "moving_average_window must be at least 1".to_string(),
            ));
        }
        if self.trend_epsilon < 0.0 {
            return Err(AnalyticsError::Config(
                "trend_epsilon must not be negative".to_string(),
            ));
        }
        if self.min_plausible_temp >= self.max_plausible_temp {
            return Err(AnalyticsError::Config(format!(
                "plausible temperature range is empty ({} .. {})",
                self.min_plausible_temp, self.max_plausible_temp
            )));
        }
        if self.sample_batch_size == 0 || self.queue_capacity == 0 || self.max_per_drain == 0 {
            return Err(AnalyticsError::Config(
                "batch size, queue capacity and drain size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
