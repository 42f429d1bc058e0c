//! Shared telemetry types
//!
//! Raw samples, completed HVAC cycles, thermal rates and the error type used
//! across the analytics engine.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

// ─────────────────────────────────────────────────────────────────────────────
// HVAC State
// ─────────────────────────────────────────────────────────────────────────────

/// Run state reported by the thermostat at sample time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HvacState {
    #[serde(alias = "HEAT", alias = "heating", alias = "heat")]
    Heating,
    #[serde(alias = "COOL", alias = "cooling", alias = "cool")]
    Cooling,
    #[serde(alias = "idle")]
    Idle,
    #[serde(alias = "off")]
    Off,
}

impl HvacState {
    /// The cycle mode this state drives, if the equipment is running
    pub fn active_mode(&self) -> Option<CycleMode> {
        match self {
            HvacState::Heating => Some(CycleMode::Heating),
            HvacState::Cooling => Some(CycleMode::Cooling),
            HvacState::Idle | HvacState::Off => None,
        }
    }

    /// True for OFF and IDLE
    pub fn is_resting(&self) -> bool {
        self.active_mode().is_none()
    }
}

impl fmt::Display for HvacState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HvacState::Heating => write!(f, "HEATING"),
            HvacState::Cooling => write!(f, "COOLING"),
            HvacState::Idle => write!(f, "IDLE"),
            HvacState::Off => write!(f, "OFF"),
        }
    }
}

/// Mode of an active HVAC cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleMode {
    Heating,
    Cooling,
}

impl From<CycleMode> for ThermalMode {
    fn from(mode: CycleMode) -> Self {
        match mode {
            CycleMode::Heating => ThermalMode::Heating,
            CycleMode::Cooling => ThermalMode::Cooling,
        }
    }
}

impl fmt::Display for CycleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleMode::Heating => write!(f, "heating"),
            CycleMode::Cooling => write!(f, "cooling"),
        }
    }
}

/// Mode a thermal rate was learned for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalMode {
    Heating,
    Cooling,
    Natural,
}

impl ThermalMode {
    pub const ALL: [ThermalMode; 3] = [
        ThermalMode::Heating,
        ThermalMode::Cooling,
        ThermalMode::Natural,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThermalMode::Heating => "heating",
            ThermalMode::Cooling => "cooling",
            ThermalMode::Natural => "natural",
        }
    }
}

impl fmt::Display for ThermalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sample
// ─────────────────────────────────────────────────────────────────────────────

/// One raw thermostat reading
///
/// Timestamps are installation-local wall-clock time; the calendar date of the
/// timestamp decides which day a sample belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    pub indoor_temp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indoor_humidity: Option<f64>,
    pub hvac_state: HvacState,
    pub target_temp: f64,
}

impl Sample {
    pub fn new(
        timestamp: NaiveDateTime,
        indoor_temp: f64,
        hvac_state: HvacState,
        target_temp: f64,
    ) -> Self {
        Self {
            timestamp,
            indoor_temp,
            indoor_humidity: None,
            hvac_state,
            target_temp,
        }
    }

    pub fn with_humidity(mut self, humidity: f64) -> Self {
        self.indoor_humidity = Some(humidity);
        self
    }

    /// Calendar day this sample is aggregated into
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cycle
// ─────────────────────────────────────────────────────────────────────────────

/// A completed heating or cooling run
///
/// Only the boundary readings are stored; duration, temperature change and
/// efficiency are always derived from them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Cycle {
    pub mode: CycleMode,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub start_temp: f64,
    pub end_temp: f64,
}

impl Cycle {
    pub fn duration_minutes(&self) -> f64 {
        (self.end_time - self.start_time).num_milliseconds() as f64 / 60_000.0
    }

    pub fn temperature_change(&self) -> f64 {
        self.end_temp - self.start_temp
    }

    /// Degrees moved per minute of runtime (0 for a zero-length cycle)
    pub fn efficiency_rating(&self) -> f64 {
        let minutes = self.duration_minutes();
        if minutes <= 0.0 {
            return 0.0;
        }
        self.temperature_change().abs() / minutes
    }

    /// Temperature change normalised to a 30-minute run
    pub fn rate_per_30min(&self) -> Option<f64> {
        let minutes = self.duration_minutes();
        (minutes > 0.0).then(|| self.temperature_change() / (minutes / 30.0))
    }
}

impl Serialize for Cycle {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Cycle", 8)?;
        s.serialize_field("mode", &self.mode)?;
        s.serialize_field("start_time", &self.start_time)?;
        s.serialize_field("end_time", &self.end_time)?;
        s.serialize_field("start_temp", &self.start_temp)?;
        s.serialize_field("end_temp", &self.end_temp)?;
        s.serialize_field("duration_minutes", &self.duration_minutes())?;
        s.serialize_field("temperature_change", &self.temperature_change())?;
        s.serialize_field("efficiency_rating", &self.efficiency_rating())?;
        s.end()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Thermal Rates
// ─────────────────────────────────────────────────────────────────────────────

/// A day's learned rate of temperature change for one mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalRate {
    pub mode: ThermalMode,
    /// Degrees per 30 minutes
    pub rate_per_30min: f64,
    /// Contributing cycles (heating/cooling) or spans (natural)
    pub sample_count: usize,
    pub reliable: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Side Inputs
// ─────────────────────────────────────────────────────────────────────────────

/// An outdoor weather observation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    pub timestamp: Option<NaiveDateTime>,
    pub condition: Option<String>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
}

/// A user action against the thermostat (setpoint change, mode change, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInput {
    pub timestamp: NaiveDateTime,
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl UserInput {
    pub fn new(timestamp: NaiveDateTime, action: impl Into<String>) -> Self {
        Self {
            timestamp,
            action: action.into(),
            parameters: serde_json::Value::Null,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error
// ─────────────────────────────────────────────────────────────────────────────

/// Result type alias
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Errors raised by the analytics engine
///
/// None of these are fatal: callers log them and carry on collecting.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("Invalid sample at {timestamp}: {reason}")]
    InvalidSample {
        timestamp: NaiveDateTime,
        reason: String,
    },

    #[error("Event dated {got} does not belong to collection day {expected}")]
    OutOfWindow { got: NaiveDate, expected: NaiveDate },

    #[error("Day {0} is already sealed")]
    DaySealed(NaiveDate),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
