//! Daily Report
//!
//! The sealed result of one day's aggregation and its backend wire envelope.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};

use crate::moving_average::MovingAverages;
use crate::thermal::ThermalRates;
use crate::types::Cycle;

fn round2<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((value * 100.0).round() / 100.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Min/max/mean of a series of readings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeStats {
    pub min: f64,
    pub max: f64,
    #[serde(serialize_with = "round2")]
    pub avg: f64,
    pub readings_count: usize,
}

/// Indoor temperature over the day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureStats {
    pub min: f64,
    pub max: f64,
    #[serde(serialize_with = "round2")]
    pub avg: f64,
    pub readings_count: usize,
    /// Mean squared deviation of actual from target
    #[serde(serialize_with = "round2")]
    pub target_variance: f64,
}

/// Setpoints over the day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetStats {
    pub min: f64,
    pub max: f64,
    #[serde(serialize_with = "round2")]
    pub avg: f64,
    /// Distinct setpoints seen
    pub changes_count: usize,
}

/// Outdoor conditions over the day
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherSummary {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outdoor_temperature: Option<RangeStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outdoor_humidity: Option<RangeStats>,
}

/// Cycle counts and runtimes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    pub total_cycles: usize,
    pub heating_cycles: usize,
    pub cooling_cycles: usize,
    #[serde(serialize_with = "round2")]
    pub total_runtime_minutes: f64,
    #[serde(serialize_with = "round2")]
    pub heating_runtime_minutes: f64,
    #[serde(serialize_with = "round2")]
    pub cooling_runtime_minutes: f64,
    #[serde(serialize_with = "round2")]
    pub average_cycle_length_minutes: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Daily Report
// ─────────────────────────────────────────────────────────────────────────────

/// One installation's aggregated day, immutable once sealed
#[derive(Debug, Clone, PartialEq)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub anonymous_id: String,
    pub cycles: Vec<Cycle>,
    pub cycle_summary: CycleSummary,
    pub temperature_stats: Option<TemperatureStats>,
    pub target_stats: Option<TargetStats>,
    pub humidity_stats: Option<RangeStats>,
    pub user_inputs: BTreeMap<String, usize>,
    pub weather_summary: WeatherSummary,
    pub thermal_rates: ThermalRates,
    pub sealed_at: DateTime<Utc>,
}

impl DailyReport {
    pub fn total_user_inputs(&self) -> usize {
        self.user_inputs.values().sum()
    }
}

/// A sealed report with the moving averages current at sealing time
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEnvelope {
    pub report: DailyReport,
    pub moving_averages: MovingAverages,
}

impl ReportEnvelope {
    pub fn new(report: DailyReport, moving_averages: MovingAverages) -> Self {
        Self {
            report,
            moving_averages,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Shape
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireEnvelope<'a> {
    date: NaiveDate,
    anonymous_id: &'a str,
    daily_summary: WireSummary<'a>,
    moving_averages: &'a MovingAverages,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct WireSummary<'a> {
    date: NaiveDate,
    hvac_cycles: WireCycles<'a>,
    temperature_data: WireTemperature<'a>,
    user_inputs: WireUserInputs<'a>,
    weather_data: &'a WeatherSummary,
    thermal_rates: &'a ThermalRates,
}

#[derive(Serialize)]
struct WireCycles<'a> {
    #[serde(flatten)]
    summary: &'a CycleSummary,
    cycles: &'a [Cycle],
}

#[derive(Serialize)]
struct WireTemperature<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    actual_temperature: Option<&'a TemperatureStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_temperature: Option<&'a TargetStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    humidity: Option<&'a RangeStats>,
}

#[derive(Serialize)]
struct WireUserInputs<'a> {
    total_inputs: usize,
    services_used: &'a BTreeMap<String, usize>,
    unique_services: usize,
}

impl Serialize for ReportEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let report = &self.report;
        WireEnvelope {
            date: report.date,
            anonymous_id: &report.anonymous_id,
            daily_summary: WireSummary {
                date: report.date,
                hvac_cycles: WireCycles {
                    summary: &report.cycle_summary,
                    cycles: &report.cycles,
                },
                temperature_data: WireTemperature {
                    actual_temperature: report.temperature_stats.as_ref(),
                    target_temperature: report.target_stats.as_ref(),
                    humidity: report.humidity_stats.as_ref(),
                },
                user_inputs: WireUserInputs {
                    total_inputs: report.total_user_inputs(),
                    services_used: &report.user_inputs,
                    unique_services: report.user_inputs.len(),
                },
                weather_data: &report.weather_summary,
                thermal_rates: &report.thermal_rates,
            },
            moving_averages: &self.moving_averages,
            timestamp: report.sealed_at,
        }
        .serialize(serializer)
    }
}
