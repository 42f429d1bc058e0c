//! Daily Aggregation
//!
//! Accumulates one installation's samples, user inputs and weather for a
//! single calendar day and seals them into an immutable [`DailyReport`].
//!
//! ```text
//! COLLECTING ──seal()──▶ SEALING ──▶ SEALED
//! ```
//!
//! Sealing flushes the open cycle, runs the thermal estimator and computes
//! the day's statistics. A sealed day accepts no further input.

mod report;
mod stats;

pub use report::{
    CycleSummary, DailyReport, RangeStats, ReportEnvelope, TargetStats, TemperatureStats,
    WeatherSummary,
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::buffer::SampleBuffer;
use crate::config::AnalyticsConfig;
use crate::cycle::CycleDetector;
use crate::thermal::{ThermalRateEstimator, ThermalRates};
use crate::types::{AnalyticsError, Cycle, Result, Sample, UserInput, WeatherReading};

/// Lifecycle of a collection day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayPhase {
    Collecting,
    Sealing,
    Sealed,
}

/// Accumulator for one installation-day
#[derive(Debug)]
pub struct DailyAggregator {
    date: NaiveDate,
    anonymous_id: String,
    min_plausible_temp: f64,
    max_plausible_temp: f64,
    phase: DayPhase,
    buffer: SampleBuffer,
    detector: CycleDetector,
    estimator: ThermalRateEstimator,
    cycles: Vec<Cycle>,
    user_inputs: Vec<UserInput>,
    weather: Vec<WeatherReading>,
    rejected: usize,
    sealed: Option<DailyReport>,
}

impl DailyAggregator {
    pub fn new(date: NaiveDate, anonymous_id: impl Into<String>, config: &AnalyticsConfig) -> Self {
        Self {
            date,
            anonymous_id: anonymous_id.into(),
            min_plausible_temp: config.min_plausible_temp,
            max_plausible_temp: config.max_plausible_temp,
            phase: DayPhase::Collecting,
            buffer: SampleBuffer::new(),
            detector: CycleDetector::new(config.min_cycle_minutes),
            estimator: ThermalRateEstimator::new(config),
            cycles: Vec::new(),
            user_inputs: Vec::new(),
            weather: Vec::new(),
            rejected: 0,
            sealed: None,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn anonymous_id(&self) -> &str {
        &self.anonymous_id
    }

    pub fn phase(&self) -> DayPhase {
        self.phase
    }

    pub fn samples(&self) -> &[Sample] {
        self.buffer.samples()
    }

    /// Cycles completed so far today
    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    /// Samples refused by validation
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn sealed_report(&self) -> Option<&DailyReport> {
        self.sealed.as_ref()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recording
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a reading; returns the cycle it completed, if any
    pub fn record_sample(&mut self, sample: Sample) -> Result<Option<Cycle>> {
        self.ensure_collecting()?;

        if let Err(e) = self.check_values(&sample).and_then(|()| self.check_date(&sample)) {
            return Err(self.reject(e));
        }

        let placement = self.buffer.push(sample.clone());
        if !placement.is_live() {
            tracing::debug!(
                anonymous_id = %self.anonymous_id,
                timestamp = %sample.timestamp,
                "Backfilled late sample"
            );
            return Ok(None);
        }

        let completed = self.detector.observe(&sample);
        if let Some(cycle) = &completed {
            self.cycles.push(cycle.clone());
        }
        Ok(completed)
    }

    pub fn record_user_input(&mut self, input: UserInput) -> Result<()> {
        self.ensure_collecting()?;
        tracing::debug!(anonymous_id = %self.anonymous_id, action = %input.action, "User input");
        self.user_inputs.push(input);
        Ok(())
    }

    pub fn record_weather(&mut self, reading: WeatherReading) -> Result<()> {
        self.ensure_collecting()?;
        self.weather.push(reading);
        Ok(())
    }

    fn ensure_collecting(&self) -> Result<()> {
        match self.phase {
            DayPhase::Collecting => Ok(()),
            DayPhase::Sealing | DayPhase::Sealed => Err(AnalyticsError::DaySealed(self.date)),
        }
    }

    /// Run the value checks alone, without recording anything
    ///
    /// A failure counts as a rejection for this day.
    pub fn screen(&mut self, sample: &Sample) -> Result<()> {
        self.check_values(sample).map_err(|e| self.reject(e))
    }

    /// Count and log a refused sample
    pub(crate) fn reject(&mut self, error: AnalyticsError) -> AnalyticsError {
        self.rejected += 1;
        tracing::warn!(anonymous_id = %self.anonymous_id, error = %error, "Rejected sample");
        error
    }

    fn check_values(&self, sample: &Sample) -> Result<()> {
        let invalid = |reason: String| AnalyticsError::InvalidSample {
            timestamp: sample.timestamp,
            reason,
        };

        if !sample.indoor_temp.is_finite() || !sample.target_temp.is_finite() {
            return Err(invalid("temperature is not a finite number".to_string()));
        }
        for (name, value) in [("indoor", sample.indoor_temp), ("target", sample.target_temp)] {
            if value < self.min_plausible_temp || value > self.max_plausible_temp {
                return Err(invalid(format!(
                    "{name} temperature {value} outside {} .. {}",
                    self.min_plausible_temp, self.max_plausible_temp
                )));
            }
        }
        if let Some(humidity) = sample.indoor_humidity {
            if !(0.0..=100.0).contains(&humidity) {
                return Err(invalid(format!("humidity {humidity} outside 0 .. 100")));
            }
        }
        Ok(())
    }

    fn check_date(&self, sample: &Sample) -> Result<()> {
        if sample.date() != self.date {
            return Err(AnalyticsError::OutOfWindow {
                got: sample.date(),
                expected: self.date,
            });
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sealing
    // ─────────────────────────────────────────────────────────────────────────

    /// Thermal rates for the day so far, without sealing it
    ///
    /// A cycle still running is counted up to its latest sample.
    pub fn estimate_now(&self) -> ThermalRates {
        let mut cycles = self.cycles.clone();
        cycles.extend(self.detector.clone().flush());
        self.estimator.estimate(self.buffer.samples(), &cycles)
    }

    /// Close the day and produce its report
    pub fn seal(&mut self) -> DailyReport {
        self.seal_at(Utc::now())
    }

    /// Close the day with an explicit sealing timestamp
    ///
    /// Sealing an already sealed day returns the stored report unchanged.
    pub fn seal_at(&mut self, sealed_at: DateTime<Utc>) -> DailyReport {
        if let Some(report) = &self.sealed {
            return report.clone();
        }

        self.phase = DayPhase::Sealing;
        if let Some(cycle) = self.detector.flush() {
            self.cycles.push(cycle);
        }

        let samples = self.buffer.samples();
        let report = DailyReport {
            date: self.date,
            anonymous_id: self.anonymous_id.clone(),
            cycles: self.cycles.clone(),
            cycle_summary: stats::cycle_summary(&self.cycles),
            temperature_stats: stats::temperature_stats(samples),
            target_stats: stats::target_stats(samples),
            humidity_stats: stats::humidity_stats(samples),
            user_inputs: stats::count_user_inputs(&self.user_inputs),
            weather_summary: stats::weather_summary(&self.weather),
            thermal_rates: self.estimator.estimate(samples, &self.cycles),
            sealed_at,
        };

        tracing::info!(
            anonymous_id = %self.anonymous_id,
            date = %self.date,
            samples = samples.len(),
            cycles = report.cycles.len(),
            rates = report.thermal_rates.len(),
            rejected = self.rejected,
            "Sealed daily report"
        );

        self.sealed = Some(report.clone());
        self.phase = DayPhase::Sealed;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moving_average::MovingAverages;
    use crate::types::{CycleMode, HvacState, ThermalMode};
    use chrono::{NaiveDateTime, TimeZone};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    fn sample(h: u32, m: u32, state: HvacState, temp: f64) -> Sample {
        Sample::new(at(h, m), temp, state, 72.0)
    }

    fn aggregator() -> DailyAggregator {
        DailyAggregator::new(day(), "install-1", &AnalyticsConfig::default())
    }

    fn sealed_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 5).unwrap()
    }

    fn record_heating_example(agg: &mut DailyAggregator) -> Vec<Cycle> {
        [
            sample(10, 0, HvacState::Off, 70.0),
            sample(10, 5, HvacState::Heating, 70.0),
            sample(10, 20, HvacState::Heating, 73.0),
            sample(10, 25, HvacState::Off, 73.0),
        ]
        .into_iter()
        .filter_map(|s| agg.record_sample(s).unwrap())
        .collect()
    }

    #[test]
    fn test_heating_example_end_to_end() {
        let mut agg = aggregator();
        let emitted = record_heating_example(&mut agg);
        assert_eq!(emitted.len(), 1);

        let report = agg.seal_at(sealed_at());
        assert_eq!(report.cycles.len(), 1);
        let cycle = &report.cycles[0];
        assert_eq!(cycle.mode, CycleMode::Heating);
        assert_eq!(cycle.start_time, at(10, 5));
        assert_eq!(cycle.end_time, at(10, 25));
        assert_eq!(cycle.duration_minutes(), 20.0);
        assert_eq!(cycle.temperature_change(), 3.0);

        let heating = &report.thermal_rates[&ThermalMode::Heating];
        assert!((heating.rate_per_30min - 4.5).abs() < 1e-9);
        assert_eq!(report.cycle_summary.heating_cycles, 1);
        assert_eq!(report.temperature_stats.as_ref().unwrap().readings_count, 4);
    }

    #[test]
    fn test_seal_twice_returns_identical_report() {
        let mut agg = aggregator();
        record_heating_example(&mut agg);
        agg.record_user_input(UserInput::new(at(11, 0), "set_temperature"))
            .unwrap();

        let first = agg.seal_at(sealed_at());
        let second = agg.seal_at(sealed_at() + chrono::Duration::hours(1));
        assert_eq!(first, second);
        assert_eq!(agg.phase(), DayPhase::Sealed);
    }

    #[test]
    fn test_no_cooling_cycles_means_no_cooling_rate() {
        let mut agg = aggregator();
        record_heating_example(&mut agg);
        let report = agg.seal_at(sealed_at());

        assert!(report.thermal_rates.contains_key(&ThermalMode::Heating));
        assert!(!report.thermal_rates.contains_key(&ThermalMode::Cooling));
    }

    #[test]
    fn test_open_cycle_is_flushed_into_the_day() {
        let mut agg = aggregator();
        agg.record_sample(sample(23, 30, HvacState::Cooling, 78.0))
            .unwrap();
        agg.record_sample(sample(23, 55, HvacState::Cooling, 76.5))
            .unwrap();

        let report = agg.seal_at(sealed_at());
        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.cycles[0].end_time, at(23, 55));
        assert_eq!(report.cycle_summary.cooling_cycles, 1);
    }

    #[test]
    fn test_invalid_samples_leave_buffer_unaffected() {
        let mut agg = aggregator();
        agg.record_sample(sample(9, 0, HvacState::Off, 70.0)).unwrap();

        let not_finite = sample(9, 5, HvacState::Off, f64::NAN);
        assert!(matches!(
            agg.record_sample(not_finite),
            Err(AnalyticsError::InvalidSample { .. })
        ));

        let too_hot = sample(9, 10, HvacState::Off, 400.0);
        assert!(agg.record_sample(too_hot).is_err());

        let soaked = sample(9, 15, HvacState::Off, 70.0).with_humidity(140.0);
        assert!(agg.record_sample(soaked).is_err());

        let tomorrow = Sample::new(
            day().succ_opt().unwrap().and_hms_opt(0, 5, 0).unwrap(),
            70.0,
            HvacState::Off,
            72.0,
        );
        assert!(matches!(
            agg.record_sample(tomorrow),
            Err(AnalyticsError::OutOfWindow { .. })
        ));

        assert_eq!(agg.samples().len(), 1);
        assert_eq!(agg.rejected(), 4);
    }

    #[test]
    fn test_recording_into_sealed_day_is_rejected() {
        let mut agg = aggregator();
        agg.seal_at(sealed_at());

        assert!(matches!(
            agg.record_sample(sample(12, 0, HvacState::Off, 70.0)),
            Err(AnalyticsError::DaySealed(_))
        ));
        assert!(agg.record_weather(WeatherReading::default()).is_err());
        assert!(agg
            .record_user_input(UserInput::new(at(12, 0), "set_mode"))
            .is_err());
    }

    #[test]
    fn test_backfilled_sample_counts_in_stats_only() {
        let mut agg = aggregator();
        record_heating_example(&mut agg);
        let late = agg
            .record_sample(sample(10, 10, HvacState::Cooling, 71.0))
            .unwrap();
        assert!(late.is_none());

        let report = agg.seal_at(sealed_at());
        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.temperature_stats.unwrap().readings_count, 5);
    }

    #[test]
    fn test_estimate_now_leaves_day_open() {
        let mut agg = aggregator();
        record_heating_example(&mut agg);
        agg.record_sample(sample(11, 0, HvacState::Heating, 72.0))
            .unwrap();
        agg.record_sample(sample(11, 10, HvacState::Heating, 73.0))
            .unwrap();

        // Running cycle counts up to 11:10: (3.0 + 1.0) / (20 + 10) min
        let preview = agg.estimate_now();
        let heating = &preview[&ThermalMode::Heating];
        assert!((heating.rate_per_30min - 4.0).abs() < 1e-9);
        assert_eq!(heating.sample_count, 2);

        assert_eq!(agg.phase(), DayPhase::Collecting);
        assert_eq!(agg.cycles().len(), 1);
        agg.record_sample(sample(11, 20, HvacState::Off, 74.0))
            .unwrap();
        assert_eq!(agg.cycles().len(), 2);
    }

    #[test]
    fn test_screen_checks_values_only() {
        let mut agg = aggregator();
        let tomorrow = Sample::new(
            day().succ_opt().unwrap().and_hms_opt(0, 5, 0).unwrap(),
            70.0,
            HvacState::Off,
            72.0,
        );
        assert!(agg.screen(&tomorrow).is_ok());
        assert!(agg.screen(&sample(9, 0, HvacState::Off, f64::NAN)).is_err());
        assert_eq!(agg.rejected(), 1);
        assert!(agg.samples().is_empty());
    }

    #[test]
    fn test_envelope_wire_shape() {
        let mut agg = aggregator();
        record_heating_example(&mut agg);
        agg.record_user_input(UserInput::new(at(11, 0), "set_temperature"))
            .unwrap();
        agg.record_user_input(UserInput::new(at(12, 0), "set_temperature"))
            .unwrap();
        agg.record_weather(WeatherReading {
            condition: Some("sunny".to_string()),
            temperature: Some(41.333),
            ..Default::default()
        })
        .unwrap();

        let envelope = ReportEnvelope::new(agg.seal_at(sealed_at()), MovingAverages::default());
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["date"], "2024-03-01");
        assert_eq!(json["anonymous_id"], "install-1");
        let summary = &json["daily_summary"];
        assert_eq!(summary["hvac_cycles"]["total_cycles"], 1);
        assert_eq!(summary["hvac_cycles"]["heating_runtime_minutes"], 20.0);
        assert_eq!(summary["hvac_cycles"]["cycles"][0]["mode"], "HEATING");
        assert_eq!(summary["temperature_data"]["actual_temperature"]["avg"], 71.5);
        assert_eq!(summary["temperature_data"]["target_temperature"]["changes_count"], 1);
        assert!(summary["temperature_data"].get("humidity").is_none());
        assert_eq!(summary["user_inputs"]["total_inputs"], 2);
        assert_eq!(summary["user_inputs"]["services_used"]["set_temperature"], 2);
        assert_eq!(summary["user_inputs"]["unique_services"], 1);
        assert_eq!(summary["weather_data"]["primary_condition"], "sunny");
        assert_eq!(summary["weather_data"]["outdoor_temperature"]["avg"], 41.33);
        assert_eq!(summary["thermal_rates"]["heating"]["rate_per_30min"], 4.5);
        assert!(summary["thermal_rates"].get("cooling").is_none());
        assert!(json["moving_averages"].as_object().unwrap().is_empty());
        assert!(json["timestamp"].as_str().unwrap().starts_with("2024-03-02T00:00:05"));
    }
}
