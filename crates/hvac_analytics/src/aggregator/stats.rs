//! Daily statistics over samples, cycles, weather and user inputs

use std::collections::BTreeMap;

use crate::types::{Cycle, CycleMode, Sample, UserInput, WeatherReading};

use super::report::{CycleSummary, RangeStats, TargetStats, TemperatureStats, WeatherSummary};

pub fn range_stats(values: impl IntoIterator<Item = f64>) -> Option<RangeStats> {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;

    for value in values.into_iter().filter(|v| v.is_finite()) {
        count += 1;
        sum += value;
        min = min.min(value);
        max = max.max(value);
    }

    (count > 0).then(|| RangeStats {
        min,
        max,
        avg: sum / count as f64,
        readings_count: count,
    })
}

pub fn temperature_stats(samples: &[Sample]) -> Option<TemperatureStats> {
    let range = range_stats(samples.iter().map(|s| s.indoor_temp))?;
    let target_variance = samples
        .iter()
        .map(|s| (s.indoor_temp - s.target_temp).powi(2))
        .sum::<f64>()
        / samples.len() as f64;

    Some(TemperatureStats {
        min: range.min,
        max: range.max,
        avg: range.avg,
        readings_count: range.readings_count,
        target_variance,
    })
}

pub fn target_stats(samples: &[Sample]) -> Option<TargetStats> {
    let range = range_stats(samples.iter().map(|s| s.target_temp))?;

    let mut setpoints: Vec<f64> = samples.iter().map(|s| s.target_temp).collect();
    setpoints.sort_by(f64::total_cmp);
    setpoints.dedup();

    Some(TargetStats {
        min: range.min,
        max: range.max,
        avg: range.avg,
        changes_count: setpoints.len(),
    })
}

pub fn humidity_stats(samples: &[Sample]) -> Option<RangeStats> {
    range_stats(samples.iter().filter_map(|s| s.indoor_humidity))
}

pub fn weather_summary(readings: &[WeatherReading]) -> WeatherSummary {
    let mut conditions: BTreeMap<String, usize> = BTreeMap::new();
    for condition in readings.iter().filter_map(|w| w.condition.as_deref()) {
        *conditions.entry(condition.to_string()).or_default() += 1;
    }

    // First condition alphabetically wins a tie
    let primary_condition = conditions
        .iter()
        .fold(None::<(&String, usize)>, |best, (name, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((name, count)),
        })
        .map(|(name, _)| name.clone());

    WeatherSummary {
        primary_condition,
        outdoor_temperature: range_stats(readings.iter().filter_map(|w| w.temperature)),
        outdoor_humidity: range_stats(readings.iter().filter_map(|w| w.humidity)),
        conditions,
    }
}

pub fn count_user_inputs(inputs: &[UserInput]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for input in inputs {
        *counts.entry(input.action.clone()).or_default() += 1;
    }
    counts
}

pub fn cycle_summary(cycles: &[Cycle]) -> CycleSummary {
    let mut summary = CycleSummary::default();
    for cycle in cycles {
        let minutes = cycle.duration_minutes();
        summary.total_cycles += 1;
        summary.total_runtime_minutes += minutes;
        match cycle.mode {
            CycleMode::Heating => {
                summary.heating_cycles += 1;
                summary.heating_runtime_minutes += minutes;
            }
            CycleMode::Cooling => {
                summary.cooling_cycles += 1;
                summary.cooling_runtime_minutes += minutes;
            }
        }
    }
    if summary.total_cycles > 0 {
        summary.average_cycle_length_minutes =
            summary.total_runtime_minutes / summary.total_cycles as f64;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HvacState;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn weather(condition: &str, temp: f64) -> WeatherReading {
        WeatherReading {
            condition: Some(condition.to_string()),
            temperature: Some(temp),
            ..Default::default()
        }
    }

    #[test]
    fn test_temperature_and_target_stats() {
        let samples = vec![
            Sample::new(at(8, 0), 68.0, HvacState::Off, 70.0),
            Sample::new(at(8, 5), 70.0, HvacState::Off, 70.0),
            Sample::new(at(8, 10), 72.0, HvacState::Off, 72.0),
        ];

        let temps = temperature_stats(&samples).unwrap();
        assert_eq!(temps.min, 68.0);
        assert_eq!(temps.max, 72.0);
        assert_eq!(temps.avg, 70.0);
        assert_eq!(temps.readings_count, 3);
        // (4 + 0 + 0) / 3
        assert!((temps.target_variance - 4.0 / 3.0).abs() < 1e-9);

        let targets = target_stats(&samples).unwrap();
        assert_eq!(targets.changes_count, 2);
        assert_eq!(targets.max, 72.0);

        assert!(humidity_stats(&samples).is_none());
        assert!(temperature_stats(&[]).is_none());
    }

    #[test]
    fn test_weather_summary() {
        let summary = weather_summary(&[
            weather("cloudy", 40.0),
            weather("sunny", 50.0),
            weather("sunny", 45.0),
            WeatherReading::default(),
        ]);

        assert_eq!(summary.conditions["sunny"], 2);
        assert_eq!(summary.primary_condition.as_deref(), Some("sunny"));
        let outdoor = summary.outdoor_temperature.unwrap();
        assert_eq!(outdoor.min, 40.0);
        assert_eq!(outdoor.readings_count, 3);
        assert!(summary.outdoor_humidity.is_none());
    }

    #[test]
    fn test_weather_tie_prefers_first_condition() {
        let summary = weather_summary(&[weather("rainy", 40.0), weather("cloudy", 41.0)]);
        assert_eq!(summary.primary_condition.as_deref(), Some("cloudy"));
    }

    #[test]
    fn test_cycle_summary() {
        let cycles = vec![
            Cycle {
                mode: CycleMode::Heating,
                start_time: at(6, 0),
                end_time: at(6, 20),
                start_temp: 66.0,
                end_temp: 69.0,
            },
            Cycle {
                mode: CycleMode::Cooling,
                start_time: at(15, 0),
                end_time: at(15, 40),
                start_temp: 77.0,
                end_temp: 74.0,
            },
        ];

        let summary = cycle_summary(&cycles);
        assert_eq!(summary.total_cycles, 2);
        assert_eq!(summary.heating_cycles, 1);
        assert_eq!(summary.cooling_runtime_minutes, 40.0);
        assert_eq!(summary.average_cycle_length_minutes, 30.0);
    }
}
