//! Moving Averages
//!
//! Rolling 7-day averages of daily thermal rates with trend classification.
//!
//! The tracker only keeps the bounded window needed for the calculation. Long
//! term history belongs to the backend, which may replay entries back into
//! the tracker after a restart.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::NaiveDate;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::thermal::ThermalRates;
use crate::types::ThermalMode;

/// Points needed before a trend is reported as anything but STABLE
const MIN_TREND_POINTS: usize = 4;

// ─────────────────────────────────────────────────────────────────────────────
// History Entry
// ─────────────────────────────────────────────────────────────────────────────

/// One day's learned rates for an installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateHistoryEntry {
    pub date: NaiveDate,
    pub anonymous_id: String,
    #[serde(default)]
    pub heating_rate: Option<f64>,
    #[serde(default)]
    pub cooling_rate: Option<f64>,
    #[serde(default)]
    pub natural_rate: Option<f64>,
}

impl RateHistoryEntry {
    /// Build an entry from a sealed day's rates
    pub fn from_rates(date: NaiveDate, anonymous_id: impl Into<String>, rates: &ThermalRates) -> Self {
        let rate = |mode: ThermalMode| rates.get(&mode).map(|r| r.rate_per_30min);
        Self {
            date,
            anonymous_id: anonymous_id.into(),
            heating_rate: rate(ThermalMode::Heating),
            cooling_rate: rate(ThermalMode::Cooling),
            natural_rate: rate(ThermalMode::Natural),
        }
    }

    pub fn rate(&self, mode: ThermalMode) -> Option<f64> {
        match mode {
            ThermalMode::Heating => self.heating_rate,
            ThermalMode::Cooling => self.cooling_rate,
            ThermalMode::Natural => self.natural_rate,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// Direction of a rolling average
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Rolling statistics for one mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingAverageResult {
    pub mode: ThermalMode,
    pub avg_7day: f64,
    pub trend: Trend,
    pub days_included: usize,
    pub std_dev: f64,
}

impl MovingAverageResult {
    /// Summarise a window of rates ordered oldest first
    pub fn from_window(mode: ThermalMode, values: &[f64], trend_epsilon: f64) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let avg = mean(values);
        let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;

        Some(Self {
            mode,
            avg_7day: avg,
            trend: classify_trend(values, trend_epsilon),
            days_included: values.len(),
            std_dev: variance.sqrt(),
        })
    }
}

/// Newer half of the window against the older half; an odd middle is skipped
fn classify_trend(values: &[f64], epsilon: f64) -> Trend {
    if values.len() < MIN_TREND_POINTS {
        return Trend::Stable;
    }
    let half = values.len() / 2;
    let older = mean(&values[..half]);
    let newer = mean(&values[values.len() - half..]);
    let delta = newer - older;

    if delta.abs() <= epsilon {
        Trend::Stable
    } else if delta > 0.0 {
        Trend::Increasing
    } else {
        Trend::Decreasing
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Per-mode results for one installation
///
/// Serialises to the flat backend shape, e.g. `heating_rate_7day_avg`,
/// `heating_rate_samples`, `heating_rate_trend`, `heating_rate_std_dev`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovingAverages(BTreeMap<ThermalMode, MovingAverageResult>);

impl MovingAverages {
    pub fn get(&self, mode: ThermalMode) -> Option<&MovingAverageResult> {
        self.0.get(&mode)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MovingAverageResult> {
        self.0.values()
    }
}

impl Serialize for MovingAverages {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len() * 4))?;
        for (mode, result) in &self.0 {
            map.serialize_entry(&format!("{mode}_rate_7day_avg"), &round4(result.avg_7day))?;
            map.serialize_entry(&format!("{mode}_rate_samples"), &result.days_included)?;
            map.serialize_entry(&format!("{mode}_rate_trend"), &result.trend)?;
            map.serialize_entry(&format!("{mode}_rate_std_dev"), &round4(result.std_dev))?;
        }
        map.end()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracker
// ─────────────────────────────────────────────────────────────────────────────

type ModeWindows = BTreeMap<ThermalMode, VecDeque<(NaiveDate, f64)>>;

/// Bounded rate windows keyed by installation and mode
#[derive(Debug, Clone)]
pub struct MovingAverageTracker {
    window: usize,
    trend_epsilon: f64,
    installations: HashMap<String, ModeWindows>,
}

impl MovingAverageTracker {
    pub fn new(window: usize, trend_epsilon: f64) -> Self {
        Self {
            window: window.max(1),
            trend_epsilon,
            installations: HashMap::new(),
        }
    }

    /// Fold a day's rates into the windows and return the refreshed averages
    ///
    /// Entries must arrive in date order. An entry for the newest date already
    /// held replaces that day's value; older entries are ignored.
    pub fn add_entry(&mut self, entry: &RateHistoryEntry) -> MovingAverages {
        let windows = self
            .installations
            .entry(entry.anonymous_id.clone())
            .or_default();

        for mode in ThermalMode::ALL {
            let Some(rate) = entry.rate(mode).filter(|r| r.is_finite()) else {
                continue;
            };
            let window = windows.entry(mode).or_default();

            match window.back().map(|(date, _)| *date) {
                Some(newest) if newest == entry.date => {
                    if let Some((_, value)) = window.back_mut() {
                        *value = rate;
                    }
                }
                Some(newest) if newest > entry.date => {
                    tracing::debug!(
                        anonymous_id = %entry.anonymous_id,
                        %mode,
                        date = %entry.date,
                        %newest,
                        "Ignoring out-of-order rate history entry"
                    );
                }
                _ => {
                    window.push_back((entry.date, rate));
                    while window.len() > self.window {
                        window.pop_front();
                    }
                }
            }
        }

        self.averages(&entry.anonymous_id)
    }

    /// Current averages for an installation without adding anything
    pub fn averages(&self, anonymous_id: &str) -> MovingAverages {
        let mut results = BTreeMap::new();
        if let Some(windows) = self.installations.get(anonymous_id) {
            for (mode, window) in windows {
                let values: Vec<f64> = window.iter().map(|(_, v)| *v).collect();
                if let Some(result) =
                    MovingAverageResult::from_window(*mode, &values, self.trend_epsilon)
                {
                    results.insert(*mode, result);
                }
            }
        }
        MovingAverages(results)
    }
}
