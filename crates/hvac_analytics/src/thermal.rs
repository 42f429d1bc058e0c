//! Thermal Rate Estimation
//!
//! Learns how fast the building heats, cools and drifts, normalised to
//! degrees per 30 minutes.
//!
//! Heating and cooling rates come from completed cycles. The natural rate
//! comes from contiguous OFF/IDLE spans in the sample stream. Both are
//! duration-weighted means across the day.

use std::collections::BTreeMap;

use crate::config::AnalyticsConfig;
use crate::types::{Cycle, CycleMode, Sample, ThermalMode, ThermalRate};

/// Rates keyed by mode; a mode with no data is absent
pub type ThermalRates = BTreeMap<ThermalMode, ThermalRate>;

const RATE_BASIS_MINUTES: f64 = 30.0;

/// One contiguous OFF/IDLE stretch of the day
#[derive(Debug, Clone, PartialEq)]
pub struct NaturalSpan {
    pub start_temp: f64,
    pub end_temp: f64,
    pub minutes: f64,
}

/// Duration-weighted accumulator for one mode
#[derive(Debug, Default)]
struct WeightedRate {
    degrees: f64,
    minutes: f64,
    count: usize,
}

impl WeightedRate {
    fn add(&mut self, degrees: f64, minutes: f64) {
        if minutes <= 0.0 {
            return;
        }
        self.degrees += degrees;
        self.minutes += minutes;
        self.count += 1;
    }

    /// Σ(rateᵢ·durᵢ)/Σdurᵢ, which reduces to total degrees over total time
    fn finish(&self, mode: ThermalMode, min_reliable: usize) -> Option<ThermalRate> {
        if self.count == 0 || self.minutes <= 0.0 {
            return None;
        }
        Some(ThermalRate {
            mode,
            rate_per_30min: self.degrees / self.minutes * RATE_BASIS_MINUTES,
            sample_count: self.count,
            reliable: self.count >= min_reliable,
        })
    }
}

/// Computes the day's heating, cooling and natural rates
#[derive(Debug, Clone)]
pub struct ThermalRateEstimator {
    min_natural_span_minutes: f64,
    min_reliable_samples: usize,
}

impl ThermalRateEstimator {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            min_natural_span_minutes: config.min_natural_span_minutes,
            min_reliable_samples: config.min_reliable_samples,
        }
    }

    /// Estimate rates from a day's ordered samples and its completed cycles
    pub fn estimate(&self, samples: &[Sample], cycles: &[Cycle]) -> ThermalRates {
        let mut heating = WeightedRate::default();
        let mut cooling = WeightedRate::default();
        for cycle in cycles {
            let target = match cycle.mode {
                CycleMode::Heating => &mut heating,
                CycleMode::Cooling => &mut cooling,
            };
            target.add(cycle.temperature_change(), cycle.duration_minutes());
        }

        let mut natural = WeightedRate::default();
        for span in self.natural_spans(samples) {
            natural.add(span.end_temp - span.start_temp, span.minutes);
        }

        let mut rates = ThermalRates::new();
        for (mode, acc) in [
            (ThermalMode::Heating, heating),
            (ThermalMode::Cooling, cooling),
            (ThermalMode::Natural, natural),
        ] {
            if let Some(rate) = acc.finish(mode, self.min_reliable_samples) {
                rates.insert(mode, rate);
            }
        }
        rates
    }

    /// OFF/IDLE runs long enough to reflect the building's own drift
    ///
    /// A span runs from its first resting sample to the first active sample
    /// after it, or to the last sample of the day.
    pub fn natural_spans(&self, samples: &[Sample]) -> Vec<NaturalSpan> {
        let mut spans = Vec::new();
        let mut start: Option<&Sample> = None;

        for sample in samples {
            match (start, sample.hvac_state.is_resting()) {
                (None, true) => start = Some(sample),
                (Some(first), false) => {
                    self.push_span(&mut spans, first, sample);
                    start = None;
                }
                _ => {}
            }
        }

        if let (Some(first), Some(last)) = (start, samples.last()) {
            self.push_span(&mut spans, first, last);
        }
        spans
    }

    fn push_span(&self, spans: &mut Vec<NaturalSpan>, first: &Sample, end: &Sample) {
        let minutes = (end.timestamp - first.timestamp).num_milliseconds() as f64 / 60_000.0;
        if minutes >= self.min_natural_span_minutes {
            spans.push(NaturalSpan {
                start_temp: first.indoor_temp,
                end_temp: end.indoor_temp,
                minutes,
            });
        }
    }
}
