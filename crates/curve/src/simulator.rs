//! Thermostat Simulator
//!
//! Synthetic single-zone thermostat for running the collector without
//! hardware. Produces a reading every step, an hourly weather observation and
//! the occasional setpoint change.

use std::f64::consts::PI;

use chrono::{Duration, NaiveDateTime, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use hvac_analytics::{HvacState, Sample, UserInput, WeatherReading};

use crate::installation::{EventPayload, InputEvent};

const CONDITIONS: [&str; 4] = ["clear", "cloudy", "rain", "windy"];

/// Degrees per minute added by the furnace or removed by the AC
const EQUIPMENT_RATE: f64 = 0.05;
/// Fraction of the indoor/outdoor difference leaked per minute
const LEAK_RATE: f64 = 0.0008;

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub struct ThermostatSimulator {
    anonymous_id: Option<String>,
    now: NaiveDateTime,
    step: Duration,
    indoor: f64,
    humidity: f64,
    target: f64,
    outdoor_mean: f64,
    state: HvacState,
    rng: StdRng,
}

impl ThermostatSimulator {
    pub fn new(start: NaiveDateTime, rng: StdRng) -> Self {
        Self {
            anonymous_id: None,
            now: start,
            step: Duration::minutes(5),
            indoor: 70.0,
            humidity: 45.0,
            target: 70.0,
            outdoor_mean: 45.0,
            state: HvacState::Idle,
            rng,
        }
    }

    pub fn seeded(start: NaiveDateTime, seed: u64) -> Self {
        Self::new(start, StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy(start: NaiveDateTime) -> Self {
        Self::new(start, StdRng::from_entropy())
    }

    /// Tag generated events with an installation id
    pub fn for_installation(mut self, anonymous_id: impl Into<String>) -> Self {
        self.anonymous_id = Some(anonymous_id.into());
        self
    }

    /// Mean outdoor temperature; above the setpoint the simulator cools
    pub fn with_outdoor_mean(mut self, outdoor_mean: f64) -> Self {
        self.outdoor_mean = outdoor_mean;
        self
    }

    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    /// Advance one step and return the events it produced
    pub fn step(&mut self) -> Vec<InputEvent> {
        let mut events = Vec::with_capacity(3);
        let outdoor = self.outdoor_temp();

        if self.now.minute() == 0 {
            let reading = self.weather(outdoor);
            events.push(self.event(EventPayload::Weather(reading)));
        }
        if self.rng.gen_bool(0.01) {
            self.target = (self.target + self.rng.gen_range(-2.0..=2.0_f64).round()).clamp(62.0, 78.0);
            let mut input = UserInput::new(self.now, "set_temperature");
            input.parameters = serde_json::json!({ "temperature": self.target });
            events.push(self.event(EventPayload::UserInput(input)));
        }

        self.advance_physics(outdoor);
        self.state = self.next_state(outdoor);

        let sample = Sample::new(self.now, round1(self.indoor), self.state, self.target)
            .with_humidity(round1(self.humidity));
        events.push(self.event(EventPayload::Sample(sample)));

        self.now += self.step;
        events
    }

    fn outdoor_temp(&mut self) -> f64 {
        let hour = self.now.hour() as f64 + self.now.minute() as f64 / 60.0;
        // Coldest around 3am, warmest around 3pm
        let swing = 10.0 * ((hour - 9.0) / 24.0 * 2.0 * PI).sin();
        self.outdoor_mean + swing + self.rng.gen_range(-0.5..0.5)
    }

    fn advance_physics(&mut self, outdoor: f64) {
        let minutes = self.step.num_seconds() as f64 / 60.0;
        let equipment = match self.state {
            HvacState::Heating => EQUIPMENT_RATE,
            HvacState::Cooling => -EQUIPMENT_RATE,
            HvacState::Idle | HvacState::Off => 0.0,
        };
        self.indoor += (equipment + (outdoor - self.indoor) * LEAK_RATE) * minutes
            + self.rng.gen_range(-0.03..0.03);
        self.humidity = (self.humidity + self.rng.gen_range(-0.5..0.5)).clamp(30.0, 60.0);
    }

    fn next_state(&self, outdoor: f64) -> HvacState {
        let cooling_season = outdoor > self.target + 5.0;
        match self.state {
            HvacState::Heating if self.indoor >= self.target + 0.5 => HvacState::Idle,
            HvacState::Cooling if self.indoor <= self.target - 0.5 => HvacState::Idle,
            HvacState::Heating | HvacState::Cooling => self.state,
            HvacState::Idle | HvacState::Off => {
                if !cooling_season && self.indoor <= self.target - 1.0 {
                    HvacState::Heating
                } else if cooling_season && self.indoor >= self.target + 1.0 {
                    HvacState::Cooling
                } else {
                    self.state
                }
            }
        }
    }

    fn weather(&mut self, outdoor: f64) -> WeatherReading {
        WeatherReading {
            timestamp: Some(self.now),
            condition: Some(CONDITIONS[self.rng.gen_range(0..CONDITIONS.len())].to_string()),
            temperature: Some(round1(outdoor)),
            humidity: Some(round1(self.rng.gen_range(30.0..90.0))),
            pressure: Some(round1(self.rng.gen_range(1005.0..1025.0))),
            wind_speed: Some(round1(self.rng.gen_range(0.0..20.0))),
        }
    }

    fn event(&self, payload: EventPayload) -> InputEvent {
        match &self.anonymous_id {
            Some(id) => InputEvent::for_installation(id.clone(), payload),
            None => InputEvent::new(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use hvac_analytics::{AnalyticsConfig, Installation, ThermalMode};

    fn midnight() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn run_day(sim: &mut ThermostatSimulator) -> Vec<InputEvent> {
        (0..288).flat_map(|_| sim.step()).collect()
    }

    fn samples(events: &[InputEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::Sample(_)))
            .count()
    }

    #[test]
    fn test_same_seed_same_events() {
        let a = run_day(&mut ThermostatSimulator::seeded(midnight(), 7));
        let b = run_day(&mut ThermostatSimulator::seeded(midnight(), 7));
        assert_eq!(a, b);
        assert_eq!(samples(&a), 288);

        let weather = a
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::Weather(_)))
            .count();
        assert_eq!(weather, 24);
    }

    #[test]
    fn test_winter_day_produces_heating_cycles() {
        let mut sim = ThermostatSimulator::seeded(midnight(), 42).for_installation("sim-1");
        let mut installation = Installation::new("sim-1", midnight().date(), AnalyticsConfig::default());

        for event in run_day(&mut sim) {
            assert_eq!(event.anonymous_id.as_deref(), Some("sim-1"));
            match event.payload {
                EventPayload::Sample(sample) => {
                    installation.record_sample(sample).unwrap();
                }
                EventPayload::UserInput(input) => installation.record_user_input(input).unwrap(),
                EventPayload::Weather(reading) => installation.record_weather(reading).unwrap(),
            }
        }

        let report = installation.advance_clock(sim.now()).unwrap();
        assert!(report.cycle_summary.heating_cycles > 0);
        assert_eq!(report.cycle_summary.cooling_cycles, 0);
        assert!(report.thermal_rates[&ThermalMode::Heating].rate_per_30min > 0.0);
        assert_eq!(report.weather_summary.outdoor_temperature.unwrap().readings_count, 24);
    }

    #[test]
    fn test_summer_day_produces_cooling_cycles() {
        let mut sim = ThermostatSimulator::seeded(midnight(), 3).with_outdoor_mean(92.0);
        let mut installation = Installation::new("sim-2", midnight().date(), AnalyticsConfig::default());

        for event in run_day(&mut sim) {
            if let EventPayload::Sample(sample) = event.payload {
                installation.record_sample(sample).unwrap();
            }
        }

        let report = installation.advance_clock(sim.now()).unwrap();
        assert!(report.cycle_summary.cooling_cycles > 0);
        assert!(report.thermal_rates[&ThermalMode::Cooling].rate_per_30min < 0.0);
    }
}
