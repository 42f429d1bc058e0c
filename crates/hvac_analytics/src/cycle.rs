//! HVAC Cycle Detection
//!
//! Turns a stream of run-state samples into discrete heating and cooling
//! cycles.
//!
//! # States
//!
//! ```text
//!            HEATING sample                 OFF/IDLE sample
//!   Resting ───────────────▶ Heating ─────────────────────▶ Resting (emit)
//!      │                       │ COOLING sample
//!      │ COOLING sample        ▼ (emit heating, open cooling)
//!      └──────────────────▶ Cooling ──────────────────────▶ Resting (emit)
//! ```
//!
//! A closed cycle shorter than the configured noise floor is dropped.

use chrono::NaiveDateTime;

use crate::types::{Cycle, CycleMode, HvacState, Sample};

/// The cycle currently running
#[derive(Debug, Clone, PartialEq)]
struct OpenCycle {
    mode: CycleMode,
    start_time: NaiveDateTime,
    start_temp: f64,
    latest_time: NaiveDateTime,
    latest_temp: f64,
}

impl OpenCycle {
    fn start(mode: CycleMode, sample: &Sample) -> Self {
        Self {
            mode,
            start_time: sample.timestamp,
            start_temp: sample.indoor_temp,
            latest_time: sample.timestamp,
            latest_temp: sample.indoor_temp,
        }
    }

    fn close(self, end_time: NaiveDateTime, end_temp: f64) -> Cycle {
        Cycle {
            mode: self.mode,
            start_time: self.start_time,
            end_time,
            start_temp: self.start_temp,
            end_temp,
        }
    }
}

/// Run-state machine for one installation
#[derive(Debug, Clone)]
pub struct CycleDetector {
    min_cycle_minutes: f64,
    open: Option<OpenCycle>,
    last_state: Option<HvacState>,
    last_seen: Option<NaiveDateTime>,
    discarded: usize,
}

impl CycleDetector {
    pub fn new(min_cycle_minutes: f64) -> Self {
        Self {
            min_cycle_minutes,
            open: None,
            last_state: None,
            last_seen: None,
            discarded: 0,
        }
    }

    /// Feed the next sample; returns a cycle when one completes
    ///
    /// Samples older than the last observed one are ignored. A sample with the
    /// same timestamp as the previous one overwrites its temperature and only
    /// causes a transition when its run state differs.
    pub fn observe(&mut self, sample: &Sample) -> Option<Cycle> {
        if let Some(last) = self.last_seen {
            if sample.timestamp < last {
                tracing::debug!(
                    timestamp = %sample.timestamp,
                    last_seen = %last,
                    "Ignoring late sample for cycle detection"
                );
                return None;
            }
        }
        self.last_seen = Some(sample.timestamp);
        self.last_state = Some(sample.hvac_state);

        match sample.hvac_state.active_mode() {
            Some(mode) => match self.open.as_mut() {
                Some(open) if open.mode == mode => {
                    if open.start_time == sample.timestamp {
                        open.start_temp = sample.indoor_temp;
                    }
                    open.latest_time = sample.timestamp;
                    open.latest_temp = sample.indoor_temp;
                    None
                }
                _ => {
                    // Switching straight between modes means we missed the
                    // resting sample; the old cycle ends where the new one starts.
                    let closed = self.close_at(sample.timestamp, sample.indoor_temp);
                    self.open = Some(OpenCycle::start(mode, sample));
                    closed
                }
            },
            None => self.close_at(sample.timestamp, sample.indoor_temp),
        }
    }

    /// Close any open cycle at the last sample seen (day boundary)
    pub fn flush(&mut self) -> Option<Cycle> {
        let open = self.open.as_ref()?;
        let (end_time, end_temp) = (open.latest_time, open.latest_temp);
        let closed = self.close_at(end_time, end_temp);
        self.last_state = None;
        closed
    }

    /// Mode of the cycle currently open
    pub fn open_mode(&self) -> Option<CycleMode> {
        self.open.as_ref().map(|c| c.mode)
    }

    pub fn last_state(&self) -> Option<HvacState> {
        self.last_state
    }

    /// Cycles dropped for being shorter than the noise floor
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn close_at(&mut self, end_time: NaiveDateTime, end_temp: f64) -> Option<Cycle> {
        let cycle = self.open.take()?.close(end_time, end_temp);
        if cycle.duration_minutes() >= self.min_cycle_minutes {
            tracing::debug!(
                mode = %cycle.mode,
                start = %cycle.start_time,
                minutes = cycle.duration_minutes(),
                "HVAC cycle completed"
            );
            Some(cycle)
        } else {
            self.discarded += 1;
            tracing::debug!(
                mode = %cycle.mode,
                start = %cycle.start_time,
                minutes = cycle.duration_minutes(),
                "Discarding cycle below noise floor"
            );
            None
        }
    }
}
