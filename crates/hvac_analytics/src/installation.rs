//! Installation Context
//!
//! Everything the engine tracks for one anonymous installation: the current
//! day's aggregator, the moving-average windows, the pending raw-sample batch
//! and the delivery queue. The host drives it with input events and an
//! external clock signal; nothing here schedules itself.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::aggregator::{DailyAggregator, DailyReport, DayPhase, ReportEnvelope};
use crate::config::{AnalyticsConfig, CollectionLevel};
use crate::delivery::{DeliveryQueue, DrainSummary, QueueMetrics, SampleBatch, Transmission, Transport};
use crate::moving_average::{MovingAverageTracker, MovingAverages, RateHistoryEntry};
use crate::thermal::ThermalRates;
use crate::types::{AnalyticsError, Cycle, Result, Sample, UserInput, WeatherReading};

/// Point-in-time view of an installation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallationStatus {
    pub anonymous_id: String,
    pub collection_level: CollectionLevel,
    pub date: NaiveDate,
    pub phase: DayPhase,
    pub samples_today: usize,
    pub cycles_today: usize,
    pub rejected_today: usize,
    pub pending_batch: usize,
    pub last_sealed: Option<NaiveDate>,
    pub queue: QueueMetrics,
    pub moving_averages: MovingAverages,
}

#[derive(Debug)]
pub struct Installation {
    anonymous_id: String,
    config: AnalyticsConfig,
    level: CollectionLevel,
    day: DailyAggregator,
    tracker: MovingAverageTracker,
    pending: Vec<Sample>,
    pending_weather: Vec<WeatherReading>,
    queue: DeliveryQueue,
    last_sealed: Option<NaiveDate>,
}

impl Installation {
    pub fn new(anonymous_id: impl Into<String>, date: NaiveDate, config: AnalyticsConfig) -> Self {
        let anonymous_id = anonymous_id.into();
        Self {
            day: DailyAggregator::new(date, anonymous_id.clone(), &config),
            tracker: MovingAverageTracker::new(config.moving_average_window, config.trend_epsilon),
            pending: Vec::with_capacity(config.sample_batch_size),
            pending_weather: Vec::new(),
            level: CollectionLevel::default(),
            queue: DeliveryQueue::new(config.queue_capacity, config.max_per_drain),
            last_sealed: None,
            anonymous_id,
            config,
        }
    }

    pub fn with_collection_level(mut self, level: CollectionLevel) -> Self {
        self.level = level;
        self
    }

    pub fn anonymous_id(&self) -> &str {
        &self.anonymous_id
    }

    pub fn collection_level(&self) -> CollectionLevel {
        self.level
    }

    /// Aggregator for the day currently collecting
    pub fn today(&self) -> &DailyAggregator {
        &self.day
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Input Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a reading, rolling the day over first if it belongs to the next one
    ///
    /// A reading that fails validation changes nothing, not even the day.
    pub fn record_sample(&mut self, sample: Sample) -> Result<Option<Cycle>> {
        self.day.screen(&sample)?;
        if let Err(e) = self.catch_up(sample.date()) {
            return Err(self.day.reject(e));
        }

        let cycle = self.day.record_sample(sample.clone())?;
        if self.level.sends_samples() {
            self.pending.push(sample);
            if self.pending.len() >= self.config.sample_batch_size {
                self.flush_batch();
            }
        }
        Ok(cycle)
    }

    pub fn record_user_input(&mut self, input: UserInput) -> Result<()> {
        self.catch_up(input.timestamp.date())?;
        self.day.record_user_input(input)
    }

    /// Record outdoor conditions; ignored at the minimal collection level
    pub fn record_weather(&mut self, reading: WeatherReading) -> Result<()> {
        if !self.level.records_weather() {
            tracing::trace!(anonymous_id = %self.anonymous_id, "Weather not collected");
            return Ok(());
        }
        if let Some(ts) = reading.timestamp {
            self.catch_up(ts.date())?;
        }
        if self.level.sends_weather() {
            self.pending_weather.push(reading.clone());
        }
        self.day.record_weather(reading)
    }

    /// Roll over when an event belongs to the day after the current one
    ///
    /// Larger jumps are refused; only the host clock may skip days.
    fn catch_up(&mut self, date: NaiveDate) -> Result<()> {
        let current = self.day.date();
        if date <= current {
            return Ok(());
        }
        if current.succ_opt() == Some(date) {
            self.roll_over(date);
            return Ok(());
        }
        tracing::warn!(
            anonymous_id = %self.anonymous_id,
            event_date = %date,
            collecting = %current,
            "Event is more than a day ahead of collection"
        );
        Err(AnalyticsError::OutOfWindow {
            got: date,
            expected: current,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Clock
    // ─────────────────────────────────────────────────────────────────────────

    /// Day-boundary signal; seals the current day once `now` has left it
    pub fn advance_clock(&mut self, now: NaiveDateTime) -> Option<DailyReport> {
        (now.date() > self.day.date()).then(|| self.roll_over(now.date()))
    }

    /// Seal the current day, queue its report and start collecting `next`
    pub fn roll_over(&mut self, next: NaiveDate) -> DailyReport {
        let report = self.day.seal();

        let entry = RateHistoryEntry::from_rates(report.date, &*self.anonymous_id, &report.thermal_rates);
        let averages = self.tracker.add_entry(&entry);

        self.flush_batch();
        self.queue.enqueue(Transmission::DailyReport(ReportEnvelope::new(
            report.clone(),
            averages,
        )));

        tracing::info!(
            anonymous_id = %self.anonymous_id,
            sealed = %report.date,
            next = %next,
            queued = self.queue.len(),
            "Rolled over to new collection day"
        );

        self.last_sealed = Some(report.date);
        self.day = DailyAggregator::new(next, self.anonymous_id.clone(), &self.config);
        report
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Delivery
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue the pending raw readings as one batch; false if there were none
    pub fn flush_batch(&mut self) -> bool {
        if self.pending.is_empty() && self.pending_weather.is_empty() {
            return false;
        }
        let readings = std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.config.sample_batch_size),
        );
        let weather = std::mem::take(&mut self.pending_weather);
        tracing::debug!(
            anonymous_id = %self.anonymous_id,
            readings = readings.len(),
            weather = weather.len(),
            "Queued sample batch"
        );
        self.queue.enqueue(Transmission::SampleBatch(SampleBatch {
            anonymous_id: self.anonymous_id.clone(),
            readings,
            weather,
        }));
        true
    }

    /// Push queued transmissions through the transport and fold any returned
    /// rate history into the moving averages
    pub async fn drain(&mut self, transport: &dyn Transport) -> DrainSummary {
        let summary = self.queue.drain(transport).await;
        self.ingest_history(summary.rate_history.clone());
        summary
    }

    /// Replay backend rate history, oldest first
    pub fn ingest_history(&mut self, mut entries: Vec<RateHistoryEntry>) {
        if entries.is_empty() {
            return;
        }
        entries.sort_by_key(|e| e.date);
        for entry in &entries {
            self.tracker.add_entry(entry);
        }
        tracing::debug!(
            anonymous_id = %self.anonymous_id,
            entries = entries.len(),
            "Ingested rate history"
        );
    }

    pub fn clear_queue(&mut self) -> usize {
        self.queue.clear()
    }

    pub fn moving_averages(&self) -> MovingAverages {
        self.tracker.averages(&self.anonymous_id)
    }

    /// Today's thermal rates so far; the day keeps collecting
    pub fn estimate_now(&self) -> ThermalRates {
        self.day.estimate_now()
    }

    pub fn status(&self) -> InstallationStatus {
        InstallationStatus {
            anonymous_id: self.anonymous_id.clone(),
            collection_level: self.level,
            date: self.day.date(),
            phase: self.day.phase(),
            samples_today: self.day.samples().len(),
            cycles_today: self.day.cycles().len(),
            rejected_today: self.day.rejected(),
            pending_batch: self.pending.len() + self.pending_weather.len(),
            last_sealed: self.last_sealed,
            queue: self.queue.metrics(),
            moving_averages: self.moving_averages(),
        }
    }
}
