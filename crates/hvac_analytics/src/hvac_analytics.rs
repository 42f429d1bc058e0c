//! HVAC telemetry analytics
//!
//! Turns periodic thermostat readings into daily reports: HVAC cycle
//! detection, thermal learning rates (heating, cooling and natural drift),
//! seven-day moving averages with trend classification, and a bounded queue
//! for shipping everything to a backend.
//!
//! The engine is synchronous apart from [`DeliveryQueue::drain`]. Hosts own one
//! [`Installation`] per thermostat and drive it with input events and a clock.

pub mod aggregator;
pub mod buffer;
pub mod config;
pub mod cycle;
pub mod delivery;
pub mod installation;
pub mod moving_average;
pub mod thermal;
pub mod types;

pub use aggregator::{DailyAggregator, DailyReport, DayPhase, ReportEnvelope};
pub use buffer::{Placement, SampleBuffer};
pub use config::{AnalyticsConfig, CollectionLevel};
pub use cycle::CycleDetector;
pub use delivery::{
    BackendResponse, DeliveryQueue, DrainSummary, QueueMetrics, SampleBatch, SendOutcome,
    Transmission, Transport,
};
pub use installation::{Installation, InstallationStatus};
pub use moving_average::{
    MovingAverageResult, MovingAverageTracker, MovingAverages, RateHistoryEntry, Trend,
};
pub use thermal::{ThermalRateEstimator, ThermalRates};
pub use types::{
    AnalyticsError, Cycle, CycleMode, HvacState, Result, Sample, ThermalMode, ThermalRate,
    UserInput, WeatherReading,
};
