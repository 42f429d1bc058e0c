//! Curve - Thermostat Telemetry Collector
//!
//! Hosts the `hvac_analytics` engine:
//! - Configuration loading with environment overrides
//! - Persistent anonymous identity
//! - One task per installation via `installation::InstallationManager`
//! - Outbox spooling of sample batches and daily reports
//! - JSON-lines and simulated event sources

// Re-export the analytics engine
pub use hvac_analytics;

// Configuration
pub mod config;

// Anonymous identity
pub mod identity;

// Per-installation task runtime
pub mod installation;

// Event sources
pub mod input;

// Synthetic thermostat
pub mod simulator;

// Delivery transports
pub mod transport;
