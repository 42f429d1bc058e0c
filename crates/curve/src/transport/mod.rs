//! Transports
//!
//! Implementations of [`hvac_analytics::Transport`] available to the collector.

mod spool;

pub use spool::SpoolTransport;
