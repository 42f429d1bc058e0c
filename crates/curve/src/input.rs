//! Event Sources
//!
//! Feeds the installation manager from a JSON-lines stream or from
//! simulated thermostats.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;

use crate::installation::{CollectorError, InputEvent, InstallationManager, Result};
use crate::simulator::ThermostatSimulator;

/// Counts from one input stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    pub accepted: usize,
    pub invalid: usize,
    pub dropped: usize,
}

/// Dispatch every line of `reader` until EOF
///
/// Malformed lines and events refused by a busy installation are logged and
/// counted; only a read error ends the stream early.
pub async fn read_json_lines<R>(
    reader: R,
    manager: &InstallationManager,
    default_id: &str,
) -> Result<InputStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = InputStats::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let event = match InputEvent::parse_line(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                stats.invalid += 1;
                tracing::warn!(line = line_no, error = %e, "Skipping input line");
                continue;
            }
        };

        match manager.dispatch(event, default_id) {
            Ok(()) => stats.accepted += 1,
            Err(e @ CollectorError::Backpressure(_)) => {
                stats.dropped += 1;
                tracing::warn!(line = line_no, error = %e, "Installation busy, event dropped");
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        accepted = stats.accepted,
        invalid = stats.invalid,
        dropped = stats.dropped,
        "Input stream ended"
    );
    Ok(stats)
}

/// Step every simulator once per `delay` until `stop` flips to true
pub async fn run_simulation(
    mut simulators: Vec<ThermostatSimulator>,
    manager: &InstallationManager,
    default_id: &str,
    delay: Duration,
    mut stop: watch::Receiver<bool>,
) -> Result<InputStats> {
    let mut stats = InputStats::default();

    while !*stop.borrow() {
        for sim in &mut simulators {
            for event in sim.step() {
                match manager.dispatch(event, default_id) {
                    Ok(()) => stats.accepted += 1,
                    Err(CollectorError::Backpressure(_)) => stats.dropped += 1,
                    Err(e) => return Err(e),
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.changed() => {}
        }
    }

    tracing::info!(accepted = stats.accepted, dropped = stats.dropped, "Simulation stopped");
    Ok(stats)
}
