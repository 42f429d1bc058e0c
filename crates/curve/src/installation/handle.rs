//! Installation Handle
//!
//! A handle to communicate with a running installation task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::NaiveDateTime;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use hvac_analytics::{
    DailyReport, DrainSummary, InstallationStatus, Sample, ThermalRates, UserInput, WeatherReading,
};

use super::{CollectorError, EventPayload, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Task State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of an installation task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Running = 0,
    Stopping = 1,
    Stopped = 2,
}

impl TaskState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == TaskState::Stopped
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Running => write!(f, "running"),
            TaskState::Stopping => write!(f, "stopping"),
            TaskState::Stopped => write!(f, "stopped"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Installation Command
// ─────────────────────────────────────────────────────────────────────────────

/// Commands handled by an installation task
#[derive(Debug)]
pub enum InstallationCommand {
    /// Thermostat input
    Event(EventPayload),

    /// Day-boundary signal with the installation's local time
    AdvanceClock(NaiveDateTime, oneshot::Sender<Option<DailyReport>>),

    /// Drain the delivery queue now
    Drain(oneshot::Sender<DrainSummary>),

    /// Preview today's thermal rates without sealing the day
    EstimateRates(oneshot::Sender<ThermalRates>),

    /// Operator request to discard queued transmissions
    ClearQueue(oneshot::Sender<usize>),

    /// Request graceful shutdown
    Shutdown,
}

// ─────────────────────────────────────────────────────────────────────────────
// Installation Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to a running installation
///
/// Input methods never wait: when the task's command buffer is full they
/// fail with [`CollectorError::Backpressure`].
#[derive(Clone)]
pub struct InstallationHandle {
    pub anonymous_id: String,
    command_tx: mpsc::Sender<InstallationCommand>,
    state: Arc<AtomicU8>,
    status: Arc<RwLock<InstallationStatus>>,
}

impl InstallationHandle {
    pub(crate) fn new(
        anonymous_id: String,
        command_tx: mpsc::Sender<InstallationCommand>,
        state: Arc<AtomicU8>,
        status: Arc<RwLock<InstallationStatus>>,
    ) -> Self {
        Self {
            anonymous_id,
            command_tx,
            state,
            status,
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Latest status snapshot published by the task
    pub fn status(&self) -> InstallationStatus {
        self.status.read().clone()
    }

    pub fn record_sample(&self, sample: Sample) -> Result<()> {
        self.record(EventPayload::Sample(sample))
    }

    pub fn record_user_input(&self, input: UserInput) -> Result<()> {
        self.record(EventPayload::UserInput(input))
    }

    pub fn record_weather(&self, reading: WeatherReading) -> Result<()> {
        self.record(EventPayload::Weather(reading))
    }

    /// Hand an event to the task without waiting
    pub fn record(&self, payload: EventPayload) -> Result<()> {
        self.try_command(InstallationCommand::Event(payload))
    }

    /// Signal the clock and wait for the task to act on it
    pub async fn advance_clock(&self, now: NaiveDateTime) -> Result<Option<DailyReport>> {
        let (tx, rx) = oneshot::channel();
        self.command(InstallationCommand::AdvanceClock(now, tx)).await?;
        rx.await.map_err(|_| CollectorError::ChannelClosed)
    }

    pub async fn drain(&self) -> Result<DrainSummary> {
        let (tx, rx) = oneshot::channel();
        self.command(InstallationCommand::Drain(tx)).await?;
        rx.await.map_err(|_| CollectorError::ChannelClosed)
    }

    pub async fn estimate_rates(&self) -> Result<ThermalRates> {
        let (tx, rx) = oneshot::channel();
        self.command(InstallationCommand::EstimateRates(tx)).await?;
        rx.await.map_err(|_| CollectorError::ChannelClosed)
    }

    pub async fn clear_queue(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.command(InstallationCommand::ClearQueue(tx)).await?;
        rx.await.map_err(|_| CollectorError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.command(InstallationCommand::Shutdown).await
    }

    fn try_command(&self, cmd: InstallationCommand) -> Result<()> {
        self.command_tx.try_send(cmd).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                CollectorError::Backpressure(self.anonymous_id.clone())
            }
            mpsc::error::TrySendError::Closed(_) => {
                CollectorError::NotRunning(self.anonymous_id.clone())
            }
        })
    }

    async fn command(&self, cmd: InstallationCommand) -> Result<()> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| CollectorError::NotRunning(self.anonymous_id.clone()))
    }
}

impl std::fmt::Debug for InstallationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationHandle")
            .field("anonymous_id", &self.anonymous_id)
            .field("state", &self.state())
            .finish()
    }
}
