//! Installation Runtime
//!
//! Runs each installation's analytics context on its own tokio task. The
//! task is the single owner of the context; everything else talks to it
//! through an [`InstallationHandle`].

mod event;
mod handle;
mod manager;

pub use event::{EventPayload, InputEvent};
pub use handle::{InstallationCommand, InstallationHandle, TaskState};
pub use manager::{InstallationManager, RuntimeSettings};

// ─────────────────────────────────────────────────────────────────────────────
// Collector Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by the collector runtime
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Installation already running: {0}")]
    AlreadyRunning(String),

    #[error("Installation not running: {0}")]
    NotRunning(String),

    #[error("Command queue full for installation {0}")]
    Backpressure(String),

    #[error("Invalid input event: {0}")]
    InvalidEvent(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Shutdown timeout")]
    ShutdownTimeout,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for collector operations
pub type Result<T> = std::result::Result<T, CollectorError>;
