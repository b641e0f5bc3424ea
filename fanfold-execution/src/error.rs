//! Error types for engine execution

use fanfold_ipc::{IpcError, WorkerError, WorkerRole};
use thiserror::Error;

/// Engine execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Engine already started")]
    AlreadyStarted,

    #[error("Engine not started")]
    NotStarted,

    #[error("No more tasks accepted after task_done")]
    InputClosed,

    #[error("{role} #{idx} failed: {error}")]
    WorkerFailed {
        role: WorkerRole,
        idx: usize,
        error: WorkerError,
    },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IPC error: {0}")]
    IpcError(IpcError),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Failed to spawn thread {name}: {error}")]
    SpawnFailed { name: String, error: String },

    #[error("Thread {0} panicked outside a handler")]
    ThreadPanicked(String),
}

impl ExecutionError {
    /// Whether the run was stopped on request rather than by a fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutionError::Cancelled)
    }
}

// Convert from config errors
impl From<fanfold_config::ConfigError> for ExecutionError {
    fn from(err: fanfold_config::ConfigError) -> Self {
        Self::ConfigurationError(err.to_string())
    }
}

// Convert from IPC errors
impl From<IpcError> for ExecutionError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Cancelled => Self::Cancelled,
            other => Self::IpcError(other),
        }
    }
}

/// Result type for engine operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;
