//! IPC error types

use thiserror::Error;

/// IPC error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IpcError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// A chunk did not fit the reassembly state of its message
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Payload does not fit in a single chunk (non-blocking operations never fragment)
    #[error("Payload of {size} bytes exceeds the {limit} byte chunk limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Bounded queue is full
    #[error("Queue is full")]
    Full,

    /// Timeout waiting for a message
    #[error("Timeout waiting for message")]
    Timeout,

    /// Every peer on the other end is gone
    #[error("Channel disconnected")]
    Disconnected,

    /// Blocking operation was abandoned by its caller
    #[error("Operation cancelled")]
    Cancelled,
}

impl IpcError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, IpcError::Full | IpcError::Timeout)
    }

    /// Check if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IpcError::MalformedMessage(_)
                | IpcError::DeserializationError(_)
                | IpcError::Disconnected
        )
    }
}
