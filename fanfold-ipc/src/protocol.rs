//! IPC protocol definitions and message types
//!
//! Data frames ([`ChunkMessage`]) travel on data channels; everything else in
//! this module is a control message and travels on a dedicated control
//! channel so it never queues behind bulk data.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Default chunk size for transport queues (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest chunk size a transport queue accepts (512 MiB)
pub const MAX_CHUNK_SIZE: usize = 512 * 1024 * 1024;

/// One fragment of a serialized payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMessage {
    /// Unique per payload; every chunk of one payload carries the same id
    pub message_id: Uuid,
    /// 1-based position of this chunk
    pub chunk_index: u32,
    /// Number of chunks the payload was split into
    pub chunk_count: u32,
    pub body: Bytes,
}

impl ChunkMessage {
    /// Wrap a payload that fits in one chunk
    pub fn single(body: Bytes) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            chunk_index: 1,
            chunk_count: 1,
            body,
        }
    }

    /// Split a serialized payload into `ceil(len / chunk_size)` chunks.
    ///
    /// An empty payload still produces one (empty) chunk.
    pub fn split(payload: Bytes, chunk_size: usize) -> Vec<ChunkMessage> {
        let chunk_size = chunk_size.max(1);
        if payload.len() <= chunk_size {
            return vec![Self::single(payload)];
        }

        let message_id = Uuid::new_v4();
        let chunk_count = payload.len().div_ceil(chunk_size) as u32;
        (0..chunk_count)
            .map(|i| {
                let start = i as usize * chunk_size;
                let end = (start + chunk_size).min(payload.len());
                ChunkMessage {
                    message_id,
                    chunk_index: i + 1,
                    chunk_count,
                    body: payload.slice(start..end),
                }
            })
            .collect()
    }

    /// Whether this chunk carries an entire payload
    pub fn is_single(&self) -> bool {
        self.chunk_count == 1 && self.chunk_index == 1
    }

    /// Whether this is the final chunk of its payload
    pub fn is_last(&self) -> bool {
        self.chunk_index == self.chunk_count
    }
}

/// Role of a unit in an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Mapper,
    Reducer,
    Worker,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRole::Mapper => write!(f, "mapper"),
            WorkerRole::Reducer => write!(f, "reducer"),
            WorkerRole::Worker => write!(f, "worker"),
        }
    }
}

/// Lifecycle state of a mapper, reducer or pool worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    /// No new input will arrive; finishing the backlog
    Draining,
    /// Idle and reporting to the manager
    Waiting,
    Exited,
}

/// Commands sent from the manager to a mapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapperCommand {
    /// The caller will not add more tasks
    NoMoreInput,
    Cancel,
}

/// Commands sent from the manager to a reducer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReducerCommand {
    /// Every mapper has finished; an empty queue now means idle
    NoRunningMapper,
    /// Resume folding, the queue may have been refilled with merged contexts
    Awake,
    /// Push the context back onto the intermediate queue and exit
    Kill,
    Cancel,
}

/// Commands received by the map-reduce manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerCommand {
    /// From the caller: end of input
    NoNewData,
    MapperFinished {
        idx: usize,
    },
    ReducerWaiting {
        idx: usize,
    },
    /// `populated` is true when the reducer pushed a context back before exiting
    ReducerFinished {
        idx: usize,
        populated: bool,
    },
    WorkerFailed {
        role: WorkerRole,
        idx: usize,
        error: WorkerError,
    },
    /// From the caller: abandon the run
    Cancel,
}

/// Data path message for pool workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "batch", rename_all = "snake_case")]
pub enum PoolMessage<T> {
    Data(Vec<T>),
    Stop,
}

/// Message from a pool worker to the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "batch", rename_all = "snake_case")]
pub enum CollectorMessage<R> {
    Data(Vec<R>),
    /// The worker has exited; nothing more will arrive from it
    Stop,
}

/// Per-worker progress counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub idx: usize,
    /// Tasks taken off the queue
    pub loaded: u64,
    /// Tasks whose handler returned
    pub processed: u64,
    /// Set on the final update sent before the worker exits
    pub finished: bool,
}

impl ProgressUpdate {
    pub fn new(idx: usize) -> Self {
        Self {
            idx,
            ..Default::default()
        }
    }
}

/// Worker error types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error_type", rename_all = "snake_case")]
pub enum WorkerError {
    /// A user handler returned an error
    HandlerFailed { error: String },

    /// A user handler panicked
    HandlerPanicked { error: String },

    /// Worker `enter` hook failed
    InitializationFailed { error: String },

    /// A data channel failed underneath the worker
    Transport { error: String },
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::HandlerFailed { error } => write!(f, "Handler failed: {}", error),
            WorkerError::HandlerPanicked { error } => write!(f, "Handler panicked: {}", error),
            WorkerError::InitializationFailed { error } => {
                write!(f, "Worker initialization failed: {}", error)
            }
            WorkerError::Transport { error } => write!(f, "Transport error: {}", error),
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<crate::error::IpcError> for WorkerError {
    fn from(err: crate::error::IpcError) -> Self {
        WorkerError::Transport {
            error: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_small_payload_is_single_chunk() {
        let chunks = ChunkMessage::split(Bytes::from_static(b"hello"), 16);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_single());
        assert_eq!(&chunks[0].body[..], b"hello");
    }

    #[test]
    fn test_split_exact_multiple() {
        let payload = Bytes::from(vec![7u8; 32]);
        let chunks = ChunkMessage::split(payload, 8);
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.chunk_count == 4));
        assert!(chunks.iter().all(|c| c.message_id == chunks[0].message_id));
        assert_eq!(
            chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert!(chunks[3].is_last());
    }

    #[test]
    fn test_split_remainder_goes_to_last_chunk() {
        let payload = Bytes::from((0u8..21).collect::<Vec<_>>());
        let chunks = ChunkMessage::split(payload, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].body.len(), 1);
        assert_eq!(chunks[2].body[0], 20);
    }

    #[test]
    fn test_empty_payload_still_sends_a_chunk() {
        let chunks = ChunkMessage::split(Bytes::new(), 4);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].body.is_empty());
    }

    #[test]
    fn test_manager_command_serialization() {
        let cmd = ManagerCommand::WorkerFailed {
            role: WorkerRole::Reducer,
            idx: 3,
            error: WorkerError::HandlerFailed {
                error: "boom".to_string(),
            },
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"type\":\"worker_failed\""));
        let back: ManagerCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_worker_error_display() {
        let err = WorkerError::HandlerPanicked {
            error: "index out of bounds".to_string(),
        };
        assert_eq!(err.to_string(), "Handler panicked: index out of bounds");
    }
}
