//! Transport and protocol layer for fanfold
//!
//! This crate provides the chunked transport queue that carries task, result
//! and context payloads between units, and the control messages exchanged
//! between units and their coordinators.

pub mod error;
pub mod protocol;
pub mod reassembly;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{
    ChunkMessage, CollectorMessage, ManagerCommand, MapperCommand, PoolMessage, ProgressUpdate,
    ReducerCommand, WorkerError, WorkerRole, WorkerState, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE,
};
pub use reassembly::ReassemblyBuffer;
pub use transport::ChunkedQueue;
