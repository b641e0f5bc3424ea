//! Fanfold execution engines
//!
//! Two engines share the submit-then-join [`Paralleller`] contract:
//! [`WorkerPool`], a one-stage pool of stateful workers, and [`MapReduce`],
//! a mapper/reducer pipeline that merges reducer contexts down to a single
//! value. Every unit runs on its own named thread and talks to the others
//! only through channels.

pub mod cancel;
pub mod error;
pub mod map_reduce;
pub mod paralleller;
pub mod pool;
mod slots;
pub mod worker;

// Re-export main types
pub use cancel::CancelHandle;
pub use error::{ExecutionError, ExecutionResult};
pub use map_reduce::{MapReduce, MapReduceStats, ReducerContext};
pub use paralleller::Paralleller;
pub use pool::{PoolStats, ProgressReport, WorkerPool};
pub use worker::{FnWorker, Worker, WorkerContext};

// Re-export protocol types callers match on
pub use fanfold_ipc::{WorkerError, WorkerRole};
