//! Task dispatch policies

use fanfold_config::{DispatchPolicy, WorkerPoolConfig};
use fanfold_ipc::{ChunkedQueue, IpcError, PoolMessage};
use serde::Serialize;
use std::thread;
use std::time::Duration;
use tracing::trace;

use crate::cancel::CancelHandle;

/// Pause between two full sweeps of per-worker queues that were all full
const PROBE_BACKOFF: Duration = Duration::from_millis(1);

/// Sending half of the pool's task queues
pub(crate) enum Dispatcher<T> {
    /// One queue every worker pulls from
    Shared {
        queue: ChunkedQueue<PoolMessage<T>>,
        workers: usize,
    },
    /// One queue per worker, probed round-robin
    PerWorker {
        queues: Vec<ChunkedQueue<PoolMessage<T>>>,
        next: usize,
    },
}

impl<T: Serialize> Dispatcher<T> {
    /// Build the queues for `config`; returns the dispatcher and each
    /// worker's receiving queue, indexed by slot.
    pub(crate) fn new(
        config: &WorkerPoolConfig,
        chunk_size: usize,
    ) -> (Self, Vec<ChunkedQueue<PoolMessage<T>>>) {
        let workers = config.worker_count;
        match config.dispatch {
            DispatchPolicy::SharedQueue => {
                let queue = ChunkedQueue::new(config.shared_queue_capacity(), chunk_size);
                let inputs = (0..workers).map(|_| queue.clone()).collect();
                (Dispatcher::Shared { queue, workers }, inputs)
            }
            DispatchPolicy::PerWorker => {
                let queues: Vec<_> = (0..workers)
                    .map(|_| ChunkedQueue::new(config.queue_capacity, chunk_size))
                    .collect();
                let inputs = queues.clone();
                (Dispatcher::PerWorker { queues, next: 0 }, inputs)
            }
        }
    }

    /// Hand one message to some worker, blocking under backpressure until
    /// `cancel` trips
    pub(crate) fn dispatch(
        &mut self,
        message: &PoolMessage<T>,
        poll: Duration,
        cancel: &CancelHandle,
    ) -> Result<(), IpcError> {
        match self {
            Dispatcher::Shared { queue, .. } => {
                queue.send_while(message, poll, || !cancel.is_cancelled())
            }
            Dispatcher::PerWorker { queues, next } => {
                let count = queues.len();
                loop {
                    for offset in 0..count {
                        let idx = (*next + offset) % count;
                        match queues[idx].try_send(message) {
                            Ok(()) => {
                                *next = (idx + 1) % count;
                                return Ok(());
                            }
                            Err(IpcError::Full) => {}
                            // Fragmented payloads cannot go through try_send
                            Err(IpcError::PayloadTooLarge { .. }) => {
                                *next = (idx + 1) % count;
                                return queues[idx].send_while(message, poll, || {
                                    !cancel.is_cancelled()
                                });
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    if cancel.is_cancelled() {
                        return Err(IpcError::Cancelled);
                    }
                    trace!("every worker queue is full, backing off");
                    thread::sleep(PROBE_BACKOFF);
                }
            }
        }
    }

    /// Send one `Stop` per worker
    pub(crate) fn stop_all(
        &mut self,
        poll: Duration,
        cancel: &CancelHandle,
    ) -> Result<(), IpcError> {
        let keep_going = || !cancel.is_cancelled();
        match self {
            Dispatcher::Shared { queue, workers } => {
                for _ in 0..*workers {
                    queue.send_while(&PoolMessage::Stop, poll, keep_going)?;
                }
            }
            Dispatcher::PerWorker { queues, .. } => {
                for queue in queues.iter() {
                    queue.send_while(&PoolMessage::Stop, poll, keep_going)?;
                }
            }
        }
        Ok(())
    }
}
