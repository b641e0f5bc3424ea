//! Result collector thread

use fanfold_ipc::{ChunkedQueue, CollectorMessage};
use serde::de::DeserializeOwned;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cancel::CancelHandle;
use crate::error::{ExecutionError, ExecutionResult};
use crate::worker::catch_handler;

/// Sleep after a sweep that found nothing
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

pub(crate) type CollectorFn<R> = Box<dyn FnMut(R) + Send>;

/// Rotate over the workers' result queues until every worker has
/// acknowledged its stop, invoking `callback` per result. Returns the number
/// of results delivered.
pub(crate) fn run_collector<R: DeserializeOwned>(
    queues: Vec<ChunkedQueue<CollectorMessage<R>>>,
    mut callback: CollectorFn<R>,
    cancel: CancelHandle,
) -> ExecutionResult<u64> {
    let mut finished = vec![false; queues.len()];
    let mut remaining = queues.len();
    let mut collected = 0u64;

    while remaining > 0 {
        if cancel.is_cancelled() {
            debug!(collected, "collector cancelled");
            return Ok(collected);
        }

        let mut idle = true;
        for (idx, queue) in queues.iter().enumerate() {
            if finished[idx] {
                continue;
            }
            match queue.try_receive() {
                Ok(Some(CollectorMessage::Data(items))) => {
                    idle = false;
                    for item in items {
                        if let Err(error) = catch_handler(|| {
                            callback(item);
                            Ok(())
                        }) {
                            cancel.trip();
                            return Err(ExecutionError::ThreadPanicked(format!(
                                "fanfold-collector: {}",
                                error
                            )));
                        }
                        collected += 1;
                    }
                }
                Ok(Some(CollectorMessage::Stop)) => {
                    idle = false;
                    finished[idx] = true;
                    remaining -= 1;
                    debug!(idx, remaining, "worker acknowledged stop");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(idx, error = %e, "collector receive failed");
                    cancel.trip();
                    return Err(e.into());
                }
            }
        }
        if idle {
            thread::sleep(IDLE_BACKOFF);
        }
    }

    Ok(collected)
}
