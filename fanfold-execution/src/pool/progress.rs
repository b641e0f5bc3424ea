//! Progress aggregation thread

use crossbeam_channel::{Receiver, Select, TryRecvError};
use fanfold_ipc::ProgressUpdate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cancel::CancelHandle;
use crate::error::{ExecutionError, ExecutionResult};
use crate::worker::catch_handler;

/// Pool-wide progress, summed over every worker's latest update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressReport {
    /// Tasks accepted by `add_task`
    pub added: u64,
    pub loaded: u64,
    pub processed: u64,
    /// Expected task count, when the caller supplied one
    pub total: Option<u64>,
}

pub(crate) type ProgressFn = Box<dyn FnMut(&ProgressReport) + Send>;

pub(crate) struct ProgressUnit {
    pub receivers: Vec<Receiver<ProgressUpdate>>,
    pub added: Arc<AtomicU64>,
    pub total: Option<u64>,
    pub callback: ProgressFn,
    pub poll_interval: Duration,
    pub cancel: CancelHandle,
}

impl ProgressUnit {
    /// Consume updates until every worker has sent its final one or hung up.
    ///
    /// A panicking callback trips the cancel flag and fails the run.
    pub(crate) fn run(mut self) -> ExecutionResult<()> {
        let mut latest: Vec<ProgressUpdate> =
            (0..self.receivers.len()).map(ProgressUpdate::new).collect();
        let mut open = vec![true; self.receivers.len()];

        while open.iter().any(|o| *o) {
            let slots: Vec<usize> = (0..self.receivers.len()).filter(|i| open[*i]).collect();
            let mut select = Select::new();
            for &idx in &slots {
                select.recv(&self.receivers[idx]);
            }

            let idx = match select.ready_timeout(self.poll_interval) {
                Ok(ready) => slots[ready],
                Err(_) if self.cancel.is_cancelled() => {
                    debug!("progress cancelled");
                    return Ok(());
                }
                Err(_) => continue,
            };

            match self.receivers[idx].try_recv() {
                Ok(update) => {
                    latest[idx] = update;
                    if update.finished {
                        open[idx] = false;
                    }
                }
                Err(TryRecvError::Empty) => continue,
                Err(TryRecvError::Disconnected) => {
                    open[idx] = false;
                    continue;
                }
            }

            let report = ProgressReport {
                added: self.added.load(Ordering::Relaxed),
                loaded: latest.iter().map(|u| u.loaded).sum(),
                processed: latest.iter().map(|u| u.processed).sum(),
                total: self.total,
            };
            let callback = &mut self.callback;
            if let Err(error) = catch_handler(|| {
                callback(&report);
                Ok(())
            }) {
                self.cancel.trip();
                return Err(ExecutionError::ThreadPanicked(format!(
                    "fanfold-progress: {}",
                    error
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;

    #[test]
    fn test_final_report_sums_every_worker() {
        let (tx_a, rx_a) = bounded(1);
        let (tx_b, rx_b) = bounded(1);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);

        let unit = ProgressUnit {
            receivers: vec![rx_a, rx_b],
            added: Arc::new(AtomicU64::new(7)),
            total: Some(7),
            callback: Box::new(move |r| sink.lock().unwrap().push(*r)),
            poll_interval: Duration::from_millis(10),
            cancel: CancelHandle::new(),
        };
        let handle = std::thread::spawn(move || unit.run());

        tx_a.send(ProgressUpdate {
            idx: 0,
            loaded: 3,
            processed: 3,
            finished: true,
        })
        .unwrap();
        tx_b.send(ProgressUpdate {
            idx: 1,
            loaded: 4,
            processed: 4,
            finished: true,
        })
        .unwrap();
        handle.join().unwrap().unwrap();

        let last = *reports.lock().unwrap().last().unwrap();
        assert_eq!(
            last,
            ProgressReport {
                added: 7,
                loaded: 7,
                processed: 7,
                total: Some(7),
            }
        );
    }

    #[test]
    fn test_callback_panic_trips_cancel() {
        let (tx, rx) = bounded(1);
        let cancel = CancelHandle::new();
        let unit = ProgressUnit {
            receivers: vec![rx],
            added: Arc::new(AtomicU64::new(1)),
            total: None,
            callback: Box::new(|_| panic!("display went away")),
            poll_interval: Duration::from_millis(10),
            cancel: cancel.clone(),
        };
        tx.send(ProgressUpdate {
            idx: 0,
            loaded: 1,
            processed: 0,
            finished: false,
        })
        .unwrap();

        let err = unit.run().unwrap_err();
        assert!(matches!(err, ExecutionError::ThreadPanicked(_)));
        assert!(err.to_string().contains("display went away"));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_hung_up_worker_closes_its_slot() {
        let (tx, rx) = bounded::<ProgressUpdate>(1);
        drop(tx);
        let unit = ProgressUnit {
            receivers: vec![rx],
            added: Arc::new(AtomicU64::new(0)),
            total: None,
            callback: Box::new(|_| {}),
            poll_interval: Duration::from_millis(10),
            cancel: CancelHandle::new(),
        };
        unit.run().unwrap();
    }
}
