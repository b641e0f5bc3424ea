//! Pool worker unit

use crossbeam_channel::{Sender, TrySendError};
use fanfold_ipc::{
    ChunkedQueue, CollectorMessage, IpcError, PoolMessage, ProgressUpdate, WorkerError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::WorkerFactory;
use crate::cancel::CancelHandle;
use crate::worker::{catch_handler, ExitGuard, Worker, WorkerContext};

/// A worker that stopped on a fault
#[derive(Debug, Clone)]
pub(crate) struct WorkerFailure {
    pub idx: usize,
    pub error: WorkerError,
}

pub(crate) struct WorkerUnit<W: Worker> {
    pub ctx: WorkerContext,
    pub factory: Arc<WorkerFactory<W>>,
    pub tasks: ChunkedQueue<PoolMessage<W::Task>>,
    pub results: Option<ChunkedQueue<CollectorMessage<W::Output>>>,
    pub progress: Option<Sender<ProgressUpdate>>,
    pub events: Sender<WorkerFailure>,
    pub poll_interval: Duration,
    pub cancel: CancelHandle,
}

enum WorkerExit {
    Stopped,
    Cancelled,
}

impl<W> WorkerUnit<W>
where
    W: Worker,
    W::Task: DeserializeOwned,
    W::Output: Serialize,
{
    /// Run to completion and return the failure, if any
    pub(crate) fn run(self) -> Result<u64, WorkerFailure> {
        let idx = self.ctx.idx;
        let mut counters = ProgressUpdate::new(idx);

        match self.run_loop(&mut counters) {
            Ok(WorkerExit::Stopped) => {
                debug!(idx, processed = counters.processed, "worker stopped");
                Ok(counters.processed)
            }
            Ok(WorkerExit::Cancelled) => {
                debug!(idx, processed = counters.processed, "worker cancelled");
                Ok(counters.processed)
            }
            Err(error) => {
                debug!(idx, %error, "worker failed");
                let failure = WorkerFailure { idx, error };
                self.cancel.trip();
                let _ = self.events.send(failure.clone());
                Err(failure)
            }
        }
    }

    fn run_loop(&self, counters: &mut ProgressUpdate) -> Result<WorkerExit, WorkerError> {
        let factory = &self.factory;
        let ctx = self.ctx;
        let worker = catch_handler(|| Ok(factory(ctx)))
            .map_err(|e| WorkerError::InitializationFailed { error: e.to_string() })?;
        // `exit` runs when the guard drops, after the stop acknowledgment
        let mut worker = ExitGuard::enter(worker, ctx)?;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(WorkerExit::Cancelled);
            }
            let batch = match self.tasks.receive_timeout(self.poll_interval) {
                Ok(PoolMessage::Data(batch)) => batch,
                Ok(PoolMessage::Stop) => break,
                Err(IpcError::Timeout) => continue,
                Err(e) => return Err(e.into()),
            };

            trace!(idx = ctx.idx, size = batch.len(), "processing batch");
            counters.loaded += batch.len() as u64;
            let capacity = if self.results.is_some() { batch.len() } else { 0 };
            let mut outputs = Vec::with_capacity(capacity);
            for task in batch {
                let output = catch_handler(|| worker.process(task))?;
                counters.processed += 1;
                if self.results.is_some() {
                    outputs.push(output);
                }
            }

            if !self.forward(CollectorMessage::Data(outputs))? {
                return Ok(WorkerExit::Cancelled);
            }
            self.report(counters);
        }

        self.report_final(counters);
        if !self.forward(CollectorMessage::Stop)? {
            return Ok(WorkerExit::Cancelled);
        }
        Ok(WorkerExit::Stopped)
    }

    /// Pass a message to the collector, if there is one; false once cancelled
    fn forward(&self, message: CollectorMessage<W::Output>) -> Result<bool, WorkerError> {
        let Some(results) = &self.results else {
            return Ok(true);
        };
        let cancel = &self.cancel;
        match results.send_while(&message, self.poll_interval, || !cancel.is_cancelled()) {
            Ok(()) => Ok(true),
            Err(IpcError::Cancelled) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Stale updates are dropped when the progress slot is occupied
    fn report(&self, counters: &ProgressUpdate) {
        if let Some(progress) = &self.progress {
            match progress.try_send(*counters) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => {
                    trace!(idx = self.ctx.idx, "progress consumer gone");
                }
            }
        }
    }

    fn report_final(&self, counters: &mut ProgressUpdate) {
        counters.finished = true;
        if let Some(progress) = &self.progress {
            let _ = progress.send(*counters);
        }
    }
}
