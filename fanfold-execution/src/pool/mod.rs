//! One-stage worker pool
//!
//! Tasks are batched on the caller's side and dispatched either through one
//! shared queue or through per-worker queues probed round-robin. Each worker
//! runs its `enter`/`process`/`exit` lifecycle; results optionally stream to a
//! collector thread and counters to a progress thread.

mod collector;
mod dispatch;
mod progress;
mod runner;

pub use progress::ProgressReport;

use crossbeam_channel::{bounded, unbounded, Receiver};
use fanfold_config::{TransportConfig, Validatable, WorkerPoolConfig};
use fanfold_ipc::{ChunkedQueue, PoolMessage, WorkerRole};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info};

use crate::cancel::CancelHandle;
use crate::error::{ExecutionError, ExecutionResult};
use crate::paralleller::Paralleller;
use crate::worker::{join_unit, spawn_unit, FnWorker, Worker, WorkerContext};
use collector::{run_collector, CollectorFn};
use dispatch::Dispatcher;
use progress::{ProgressFn, ProgressUnit};
use runner::{WorkerFailure, WorkerUnit};

pub(crate) type WorkerFactory<W> = dyn Fn(WorkerContext) -> W + Send + Sync;

/// Counters of a finished pool run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub tasks_added: u64,
    pub tasks_processed: u64,
    /// Results handed to the collector callback; 0 without a collector
    pub results_collected: u64,
}

struct Running<W: Worker> {
    dispatcher: Dispatcher<W::Task>,
    failures: Receiver<WorkerFailure>,
    workers: Vec<JoinHandle<Result<u64, WorkerFailure>>>,
    collector: Option<JoinHandle<ExecutionResult<u64>>>,
    progress: Option<JoinHandle<ExecutionResult<()>>>,
}

/// Pool of stateful workers built by a factory, one per slot
pub struct WorkerPool<W: Worker> {
    config: WorkerPoolConfig,
    transport: TransportConfig,
    factory: Arc<WorkerFactory<W>>,
    collector: Option<CollectorFn<W::Output>>,
    progress: Option<ProgressFn>,
    total: Option<u64>,
    cancel: CancelHandle,
    run: Option<Running<W>>,
    started: bool,
    batch: Vec<W::Task>,
    added: Arc<AtomicU64>,
    input_closed: bool,
}

impl<F, T, R> WorkerPool<FnWorker<F, T, R>>
where
    F: FnMut(T) -> anyhow::Result<R> + Clone + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
{
    /// Pool whose workers each run a clone of `handler`
    pub fn from_fn(config: WorkerPoolConfig, handler: F) -> ExecutionResult<Self> {
        Self::new(config, move |_ctx| FnWorker::new(handler.clone()))
    }
}

impl<W> WorkerPool<W>
where
    W: Worker,
    W::Task: Serialize + DeserializeOwned + Send,
    W::Output: Serialize + DeserializeOwned + Send,
{
    /// Create a pool of `config.worker_count` workers built by `factory`
    pub fn new<F>(config: WorkerPoolConfig, factory: F) -> ExecutionResult<Self>
    where
        F: Fn(WorkerContext) -> W + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self {
            batch: Vec::with_capacity(config.batch_size),
            config,
            transport: TransportConfig::default(),
            factory: Arc::new(factory),
            collector: None,
            progress: None,
            total: None,
            cancel: CancelHandle::new(),
            run: None,
            started: false,
            added: Arc::new(AtomicU64::new(0)),
            input_closed: false,
        })
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Stream every result to `callback` on a collector thread
    pub fn with_collector<C>(mut self, callback: C) -> Self
    where
        C: FnMut(W::Output) + Send + 'static,
    {
        self.collector = Some(Box::new(callback));
        self
    }

    /// Report pool-wide progress to `callback` on a progress thread
    pub fn with_progress<P>(mut self, callback: P) -> Self
    where
        P: FnMut(&ProgressReport) + Send + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Expected number of tasks, passed through to progress reports
    pub fn with_progress_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for every worker to exit and return the run's counters
    pub fn join_with_stats(mut self) -> ExecutionResult<PoolStats> {
        if self.run.is_none() {
            return Err(ExecutionError::NotStarted);
        }
        if !self.input_closed {
            if let Err(err) = self.task_done() {
                debug!(error = %err, "task_done during join failed");
                // Workers would otherwise wait for a stop that never comes
                self.cancel.trip();
            }
        }
        let Some(run) = self.run.take() else {
            return Err(ExecutionError::NotStarted);
        };

        let mut first_error: Option<ExecutionError> = None;
        let mut processed = 0u64;
        for handle in run.workers {
            match join_unit(handle) {
                Ok(Ok(count)) => processed += count,
                Ok(Err(WorkerFailure { idx, error })) => {
                    first_error.get_or_insert(ExecutionError::WorkerFailed {
                        role: WorkerRole::Worker,
                        idx,
                        error,
                    });
                }
                Err(err) => {
                    self.cancel.trip();
                    first_error.get_or_insert(err);
                }
            }
        }

        let mut collected = 0u64;
        if let Some(handle) = run.collector {
            match join_unit(handle).and_then(|result| result) {
                Ok(count) => collected = count,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(handle) = run.progress {
            if let Err(err) = join_unit(handle).and_then(|result| result) {
                first_error.get_or_insert(err);
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if self.cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let stats = PoolStats {
            tasks_added: self.added.load(Ordering::Relaxed),
            tasks_processed: processed,
            results_collected: collected,
        };
        info!(
            added = stats.tasks_added,
            processed = stats.tasks_processed,
            collected = stats.results_collected,
            "worker pool joined"
        );
        Ok(stats)
    }

    /// Send the buffered batch, if any
    fn flush(&mut self) -> ExecutionResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let Some(run) = self.run.as_mut() else {
            return Err(ExecutionError::NotStarted);
        };
        let message = PoolMessage::Data(mem::replace(
            &mut self.batch,
            Vec::with_capacity(self.config.batch_size),
        ));
        let result = run
            .dispatcher
            .dispatch(&message, self.config.poll_interval, &self.cancel);
        result.map_err(|e| self.explain(e.into()))
    }

    /// Replace a bare cancellation with the worker failure that caused it
    fn explain(&self, err: ExecutionError) -> ExecutionError {
        if !err.is_cancelled() {
            return err;
        }
        match self.run.as_ref().and_then(|run| run.failures.try_recv().ok()) {
            Some(WorkerFailure { idx, error }) => ExecutionError::WorkerFailed {
                role: WorkerRole::Worker,
                idx,
                error,
            },
            None => err,
        }
    }

    fn spawn_units(
        &mut self,
        running: &mut Vec<JoinHandle<Result<u64, WorkerFailure>>>,
    ) -> ExecutionResult<Running<W>> {
        let count = self.config.worker_count;
        let chunk_size = self.transport.chunk_size;
        let poll_interval = self.config.poll_interval;
        let (dispatcher, inputs) = Dispatcher::new(&self.config, chunk_size);
        let (events_tx, failures) = unbounded();

        let (result_queues, collector) = match self.collector.take() {
            Some(callback) => {
                let queues: Vec<ChunkedQueue<_>> = (0..count)
                    .map(|_| ChunkedQueue::new(self.config.collector_queue_capacity, chunk_size))
                    .collect();
                let consumer = queues.clone();
                let cancel = self.cancel.clone();
                let handle = spawn_unit("fanfold-collector".to_string(), move || {
                    run_collector(consumer, callback, cancel)
                })?;
                (queues.into_iter().map(Some).collect(), Some(handle))
            }
            None => ((0..count).map(|_| None).collect::<Vec<_>>(), None),
        };

        let (progress_senders, progress) = match self.progress.take() {
            Some(callback) => {
                let (senders, receivers): (Vec<_>, Vec<_>) = (0..count).map(|_| bounded(1)).unzip();
                let unit = ProgressUnit {
                    receivers,
                    added: Arc::clone(&self.added),
                    total: self.total,
                    callback,
                    poll_interval,
                    cancel: self.cancel.clone(),
                };
                let handle = spawn_unit("fanfold-progress".to_string(), move || unit.run())?;
                (senders.into_iter().map(Some).collect(), Some(handle))
            }
            None => ((0..count).map(|_| None).collect::<Vec<_>>(), None),
        };

        let mut run = Running {
            dispatcher,
            failures,
            workers: Vec::new(),
            collector,
            progress,
        };

        for (idx, ((tasks, results), progress)) in inputs
            .into_iter()
            .zip(result_queues)
            .zip(progress_senders)
            .enumerate()
        {
            let unit = WorkerUnit {
                ctx: WorkerContext {
                    idx,
                    worker_count: count,
                },
                factory: Arc::clone(&self.factory),
                tasks,
                results,
                progress,
                events: events_tx.clone(),
                poll_interval,
                cancel: self.cancel.clone(),
            };
            match spawn_unit(format!("fanfold-worker-{}", idx), move || unit.run()) {
                Ok(handle) => running.push(handle),
                Err(err) => {
                    // Collector and progress threads exit on the flag
                    self.cancel.trip();
                    if let Some(handle) = run.collector.take() {
                        let _ = join_unit(handle);
                    }
                    if let Some(handle) = run.progress.take() {
                        let _ = join_unit(handle);
                    }
                    return Err(err);
                }
            }
        }
        run.workers = mem::take(running);
        Ok(run)
    }
}

impl<W> Paralleller for WorkerPool<W>
where
    W: Worker,
    W::Task: Serialize + DeserializeOwned + Send,
    W::Output: Serialize + DeserializeOwned + Send,
{
    type Task = W::Task;
    type Output = PoolStats;

    fn start(&mut self) -> ExecutionResult<()> {
        if self.started {
            return Err(ExecutionError::AlreadyStarted);
        }
        self.transport.validate()?;
        self.started = true;

        let mut workers = Vec::with_capacity(self.config.worker_count);
        match self.spawn_units(&mut workers) {
            Ok(run) => {
                info!(
                    workers = self.config.worker_count,
                    batch_size = self.config.batch_size,
                    dispatch = %self.config.dispatch,
                    "worker pool started"
                );
                self.run = Some(run);
                Ok(())
            }
            Err(err) => {
                self.cancel.trip();
                for handle in workers {
                    let _ = join_unit(handle);
                }
                Err(err)
            }
        }
    }

    fn add_task(&mut self, task: W::Task) -> ExecutionResult<()> {
        if self.run.is_none() {
            return Err(ExecutionError::NotStarted);
        }
        if self.input_closed {
            return Err(ExecutionError::InputClosed);
        }
        if self.cancel.is_cancelled() {
            return Err(self.explain(ExecutionError::Cancelled));
        }

        self.batch.push(task);
        self.added.fetch_add(1, Ordering::Relaxed);
        if self.batch.len() >= self.config.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn task_done(&mut self) -> ExecutionResult<()> {
        if self.run.is_none() {
            return Err(ExecutionError::NotStarted);
        }
        if self.input_closed {
            return Ok(());
        }
        self.input_closed = true;
        self.flush()?;

        let poll_interval = self.config.poll_interval;
        let result = match self.run.as_mut() {
            Some(run) => run.dispatcher.stop_all(poll_interval, &self.cancel),
            None => return Err(ExecutionError::NotStarted),
        };
        debug!(tasks = self.added.load(Ordering::Relaxed), "stop sent to every worker");
        result.map_err(|e| self.explain(e.into()))
    }

    fn join(self) -> ExecutionResult<PoolStats> {
        self.join_with_stats()
    }
}

impl<W: Worker> Drop for WorkerPool<W> {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            debug!("worker pool dropped while running, cancelling");
            self.cancel.trip();
            for handle in run.workers {
                let _ = join_unit(handle);
            }
            if let Some(handle) = run.collector {
                let _ = join_unit(handle);
            }
            if let Some(handle) = run.progress {
                let _ = join_unit(handle);
            }
        }
    }
}
