//! Two-stage map-reduce engine
//!
//! Mappers turn tasks into intermediate results; reducers fold intermediate
//! results into local contexts. Once input is exhausted, the manager merges
//! the contexts by repeatedly retiring the larger half of the idle reducers:
//! each retired reducer parks its context on an unbounded lane for a
//! survivor to fold, until a single context remains.
//!
//! The reduce function must be associative and commutative for the result to
//! be deterministic; fold order depends on arrival interleaving.

mod context;
mod manager;
mod mapper;
mod reducer;

pub use context::ReducerContext;

use crossbeam_channel::{unbounded, Receiver, Sender};
use fanfold_config::{MapReduceConfig, TransportConfig, Validatable};
use fanfold_ipc::{ChunkedQueue, IpcError, ManagerCommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancel::CancelHandle;
use crate::error::{ExecutionError, ExecutionResult};
use crate::paralleller::Paralleller;
use crate::worker::{join_unit, spawn_unit};
use manager::{Manager, ManagerReport};
use mapper::MapperUnit;
use reducer::ReducerUnit;

pub(crate) type MapperFn<T, I> = dyn Fn(T) -> anyhow::Result<I> + Send + Sync;
pub(crate) type ReducerFn<I> = dyn Fn(I, I) -> anyhow::Result<I> + Send + Sync;

/// Counters collected over one map-reduce run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapReduceStats {
    pub tasks_added: u64,
    /// Rounds in which the larger half of the idle reducers was retired
    pub halving_rounds: u64,
    /// Reducers retired by halving rounds; always `worker_count - 1`
    pub halving_kills: u64,
    /// Every `ReducerFinished` seen, including the final reducer
    pub reducers_finished: u64,
}

struct Running<T, I> {
    tasks: ChunkedQueue<T>,
    parked: ChunkedQueue<I>,
    manager: JoinHandle<ExecutionResult<ManagerReport>>,
    units: Vec<JoinHandle<()>>,
}

/// Map-reduce engine over thread units
pub struct MapReduce<T, I> {
    config: MapReduceConfig,
    transport: TransportConfig,
    mapper: Arc<MapperFn<T, I>>,
    reducer: Arc<ReducerFn<I>>,
    manager_tx: Sender<ManagerCommand>,
    manager_rx: Option<Receiver<ManagerCommand>>,
    cancel: CancelHandle,
    run: Option<Running<T, I>>,
    tasks_added: u64,
    input_closed: bool,
}

impl<T, I> MapReduce<T, I>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    I: Serialize + DeserializeOwned + Send + 'static,
{
    /// Create an engine with `config.worker_count` mappers and as many reducers
    pub fn new<M, R>(config: MapReduceConfig, mapper: M, reducer: R) -> ExecutionResult<Self>
    where
        M: Fn(T) -> anyhow::Result<I> + Send + Sync + 'static,
        R: Fn(I, I) -> anyhow::Result<I> + Send + Sync + 'static,
    {
        config.validate()?;
        let (manager_tx, manager_rx) = unbounded();
        let cancel = CancelHandle::with_manager(manager_tx.clone());

        Ok(Self {
            config,
            transport: TransportConfig::default(),
            mapper: Arc::new(mapper),
            reducer: Arc::new(reducer),
            manager_tx,
            manager_rx: Some(manager_rx),
            cancel,
            run: None,
            tasks_added: 0,
            input_closed: false,
        })
    }

    /// Use a non-default chunk size for task and intermediate queues
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn config(&self) -> &MapReduceConfig {
        &self.config
    }

    /// Handle that aborts the run from another thread
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the final value and return the run's counters with it.
    ///
    /// The value is `None` when no task was ever added.
    pub fn join_with_stats(mut self) -> ExecutionResult<(Option<I>, MapReduceStats)> {
        if self.run.is_none() {
            return Err(ExecutionError::NotStarted);
        }
        if !self.input_closed {
            // A closed manager channel surfaces through the manager's result
            if let Err(err) = self.task_done() {
                debug!(error = %err, "task_done during join failed");
            }
        }
        let Some(run) = self.run.take() else {
            return Err(ExecutionError::NotStarted);
        };

        let outcome = join_unit(run.manager)
            .and_then(|result| result)
            .and_then(|report| {
                let value = if report.populated {
                    Some(self.receive_final(&run.parked)?)
                } else {
                    None
                };
                Ok((value, report))
            });
        if outcome.is_err() {
            self.cancel.trip();
        }

        for unit in run.units {
            if let Err(err) = join_unit(unit) {
                warn!(error = %err, "unit thread did not exit cleanly");
            }
        }

        let (value, report) = outcome?;
        let stats = MapReduceStats {
            tasks_added: self.tasks_added,
            halving_rounds: report.halving_rounds,
            halving_kills: report.halving_kills,
            reducers_finished: report.reducers_finished,
        };
        info!(
            tasks = stats.tasks_added,
            halving_rounds = stats.halving_rounds,
            "map-reduce joined"
        );
        Ok((value, stats))
    }

    /// The last reducer parked its context before reporting, so it is
    /// already queued
    fn receive_final(&self, parked: &ChunkedQueue<I>) -> ExecutionResult<I> {
        loop {
            match parked.receive_timeout(self.config.poll_interval) {
                Ok(value) => return Ok(value),
                Err(IpcError::Timeout) if !self.cancel.is_cancelled() => continue,
                Err(IpcError::Timeout) => return Err(ExecutionError::Cancelled),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn spawn_units(
        &self,
        tasks: &ChunkedQueue<T>,
        intermediate: &ChunkedQueue<I>,
        parked: &ChunkedQueue<I>,
        units: &mut Vec<JoinHandle<()>>,
    ) -> ExecutionResult<JoinHandle<ExecutionResult<ManagerReport>>> {
        let count = self.config.worker_count;
        let (mapper_tx, mapper_rx): (Vec<_>, Vec<_>) = (0..count).map(|_| unbounded()).unzip();
        let (reducer_tx, reducer_rx): (Vec<_>, Vec<_>) = (0..count).map(|_| unbounded()).unzip();
        let manager_rx = self
            .manager_rx
            .clone()
            .ok_or(ExecutionError::AlreadyStarted)?;

        let manager = Manager::new(manager_rx, mapper_tx, reducer_tx, self.cancel.clone());
        let manager = spawn_unit("fanfold-manager".to_string(), move || manager.run())?;

        for (idx, control) in mapper_rx.into_iter().enumerate() {
            let unit = MapperUnit {
                idx,
                control,
                tasks: tasks.clone(),
                intermediate: intermediate.clone(),
                manager: self.manager_tx.clone(),
                mapper: Arc::clone(&self.mapper),
                poll_interval: self.config.poll_interval,
                cancel: self.cancel.clone(),
            };
            units.push(spawn_unit(format!("fanfold-mapper-{}", idx), move || unit.run())?);
        }

        for (idx, control) in reducer_rx.into_iter().enumerate() {
            let unit = ReducerUnit {
                idx,
                control,
                intermediate: intermediate.clone(),
                parked: parked.clone(),
                manager: self.manager_tx.clone(),
                reducer: Arc::clone(&self.reducer),
                poll_interval: self.config.poll_interval,
                cancel: self.cancel.clone(),
            };
            units.push(spawn_unit(format!("fanfold-reducer-{}", idx), move || unit.run())?);
        }

        Ok(manager)
    }
}

impl<T, I> Paralleller for MapReduce<T, I>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    I: Serialize + DeserializeOwned + Send + 'static,
{
    type Task = T;
    type Output = Option<I>;

    fn start(&mut self) -> ExecutionResult<()> {
        if self.run.is_some() || self.manager_rx.is_none() {
            return Err(ExecutionError::AlreadyStarted);
        }
        self.transport.validate()?;

        let tasks = ChunkedQueue::new(self.config.mapper_queue_capacity, self.transport.chunk_size);
        let intermediate =
            ChunkedQueue::new(self.config.reducer_queue_capacity, self.transport.chunk_size);
        let parked = ChunkedQueue::new(0, self.transport.chunk_size);

        let mut units = Vec::with_capacity(self.config.worker_count * 2);
        let manager = match self.spawn_units(&tasks, &intermediate, &parked, &mut units) {
            Ok(manager) => manager,
            Err(err) => {
                // Units spawned so far see the flag at their next poll
                self.cancel.cancel();
                for unit in units {
                    let _ = join_unit(unit);
                }
                return Err(err);
            }
        };
        self.manager_rx = None;

        info!(
            workers = self.config.worker_count,
            chunk_size = self.transport.chunk_size,
            "map-reduce started"
        );
        self.run = Some(Running {
            tasks,
            parked,
            manager,
            units,
        });
        Ok(())
    }

    fn add_task(&mut self, task: T) -> ExecutionResult<()> {
        let Some(run) = &self.run else {
            return Err(ExecutionError::NotStarted);
        };
        if self.input_closed {
            return Err(ExecutionError::InputClosed);
        }
        if self.cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let cancel = &self.cancel;
        run.tasks
            .send_while(&task, self.config.poll_interval, || !cancel.is_cancelled())?;
        self.tasks_added += 1;
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
        debug!(tasks = self.tasks_added, "no new data");
        self.manager_tx
            .send(ManagerCommand::NoNewData)
            .map_err(|_| ExecutionError::Cancelled)
    }

    fn join(self) -> ExecutionResult<Option<I>> {
        self.join_with_stats().map(|(value, _)| value)
    }
}

impl<T, I> Drop for MapReduce<T, I> {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            debug!("map-reduce dropped while running, cancelling");
            self.cancel.cancel();
            let _ = join_unit(run.manager);
            for unit in run.units {
                let _ = join_unit(unit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(workers: usize) -> MapReduceConfig {
        MapReduceConfig {
            worker_count: workers,
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[test]
    fn test_sum_with_two_workers() {
        let mut engine = MapReduce::new(config(2), |x: u64| Ok(x), |a: u64, b| Ok(a + b)).unwrap();
        engine.start().unwrap();
        engine.map(1..=100u64).unwrap();
        let (value, stats) = engine.join_with_stats().unwrap();
        assert_eq!(value, Some(5050));
        assert_eq!(stats.tasks_added, 100);
        assert_eq!(stats.halving_kills, 1);
    }

    #[test]
    fn test_no_tasks_yields_none() {
        let mut engine = MapReduce::new(config(3), |x: u64| Ok(x), |a: u64, b| Ok(a + b)).unwrap();
        engine.start().unwrap();
        assert_eq!(engine.join().unwrap(), None);
    }

    #[test]
    fn test_reducer_queue_smaller_than_worker_count() {
        let config = MapReduceConfig {
            reducer_queue_capacity: 1,
            ..config(4)
        };
        let mut engine = MapReduce::new(config, |x: u64| Ok(x), |a: u64, b| Ok(a + b)).unwrap();
        engine.start().unwrap();
        engine.map(0..200u64).unwrap();
        assert_eq!(engine.join().unwrap(), Some((0..200u64).sum()));
    }

    #[test]
    fn test_join_before_start_fails() {
        let engine = MapReduce::new(config(1), |x: u64| Ok(x), |a: u64, b| Ok(a + b)).unwrap();
        assert!(matches!(engine.join(), Err(ExecutionError::NotStarted)));
    }
}
