//! Map-reduce manager: termination arbitration and the halving protocol
//!
//! The manager owns all coordination state. It only exchanges control
//! messages; intermediate results and contexts never pass through it.

use crossbeam_channel::{Receiver, Sender};
use fanfold_ipc::{ManagerCommand, MapperCommand, ReducerCommand};
use std::collections::VecDeque;
use tracing::{debug, error, info};

use crate::cancel::CancelHandle;
use crate::error::{ExecutionError, ExecutionResult};
use crate::slots::SlotMask;

/// What the manager observed over a completed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ManagerReport {
    /// The last reducer pushed a context back; the final value is waiting
    /// on the intermediate queue
    pub populated: bool,
    pub halving_rounds: u64,
    pub halving_kills: u64,
    pub reducers_finished: u64,
}

pub(crate) struct Manager {
    commands: Receiver<ManagerCommand>,
    mappers: Vec<Sender<MapperCommand>>,
    reducers: Vec<Sender<ReducerCommand>>,
    running_mappers: SlotMask,
    running_reducers: SlotMask,
    waiting_reducers: SlotMask,
    killing_reducers: SlotMask,
    /// Commands that arrived during a kill round, replayed afterwards
    deferred: VecDeque<ManagerCommand>,
    cancel: CancelHandle,
    report: ManagerReport,
}

impl Manager {
    pub(crate) fn new(
        commands: Receiver<ManagerCommand>,
        mappers: Vec<Sender<MapperCommand>>,
        reducers: Vec<Sender<ReducerCommand>>,
        cancel: CancelHandle,
    ) -> Self {
        let mapper_count = mappers.len();
        let reducer_count = reducers.len();
        Self {
            commands,
            mappers,
            reducers,
            running_mappers: SlotMask::full(mapper_count),
            running_reducers: SlotMask::full(reducer_count),
            waiting_reducers: SlotMask::empty(reducer_count),
            killing_reducers: SlotMask::empty(reducer_count),
            deferred: VecDeque::new(),
            cancel,
            report: ManagerReport::default(),
        }
    }

    /// Run to completion. On any fatal condition every unit is told to
    /// cancel before the error is returned.
    pub(crate) fn run(mut self) -> ExecutionResult<ManagerReport> {
        match self.event_loop() {
            Ok(()) => {
                info!(
                    halving_rounds = self.report.halving_rounds,
                    halving_kills = self.report.halving_kills,
                    populated = self.report.populated,
                    "map-reduce manager finished"
                );
                Ok(self.report)
            }
            Err(err) => {
                if err.is_cancelled() {
                    info!("map-reduce run cancelled");
                } else {
                    error!(error = %err, "map-reduce run failed");
                }
                self.abort();
                Err(err)
            }
        }
    }

    fn event_loop(&mut self) -> ExecutionResult<()> {
        loop {
            let command = match self.deferred.pop_front() {
                Some(command) => command,
                None => self.recv()?,
            };

            match command {
                ManagerCommand::NoNewData => {
                    debug!("no new data, notifying mappers");
                    for (idx, mapper) in self.mappers.iter().enumerate() {
                        if self.running_mappers.contains(idx) {
                            send_control(mapper, MapperCommand::NoMoreInput, "mapper", idx)?;
                        }
                    }
                }
                ManagerCommand::MapperFinished { idx } => {
                    if !self.running_mappers.contains(idx) {
                        return Err(violation(format!(
                            "MapperFinished from mapper #{} which is not running",
                            idx
                        )));
                    }
                    self.running_mappers.clear(idx);
                    debug!(idx, remaining = self.running_mappers.count(), "mapper finished");
                    if self.running_mappers.is_empty() {
                        debug!("no running mapper, notifying reducers");
                        for idx in self.running_reducers.iter() {
                            send_control(
                                &self.reducers[idx],
                                ReducerCommand::NoRunningMapper,
                                "reducer",
                                idx,
                            )?;
                        }
                    }
                }
                ManagerCommand::ReducerWaiting { idx } => {
                    if self.reducer_waiting(idx)? {
                        return Ok(());
                    }
                }
                ManagerCommand::ReducerFinished { idx, .. } => {
                    return Err(violation(format!(
                        "ReducerFinished from reducer #{} outside a kill round",
                        idx
                    )));
                }
                ManagerCommand::WorkerFailed { role, idx, error } => {
                    return Err(ExecutionError::WorkerFailed { role, idx, error });
                }
                ManagerCommand::Cancel => return Err(ExecutionError::Cancelled),
            }
        }
    }

    /// Returns true once the final reducer has been retired
    fn reducer_waiting(&mut self, idx: usize) -> ExecutionResult<bool> {
        if !self.running_reducers.contains(idx) {
            return Err(violation(format!(
                "ReducerWaiting from reducer #{} which is not running",
                idx
            )));
        }
        if !self.running_mappers.is_empty() {
            return Err(violation(format!(
                "reducer #{} went idle while {} mappers are running",
                idx,
                self.running_mappers.count()
            )));
        }
        self.waiting_reducers.set(idx);

        let running = self.running_reducers.count();
        let waiting = self.running_reducers.count_common(&self.waiting_reducers);
        debug!(idx, running, waiting, "reducer waiting");

        // Only one reducer and nothing left to fold: its context is the result
        if running == 1 {
            let last = idx;
            send_control(&self.reducers[last], ReducerCommand::Kill, "reducer", last)?;
            self.killing_reducers.set(last);
            self.report.populated = self.await_kills()?;
            return Ok(true);
        }

        if waiting == running {
            self.halving_round(running)?;
        }
        Ok(false)
    }

    /// Retire the larger half of the (all idle) running reducers, then wake
    /// the survivors to fold the contexts that were pushed back
    fn halving_round(&mut self, running: usize) -> ExecutionResult<()> {
        self.waiting_reducers.reset();
        let kill_count = running - running / 2;
        let victims: Vec<usize> = self.running_reducers.iter().take(kill_count).collect();

        self.report.halving_rounds += 1;
        info!(
            round = self.report.halving_rounds,
            running,
            killing = kill_count,
            "halving reducers"
        );

        for idx in victims {
            send_control(&self.reducers[idx], ReducerCommand::Kill, "reducer", idx)?;
            self.killing_reducers.set(idx);
        }
        self.await_kills()?;
        self.report.halving_kills += kill_count as u64;

        for idx in self.running_reducers.iter() {
            debug!(idx, "awaking reducer");
            send_control(&self.reducers[idx], ReducerCommand::Awake, "reducer", idx)?;
        }
        Ok(())
    }

    /// Block until every reducer marked for killing reports back. Other
    /// commands are deferred, except failures and cancellation.
    fn await_kills(&mut self) -> ExecutionResult<bool> {
        let mut populated = false;
        while !self.killing_reducers.is_empty() {
            match self.recv()? {
                ManagerCommand::ReducerFinished {
                    idx,
                    populated: pushed_back,
                } => {
                    if !self.killing_reducers.contains(idx) {
                        return Err(violation(format!(
                            "ReducerFinished from reducer #{} which was not asked to exit",
                            idx
                        )));
                    }
                    self.killing_reducers.clear(idx);
                    self.running_reducers.clear(idx);
                    self.report.reducers_finished += 1;
                    populated = pushed_back;
                    debug!(idx, pushed_back, "reducer killed");
                }
                ManagerCommand::WorkerFailed { role, idx, error } => {
                    return Err(ExecutionError::WorkerFailed { role, idx, error });
                }
                ManagerCommand::Cancel => return Err(ExecutionError::Cancelled),
                other => self.deferred.push_back(other),
            }
        }
        Ok(populated)
    }

    fn recv(&self) -> ExecutionResult<ManagerCommand> {
        self.commands
            .recv()
            .map_err(|_| violation("every manager command sender is gone".to_string()))
    }

    /// Tell every unit to stop. Units that already exited are skipped.
    fn abort(&self) {
        self.cancel.trip();
        for mapper in &self.mappers {
            let _ = mapper.send(MapperCommand::Cancel);
        }
        for reducer in &self.reducers {
            let _ = reducer.send(ReducerCommand::Cancel);
        }
    }
}

fn send_control<C>(channel: &Sender<C>, command: C, role: &str, idx: usize) -> ExecutionResult<()> {
    channel
        .send(command)
        .map_err(|_| violation(format!("{} #{} control channel is closed", role, idx)))
}

fn violation(message: String) -> ExecutionError {
    ExecutionError::ProtocolViolation(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use fanfold_ipc::{WorkerError, WorkerRole};
    use std::thread;

    struct Harness {
        manager_tx: Sender<ManagerCommand>,
        mapper_rx: Vec<Receiver<MapperCommand>>,
        reducer_rx: Vec<Receiver<ReducerCommand>>,
        handle: thread::JoinHandle<ExecutionResult<ManagerReport>>,
    }

    fn harness(mappers: usize, reducers: usize) -> Harness {
        let (manager_tx, manager_rx) = unbounded();
        let (mapper_tx, mapper_rx): (Vec<_>, Vec<_>) = (0..mappers).map(|_| unbounded()).unzip();
        let (reducer_tx, reducer_rx): (Vec<_>, Vec<_>) =
            (0..reducers).map(|_| unbounded()).unzip();
        let manager = Manager::new(manager_rx, mapper_tx, reducer_tx, CancelHandle::new());
        let handle = thread::spawn(move || manager.run());
        Harness {
            manager_tx,
            mapper_rx,
            reducer_rx,
            handle,
        }
    }

    impl Harness {
        fn send(&self, command: ManagerCommand) {
            self.manager_tx.send(command).unwrap();
        }

        fn finish_mappers(&self) {
            self.send(ManagerCommand::NoNewData);
            for (idx, rx) in self.mapper_rx.iter().enumerate() {
                assert_eq!(rx.recv().unwrap(), MapperCommand::NoMoreInput);
                self.send(ManagerCommand::MapperFinished { idx });
            }
            for rx in &self.reducer_rx {
                assert_eq!(rx.recv().unwrap(), ReducerCommand::NoRunningMapper);
            }
        }
    }

    #[test]
    fn test_single_reducer_is_killed_and_run_ends() {
        let h = harness(1, 1);
        h.finish_mappers();
        h.send(ManagerCommand::ReducerWaiting { idx: 0 });
        assert_eq!(h.reducer_rx[0].recv().unwrap(), ReducerCommand::Kill);
        h.send(ManagerCommand::ReducerFinished {
            idx: 0,
            populated: true,
        });

        let report = h.handle.join().unwrap().unwrap();
        assert!(report.populated);
        assert_eq!(report.halving_rounds, 0);
        assert_eq!(report.halving_kills, 0);
        assert_eq!(report.reducers_finished, 1);
    }

    #[test]
    fn test_halving_kills_larger_half_then_awakes_rest() {
        let h = harness(1, 3);
        h.finish_mappers();

        for idx in 0..3 {
            h.send(ManagerCommand::ReducerWaiting { idx });
        }
        // 3 - 3/2 = 2 killed
        assert_eq!(h.reducer_rx[0].recv().unwrap(), ReducerCommand::Kill);
        assert_eq!(h.reducer_rx[1].recv().unwrap(), ReducerCommand::Kill);
        h.send(ManagerCommand::ReducerFinished {
            idx: 1,
            populated: true,
        });
        h.send(ManagerCommand::ReducerFinished {
            idx: 0,
            populated: true,
        });
        assert_eq!(h.reducer_rx[2].recv().unwrap(), ReducerCommand::Awake);

        h.send(ManagerCommand::ReducerWaiting { idx: 2 });
        assert_eq!(h.reducer_rx[2].recv().unwrap(), ReducerCommand::Kill);
        h.send(ManagerCommand::ReducerFinished {
            idx: 2,
            populated: true,
        });

        let report = h.handle.join().unwrap().unwrap();
        assert_eq!(report.halving_rounds, 1);
        assert_eq!(report.halving_kills, 2);
        assert_eq!(report.reducers_finished, 3);
    }

    #[test]
    fn test_partial_waiting_takes_no_action() {
        let h = harness(1, 2);
        h.finish_mappers();
        h.send(ManagerCommand::ReducerWaiting { idx: 0 });
        h.send(ManagerCommand::Cancel);

        let err = h.handle.join().unwrap().unwrap_err();
        assert!(err.is_cancelled());
        // Only the cancel broadcast reached the reducers
        assert_eq!(h.reducer_rx[0].recv().unwrap(), ReducerCommand::Cancel);
        assert_eq!(h.reducer_rx[1].recv().unwrap(), ReducerCommand::Cancel);
    }

    #[test]
    fn test_unexpected_finish_is_a_violation() {
        let h = harness(1, 2);
        h.send(ManagerCommand::ReducerFinished {
            idx: 1,
            populated: false,
        });
        let err = h.handle.join().unwrap().unwrap_err();
        assert!(matches!(err, ExecutionError::ProtocolViolation(_)));
        assert_eq!(h.mapper_rx[0].recv().unwrap(), MapperCommand::Cancel);
    }

    #[test]
    fn test_worker_failure_is_fatal() {
        let h = harness(2, 2);
        h.send(ManagerCommand::WorkerFailed {
            role: WorkerRole::Mapper,
            idx: 1,
            error: WorkerError::HandlerFailed {
                error: "bad row".to_string(),
            },
        });
        let err = h.handle.join().unwrap().unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::WorkerFailed {
                role: WorkerRole::Mapper,
                idx: 1,
                ..
            }
        ));
        for rx in &h.reducer_rx {
            assert_eq!(rx.recv().unwrap(), ReducerCommand::Cancel);
        }
    }
}
