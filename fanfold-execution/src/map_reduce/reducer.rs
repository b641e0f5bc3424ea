//! Reducer unit

use crossbeam_channel::{Receiver, RecvTimeoutError, Select, Sender, TryRecvError};
use fanfold_ipc::{
    ChunkedQueue, IpcError, ManagerCommand, ReducerCommand, WorkerError, WorkerRole, WorkerState,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::context::ReducerContext;
use super::ReducerFn;
use crate::cancel::CancelHandle;
use crate::worker::catch_handler;

pub(crate) struct ReducerUnit<I> {
    pub idx: usize,
    pub control: Receiver<ReducerCommand>,
    pub intermediate: ChunkedQueue<I>,
    /// Unbounded lane for contexts handed back by retired reducers
    pub parked: ChunkedQueue<I>,
    pub manager: Sender<ManagerCommand>,
    pub reducer: Arc<ReducerFn<I>>,
    pub poll_interval: Duration,
    pub cancel: CancelHandle,
}

enum ReducerExit {
    /// Killed by the manager; true when a context was pushed back
    Killed(bool),
    Cancelled,
}

impl<I> ReducerUnit<I>
where
    I: Serialize + DeserializeOwned,
{
    pub(crate) fn run(self) {
        let idx = self.idx;
        let report = match self.run_loop() {
            Ok(ReducerExit::Killed(populated)) => {
                debug!(idx, populated, "reducer killed");
                ManagerCommand::ReducerFinished { idx, populated }
            }
            Ok(ReducerExit::Cancelled) => {
                debug!(idx, "reducer cancelled");
                return;
            }
            Err(error) => {
                debug!(idx, %error, "reducer failed");
                ManagerCommand::WorkerFailed {
                    role: WorkerRole::Reducer,
                    idx,
                    error,
                }
            }
        };
        let _ = self.manager.send(report);
    }

    fn run_loop(&self) -> Result<ReducerExit, WorkerError> {
        let mut context = ReducerContext::Empty;
        let mut no_running_mapper = false;

        loop {
            loop {
                match self.control.try_recv() {
                    Ok(ReducerCommand::NoRunningMapper) => no_running_mapper = true,
                    Ok(ReducerCommand::Cancel) => return Ok(ReducerExit::Cancelled),
                    Ok(ReducerCommand::Kill) => return self.push_back(context),
                    Ok(ReducerCommand::Awake) => {
                        warn!(idx = self.idx, "awake received while running, ignored")
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return Err(IpcError::Disconnected.into()),
                }
            }
            if self.cancel.is_cancelled() {
                return Ok(ReducerExit::Cancelled);
            }

            let mut select = Select::new();
            let control = select.recv(&self.control);
            let parked = select.recv(self.parked.frames());
            select.recv(self.intermediate.frames());
            let source = match select.ready_timeout(self.poll_interval) {
                Ok(ready) if ready == control => continue,
                Ok(ready) if ready == parked => Ok(&self.parked),
                Ok(_) => Ok(&self.intermediate),
                Err(timeout) => Err(timeout),
            };
            match source {
                Ok(queue) => match queue.receive_timeout(self.poll_interval) {
                    Ok(item) => {
                        trace!(idx = self.idx, "folding intermediate result");
                        let reducer = &self.reducer;
                        let current = std::mem::take(&mut context);
                        context = catch_handler(|| current.fold(item, |a, b| reducer(a, b)))?;
                    }
                    // Lost the race for the frame, or a peer holds the buffer
                    Err(IpcError::Timeout) => {}
                    Err(e) => return Err(e.into()),
                },
                // Idle; mappers may still be producing
                Err(_) if !no_running_mapper => {}
                Err(_) => match self.wait_for_manager()? {
                    ReducerCommand::Awake => {}
                    ReducerCommand::Kill => return self.push_back(context),
                    ReducerCommand::Cancel => return Ok(ReducerExit::Cancelled),
                    ReducerCommand::NoRunningMapper => {}
                },
            }
        }
    }

    /// Report idle and block for the manager's verdict
    fn wait_for_manager(&self) -> Result<ReducerCommand, WorkerError> {
        trace!(idx = self.idx, state = ?WorkerState::Waiting, "reducer idle");
        self.manager
            .send(ManagerCommand::ReducerWaiting { idx: self.idx })
            .map_err(|_| WorkerError::from(IpcError::Disconnected))?;

        let command = loop {
            match self.control.recv_timeout(self.poll_interval) {
                // Duplicate notification, still waiting
                Ok(ReducerCommand::NoRunningMapper) => {}
                Ok(command) => break command,
                Err(RecvTimeoutError::Timeout) if self.cancel.is_cancelled() => {
                    break ReducerCommand::Cancel;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(IpcError::Disconnected.into());
                }
            }
        };
        trace!(idx = self.idx, ?command, "reducer resumed");
        Ok(command)
    }

    /// Park the context as an ordinary item for a survivor to fold.
    ///
    /// The parking lane is unbounded: survivors read nothing until the
    /// round's `Awake`.
    fn push_back(&self, context: ReducerContext<I>) -> Result<ReducerExit, WorkerError> {
        let Some(context) = context.into_inner() else {
            return Ok(ReducerExit::Killed(false));
        };

        self.parked.send(&context)?;
        Ok(ReducerExit::Killed(true))
    }
}
