//! Mapper unit

use crossbeam_channel::{Receiver, Select, Sender, TryRecvError};
use fanfold_ipc::{
    ChunkedQueue, IpcError, ManagerCommand, MapperCommand, WorkerError, WorkerRole, WorkerState,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::MapperFn;
use crate::cancel::CancelHandle;
use crate::worker::catch_handler;

pub(crate) struct MapperUnit<T, I> {
    pub idx: usize,
    pub control: Receiver<MapperCommand>,
    pub tasks: ChunkedQueue<T>,
    pub intermediate: ChunkedQueue<I>,
    pub manager: Sender<ManagerCommand>,
    pub mapper: Arc<MapperFn<T, I>>,
    pub poll_interval: Duration,
    pub cancel: CancelHandle,
}

enum MapperExit {
    Finished,
    Cancelled,
}

impl<T, I> MapperUnit<T, I>
where
    T: DeserializeOwned,
    I: Serialize,
{
    pub(crate) fn run(self) {
        let idx = self.idx;
        let report = match self.run_loop() {
            Ok(MapperExit::Finished) => {
                debug!(idx, "mapper finished");
                ManagerCommand::MapperFinished { idx }
            }
            Ok(MapperExit::Cancelled) => {
                debug!(idx, "mapper cancelled");
                return;
            }
            Err(error) => {
                debug!(idx, %error, "mapper failed");
                ManagerCommand::WorkerFailed {
                    role: WorkerRole::Mapper,
                    idx,
                    error,
                }
            }
        };
        // A closed manager channel means the run is already torn down
        let _ = self.manager.send(report);
    }

    fn run_loop(&self) -> Result<MapperExit, WorkerError> {
        let mut state = WorkerState::Running;

        loop {
            // Control before data
            loop {
                match self.control.try_recv() {
                    Ok(MapperCommand::NoMoreInput) => state = WorkerState::Draining,
                    Ok(MapperCommand::Cancel) => return Ok(MapperExit::Cancelled),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        return Err(IpcError::Disconnected.into());
                    }
                }
            }
            if self.cancel.is_cancelled() {
                return Ok(MapperExit::Cancelled);
            }

            // Every task was enqueued before NoMoreInput was sent, so an empty
            // queue now means the input is exhausted.
            if state == WorkerState::Draining && self.tasks.is_empty() {
                return Ok(MapperExit::Finished);
            }

            let mut select = Select::new();
            let control = select.recv(&self.control);
            select.recv(self.tasks.frames());
            match select.ready_timeout(self.poll_interval) {
                Ok(ready) if ready == control => continue,
                Ok(_) => {}
                Err(_) => continue,
            }

            let task = match self.tasks.receive_timeout(self.poll_interval) {
                Ok(task) => task,
                // Another mapper took the frame first
                Err(IpcError::Timeout) => continue,
                Err(e) => return Err(e.into()),
            };

            trace!(idx = self.idx, "mapping task");
            let mapper = &self.mapper;
            let item = catch_handler(|| mapper(task))?;
            let cancel = &self.cancel;
            match self
                .intermediate
                .send_while(&item, self.poll_interval, || !cancel.is_cancelled())
            {
                Ok(()) => {}
                Err(IpcError::Cancelled) => return Ok(MapperExit::Cancelled),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
