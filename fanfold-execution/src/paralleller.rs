//! Caller-facing contract shared by both engines

use crate::error::ExecutionResult;

/// Submit-then-join interface of the worker pool and the map-reduce engine
pub trait Paralleller {
    type Task;
    type Output;

    /// Spawn every unit. Fails with `AlreadyStarted` on a second call.
    fn start(&mut self) -> ExecutionResult<()>;

    /// Enqueue one task, blocking under backpressure
    fn add_task(&mut self, task: Self::Task) -> ExecutionResult<()>;

    /// Signal end of input, flushing any buffered partial batch
    fn task_done(&mut self) -> ExecutionResult<()>;

    /// Wait for the run to finish; calls `task_done` first if needed
    fn join(self) -> ExecutionResult<Self::Output>
    where
        Self: Sized;

    /// `add_task` for every item
    fn map<I>(&mut self, tasks: I) -> ExecutionResult<()>
    where
        I: IntoIterator<Item = Self::Task>,
    {
        for task in tasks {
            self.add_task(task)?;
        }
        Ok(())
    }
}
