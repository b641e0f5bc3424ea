//! Worker lifecycle shared by every engine unit

use fanfold_ipc::WorkerError;
use std::any::Any;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crate::error::ExecutionError;

/// Identity of one pool slot, handed to the worker factory and hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    /// Slot index, stable for the lifetime of the worker
    pub idx: usize,
    pub worker_count: usize,
}

/// A stateful pool worker.
///
/// `enter` runs once before the first task and `exit` runs once after the
/// last, on every exit path (stop, cancellation, handler failure) as long as
/// `enter` succeeded.
pub trait Worker: Send + 'static {
    type Task;
    type Output;

    /// Acquire per-worker resources
    fn enter(&mut self, _ctx: &WorkerContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle one task
    fn process(&mut self, task: Self::Task) -> anyhow::Result<Self::Output>;

    /// Release per-worker resources
    fn exit(&mut self, _ctx: &WorkerContext) {}
}

/// Adapts a closure into a [`Worker`] without lifecycle hooks
pub struct FnWorker<F, T, R> {
    handler: F,
    _marker: PhantomData<fn(T) -> R>,
}

impl<F, T, R> FnWorker<F, T, R>
where
    F: FnMut(T) -> anyhow::Result<R>,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<F, T, R> Worker for FnWorker<F, T, R>
where
    F: FnMut(T) -> anyhow::Result<R> + Send + 'static,
    T: 'static,
    R: 'static,
{
    type Task = T;
    type Output = R;

    fn process(&mut self, task: T) -> anyhow::Result<R> {
        (self.handler)(task)
    }
}

/// Runs `exit` when dropped
pub(crate) struct ExitGuard<W: Worker> {
    worker: W,
    ctx: WorkerContext,
}

impl<W: Worker> ExitGuard<W> {
    /// Run `enter`; the guard only exists once it succeeded
    pub(crate) fn enter(mut worker: W, ctx: WorkerContext) -> Result<Self, WorkerError> {
        match catch_handler(|| worker.enter(&ctx)) {
            Ok(()) => Ok(Self { worker, ctx }),
            Err(WorkerError::HandlerFailed { error })
            | Err(WorkerError::HandlerPanicked { error }) => {
                Err(WorkerError::InitializationFailed { error })
            }
            Err(other) => Err(other),
        }
    }
}

impl<W: Worker> Deref for ExitGuard<W> {
    type Target = W;

    fn deref(&self) -> &W {
        &self.worker
    }
}

impl<W: Worker> DerefMut for ExitGuard<W> {
    fn deref_mut(&mut self) -> &mut W {
        &mut self.worker
    }
}

impl<W: Worker> Drop for ExitGuard<W> {
    fn drop(&mut self) {
        let ctx = self.ctx;
        let worker = &mut self.worker;
        if let Err(error) = catch_handler(|| {
            worker.exit(&ctx);
            Ok(())
        }) {
            tracing::warn!(idx = ctx.idx, %error, "worker exit hook panicked");
        }
    }
}

/// Run user code, turning both returned errors and panics into [`WorkerError`]
pub(crate) fn catch_handler<R>(f: impl FnOnce() -> anyhow::Result<R>) -> Result<R, WorkerError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(WorkerError::HandlerFailed {
            error: format!("{:#}", error),
        }),
        Err(payload) => Err(WorkerError::HandlerPanicked {
            error: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Spawn a named unit thread
pub(crate) fn spawn_unit<F, R>(name: String, f: F) -> Result<JoinHandle<R>, ExecutionError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|e| ExecutionError::SpawnFailed {
            name,
            error: e.to_string(),
        })
}

/// Join a unit thread, mapping a panic to [`ExecutionError::ThreadPanicked`]
pub(crate) fn join_unit<R>(handle: JoinHandle<R>) -> Result<R, ExecutionError> {
    let name = handle.thread().name().unwrap_or("unnamed").to_string();
    handle
        .join()
        .map_err(|_| ExecutionError::ThreadPanicked(name))
}
