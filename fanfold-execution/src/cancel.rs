//! Run cancellation

use crossbeam_channel::Sender;
use fanfold_ipc::ManagerCommand;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle that aborts a running engine from any thread.
///
/// Every unit checks the shared flag at each poll point; for map-reduce the
/// manager is also sent an explicit `Cancel` command.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    manager: Option<Sender<ManagerCommand>>,
}

impl CancelHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            manager: None,
        }
    }

    pub(crate) fn with_manager(manager: Sender<ManagerCommand>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            manager: Some(manager),
        }
    }

    /// Request cancellation. Only the first call has any effect.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(manager) = &self.manager {
            // Manager already gone means the run is over anyway
            let _ = manager.send(ManagerCommand::Cancel);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Set the flag without notifying the manager; used by the manager and
    /// by failing units, which are already on the fatal path.
    pub(crate) fn trip(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
