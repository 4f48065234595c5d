//! Single-occupancy slot for the in-flight build

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Holds at most one running task. Dispatching a new one cancels the
/// previous holder's token; the old task stops at its next cancellation
/// check, it is never aborted.
#[derive(Debug, Default)]
pub struct TaskSlot {
    current: Option<(CancellationToken, JoinHandle<()>)>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any current task and spawn `task` with a fresh token
    pub fn dispatch<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.cancel() {
            debug!("superseding in-flight build");
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(task(token.clone()));
        self.current = Some((token, handle));
    }

    /// Signal the current task, returning whether one was still running
    pub fn cancel(&mut self) -> bool {
        match self.current.take() {
            Some((token, handle)) => {
                token.cancel();
                !handle.is_finished()
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.current.as_ref().is_some_and(|(_, handle)| !handle.is_finished())
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
