//! Abortable background task runner over the tokio runtime.

use std::future::Future;

use tokio::task::JoinHandle;

use crate::errors::Error;

/// Handle to a background task started with [`run`]; dropping it leaves the task
/// running, [`TaskHandler::abort`] cancels it at its next suspension point.
#[derive(Debug)]
pub struct TaskHandler {
    handle: JoinHandle<Result<(), Error>>,
}

impl TaskHandler {
    /// Cancels the underlying task.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Whether the task has run to completion (or was aborted).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawns the given future as a tokio task and returns its abort handle.
///
/// Must be called from within a tokio runtime.
pub fn run<F>(future: F) -> TaskHandler
where
    F: Future<Output = Result<(), Error>> + Send + 'static,
{
    TaskHandler {
        handle: tokio::task::spawn(future),
    }
}
