//! Future handles for submitted tasks
//!
//! Each submission returns a handle bound to exactly one task; the handle
//! resolves exactly once, to the task's own outcome, regardless of the
//! order other tasks complete in.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

use super::task::TaskId;

/// Why a future resolved without a successful result
#[derive(Debug, Error)]
pub enum TaskError<E> {
    /// The task body itself returned an error
    #[error("task {task_id} failed: {source}")]
    Task { task_id: TaskId, source: E },

    /// The worker executing the task died mid-task
    #[error("worker crashed while executing task {task_id}")]
    WorkerCrash { task_id: TaskId },

    /// The pool was shut down before the task completed
    #[error("task {task_id} was cancelled before completion")]
    Cancelled { task_id: TaskId },

    /// The result did not arrive within the deadline
    #[error("task {task_id} timed out after {after:?}")]
    Timeout { task_id: TaskId, after: Duration },
}

impl<E> TaskError<E> {
    /// The task this error belongs to.
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskError::Task { task_id, .. }
            | TaskError::WorkerCrash { task_id }
            | TaskError::Cancelled { task_id }
            | TaskError::Timeout { task_id, .. } => *task_id,
        }
    }
}

/// Handle to one pending task's eventual result.
#[derive(Debug)]
pub struct FutureHandle<O, E> {
    id: TaskId,
    receiver: oneshot::Receiver<std::result::Result<O, TaskError<E>>>,
}

impl<O, E> FutureHandle<O, E> {
    pub(crate) fn new(
        id: TaskId,
        receiver: oneshot::Receiver<std::result::Result<O, TaskError<E>>>,
    ) -> Self {
        Self { id, receiver }
    }

    /// Id of the task this handle is bound to.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Wait for the task's result.
    pub async fn get(self) -> std::result::Result<O, TaskError<E>> {
        let id = self.id;
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TaskError::Cancelled { task_id: id }),
        }
    }

    /// Wait for the task's result with a deadline.
    pub async fn get_timeout(self, after: Duration) -> std::result::Result<O, TaskError<E>> {
        let id = self.id;
        match tokio::time::timeout(after, self.receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TaskError::Cancelled { task_id: id }),
            Err(_) => Err(TaskError::Timeout { task_id: id, after }),
        }
    }
}
