//! Task message contract
//!
//! Work crosses the submission boundary as a serializable envelope: an id
//! plus a self-describing payload. Workers hold the runner; a task never
//! carries live references to shared state, so the same contract would
//! survive a process boundary.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::handle::TaskError;

/// Identifier the pool stamps on each submitted task.
pub type TaskId = u64;

/// Executes task payloads on behalf of the pool.
///
/// Implementations hold whatever capabilities the payload refers to; the
/// payload itself is pure data.
pub trait TaskRunner: Send + Sync + 'static {
    /// Wire payload describing one unit of work.
    type Task: Serialize + DeserializeOwned + Send + 'static;
    /// Successful result of one task.
    type Output: Send + 'static;
    /// Task-level failure (distinct from pool-level failures).
    type Error: std::error::Error + Send + Sync + 'static;

    fn run(&self, task: Self::Task) -> std::result::Result<Self::Output, Self::Error>;
}

/// Id-stamped task message as it travels through the queue.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: TaskId,
    pub task: T,
}

/// Outcome a worker pushes onto the shared completion channel.
#[derive(Debug)]
pub(crate) struct Completion<O, E> {
    pub id: TaskId,
    pub outcome: std::result::Result<O, TaskError<E>>,
}
