//! Task Engine errors.

use thiserror::Error;

use super::types::TaskId;

/// Errors returned by [`TaskEngine`](super::TaskEngine) lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// No task with this id exists, or it was reaped after retention.
    #[error("unknown task ID {task_id}")]
    NotFound {
        /// The id that was looked up
        task_id: TaskId,
    },
}
