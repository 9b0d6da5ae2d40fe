//! Task identifiers, status and poll outcomes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Task Id
// ============================================================================

/// Opaque task identifier.
///
/// Engines hand out decimal strings from a strictly increasing counter, but
/// callers must treat the value as opaque: any string parses, and a string the
/// engine never issued simply fails lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub(crate) fn from_sequence(seq: u64) -> Self {
        Self(seq.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Status
// ============================================================================

/// Task state. The only transition is `Pending -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Work is still running.
    Pending,
    /// Work finished and its result is stored.
    Done,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Done => write!(f, "done"),
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// The work did not produce a value: it panicked or its task was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task work failed: {reason}")]
pub struct WorkFailure {
    pub reason: String,
}

impl WorkFailure {
    pub(crate) fn from_join(err: &tokio::task::JoinError) -> Self {
        let reason = if err.is_panic() {
            "work panicked".to_string()
        } else {
            "work was cancelled".to_string()
        };
        Self { reason }
    }
}

/// What a finished task produced.
pub type TaskResult<T> = Result<T, WorkFailure>;

/// Answer to a status check.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// Still running after the long-poll window.
    Pending,
    /// Finished; the stored result, returned on every subsequent check.
    Done(TaskResult<T>),
}

impl<T> PollOutcome<T> {
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        match self {
            PollOutcome::Pending => TaskStatus::Pending,
            PollOutcome::Done(_) => TaskStatus::Done,
        }
    }
}
