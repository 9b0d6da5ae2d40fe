//! Task Engine: background work with poll-based retrieval.
//!
//! A task is launched with [`TaskEngine::start`], which returns a [`TaskId`]
//! immediately. Any caller holding the id can later ask for the result with
//! [`TaskEngine::check_status`]; pending tasks are long-polled for at most the
//! configured cooldown. Completed results are kept for a bounded retention
//! window and then reaped.
//!
//! ## Constraints
//!
//! - **In-memory storage** - Tasks are lost on restart
//! - **No cancellation** - Work runs to completion once started

pub mod engine;
pub mod error;
pub mod types;

pub use engine::{TaskEngine, TaskEngineConfig, TaskSummary};
pub use error::TaskError;
pub use types::{PollOutcome, TaskId, TaskResult, TaskStatus, WorkFailure};
