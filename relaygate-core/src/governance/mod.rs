//! Deferred execution: background tasks, human approval and the gate that
//! routes calls between them.

pub mod approval;
pub mod gate;
pub mod task;

pub use approval::{ApprovalError, ApprovalQueue, ApprovalQueueConfig, PendingId};
pub use gate::{Gate, Submission};
pub use task::{PollOutcome, TaskEngine, TaskEngineConfig, TaskError, TaskId};
