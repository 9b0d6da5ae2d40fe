//! Approval Queue and its HTTP surface.
//!
//! A call configured with `requires_approval` is not executed. It is held as
//! a pending call and the caller gets a task id; the task finishes when an
//! approver decides through [`ApprovalQueue::decide`] (usually via the
//! routes in [`service`]).

mod error;
mod queue;
pub mod service;

pub use error::ApprovalError;
pub use queue::{
    ApprovalQueue, ApprovalQueueConfig, CANCELLED_MESSAGE, DecisionOutcome, EXPIRED_MESSAGE,
    Intercepted, PendingId, PendingView, REJECTED_MESSAGE,
};
pub use service::{approval_router, start_approval_service};
