use thiserror::Error;

use super::queue::PendingId;
use crate::constraint::ConstraintViolation;

/// Approval queue errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    /// No pending call with this id; it was never issued, already decided or
    /// swept.
    #[error("no pending call with id {pending_id}")]
    NotFound { pending_id: PendingId },

    /// The call's constraint refused it before it was queued.
    #[error(transparent)]
    Constraint(#[from] ConstraintViolation),
}
