//! Errors surfaced by the [`Gate`](crate::governance::Gate).

use thiserror::Error;

use crate::constraint::ConstraintViolation;
use crate::governance::approval::ApprovalError;
use crate::governance::task::TaskError;
use crate::protocol::ToolResult;

/// Errors from submitting, polling or deciding through the gate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Constraint(#[from] ConstraintViolation),
}

impl GateError {
    /// Converts the error to the tool-level error result agents see.
    ///
    /// Gate errors are never protocol errors: an unknown task id or a refused
    /// constraint is reported inside a `tools/call` result with `isError`.
    #[must_use]
    pub fn to_tool_result(&self) -> ToolResult {
        ToolResult::error(self.to_string())
    }

    /// Machine-readable error kind, for logs.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Task(TaskError::NotFound { .. }) => "unknown_task",
            Self::Approval(ApprovalError::NotFound { .. }) => "unknown_pending_call",
            Self::Approval(ApprovalError::Constraint(v)) | Self::Constraint(v) => match v {
                ConstraintViolation::Rejected { .. } => "constraint_rejected",
                ConstraintViolation::EvalFailed { .. } => "constraint_failed",
            },
        }
    }
}

/// Result alias for gate operations.
pub type GateResult<T> = Result<T, GateError>;
