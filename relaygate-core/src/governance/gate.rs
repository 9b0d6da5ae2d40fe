//! The Gate: one orchestrator owning the Task Engine, the Approval Queue and
//! the upstream it forwards to.
//!
//! Every registry lives in a `Gate` value; tests build as many independent
//! gates as they like.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::approval::{ApprovalError, ApprovalQueue, DecisionOutcome, Intercepted, PendingId};
use super::task::{PollOutcome, TaskEngine, TaskId};
use crate::config::{Config, RelaygateDefaults};
use crate::constraint::{ConstraintEvaluator, enforce};
use crate::error::GateResult;
use crate::protocol::{ToolCall, ToolResult};
use crate::transport::upstream::{UpstreamForwarder, forward_error};

/// What happened to a submitted call.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Forwarded synchronously.
    Completed(ToolResult),
    /// Running in the background as a long-running operation.
    Started(TaskId),
    /// Held for approval.
    Queued { task_id: TaskId, pending_id: PendingId },
}

impl Submission {
    /// The task id to poll, when the call was deferred.
    #[must_use]
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Completed(_) => None,
            Self::Started(id) | Self::Queued { task_id: id, .. } => Some(id),
        }
    }
}

/// Routes tool calls by policy: forward, run in the background, or hold for
/// approval.
pub struct Gate {
    tasks: TaskEngine<ToolResult>,
    approvals: Arc<ApprovalQueue>,
    upstream: Arc<dyn UpstreamForwarder>,
    constraints: Arc<dyn ConstraintEvaluator>,
    policies: Arc<Config>,
}

impl Gate {
    pub fn new(
        upstream: Arc<dyn UpstreamForwarder>,
        constraints: Arc<dyn ConstraintEvaluator>,
        policies: Arc<Config>,
        defaults: &RelaygateDefaults,
    ) -> Self {
        let tasks = TaskEngine::new(defaults.task_engine());
        let approvals = Arc::new(ApprovalQueue::new(
            tasks.clone(),
            upstream.clone(),
            constraints.clone(),
            policies.clone(),
            defaults.approval_queue(),
        ));
        Self {
            tasks,
            approvals,
            upstream,
            constraints,
            policies,
        }
    }

    #[must_use]
    pub fn tasks(&self) -> &TaskEngine<ToolResult> {
        &self.tasks
    }

    /// The approval queue, for mounting its HTTP routes.
    #[must_use]
    pub fn approvals(&self) -> &Arc<ApprovalQueue> {
        &self.approvals
    }

    #[must_use]
    pub fn policies(&self) -> &Config {
        &self.policies
    }

    /// Submits a call.
    ///
    /// Approval-gated calls go to the approval queue. Anything else has its
    /// constraint checked and is then either started as a background task
    /// (long-running operations) or forwarded right away.
    ///
    /// `cancel` only bounds the wait for an approval decision; long-running
    /// work is not tied to the submitting request.
    ///
    /// # Errors
    ///
    /// `GateError::Constraint` when the call's constraint refuses it.
    pub async fn submit(&self, call: ToolCall, cancel: CancellationToken) -> GateResult<Submission> {
        if self.policies.requires_approval(&call.name) {
            return match self.approvals.intercept(call, cancel).await {
                Ok(Intercepted::Queued {
                    task_id,
                    pending_id,
                }) => Ok(Submission::Queued {
                    task_id,
                    pending_id,
                }),
                Ok(Intercepted::Forwarded(result)) => Ok(Submission::Completed(result)),
                Err(ApprovalError::Constraint(violation)) => Err(violation.into()),
                Err(e) => Err(e.into()),
            };
        }

        enforce(self.constraints.as_ref(), &call)?;

        if self.policies.is_long_running(&call.name) {
            let upstream = Arc::clone(&self.upstream);
            let tool = call.name.clone();
            let task_id = self.tasks.start(async move {
                upstream
                    .call_tool(&call)
                    .await
                    .unwrap_or_else(|e| forward_error(&e))
            });
            tracing::info!(task_id = %task_id, tool = %tool, "long-running call started");
            return Ok(Submission::Started(task_id));
        }

        let result = self
            .upstream
            .call_tool(&call)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(tool = %call.name, error = %e, "forward failed");
                forward_error(&e)
            });
        Ok(Submission::Completed(result))
    }

    /// Status of a deferred call, long-polling up to the cooldown.
    ///
    /// # Errors
    ///
    /// `GateError::Task` for unknown or reaped ids.
    pub async fn poll(&self, task_id: &TaskId) -> GateResult<PollOutcome<ToolResult>> {
        Ok(self.tasks.check_status(task_id).await?)
    }

    /// Decides a pending call.
    ///
    /// # Errors
    ///
    /// `GateError::Approval` when the id is unknown or already decided.
    pub async fn decide(&self, pending_id: PendingId, approve: bool) -> GateResult<DecisionOutcome> {
        Ok(self.approvals.decide(pending_id, approve).await?)
    }

    /// Starts the task reaper and the orphan sweeper. Both stop on `cancel`.
    pub fn spawn_maintenance(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.tasks.spawn_reaper(cancel.clone()),
            self.approvals.spawn_orphan_sweeper(cancel),
        ]
    }
}
