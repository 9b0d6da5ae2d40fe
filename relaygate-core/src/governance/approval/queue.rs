//! Approval Queue: hold a call until a human approves or rejects it.
//!
//! # Concurrency
//!
//! The pending set and its id counter sit behind one mutex. `decide` removes
//! an entry under that lock before doing anything else, so for a given id at
//! most one decision is ever delivered and a second `decide` sees `NotFound`.
//! The lock is never held across an `.await`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::ApprovalError;
use crate::config::Config;
use crate::constraint::{ConstraintEvaluator, enforce};
use crate::governance::task::{TaskEngine, TaskId};
use crate::protocol::{ToolCall, ToolResult};
use crate::transport::upstream::{UpstreamForwarder, forward_error, forward_with_timeout};

/// Delivered when the approver rejects the call.
pub const REJECTED_MESSAGE: &str = "User rejected the request";
/// Delivered when the waiter is cancelled before a decision.
pub const CANCELLED_MESSAGE: &str = "Cancelled while waiting for approval";
/// Delivered when the orphan sweep drops an undecided call.
pub const EXPIRED_MESSAGE: &str = "Approval request expired";

// ============================================================================
// Types
// ============================================================================

/// Pending call id; `1`, `2`, ... per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingId(pub u64);

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PendingId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(PendingId)
    }
}

/// Shortest period of the background orphan sweep; a zero interval is raised to this.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Approval queue timing.
#[derive(Debug, Clone)]
pub struct ApprovalQueueConfig {
    /// Timeout of the upstream call made on approval.
    pub forward_timeout: Duration,
    /// Undecided calls older than this are dropped by the sweep.
    pub pending_ttl: Duration,
    /// Interval of the orphan sweep.
    pub sweep_interval: Duration,
}

impl Default for ApprovalQueueConfig {
    fn default() -> Self {
        Self {
            forward_timeout: Duration::from_secs(30),
            pending_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

struct PendingCall {
    call: ToolCall,
    created_at: DateTime<Utc>,
    registered: Instant,
    responder: oneshot::Sender<ToolResult>,
}

#[derive(Default)]
struct PendingSet {
    last_id: u64,
    entries: BTreeMap<PendingId, PendingCall>,
}

/// A pending call as shown to approvers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingView {
    pub id: PendingId,
    pub tool: String,
    pub arguments: Value,
    pub created_at: DateTime<Utc>,
    /// False once the original caller has stopped waiting.
    pub waiter_present: bool,
}

/// What `intercept` did with a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Intercepted {
    /// No approval needed; the upstream result.
    Forwarded(ToolResult),
    /// Held for approval; poll `task_id` for the outcome.
    Queued { task_id: TaskId, pending_id: PendingId },
}

/// What `decide` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub pending_id: PendingId,
    pub approved: bool,
    /// False when the waiter had already gone; nothing was executed then.
    pub delivered: bool,
}

// ============================================================================
// Queue
// ============================================================================

/// Queue of calls waiting for an out-of-band decision.
pub struct ApprovalQueue {
    pending: Mutex<PendingSet>,
    tasks: TaskEngine<ToolResult>,
    upstream: Arc<dyn UpstreamForwarder>,
    constraints: Arc<dyn ConstraintEvaluator>,
    policies: Arc<Config>,
    config: ApprovalQueueConfig,
}

impl ApprovalQueue {
    #[must_use]
    pub fn new(
        tasks: TaskEngine<ToolResult>,
        upstream: Arc<dyn UpstreamForwarder>,
        constraints: Arc<dyn ConstraintEvaluator>,
        policies: Arc<Config>,
        config: ApprovalQueueConfig,
    ) -> Self {
        Self {
            pending: Mutex::new(PendingSet::default()),
            tasks,
            upstream,
            constraints,
            policies,
            config,
        }
    }

    /// Called in place of executing `call`.
    ///
    /// Calls not configured for approval are forwarded and their result is
    /// returned. Otherwise the constraint is checked, the call is registered
    /// as pending and a task waiting for the decision is started; its id is
    /// returned immediately.
    ///
    /// `cancel` is the caller's context: when it fires before a decision, the
    /// task finishes with [`CANCELLED_MESSAGE`] and the pending entry is left
    /// for the orphan sweep.
    ///
    /// # Errors
    ///
    /// `ApprovalError::Constraint` when the constraint is false or fails; in
    /// that case nothing is queued and no task id is issued.
    pub async fn intercept(
        &self,
        call: ToolCall,
        cancel: CancellationToken,
    ) -> Result<Intercepted, ApprovalError> {
        if !self.policies.requires_approval(&call.name) {
            let result = self
                .upstream
                .call_tool(&call)
                .await
                .unwrap_or_else(|e| forward_error(&e));
            return Ok(Intercepted::Forwarded(result));
        }

        enforce(self.constraints.as_ref(), &call)?;

        let (tx, rx) = oneshot::channel();
        let tool = call.name.clone();
        let pending_id = {
            let mut set = self.pending.lock();
            set.last_id += 1;
            let id = PendingId(set.last_id);
            set.entries.insert(
                id,
                PendingCall {
                    call,
                    created_at: Utc::now(),
                    registered: Instant::now(),
                    responder: tx,
                },
            );
            id
        };

        let task_id = self.tasks.start(async move {
            tokio::select! {
                biased;
                delivered = rx => delivered.unwrap_or_else(|_| ToolResult::error(EXPIRED_MESSAGE)),
                () = cancel.cancelled() => ToolResult::error(CANCELLED_MESSAGE),
            }
        });

        tracing::info!(
            pending_id = %pending_id,
            task_id = %task_id,
            tool = %tool,
            "call awaiting approval"
        );
        Ok(Intercepted::Queued {
            task_id,
            pending_id,
        })
    }

    /// Records a decision for a pending call.
    ///
    /// The entry is removed before anything else happens. On approval the
    /// held call is forwarded with the configured timeout and its result (or
    /// a `forward error: ...` result) is delivered; on rejection
    /// [`REJECTED_MESSAGE`] is delivered. When the waiter has gone the
    /// decision is a no-op: nothing is forwarded and `delivered` is false.
    ///
    /// Delivery runs on its own task; dropping this future after the entry
    /// is removed does not abort the forward or lose the result.
    ///
    /// # Errors
    ///
    /// `ApprovalError::NotFound` when the id is unknown or already decided.
    pub async fn decide(
        &self,
        pending_id: PendingId,
        approve: bool,
    ) -> Result<DecisionOutcome, ApprovalError> {
        let entry = self
            .pending
            .lock()
            .entries
            .remove(&pending_id)
            .ok_or(ApprovalError::NotFound { pending_id })?;

        if entry.responder.is_closed() {
            tracing::info!(pending_id = %pending_id, approve, "waiter gone, decision dropped");
            return Ok(DecisionOutcome {
                pending_id,
                approved: approve,
                delivered: false,
            });
        }

        // Delivery survives the caller dropping this future.
        let upstream = Arc::clone(&self.upstream);
        let forward_timeout = self.config.forward_timeout;
        let delivery = tokio::spawn(async move {
            let result = if approve {
                tracing::info!(pending_id = %pending_id, tool = %entry.call.name, "call approved");
                forward_with_timeout(upstream.as_ref(), &entry.call, forward_timeout).await
            } else {
                tracing::info!(pending_id = %pending_id, tool = %entry.call.name, "call rejected");
                ToolResult::error(REJECTED_MESSAGE)
            };
            let delivered = entry.responder.send(result).is_ok();
            if !delivered {
                tracing::info!(pending_id = %pending_id, "waiter left during forwarding, result dropped");
            }
            delivered
        });

        let delivered = delivery.await.unwrap_or_else(|e| {
            tracing::error!(pending_id = %pending_id, error = %e, "decision delivery failed");
            false
        });
        Ok(DecisionOutcome {
            pending_id,
            approved: approve,
            delivered,
        })
    }

    /// Pending calls, lowest id first.
    #[must_use]
    pub fn list_pending(&self) -> Vec<PendingView> {
        self.pending
            .lock()
            .entries
            .iter()
            .map(|(id, entry)| PendingView {
                id: *id,
                tool: entry.call.name.clone(),
                arguments: entry.call.arguments.clone(),
                created_at: entry.created_at,
                waiter_present: !entry.responder.is_closed(),
            })
            .collect()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().entries.len()
    }

    /// Drops entries whose waiter has gone and entries older than the
    /// pending TTL. A waiter still present on an expired entry receives
    /// [`EXPIRED_MESSAGE`]. Returns the number removed.
    pub fn sweep_orphans(&self) -> usize {
        let ttl = self.config.pending_ttl;
        let removed: Vec<(PendingId, PendingCall)> = {
            let mut set = self.pending.lock();
            let stale: Vec<PendingId> = set
                .entries
                .iter()
                .filter(|(_, e)| e.responder.is_closed() || e.registered.elapsed() >= ttl)
                .map(|(id, _)| *id)
                .collect();
            stale
                .into_iter()
                .filter_map(|id| set.entries.remove(&id).map(|e| (id, e)))
                .collect()
        };

        let count = removed.len();
        for (id, entry) in removed {
            tracing::info!(pending_id = %id, tool = %entry.call.name, "dropping orphaned pending call");
            // Closed receivers just drop the message.
            let _ = entry.responder.send(ToolResult::error(EXPIRED_MESSAGE));
        }
        count
    }

    /// Spawns the periodic orphan sweep. It stops when `cancel` fires.
    pub fn spawn_orphan_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let period = self.config.sweep_interval.max(MIN_TICK);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        queue.sweep_orphans();
                    }
                }
            }
            tracing::debug!("orphan sweeper stopped");
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
