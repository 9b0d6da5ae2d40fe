//! `relaygate proxy`: an MCP server in front of an upstream MCP server.
//!
//! Calls are routed through a [`Gate`]. Deferred calls (long-running or
//! awaiting approval) are answered with a task id the agent polls through
//! the added `check_long_running_task` tool.

use std::sync::Arc;

use async_trait::async_trait;
use relaygate_core::config::RelaygateDefaults;
use relaygate_core::governance::approval::start_approval_service;
use relaygate_core::governance::{Gate, PollOutcome, Submission, TaskId};
use relaygate_core::protocol::{ToolCall, ToolDefinition, ToolResult};
use relaygate_core::transport::jsonrpc::INTERNAL_ERROR;
use relaygate_core::transport::{
    JsonRpcError, McpServer, ServerInfo, StdioUpstream, ToolHandler, UpstreamCommand,
    UpstreamForwarder,
};
use serde_json::{Value, json};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use crate::CHECK_TASK_TOOL;
use crate::check::load_policies;
use crate::cli::ProxyArgs;
use crate::error::CliError;

const INSTRUCTIONS: &str = "Some tools run in the background or wait for human approval. \
    They answer with a long_running_task_id; call check_long_running_task with that id \
    until it returns the result.";

// ─────────────────────────────────────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────────────────────────────────────

/// Tool handler routing calls through a [`Gate`].
pub struct ProxyHandler {
    gate: Arc<Gate>,
    upstream: Arc<dyn UpstreamForwarder>,
}

impl ProxyHandler {
    #[must_use]
    pub fn new(gate: Arc<Gate>, upstream: Arc<dyn UpstreamForwarder>) -> Self {
        Self { gate, upstream }
    }

    async fn check_task(&self, call: &ToolCall) -> ToolResult {
        let Some(id) = task_id_arg(&call.arguments) else {
            return ToolResult::error("missing required argument 'id'");
        };
        match self.gate.poll(&id).await {
            Ok(PollOutcome::Pending) => ToolResult::text(format!("Task {id} is pending")),
            Ok(PollOutcome::Done(Ok(result))) => result,
            Ok(PollOutcome::Done(Err(failure))) => ToolResult::error(failure.to_string()),
            Err(e) => e.to_tool_result(),
        }
    }
}

/// Accepts the task id as a string or a bare number.
fn task_id_arg(arguments: &Value) -> Option<TaskId> {
    match arguments.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(TaskId::from(s.trim())),
        Value::Number(n) => Some(TaskId::from(n.to_string().as_str())),
        _ => None,
    }
}

fn check_task_tool() -> ToolDefinition {
    ToolDefinition::new(
        CHECK_TASK_TOOL,
        "Check the status of a long running task. Returns the result once the task is done.",
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "The long_running_task_id returned when the task was started"
                }
            },
            "required": ["id"]
        }),
    )
}

fn started(task_id: &TaskId) -> ToolResult {
    ToolResult::structured(
        json!({"long_running_task_id": task_id}),
        format!("Started long running task with ID: {task_id}"),
    )
}

#[async_trait]
impl ToolHandler for ProxyHandler {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, JsonRpcError> {
        let mut tools = self
            .upstream
            .list_tools()
            .await
            .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))?;
        if self.gate.policies().has_deferred_operations() {
            tools.push(check_task_tool());
        }
        Ok(tools)
    }

    async fn call_tool(
        &self,
        call: ToolCall,
        cancel: CancellationToken,
    ) -> Result<ToolResult, JsonRpcError> {
        if call.name == CHECK_TASK_TOOL {
            return Ok(self.check_task(&call).await);
        }

        let tool = call.name.clone();
        let result = match self.gate.submit(call, cancel).await {
            Ok(Submission::Completed(result)) => result,
            Ok(Submission::Started(task_id) | Submission::Queued { task_id, .. }) => {
                started(&task_id)
            }
            Err(e) => {
                tracing::info!(tool = %tool, error_type = e.error_type(), error = %e, "call refused");
                e.to_tool_result()
            }
        };
        Ok(result)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command
// ─────────────────────────────────────────────────────────────────────────────

/// Runs the proxy until stdin closes, the upstream exits or Ctrl-C.
///
/// # Errors
///
/// Configuration, upstream startup and approval service bind failures.
pub async fn run_proxy(args: ProxyArgs) -> Result<i32, CliError> {
    let loaded = load_policies(args.config.as_deref())?;
    let defaults = RelaygateDefaults::from_env().with_overrides(&loaded.config.timing);
    let command = UpstreamCommand::from_argv(&args.command).ok_or(CliError::MissingCommand)?;

    let upstream = Arc::new(StdioUpstream::spawn(&command).await?);
    let gate = Arc::new(Gate::new(
        upstream.clone(),
        Arc::new(loaded.constraints),
        Arc::new(loaded.config),
        &defaults,
    ));

    let shutdown = CancellationToken::new();
    let maintenance = gate.spawn_maintenance(shutdown.clone());

    let approval_service = if gate.policies().has_approvals() {
        let host = args.approval_host.to_string();
        let (port, handle) = start_approval_service(&host, args.approval_port, gate.approvals().clone())
            .await
            .map_err(|source| CliError::ApprovalBind {
                addr: format!("{host}:{}", args.approval_port),
                source,
            })?;
        eprintln!("relaygate: approval page at http://{host}:{port}/");
        Some(handle)
    } else {
        None
    };

    let watcher = {
        let upstream = Arc::clone(&upstream);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = upstream.closed() => tracing::warn!("upstream closed, shutting down"),
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupted, shutting down"),
                () = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        })
    };

    let mut info = ServerInfo::new("relaygate-proxy");
    info.instructions = Some(INSTRUCTIONS.to_string());
    let handler = Arc::new(ProxyHandler::new(Arc::clone(&gate), upstream.clone()));
    let server = McpServer::new(info, handler);
    let served = server
        .serve(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            shutdown.clone(),
        )
        .await;

    shutdown.cancel();
    upstream.shutdown().await;
    if let Some(handle) = approval_service {
        handle.abort();
    }
    let _ = watcher.await;
    for handle in maintenance {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "maintenance task failed");
        }
    }

    served?;
    Ok(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_core::config::{Config, validate};
    use relaygate_core::transport::mock::MockUpstream;
    use std::time::Duration;

    const POLICIES: &str = r#"
operations:
  resize:
    requires_approval: true
    constraint: "context.args.size > 3"
  report:
    long_running: true
"#;

    fn handler_with(upstream: MockUpstream, policies: &str) -> (ProxyHandler, Arc<Gate>) {
        let config: Config = serde_yaml::from_str(policies).unwrap();
        let constraints = validate(&config).unwrap();
        let upstream: Arc<dyn UpstreamForwarder> = Arc::new(upstream);
        let defaults = RelaygateDefaults {
            poll_cooldown: Duration::from_millis(200),
            ..RelaygateDefaults::default()
        };
        let gate = Arc::new(Gate::new(
            upstream.clone(),
            Arc::new(constraints),
            Arc::new(config),
            &defaults,
        ));
        (ProxyHandler::new(gate.clone(), upstream), gate)
    }

    async fn call(handler: &ProxyHandler, name: &str, args: Value) -> ToolResult {
        handler
            .call_tool(ToolCall::new(name, args), CancellationToken::new())
            .await
            .unwrap()
    }

    fn task_id_of(result: &ToolResult) -> String {
        result.structured_content.as_ref().unwrap()["long_running_task_id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_list_adds_check_tool_when_deferring() {
        let (handler, _) = handler_with(MockUpstream::echo(), POLICIES);
        let names: Vec<String> = handler
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["echo", "resize", CHECK_TASK_TOOL]);

        let (plain, _) = handler_with(MockUpstream::echo(), "operations: {}\n");
        assert_eq!(plain.list_tools().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pass_through_call() {
        let (handler, _) = handler_with(MockUpstream::echo(), POLICIES);
        let result = call(&handler, "echo", json!({"text": "hello"})).await;
        assert_eq!(result, ToolResult::text("hello"));
    }

    /// Tests the long-running flow: task id first, pending, then the result.
    #[tokio::test]
    async fn test_long_running_flow() {
        let upstream = MockUpstream::echo().with_delay(Duration::from_millis(400));
        let (handler, _) = handler_with(upstream, POLICIES);

        let started = call(&handler, "report", json!({"text": "done!"})).await;
        let id = task_id_of(&started);
        assert_eq!(id, "1");
        assert_eq!(
            started.text_content(),
            "Started long running task with ID: 1"
        );

        let pending = call(&handler, CHECK_TASK_TOOL, json!({"id": "1"})).await;
        assert_eq!(pending.text_content(), "Task 1 is pending");
        assert!(!pending.is_error);

        tokio::time::sleep(Duration::from_millis(400)).await;
        let done = call(&handler, CHECK_TASK_TOOL, json!({"id": 1})).await;
        assert_eq!(done, ToolResult::text("done!"));
    }

    #[tokio::test]
    async fn test_check_unknown_and_missing_id() {
        let (handler, _) = handler_with(MockUpstream::echo(), POLICIES);

        let unknown = call(&handler, CHECK_TASK_TOOL, json!({"id": "42"})).await;
        assert!(unknown.is_error);
        assert_eq!(unknown.text_content(), "unknown task ID 42");

        let missing = call(&handler, CHECK_TASK_TOOL, json!({})).await;
        assert!(missing.is_error);
    }

    #[tokio::test]
    async fn test_constraint_refusal_is_error_result() {
        let (handler, gate) = handler_with(MockUpstream::echo(), POLICIES);
        let result = call(&handler, "resize", json!({"size": 2})).await;
        assert!(result.is_error);
        assert_eq!(result.text_content(), "constraint returned false");
        assert_eq!(gate.approvals().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_approval_flow_through_handler() {
        let (handler, gate) = handler_with(MockUpstream::echo(), POLICIES);
        let queued = call(&handler, "resize", json!({"size": 5, "text": "resized"})).await;
        let id = task_id_of(&queued);

        let pending = gate.approvals().list_pending();
        assert_eq!(pending.len(), 1);
        gate.decide(pending[0].id, true).await.unwrap();

        let done = call(&handler, CHECK_TASK_TOOL, json!({"id": id})).await;
        assert_eq!(done, ToolResult::text("resized"));
    }

    #[test]
    fn test_task_id_arg_forms() {
        assert_eq!(task_id_arg(&json!({"id": " 7 "})), Some(TaskId::from("7")));
        assert_eq!(task_id_arg(&json!({"id": 7})), Some(TaskId::from("7")));
        assert_eq!(task_id_arg(&json!({"id": ""})), None);
        assert_eq!(task_id_arg(&json!({"id": true})), None);
        assert_eq!(task_id_arg(&Value::Null), None);
    }
}
