//! Upstream MCP server: the executor every forwarded call ends up at.
//!
//! [`UpstreamForwarder`] is the seam the gate and the approval queue call
//! through. [`StdioUpstream`] implements it by spawning the wrapped server as
//! a child process and speaking NDJSON JSON-RPC over its stdin/stdout.
//!
//! # Error Classification
//!
//! - Child could not be started → `Spawn`
//! - Child exited or closed stdout → `Closed`
//! - JSON-RPC error reply → `Rpc`
//! - Reply that is not a valid MCP result → `InvalidResponse`
//!
//! No retries: a tool call may have side effects.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;

use crate::protocol::{ToolCall, ToolDefinition, ToolResult};
use crate::transport::jsonrpc::{
    JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, classify,
};
use crate::transport::ndjson::{FramingError, read_message, write_message};

/// MCP protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

// ============================================================================
// Trait
// ============================================================================

/// Errors talking to the upstream server.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to start upstream '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("upstream connection closed")]
    Closed,

    #[error("upstream returned error {}: {}", .0.code, .0.message)]
    Rpc(#[from] JsonRpcError),

    #[error("invalid upstream response: {reason}")]
    InvalidResponse { reason: String },

    #[error("upstream did not answer within {after:?}")]
    Timeout { after: Duration },

    #[error("upstream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FramingError> for UpstreamError {
    fn from(err: FramingError) -> Self {
        match err {
            FramingError::Io(e) => UpstreamError::Io(e),
            other => UpstreamError::InvalidResponse {
                reason: other.to_string(),
            },
        }
    }
}

/// Executes tool calls against the wrapped server (enables mocking in tests).
#[async_trait::async_trait]
pub trait UpstreamForwarder: Send + Sync {
    /// All tools the upstream exposes.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, UpstreamError>;

    /// Runs one tool call. A tool-level failure is an `Ok` result with
    /// `is_error` set; `Err` means the call never completed.
    async fn call_tool(&self, call: &ToolCall) -> Result<ToolResult, UpstreamError>;
}

/// Forwards `call` with a deadline, folding every failure into an error result.
///
/// Forward failures are results, never dropped: the caller always gets
/// something to deliver.
pub async fn forward_with_timeout(
    upstream: &dyn UpstreamForwarder,
    call: &ToolCall,
    timeout: Duration,
) -> ToolResult {
    let outcome = match tokio::time::timeout(timeout, upstream.call_tool(call)).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout { after: timeout }),
    };
    outcome.unwrap_or_else(|e| {
        tracing::warn!(tool = %call.name, error = %e, "forward failed");
        forward_error(&e)
    })
}

/// The result delivered when forwarding fails.
#[must_use]
pub fn forward_error(err: &UpstreamError) -> ToolResult {
    ToolResult::error(format!("forward error: {err}"))
}

// ============================================================================
// Stdio Upstream
// ============================================================================

/// How to start the upstream server.
#[derive(Debug, Clone)]
pub struct UpstreamCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the child.
    pub env: Vec<(String, String)>,
}

impl UpstreamCommand {
    /// Builds a command from `argv`, the first element being the program.
    ///
    /// Returns `None` for an empty slice.
    #[must_use]
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            env: Vec::new(),
        })
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

type PendingReplies = Arc<parking_lot::Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

/// Removes a request's reply sender when the request ends or is dropped.
struct ReplySlot<'a> {
    pending: &'a PendingReplies,
    id: i64,
}

impl Drop for ReplySlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// MCP client for a child process speaking NDJSON over stdio.
pub struct StdioUpstream {
    command: String,
    writer: Arc<Mutex<ChildStdin>>,
    pending: PendingReplies,
    next_id: AtomicI64,
    closed: CancellationToken,
    child: Mutex<Child>,
    server_info: Value,
}

impl StdioUpstream {
    /// Spawns the server and completes the `initialize` handshake.
    ///
    /// # Errors
    ///
    /// `Spawn` if the process cannot start; handshake failures as returned by
    /// the server.
    pub async fn spawn(command: &UpstreamCommand) -> Result<Self, UpstreamError> {
        let command_line = command.display();
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| UpstreamError::Spawn {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        let missing = |stream: &str| UpstreamError::Spawn {
            command: command_line.clone(),
            reason: format!("child {stream} not captured"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        tracing::info!(
            upstream = %command_line,
            pid = child.id().unwrap_or_default(),
            "upstream process spawned"
        );

        let writer = Arc::new(Mutex::new(stdin));
        let pending: PendingReplies = Arc::default();
        let closed = CancellationToken::new();

        tokio::spawn(mirror_stderr(command_line.clone(), stderr));
        tokio::spawn(read_replies(
            BufReader::new(stdout),
            Arc::clone(&writer),
            Arc::clone(&pending),
            closed.clone(),
        ));

        let mut upstream = Self {
            command: command_line,
            writer,
            pending,
            next_id: AtomicI64::new(0),
            closed,
            child: Mutex::new(child),
            server_info: Value::Null,
        };
        upstream.initialize().await?;
        Ok(upstream)
    }

    /// `serverInfo` from the handshake.
    #[must_use]
    pub fn server_info(&self) -> &Value {
        &self.server_info
    }

    /// Resolves when the upstream has closed its stdout.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Kills the child and fails in-flight calls.
    pub async fn shutdown(&self) {
        self.closed.cancel();
        self.pending.lock().clear();
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            tracing::debug!(upstream = %self.command, error = %e, "kill failed");
        }
        tracing::info!(upstream = %self.command, "upstream stopped");
    }

    async fn initialize(&mut self) -> Result<(), UpstreamError> {
        let result = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "relaygate",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                })),
            )
            .await?;
        self.server_info = result.get("serverInfo").cloned().unwrap_or(Value::Null);
        self.notify("notifications/initialized", None).await?;
        tracing::debug!(upstream = %self.command, server_info = %self.server_info, "upstream initialized");
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, UpstreamError> {
        if self.closed.is_cancelled() {
            return Err(UpstreamError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        // Frees the reply slot on every exit, including a dropped future.
        let _slot = ReplySlot {
            pending: &self.pending,
            id,
        };

        let request = JsonRpcRequest::new(JsonRpcId::Number(id), method, params);
        write_message(&mut *self.writer.lock().await, &request).await?;

        tokio::select! {
            reply = rx => {
                let response = reply.map_err(|_| UpstreamError::Closed)?;
                Ok(response.into_result()?)
            }
            () = self.closed.cancelled() => Err(UpstreamError::Closed),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), UpstreamError> {
        let note = JsonRpcRequest::notification(method, params);
        write_message(&mut *self.writer.lock().await, &note).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl UpstreamForwarder for StdioUpstream {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, UpstreamError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request("tools/list", params).await?;
            let page: Vec<ToolDefinition> =
                serde_json::from_value(result.get("tools").cloned().unwrap_or_else(|| json!([])))
                    .map_err(|e| UpstreamError::InvalidResponse {
                        reason: e.to_string(),
                    })?;
            tools.extend(page);
            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(String::from);
            if cursor.is_none() {
                return Ok(tools);
            }
        }
    }

    async fn call_tool(&self, call: &ToolCall) -> Result<ToolResult, UpstreamError> {
        let params = json!({ "name": call.name, "arguments": call.arguments });
        let result = self.request("tools/call", Some(params)).await?;
        serde_json::from_value(result).map_err(|e| UpstreamError::InvalidResponse {
            reason: e.to_string(),
        })
    }
}

async fn read_replies<R>(
    mut reader: R,
    writer: Arc<Mutex<ChildStdin>>,
    pending: PendingReplies,
    closed: CancellationToken,
) where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let value = tokio::select! {
            () = closed.cancelled() => break,
            read = read_message(&mut reader, &mut buf) => match read {
                Ok(Some(value)) => value,
                Ok(None) => break,
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(error = %e, "skipping malformed upstream message");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "upstream read failed");
                    break;
                }
            }
        };

        match classify(value) {
            Ok(JsonRpcMessage::Response(response)) => {
                let JsonRpcId::Number(id) = response.id else {
                    tracing::warn!(id = %response.id, "upstream reply with unexpected id");
                    continue;
                };
                match pending.lock().remove(&id) {
                    Some(tx) => {
                        // Receiver may have given up; nothing to do then.
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!(id, "upstream reply for unknown request"),
                }
            }
            Ok(JsonRpcMessage::Request { id, method, .. }) => {
                // Server-initiated requests: answer ping, refuse the rest.
                let reply = if method == "ping" {
                    JsonRpcResponse::success(id, json!({}))
                } else {
                    JsonRpcResponse::error(id, JsonRpcError::method_not_found(&method))
                };
                if let Err(e) = write_message(&mut *writer.lock().await, &reply).await {
                    tracing::warn!(error = %e, "failed to answer upstream request");
                }
            }
            Ok(JsonRpcMessage::Notification { method, .. }) => {
                tracing::debug!(method, "upstream notification");
            }
            Err(e) => tracing::warn!(error = %e, "invalid upstream message"),
        }
    }

    closed.cancel();
    pending.lock().clear();
    tracing::info!("upstream closed");
}

async fn mirror_stderr(command: String, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(upstream = %command, "[upstream-stderr] {line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(upstream = %command, error = %e, "stderr read failed");
                break;
            }
        }
    }
}
