//! Mock MCP server for exercising `relaygate proxy` end to end.
//!
//! Speaks NDJSON JSON-RPC on stdio and exposes:
//!
//! - `echo` - returns the `text` argument
//! - `sleep` - waits `ms` milliseconds, then returns `slept <ms>ms`
//! - `resize` - returns `resized to <size>`
//! - `fail` - returns an error result
//!
//! # Environment Variables
//!
//! - `MOCK_UPSTREAM_DELAY_MS`: delay added to every call (default: 0)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relaygate_core::protocol::{ToolCall, ToolDefinition, ToolResult};
use relaygate_core::transport::{JsonRpcError, McpServer, ServerInfo, ToolHandler};
use serde_json::json;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

struct MockTools {
    delay: Duration,
}

#[async_trait]
impl ToolHandler for MockTools {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, JsonRpcError> {
        let object = |props: serde_json::Value| json!({"type": "object", "properties": props});
        Ok(vec![
            ToolDefinition::new("echo", "Echo the text argument", object(json!({"text": {"type": "string"}}))),
            ToolDefinition::new("sleep", "Sleep for ms milliseconds", object(json!({"ms": {"type": "integer"}}))),
            ToolDefinition::new("resize", "Pretend to resize", object(json!({"size": {"type": "integer"}}))),
            ToolDefinition::new("fail", "Always fails", object(json!({}))),
        ])
    }

    async fn call_tool(
        &self,
        call: ToolCall,
        _cancel: CancellationToken,
    ) -> Result<ToolResult, JsonRpcError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let int_arg = |key: &str| call.arguments.get(key).and_then(serde_json::Value::as_u64);
        match call.name.as_str() {
            "echo" => Ok(ToolResult::text(call.str_arg("text").unwrap_or_default())),
            "sleep" => {
                let ms = int_arg("ms").unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ToolResult::text(format!("slept {ms}ms")))
            }
            "resize" => Ok(ToolResult::text(format!(
                "resized to {}",
                int_arg("size").unwrap_or(0)
            ))),
            "fail" => Ok(ToolResult::error("mock failure")),
            other => Err(JsonRpcError::invalid_params(format!("unknown tool '{other}'"))),
        }
    }
}

#[tokio::main]
async fn main() {
    let delay_ms: u64 = std::env::var("MOCK_UPSTREAM_DELAY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    eprintln!("mock upstream ready");
    let server = McpServer::new(
        ServerInfo::new("mock-upstream"),
        Arc::new(MockTools {
            delay: Duration::from_millis(delay_ms),
        }),
    );
    if let Err(e) = server
        .serve(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            CancellationToken::new(),
        )
        .await
    {
        eprintln!("mock upstream: {e}");
        std::process::exit(1);
    }
}
