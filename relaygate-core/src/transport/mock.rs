//! In-process upstream for tests and local development.
//!
//! `MockUpstream::echo()` answers every tool call with the `text` argument
//! (or the serialized arguments when there is none) and counts calls.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use super::upstream::{UpstreamError, UpstreamForwarder};
use crate::protocol::{ToolCall, ToolDefinition, ToolResult};

/// Configurable fake upstream.
#[derive(Debug)]
pub struct MockUpstream {
    tools: Vec<ToolDefinition>,
    delay: Option<Duration>,
    fail_with: Option<String>,
    call_count: AtomicU32,
    calls: Mutex<Vec<ToolCall>>,
}

impl MockUpstream {
    /// An upstream exposing `echo` and `resize` that echoes its input.
    #[must_use]
    pub fn echo() -> Self {
        let schema = json!({"type": "object", "properties": {"text": {"type": "string"}}});
        Self {
            tools: vec![
                ToolDefinition::new("echo", "Echo the text argument", schema.clone()),
                ToolDefinition::new("resize", "Resize something", schema),
            ],
            delay: None,
            fail_with: None,
            call_count: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleeps this long before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails every call with `UpstreamError::InvalidResponse`.
    #[must_use]
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.fail_with = Some(reason.into());
        self
    }

    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Calls received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().clone()
    }
}

#[async_trait::async_trait]
impl UpstreamForwarder for MockUpstream {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, UpstreamError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, call: &ToolCall) -> Result<ToolResult, UpstreamError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(call.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.fail_with {
            return Err(UpstreamError::InvalidResponse {
                reason: reason.clone(),
            });
        }

        let text = call
            .str_arg("text")
            .map_or_else(|| call.arguments.to_string(), String::from);
        Ok(ToolResult::text(text))
    }
}
