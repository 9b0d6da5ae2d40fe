//! MCP tool types shared by the gate, the stdio server and the upstream client.
//!
//! Only the `tools/*` surface of MCP is modelled. Fields relaygate does not
//! inspect are carried through untouched so a wrapped server's tool
//! definitions reach the client unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Tool Calls
// ============================================================================

/// A `tools/call` invocation: the operation name plus its arguments.
///
/// The arguments are held verbatim so an intercepted call can be replayed
/// against the upstream after approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool (operation) name.
    pub name: String,
    /// Arguments as sent by the client. `Null` when omitted.
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    /// Creates a call with the given name and arguments.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Returns a string argument by key, if present.
    #[must_use]
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text.
    Text {
        #[serde(rename = "type")]
        kind: TextKind,
        text: String,
    },
    /// Any other block type (image, resource, ...) passed through as JSON.
    Other(Value),
}

/// Type tag of a text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextKind {
    Text,
}

impl Content {
    /// A text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text {
            kind: TextKind::Text,
            text: text.into(),
        }
    }
}

/// Result of a `tools/call`.
///
/// Uses camelCase for MCP protocol compliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    #[serde(default)]
    pub content: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResult {
    /// A successful result with a single text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            structured_content: None,
            is_error: false,
        }
    }

    /// An error result with a single text block.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            structured_content: None,
            is_error: true,
        }
    }

    /// A successful result carrying structured content and a text fallback.
    #[must_use]
    pub fn structured(value: Value, fallback: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(fallback)],
            structured_content: Some(value),
            is_error: false,
        }
    }

    /// Concatenates all text blocks, newline separated.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                Content::Text { text, .. } => Some(text.as_str()),
                Content::Other(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// Tool Definitions
// ============================================================================

/// An entry of a `tools/list` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    /// Annotations, output schema and anything else, untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolDefinition {
    /// A tool definition with the given input schema and no extra fields.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
            extra: Map::new(),
        }
    }
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}
