//! JSON-RPC 2.0 message types for the stdio transports.
//!
//! Incoming lines are parsed to `serde_json::Value` first and then
//! classified, so malformed-but-parseable messages can still be answered
//! with the right error and id.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error codes
// ─────────────────────────────────────────────────────────────────────────────

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// ─────────────────────────────────────────────────────────────────────────────
// Ids
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC request id. The original type is preserved when echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    Number(i64),
    String(String),
    /// Explicit `"id": null`, distinct from a missing id (notification).
    Null,
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcId::Number(n) => serializer.serialize_i64(*n),
            JsonRpcId::String(s) => serializer.serialize_str(s),
            JsonRpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_id(&value).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonRpcId::Number(n) => write!(f, "{n}"),
            JsonRpcId::String(s) => write!(f, "{s}"),
            JsonRpcId::Null => write!(f, "null"),
        }
    }
}

fn parse_id(value: &Value) -> Result<JsonRpcId, &'static str> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(JsonRpcId::Number)
            .ok_or("JSON-RPC ID must be integer, not float"),
        Value::String(s) => Ok(JsonRpcId::String(s.clone())),
        Value::Null => Ok(JsonRpcId::Null),
        _ => Err("JSON-RPC ID must be string, integer, or null"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("JSON-RPC error {code}: {message}")]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    #[must_use]
    pub fn invalid_params(details: impl std::fmt::Display) -> Self {
        Self::new(INVALID_PARAMS, format!("Invalid params: {details}"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// Outgoing request or notification.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonRpcId>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(id: JsonRpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// Outgoing or incoming response. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: JsonRpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(id: JsonRpcId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn error(id: JsonRpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Splits into the result value or the error object.
    ///
    /// # Errors
    ///
    /// The response's error object, or an internal error when neither field
    /// is present.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match (self.result, self.error) {
            (_, Some(err)) => Err(err),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(json!(null)),
        }
    }
}

/// A classified incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    /// Has both `id` and `method`.
    Request {
        id: JsonRpcId,
        method: String,
        params: Option<Value>,
    },
    /// Has `method` but no `id`.
    Notification { method: String, params: Option<Value> },
    /// Has `id` but no `method`.
    Response(JsonRpcResponse),
}

/// Why an incoming value is not a JSON-RPC 2.0 message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JsonRpcClassifyError {
    #[error("missing or invalid jsonrpc version")]
    InvalidVersion,
    #[error("invalid id: {0}")]
    InvalidId(&'static str),
    #[error("message has neither id nor method")]
    Unclassifiable,
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl JsonRpcClassifyError {
    /// Best-effort id of the offending message, for the error reply.
    #[must_use]
    pub fn reply_id(value: &Value) -> JsonRpcId {
        value
            .get("id")
            .and_then(|v| parse_id(v).ok())
            .unwrap_or(JsonRpcId::Null)
    }
}

/// Classify a parsed JSON-RPC value.
///
/// # Errors
///
/// See [`JsonRpcClassifyError`].
pub fn classify(value: Value) -> Result<JsonRpcMessage, JsonRpcClassifyError> {
    if value.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(JsonRpcClassifyError::InvalidVersion);
    }

    let id = value
        .get("id")
        .map(parse_id)
        .transpose()
        .map_err(JsonRpcClassifyError::InvalidId)?;
    let method = value
        .get("method")
        .and_then(Value::as_str)
        .map(String::from);
    let params = value.get("params").cloned();

    match (id, method) {
        (Some(id), Some(method)) => Ok(JsonRpcMessage::Request { id, method, params }),
        (None, Some(method)) => Ok(JsonRpcMessage::Notification { method, params }),
        (Some(_), None) => serde_json::from_value(value)
            .map(JsonRpcMessage::Response)
            .map_err(|e| JsonRpcClassifyError::MalformedResponse(e.to_string())),
        (None, None) => Err(JsonRpcClassifyError::Unclassifiable),
    }
}
