//! MCP plumbing: JSON-RPC types, NDJSON framing, the stdio server loop and
//! the upstream client.
//!
//! The server side ([`server`]) serves any [`ToolHandler`]; the client side
//! ([`upstream`]) forwards to a wrapped MCP server process.

pub mod jsonrpc;
pub mod mock;
pub mod ndjson;
pub mod server;
pub mod upstream;

pub use jsonrpc::{JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
pub use server::{McpServer, ServerInfo, ToolHandler};
pub use upstream::{
    StdioUpstream, UpstreamCommand, UpstreamError, UpstreamForwarder, forward_error,
    forward_with_timeout,
};
