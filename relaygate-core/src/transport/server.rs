//! MCP server loop over NDJSON stdio.
//!
//! Reads requests from the client, dispatches `tools/*` to a [`ToolHandler`]
//! and writes responses through a single writer task. Every request runs on
//! its own task, so a tool call parked in a long-poll never holds up `ping`
//! or other calls.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::protocol::{ToolCall, ToolDefinition, ToolResult};
use crate::transport::jsonrpc::{
    INTERNAL_ERROR, INVALID_REQUEST, JsonRpcClassifyError, JsonRpcError, JsonRpcId,
    JsonRpcMessage, JsonRpcResponse, PARSE_ERROR, classify,
};
use crate::transport::ndjson::{FramingError, read_message, write_message};
use crate::transport::upstream::PROTOCOL_VERSION;

/// Serves the `tools/*` methods of an MCP server.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Tools advertised in `tools/list`.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, JsonRpcError>;

    /// Runs one call. `cancel` fires when the client cancels the request or
    /// the server shuts down; it does not fire when the request completes.
    async fn call_tool(
        &self,
        call: ToolCall,
        cancel: CancellationToken,
    ) -> Result<ToolResult, JsonRpcError>;
}

/// Identity reported in the `initialize` response.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub instructions: Option<String>,
}

impl ServerInfo {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
        }
    }
}

type InFlight = Arc<parking_lot::Mutex<HashMap<JsonRpcId, CancellationToken>>>;

/// Stdio MCP server around a [`ToolHandler`].
pub struct McpServer<H> {
    info: Arc<ServerInfo>,
    handler: Arc<H>,
}

impl<H: ToolHandler> McpServer<H> {
    #[must_use]
    pub fn new(info: ServerInfo, handler: Arc<H>) -> Self {
        Self {
            info: Arc::new(info),
            handler,
        }
    }

    /// Serves until EOF on `reader` or until `shutdown` fires.
    ///
    /// At EOF, requests already in flight are allowed to finish and their
    /// responses are written before returning.
    ///
    /// # Errors
    ///
    /// I/O failures on either stream.
    pub async fn serve<R, W>(
        &self,
        mut reader: R,
        writer: W,
        shutdown: CancellationToken,
    ) -> Result<(), FramingError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<JsonRpcResponse>(64);
        let writer_task = tokio::spawn(write_responses(writer, rx));
        let in_flight: InFlight = Arc::default();
        let mut requests = JoinSet::new();
        let mut buf = Vec::new();

        let read_result = loop {
            let value = tokio::select! {
                biased;
                () = shutdown.cancelled() => break Ok(()),
                read = read_message(&mut reader, &mut buf) => match read {
                    Ok(Some(value)) => value,
                    Ok(None) => break Ok(()),
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(error = %e, "unreadable client message");
                        let reply = JsonRpcResponse::error(
                            JsonRpcId::Null,
                            JsonRpcError::new(PARSE_ERROR, e.to_string()),
                        );
                        if tx.send(reply).await.is_err() {
                            break Ok(());
                        }
                        continue;
                    }
                    Err(e) => break Err(e),
                }
            };

            // Reap finished request tasks as we go.
            while requests.try_join_next().is_some() {}

            let reply_id = JsonRpcClassifyError::reply_id(&value);
            match classify(value) {
                Ok(JsonRpcMessage::Request { id, method, params }) => {
                    let cancel = shutdown.child_token();
                    in_flight.lock().insert(id.clone(), cancel.clone());
                    let handler = Arc::clone(&self.handler);
                    let info = Arc::clone(&self.info);
                    let tx = tx.clone();
                    let in_flight = Arc::clone(&in_flight);
                    requests.spawn(async move {
                        let outcome = dispatch(&*handler, &info, &method, params, cancel).await;
                        in_flight.lock().remove(&id);
                        let reply = match outcome {
                            Ok(result) => JsonRpcResponse::success(id, result),
                            Err(err) => {
                                tracing::debug!(method, code = err.code, error = %err.message, "request failed");
                                JsonRpcResponse::error(id, err)
                            }
                        };
                        // Writer gone means the client is gone.
                        let _ = tx.send(reply).await;
                    });
                }
                Ok(JsonRpcMessage::Notification { method, params }) => {
                    if method == "notifications/cancelled" {
                        cancel_request(&in_flight, params.as_ref());
                    } else {
                        tracing::debug!(method, "client notification");
                    }
                }
                Ok(JsonRpcMessage::Response(response)) => {
                    tracing::debug!(id = %response.id, "ignoring client response");
                }
                Err(e) => {
                    let reply =
                        JsonRpcResponse::error(reply_id, JsonRpcError::new(INVALID_REQUEST, e.to_string()));
                    if tx.send(reply).await.is_err() {
                        break Ok(());
                    }
                }
            }
        };

        if shutdown.is_cancelled() {
            requests.abort_all();
        }
        while requests.join_next().await.is_some() {}
        drop(tx);

        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "response writer failed"),
            Err(e) => tracing::warn!(error = %e, "response writer panicked"),
        }
        read_result
    }
}

async fn dispatch<H: ToolHandler>(
    handler: &H,
    info: &ServerInfo,
    method: &str,
    params: Option<Value>,
    cancel: CancellationToken,
) -> Result<Value, JsonRpcError> {
    match method {
        "initialize" => {
            let requested = params
                .as_ref()
                .and_then(|p| p.get("protocolVersion"))
                .and_then(Value::as_str)
                .unwrap_or(PROTOCOL_VERSION);
            let mut result = json!({
                "protocolVersion": requested,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": { "name": info.name, "version": info.version },
            });
            if let Some(instructions) = &info.instructions {
                result["instructions"] = json!(instructions);
            }
            Ok(result)
        }
        "ping" => Ok(json!({})),
        "tools/list" => {
            let tools = handler.list_tools().await?;
            Ok(json!({ "tools": tools }))
        }
        "tools/call" => {
            let call: ToolCall = serde_json::from_value(params.unwrap_or(Value::Null))
                .map_err(JsonRpcError::invalid_params)?;
            tracing::debug!(tool = %call.name, "tools/call");
            let result = handler.call_tool(call, cancel).await?;
            serde_json::to_value(result)
                .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))
        }
        other => Err(JsonRpcError::method_not_found(other)),
    }
}

fn cancel_request(in_flight: &InFlight, params: Option<&Value>) {
    let Some(id) = params
        .and_then(|p| p.get("requestId"))
        .and_then(|v| serde_json::from_value::<JsonRpcId>(v.clone()).ok())
    else {
        return;
    };
    if let Some(token) = in_flight.lock().get(&id) {
        tracing::debug!(request_id = %id, "request cancelled by client");
        token.cancel();
    }
}

async fn write_responses<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<JsonRpcResponse>,
) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        write_message(&mut writer, &response).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    struct EchoHandler;

    #[async_trait::async_trait]
    impl ToolHandler for EchoHandler {
        async fn list_tools(&self) -> Result<Vec<ToolDefinition>, JsonRpcError> {
            Ok(vec![ToolDefinition::new("echo", "echo", json!({"type": "object"}))])
        }

        async fn call_tool(
            &self,
            call: ToolCall,
            cancel: CancellationToken,
        ) -> Result<ToolResult, JsonRpcError> {
            if call.name == "wait" {
                cancel.cancelled().await;
                return Ok(ToolResult::error("cancelled"));
            }
            Ok(ToolResult::text(call.str_arg("text").unwrap_or_default()))
        }
    }

    struct Client {
        to_server: DuplexStream,
        from_server: tokio::io::Lines<BufReader<DuplexStream>>,
    }

    impl Client {
        async fn send(&mut self, msg: Value) {
            let mut line = serde_json::to_vec(&msg).unwrap();
            line.push(b'\n');
            self.to_server.write_all(&line).await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = tokio::time::timeout(Duration::from_secs(5), self.from_server.next_line())
                .await
                .expect("response in time")
                .unwrap()
                .expect("server closed");
            serde_json::from_str(&line).unwrap()
        }
    }

    fn start_server() -> (Client, tokio::task::JoinHandle<Result<(), FramingError>>) {
        let (client_out, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_in) = tokio::io::duplex(64 * 1024);
        let server = McpServer::new(ServerInfo::new("test"), Arc::new(EchoHandler));
        let handle = tokio::spawn(async move {
            server
                .serve(BufReader::new(server_in), server_out, CancellationToken::new())
                .await
        });
        let client = Client {
            to_server: client_out,
            from_server: BufReader::new(client_in).lines(),
        };
        (client, handle)
    }

    #[tokio::test]
    async fn test_initialize_list_and_call() {
        let (mut client, _handle) = start_server();

        client
            .send(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {"protocolVersion": "2025-03-26", "capabilities": {}}}))
            .await;
        let init = client.recv().await;
        assert_eq!(init["id"], json!(1));
        assert_eq!(init["result"]["protocolVersion"], json!("2025-03-26"));
        assert_eq!(init["result"]["serverInfo"]["name"], json!("test"));

        client
            .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        client
            .send(json!({"jsonrpc": "2.0", "id": "l", "method": "tools/list"}))
            .await;
        let list = client.recv().await;
        assert_eq!(list["id"], json!("l"));
        assert_eq!(list["result"]["tools"][0]["name"], json!("echo"));

        client
            .send(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": {"name": "echo", "arguments": {"text": "hello"}}}))
            .await;
        let call = client.recv().await;
        assert_eq!(call["result"]["content"][0]["text"], json!("hello"));
    }

    #[tokio::test]
    async fn test_errors_for_bad_input() {
        let (mut client, _handle) = start_server();

        client.to_server.write_all(b"{oops\n").await.unwrap();
        let parse = client.recv().await;
        assert_eq!(parse["error"]["code"], json!(PARSE_ERROR));
        assert_eq!(parse["id"], Value::Null);

        client
            .send(json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"}))
            .await;
        let missing = client.recv().await;
        assert_eq!(missing["error"]["code"], json!(-32601));

        client
            .send(json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call", "params": {"arguments": {}}}))
            .await;
        let invalid = client.recv().await;
        assert_eq!(invalid["error"]["code"], json!(-32602));
    }

    #[tokio::test]
    async fn test_slow_call_does_not_block_ping() {
        let (mut client, _handle) = start_server();

        client
            .send(json!({"jsonrpc": "2.0", "id": 10, "method": "tools/call",
                "params": {"name": "wait", "arguments": {}}}))
            .await;
        client
            .send(json!({"jsonrpc": "2.0", "id": 11, "method": "ping"}))
            .await;
        let pong = client.recv().await;
        assert_eq!(pong["id"], json!(11));

        client
            .send(json!({"jsonrpc": "2.0", "method": "notifications/cancelled",
                "params": {"requestId": 10}}))
            .await;
        let cancelled = client.recv().await;
        assert_eq!(cancelled["id"], json!(10));
        assert_eq!(cancelled["result"]["isError"], json!(true));
    }

    #[tokio::test]
    async fn test_eof_flushes_in_flight_responses() {
        let (mut client, handle) = start_server();
        client
            .send(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": {"name": "echo", "arguments": {"text": "last"}}}))
            .await;
        client.to_server.shutdown().await.unwrap();

        let reply = client.recv().await;
        assert_eq!(reply["result"]["content"][0]["text"], json!("last"));
        handle.await.unwrap().unwrap();
    }
}
