//! `relaygate sqlite`: per-session SQLite databases over MCP.
//!
//! `create_db` allocates a session and returns its key; `run_sql` runs one
//! statement against that session's database and renews it.

use std::sync::Arc;

use async_trait::async_trait;
use relaygate_core::config::RelaygateDefaults;
use relaygate_core::protocol::{ToolCall, ToolDefinition, ToolResult};
use relaygate_core::session::{SessionManager, SqliteBackend, run_sql};
use relaygate_core::transport::jsonrpc::INTERNAL_ERROR;
use relaygate_core::transport::{JsonRpcError, McpServer, ServerInfo, ToolHandler};
use serde_json::{Value, json};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use crate::cli::SqliteArgs;
use crate::error::CliError;

pub const CREATE_DB_TOOL: &str = "create_db";
pub const RUN_SQL_TOOL: &str = "run_sql";

/// Tool handler over a SQLite session manager.
pub struct SqliteTools {
    sessions: Arc<SessionManager<SqliteBackend>>,
}

impl SqliteTools {
    #[must_use]
    pub fn new(sessions: Arc<SessionManager<SqliteBackend>>) -> Self {
        Self { sessions }
    }

    async fn create_db(&self) -> Result<ToolResult, JsonRpcError> {
        let sessions = Arc::clone(&self.sessions);
        let key = tokio::task::spawn_blocking(move || sessions.allocate())
            .await
            .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))?
            .map_err(|e| {
                tracing::error!(error = %e, "failed to create session database");
                JsonRpcError::new(INTERNAL_ERROR, format!("failed to create db: {e}"))
            })?;
        Ok(ToolResult::text(json!({"session": key}).to_string()))
    }

    async fn run_sql(&self, call: &ToolCall) -> Result<ToolResult, JsonRpcError> {
        let (Some(session), Some(sql)) = (non_empty(call, "session"), non_empty(call, "sql")) else {
            return Ok(ToolResult::error(
                "missing required parameters 'session' or 'sql'",
            ));
        };
        let session = session.to_string();
        let sql = sql.to_string();

        let sessions = Arc::clone(&self.sessions);
        let outcome = tokio::task::spawn_blocking(move || {
            sessions.with_session(&session, |conn| run_sql(conn, &sql))
        })
        .await
        .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))?;

        Ok(match outcome {
            Ok(value) => ToolResult::text(value.to_string()),
            Err(e) => {
                tracing::debug!(error = %e, "run_sql failed");
                ToolResult::error(e.to_string())
            }
        })
    }
}

fn non_empty<'a>(call: &'a ToolCall, key: &str) -> Option<&'a str> {
    call.str_arg(key).filter(|s| !s.trim().is_empty())
}

fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            CREATE_DB_TOOL,
            "Create a new SQLite database session. This will provide a session that will be \
             used with other method calls",
            json!({"type": "object", "properties": {}}),
        ),
        ToolDefinition::new(
            RUN_SQL_TOOL,
            "Execute a SQL statement against a session database",
            json!({
                "type": "object",
                "properties": {
                    "session": {
                        "type": "string",
                        "description": "Session ID returned after you create a database with create_db"
                    },
                    "sql": {
                        "type": "string",
                        "description": "SQL statement to run. Must only be a single SQL statement."
                    }
                },
                "required": ["session", "sql"]
            }),
        ),
    ]
}

#[async_trait]
impl ToolHandler for SqliteTools {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, JsonRpcError> {
        Ok(tool_definitions())
    }

    async fn call_tool(
        &self,
        call: ToolCall,
        _cancel: CancellationToken,
    ) -> Result<ToolResult, JsonRpcError> {
        match call.name.as_str() {
            CREATE_DB_TOOL => self.create_db().await,
            RUN_SQL_TOOL => self.run_sql(&call).await,
            other => Err(JsonRpcError::invalid_params(format!("unknown tool '{other}'"))),
        }
    }
}

/// Runs the SQLite server until stdin closes or Ctrl-C.
///
/// # Errors
///
/// Failure to create the data directory, or stdio errors.
pub async fn run_sqlite(args: SqliteArgs) -> Result<i32, CliError> {
    let mut config = RelaygateDefaults::from_env().session_manager();
    if let Some(ttl) = args.session_ttl {
        config.ttl = ttl;
    }
    if let Some(interval) = args.sweep_interval {
        config.sweep_interval = interval;
    }
    tracing::info!(
        data_dir = %args.data_dir.display(),
        ttl = ?config.ttl,
        "starting sqlite sessions"
    );
    let sessions = Arc::new(SessionManager::new(&args.data_dir, config, SqliteBackend)?);

    let shutdown = CancellationToken::new();
    let sweeper = sessions.spawn_sweeper(shutdown.clone());
    let interrupt = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupted, shutting down"),
                () = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        })
    };

    let server = McpServer::new(
        ServerInfo::new("relaygate-sqlite"),
        Arc::new(SqliteTools::new(Arc::clone(&sessions))),
    );
    let served = server
        .serve(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            shutdown.clone(),
        )
        .await;

    shutdown.cancel();
    let _ = interrupt.await;
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "session sweeper failed");
    }
    served?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_core::session::SessionManagerConfig;
    use std::time::Duration;

    fn tools(dir: &std::path::Path, ttl: Duration) -> SqliteTools {
        let config = SessionManagerConfig {
            ttl,
            sweep_interval: Duration::from_secs(60),
        };
        SqliteTools::new(Arc::new(
            SessionManager::new(dir, config, SqliteBackend).unwrap(),
        ))
    }

    fn session_from_result(result: &ToolResult) -> Option<String> {
        let value: Value = serde_json::from_str(&result.text_content()).ok()?;
        value.get("session")?.as_str().map(String::from)
    }

    async fn call(tools: &SqliteTools, name: &str, args: Value) -> ToolResult {
        tools
            .call_tool(ToolCall::new(name, args), CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_query() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(dir.path(), Duration::from_secs(60));

        let created = call(&tools, CREATE_DB_TOOL, json!({})).await;
        let session = session_from_result(&created).unwrap();
        assert_eq!(session.len(), 32);

        let sql = |s: &str| json!({"session": session, "sql": s});
        let ok = call(&tools, RUN_SQL_TOOL, sql("CREATE TABLE kv (k TEXT, v INTEGER)")).await;
        assert_eq!(ok.text_content(), r#"{"result":"ok"}"#);
        call(&tools, RUN_SQL_TOOL, sql("INSERT INTO kv VALUES ('a', 1)")).await;

        let rows = call(&tools, RUN_SQL_TOOL, sql("SELECT k, v FROM kv")).await;
        let parsed: Value = serde_json::from_str(&rows.text_content()).unwrap();
        assert_eq!(parsed, json!({"results": [{"k": "a", "v": 1}]}));
    }

    #[tokio::test]
    async fn test_invalid_and_expired_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(dir.path(), Duration::from_millis(50));

        let invalid = call(&tools, RUN_SQL_TOOL, json!({"session": "nope", "sql": "SELECT 1"})).await;
        assert!(invalid.is_error);
        assert_eq!(invalid.text_content(), "invalid session");

        let session = session_from_result(&call(&tools, CREATE_DB_TOOL, json!({})).await).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let expired = call(&tools, RUN_SQL_TOOL, json!({"session": session, "sql": "SELECT 1"})).await;
        assert_eq!(expired.text_content(), "session expired");
        let after = call(&tools, RUN_SQL_TOOL, json!({"session": session, "sql": "SELECT 1"})).await;
        assert_eq!(after.text_content(), "invalid session");
    }

    #[tokio::test]
    async fn test_missing_arguments_and_unknown_tool() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(dir.path(), Duration::from_secs(60));

        let missing = call(&tools, RUN_SQL_TOOL, json!({"session": ""})).await;
        assert!(missing.is_error);

        let err = tools
            .call_tool(ToolCall::new("drop_db", json!({})), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.message.contains("drop_db"));
    }

    #[tokio::test]
    async fn test_sql_error_is_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(dir.path(), Duration::from_secs(60));
        let session = session_from_result(&call(&tools, CREATE_DB_TOOL, json!({})).await).unwrap();

        let bad = call(&tools, RUN_SQL_TOOL, json!({"session": session, "sql": "SELEKT"})).await;
        assert!(bad.is_error);
        assert!(bad.text_content().starts_with("sql error: "));
    }
}
