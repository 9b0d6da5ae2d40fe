//! `relaygate` commands: MCP servers built on `relaygate-core`.
//!
//! - `proxy` wraps an upstream MCP server with long-running tasks and
//!   human approval.
//! - `sqlite` serves per-session SQLite databases.
//! - `check-config` validates a policy file.

pub mod check;
pub mod cli;
pub mod error;
pub mod proxy;
pub mod sqlite;

/// Name of the polling tool added to proxied servers.
pub const CHECK_TASK_TOOL: &str = "check_long_running_task";
