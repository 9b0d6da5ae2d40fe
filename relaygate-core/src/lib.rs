//! relaygate core: deferred execution for MCP tool calls.
//!
//! - [`governance::task`] runs work in the background and hands out task ids
//!   to poll.
//! - [`governance::approval`] holds calls until a human approves or rejects
//!   them.
//! - [`session`] hands out short-lived, file-backed sessions behind opaque
//!   keys.
//! - [`governance::Gate`] owns one task engine and one approval queue and
//!   routes each call by its configured policy.
//!
//! The `relaygate` binary wires these into MCP servers speaking NDJSON over
//! stdio.

pub mod config;
pub mod constraint;
pub mod error;
pub mod governance;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{GateError, GateResult};
