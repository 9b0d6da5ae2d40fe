//! Errors of the `relaygate` commands.

use relaygate_core::config::ConfigError;
use relaygate_core::session::SessionError;
use relaygate_core::transport::UpstreamError;
use relaygate_core::transport::ndjson::FramingError;

/// Startup and serving failures. Each one ends the process with exit code 1.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("session storage error: {0}")]
    Session(#[from] SessionError),

    #[error("stdio error: {0}")]
    Stdio(#[from] FramingError),

    #[error("failed to start approval service on {addr}: {source}")]
    ApprovalBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no upstream command given")]
    MissingCommand,
}
