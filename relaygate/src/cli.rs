//! CLI argument types for `relaygate proxy`, `relaygate sqlite` and
//! `relaygate check-config`.
//!
//! Kept out of `main.rs` so integration tests can build them directly.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

// ─────────────────────────────────────────────────────────────────────────────
// Proxy Subcommand Args
// ─────────────────────────────────────────────────────────────────────────────

/// Arguments for `relaygate proxy`.
///
/// Wraps an MCP server: long-running operations are answered with task ids,
/// approval-gated operations wait for a decision on the approval page.
#[derive(Args, Debug, Clone)]
pub struct ProxyArgs {
    /// Policy file (YAML or JSON). Defaults to $RELAYGATE_CONFIG,
    /// ./relaygate.yaml or ./relaygate.json.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address the approval page binds to.
    #[arg(long, default_value = "127.0.0.1")]
    pub approval_host: IpAddr,

    /// Port of the approval page (0 = OS-assigned).
    #[arg(long, default_value_t = 8080)]
    pub approval_port: u16,

    /// Enable debug logging.
    #[arg(long)]
    pub verbose: bool,

    /// Upstream server command and arguments (after `--`).
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Subcommand Args
// ─────────────────────────────────────────────────────────────────────────────

/// Arguments for `relaygate sqlite`.
///
/// Serves `create_db` and `run_sql` over per-session SQLite databases.
#[derive(Args, Debug, Clone)]
pub struct SqliteArgs {
    /// Directory holding the session databases.
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Sliding session lifetime, e.g. `15m`.
    #[arg(long, value_parser = parse_nonzero_duration)]
    pub session_ttl: Option<Duration>,

    /// Interval of the expired-session sweep, e.g. `1m`.
    #[arg(long, value_parser = parse_nonzero_duration)]
    pub sweep_interval: Option<Duration>,

    /// Enable debug logging.
    #[arg(long)]
    pub verbose: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Check-Config Subcommand Args
// ─────────────────────────────────────────────────────────────────────────────

/// Arguments for `relaygate check-config`.
#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Policy file to check. Same search order as `proxy`.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Parses a humantime duration such as `30s` or `15m`; zero is rejected.
fn parse_nonzero_duration(s: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(s).map_err(|e| e.to_string())?;
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct SqliteCli {
        #[command(flatten)]
        args: SqliteArgs,
    }

    #[test]
    fn test_sqlite_durations_parse() {
        let cli = SqliteCli::try_parse_from([
            "sqlite",
            "--session-ttl",
            "15m",
            "--sweep-interval",
            "30s",
        ])
        .unwrap();
        assert_eq!(cli.args.session_ttl, Some(Duration::from_secs(900)));
        assert_eq!(cli.args.sweep_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_zero_durations_rejected() {
        assert!(SqliteCli::try_parse_from(["sqlite", "--sweep-interval", "0s"]).is_err());
        assert!(SqliteCli::try_parse_from(["sqlite", "--session-ttl", "0ms"]).is_err());
    }
}
