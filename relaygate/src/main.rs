//! relaygate CLI entry point.
//!
//! Dispatches to `proxy` (wrap an MCP server), `sqlite` (session databases)
//! or `check-config`.

use clap::{Parser, Subcommand};

use relaygate::check::run_check_config;
use relaygate::cli::{CheckConfigArgs, ProxyArgs, SqliteArgs};
use relaygate::proxy::run_proxy;
use relaygate::sqlite::run_sqlite;

// ─────────────────────────────────────────────────────────────────────────────
// CLI Definitions
// ─────────────────────────────────────────────────────────────────────────────

/// relaygate: long-running tasks, human approval and session databases for
/// MCP servers.
#[derive(Parser)]
#[command(name = "relaygate", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wrap an MCP server with long-running tasks and approvals.
    Proxy(ProxyArgs),
    /// Serve per-session SQLite databases.
    Sqlite(SqliteArgs),
    /// Validate a policy file and print a summary.
    CheckConfig(CheckConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Point
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (name, outcome) = match cli.command {
        Commands::Proxy(args) => {
            init_tracing(args.verbose);
            ("proxy", run_proxy(args).await)
        }
        Commands::Sqlite(args) => {
            init_tracing(args.verbose);
            ("sqlite", run_sqlite(args).await)
        }
        Commands::CheckConfig(args) => {
            init_tracing(false);
            ("check-config", run_check_config(&args))
        }
    };

    let code = match outcome {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "{name} failed");
            eprintln!("relaygate {name}: {e}");
            1
        }
    };
    std::process::exit(code);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracing Init
// ─────────────────────────────────────────────────────────────────────────────

/// Installs a stderr subscriber; stdout carries MCP traffic.
///
/// `verbose` forces `debug`; otherwise `RUST_LOG` applies, defaulting to `info`.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
