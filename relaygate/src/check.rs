//! Policy file discovery and `relaygate check-config`.

use std::path::Path;

use relaygate_core::config::{
    Config, ConfigError, LoadedConfig, RelaygateDefaults, find_config_file, load_and_validate,
    validate,
};

use crate::cli::CheckConfigArgs;
use crate::error::CliError;

/// Loads the policy file.
///
/// An explicit path must exist. Without one the default locations are
/// searched; when none exists every operation passes straight through.
///
/// # Errors
///
/// Missing explicit file, parse and validation errors.
pub fn load_policies(explicit: Option<&Path>) -> Result<LoadedConfig, CliError> {
    match find_config_file(explicit) {
        Ok(path) => Ok(load_and_validate(&path)?),
        Err(ConfigError::ConfigFileNotFound { searched }) if explicit.is_none() => {
            tracing::warn!(
                searched = ?searched,
                "no configuration file found, all operations pass through"
            );
            let config = Config::default();
            let constraints = validate(&config)?;
            Ok(LoadedConfig {
                config,
                constraints,
                source: None,
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Validates a policy file and prints a summary to stdout.
///
/// # Errors
///
/// Anything [`load_policies`] reports.
pub fn run_check_config(args: &CheckConfigArgs) -> Result<i32, CliError> {
    let loaded = load_policies(args.config.as_deref())?;
    let config = &loaded.config;
    let defaults = RelaygateDefaults::from_env().with_overrides(&config.timing);

    match &loaded.source {
        Some(path) => println!("config: {}", path.display()),
        None => println!("config: none (all operations pass through)"),
    }
    println!("operations: {}", config.operations.len());
    for (name, policy) in &config.operations {
        let mut flags = Vec::new();
        if policy.requires_approval {
            flags.push("approval");
        }
        if policy.long_running {
            flags.push("long-running");
        }
        if policy.constraint.is_some() {
            flags.push("constraint");
        }
        let flags = if flags.is_empty() {
            "pass-through".to_string()
        } else {
            flags.join(", ")
        };
        println!("  {name}: {flags}");
    }
    println!(
        "timing: poll_cooldown={} forward_timeout={} result_retention={} pending_ttl={} session_ttl={}",
        humantime::format_duration(defaults.poll_cooldown),
        humantime::format_duration(defaults.forward_timeout),
        humantime::format_duration(defaults.result_retention),
        humantime::format_duration(defaults.pending_ttl),
        humantime::format_duration(defaults.session_ttl),
    );
    Ok(0)
}
