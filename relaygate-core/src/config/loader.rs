//! Configuration loading and validation.
//!
//! Flow: locate file → read → `${VAR}` substitution → parse (YAML, or JSON
//! for `.json` files) → validate → compile constraints.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::error::ConfigError;
use super::schema::Config;
use crate::constraint::CedarConstraints;

/// Configuration file search paths (in priority order) when no explicit path
/// is given.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(path) = std::env::var("RELAYGATE_CONFIG") {
        paths.push(PathBuf::from(path));
    }
    paths.push(PathBuf::from("./relaygate.yaml"));
    paths.push(PathBuf::from("./relaygate.json"));
    paths
}

/// Find the first existing config file.
///
/// # Errors
///
/// `ConfigFileNotFound` listing every path tried.
pub fn find_config_file(explicit_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::ConfigFileNotFound {
            searched: vec![path.to_path_buf()],
        });
    }

    let paths = default_config_paths();
    for path in &paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    Err(ConfigError::ConfigFileNotFound { searched: paths })
}

/// Load configuration from a file path.
///
/// # Errors
///
/// I/O, empty file, missing environment variable or parse errors.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyConfigFile);
    }

    let contents = substitute_env_vars(&contents)?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let config = if is_json {
        serde_json::from_str(&contents)?
    } else {
        serde_yaml::from_str(&contents)?
    };
    Ok(config)
}

/// A validated configuration with its constraints compiled.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub constraints: CedarConstraints,
    pub source: Option<PathBuf>,
}

/// Load, validate and compile a configuration file.
///
/// # Errors
///
/// Anything [`load_config`] or [`validate`] reports.
pub fn load_and_validate(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let config = load_config(path)?;
    let constraints = validate(&config)?;
    tracing::info!(
        path = %path.display(),
        operations = config.operations.len(),
        constraints = constraints.len(),
        "configuration loaded"
    );
    Ok(LoadedConfig {
        config,
        constraints,
        source: Some(path.to_path_buf()),
    })
}

/// Checks the configuration and compiles its constraints.
///
/// # Errors
///
/// Empty operation names, zero timing values or constraints that do not
/// compile.
pub fn validate(config: &Config) -> Result<CedarConstraints, ConfigError> {
    if config.operations.keys().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::EmptyOperationName);
    }

    let timing = &config.timing;
    for (field, value) in [
        ("timing.poll_cooldown", timing.poll_cooldown),
        ("timing.forward_timeout", timing.forward_timeout),
        ("timing.pending_ttl", timing.pending_ttl),
        ("timing.session_ttl", timing.session_ttl),
        ("timing.sweep_interval", timing.sweep_interval),
    ] {
        if value.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroDuration { field });
        }
    }

    Ok(CedarConstraints::compile(config.constraints())?)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment Variable Substitution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// SAFETY: .expect() on LazyLock with a compile-time literal regex pattern.
// The pattern is known-valid and tested by test_env_var_pattern_compiles().
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("BUG: ENV_VAR_PATTERN regex is invalid")
});

/// Substitute environment variables in a string.
///
/// # Syntax
/// - `${VAR}` - Required, fail if not set
/// - `${VAR:-default}` - Optional with default
///
/// # Errors
///
/// `MissingEnvVar` for the first required variable that is unset.
pub fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut missing = None;
    let result = ENV_VAR_PATTERN.replace_all(content, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        match (std::env::var(var_name), cap.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    if let Some(var) = missing {
        return Err(ConfigError::MissingEnvVar {
            var,
            field: "configuration".to_string(),
        });
    }
    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use std::time::Duration;

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_env_var_pattern_compiles() {
        assert!(ENV_VAR_PATTERN.is_match("${A}"));
        assert!(ENV_VAR_PATTERN.is_match("${A_1:-x}"));
        assert!(!ENV_VAR_PATTERN.is_match("$A"));
    }

    #[test]
    #[serial]
    fn test_substitute_env_vars() {
        unsafe {
            std::env::set_var("RELAYGATE_TEST_TABLE", "orders");
            std::env::remove_var("RELAYGATE_TEST_UNSET");
        }
        let out = substitute_env_vars("t: ${RELAYGATE_TEST_TABLE}, u: ${RELAYGATE_TEST_UNSET:-none}")
            .unwrap();
        assert_eq!(out, "t: orders, u: none");

        let err = substitute_env_vars("x: ${RELAYGATE_TEST_UNSET}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar { ref var, .. } if var == "RELAYGATE_TEST_UNSET"));
        unsafe {
            std::env::remove_var("RELAYGATE_TEST_TABLE");
        }
    }

    #[test]
    fn test_load_yaml_and_compile_constraints() {
        let file = write_temp(
            ".yaml",
            r#"
operations:
  resize:
    requires_approval: true
    constraint: "context.args.size > 3"
  report:
    long_running: true
timing:
  poll_cooldown: 1s
"#,
        );
        let loaded = load_and_validate(file.path()).unwrap();
        assert!(loaded.config.requires_approval("resize"));
        assert_eq!(loaded.constraints.len(), 1);
        assert_eq!(loaded.config.timing.poll_cooldown, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_load_json_by_extension() {
        let file = write_temp(
            ".json",
            r#"{"operations": {"run": {"long_running": true}}}"#,
        );
        let loaded = load_and_validate(file.path()).unwrap();
        assert!(loaded.config.is_long_running("run"));
        assert!(loaded.constraints.is_empty());
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = write_temp(".yaml", "  \n");
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::EmptyConfigFile)
        ));
    }

    #[test]
    fn test_bad_constraint_fails_validation() {
        let file = write_temp(
            ".yaml",
            "operations:\n  resize:\n    constraint: \"context.args.size >\"\n",
        );
        assert!(matches!(
            load_and_validate(file.path()),
            Err(ConfigError::InvalidConstraint(_))
        ));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let file = write_temp(".yaml", "timing:\n  forward_timeout: 0s\n");
        assert!(matches!(
            load_and_validate(file.path()),
            Err(ConfigError::ZeroDuration { field: "timing.forward_timeout" })
        ));
    }

    #[test]
    fn test_explicit_missing_path() {
        let err = find_config_file(Some(Path::new("/nonexistent/relaygate.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigFileNotFound { ref searched } if searched.len() == 1));
    }
}
