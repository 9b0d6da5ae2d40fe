//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::constraint::ConstraintError;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ─────────────────────────────────────────────────────────────────────────
    // Loading
    // ─────────────────────────────────────────────────────────────────────────
    #[error("no configuration file found (searched: {searched:?})")]
    ConfigFileNotFound { searched: Vec<PathBuf> },

    #[error("configuration file is empty")]
    EmptyConfigFile,

    /// `${VAR}` without a default and the variable is unset.
    #[error("environment variable '{var}' is not set (referenced in {field})")]
    MissingEnvVar { var: String, field: String },

    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────────────────
    // Validation
    // ─────────────────────────────────────────────────────────────────────────
    #[error("operation names must not be empty")]
    EmptyOperationName,

    #[error("'{field}' must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error(transparent)]
    InvalidConstraint(#[from] ConstraintError),
}
