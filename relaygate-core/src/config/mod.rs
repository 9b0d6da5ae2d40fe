//! Configuration: operation policies, timing defaults and file loading.

pub mod defaults;
pub mod duration_format;
pub mod error;
pub mod loader;
pub mod schema;

pub use defaults::RelaygateDefaults;
pub use error::ConfigError;
pub use loader::{LoadedConfig, find_config_file, load_and_validate, load_config, validate};
pub use schema::{Config, OperationDefaults, OperationPolicy, TimingOverrides};
