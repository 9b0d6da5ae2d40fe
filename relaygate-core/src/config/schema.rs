//! Configuration schema.
//!
//! ```yaml
//! defaults:
//!   requires_approval: false
//! operations:
//!   delete_table:
//!     requires_approval: true
//!     constraint: 'context.args.table != "users"'
//!   build_report:
//!     long_running: true
//! timing:
//!   poll_cooldown: 3s
//!   forward_timeout: 30s
//! ```
//!
//! Loaded once at startup; immutable afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::duration_format;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Policy for operations not listed under `operations`.
    #[serde(default)]
    pub defaults: OperationDefaults,

    /// Per-operation policy, keyed by tool name.
    #[serde(default)]
    pub operations: BTreeMap<String, OperationPolicy>,

    /// Overrides for the runtime defaults.
    #[serde(default)]
    pub timing: TimingOverrides,
}

/// How one operation is handled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OperationPolicy {
    /// Hold the call until a human approves or rejects it.
    pub requires_approval: bool,
    /// Cedar condition over `context.args`; the call is refused when false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    /// Run the call in the background and answer with a task id.
    pub long_running: bool,
}

/// Policy applied to operations absent from `operations`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OperationDefaults {
    pub requires_approval: bool,
    pub long_running: bool,
}

/// Timing overrides. Unset fields keep the environment/default value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingOverrides {
    #[serde(
        default,
        deserialize_with = "duration_format::deserialize_option",
        serialize_with = "duration_format::serialize_option"
    )]
    pub poll_cooldown: Option<Duration>,
    #[serde(
        default,
        deserialize_with = "duration_format::deserialize_option",
        serialize_with = "duration_format::serialize_option"
    )]
    pub forward_timeout: Option<Duration>,
    #[serde(
        default,
        deserialize_with = "duration_format::deserialize_option",
        serialize_with = "duration_format::serialize_option"
    )]
    pub result_retention: Option<Duration>,
    #[serde(
        default,
        deserialize_with = "duration_format::deserialize_option",
        serialize_with = "duration_format::serialize_option"
    )]
    pub pending_ttl: Option<Duration>,
    #[serde(
        default,
        deserialize_with = "duration_format::deserialize_option",
        serialize_with = "duration_format::serialize_option"
    )]
    pub session_ttl: Option<Duration>,
    #[serde(
        default,
        deserialize_with = "duration_format::deserialize_option",
        serialize_with = "duration_format::serialize_option"
    )]
    pub sweep_interval: Option<Duration>,
}

impl Config {
    /// Effective policy for `name`.
    #[must_use]
    pub fn policy_for(&self, name: &str) -> OperationPolicy {
        self.operations
            .get(name)
            .cloned()
            .unwrap_or(OperationPolicy {
                requires_approval: self.defaults.requires_approval,
                constraint: None,
                long_running: self.defaults.long_running,
            })
    }

    #[must_use]
    pub fn requires_approval(&self, name: &str) -> bool {
        self.operations
            .get(name)
            .map_or(self.defaults.requires_approval, |p| p.requires_approval)
    }

    #[must_use]
    pub fn is_long_running(&self, name: &str) -> bool {
        self.operations
            .get(name)
            .map_or(self.defaults.long_running, |p| p.long_running)
    }

    /// Whether any call can be answered with a task id instead of a result.
    #[must_use]
    pub fn has_deferred_operations(&self) -> bool {
        self.defaults.requires_approval
            || self.defaults.long_running
            || self
                .operations
                .values()
                .any(|p| p.requires_approval || p.long_running)
    }

    /// Whether any call can end up in the approval queue.
    #[must_use]
    pub fn has_approvals(&self) -> bool {
        self.defaults.requires_approval || self.operations.values().any(|p| p.requires_approval)
    }

    /// `(tool, expression)` pairs for every configured constraint.
    pub fn constraints(&self) -> impl Iterator<Item = (&str, &str)> {
        self.operations.iter().filter_map(|(name, policy)| {
            policy
                .constraint
                .as_deref()
                .map(|expr| (name.as_str(), expr))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_lookup_falls_back_to_defaults() {
        let config: Config = serde_yaml::from_str(
            r#"
defaults:
  requires_approval: true
operations:
  read_rows: {}
  report:
    long_running: true
"#,
        )
        .unwrap();

        assert!(config.requires_approval("anything"));
        assert!(!config.requires_approval("read_rows"));
        assert!(config.is_long_running("report"));
        assert!(!config.is_long_running("anything"));
        assert_eq!(
            config.policy_for("anything"),
            OperationPolicy {
                requires_approval: true,
                constraint: None,
                long_running: false,
            }
        );
        assert!(config.has_deferred_operations());
        assert!(config.has_approvals());
    }

    #[test]
    fn test_empty_config_defers_nothing() {
        let config = Config::default();
        assert!(!config.has_deferred_operations());
        assert!(!config.has_approvals());
        assert_eq!(config.constraints().count(), 0);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = serde_yaml::from_str::<Config>("operations:\n  x:\n    approve: true\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_timing_overrides_parse() {
        let config: Config =
            serde_yaml::from_str("timing:\n  poll_cooldown: 500ms\n  session_ttl: 15m\n").unwrap();
        assert_eq!(config.timing.poll_cooldown, Some(Duration::from_millis(500)));
        assert_eq!(config.timing.session_ttl, Some(Duration::from_secs(900)));
        assert_eq!(config.timing.forward_timeout, None);
    }
}
