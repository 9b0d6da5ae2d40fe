//! Runtime timing defaults with environment overrides.

use std::time::Duration;
use tracing::warn;

use super::schema::TimingOverrides;
use crate::governance::approval::ApprovalQueueConfig;
use crate::governance::task::TaskEngineConfig;
use crate::session::SessionManagerConfig;

/// Timing knobs shared by the task engine, approval queue and session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaygateDefaults {
    /// Longest a status check on a pending task is held.
    pub poll_cooldown: Duration,
    /// Timeout of the upstream call made when a pending call is approved.
    pub forward_timeout: Duration,
    /// How long completed task results stay retrievable.
    pub result_retention: Duration,
    /// Interval of the task reaper and the orphan sweep.
    pub task_cleanup_interval: Duration,
    /// Age after which an undecided pending call is dropped.
    pub pending_ttl: Duration,
    /// Sliding session lifetime.
    pub session_ttl: Duration,
    /// Interval of the session sweep.
    pub session_sweep_interval: Duration,
}

impl Default for RelaygateDefaults {
    fn default() -> Self {
        Self {
            poll_cooldown: Duration::from_secs(3),
            forward_timeout: Duration::from_secs(30),
            result_retention: Duration::from_secs(3600),
            task_cleanup_interval: Duration::from_secs(60),
            pending_ttl: Duration::from_secs(3600),
            session_ttl: Duration::from_secs(15 * 60),
            session_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl RelaygateDefaults {
    /// Defaults overridden by `RELAYGATE_*` environment variables.
    ///
    /// Invalid values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            poll_cooldown: Duration::from_millis(parse_env_warn(
                "RELAYGATE_POLL_COOLDOWN_MS",
                millis(default.poll_cooldown),
            )),
            forward_timeout: Duration::from_secs(parse_env_warn(
                "RELAYGATE_FORWARD_TIMEOUT_SECS",
                default.forward_timeout.as_secs(),
            )),
            result_retention: Duration::from_secs(parse_env_warn(
                "RELAYGATE_RESULT_RETENTION_SECS",
                default.result_retention.as_secs(),
            )),
            task_cleanup_interval: parse_env_interval(
                "RELAYGATE_TASK_CLEANUP_INTERVAL_SECS",
                default.task_cleanup_interval,
            ),
            pending_ttl: Duration::from_secs(parse_env_warn(
                "RELAYGATE_PENDING_TTL_SECS",
                default.pending_ttl.as_secs(),
            )),
            session_ttl: Duration::from_secs(parse_env_warn(
                "RELAYGATE_SESSION_TTL_SECS",
                default.session_ttl.as_secs(),
            )),
            session_sweep_interval: parse_env_interval(
                "RELAYGATE_SWEEP_INTERVAL_SECS",
                default.session_sweep_interval,
            ),
        }
    }

    /// Applies the `timing` section of a config file on top of these values.
    #[must_use]
    pub fn with_overrides(mut self, timing: &TimingOverrides) -> Self {
        if let Some(d) = timing.poll_cooldown {
            self.poll_cooldown = d;
        }
        if let Some(d) = timing.forward_timeout {
            self.forward_timeout = d;
        }
        if let Some(d) = timing.result_retention {
            self.result_retention = d;
        }
        if let Some(d) = timing.pending_ttl {
            self.pending_ttl = d;
        }
        if let Some(d) = timing.session_ttl {
            self.session_ttl = d;
        }
        if let Some(d) = timing.sweep_interval {
            self.session_sweep_interval = d;
            self.task_cleanup_interval = d;
        }
        self
    }

    #[must_use]
    pub fn task_engine(&self) -> TaskEngineConfig {
        TaskEngineConfig {
            poll_cooldown: self.poll_cooldown,
            result_retention: self.result_retention,
            cleanup_interval: self.task_cleanup_interval,
        }
    }

    #[must_use]
    pub fn approval_queue(&self) -> ApprovalQueueConfig {
        ApprovalQueueConfig {
            forward_timeout: self.forward_timeout,
            pending_ttl: self.pending_ttl,
            sweep_interval: self.task_cleanup_interval,
        }
    }

    #[must_use]
    pub fn session_manager(&self) -> SessionManagerConfig {
        SessionManagerConfig {
            ttl: self.session_ttl,
            sweep_interval: self.session_sweep_interval,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Parse a whole-second interval; zero is invalid and falls back to `default`.
fn parse_env_interval(name: &str, default: Duration) -> Duration {
    let secs = parse_env_warn(name, default.as_secs());
    if secs == 0 {
        warn!(
            env_var = name,
            default = ?default,
            "Interval must be at least one second, using default"
        );
        return default;
    }
    Duration::from_secs(secs)
}

/// Parse an environment variable with a warning on invalid values.
fn parse_env_warn<T: std::str::FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(val) => match val.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    env_var = name,
                    value = %val,
                    default = %default,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}
