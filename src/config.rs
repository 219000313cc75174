//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
const DEFAULT_MAX_CONCURRENT_ACTIVITIES: usize = 64;
const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 48 * 60 * 60;
const DEFAULT_GRACE_PERIOD_SECS: u64 = 24 * 60 * 60;
const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Engine-level settings.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Idle sleep between empty queue polls.
    pub poll_interval: Duration,
    /// Upper bound on activities executing at once across all instances.
    pub max_concurrent_activities: usize,
    /// Directory for the filesystem store; `None` selects the in-memory store.
    pub store_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_concurrent_activities: DEFAULT_MAX_CONCURRENT_ACTIVITIES,
            store_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `ROOMFLOW_POLL_INTERVAL_MS`: idle poll interval (default: 10)
    /// - `ROOMFLOW_MAX_CONCURRENT_ACTIVITIES`: activity concurrency (default: 64)
    /// - `ROOMFLOW_STORE_DIR`: filesystem store root (default: in-memory)
    pub fn from_env() -> Result<Self, ConfigError> {
        let poll_interval_ms: u64 = parse_env(
            "ROOMFLOW_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
            "must be a positive integer",
        )?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("ROOMFLOW_POLL_INTERVAL_MS", "must be a positive integer"));
        }

        let max_concurrent_activities: usize = parse_env(
            "ROOMFLOW_MAX_CONCURRENT_ACTIVITIES",
            DEFAULT_MAX_CONCURRENT_ACTIVITIES,
            "must be a positive integer",
        )?;
        if max_concurrent_activities == 0 {
            return Err(ConfigError::Invalid(
                "ROOMFLOW_MAX_CONCURRENT_ACTIVITIES",
                "must be a positive integer",
            ));
        }

        let store_dir = std::env::var("ROOMFLOW_STORE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_concurrent_activities,
            store_dir,
        })
    }
}

/// Timing and bounds for a project lifecycle. Stored in the orchestration
/// input, so a running project keeps the values it started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleConfig {
    pub inactivity_timeout_ms: u64,
    pub grace_period_ms: u64,
    pub max_iterations: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: DEFAULT_INACTIVITY_TIMEOUT_SECS * 1000,
            grace_period_ms: DEFAULT_GRACE_PERIOD_SECS * 1000,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl LifecycleConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `ROOMFLOW_INACTIVITY_TIMEOUT_SECS`: inactivity window (default: 172800)
    /// - `ROOMFLOW_GRACE_PERIOD_SECS`: post-completion grace window (default: 86400)
    /// - `ROOMFLOW_MAX_ITERATIONS`: refinement rounds per cycle (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        let inactivity_secs: u64 = parse_env(
            "ROOMFLOW_INACTIVITY_TIMEOUT_SECS",
            DEFAULT_INACTIVITY_TIMEOUT_SECS,
            "must be a number of seconds",
        )?;
        let grace_secs: u64 = parse_env(
            "ROOMFLOW_GRACE_PERIOD_SECS",
            DEFAULT_GRACE_PERIOD_SECS,
            "must be a number of seconds",
        )?;
        let max_iterations: u32 =
            parse_env("ROOMFLOW_MAX_ITERATIONS", DEFAULT_MAX_ITERATIONS, "must be a positive integer")?;
        if max_iterations == 0 {
            return Err(ConfigError::Invalid("ROOMFLOW_MAX_ITERATIONS", "must be a positive integer"));
        }

        Ok(Self {
            inactivity_timeout_ms: inactivity_secs.saturating_mul(1000),
            grace_period_ms: grace_secs.saturating_mul(1000),
            max_iterations,
        })
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: T, reason: &'static str) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key, reason)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
