//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::tasks::channel::{DEFAULT_BROADCAST_CAPACITY, MAX_BROADCAST_CAPACITY};

/// Task engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Port the HTTP/WebSocket server listens on.
    pub port: u16,
    /// Capacity of the update broadcast channel. Subscribers further behind
    /// than this many snapshots see a lag notice and resync.
    pub broadcast_capacity: usize,
    /// How long finished tasks are kept before the retention sweep drops them.
    /// `None` keeps them for the lifetime of the process.
    pub retention: Option<Duration>,
    /// Interval between retention sweeps.
    pub retention_sweep_interval: Duration,
    /// Directory for the rolling log file. Logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            retention: None,
            retention_sweep_interval: Duration::from_secs(60), // 1 minute
            log_dir: None,
        }
    }
}

impl EngineConfig {
    /// Build from `MEDIA_TASKS_*` environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let retention = std::env::var("MEDIA_TASKS_RETENTION_SECS")
            .ok()
            .and_then(|v| parse_or_warn::<u64>("MEDIA_TASKS_RETENTION_SECS", &v))
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            port: env_or("MEDIA_TASKS_PORT", defaults.port),
            broadcast_capacity: env_or(
                "MEDIA_TASKS_BROADCAST_CAPACITY",
                defaults.broadcast_capacity,
            ),
            retention,
            retention_sweep_interval: Duration::from_secs(env_or(
                "MEDIA_TASKS_RETENTION_SWEEP_SECS",
                defaults.retention_sweep_interval.as_secs(),
            )),
            log_dir: std::env::var("MEDIA_TASKS_LOG_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broadcast_capacity == 0 || self.broadcast_capacity > MAX_BROADCAST_CAPACITY {
            return Err(ConfigError::InvalidValue {
                key: "broadcast_capacity".to_string(),
                message: format!("must be between 1 and {MAX_BROADCAST_CAPACITY}"),
            });
        }
        if self.retention.is_some() && self.retention_sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "retention_sweep_interval".to_string(),
                message: "must be greater than zero when retention is enabled".to_string(),
            });
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_or_warn(key, &v))
        .unwrap_or(default)
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value, "Ignoring unparseable configuration value");
            None
        }
    }
}
