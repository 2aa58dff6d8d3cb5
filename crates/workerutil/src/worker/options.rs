//! Worker configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::WorkerError;

/// Immutable configuration for one worker instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Name used to label logs and metrics
    pub name: String,

    /// Identity passed to the store so it can attribute claims
    pub worker_hostname: String,

    /// Maximum concurrent handler invocations
    pub num_handlers: usize,

    /// Dequeue polling interval
    #[serde(with = "duration_millis")]
    pub interval: Duration,

    /// Lease renewal interval (zero disables heartbeats)
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Stop after this many dequeue attempts (zero = unbounded)
    pub num_total_jobs: u64,

    /// Stop after being active this long (zero = unbounded)
    #[serde(with = "duration_millis")]
    pub max_active_time: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            worker_hostname: format!("worker-{}", Uuid::now_v7()),
            num_handlers: 1,
            interval: Duration::from_secs(1),
            heartbeat_interval: Duration::ZERO,
            num_total_jobs: 0,
            max_active_time: Duration::ZERO,
        }
    }
}

impl WorkerOptions {
    /// Create options for a named worker
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create options from environment variables
    ///
    /// Environment variables:
    /// - `WORKER_NAME`: Worker name (default: "worker")
    /// - `WORKER_HOSTNAME`: Claim identity (default: "worker-<uuid>")
    /// - `WORKER_NUM_HANDLERS`: Maximum concurrent handlers (default: 1)
    /// - `WORKER_INTERVAL_MS`: Dequeue interval (default: 1000)
    /// - `WORKER_HEARTBEAT_INTERVAL_MS`: Heartbeat interval, 0 disables (default: 0)
    /// - `WORKER_NUM_TOTAL_JOBS`: Dequeue budget, 0 is unbounded (default: 0)
    /// - `WORKER_MAX_ACTIVE_TIME_MS`: Active time budget, 0 is unbounded (default: 0)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            name: std::env::var("WORKER_NAME").unwrap_or(defaults.name),
            worker_hostname: std::env::var("WORKER_HOSTNAME").unwrap_or(defaults.worker_hostname),
            num_handlers: env_parse("WORKER_NUM_HANDLERS").unwrap_or(defaults.num_handlers),
            interval: env_parse("WORKER_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.interval),
            heartbeat_interval: env_parse("WORKER_HEARTBEAT_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.heartbeat_interval),
            num_total_jobs: env_parse("WORKER_NUM_TOTAL_JOBS").unwrap_or(defaults.num_total_jobs),
            max_active_time: env_parse("WORKER_MAX_ACTIVE_TIME_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_active_time),
        }
    }

    /// Set the worker hostname
    pub fn with_worker_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.worker_hostname = hostname.into();
        self
    }

    /// Set the number of concurrent handlers
    pub fn with_num_handlers(mut self, num_handlers: usize) -> Self {
        self.num_handlers = num_handlers;
        self
    }

    /// Set the dequeue interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the dequeue budget
    pub fn with_num_total_jobs(mut self, num_total_jobs: u64) -> Self {
        self.num_total_jobs = num_total_jobs;
        self
    }

    /// Set the maximum active time
    pub fn with_max_active_time(mut self, max_active_time: Duration) -> Self {
        self.max_active_time = max_active_time;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.name.is_empty() {
            return Err(WorkerError::InvalidOptions("name must not be empty".into()));
        }
        if self.worker_hostname.is_empty() {
            return Err(WorkerError::InvalidOptions(
                "worker_hostname must not be empty".into(),
            ));
        }
        if self.num_handlers == 0 {
            return Err(WorkerError::InvalidOptions(
                "num_handlers must be greater than 0".into(),
            ));
        }
        if self.interval.is_zero() {
            return Err(WorkerError::InvalidOptions(
                "interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
