//! Startup-time configuration for the task queue.

use std::time::Duration;

use thiserror::Error;

pub const QUEUE_CAPACITY_ENV: &str = "ECHOBOARD_WORKER_QUEUE_CAPACITY";
pub const CONSUMERS_ENV: &str = "ECHOBOARD_WORKER_CONSUMERS";
pub const SHUTDOWN_POLL_MS_ENV: &str = "ECHOBOARD_WORKER_SHUTDOWN_POLL_MS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be a positive integer, got {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Task queue configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Bounded FIFO size; `submit` blocks once this many tasks are waiting.
    pub queue_capacity: usize,
    /// Number of consumer loops started by `TaskQueue::start`.
    pub consumers: usize,
    /// How often `shutdown` re-reads the outstanding counter.
    pub shutdown_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            consumers: 1,
            shutdown_poll_interval: Duration::from_millis(500),
        }
    }
}

impl WorkerConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_consumers(mut self, consumers: usize) -> Self {
        self.consumers = consumers;
        self
    }

    pub fn with_shutdown_poll_interval(mut self, interval: Duration) -> Self {
        self.shutdown_poll_interval = interval;
        self
    }

    /// Read overrides from `ECHOBOARD_WORKER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; unset keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(capacity) = positive(&lookup, QUEUE_CAPACITY_ENV)? {
            config.queue_capacity = capacity;
        }
        if let Some(consumers) = positive(&lookup, CONSUMERS_ENV)? {
            config.consumers = consumers;
        }
        if let Some(ms) = positive(&lookup, SHUTDOWN_POLL_MS_ENV)? {
            config.shutdown_poll_interval = Duration::from_millis(ms as u64);
        }
        Ok(config)
    }
}

fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<usize>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}
