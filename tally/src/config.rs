use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::SchedulerError;
use crate::job::JobOptions;

/// Configuration for a [`JobScheduler`](crate::JobScheduler).
///
/// Every field has a default, so a TOML document only needs the keys it
/// wants to change:
///
/// ```toml
/// max_concurrency = 8
/// dispatch_interval_ms = 50
///
/// [default_options]
/// attempts = 5
/// backoff = "fixed"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently active jobs, and the worker pool size.
    pub max_concurrency: usize,
    /// How often due delayed jobs are promoted to the waiting queue.
    pub promote_interval_ms: u64,
    /// How often the dispatcher pulls waiting jobs into free slots.
    pub dispatch_interval_ms: u64,
    /// How often archives are pruned back to their retention counts.
    pub clean_interval_ms: u64,
    /// Per-subscriber buffer of the default event bus.
    pub event_capacity: usize,
    /// Upper bound on how long `shutdown` waits for background tasks.
    pub shutdown_timeout_ms: u64,
    /// Reject `add` for job types without a registered processor.
    pub require_registered_processor: bool,
    /// Options applied underneath every submission's overrides.
    pub default_options: JobOptions,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            promote_interval_ms: 1000,
            dispatch_interval_ms: 100,
            clean_interval_ms: 300_000,
            event_capacity: 1024,
            shutdown_timeout_ms: 30_000,
            require_registered_processor: false,
            default_options: JobOptions::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_promote_interval_ms(mut self, ms: u64) -> Self {
        self.promote_interval_ms = ms;
        self
    }

    pub fn with_dispatch_interval_ms(mut self, ms: u64) -> Self {
        self.dispatch_interval_ms = ms;
        self
    }

    pub fn with_clean_interval_ms(mut self, ms: u64) -> Self {
        self.clean_interval_ms = ms;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_shutdown_timeout_ms(mut self, ms: u64) -> Self {
        self.shutdown_timeout_ms = ms;
        self
    }

    pub fn with_require_registered_processor(mut self, required: bool) -> Self {
        self.require_registered_processor = required;
        self
    }

    pub fn with_default_options(mut self, options: JobOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn promote_interval(&self) -> Duration {
        Duration::from_millis(self.promote_interval_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn clean_interval(&self) -> Duration {
        Duration::from_millis(self.clean_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Check the values a running scheduler depends on.
    ///
    /// Intervals must be non-zero because `tokio::time::interval` panics on a
    /// zero period.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_concurrency == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_concurrency must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("promote_interval_ms", self.promote_interval_ms),
            ("dispatch_interval_ms", self.dispatch_interval_ms),
            ("clean_interval_ms", self.clean_interval_ms),
        ] {
            if value == 0 {
                return Err(SchedulerError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.default_options.attempts == 0 {
            return Err(SchedulerError::InvalidConfig(
                "default_options.attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let config: SchedulerConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scheduler config {}", path.display()))?;
        Self::from_toml_str(&text)
    }
}
