//! # Engine Configuration
//!
//! Loaded from TOML. Every key is optional; missing keys take the defaults
//! below.
//!
//! ```toml
//! [orchestrator]
//! tick_period_ms = 1000
//! consumer_poll_ms = 1000
//! job_batch_size = 10
//! join_timeout_ms = 5000
//!
//! [queues]
//! default_capacity = 1000
//!
//! [retention]
//! max_age_secs = 3600
//! max_terminal_jobs = 1000
//!
//! [applier]
//! reorder_by_metadata_priority = false
//!
//! [logging]
//! filter = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use strata_shared::{
    DEFAULT_CONSUMER_POLL, DEFAULT_JOB_BATCH_SIZE, DEFAULT_JOIN_TIMEOUT, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_TICK_PERIOD,
};

use crate::error::{ConfigError, ConfigResult};
use crate::orchestrator::{OrchestratorSettings, RetentionPolicy};

/// Top-level engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Loop timing and job scheduling.
    pub orchestrator: OrchestratorConfig,
    /// Patch queues.
    pub queues: QueueConfig,
    /// Terminal job retention.
    pub retention: RetentionConfig,
    /// Patch application.
    pub applier: ApplierConfig,
    /// Log output of the server binary.
    pub logging: LoggingConfig,
}

/// `[orchestrator]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Tick loop period.
    pub tick_period_ms: u64,
    /// Consumer wait on an empty queue.
    pub consumer_poll_ms: u64,
    /// Jobs run per tick.
    pub job_batch_size: usize,
    /// Per-loop wait in `stop`.
    pub join_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: millis(DEFAULT_TICK_PERIOD),
            consumer_poll_ms: millis(DEFAULT_CONSUMER_POLL),
            job_batch_size: DEFAULT_JOB_BATCH_SIZE,
            join_timeout_ms: millis(DEFAULT_JOIN_TIMEOUT),
        }
    }
}

/// `[queues]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Capacity of every queue (0 = unbounded).
    pub default_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// `[retention]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    /// Terminal jobs older than this are swept by `maintenance`.
    pub max_age_secs: Option<u64>,
    /// Terminal jobs kept by `maintenance`.
    pub max_terminal_jobs: Option<usize>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: Some(3600),
            max_terminal_jobs: Some(1000),
        }
    }
}

impl RetentionConfig {
    /// The policy this section describes.
    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: self.max_age_secs.map(Duration::from_secs),
            max_terminal_jobs: self.max_terminal_jobs,
        }
    }
}

/// `[applier]` section.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplierConfig {
    /// Stable-sort operations by `metadata.priority` before applying.
    pub reorder_by_metadata_priority: bool,
}

/// `[logging]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for bad TOML or unknown keys,
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(toml: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> ConfigResult<()> {
        let o = &self.orchestrator;
        if o.tick_period_ms == 0 {
            return Err(ConfigError::Invalid("orchestrator.tick_period_ms must be > 0".to_string()));
        }
        if o.consumer_poll_ms == 0 {
            return Err(ConfigError::Invalid("orchestrator.consumer_poll_ms must be > 0".to_string()));
        }
        if o.job_batch_size == 0 {
            return Err(ConfigError::Invalid("orchestrator.job_batch_size must be > 0".to_string()));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.filter must not be empty".to_string()));
        }
        Ok(())
    }

    /// Orchestrator settings derived from this configuration.
    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let o = &self.orchestrator;
        OrchestratorSettings {
            tick_period: Duration::from_millis(o.tick_period_ms),
            consumer_poll: Duration::from_millis(o.consumer_poll_ms),
            job_batch_size: o.job_batch_size,
            join_timeout: Duration::from_millis(o.join_timeout_ms),
            retention: self.retention.policy(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
