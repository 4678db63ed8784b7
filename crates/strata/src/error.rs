//! # Engine Error Types
//!
//! Errors raised by jobs, by the orchestrator's job API and by configuration
//! loading. Patch-level failures never surface here: the applier reports
//! them inside its `PatchResult`.

use std::path::PathBuf;
use strata_core::WorldError;
use thiserror::Error;

use crate::orchestrator::JobStatus;

/// Why a job failed. Recorded as the job's `error` string.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// A custom job type with no registered handler.
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    /// Required metadata is missing or has the wrong shape.
    #[error("invalid job metadata: {0}")]
    InvalidMetadata(String),

    /// The world rejected a mutation.
    #[error("world error: {0}")]
    World(#[from] WorldError),

    /// A handler reported a failure of its own.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Errors returned by the orchestrator's job API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// No job with this id.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The job is not in a state that allows the requested transition.
    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The job.
        job_id: String,
        /// Its current status.
        from: JobStatus,
        /// The requested status.
        to: JobStatus,
    },

    /// A loop thread could not be started.
    #[error("failed to spawn {name} thread: {reason}")]
    Spawn {
        /// Thread name.
        name: String,
        /// OS error text.
        reason: String,
    },
}

/// Errors raised while loading or validating an engine configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        /// The file that was read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for job handlers.
pub type JobResult<T> = Result<T, JobError>;

/// Result type for the orchestrator's job API.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
