//! # STRATA Shared
//!
//! Common pieces used by the world store, the patch pipeline and the
//! orchestrator.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on another STRATA crate. Everything here is
//! a leaf: constants, wall-clock helpers and the metrics sink trait that the
//! rest of the workspace reports into.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod clock;
pub mod constants;
pub mod metrics;

pub use clock::{now_millis, Millis};
pub use constants::{
    DEFAULT_CONSUMER_POLL, DEFAULT_JOB_BATCH_SIZE, DEFAULT_JOIN_TIMEOUT, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_QUEUE_NAME, DEFAULT_TICK_PERIOD, ORCHESTRATOR_QUEUE_NAME, USER_ACTIONS_QUEUE_NAME,
};
pub use metrics::{InMemoryMetrics, MetricSample, MetricTags, MetricsSink, NoopMetrics, TracingMetrics};
