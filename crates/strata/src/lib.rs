//! # STRATA
//!
//! A mutable simulated world fed by prioritized patches and driven by a
//! periodic job scheduler.
//!
//! ```text
//!   ┌──────────────┐   route/put    ┌──────────────┐   get    ┌─────────────────┐
//!   │  producers   │ ─────────────> │ QueueManager │ ───────> │ patch consumer  │
//!   └──────────────┘                └──────────────┘          └────────┬────────┘
//!                                                                      │ apply
//!   ┌──────────────┐  submit_job    ┌──────────────┐  handlers ┌───────▼────────┐
//!   │  job source  │ ─────────────> │   JobBoard   │ ────────> │   WorldStore   │
//!   └──────────────┘                └──────┬───────┘           └───────▲────────┘
//!                                          │ tick loop (batch)         │
//!                                          └───────────────────────────┘
//! ```
//!
//! ## Crate layout
//!
//! - [`strata_shared`]: clock, defaults, metrics sinks
//! - [`strata_core`]: component registry and world store
//! - [`strata_patch`]: patches, applier, queues
//! - this crate: orchestrator, jobs, configuration, [`Engine`]

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;

pub use config::EngineConfig;
pub use context::{Engine, EngineBuilder};
pub use error::{ConfigError, JobError, OrchestratorError};
pub use orchestrator::{
    Job, JobContext, JobHandler, JobKind, JobStatus, Orchestrator, OrchestratorSettings, OrchestratorStats,
    WorldDriver,
};

/// Re-export of the world crate.
pub use strata_core as core;
/// Re-export of the patch crate.
pub use strata_patch as patch;
/// Re-export of the shared crate.
pub use strata_shared as shared;
