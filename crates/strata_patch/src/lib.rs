//! # STRATA Patch Pipeline
//!
//! Everything between "a producer wants to change the world" and "the world
//! changed":
//!
//! ```text
//!   Producers ──> QueueManager::route ──> PatchQueue (priority, FIFO ties)
//!                                              │
//!                                              ▼
//!                           PatchApplier::apply (under the world lock)
//!                                              │
//!                                              ▼
//!                                         PatchResult
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use strata_core::WorldStore;
//! use strata_patch::{PatchApplier, PatchBuilder, PatchQueue, Wait};
//!
//! let queue = PatchQueue::new("default", 16);
//! let applier = PatchApplier::new(Arc::new(WorldStore::new()));
//!
//! queue.put(PatchBuilder::new().create_entity("npc", Some("guard")).build(), 1, Wait::NoWait);
//! let patch = queue.try_get().unwrap();
//! let result = applier.apply(patch);
//!
//! assert!(result.success);
//! assert!(applier.world().contains("guard"));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod patch;
pub mod queue;

pub use patch::{Operation, OperationKind, Patch, PatchApplier, PatchBuilder, PatchResult, UNKNOWN_SOURCE};
pub use queue::{PatchQueue, QueueManager, QueueStats, QueuedPatch, Wait, REGION_QUEUE_PREFIX};
