//! # Patch Queues
//!
//! Producers hand patches to a [`QueueManager`], which routes each one into a
//! named [`PatchQueue`]. Consumers drain queues in priority order.

pub mod manager;
pub mod priority;

pub use manager::{QueueManager, REGION_QUEUE_PREFIX};
pub use priority::{PatchQueue, QueueStats, QueuedPatch, Wait};
