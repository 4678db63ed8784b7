//! # Patch Model
//!
//! Patches are the only way producers mutate the world:
//!
//! ```text
//!   PatchBuilder ──build()──> Patch ──queue──> PatchApplier::apply ──> PatchResult
//!                                                     │
//!                                                     └──> WorldStore (under lock)
//! ```

pub mod applier;
pub mod builder;
pub mod model;
pub mod operation;

pub use applier::PatchApplier;
pub use builder::PatchBuilder;
pub use model::{Patch, PatchResult, UNKNOWN_SOURCE};
pub use operation::{Operation, OperationKind};
