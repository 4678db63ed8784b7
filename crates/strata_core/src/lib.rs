//! # STRATA Core
//!
//! The in-memory world store: entities, typed components and the indices
//! that make them queryable by type, region and component kind.
//!
//! ## Rules
//!
//! 1. **One source of truth** - every read and write goes through [`WorldStore`]
//! 2. **Typed failures** - every fallible call returns a [`WorldError`]
//! 3. **No hidden state** - the store is a plain value, shared with `Arc`
//!
//! ## Example
//!
//! ```rust
//! use strata_core::{ComponentKind, EntityQuery, FieldMap, WorldStore};
//!
//! let world = WorldStore::new();
//! let npc = world.create_entity("npc", Some("north"), None).unwrap();
//! let health = world
//!     .registry()
//!     .create(ComponentKind::Health, &npc.id, &FieldMap::new())
//!     .unwrap();
//! world.add_component(&npc.id, health).unwrap();
//!
//! let found = world.query_entities(&EntityQuery::new().with_kind(ComponentKind::Health));
//! assert!(found.contains(&npc.id));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod ecs;
pub mod error;

pub use ecs::{
    Attributes, Component, ComponentData, ComponentKind, ComponentRegistry, Entity, EntityQuery,
    EntitySnapshot, FieldMap, Health, LatticeNode, Physics, Transform, WorldState, WorldStats,
    WorldStore,
};
pub use error::{WorldError, WorldResult};
