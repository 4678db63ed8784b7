//! # Entity Component System
//!
//! The world model: entities, the closed set of component kinds, the
//! registry that builds components, and the store that owns them all.
//!
//! ## Design Philosophy
//!
//! - Entity ids are caller-visible strings, unique for the entity's lifetime
//! - One component per kind per entity; a second write replaces the first
//! - Component kinds are a closed enum, dispatched with `match`
//! - One reentrant lock guards the whole store

mod component;
mod entity;
mod registry;
mod world;

pub use component::{
    Attributes, Component, ComponentData, ComponentKind, FieldMap, Health, LatticeNode, Physics,
    Transform,
};
pub use entity::Entity;
pub use registry::ComponentRegistry;
pub use world::{EntityQuery, EntitySnapshot, WorldState, WorldStats, WorldStore};
