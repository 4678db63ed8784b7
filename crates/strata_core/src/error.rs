//! # World Error Types
//!
//! All errors that can occur while constructing components or mutating the
//! world store.

use thiserror::Error;

use crate::ecs::ComponentKind;

/// Errors that can occur in the world store and component registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    /// The component kind is unknown or not registered.
    #[error("unknown component kind: {0}")]
    UnknownKind(String),

    /// A component record is missing required fields or has malformed ones.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// An entity with this id already exists.
    #[error("entity already exists: {0}")]
    DuplicateEntity(String),

    /// No entity with this id exists.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// The entity exists but has no component of the requested kind.
    #[error("component {kind} not found on entity {entity_id}")]
    ComponentNotFound {
        /// The entity that was searched.
        entity_id: String,
        /// The missing component kind.
        kind: ComponentKind,
    },

    /// An operation or argument failed validation.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl WorldError {
    /// Returns true for the "not found" family of errors.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound(_) | Self::ComponentNotFound { .. })
    }
}

/// Result type for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
