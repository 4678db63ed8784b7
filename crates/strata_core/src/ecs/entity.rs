//! # Entity Management
//!
//! Entities are identities with a type, an optional region and an
//! activation flag. Their data lives in components owned by the store.

use serde::{Deserialize, Serialize};
use strata_shared::{now_millis, Millis};
use uuid::Uuid;

/// An entity record.
///
/// The id is the identity: two entities with the same id cannot coexist in
/// one store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier.
    pub id: String,
    /// Caller-defined entity type ("npc", "tree", ...).
    pub entity_type: String,
    /// Optional partition key used for indexing and routing.
    pub region: Option<String>,
    /// Inactive entities are skipped by default queries.
    pub active: bool,
    /// Creation time.
    pub created_at: Millis,
    /// Last time the entity or one of its components changed.
    pub updated_at: Millis,
}

impl Entity {
    /// Creates a new, active entity stamped with the current time.
    #[must_use]
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>, region: Option<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            region,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Generates a fresh entity id.
    #[must_use]
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Marks the entity as modified now.
    #[inline]
    pub fn touch(&mut self) {
        self.updated_at = now_millis().max(self.updated_at);
    }

    /// Returns true if the entity belongs to `region`.
    #[inline]
    #[must_use]
    pub fn in_region(&self, region: &str) -> bool {
        self.region.as_deref() == Some(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Entity::generate_id();
        let b = Entity::generate_id();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let mut entity = Entity::new("e1", "npc", Some("north".to_string()));
        let before = entity.updated_at;
        entity.touch();
        assert!(entity.updated_at >= before);
        assert!(entity.active);
        assert!(entity.in_region("north"));
        assert!(!entity.in_region("south"));
    }
}
