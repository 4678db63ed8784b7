//! # Patch Builder
//!
//! Fluent construction of patches. Each `create_*`/`*_component` call appends
//! one operation; `with_operation_metadata` annotates the most recently
//! appended one.
//!
//! ```
//! use strata_core::ComponentKind;
//! use strata_patch::PatchBuilder;
//!
//! let patch = PatchBuilder::new()
//!     .with_source("user:42")
//!     .with_priority(3)
//!     .create_entity("tree", Some("tree-1"))
//!     .add_component("tree-1", ComponentKind::Health, Default::default())
//!     .build();
//!
//! assert_eq!(patch.len(), 2);
//! ```

use serde_json::Value;
use std::collections::BTreeMap;
use strata_core::{ComponentKind, FieldMap};

use super::model::{Patch, UNKNOWN_SOURCE};
use super::operation::{Operation, OperationKind};

/// Accumulates operations and routing data for one patch.
#[derive(Clone, Debug)]
pub struct PatchBuilder {
    region: Option<String>,
    source: String,
    priority: i32,
    operations: Vec<Operation>,
}

impl Default for PatchBuilder {
    fn default() -> Self {
        Self {
            region: None,
            source: UNKNOWN_SOURCE.to_string(),
            priority: 0,
            operations: Vec::new(),
        }
    }
}

impl PatchBuilder {
    /// Starts an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets a region. Also becomes the region of entities created
    /// afterwards through [`create_entity`](Self::create_entity).
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Names the producer.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the suggested queue priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Appends an already-built operation.
    #[must_use]
    pub fn push(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Creates an entity with no components in the builder's region.
    #[must_use]
    pub fn create_entity(self, entity_type: impl Into<String>, entity_id: Option<&str>) -> Self {
        self.create_entity_with(entity_type, entity_id, BTreeMap::new())
    }

    /// Creates an entity with initial components in the builder's region.
    #[must_use]
    pub fn create_entity_with(
        self,
        entity_type: impl Into<String>,
        entity_id: Option<&str>,
        initial_components: BTreeMap<ComponentKind, FieldMap>,
    ) -> Self {
        let region = self.region.clone();
        self.push(Operation::new(OperationKind::CreateEntity {
            entity_id: entity_id.map(str::to_string),
            entity_type: entity_type.into(),
            region,
            initial_components,
        }))
    }

    /// Deletes an entity.
    #[must_use]
    pub fn delete_entity(self, entity_id: impl Into<String>) -> Self {
        self.push(Operation::new(OperationKind::DeleteEntity {
            entity_id: entity_id.into(),
        }))
    }

    /// Adds (or replaces) a component.
    #[must_use]
    pub fn add_component(self, entity_id: impl Into<String>, kind: ComponentKind, data: FieldMap) -> Self {
        self.push(Operation::new(OperationKind::AddComponent {
            entity_id: entity_id.into(),
            component_kind: kind,
            data,
        }))
    }

    /// Merges fields into an existing component.
    #[must_use]
    pub fn update_component(self, entity_id: impl Into<String>, kind: ComponentKind, data: FieldMap) -> Self {
        self.push(Operation::new(OperationKind::UpdateComponent {
            entity_id: entity_id.into(),
            component_kind: kind,
            data,
        }))
    }

    /// Removes a component.
    #[must_use]
    pub fn remove_component(self, entity_id: impl Into<String>, kind: ComponentKind) -> Self {
        self.push(Operation::new(OperationKind::RemoveComponent {
            entity_id: entity_id.into(),
            component_kind: kind,
        }))
    }

    /// Sets a metadata entry on the last appended operation.
    ///
    /// Does nothing when no operation has been appended yet.
    #[must_use]
    pub fn with_operation_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        if let Some(last) = self.operations.last_mut() {
            last.metadata.insert(key.into(), value);
        }
        self
    }

    /// Freezes the builder into a patch.
    #[must_use]
    pub fn build(self) -> Patch {
        Patch::new(self.region, self.source, self.priority, self.operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_records_routing_data() {
        let patch = PatchBuilder::new()
            .with_region("north")
            .with_source("orchestrator")
            .with_priority(9)
            .create_entity("npc", None)
            .build();

        assert_eq!(patch.region(), Some("north"));
        assert_eq!(patch.source(), "orchestrator");
        assert_eq!(patch.priority(), 9);
        match &patch.operations()[0].kind {
            OperationKind::CreateEntity { region, entity_id, .. } => {
                assert_eq!(region.as_deref(), Some("north"));
                assert_eq!(entity_id, &None);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_operation_metadata_targets_last_operation() {
        let patch = PatchBuilder::new()
            .with_operation_metadata("ignored", json!(true))
            .delete_entity("a")
            .delete_entity("b")
            .with_operation_metadata("priority", json!(5))
            .build();

        assert!(patch.operations()[0].metadata.is_empty());
        assert_eq!(patch.operations()[1].metadata_priority(), 5);
    }

    #[test]
    fn test_operation_ids_are_distinct() {
        let patch = PatchBuilder::new()
            .remove_component("a", ComponentKind::Physics)
            .update_component("a", ComponentKind::Health, FieldMap::new())
            .build();

        let ops = patch.operations();
        assert_ne!(ops[0].id, ops[1].id);
        assert_eq!(patch.source(), UNKNOWN_SOURCE);
    }
}
