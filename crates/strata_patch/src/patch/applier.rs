//! # Patch Applier
//!
//! Runs a patch against a [`WorldStore`].
//!
//! ## Semantics
//!
//! - Operations run in order. A failing operation is recorded and skipped;
//!   the rest still run.
//! - The whole patch runs under the store lock, so no other writer
//!   interleaves with it.
//! - Nothing is rolled back. A patch with a failed operation leaves every
//!   successful operation in place.
//!
//! A single operation is all-or-nothing: a create whose initial components
//! fail to build creates nothing.

use std::cmp::Reverse;
use std::sync::Arc;
use strata_core::{WorldError, WorldResult, WorldStore};
use strata_shared::{MetricTags, MetricsSink, NoopMetrics};

use super::model::{Patch, PatchResult};
use super::operation::{Operation, OperationKind};

/// Applies patches to one world store.
pub struct PatchApplier {
    world: Arc<WorldStore>,
    metrics: Arc<dyn MetricsSink>,
    reorder_by_metadata_priority: bool,
}

impl std::fmt::Debug for PatchApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchApplier")
            .field("entities", &self.world.entity_count())
            .field("reorder_by_metadata_priority", &self.reorder_by_metadata_priority)
            .finish_non_exhaustive()
    }
}

impl PatchApplier {
    /// Creates an applier that reports no metrics.
    #[must_use]
    pub fn new(world: Arc<WorldStore>) -> Self {
        Self {
            world,
            metrics: Arc::new(NoopMetrics),
            reorder_by_metadata_priority: false,
        }
    }

    /// Reports into `metrics` after every patch.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// When enabled, operations are stably sorted by `metadata.priority`
    /// (descending) before they run. Producers should not rely on it to
    /// express dependencies between operations.
    #[must_use]
    pub const fn with_metadata_reordering(mut self, enabled: bool) -> Self {
        self.reorder_by_metadata_priority = enabled;
        self
    }

    /// The store this applier writes to.
    #[must_use]
    pub fn world(&self) -> &Arc<WorldStore> {
        &self.world
    }

    /// Applies `patch`, consuming it.
    pub fn apply(&self, patch: Patch) -> PatchResult {
        let mut result = PatchResult::new(patch.id());
        let mut tags = MetricTags::new();
        tags.insert("source".to_string(), patch.source().to_string());
        if let Some(region) = patch.region() {
            tags.insert("region".to_string(), region.to_string());
        }

        let mut operations = patch.into_operations();
        if operations.is_empty() {
            result.warnings.push("patch contains no operations".to_string());
        }
        if self.reorder_by_metadata_priority {
            operations.sort_by_key(|op| Reverse(op.metadata_priority()));
        }

        self.world.with_lock(|world| {
            for operation in &operations {
                match self.apply_operation(world, operation) {
                    Ok(warning) => {
                        result.operations_applied += 1;
                        result.warnings.extend(warning);
                    }
                    Err(e) => {
                        result.operations_failed += 1;
                        result.errors.push(format!("operation {}: {e}", operation.id));
                    }
                }
            }
        });
        result.success = result.operations_failed == 0;

        if result.success {
            tracing::debug!(
                patch = %result.patch_id,
                applied = result.operations_applied,
                "Patch applied"
            );
        } else {
            tracing::warn!(
                patch = %result.patch_id,
                applied = result.operations_applied,
                failed = result.operations_failed,
                first_error = result.errors.first().map(String::as_str).unwrap_or_default(),
                "Patch applied with failures"
            );
        }

        tags.insert("success".to_string(), result.success.to_string());
        self.metrics.record_metric("patch.applied", 1.0, Some(&tags));
        #[allow(clippy::cast_precision_loss)]
        {
            self.metrics
                .record_metric("patch.operations_applied", result.operations_applied as f64, Some(&tags));
            self.metrics
                .record_metric("patch.operations_failed", result.operations_failed as f64, Some(&tags));
        }

        result
    }

    /// Runs one operation. `Ok(Some(_))` carries a warning.
    fn apply_operation(&self, world: &WorldStore, operation: &Operation) -> WorldResult<Option<String>> {
        match &operation.kind {
            OperationKind::CreateEntity {
                entity_id,
                entity_type,
                region,
                initial_components,
            } => {
                // Build every component before the entity exists so a bad
                // component leaves no trace.
                let components = initial_components
                    .iter()
                    .map(|(kind, fields)| world.registry().create(*kind, "", fields))
                    .collect::<WorldResult<Vec<_>>>()?;

                let entity = world.create_entity(entity_type, region.as_deref(), entity_id.as_deref())?;
                for component in components {
                    world.add_component(&entity.id, component)?;
                }
                Ok(None)
            }
            OperationKind::DeleteEntity { entity_id } => {
                if world.delete_entity(entity_id) {
                    Ok(None)
                } else {
                    Err(WorldError::EntityNotFound(entity_id.clone()))
                }
            }
            OperationKind::AddComponent {
                entity_id,
                component_kind,
                data,
            } => {
                if !world.contains(entity_id) {
                    return Err(WorldError::EntityNotFound(entity_id.clone()));
                }
                let component = world.registry().create(*component_kind, entity_id, data)?;
                let replaced = world.add_component(entity_id, component)?;
                Ok(replaced.map(|_| format!("replaced existing {component_kind} component on entity {entity_id}")))
            }
            OperationKind::UpdateComponent {
                entity_id,
                component_kind,
                data,
            } => {
                world.update_component(entity_id, *component_kind, data)?;
                Ok(None)
            }
            OperationKind::RemoveComponent {
                entity_id,
                component_kind,
            } => {
                if !world.contains(entity_id) {
                    return Err(WorldError::EntityNotFound(entity_id.clone()));
                }
                if world.remove_component(entity_id, *component_kind) {
                    Ok(None)
                } else {
                    Err(WorldError::ComponentNotFound {
                        entity_id: entity_id.clone(),
                        kind: *component_kind,
                    })
                }
            }
            OperationKind::Unrecognized { tag } => {
                Err(WorldError::Validation(format!("unknown operation type {tag}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchBuilder;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use strata_core::{ComponentKind, EntityQuery, FieldMap};
    use strata_shared::InMemoryMetrics;

    fn fields(value: Value) -> FieldMap {
        match value {
            Value::Object(map) => map,
            _ => FieldMap::new(),
        }
    }

    fn applier() -> PatchApplier {
        PatchApplier::new(Arc::new(WorldStore::new()))
    }

    #[test]
    fn test_partial_failure_is_not_rolled_back() {
        let applier = applier();
        let patch = PatchBuilder::new()
            .create_entity("npc", Some("a"))
            .create_entity("npc", Some("a"))
            .create_entity("npc", Some("b"))
            .build();
        let duplicate_op = patch.operations()[1].id.clone();

        let result = applier.apply(patch);

        assert!(!result.success);
        assert_eq!(result.operations_applied, 2);
        assert_eq!(result.operations_failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with(&format!("operation {duplicate_op}: ")));
        assert!(applier.world().contains("a"));
        assert!(applier.world().contains("b"));
    }

    #[test]
    fn test_create_with_initial_components() {
        let applier = applier();
        let mut initial = BTreeMap::new();
        initial.insert(ComponentKind::Health, fields(json!({"current": 40.0})));
        initial.insert(ComponentKind::Transform, FieldMap::new());

        let result = applier.apply(
            PatchBuilder::new()
                .with_region("north")
                .create_entity_with("npc", Some("a"), initial)
                .build(),
        );

        assert!(result.success);
        let world = applier.world();
        let health = world.get_component("a", ComponentKind::Health).unwrap();
        assert_eq!(health.entity_id, "a");
        assert!((health.as_health().unwrap().current - 40.0).abs() < f64::EPSILON);
        let hits = world.query_entities(&EntityQuery::new().region("north").with_kind(ComponentKind::Transform));
        assert!(hits.contains("a"));
    }

    #[test]
    fn test_create_with_bad_component_creates_nothing() {
        let applier = applier();
        let mut initial = BTreeMap::new();
        initial.insert(ComponentKind::Health, fields(json!({"current": "lots"})));

        let result = applier.apply(PatchBuilder::new().create_entity_with("npc", Some("a"), initial).build());

        assert_eq!(result.operations_failed, 1);
        assert!(!applier.world().contains("a"));
    }

    #[test]
    fn test_missing_targets_fail_with_not_found() {
        let applier = applier();
        let result = applier.apply(
            PatchBuilder::new()
                .delete_entity("ghost")
                .update_component("ghost", ComponentKind::Health, FieldMap::new())
                .remove_component("ghost", ComponentKind::Health)
                .add_component("ghost", ComponentKind::Health, FieldMap::new())
                .create_entity("npc", Some("real"))
                .remove_component("real", ComponentKind::Physics)
                .update_component("real", ComponentKind::Physics, FieldMap::new())
                .build(),
        );

        assert_eq!(result.operations_applied, 1);
        assert_eq!(result.operations_failed, 6);
        assert!(result.errors[0].contains("entity not found: ghost"));
        assert!(result.errors[5].contains("component physics not found on entity real"));
    }

    #[test]
    fn test_warnings_for_empty_patch_and_replacement() {
        let applier = applier();

        let result = applier.apply(PatchBuilder::new().build());
        assert!(result.success);
        assert_eq!(result.warnings, vec!["patch contains no operations".to_string()]);

        let result = applier.apply(
            PatchBuilder::new()
                .create_entity("npc", Some("a"))
                .add_component("a", ComponentKind::Health, FieldMap::new())
                .add_component("a", ComponentKind::Health, fields(json!({"current": 1.0})))
                .build(),
        );
        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("replaced existing health component"));
    }

    #[test]
    fn test_update_merges_fields() {
        let applier = applier();
        let result = applier.apply(
            PatchBuilder::new()
                .create_entity("npc", Some("a"))
                .add_component("a", ComponentKind::Health, fields(json!({"current": 80.0})))
                .update_component("a", ComponentKind::Health, fields(json!({"regeneration": 2.0})))
                .build(),
        );

        assert!(result.success);
        let health = applier.world().get_component("a", ComponentKind::Health).unwrap();
        let health = health.as_health().unwrap();
        assert!((health.current - 80.0).abs() < f64::EPSILON);
        assert!((health.regeneration - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metadata_reordering_runs_high_priority_first() {
        let applier = applier().with_metadata_reordering(true);
        let patch = PatchBuilder::new()
            .add_component("a", ComponentKind::Health, FieldMap::new())
            .create_entity("npc", Some("a"))
            .with_operation_metadata("priority", json!(10))
            .build();

        let result = applier.apply(patch);
        assert!(result.success, "{:?}", result.errors);
        assert!(applier.world().get_component("a", ComponentKind::Health).is_some());
    }

    #[test]
    fn test_records_metrics() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let applier = applier().with_metrics(metrics.clone());

        let _ = applier.apply(
            PatchBuilder::new()
                .with_source("user:1")
                .create_entity("npc", Some("a"))
                .delete_entity("missing")
                .build(),
        );

        assert_eq!(metrics.count("patch.applied"), 1);
        assert_eq!(metrics.last_value("patch.operations_applied"), Some(1.0));
        assert_eq!(metrics.last_value("patch.operations_failed"), Some(1.0));
        let sample = metrics.samples().into_iter().find(|s| s.name == "patch.applied").unwrap();
        assert_eq!(sample.tags.get("source").map(String::as_str), Some("user:1"));
        assert_eq!(sample.tags.get("success").map(String::as_str), Some("false"));
    }
}
