//! # Patch
//!
//! An ordered, immutable bundle of operations with routing information.
//! Patches are produced by [`PatchBuilder`](super::PatchBuilder) or decoded
//! from JSON, and consumed exactly once by the applier.

use serde::{Deserialize, Serialize};
use strata_core::{WorldError, WorldResult};
use strata_shared::{now_millis, Millis};
use uuid::Uuid;

use super::operation::Operation;

/// Source used when a patch does not say where it came from.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// An ordered bundle of operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    #[serde(default = "generate_patch_id")]
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(default = "now_millis")]
    timestamp: Millis,
    #[serde(default = "unknown_source")]
    source: String,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    operations: Vec<Operation>,
}

impl Patch {
    pub(crate) fn new(
        region: Option<String>,
        source: String,
        priority: i32,
        operations: Vec<Operation>,
    ) -> Self {
        Self {
            id: generate_patch_id(),
            region,
            timestamp: now_millis(),
            source,
            priority,
            operations,
        }
    }

    /// Decodes a patch from its JSON wire form.
    ///
    /// # Errors
    ///
    /// [`WorldError::Validation`] if the JSON is malformed or a known
    /// operation is missing a required field. Unknown `type` tags decode as
    /// [`OperationKind::Unrecognized`](super::OperationKind::Unrecognized) and
    /// fail only when applied.
    pub fn from_json(json: &str) -> WorldResult<Self> {
        serde_json::from_str(json).map_err(|e| WorldError::Validation(format!("invalid patch: {e}")))
    }

    /// Encodes the patch to its JSON wire form.
    ///
    /// # Errors
    ///
    /// [`WorldError::Validation`] if a metadata value cannot be encoded.
    pub fn to_json(&self) -> WorldResult<String> {
        serde_json::to_string(self).map_err(|e| WorldError::Validation(format!("unencodable patch: {e}")))
    }

    /// Patch id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Region the patch targets, if any.
    #[inline]
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Build time.
    #[inline]
    #[must_use]
    pub const fn timestamp(&self) -> Millis {
        self.timestamp
    }

    /// Producer of the patch ("orchestrator", "user:42", ...).
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Suggested queue priority.
    #[inline]
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// The operations, in application order.
    #[inline]
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Number of operations.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// True if the patch carries no operations.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub(crate) fn into_operations(self) -> Vec<Operation> {
        self.operations
    }
}

/// Outcome of applying one patch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchResult {
    /// Id of the applied patch.
    pub patch_id: String,
    /// True when no operation failed.
    pub success: bool,
    /// Operations that took effect.
    pub operations_applied: usize,
    /// Operations that failed.
    pub operations_failed: usize,
    /// One `"operation <id>: <message>"` entry per failure.
    pub errors: Vec<String>,
    /// Non-fatal observations.
    pub warnings: Vec<String>,
}

impl PatchResult {
    pub(crate) fn new(patch_id: impl Into<String>) -> Self {
        Self {
            patch_id: patch_id.into(),
            ..Self::default()
        }
    }
}

fn generate_patch_id() -> String {
    Uuid::new_v4().to_string()
}

fn unknown_source() -> String {
    UNKNOWN_SOURCE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_defaults() {
        let patch = Patch::from_json(r#"{"operations": []}"#).unwrap();
        assert!(!patch.id().is_empty());
        assert_eq!(patch.source(), UNKNOWN_SOURCE);
        assert_eq!(patch.priority(), 0);
        assert_eq!(patch.region(), None);
        assert!(patch.timestamp() > 0);
        assert!(patch.is_empty());
    }

    #[test]
    fn test_unknown_tag_decodes_without_dropping_neighbours() {
        let patch = Patch::from_json(
            r#"{"operations": [
                {"type": "delete_entity", "entity_id": "e0"},
                {"type": "teleport_entity", "entity_id": "e1"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(patch.len(), 2);
        assert_eq!(patch.operations()[1].kind.tag(), "teleport_entity");
    }

    #[test]
    fn test_missing_required_field_is_validation_error() {
        let err = Patch::from_json(r#"{"operations": [{"type": "delete_entity"}]}"#).unwrap_err();
        assert!(matches!(err, WorldError::Validation(_)));
    }

    #[test]
    fn test_malformed_json_is_validation_error() {
        let err = Patch::from_json("{not json").unwrap_err();
        assert!(matches!(err, WorldError::Validation(_)));
    }

    #[test]
    fn test_json_round_trip_keeps_identity() {
        let patch = Patch::from_json(
            r#"{
                "id": "p-1",
                "region": "north",
                "source": "user:7",
                "priority": 4,
                "operations": [
                    {"type": "delete_entity", "id": "op-1", "entity_id": "e1"}
                ]
            }"#,
        )
        .unwrap();

        let decoded = Patch::from_json(&patch.to_json().unwrap()).unwrap();
        assert_eq!(decoded, patch);
        assert_eq!(decoded.id(), "p-1");
        assert_eq!(decoded.region(), Some("north"));
        assert_eq!(decoded.operations()[0].id, "op-1");
    }
}
