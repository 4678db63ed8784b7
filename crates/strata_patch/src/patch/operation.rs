//! # Operations
//!
//! A single world mutation. The wire form is a JSON object tagged by
//! `"type"`. Operations decode one at a time: a tag outside the five below
//! becomes [`OperationKind::Unrecognized`], which the applier fails on its
//! own without touching its neighbours.
//!
//! ```text
//! {"type": "add_component", "id": "...", "entity_id": "e1",
//!  "component_kind": "health", "data": {"current": 50.0}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strata_core::{ComponentKind, FieldMap};
use uuid::Uuid;

/// What an operation does.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// Creates an entity, optionally with components.
    CreateEntity {
        /// Explicit id; generated when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entity_id: Option<String>,
        /// Entity type.
        entity_type: String,
        /// Region the entity belongs to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
        /// Components attached right after creation.
        #[serde(default)]
        initial_components: BTreeMap<ComponentKind, FieldMap>,
    },
    /// Deletes an entity and everything it owns.
    DeleteEntity {
        /// Target entity.
        entity_id: String,
    },
    /// Attaches a component, replacing one of the same kind.
    AddComponent {
        /// Target entity.
        entity_id: String,
        /// Kind to build.
        component_kind: ComponentKind,
        /// Component fields.
        #[serde(default)]
        data: FieldMap,
    },
    /// Merges fields into an existing component.
    UpdateComponent {
        /// Target entity.
        entity_id: String,
        /// Kind to update.
        component_kind: ComponentKind,
        /// Fields to overlay.
        #[serde(default)]
        data: FieldMap,
    },
    /// Detaches a component.
    RemoveComponent {
        /// Target entity.
        entity_id: String,
        /// Kind to remove.
        component_kind: ComponentKind,
    },
    /// A decoded operation whose tag is not one of the above.
    #[serde(skip)]
    Unrecognized {
        /// The tag as it appeared on the wire.
        tag: String,
    },
}

impl OperationKind {
    /// Tags this build can apply.
    pub const KNOWN_TAGS: [&'static str; 5] = [
        "create_entity",
        "delete_entity",
        "add_component",
        "update_component",
        "remove_component",
    ];

    /// Wire tag of this kind.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::CreateEntity { .. } => "create_entity",
            Self::DeleteEntity { .. } => "delete_entity",
            Self::AddComponent { .. } => "add_component",
            Self::UpdateComponent { .. } => "update_component",
            Self::RemoveComponent { .. } => "remove_component",
            Self::Unrecognized { tag } => tag,
        }
    }

    /// The entity this operation targets, if it names one.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Self::CreateEntity { entity_id, .. } => entity_id.as_deref(),
            Self::DeleteEntity { entity_id }
            | Self::AddComponent { entity_id, .. }
            | Self::UpdateComponent { entity_id, .. }
            | Self::RemoveComponent { entity_id, .. } => Some(entity_id),
            Self::Unrecognized { .. } => None,
        }
    }
}

/// An identified, annotated operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOperation", into = "RawOperation")]
pub struct Operation {
    /// Operation id, used in error messages.
    pub id: String,
    /// Free-form annotations. `priority` (integer) is read by the applier's
    /// optional reordering.
    pub metadata: FieldMap,
    /// The mutation itself.
    pub kind: OperationKind,
}

/// Wire shape of an operation: id and metadata, everything else untyped
/// until the tag has been checked.
#[derive(Serialize, Deserialize)]
struct RawOperation {
    #[serde(default = "generate_operation_id")]
    id: String,
    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    metadata: FieldMap,
    #[serde(flatten)]
    body: FieldMap,
}

impl TryFrom<RawOperation> for Operation {
    type Error = serde_json::Error;

    fn try_from(raw: RawOperation) -> Result<Self, Self::Error> {
        let RawOperation { id, metadata, body } = raw;
        let unknown_tag = body
            .get("type")
            .and_then(Value::as_str)
            .filter(|tag| !OperationKind::KNOWN_TAGS.contains(tag))
            .map(str::to_string);
        let kind = match unknown_tag {
            Some(tag) => OperationKind::Unrecognized { tag },
            None => serde_json::from_value(Value::Object(body))?,
        };
        Ok(Self { id, metadata, kind })
    }
}

impl From<Operation> for RawOperation {
    fn from(op: Operation) -> Self {
        let body = match op.kind {
            OperationKind::Unrecognized { tag } => {
                let mut body = FieldMap::new();
                body.insert("type".to_string(), Value::String(tag));
                body
            }
            kind => match serde_json::to_value(kind) {
                Ok(Value::Object(body)) => body,
                _ => FieldMap::new(),
            },
        };
        Self {
            id: op.id,
            metadata: op.metadata,
            body,
        }
    }
}

impl Operation {
    /// Wraps `kind` with a fresh id and no metadata.
    #[must_use]
    pub fn new(kind: OperationKind) -> Self {
        Self {
            id: generate_operation_id(),
            metadata: FieldMap::new(),
            kind,
        }
    }

    /// Sets a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// `metadata.priority` as an integer, 0 when absent or not an integer.
    #[must_use]
    pub fn metadata_priority(&self) -> i64 {
        self.metadata
            .get("priority")
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }
}

fn generate_operation_id() -> String {
    Uuid::new_v4().to_string()
}
