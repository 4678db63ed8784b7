//! # Component Registry
//!
//! Knows how to build a valid component of a registered kind from loose
//! fields, and how to move components to and from flat records.
//!
//! A registry may be restricted to a subset of kinds. Asking it for a kind it
//! does not carry fails with [`WorldError::UnknownKind`], exactly like asking
//! for a kind that does not exist at all.

use serde_json::Value;
use std::collections::BTreeSet;
use strata_shared::{now_millis, Millis};

use super::component::{Component, ComponentData, ComponentKind, FieldMap};
use crate::error::{WorldError, WorldResult};

/// Record keys that belong to the component envelope, not the payload.
const ENVELOPE_KEYS: [&str; 5] = ["kind", "entity_id", "created_at", "updated_at", "metadata"];

/// Constructs, serializes and deserializes components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentRegistry {
    kinds: BTreeSet<ComponentKind>,
}

impl Default for ComponentRegistry {
    /// A registry carrying every built-in kind.
    fn default() -> Self {
        Self {
            kinds: ComponentKind::ALL.into_iter().collect(),
        }
    }
}

impl ComponentRegistry {
    /// Creates a registry with no kinds registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            kinds: BTreeSet::new(),
        }
    }

    /// Registers `kind`.
    #[must_use]
    pub fn with_kind(mut self, kind: ComponentKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    /// Returns true if `kind` is registered.
    #[inline]
    #[must_use]
    pub fn is_registered(&self, kind: ComponentKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Iterates the registered kinds in order.
    pub fn kinds(&self) -> impl Iterator<Item = ComponentKind> + '_ {
        self.kinds.iter().copied()
    }

    /// Builds a component of `kind` for `entity_id` from `fields`.
    ///
    /// # Errors
    ///
    /// [`WorldError::UnknownKind`] if the kind is not registered,
    /// [`WorldError::MalformedRecord`] if a field has the wrong shape.
    pub fn create(&self, kind: ComponentKind, entity_id: &str, fields: &FieldMap) -> WorldResult<Component> {
        self.ensure_registered(kind)?;
        let data = ComponentData::from_fields(kind, fields)
            .map_err(|e| WorldError::MalformedRecord(format!("{kind}: {e}")))?;
        Ok(Component::new(entity_id, data))
    }

    /// Same as [`create`](Self::create) with the kind given by name.
    ///
    /// # Errors
    ///
    /// [`WorldError::UnknownKind`] if the name does not parse or is not
    /// registered, [`WorldError::MalformedRecord`] on bad fields.
    pub fn create_named(&self, kind: &str, entity_id: &str, fields: &FieldMap) -> WorldResult<Component> {
        self.create(kind.parse()?, entity_id, fields)
    }

    /// Flattens a component into a record.
    #[must_use]
    pub fn serialize(&self, component: &Component) -> FieldMap {
        component.to_record()
    }

    /// Rebuilds a component from a record produced by [`serialize`](Self::serialize)
    /// or by an external caller.
    ///
    /// `kind` and `entity_id` are required. Missing timestamps are stamped
    /// with the current time.
    ///
    /// # Errors
    ///
    /// [`WorldError::UnknownKind`] for an unknown or unregistered kind,
    /// [`WorldError::MalformedRecord`] for missing or malformed fields.
    pub fn deserialize(&self, record: &FieldMap) -> WorldResult<Component> {
        let kind_name = required_str(record, "kind")?;
        let kind: ComponentKind = kind_name.parse()?;
        self.ensure_registered(kind)?;

        let entity_id = required_str(record, "entity_id")?;
        let now = now_millis();
        let created_at = optional_millis(record, "created_at")?.unwrap_or(now);
        let updated_at = optional_millis(record, "updated_at")?.unwrap_or(created_at);
        let metadata = match record.get("metadata") {
            None | Some(Value::Null) => FieldMap::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(WorldError::MalformedRecord(format!(
                    "metadata must be an object, got {other}"
                )))
            }
        };

        let fields: FieldMap = record
            .iter()
            .filter(|(key, _)| !ENVELOPE_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let data = ComponentData::from_record_fields(kind, &fields)
            .map_err(|e| WorldError::MalformedRecord(format!("{kind}: {e}")))?;

        Ok(Component {
            entity_id: entity_id.to_string(),
            created_at,
            updated_at,
            metadata,
            data,
        })
    }

    /// Returns a copy of `component` with `data` overlaid on its fields.
    ///
    /// A `metadata` object inside `data` is merged into the component's
    /// metadata instead of its payload. `created_at` is preserved and
    /// `updated_at` advances.
    ///
    /// # Errors
    ///
    /// [`WorldError::UnknownKind`] if the component's kind is not registered,
    /// [`WorldError::MalformedRecord`] if the merged fields are malformed.
    pub fn merge(&self, component: &Component, data: &FieldMap) -> WorldResult<Component> {
        let kind = component.kind();
        self.ensure_registered(kind)?;

        let mut payload = data.clone();
        let mut metadata = component.metadata.clone();
        match payload.remove("metadata") {
            None | Some(Value::Null) => {}
            Some(Value::Object(extra)) => metadata.extend(extra),
            Some(other) => {
                return Err(WorldError::MalformedRecord(format!(
                    "metadata must be an object, got {other}"
                )))
            }
        }

        let merged = component
            .data
            .merged(&payload)
            .map_err(|e| WorldError::MalformedRecord(format!("{kind}: {e}")))?;

        Ok(Component {
            entity_id: component.entity_id.clone(),
            created_at: component.created_at,
            updated_at: now_millis().max(component.updated_at),
            metadata,
            data: merged,
        })
    }

    fn ensure_registered(&self, kind: ComponentKind) -> WorldResult<()> {
        if self.is_registered(kind) {
            Ok(())
        } else {
            Err(WorldError::UnknownKind(kind.to_string()))
        }
    }
}

fn required_str<'a>(record: &'a FieldMap, key: &str) -> WorldResult<&'a str> {
    match record.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.as_str()),
        Some(other) => Err(WorldError::MalformedRecord(format!(
            "field `{key}` must be a non-empty string, got {other}"
        ))),
        None => Err(WorldError::MalformedRecord(format!("missing field `{key}`"))),
    }
}

fn optional_millis(record: &FieldMap, key: &str) -> WorldResult<Option<Millis>> {
    match record.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| WorldError::MalformedRecord(format!("field `{key}` must be a timestamp"))),
    }
}
