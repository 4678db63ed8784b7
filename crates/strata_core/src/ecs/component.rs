//! # Component System
//!
//! Components are pure data blocks owned by exactly one entity. The set of
//! kinds is closed: adding a kind means adding a variant here, which makes
//! every `match` over kinds fail to compile until it handles the new one.
//!
//! Each component carries a common envelope (owner, timestamps, free-form
//! metadata) around its kind-specific payload.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use strata_shared::{now_millis, Millis};

use crate::error::WorldError;

/// Free-form key/value map used for component fields and metadata.
pub type FieldMap = Map<String, Value>;

/// The closed set of component kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Position, rotation and scale.
    #[serde(alias = "Transform")]
    Transform,
    /// Velocity, acceleration and mass.
    #[serde(alias = "Physics")]
    Physics,
    /// Hit points.
    #[serde(alias = "Health")]
    Health,
    /// Opaque key/value blob.
    #[serde(alias = "Attributes")]
    Attributes,
    /// Membership in a lattice of connected nodes.
    #[serde(alias = "LatticeNode")]
    LatticeNode,
}

impl ComponentKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Transform,
        Self::Physics,
        Self::Health,
        Self::Attributes,
        Self::LatticeNode,
    ];

    /// Canonical name used in records and on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::Physics => "physics",
            Self::Health => "health",
            Self::Attributes => "attributes",
            Self::LatticeNode => "lattice_node",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = WorldError;

    /// Accepts both `lattice_node` and `LatticeNode` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().replace('_', "") == normalized)
            .ok_or_else(|| WorldError::UnknownKind(s.to_string()))
    }
}

/// Spatial placement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    /// World-space position.
    pub position: [f64; 3],
    /// Euler rotation in radians.
    pub rotation: [f64; 3],
    /// Per-axis scale.
    pub scale: [f64; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: [1.0; 3],
        }
    }
}

/// Motion state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Physics {
    /// Units per second.
    pub velocity: [f64; 3],
    /// Units per second squared.
    pub acceleration: [f64; 3],
    /// Mass in arbitrary units.
    pub mass: f64,
    /// Friction coefficient.
    pub friction: f64,
    /// Static bodies never move.
    pub is_static: bool,
}

impl Default for Physics {
    fn default() -> Self {
        Self {
            velocity: [0.0; 3],
            acceleration: [0.0; 3],
            mass: 1.0,
            friction: 0.0,
            is_static: false,
        }
    }
}

/// Hit points.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Health {
    /// Current hit points.
    pub current: f64,
    /// Maximum hit points.
    pub maximum: f64,
    /// Points regained per second.
    pub regeneration: f64,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            current: 100.0,
            maximum: 100.0,
            regeneration: 0.0,
        }
    }
}

impl Health {
    /// Returns `current / maximum`, clamped to `[0, 1]`.
    ///
    /// A non-positive maximum reads as zero health.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.maximum <= 0.0 {
            return 0.0;
        }
        (self.current / self.maximum).clamp(0.0, 1.0)
    }
}

/// Opaque attribute blob.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attributes {
    /// Arbitrary values.
    pub values: FieldMap,
}

/// A node in a lattice of connected entities.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatticeNode {
    /// Lattice this node belongs to.
    pub lattice_id: String,
    /// Ids of connected entities.
    pub connections: Vec<String>,
    /// Stored energy.
    pub energy: f64,
    /// Oscillation frequency.
    pub frequency: f64,
}

/// Kind-specific component payload.
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentData {
    /// See [`Transform`].
    Transform(Transform),
    /// See [`Physics`].
    Physics(Physics),
    /// See [`Health`].
    Health(Health),
    /// See [`Attributes`].
    Attributes(Attributes),
    /// See [`LatticeNode`].
    LatticeNode(LatticeNode),
}

impl ComponentData {
    /// Returns the kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> ComponentKind {
        match self {
            Self::Transform(_) => ComponentKind::Transform,
            Self::Physics(_) => ComponentKind::Physics,
            Self::Health(_) => ComponentKind::Health,
            Self::Attributes(_) => ComponentKind::Attributes,
            Self::LatticeNode(_) => ComponentKind::LatticeNode,
        }
    }

    /// Returns the default payload for `kind`.
    #[must_use]
    pub fn default_for(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::Transform => Self::Transform(Transform::default()),
            ComponentKind::Physics => Self::Physics(Physics::default()),
            ComponentKind::Health => Self::Health(Health::default()),
            ComponentKind::Attributes => Self::Attributes(Attributes::default()),
            ComponentKind::LatticeNode => Self::LatticeNode(LatticeNode::default()),
        }
    }

    /// Builds a payload of `kind` from loose fields. Missing fields take
    /// their defaults; unknown fields are ignored.
    ///
    /// Attributes are special: the whole map is the blob, stored as given.
    pub(crate) fn from_fields(kind: ComponentKind, fields: &FieldMap) -> Result<Self, serde_json::Error> {
        let value = Value::Object(fields.clone());
        Ok(match kind {
            ComponentKind::Transform => Self::Transform(serde_json::from_value(value)?),
            ComponentKind::Physics => Self::Physics(serde_json::from_value(value)?),
            ComponentKind::Health => Self::Health(serde_json::from_value(value)?),
            ComponentKind::Attributes => Self::Attributes(Attributes { values: fields.clone() }),
            ComponentKind::LatticeNode => Self::LatticeNode(serde_json::from_value(value)?),
        })
    }

    /// Builds a payload from the non-envelope keys of a record.
    ///
    /// Records carry an attribute blob under `values` (see
    /// [`to_fields`](Self::to_fields)); a record without that key is read as
    /// a bare blob.
    pub(crate) fn from_record_fields(kind: ComponentKind, fields: &FieldMap) -> Result<Self, serde_json::Error> {
        if kind == ComponentKind::Attributes {
            if let Some(values) = fields.get("values") {
                return Ok(Self::Attributes(Attributes {
                    values: serde_json::from_value(values.clone())?,
                }));
            }
        }
        Self::from_fields(kind, fields)
    }

    /// Returns the payload as a flat field map.
    #[must_use]
    pub fn to_fields(&self) -> FieldMap {
        let value = match self {
            Self::Transform(t) => serde_json::to_value(t),
            Self::Physics(p) => serde_json::to_value(p),
            Self::Health(h) => serde_json::to_value(h),
            Self::Attributes(a) => serde_json::to_value(a),
            Self::LatticeNode(n) => serde_json::to_value(n),
        };
        match value {
            Ok(Value::Object(map)) => map,
            _ => FieldMap::new(),
        }
    }

    /// Returns a copy with `data` overlaid on the current fields.
    pub(crate) fn merged(&self, data: &FieldMap) -> Result<Self, serde_json::Error> {
        if let Self::Attributes(current) = self {
            let mut values = current.values.clone();
            values.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
            return Ok(Self::Attributes(Attributes { values }));
        }
        let mut fields = self.to_fields();
        for (key, value) in data {
            fields.insert(key.clone(), value.clone());
        }
        Self::from_fields(self.kind(), &fields)
    }
}

/// A component instance owned by one entity.
#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    /// Owning entity.
    pub entity_id: String,
    /// Creation time.
    pub created_at: Millis,
    /// Last modification time.
    pub updated_at: Millis,
    /// Free-form metadata.
    pub metadata: FieldMap,
    /// Kind-specific payload.
    pub data: ComponentData,
}

impl Component {
    /// Wraps `data` in a fresh envelope owned by `entity_id`.
    #[must_use]
    pub fn new(entity_id: impl Into<String>, data: ComponentData) -> Self {
        let now = now_millis();
        Self {
            entity_id: entity_id.into(),
            created_at: now,
            updated_at: now,
            metadata: FieldMap::new(),
            data,
        }
    }

    /// Adds metadata.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns the component kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ComponentKind {
        self.data.kind()
    }

    /// Flat key/value representation: envelope keys plus payload fields.
    #[must_use]
    pub fn to_record(&self) -> FieldMap {
        let mut record = self.data.to_fields();
        record.insert("kind".to_string(), Value::from(self.kind().as_str()));
        record.insert("entity_id".to_string(), Value::from(self.entity_id.clone()));
        record.insert("created_at".to_string(), Value::from(self.created_at));
        record.insert("updated_at".to_string(), Value::from(self.updated_at));
        record.insert("metadata".to_string(), Value::Object(self.metadata.clone()));
        record
    }

    /// Returns the health payload, if this is a health component.
    #[must_use]
    pub const fn as_health(&self) -> Option<&Health> {
        match &self.data {
            ComponentData::Health(h) => Some(h),
            _ => None,
        }
    }

    /// Returns the transform payload, if this is a transform component.
    #[must_use]
    pub const fn as_transform(&self) -> Option<&Transform> {
        match &self.data {
            ComponentData::Transform(t) => Some(t),
            _ => None,
        }
    }

    /// Returns the attribute blob, if this is an attributes component.
    #[must_use]
    pub const fn as_attributes(&self) -> Option<&Attributes> {
        match &self.data {
            ComponentData::Attributes(a) => Some(a),
            _ => None,
        }
    }
}

impl Serialize for Component {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parsing_accepts_both_spellings() {
        assert_eq!("lattice_node".parse::<ComponentKind>(), Ok(ComponentKind::LatticeNode));
        assert_eq!("LatticeNode".parse::<ComponentKind>(), Ok(ComponentKind::LatticeNode));
        assert_eq!("Health".parse::<ComponentKind>(), Ok(ComponentKind::Health));
        assert_eq!(
            "mana".parse::<ComponentKind>(),
            Err(WorldError::UnknownKind("mana".to_string()))
        );
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let mut fields = FieldMap::new();
        fields.insert("position".to_string(), json!([1.0, 2.0, 3.0]));

        let data = ComponentData::from_fields(ComponentKind::Transform, &fields).unwrap();
        let ComponentData::Transform(t) = data else {
            panic!("expected transform");
        };
        assert_eq!(t.position, [1.0, 2.0, 3.0]);
        assert_eq!(t.scale, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_wrong_field_shape_is_an_error() {
        let mut fields = FieldMap::new();
        fields.insert("current".to_string(), json!("lots"));
        assert!(ComponentData::from_fields(ComponentKind::Health, &fields).is_err());
    }

    #[test]
    fn test_merge_overlays_fields() {
        let health = ComponentData::Health(Health::default());
        let mut patch = FieldMap::new();
        patch.insert("current".to_string(), json!(40.0));

        let merged = health.merged(&patch).unwrap();
        let ComponentData::Health(h) = merged else {
            panic!("expected health");
        };
        assert!((h.current - 40.0).abs() < f64::EPSILON);
        assert!((h.maximum - 100.0).abs() < f64::EPSILON);
        assert!((h.ratio() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_attribute_blob_merges_values() {
        let mut first = FieldMap::new();
        first.insert("mood".to_string(), json!("calm"));
        let attrs = ComponentData::from_fields(ComponentKind::Attributes, &first).unwrap();

        let mut second = FieldMap::new();
        second.insert("level".to_string(), json!(3));
        let merged = attrs.merged(&second).unwrap();

        let ComponentData::Attributes(a) = merged else {
            panic!("expected attributes");
        };
        assert_eq!(a.values.get("mood"), Some(&json!("calm")));
        assert_eq!(a.values.get("level"), Some(&json!(3)));
    }

    #[test]
    fn test_attribute_blob_keeps_values_key() {
        let mut blob = FieldMap::new();
        blob.insert("values".to_string(), json!({"x": 1}));
        let attrs = ComponentData::from_fields(ComponentKind::Attributes, &blob).unwrap();

        let ComponentData::Attributes(a) = &attrs else {
            panic!("expected attributes");
        };
        assert_eq!(a.values, blob);

        let merged = attrs.merged(&blob).unwrap();
        let ComponentData::Attributes(a) = merged else {
            panic!("expected attributes");
        };
        assert_eq!(a.values.get("values"), Some(&json!({"x": 1})));
        assert_eq!(a.values.len(), 1);
    }

    #[test]
    fn test_record_fields_unwrap_attribute_envelope() {
        let mut blob = FieldMap::new();
        blob.insert("values".to_string(), json!({"x": 1}));
        let original = ComponentData::Attributes(Attributes { values: blob });

        let rebuilt = ComponentData::from_record_fields(ComponentKind::Attributes, &original.to_fields()).unwrap();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_record_contains_envelope_and_fields() {
        let component = Component::new("e1", ComponentData::Health(Health::default()))
            .with_metadata("source", json!("test"));
        let record = component.to_record();

        assert_eq!(record.get("kind"), Some(&json!("health")));
        assert_eq!(record.get("entity_id"), Some(&json!("e1")));
        assert_eq!(record.get("current"), Some(&json!(100.0)));
        assert_eq!(record.get("metadata"), Some(&json!({"source": "test"})));
    }
}
