//! # World Store
//!
//! The single source of truth for entities and components.
//!
//! ## Locking
//!
//! ```text
//!   ┌──────────────────────────────────────────────┐
//!   │ WorldStore                                   │
//!   │  ReentrantMutex ── RefCell<WorldInner>       │
//!   │                     ├─ entities              │
//!   │                     ├─ components            │
//!   │                     └─ indices (type/region/ │
//!   │                        kind)                 │
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! Every public method holds the lock for its whole duration. The lock is
//! reentrant: code running inside [`WorldStore::with_lock`] may call any
//! other method without deadlocking. The `RefCell` is only ever borrowed
//! inside a single method body, never across a call back into the store.
//!
//! Index buckets are removed lazily; [`WorldStore::compact_indices`] drops
//! the empty ones.

use parking_lot::ReentrantMutex;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use strata_shared::{now_millis, Millis};

use super::component::{Component, ComponentKind, FieldMap};
use super::entity::Entity;
use super::registry::ComponentRegistry;
use crate::error::{WorldError, WorldResult};

/// Filter for [`WorldStore::query_entities`].
///
/// Every populated field narrows the result. `component_kinds` is an AND
/// filter: an entity must carry all of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityQuery {
    /// Only entities of this type.
    pub entity_type: Option<String>,
    /// Only entities in this region.
    pub region: Option<String>,
    /// Only entities that carry every one of these kinds.
    pub component_kinds: Vec<ComponentKind>,
    /// Skip inactive entities.
    pub active_only: bool,
}

impl Default for EntityQuery {
    fn default() -> Self {
        Self {
            entity_type: None,
            region: None,
            component_kinds: Vec::new(),
            active_only: true,
        }
    }
}

impl EntityQuery {
    /// Matches every active entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one entity type.
    #[must_use]
    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Restricts to one region.
    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Requires a component kind.
    #[must_use]
    pub fn with_kind(mut self, kind: ComponentKind) -> Self {
        if !self.component_kinds.contains(&kind) {
            self.component_kinds.push(kind);
        }
        self
    }

    /// Includes inactive entities.
    #[must_use]
    pub fn include_inactive(mut self) -> Self {
        self.active_only = false;
        self
    }
}

/// An entity together with copies of its components.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntitySnapshot {
    /// The entity record.
    pub entity: Entity,
    /// Its components, keyed by kind.
    pub components: BTreeMap<ComponentKind, Component>,
}

/// A deep, point-in-time copy of (part of) the world.
///
/// Owns all of its data; holding it does not keep the store locked.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorldState {
    /// When the snapshot was taken.
    pub taken_at: Millis,
    /// Region filter the snapshot was taken with.
    pub region: Option<String>,
    /// Matching entities keyed by id.
    pub entities: BTreeMap<String, EntitySnapshot>,
}

impl WorldState {
    /// Number of entities in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if the snapshot holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Aggregate counts over the whole store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorldStats {
    /// Number of entities.
    pub total_entities: usize,
    /// Number of active entities.
    pub active_entities: usize,
    /// Number of components across all entities.
    pub total_components: usize,
    /// Entity count per type.
    pub by_type: BTreeMap<String, usize>,
    /// Entity count per region.
    pub by_region: BTreeMap<String, usize>,
    /// Entity count per component kind.
    pub by_component_kind: BTreeMap<ComponentKind, usize>,
}

#[derive(Default)]
struct WorldInner {
    entities: HashMap<String, Entity>,
    components: HashMap<String, HashMap<ComponentKind, Component>>,
    by_type: HashMap<String, HashSet<String>>,
    by_region: HashMap<String, HashSet<String>>,
    by_kind: HashMap<ComponentKind, HashSet<String>>,
}

impl WorldInner {
    fn insert_entity(&mut self, entity: Entity) {
        self.by_type
            .entry(entity.entity_type.clone())
            .or_default()
            .insert(entity.id.clone());
        if let Some(region) = &entity.region {
            self.by_region
                .entry(region.clone())
                .or_default()
                .insert(entity.id.clone());
        }
        self.components.insert(entity.id.clone(), HashMap::new());
        self.entities.insert(entity.id.clone(), entity);
    }

    fn remove_entity(&mut self, id: &str) -> bool {
        let Some(entity) = self.entities.remove(id) else {
            return false;
        };

        if let Some(ids) = self.by_type.get_mut(&entity.entity_type) {
            ids.remove(id);
        }
        if let Some(ids) = entity.region.as_ref().and_then(|r| self.by_region.get_mut(r)) {
            ids.remove(id);
        }
        if let Some(components) = self.components.remove(id) {
            for kind in components.keys() {
                if let Some(ids) = self.by_kind.get_mut(kind) {
                    ids.remove(id);
                }
            }
        }
        true
    }

    fn touch(&mut self, id: &str) {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.touch();
        }
    }

    fn matches(&self, id: &str, query: &EntityQuery) -> bool {
        let Some(entity) = self.entities.get(id) else {
            return false;
        };
        if query.active_only && !entity.active {
            return false;
        }
        if let Some(entity_type) = &query.entity_type {
            if &entity.entity_type != entity_type {
                return false;
            }
        }
        if let Some(region) = &query.region {
            if !entity.in_region(region) {
                return false;
            }
        }
        let components = self.components.get(id);
        query
            .component_kinds
            .iter()
            .all(|kind| components.is_some_and(|c| c.contains_key(kind)))
    }

    /// Picks the smallest index bucket the query touches as the candidate set.
    fn candidates(&self, query: &EntityQuery) -> Vec<&String> {
        let mut buckets: Vec<Option<&HashSet<String>>> = Vec::new();
        if let Some(entity_type) = &query.entity_type {
            buckets.push(self.by_type.get(entity_type));
        }
        if let Some(region) = &query.region {
            buckets.push(self.by_region.get(region));
        }
        for kind in &query.component_kinds {
            buckets.push(self.by_kind.get(kind));
        }

        if buckets.is_empty() {
            return self.entities.keys().collect();
        }
        // A filter with no bucket at all matches nothing.
        if buckets.iter().any(Option::is_none) {
            return Vec::new();
        }
        buckets
            .into_iter()
            .flatten()
            .min_by_key(|bucket| bucket.len())
            .map(|bucket| bucket.iter().collect())
            .unwrap_or_default()
    }

    fn snapshot_of(&self, entity: &Entity) -> EntitySnapshot {
        let components = self
            .components
            .get(&entity.id)
            .map(|c| c.iter().map(|(kind, comp)| (*kind, comp.clone())).collect())
            .unwrap_or_default();
        EntitySnapshot {
            entity: entity.clone(),
            components,
        }
    }
}

/// Thread-safe entity/component store.
pub struct WorldStore {
    inner: ReentrantMutex<RefCell<WorldInner>>,
    registry: ComponentRegistry,
}

impl Default for WorldStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorldStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldStore")
            .field("entities", &self.entity_count())
            .field("registry", &self.registry)
            .finish()
    }
}

impl WorldStore {
    /// Creates an empty store with every built-in component kind registered.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(ComponentRegistry::default())
    }

    /// Creates an empty store that builds components through `registry`.
    #[must_use]
    pub fn with_registry(registry: ComponentRegistry) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(WorldInner::default())),
            registry,
        }
    }

    /// The registry used for component construction and updates.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    fn read<R>(&self, f: impl FnOnce(&WorldInner) -> R) -> R {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        let result = f(&inner);
        drop(inner);
        result
    }

    fn write<R>(&self, f: impl FnOnce(&mut WorldInner) -> R) -> R {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let result = f(&mut inner);
        drop(inner);
        result
    }

    /// Runs `f` while holding the store lock.
    ///
    /// Other threads cannot observe or mutate the store until `f` returns;
    /// `f` itself may call any store method.
    pub fn with_lock<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _guard = self.inner.lock();
        f(self)
    }

    /// Creates an entity.
    ///
    /// Generates an id when `id` is `None`.
    ///
    /// # Errors
    ///
    /// [`WorldError::DuplicateEntity`] if the id is taken,
    /// [`WorldError::Validation`] for an empty id or type.
    pub fn create_entity(&self, entity_type: &str, region: Option<&str>, id: Option<&str>) -> WorldResult<Entity> {
        if entity_type.is_empty() {
            return Err(WorldError::Validation("entity type must not be empty".to_string()));
        }
        let id = match id {
            Some("") => return Err(WorldError::Validation("entity id must not be empty".to_string())),
            Some(id) => id.to_string(),
            None => Entity::generate_id(),
        };

        self.write(|inner| {
            if inner.entities.contains_key(&id) {
                return Err(WorldError::DuplicateEntity(id));
            }
            let entity = Entity::new(id, entity_type, region.map(str::to_string));
            inner.insert_entity(entity.clone());
            Ok(entity)
        })
    }

    /// Returns a copy of the entity.
    #[must_use]
    pub fn get_entity(&self, id: &str) -> Option<Entity> {
        self.read(|inner| inner.entities.get(id).cloned())
    }

    /// True if the entity exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.read(|inner| inner.entities.contains_key(id))
    }

    /// Number of entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.read(|inner| inner.entities.len())
    }

    /// Deletes an entity together with its components and index entries.
    ///
    /// Returns `false` if the entity did not exist.
    pub fn delete_entity(&self, id: &str) -> bool {
        self.write(|inner| inner.remove_entity(id))
    }

    /// Activates or deactivates an entity.
    ///
    /// # Errors
    ///
    /// [`WorldError::EntityNotFound`] if the entity does not exist.
    pub fn set_active(&self, id: &str, active: bool) -> WorldResult<()> {
        self.write(|inner| {
            let entity = inner
                .entities
                .get_mut(id)
                .ok_or_else(|| WorldError::EntityNotFound(id.to_string()))?;
            if entity.active != active {
                entity.active = active;
                entity.touch();
            }
            Ok(())
        })
    }

    /// Attaches `component` to the entity, replacing any component of the
    /// same kind (last write wins).
    ///
    /// Returns the replaced component, if there was one.
    ///
    /// # Errors
    ///
    /// [`WorldError::EntityNotFound`] if the entity does not exist.
    pub fn add_component(&self, entity_id: &str, mut component: Component) -> WorldResult<Option<Component>> {
        self.write(|inner| {
            if !inner.entities.contains_key(entity_id) {
                return Err(WorldError::EntityNotFound(entity_id.to_string()));
            }
            let kind = component.kind();
            component.entity_id = entity_id.to_string();

            let previous = inner
                .components
                .entry(entity_id.to_string())
                .or_default()
                .insert(kind, component);
            inner.by_kind.entry(kind).or_default().insert(entity_id.to_string());
            inner.touch(entity_id);
            Ok(previous)
        })
    }

    /// Merges `data` into the entity's existing component of `kind`.
    ///
    /// # Errors
    ///
    /// [`WorldError::EntityNotFound`] / [`WorldError::ComponentNotFound`] if
    /// either is absent, registry errors if the merged fields are invalid.
    pub fn update_component(&self, entity_id: &str, kind: ComponentKind, data: &FieldMap) -> WorldResult<Component> {
        self.write(|inner| {
            if !inner.entities.contains_key(entity_id) {
                return Err(WorldError::EntityNotFound(entity_id.to_string()));
            }
            let slot = inner
                .components
                .get_mut(entity_id)
                .and_then(|c| c.get_mut(&kind))
                .ok_or_else(|| WorldError::ComponentNotFound {
                    entity_id: entity_id.to_string(),
                    kind,
                })?;

            let updated = self.registry.merge(slot, data)?;
            *slot = updated.clone();
            inner.touch(entity_id);
            Ok(updated)
        })
    }

    /// Returns a copy of the entity's component of `kind`.
    #[must_use]
    pub fn get_component(&self, entity_id: &str, kind: ComponentKind) -> Option<Component> {
        self.read(|inner| {
            inner
                .components
                .get(entity_id)
                .and_then(|c| c.get(&kind))
                .cloned()
        })
    }

    /// Returns copies of all components on the entity, ordered by kind.
    #[must_use]
    pub fn components_of(&self, entity_id: &str) -> Vec<Component> {
        self.read(|inner| {
            let mut components: Vec<Component> = inner
                .components
                .get(entity_id)
                .map(|c| c.values().cloned().collect())
                .unwrap_or_default();
            components.sort_by_key(Component::kind);
            components
        })
    }

    /// Removes the entity's component of `kind`.
    ///
    /// Returns `false` if the entity or the component was absent.
    pub fn remove_component(&self, entity_id: &str, kind: ComponentKind) -> bool {
        self.write(|inner| {
            let removed = inner
                .components
                .get_mut(entity_id)
                .and_then(|c| c.remove(&kind))
                .is_some();
            if removed {
                if let Some(ids) = inner.by_kind.get_mut(&kind) {
                    ids.remove(entity_id);
                }
                inner.touch(entity_id);
            }
            removed
        })
    }

    /// Returns the ids of every entity matching `query`.
    #[must_use]
    pub fn query_entities(&self, query: &EntityQuery) -> BTreeSet<String> {
        self.read(|inner| {
            inner
                .candidates(query)
                .into_iter()
                .filter(|id| inner.matches(id, query))
                .cloned()
                .collect()
        })
    }

    /// Takes a deep copy of every entity in `region` (or all entities).
    ///
    /// Inactive entities are included.
    #[must_use]
    pub fn snapshot(&self, region: Option<&str>) -> WorldState {
        self.read(|inner| {
            let entities = inner
                .entities
                .values()
                .filter(|e| region.map_or(true, |r| e.in_region(r)))
                .map(|e| (e.id.clone(), inner.snapshot_of(e)))
                .collect();
            WorldState {
                taken_at: now_millis(),
                region: region.map(str::to_string),
                entities,
            }
        })
    }

    /// Aggregate counts.
    #[must_use]
    pub fn statistics(&self) -> WorldStats {
        self.read(|inner| {
            let non_empty = |ids: &HashSet<String>| (!ids.is_empty()).then_some(ids.len());
            WorldStats {
                total_entities: inner.entities.len(),
                active_entities: inner.entities.values().filter(|e| e.active).count(),
                total_components: inner.components.values().map(HashMap::len).sum(),
                by_type: inner
                    .by_type
                    .iter()
                    .filter_map(|(k, ids)| non_empty(ids).map(|n| (k.clone(), n)))
                    .collect(),
                by_region: inner
                    .by_region
                    .iter()
                    .filter_map(|(k, ids)| non_empty(ids).map(|n| (k.clone(), n)))
                    .collect(),
                by_component_kind: inner
                    .by_kind
                    .iter()
                    .filter_map(|(k, ids)| non_empty(ids).map(|n| (*k, n)))
                    .collect(),
            }
        })
    }

    /// Drops empty index buckets. Returns how many were dropped.
    pub fn compact_indices(&self) -> usize {
        self.write(|inner| {
            let before = inner.by_type.len() + inner.by_region.len() + inner.by_kind.len();
            inner.by_type.retain(|_, ids| !ids.is_empty());
            inner.by_region.retain(|_, ids| !ids.is_empty());
            inner.by_kind.retain(|_, ids| !ids.is_empty());
            before - (inner.by_type.len() + inner.by_region.len() + inner.by_kind.len())
        })
    }

    /// Deletes every inactive entity. Returns how many were deleted.
    pub fn purge_inactive(&self) -> usize {
        self.write(|inner| {
            let inactive: Vec<String> = inner
                .entities
                .values()
                .filter(|e| !e.active)
                .map(|e| e.id.clone())
                .collect();
            inactive.iter().filter(|id| inner.remove_entity(id)).count()
        })
    }
}
