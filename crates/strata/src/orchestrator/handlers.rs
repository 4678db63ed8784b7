//! # Job Handlers
//!
//! Built-in jobs plus the extension seams the orchestrator calls into:
//!
//! - [`JobHandler`]: runs a `JobKind::Custom(name)` job.
//! - [`WorldDriver`]: advances the world once per tick.
//!
//! Built-in job metadata:
//!
//! | Job               | Metadata                                                      |
//! |-------------------|---------------------------------------------------------------|
//! | `activate_region` | `region` (required)                                           |
//! | `spawn_entity`    | `entity_type` (required), `entity_id`, `region`, `components` |
//! | `maintenance`     | `purge_inactive` (bool, default false)                        |
//! | `sync_metric`     | `field` (default `health_ratio`), `region`                    |

use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{ComponentKind, Entity, EntityQuery, FieldMap, WorldResult, WorldStore};
use strata_patch::{PatchApplier, PatchBuilder};
use strata_shared::{MetricTags, MetricsSink, ORCHESTRATOR_QUEUE_NAME};

use super::job::{Job, JobBoard, RetentionPolicy};
use crate::error::{JobError, JobResult};

/// Attribute field written by `sync_metric` when the job does not name one.
pub const DEFAULT_SYNC_FIELD: &str = "health_ratio";

/// Everything a job may touch while it runs.
pub struct JobContext<'a> {
    /// The job being run (already `Running`).
    pub job: &'a Job,
    /// The world.
    pub world: &'a Arc<WorldStore>,
    /// Applier bound to the same world.
    pub applier: &'a PatchApplier,
    /// The job board, for jobs that inspect or prune other jobs.
    pub jobs: &'a JobBoard,
    /// Metrics destination.
    pub metrics: &'a dyn MetricsSink,
    /// Retention applied by `maintenance`.
    pub retention: &'a RetentionPolicy,
}

impl JobContext<'_> {
    /// Required string metadata.
    ///
    /// # Errors
    ///
    /// [`JobError::InvalidMetadata`] if the key is absent, empty or not a string.
    pub fn required_str(&self, key: &str) -> JobResult<&str> {
        match self.job.metadata.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.as_str()),
            Some(other) => Err(JobError::InvalidMetadata(format!(
                "`{key}` must be a non-empty string, got {other}"
            ))),
            None => Err(JobError::InvalidMetadata(format!("missing `{key}`"))),
        }
    }

    /// Optional string metadata.
    ///
    /// # Errors
    ///
    /// [`JobError::InvalidMetadata`] if the key is present but not a string.
    pub fn optional_str(&self, key: &str) -> JobResult<Option<&str>> {
        match self.job.metadata.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(JobError::InvalidMetadata(format!(
                "`{key}` must be a string, got {other}"
            ))),
        }
    }

    /// Optional boolean metadata.
    ///
    /// # Errors
    ///
    /// [`JobError::InvalidMetadata`] if the key is present but not a bool.
    pub fn optional_bool(&self, key: &str) -> JobResult<Option<bool>> {
        match self.job.metadata.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(JobError::InvalidMetadata(format!(
                "`{key}` must be a boolean, got {other}"
            ))),
        }
    }
}

/// Runs custom jobs.
pub trait JobHandler: Send + Sync {
    /// Runs the job. The returned value becomes the job's `result`.
    ///
    /// # Errors
    ///
    /// Any error fails the job.
    fn run(&self, ctx: &JobContext<'_>) -> JobResult<Value>;
}

impl<F> JobHandler for F
where
    F: Fn(&JobContext<'_>) -> JobResult<Value> + Send + Sync,
{
    fn run(&self, ctx: &JobContext<'_>) -> JobResult<Value> {
        self(ctx)
    }
}

/// Advances the world once per orchestrator tick.
pub trait WorldDriver: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Advances the world by `delta`.
    ///
    /// # Errors
    ///
    /// Errors are logged; the tick carries on with the next driver.
    fn advance(&self, world: &WorldStore, delta: Duration) -> WorldResult<()>;
}

/// Custom job handlers, keyed by job type name.
#[derive(Clone, Default)]
pub struct JobHandlers {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl fmt::Debug for JobHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("JobHandlers").field("names", &names).finish()
    }
}

impl JobHandlers {
    /// Registers `handler` for custom jobs called `name`, replacing any
    /// previous handler of that name.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// The handler for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(name)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// `activate_region`: marks every entity of the region active.
pub(crate) fn activate_region(ctx: &JobContext<'_>) -> JobResult<Value> {
    let region = ctx.required_str("region")?;
    let query = EntityQuery::new().region(region).include_inactive();

    let activated = ctx.world.with_lock(|world| -> WorldResult<usize> {
        let mut activated = 0;
        for id in world.query_entities(&query) {
            if world.get_entity(&id).is_some_and(|e| !e.active) {
                world.set_active(&id, true)?;
                activated += 1;
            }
        }
        Ok(activated)
    })?;

    Ok(json!({ "region": region, "activated": activated }))
}

/// `spawn_entity`: builds a create-entity patch from metadata and applies it.
pub(crate) fn spawn_entity(ctx: &JobContext<'_>) -> JobResult<Value> {
    let entity_type = ctx.required_str("entity_type")?;
    let entity_id = ctx
        .optional_str("entity_id")?
        .map_or_else(Entity::generate_id, str::to_string);
    let components: BTreeMap<ComponentKind, FieldMap> = match ctx.job.metadata.get("components") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| JobError::InvalidMetadata(format!("`components`: {e}")))?,
    };

    let mut builder = PatchBuilder::new()
        .with_source(ORCHESTRATOR_QUEUE_NAME)
        .with_priority(ctx.job.priority);
    if let Some(region) = ctx.optional_str("region")? {
        builder = builder.with_region(region);
    }
    let patch = builder
        .create_entity_with(entity_type, Some(&entity_id), components)
        .build();
    let patch_id = patch.id().to_string();

    let result = ctx.applier.apply(patch);
    if !result.success {
        return Err(JobError::Handler(result.errors.join("; ")));
    }
    Ok(json!({ "entity_id": entity_id, "patch_id": patch_id }))
}

/// `maintenance`: job retention sweep, index compaction and, on request,
/// removal of inactive entities.
pub(crate) fn maintenance(ctx: &JobContext<'_>) -> JobResult<Value> {
    let purge_inactive = ctx.optional_bool("purge_inactive")?.unwrap_or(false);

    let jobs_removed = ctx.jobs.sweep(ctx.retention);
    let (buckets_dropped, entities_purged) = ctx.world.with_lock(|world| {
        let purged = if purge_inactive { world.purge_inactive() } else { 0 };
        (world.compact_indices(), purged)
    });

    tracing::info!(jobs_removed, buckets_dropped, entities_purged, "Maintenance finished");
    Ok(json!({
        "jobs_removed": jobs_removed,
        "index_buckets_dropped": buckets_dropped,
        "entities_purged": entities_purged,
    }))
}

/// `sync_metric`: writes each entity's health ratio into its attributes and
/// reports the mean as `world.<field>.mean`.
pub(crate) fn sync_metric(ctx: &JobContext<'_>) -> JobResult<Value> {
    let field = ctx.optional_str("field")?.unwrap_or(DEFAULT_SYNC_FIELD).to_string();
    let mut query = EntityQuery::new().with_kind(ComponentKind::Health);
    if let Some(region) = ctx.optional_str("region")? {
        query = query.region(region);
    }

    let ratios = ctx.world.with_lock(|world| -> WorldResult<Vec<f64>> {
        let mut ratios = Vec::new();
        for id in world.query_entities(&query) {
            let Some(ratio) = world
                .get_component(&id, ComponentKind::Health)
                .and_then(|c| c.as_health().map(strata_core::Health::ratio))
            else {
                continue;
            };
            let mut values = FieldMap::new();
            values.insert(field.clone(), json!(ratio));
            if world.get_component(&id, ComponentKind::Attributes).is_some() {
                world.update_component(&id, ComponentKind::Attributes, &values)?;
            } else {
                let component = world.registry().create(ComponentKind::Attributes, &id, &values)?;
                world.add_component(&id, component)?;
            }
            ratios.push(ratio);
        }
        Ok(ratios)
    })?;

    #[allow(clippy::cast_precision_loss)]
    let mean = if ratios.is_empty() {
        0.0
    } else {
        ratios.iter().sum::<f64>() / ratios.len() as f64
    };

    let mut tags = MetricTags::new();
    tags.insert("job_id".to_string(), ctx.job.id.clone());
    ctx.metrics
        .record_metric(&format!("world.{field}.mean"), mean, Some(&tags));

    Ok(json!({ "field": field, "entities": ratios.len(), "mean": mean }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{JobKind, JobStatus};
    use strata_shared::InMemoryMetrics;

    struct Fixture {
        world: Arc<WorldStore>,
        applier: PatchApplier,
        jobs: JobBoard,
        metrics: InMemoryMetrics,
        retention: RetentionPolicy,
    }

    impl Fixture {
        fn new() -> Self {
            let world = Arc::new(WorldStore::new());
            Self {
                applier: PatchApplier::new(Arc::clone(&world)),
                world,
                jobs: JobBoard::new(),
                metrics: InMemoryMetrics::new(),
                retention: RetentionPolicy::default(),
            }
        }

        fn run(
            &self,
            kind: JobKind,
            metadata: Value,
            f: impl Fn(&JobContext<'_>) -> JobResult<Value>,
        ) -> JobResult<Value> {
            let Value::Object(metadata) = metadata else {
                panic!("metadata must be an object");
            };
            let id = self.jobs.submit(kind, 0, metadata);
            let job = self.jobs.begin(&id).unwrap();
            let ctx = JobContext {
                job: &job,
                world: &self.world,
                applier: &self.applier,
                jobs: &self.jobs,
                metrics: &self.metrics,
                retention: &self.retention,
            };
            f(&ctx)
        }
    }

    #[test]
    fn test_activate_region() {
        let fx = Fixture::new();
        fx.world.create_entity("npc", Some("north"), Some("a")).unwrap();
        fx.world.create_entity("npc", Some("north"), Some("b")).unwrap();
        fx.world.create_entity("npc", Some("south"), Some("c")).unwrap();
        fx.world.set_active("a", false).unwrap();
        fx.world.set_active("c", false).unwrap();

        let out = fx
            .run(JobKind::ActivateRegion, json!({"region": "north"}), activate_region)
            .unwrap();

        assert_eq!(out["activated"], json!(1));
        assert!(fx.world.get_entity("a").unwrap().active);
        assert!(!fx.world.get_entity("c").unwrap().active);

        let err = fx.run(JobKind::ActivateRegion, json!({}), activate_region).unwrap_err();
        assert!(matches!(err, JobError::InvalidMetadata(_)));
    }

    #[test]
    fn test_spawn_entity() {
        let fx = Fixture::new();
        let out = fx
            .run(
                JobKind::SpawnEntity,
                json!({
                    "entity_type": "tree",
                    "entity_id": "oak-1",
                    "region": "forest",
                    "components": {"health": {"current": 5.0}}
                }),
                spawn_entity,
            )
            .unwrap();

        assert_eq!(out["entity_id"], json!("oak-1"));
        let entity = fx.world.get_entity("oak-1").unwrap();
        assert_eq!(entity.region.as_deref(), Some("forest"));
        assert!(fx.world.get_component("oak-1", ComponentKind::Health).is_some());

        let err = fx
            .run(JobKind::SpawnEntity, json!({"entity_type": "tree", "entity_id": "oak-1"}), spawn_entity)
            .unwrap_err();
        assert!(matches!(err, JobError::Handler(msg) if msg.contains("entity already exists")));

        let err = fx
            .run(JobKind::SpawnEntity, json!({"entity_type": "tree", "components": {"warp": {}}}), spawn_entity)
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidMetadata(_)));
    }

    #[test]
    fn test_sync_metric_writes_ratio_and_mean() {
        let fx = Fixture::new();
        for (id, current) in [("a", 50.0), ("b", 100.0)] {
            fx.world.create_entity("npc", None, Some(id)).unwrap();
            let mut fields = FieldMap::new();
            fields.insert("current".to_string(), json!(current));
            let health = fx.world.registry().create(ComponentKind::Health, id, &fields).unwrap();
            fx.world.add_component(id, health).unwrap();
        }
        let mut mood = FieldMap::new();
        mood.insert("mood".to_string(), json!("calm"));
        let attrs = fx.world.registry().create(ComponentKind::Attributes, "b", &mood).unwrap();
        fx.world.add_component("b", attrs).unwrap();

        let out = fx.run(JobKind::SyncMetric, json!({}), sync_metric).unwrap();

        assert_eq!(out["entities"], json!(2));
        assert!((out["mean"].as_f64().unwrap() - 0.75).abs() < 1e-9);
        let b = fx.world.get_component("b", ComponentKind::Attributes).unwrap();
        let values = &b.as_attributes().unwrap().values;
        assert_eq!(values.get("mood"), Some(&json!("calm")));
        assert_eq!(values.get(DEFAULT_SYNC_FIELD), Some(&json!(1.0)));
        assert_eq!(fx.metrics.last_value("world.health_ratio.mean"), Some(0.75));
    }

    #[test]
    fn test_maintenance_sweeps_and_compacts() {
        let mut fx = Fixture::new();
        fx.retention = RetentionPolicy {
            max_age: None,
            max_terminal_jobs: Some(0),
        };
        let old = fx.jobs.submit(JobKind::SyncMetric, 0, FieldMap::new());
        fx.jobs.begin(&old).unwrap();
        fx.jobs.finish(&old, Ok(Value::Null)).unwrap();

        fx.world.create_entity("npc", Some("north"), Some("a")).unwrap();
        fx.world.set_active("a", false).unwrap();

        let out = fx
            .run(JobKind::Maintenance, json!({"purge_inactive": true}), maintenance)
            .unwrap();

        assert_eq!(out["jobs_removed"], json!(1));
        assert_eq!(out["entities_purged"], json!(1));
        assert!(fx.jobs.get(&old).is_none());
        assert!(!fx.world.contains("a"));
        assert_eq!(fx.jobs.count(JobStatus::Running), 1);
    }

    fn echo(ctx: &JobContext<'_>) -> JobResult<Value> {
        Ok(Value::Object(ctx.job.metadata.clone()))
    }

    #[test]
    fn test_functions_are_handlers() {
        let mut handlers = JobHandlers::default();
        handlers.register("echo", Arc::new(echo));
        assert_eq!(handlers.len(), 1);
        assert!(handlers.get("missing").is_none());

        let fx = Fixture::new();
        let handler = Arc::clone(handlers.get("echo").unwrap());
        let out = fx
            .run(JobKind::Custom("echo".to_string()), json!({"x": 1}), |ctx| handler.run(ctx))
            .unwrap();
        assert_eq!(out, json!({"x": 1}));
    }
}
