//! # Engine Context
//!
//! The explicit context object that owns one world, its queues and its
//! orchestrator. Several engines can live in one process.
//!
//! ```
//! use strata::{Engine, EngineConfig};
//! use strata_patch::PatchBuilder;
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! assert!(engine.submit_patch(PatchBuilder::new().create_entity("npc", Some("n1")).build()));
//!
//! let result = engine.orchestrator().process_next_patch(strata_patch::Wait::NoWait).unwrap();
//! assert!(result.success);
//! assert!(engine.world().contains("n1"));
//! ```

use std::sync::Arc;
use strata_core::{ComponentRegistry, FieldMap, WorldStore};
use strata_patch::{Patch, PatchApplier, QueueManager, Wait};
use strata_shared::{MetricsSink, NoopMetrics};

use crate::config::EngineConfig;
use crate::error::{ConfigResult, OrchestratorResult};
use crate::orchestrator::{JobHandler, JobHandlers, JobKind, Orchestrator, OrchestratorParts, WorldDriver};

/// A world plus everything that feeds and drives it.
pub struct Engine {
    config: EngineConfig,
    world: Arc<WorldStore>,
    queues: Arc<QueueManager>,
    metrics: Arc<dyn MetricsSink>,
    orchestrator: Orchestrator,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Starts building an engine from `config`.
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Builds an engine with no metrics, handlers or drivers.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`](crate::ConfigError::Invalid) if the config
    /// does not validate.
    pub fn new(config: EngineConfig) -> ConfigResult<Self> {
        Self::builder(config).build()
    }

    /// The configuration the engine was built from.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The world.
    #[must_use]
    pub fn world(&self) -> &Arc<WorldStore> {
        &self.world
    }

    /// The patch queues.
    #[must_use]
    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    /// The metrics sink shared by every component.
    #[must_use]
    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    /// The orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Puts `patch` on the default queue (the one the consumer drains) at the
    /// patch's own priority, waiting for room.
    pub fn submit_patch(&self, patch: Patch) -> bool {
        let priority = patch.priority();
        self.queues.default_queue().put(patch, priority, Wait::Forever)
    }

    /// Routes `patch` by region and source at the patch's own priority.
    pub fn route_patch(&self, patch: Patch) -> bool {
        let priority = patch.priority();
        self.queues.route(patch, priority)
    }

    /// Submits a job. See [`Orchestrator::submit_job`].
    pub fn submit_job(&self, job_type: JobKind, priority: i32, metadata: FieldMap) -> String {
        self.orchestrator.submit_job(job_type, priority, metadata)
    }

    /// Starts the orchestrator loops.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::start`].
    pub fn start(&self) -> OrchestratorResult<()> {
        self.orchestrator.start()
    }

    /// Stops the orchestrator loops.
    pub fn stop(&self) {
        self.orchestrator.stop();
    }
}

/// Assembles an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    registry: ComponentRegistry,
    metrics: Arc<dyn MetricsSink>,
    handlers: JobHandlers,
    drivers: Vec<Arc<dyn WorldDriver>>,
}

impl EngineBuilder {
    /// Starts from `config` with every component kind, no metrics, no
    /// handlers and no drivers.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: ComponentRegistry::default(),
            metrics: Arc::new(NoopMetrics),
            handlers: JobHandlers::default(),
            drivers: Vec::new(),
        }
    }

    /// Uses `registry` for component construction.
    #[must_use]
    pub fn with_registry(mut self, registry: ComponentRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Reports every metric into `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Handles custom jobs called `name` with `handler`.
    #[must_use]
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.register(name, handler);
        self
    }

    /// Advances the world with `driver` on every tick, after the drivers
    /// added before it.
    #[must_use]
    pub fn with_driver(mut self, driver: Arc<dyn WorldDriver>) -> Self {
        self.drivers.push(driver);
        self
    }

    /// Validates the config and wires everything together.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`](crate::ConfigError::Invalid) if the config
    /// does not validate.
    pub fn build(self) -> ConfigResult<Engine> {
        let Self {
            config,
            registry,
            metrics,
            handlers,
            drivers,
        } = self;
        config.validate()?;

        let world = Arc::new(WorldStore::with_registry(registry));
        let queues = Arc::new(QueueManager::new(config.queues.default_capacity, Arc::clone(&metrics)));
        let applier = PatchApplier::new(Arc::clone(&world))
            .with_metrics(Arc::clone(&metrics))
            .with_metadata_reordering(config.applier.reorder_by_metadata_priority);
        let orchestrator = Orchestrator::new(OrchestratorParts {
            world: Arc::clone(&world),
            queues: Arc::clone(&queues),
            applier,
            metrics: Arc::clone(&metrics),
            handlers,
            drivers,
            settings: config.orchestrator_settings(),
        });

        Ok(Engine {
            config,
            world,
            queues,
            metrics,
            orchestrator,
        })
    }
}
