//! # Queue Manager
//!
//! Owns the named patch queues and routes patches into them.
//!
//! ## Routing
//!
//! | Patch                             | Queue            |
//! |-----------------------------------|------------------|
//! | region `r` set                    | `region:r`       |
//! | source `orchestrator`             | `orchestrator`   |
//! | source `user`, `user:*`, `user_*` | `user_actions`   |
//! | anything else                     | `default`        |

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use strata_shared::{
    MetricsSink, NoopMetrics, DEFAULT_QUEUE_CAPACITY, DEFAULT_QUEUE_NAME, ORCHESTRATOR_QUEUE_NAME,
    USER_ACTIONS_QUEUE_NAME,
};

use super::priority::{PatchQueue, QueueStats, Wait};
use crate::patch::Patch;

/// Prefix of per-region queue names.
pub const REGION_QUEUE_PREFIX: &str = "region:";

/// A set of named queues created on demand.
pub struct QueueManager {
    queues: RwLock<HashMap<String, Arc<PatchQueue>>>,
    default_capacity: usize,
    metrics: Arc<dyn MetricsSink>,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY, Arc::new(NoopMetrics))
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("queues", &self.queue_names())
            .field("default_capacity", &self.default_capacity)
            .finish_non_exhaustive()
    }
}

impl QueueManager {
    /// Creates a manager whose queues hold `default_capacity` patches each
    /// and report into `metrics`. The `default` queue exists immediately.
    #[must_use]
    pub fn new(default_capacity: usize, metrics: Arc<dyn MetricsSink>) -> Self {
        let manager = Self {
            queues: RwLock::new(HashMap::new()),
            default_capacity,
            metrics,
        };
        let _ = manager.queue(DEFAULT_QUEUE_NAME);
        manager
    }

    /// Returns the queue called `name`, creating it if needed.
    pub fn queue(&self, name: &str) -> Arc<PatchQueue> {
        if let Some(queue) = self.queues.read().get(name) {
            return Arc::clone(queue);
        }
        let mut queues = self.queues.write();
        Arc::clone(queues.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(queue = name, capacity = self.default_capacity, "Queue created");
            Arc::new(PatchQueue::new(name, self.default_capacity).with_metrics(Arc::clone(&self.metrics)))
        }))
    }

    /// Returns the queue called `name` without creating it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<PatchQueue>> {
        self.queues.read().get(name).cloned()
    }

    /// The `default` queue.
    pub fn default_queue(&self) -> Arc<PatchQueue> {
        self.queue(DEFAULT_QUEUE_NAME)
    }

    /// Name of the queue `patch` is routed to.
    #[must_use]
    pub fn resolve_queue_name(patch: &Patch) -> String {
        if let Some(region) = patch.region() {
            return format!("{REGION_QUEUE_PREFIX}{region}");
        }
        match patch.source() {
            ORCHESTRATOR_QUEUE_NAME => ORCHESTRATOR_QUEUE_NAME.to_string(),
            source if is_user_source(source) => USER_ACTIONS_QUEUE_NAME.to_string(),
            source => {
                tracing::trace!(source, patch = %patch.id(), "No routing rule, using default queue");
                DEFAULT_QUEUE_NAME.to_string()
            }
        }
    }

    /// Routes `patch` to its queue, waiting for room if the queue is full.
    pub fn route(&self, patch: Patch, priority: i32) -> bool {
        self.route_with(patch, priority, Wait::Forever)
    }

    /// Routes `patch` to its queue with an explicit wait policy.
    pub fn route_with(&self, patch: Patch, priority: i32, wait: Wait) -> bool {
        let name = Self::resolve_queue_name(&patch);
        self.queue(&name).put(patch, priority, wait)
    }

    /// Names of every queue, sorted.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Counters for every queue, keyed by name.
    #[must_use]
    pub fn statistics(&self) -> BTreeMap<String, QueueStats> {
        self.snapshot()
            .into_iter()
            .map(|queue| (queue.name().to_string(), queue.statistics()))
            .collect()
    }

    /// Patches waiting across every queue.
    #[must_use]
    pub fn total_pending(&self) -> usize {
        self.snapshot().iter().map(|queue| queue.qsize()).sum()
    }

    /// Clears every queue and returns how many patches were dropped.
    pub fn clear_all(&self) -> usize {
        self.snapshot().iter().map(|queue| queue.clear()).sum()
    }

    /// Copies the queue handles out so per-queue locks are never taken
    /// under the map lock.
    fn snapshot(&self) -> Vec<Arc<PatchQueue>> {
        self.queues.read().values().cloned().collect()
    }
}

fn is_user_source(source: &str) -> bool {
    source == "user" || source.starts_with("user:") || source.starts_with("user_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchBuilder;

    #[test]
    fn test_routing_rules() {
        let by_region = PatchBuilder::new().with_region("north").with_source("user:1").build();
        assert_eq!(QueueManager::resolve_queue_name(&by_region), "region:north");

        let internal = PatchBuilder::new().with_source("orchestrator").build();
        assert_eq!(QueueManager::resolve_queue_name(&internal), ORCHESTRATOR_QUEUE_NAME);

        let user = PatchBuilder::new().with_source("user_42").build();
        assert_eq!(QueueManager::resolve_queue_name(&user), USER_ACTIONS_QUEUE_NAME);

        let other = PatchBuilder::new().with_source("importer").build();
        assert_eq!(QueueManager::resolve_queue_name(&other), DEFAULT_QUEUE_NAME);
    }

    #[test]
    fn test_user_prefix_must_be_delimited() {
        for source in ["user", "user:7", "user_42"] {
            let patch = PatchBuilder::new().with_source(source).build();
            assert_eq!(QueueManager::resolve_queue_name(&patch), USER_ACTIONS_QUEUE_NAME, "{source}");
        }
        for source in ["username_sync", "userland-importer", "users"] {
            let patch = PatchBuilder::new().with_source(source).build();
            assert_eq!(QueueManager::resolve_queue_name(&patch), DEFAULT_QUEUE_NAME, "{source}");
        }
    }

    #[test]
    fn test_route_creates_queues_on_demand() {
        let manager = QueueManager::default();
        assert_eq!(manager.queue_names(), vec![DEFAULT_QUEUE_NAME.to_string()]);

        assert!(manager.route(PatchBuilder::new().with_source("user:1").build(), 3));
        assert!(manager.route(PatchBuilder::new().with_region("south").build(), 0));
        assert!(manager.route(PatchBuilder::new().build(), 0));

        assert_eq!(
            manager.queue_names(),
            vec!["default".to_string(), "region:south".to_string(), "user_actions".to_string()]
        );
        assert_eq!(manager.total_pending(), 3);
        assert_eq!(manager.get("user_actions").map(|q| q.qsize()), Some(1));
        assert!(manager.get("orchestrator").is_none());
    }

    #[test]
    fn test_queue_returns_same_instance() {
        let manager = QueueManager::default();
        let a = manager.queue("jobs");
        let b = manager.queue("jobs");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&manager.default_queue(), &manager.queue(DEFAULT_QUEUE_NAME)));
    }

    #[test]
    fn test_statistics_and_clear_all() {
        let manager = QueueManager::new(5, Arc::new(NoopMetrics));
        assert!(manager.route(PatchBuilder::new().with_source("orchestrator").build(), 0));
        assert!(manager.route(PatchBuilder::new().with_source("user").build(), 0));
        assert!(manager.route(PatchBuilder::new().with_source("user").build(), 0));

        let stats = manager.statistics();
        assert_eq!(stats["orchestrator"].current_size, 1);
        assert_eq!(stats["user_actions"].current_size, 2);
        assert_eq!(stats["user_actions"].capacity, 5);

        assert_eq!(manager.clear_all(), 3);
        assert_eq!(manager.total_pending(), 0);
    }

    #[test]
    fn test_route_with_respects_capacity() {
        let manager = QueueManager::new(1, Arc::new(NoopMetrics));
        assert!(manager.route_with(PatchBuilder::new().build(), 0, Wait::NoWait));
        assert!(!manager.route_with(PatchBuilder::new().build(), 0, Wait::NoWait));
    }
}
