//! # Priority Patch Queue
//!
//! A bounded, thread-safe max-priority queue of patches.
//!
//! ```text
//!   Producer 1 ──┐                                   ┌──> Consumer
//!   Producer 2 ──┼──> [Mutex<BinaryHeap>] ──────────┤
//!   Producer N ──┘     not_full ▲   ▼ not_empty      └──> Consumer
//! ```
//!
//! Higher priority leaves first; equal priorities leave in arrival order,
//! tracked with a per-queue sequence number. A capacity of 0 means unbounded.
//! Nothing is dropped except through [`PatchQueue::clear`].

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_shared::{now_millis, Millis, MetricTags, MetricsSink, NoopMetrics};

use crate::patch::Patch;

/// How long `put`/`get` may wait for room or for an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Return immediately.
    NoWait,
    /// Wait as long as it takes.
    Forever,
    /// Wait at most this long.
    Timeout(Duration),
}

/// A patch waiting in a queue.
#[derive(Clone, Debug)]
pub struct QueuedPatch {
    /// Queue priority (higher leaves first).
    pub priority: i32,
    /// When the patch entered the queue.
    pub enqueue_time: Instant,
    /// Arrival order within the queue.
    pub sequence: u64,
    /// The patch itself.
    pub patch: Patch,
}

impl PartialEq for QueuedPatch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedPatch {}

impl PartialOrd for QueuedPatch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedPatch {
    /// Greater means "leaves the max-heap sooner".
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Point-in-time queue counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Queue name.
    pub name: String,
    /// Patches ever accepted.
    pub total_queued: u64,
    /// Patches ever handed to a consumer.
    pub total_processed: u64,
    /// Patches currently waiting.
    pub current_size: usize,
    /// Capacity (0 = unbounded).
    pub capacity: usize,
    /// Time of the last accepted put.
    pub last_queued_at: Option<Millis>,
    /// Time of the last successful get.
    pub last_processed_at: Option<Millis>,
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueuedPatch>,
    next_sequence: u64,
    total_queued: u64,
    total_processed: u64,
    last_queued_at: Option<Millis>,
    last_processed_at: Option<Millis>,
}

/// A named, bounded priority queue of patches.
pub struct PatchQueue {
    name: String,
    capacity: usize,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for PatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("size", &self.qsize())
            .finish_non_exhaustive()
    }
}

impl PatchQueue {
    /// Creates a queue holding at most `capacity` patches (0 = unbounded).
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            state: Mutex::new(QueueState::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Reports puts, gets and clears into `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacity (0 = unbounded).
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues `patch` at `priority`.
    ///
    /// Returns `false` if the queue stayed full for the whole `wait`.
    pub fn put(&self, patch: Patch, priority: i32, wait: Wait) -> bool {
        let mut state = self.state.lock();
        if !self.wait_while(&mut state, &self.not_full, wait, |s| self.full(s)) {
            drop(state);
            tracing::debug!(queue = %self.name, patch = %patch.id(), "Queue full, patch rejected");
            self.record("queue.rejected", 1.0);
            return false;
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.total_queued += 1;
        state.last_queued_at = Some(now_millis());
        state.heap.push(QueuedPatch {
            priority,
            enqueue_time: Instant::now(),
            sequence,
            patch,
        });
        let size = state.heap.len();
        drop(state);

        self.not_empty.notify_one();
        #[allow(clippy::cast_precision_loss)]
        self.record("queue.size", size as f64);
        true
    }

    /// Enqueues without waiting. Same as `put(patch, priority, Wait::NoWait)`.
    pub fn try_put(&self, patch: Patch, priority: i32) -> bool {
        self.put(patch, priority, Wait::NoWait)
    }

    /// Dequeues the highest-priority patch.
    ///
    /// Returns `None` if the queue stayed empty for the whole `wait`.
    #[must_use]
    pub fn get(&self, wait: Wait) -> Option<Patch> {
        self.get_queued(wait).map(|queued| queued.patch)
    }

    /// Like [`get`](Self::get) but keeps the queue envelope.
    #[must_use]
    pub fn get_queued(&self, wait: Wait) -> Option<QueuedPatch> {
        let mut state = self.state.lock();
        if !self.wait_while(&mut state, &self.not_empty, wait, |s| s.heap.is_empty()) {
            return None;
        }

        let queued = state.heap.pop()?;
        state.total_processed += 1;
        state.last_processed_at = Some(now_millis());
        let size = state.heap.len();
        drop(state);

        self.not_full.notify_one();
        #[allow(clippy::cast_precision_loss)]
        self.record("queue.size", size as f64);
        Some(queued)
    }

    /// Dequeues without waiting.
    #[must_use]
    pub fn try_get(&self) -> Option<Patch> {
        self.get(Wait::NoWait)
    }

    /// Returns a copy of the patch that would be dequeued next.
    ///
    /// Advisory only: another consumer may take it before the caller acts.
    #[must_use]
    pub fn peek(&self) -> Option<Patch> {
        self.state.lock().heap.peek().map(|queued| queued.patch.clone())
    }

    /// Drops every waiting patch and returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.heap.len();
        state.heap.clear();
        drop(state);

        self.not_full.notify_all();
        if dropped > 0 {
            tracing::info!(queue = %self.name, dropped, "Queue cleared");
        }
        #[allow(clippy::cast_precision_loss)]
        self.record("queue.cleared", dropped as f64);
        dropped
    }

    /// Number of waiting patches.
    #[must_use]
    pub fn qsize(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// True if nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }

    /// True if a non-waiting put would be rejected.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.full(&self.state.lock())
    }

    /// Current counters.
    #[must_use]
    pub fn statistics(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            name: self.name.clone(),
            total_queued: state.total_queued,
            total_processed: state.total_processed,
            current_size: state.heap.len(),
            capacity: self.capacity,
            last_queued_at: state.last_queued_at,
            last_processed_at: state.last_processed_at,
        }
    }

    #[inline]
    fn full(&self, state: &QueueState) -> bool {
        self.capacity > 0 && state.heap.len() >= self.capacity
    }

    /// Waits on `condvar` while `blocked` holds. Returns `false` if still
    /// blocked when the wait ends.
    fn wait_while(
        &self,
        state: &mut MutexGuard<'_, QueueState>,
        condvar: &Condvar,
        wait: Wait,
        blocked: impl Fn(&QueueState) -> bool,
    ) -> bool {
        match wait {
            Wait::NoWait => !blocked(&**state),
            Wait::Forever => {
                while blocked(&**state) {
                    condvar.wait(state);
                }
                true
            }
            Wait::Timeout(timeout) => {
                let deadline = Instant::now() + timeout;
                while blocked(&**state) {
                    if condvar.wait_until(state, deadline).timed_out() {
                        return !blocked(&**state);
                    }
                }
                true
            }
        }
    }

    fn record(&self, metric: &str, value: f64) {
        let mut tags = MetricTags::new();
        tags.insert("queue".to_string(), self.name.clone());
        self.metrics.record_metric(metric, value, Some(&tags));
    }
}
