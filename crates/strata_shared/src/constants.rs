//! # Engine Constants
//!
//! Default tuning values. Every one of these can be overridden through the
//! engine configuration; the constants only exist so that the individual
//! crates have sane behaviour when constructed directly.

use std::time::Duration;

// =============================================================================
// QUEUES
// =============================================================================

/// Name of the queue the orchestrator's patch consumer drains.
pub const DEFAULT_QUEUE_NAME: &str = "default";

/// Queue for patches emitted by the orchestrator itself.
pub const ORCHESTRATOR_QUEUE_NAME: &str = "orchestrator";

/// Queue for patches that originate from user actions.
pub const USER_ACTIONS_QUEUE_NAME: &str = "user_actions";

/// Default capacity of a patch queue (0 means unbounded).
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Main tick loop period.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// How long the patch consumer blocks on an empty queue before idling.
pub const DEFAULT_CONSUMER_POLL: Duration = Duration::from_secs(1);

/// Maximum number of pending jobs executed per tick.
pub const DEFAULT_JOB_BATCH_SIZE: usize = 10;

/// Upper bound on how long `stop()` waits for each loop to exit.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
