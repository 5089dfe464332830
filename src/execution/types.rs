//! Types describing the execution substrate boundary.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unit of work handed to an execution manager.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Opaque ordering key; work sharing a serial tag runs one at a time, in
/// submission order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionTag(pub String);

impl ExecutionTag {
    pub fn new(tag: impl Into<String>) -> Self {
        ExecutionTag(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ExecutionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExecutionTag({})", self.0)
    }
}

impl fmt::Display for ExecutionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The execution substrate consumed by the dispatch core.
///
/// Implementations run submitted work asynchronously, at most once, and must
/// isolate failures per task. Work sharing a tag executes strictly
/// sequentially in submission order; different tags may run concurrently.
/// `submit` must not wait for earlier work to finish.
pub trait ExecutionManager: Send + Sync {
    /// Enqueue `task` under `tag`. Fails only when the substrate cannot accept
    /// work right now (shut down, or out of queue capacity).
    fn submit(&self, tag: &ExecutionTag, task: Task) -> Result<()>;

    /// Keep a lane for `tag` alive while it is idle. Idempotent.
    fn set_serial_scheduling_for_tag(&self, tag: &ExecutionTag);

    /// Forget any scheduling configured for `tag`. Work already queued on the
    /// lane still runs to completion, ahead of anything submitted later.
    /// Idempotent.
    fn clear_scheduling_for_tag(&self, tag: &ExecutionTag);
}

/// Configuration for [`BasicExecutionManager`](super::BasicExecutionManager).
#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    /// Number of delivery worker threads.
    /// Default: available parallelism, at least 2.
    pub worker_threads: usize,

    /// Worker thread name prefix; workers are named `<prefix>-<n>`.
    pub thread_name_prefix: String,

    /// Capacity of the shared job queue (None = unbounded). One slot is
    /// taken per lane waiting for a worker; a submission that finds the
    /// queue full is rejected instead of waiting.
    pub queue_capacity: Option<usize>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .max(2);
        Self {
            worker_threads: workers,
            thread_name_prefix: "sensorbus-delivery".to_string(),
            queue_capacity: None,
        }
    }
}
