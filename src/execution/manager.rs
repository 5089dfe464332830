//! In-process execution manager: a worker pool with per-tag serial lanes.

use crate::error::{Result, SubscriptionError};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, warn};

use super::types::{ExecutionConfig, ExecutionManager, ExecutionTag, Task};

/// FIFO lane for one tag. Every tag with queued or running work has one.
#[derive(Default)]
struct Lane {
    queue: VecDeque<Task>,
    /// A worker currently owns this lane.
    running: bool,
    /// Serial scheduling is registered, so the lane outlives idle periods.
    /// A lane with `serial == false` is removed once its queue drains.
    serial: bool,
}

/// State shared between the handle and the worker threads.
struct Shared {
    lanes: Mutex<HashMap<ExecutionTag, Lane>>,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    fn run_isolated(&self, tag: &ExecutionTag, task: Task) {
        match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            Err(payload) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                error!(
                    tag = %tag,
                    panic = %panic_message(payload.as_ref()),
                    "delivery task panicked"
                );
            }
        }
    }

    /// Pop the next task of a lane, releasing the lane when it runs dry.
    fn next_lane_task(&self, tag: &ExecutionTag) -> Option<Task> {
        let mut lanes = self.lanes.lock();
        let lane = lanes.get_mut(tag)?;
        match lane.queue.pop_front() {
            Some(task) => Some(task),
            None => {
                lane.running = false;
                if !lane.serial {
                    lanes.remove(tag);
                }
                None
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Each message asks a worker to drain the lane of that tag until empty.
fn worker_loop(shared: Arc<Shared>, lanes: Receiver<ExecutionTag>) {
    // Exits once every sender is gone and the queue is empty.
    while let Ok(tag) = lanes.recv() {
        while let Some(task) = shared.next_lane_task(&tag) {
            shared.run_isolated(&tag, task);
        }
    }
}

/// Thread-pool backed [`ExecutionManager`].
///
/// Every submission is queued on the lane of its tag and executed one at a
/// time by whichever worker owns the lane, so work under one tag never
/// overlaps or reorders. Different tags run in parallel. A tag registered
/// with
/// [`set_serial_scheduling_for_tag`](ExecutionManager::set_serial_scheduling_for_tag)
/// keeps its lane between bursts; any other lane is dropped once drained.
///
/// Submission never blocks. With a bounded `queue_capacity`, a submission
/// that would need a slot on a full queue is rejected with
/// [`SubscriptionError::DispatchUnavailable`].
pub struct BasicExecutionManager {
    sender: RwLock<Option<Sender<ExecutionTag>>>,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
}

impl BasicExecutionManager {
    /// Spawn the worker pool.
    pub fn new(config: ExecutionConfig) -> Result<Self> {
        let (sender, receiver) = match config.queue_capacity {
            Some(capacity) => bounded(capacity.max(1)),
            None => unbounded(),
        };

        let shared = Arc::new(Shared {
            lanes: Mutex::new(HashMap::new()),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let worker_count = config.worker_threads.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for n in 0..worker_count {
            let thread_shared = Arc::clone(&shared);
            let thread_jobs = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, n))
                .spawn(move || worker_loop(thread_shared, thread_jobs))?;
            workers.push(handle);
        }
        let worker_ids = workers.iter().map(|h| h.thread().id()).collect();

        debug!(workers = worker_count, "execution manager started");

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            shared,
            workers: Mutex::new(workers),
            worker_ids,
        })
    }

    /// Stop accepting work, let queued work finish and join the workers.
    ///
    /// When called from a delivery task the workers are detached instead of
    /// joined.
    pub fn shutdown(&self) {
        let previous = self.sender.write().take();
        if previous.is_none() {
            return;
        }
        drop(previous);

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        if self.worker_ids.contains(&thread::current().id()) {
            debug!("execution manager shut down from a worker; detaching workers");
            return;
        }
        for handle in handles {
            if handle.join().is_err() {
                warn!("delivery worker terminated abnormally");
            }
        }
        debug!("execution manager shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Tasks that ran to completion.
    pub fn completed_tasks(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// Tasks that panicked.
    pub fn failed_tasks(&self) -> u64 {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// Number of lanes that are registered or still draining.
    pub fn pending_lanes(&self) -> usize {
        self.shared.lanes.lock().len()
    }

    /// Whether `tag` is currently served by a serial lane.
    pub fn is_serial(&self, tag: &ExecutionTag) -> bool {
        self.shared
            .lanes
            .lock()
            .get(tag)
            .map(|lane| lane.serial)
            .unwrap_or(false)
    }

    fn unavailable(tag: &ExecutionTag) -> SubscriptionError {
        warn!(tag = %tag, "rejected submission; execution manager is shut down");
        SubscriptionError::DispatchUnavailable(format!(
            "execution manager is shut down (tag {})",
            tag
        ))
    }

    fn saturated(tag: &ExecutionTag) -> SubscriptionError {
        warn!(tag = %tag, "rejected submission; job queue is full");
        SubscriptionError::DispatchUnavailable(format!("job queue is full (tag {})", tag))
    }
}

impl ExecutionManager for BasicExecutionManager {
    fn submit(&self, tag: &ExecutionTag, task: Task) -> Result<()> {
        let sender = self.sender.read();
        let Some(tx) = sender.as_ref() else {
            return Err(Self::unavailable(tag));
        };

        // Push and request a drain under the lane lock, so submission order
        // is lane order and a failed request withdraws exactly this task.
        // `try_send` never waits on a worker.
        let mut lanes = self.shared.lanes.lock();
        let lane = lanes.entry(tag.clone()).or_default();
        lane.queue.push_back(task);
        if std::mem::replace(&mut lane.running, true) {
            return Ok(());
        }

        let rejected = match tx.try_send(tag.clone()) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(_)) => Self::saturated(tag),
            Err(TrySendError::Disconnected(_)) => Self::unavailable(tag),
        };
        // The lane was idle, so its queue held only this task.
        let withdrawn = lane.queue.pop_back();
        lane.running = false;
        if !lane.serial {
            lanes.remove(tag);
        }
        drop(lanes);
        drop(withdrawn);
        Err(rejected)
    }

    fn set_serial_scheduling_for_tag(&self, tag: &ExecutionTag) {
        let mut lanes = self.shared.lanes.lock();
        let lane = lanes.entry(tag.clone()).or_default();
        if !lane.serial {
            lane.serial = true;
            debug!(tag = %tag, "registered serial lane");
        }
    }

    fn clear_scheduling_for_tag(&self, tag: &ExecutionTag) {
        let mut lanes = self.shared.lanes.lock();
        let idle = match lanes.get_mut(tag) {
            Some(lane) => {
                lane.serial = false;
                !lane.running && lane.queue.is_empty()
            }
            None => return,
        };
        if idle {
            lanes.remove(tag);
        }
        debug!(tag = %tag, idle, "cleared serial lane");
    }
}

impl Drop for BasicExecutionManager {
    fn drop(&mut self) {
        // Closing the queue lets workers exit after draining. They are not
        // joined: the last reference may be dropped inside a delivery task.
        self.sender.write().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn manager(workers: usize) -> BasicExecutionManager {
        BasicExecutionManager::new(ExecutionConfig {
            worker_threads: workers,
            ..Default::default()
        })
        .unwrap()
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_serial_lane_preserves_order() {
        let em = manager(4);
        let tag = ExecutionTag::new("lane");
        em.set_serial_scheduling_for_tag(&tag);

        let (tx, rx) = unbounded();
        for i in 0..200 {
            let tx = tx.clone();
            em.submit(
                &tag,
                Box::new(move || {
                    if i % 17 == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                    tx.send(i).unwrap();
                }),
            )
            .unwrap();
        }

        let received: Vec<i32> = (0..200)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(received, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_task_does_not_stop_lane() {
        let em = manager(2);
        let tag = ExecutionTag::new("fragile");
        em.set_serial_scheduling_for_tag(&tag);

        let (tx, rx) = unbounded();
        em.submit(&tag, Box::new(|| panic!("listener blew up"))).unwrap();
        em.submit(&tag, Box::new(move || tx.send("after").unwrap()))
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "after");
        wait_for(|| em.failed_tasks() == 1 && em.completed_tasks() == 1);
    }

    #[test]
    fn test_clear_keeps_queued_work() {
        let em = manager(2);
        let tag = ExecutionTag::new("closing");
        em.set_serial_scheduling_for_tag(&tag);

        let (gate_tx, gate_rx) = unbounded::<()>();
        let (tx, rx) = unbounded();
        em.submit(
            &tag,
            Box::new(move || {
                gate_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            }),
        )
        .unwrap();
        em.submit(&tag, Box::new(move || tx.send(1).unwrap())).unwrap();

        em.clear_scheduling_for_tag(&tag);
        assert!(!em.is_serial(&tag));
        assert_eq!(em.pending_lanes(), 1);

        gate_tx.send(()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        wait_for(|| em.pending_lanes() == 0);
    }

    #[test]
    fn test_clear_idle_lane_removes_it() {
        let em = manager(1);
        let tag = ExecutionTag::new("idle");
        em.set_serial_scheduling_for_tag(&tag);
        em.set_serial_scheduling_for_tag(&tag);
        assert_eq!(em.pending_lanes(), 1);

        em.clear_scheduling_for_tag(&tag);
        em.clear_scheduling_for_tag(&tag);
        assert_eq!(em.pending_lanes(), 0);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let em = manager(2);
        let (tx, rx) = unbounded();
        em.submit(&ExecutionTag::new("free"), Box::new(move || tx.send(()).unwrap()))
            .unwrap();
        em.shutdown();
        assert!(em.is_shutdown());

        // Work accepted before shutdown still ran.
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let result = em.submit(&ExecutionTag::new("free"), Box::new(|| {}));
        assert!(matches!(
            result,
            Err(SubscriptionError::DispatchUnavailable(_))
        ));
    }

    #[test]
    fn test_unregistered_tag_still_runs_in_order() {
        let em = manager(4);
        let tag = ExecutionTag::new("ad-hoc");

        let (tx, rx) = unbounded();
        for i in 0..50 {
            let tx = tx.clone();
            em.submit(
                &tag,
                Box::new(move || {
                    if i % 5 == 0 {
                        thread::sleep(Duration::from_millis(2));
                    }
                    tx.send(i).unwrap();
                }),
            )
            .unwrap();
        }

        let received: Vec<i32> = (0..50)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(received, (0..50).collect::<Vec<_>>());
        assert!(!em.is_serial(&tag));
        wait_for(|| em.pending_lanes() == 0);
    }

    #[test]
    fn test_reregistered_tag_runs_after_work_left_from_clear() {
        let em = manager(4);
        let tag = ExecutionTag::new("resubscribed");
        let (tx, rx) = unbounded();

        em.set_serial_scheduling_for_tag(&tag);
        em.clear_scheduling_for_tag(&tag);
        assert_eq!(em.pending_lanes(), 0);

        let first = tx.clone();
        em.submit(
            &tag,
            Box::new(move || {
                thread::sleep(Duration::from_millis(200));
                first.send("A").unwrap();
            }),
        )
        .unwrap();
        em.set_serial_scheduling_for_tag(&tag);
        em.submit(&tag, Box::new(move || tx.send("B").unwrap()))
            .unwrap();

        let received: Vec<&str> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(received, vec!["A", "B"]);
        assert!(em.is_serial(&tag));
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let em = BasicExecutionManager::new(ExecutionConfig {
            worker_threads: 1,
            queue_capacity: Some(1),
            ..Default::default()
        })
        .unwrap();
        let (started_tx, started_rx) = unbounded();
        let (gate_tx, gate_rx) = unbounded::<()>();
        let (tx, rx) = unbounded();

        // Occupy the only worker.
        em.submit(
            &ExecutionTag::new("busy"),
            Box::new(move || {
                started_tx.send(()).unwrap();
                gate_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            }),
        )
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let a = ExecutionTag::new("a");
        let first = tx.clone();
        em.submit(&a, Box::new(move || first.send(1).unwrap()))
            .unwrap();

        // The queue slot is taken by lane "a".
        let result = em.submit(&ExecutionTag::new("b"), Box::new(|| {}));
        assert!(matches!(
            result,
            Err(SubscriptionError::DispatchUnavailable(_))
        ));

        // Joining a lane that already waits for a worker needs no slot.
        em.submit(&a, Box::new(move || tx.send(2).unwrap())).unwrap();

        gate_tx.send(()).unwrap();
        let received: Vec<i32> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(received, vec![1, 2]);
        wait_for(|| em.pending_lanes() == 0);
    }

    #[test]
    fn test_distinct_tags_run_concurrently() {
        let em = manager(2);
        let (gate_tx, gate_rx) = unbounded::<()>();
        let (tx, rx) = unbounded();

        em.submit(
            &ExecutionTag::new("slow"),
            Box::new(move || {
                gate_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            }),
        )
        .unwrap();
        em.submit(&ExecutionTag::new("fast"), Box::new(move || tx.send(()).unwrap()))
            .unwrap();

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        gate_tx.send(()).unwrap();
    }
}
