//! # One-Time Job Queue
//!
//! In-process queue of jobs fired exactly once at an absolute future
//! timestamp. Entries sit in a min-heap keyed by fire time; a single
//! driver task sleeps until the earliest deadline and spawns due tasks.
//! Cancellation flips a per-entry token and is applied lazily when the
//! entry is popped, so cancelling never restructures the heap.
//!
//! A fired task's error is logged and swallowed - a failing one-time job
//! must never take the scheduler down with it.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Work fired by a one-time job. Runs exactly once.
pub type OneTimeTask = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Observable view of one scheduled entry.
#[derive(Debug, Clone, Serialize)]
pub struct OneTimeJobInfo {
    pub job_id: String,
    pub execute_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

struct TimerEntry {
    seq: u64,
    job_id: String,
    execute_at: DateTime<Utc>,
    cancelled: Arc<AtomicBool>,
    task: OneTimeTask,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.execute_at
            .cmp(&other.execute_at)
            .then(self.seq.cmp(&other.seq))
    }
}

struct IndexEntry {
    seq: u64,
    execute_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    /// Latest registration per job id; re-scheduling under the same id is
    /// not deduplicated, the index simply tracks the newest entry.
    index: HashMap<String, IndexEntry>,
    next_seq: u64,
}

/// Min-heap backed queue of one-time jobs with its own driver task.
pub struct OneTimeJobQueue {
    state: Mutex<QueueState>,
    wakeup: Arc<Notify>,
    shutting_down: AtomicBool,
}

impl OneTimeJobQueue {
    /// Create the queue and spawn its driver task. The driver holds only a
    /// weak handle, so dropping every `Arc` also retires the driver.
    pub fn new() -> Arc<Self> {
        let queue = Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            wakeup: Arc::new(Notify::new()),
            shutting_down: AtomicBool::new(false),
        });
        Self::spawn_driver(&queue);
        queue
    }

    /// Arm `task` to fire once at `execute_at`.
    ///
    /// A non-future `execute_at` is rejected: the rejection is logged, no
    /// timer is armed, and `false` is returned.
    pub fn schedule(&self, job_id: &str, execute_at: DateTime<Utc>, task: OneTimeTask) -> bool {
        if self.shutting_down.load(AtomicOrdering::Acquire) {
            warn!(job_id = %job_id, "Rejecting one-time job: queue is shut down");
            return false;
        }
        let now = Utc::now();
        if execute_at <= now {
            warn!(
                job_id = %job_id,
                execute_at = %execute_at,
                "Rejecting one-time job scheduled in the past"
            );
            return false;
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut state = self.state.lock();
            state.next_seq += 1;
            let seq = state.next_seq;
            state.heap.push(Reverse(TimerEntry {
                seq,
                job_id: job_id.to_string(),
                execute_at,
                cancelled: Arc::clone(&cancelled),
                task,
            }));
            state.index.insert(
                job_id.to_string(),
                IndexEntry {
                    seq,
                    execute_at,
                    created_at: now,
                    cancelled,
                },
            );
        }
        self.wakeup.notify_one();

        info!(
            job_id = %job_id,
            execute_at = %execute_at,
            delay_seconds = (execute_at - now).num_seconds(),
            "⏲️ Scheduled one-time job"
        );
        true
    }

    /// Cancel a pending entry. The heap slot is discarded lazily when its
    /// deadline comes up.
    pub fn cancel(&self, job_id: &str) -> bool {
        let removed = self.state.lock().index.remove(job_id);
        match removed {
            Some(entry) => {
                entry.cancelled.store(true, AtomicOrdering::Release);
                self.wakeup.notify_one();
                info!(job_id = %job_id, "Cancelled one-time job");
                true
            }
            None => false,
        }
    }

    /// Pending entries ordered by fire time.
    pub fn jobs(&self) -> Vec<OneTimeJobInfo> {
        let state = self.state.lock();
        let mut jobs: Vec<OneTimeJobInfo> = state
            .index
            .iter()
            .map(|(job_id, entry)| OneTimeJobInfo {
                job_id: job_id.clone(),
                execute_at: entry.execute_at,
                created_at: entry.created_at,
            })
            .collect();
        jobs.sort_by_key(|job| job.execute_at);
        jobs
    }

    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().index.is_empty()
    }

    /// Cancel everything and retire the driver task.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, AtomicOrdering::Release);
        let cancelled = {
            let mut state = self.state.lock();
            state.heap.clear();
            let count = state.index.len();
            for (_, entry) in state.index.drain() {
                entry.cancelled.store(true, AtomicOrdering::Release);
            }
            count
        };
        self.wakeup.notify_one();
        info!(cancelled, "One-time job queue shut down");
    }

    fn spawn_driver(queue: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(queue);
        let wakeup = Arc::clone(&queue.wakeup);
        tokio::spawn(async move {
            loop {
                // Take a strong handle only long enough to inspect state;
                // holding it across the await would keep the queue alive
                // after every external handle is gone.
                let next_deadline = match weak.upgrade() {
                    Some(queue) => {
                        if queue.shutting_down.load(AtomicOrdering::Acquire) {
                            break;
                        }
                        queue.fire_due();
                        queue.next_deadline()
                    }
                    None => break,
                };

                match next_deadline {
                    None => wakeup.notified().await,
                    Some(deadline) => {
                        let wait = (deadline - Utc::now())
                            .to_std()
                            .unwrap_or(Duration::ZERO);
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = wakeup.notified() => {}
                        }
                    }
                }
            }
            debug!("One-time job queue driver exited");
        });
    }

    fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .heap
            .peek()
            .map(|Reverse(entry)| entry.execute_at)
    }

    /// Pop every due entry and spawn the ones not cancelled.
    fn fire_due(&self) {
        let now = Utc::now();
        let due = {
            let mut state = self.state.lock();
            let mut due = Vec::new();
            while let Some(Reverse(head)) = state.heap.peek() {
                if head.execute_at > now {
                    break;
                }
                let Some(Reverse(entry)) = state.heap.pop() else {
                    break;
                };
                // Drop the index entry only if this heap entry is still
                // the one it points at (same-id re-scheduling).
                if state
                    .index
                    .get(&entry.job_id)
                    .is_some_and(|indexed| indexed.seq == entry.seq)
                {
                    state.index.remove(&entry.job_id);
                }
                due.push(entry);
            }
            due
        };

        for entry in due {
            if entry.cancelled.load(AtomicOrdering::Acquire) {
                debug!(job_id = %entry.job_id, "Skipping cancelled one-time job");
                continue;
            }
            let job_id = entry.job_id;
            info!(job_id = %job_id, "⏰ Firing one-time job");
            let task = entry.task;
            tokio::spawn(async move {
                if let Err(err) = task().await {
                    error!(job_id = %job_id, error = %err, "One-time job execution failed");
                }
            });
        }
    }
}
