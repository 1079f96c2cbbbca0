//! # Recurring Task Scheduler
//!
//! Interval-based recurring work. Each registered task gets its own driver
//! loop that ticks at the configured cadence, runs the task, and records
//! run statistics. Task failures are logged and swallowed - a recurring
//! task that fails one tick simply runs again at the next one.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Work run on every tick of a recurring schedule.
pub type RecurringTask = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Observable view of one recurring task.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTaskInfo {
    pub name: String,
    pub interval: Duration,
    pub run_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub running: bool,
}

struct TaskSlot {
    interval: Duration,
    running: Arc<AtomicBool>,
    run_count: Arc<AtomicU64>,
    last_run: Arc<Mutex<Option<DateTime<Utc>>>>,
    stop: Arc<Notify>,
}

/// Owns the recurring task registry and their driver loops.
#[derive(Default)]
pub struct RecurringScheduler {
    tasks: Mutex<HashMap<String, TaskSlot>>,
}

impl RecurringScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` to run every `interval`, starting one interval from
    /// now. Registration under a name already in use is an error.
    pub fn register_task(&self, name: &str, interval: Duration, task: RecurringTask) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(name) {
            return Err(CoreError::Scheduling(format!(
                "recurring task '{name}' is already registered"
            )));
        }

        let running = Arc::new(AtomicBool::new(true));
        let run_count = Arc::new(AtomicU64::new(0));
        let last_run = Arc::new(Mutex::new(None));
        let stop = Arc::new(Notify::new());

        {
            let name = name.to_string();
            let running = Arc::clone(&running);
            let run_count = Arc::clone(&run_count);
            let last_run = Arc::clone(&last_run);
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick of a tokio interval is immediate; consume
                // it so the task first runs one interval from now.
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if !running.load(Ordering::Acquire) {
                                break;
                            }
                            *last_run.lock() = Some(Utc::now());
                            run_count.fetch_add(1, Ordering::Release);
                            debug!(task = %name, "Running recurring task");
                            if let Err(err) = task().await {
                                error!(task = %name, error = %err, "Recurring task failed");
                            }
                        }
                        _ = stop.notified() => break,
                    }
                }
                debug!(task = %name, "Recurring task driver exited");
            });
        }

        tasks.insert(
            name.to_string(),
            TaskSlot {
                interval,
                running,
                run_count,
                last_run,
                stop,
            },
        );
        info!(
            task = %name,
            interval_seconds = interval.as_secs(),
            "📅 Registered recurring task"
        );
        Ok(())
    }

    /// Current registry contents with run statistics.
    pub fn get_scheduled_tasks(&self) -> Vec<ScheduledTaskInfo> {
        let tasks = self.tasks.lock();
        let mut infos: Vec<ScheduledTaskInfo> = tasks
            .iter()
            .map(|(name, slot)| ScheduledTaskInfo {
                name: name.clone(),
                interval: slot.interval,
                run_count: slot.run_count.load(Ordering::Acquire),
                last_run: *slot.last_run.lock(),
                running: slot.running.load(Ordering::Acquire),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Stop one task and drop it from the registry.
    pub fn stop_task(&self, name: &str) -> bool {
        let removed = self.tasks.lock().remove(name);
        match removed {
            Some(slot) => {
                slot.running.store(false, Ordering::Release);
                slot.stop.notify_one();
                info!(task = %name, "Stopped recurring task");
                true
            }
            None => false,
        }
    }

    /// Stop every task. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let slots: Vec<(String, TaskSlot)> = self.tasks.lock().drain().collect();
        let count = slots.len();
        for (_, slot) in slots {
            slot.running.store(false, Ordering::Release);
            slot.stop.notify_one();
        }
        if count > 0 {
            info!(stopped = count, "Recurring scheduler shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(counter: &Arc<AtomicUsize>) -> RecurringTask {
        let counter = Arc::clone(counter);
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_task_runs_on_each_tick() {
        let scheduler = RecurringScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        scheduler
            .register_task("tick", Duration::from_millis(25), counting_task(&runs))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(140)).await;
        let count = runs.load(Ordering::SeqCst);
        assert!(count >= 3, "expected at least 3 runs, saw {count}");

        let tasks = scheduler.get_scheduled_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "tick");
        assert!(tasks[0].run_count >= 3);
        assert!(tasks[0].last_run.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let scheduler = RecurringScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        scheduler
            .register_task("dup", Duration::from_secs(60), counting_task(&runs))
            .unwrap();
        let err = scheduler
            .register_task("dup", Duration::from_secs(60), counting_task(&runs))
            .unwrap_err();
        assert!(matches!(err, CoreError::Scheduling(_)));
    }

    #[tokio::test]
    async fn test_stopped_task_no_longer_runs() {
        let scheduler = RecurringScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        scheduler
            .register_task("stoppable", Duration::from_millis(20), counting_task(&runs))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.stop_task("stoppable"));
        assert!(!scheduler.stop_task("stoppable"));

        let after_stop = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_failing_task_keeps_ticking() {
        let scheduler = RecurringScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        scheduler
            .register_task(
                "flaky",
                Duration::from_millis(20),
                Arc::new(move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        anyhow::bail!("transient failure")
                    }
                    .boxed()
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(110)).await;
        assert!(runs.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let scheduler = RecurringScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task("t", Duration::from_secs(60), counting_task(&runs))
            .unwrap();

        scheduler.shutdown();
        scheduler.shutdown();
        assert!(scheduler.get_scheduled_tasks().is_empty());
    }
}
