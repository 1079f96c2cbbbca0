//! # Scheduling Manager
//!
//! Orchestration layer above the batch processor: registers the domain
//! batch-job handlers and their recurring schedules, arms one-time jobs at
//! absolute timestamps, computes dynamic schedules from live business
//! entities, and offers the single dispatch point for running a registered
//! batch job on demand.
//!
//! Dynamic scheduling is best-effort by design: a failing coupon lookup
//! must not block event schedules, and neither may abort initialization.

use crate::batch::{BatchProcessor, JobInstance, JobStatusReport};
use crate::config::SchedulerConfig;
use crate::error::{CoreError, Result};
use crate::registry::{BatchJobHandler, BatchRunOverrides, JobHandlerRegistry, JobType};
use crate::services::{
    ActiveCoupon, CouponsService, EventNotification, EventStatus, EventsService, Notification,
    NotificationService, UpcomingEvent,
};
use chrono::DateTime;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::recurring::{RecurringScheduler, RecurringTask, ScheduledTaskInfo};
use super::timer::{OneTimeJobInfo, OneTimeJobQueue, OneTimeTask};

/// Domain collaborators consumed by dynamic scheduling.
#[derive(Clone)]
pub struct SchedulerServices {
    pub events: Arc<dyn EventsService>,
    pub coupons: Arc<dyn CouponsService>,
    pub notifications: Arc<dyn NotificationService>,
}

/// Which layer satisfied a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A live batch job run was cancelled
    BatchJob,
    /// A pending one-time job was disarmed
    OneTimeJob,
    /// A recurring task was stopped
    RecurringTask,
}

/// Registers, dispatches, and cancels all scheduled work.
pub struct SchedulingManager {
    /// Instance id used in structured log fields
    id: Uuid,
    config: SchedulerConfig,
    batch: Arc<BatchProcessor>,
    recurring: Arc<RecurringScheduler>,
    one_time: Arc<OneTimeJobQueue>,
    registry: Arc<JobHandlerRegistry>,
    services: SchedulerServices,
    /// Handlers staged at construction, consumed by `initialize`
    pending_handlers: Mutex<Vec<Arc<dyn BatchJobHandler>>>,
    initialized: AtomicBool,
}

impl SchedulingManager {
    pub fn new(
        batch: Arc<BatchProcessor>,
        recurring: Arc<RecurringScheduler>,
        services: SchedulerServices,
        handlers: Vec<Arc<dyn BatchJobHandler>>,
        config: SchedulerConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        info!(manager_id = %id, staged_handlers = handlers.len(), "Creating SchedulingManager");
        Self {
            id,
            config,
            batch,
            recurring,
            one_time: OneTimeJobQueue::new(),
            registry: Arc::new(JobHandlerRegistry::new()),
            services,
            pending_handlers: Mutex::new(handlers),
            initialized: AtomicBool::new(false),
        }
    }

    /// Register the staged batch-job handlers and their recurring
    /// schedules, then compute dynamic one-time schedules.
    ///
    /// Idempotent: a second call is a no-op. Registration failures
    /// propagate; dynamic-schedule failures are logged and swallowed.
    pub async fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            info!(manager_id = %self.id, "SchedulingManager already initialized, skipping");
            return Ok(());
        }
        info!(manager_id = %self.id, "Initializing SchedulingManager");

        let handlers: Vec<Arc<dyn BatchJobHandler>> =
            self.pending_handlers.lock().drain(..).collect();
        for handler in handlers {
            let job_type = handler.job_type();
            self.registry.register(handler);
            if let Err(err) = self.register_recurring_batch_job(job_type) {
                self.initialized.store(false, Ordering::SeqCst);
                return Err(err);
            }
        }

        self.schedule_dynamic_jobs().await;

        info!(
            manager_id = %self.id,
            handlers = self.registry.len(),
            one_time_jobs = self.one_time.len(),
            "✅ SchedulingManager initialized"
        );
        Ok(())
    }

    /// Arm `task` to fire exactly once at `execute_at`.
    ///
    /// Returns `false` (after logging) when `execute_at` is not strictly
    /// in the future. Re-scheduling under the same `job_id` is not
    /// deduplicated; callers pick idempotent ids.
    pub fn schedule_one_time_job(
        &self,
        job_id: &str,
        execute_at: DateTime<Utc>,
        task: OneTimeTask,
    ) -> bool {
        self.one_time.schedule(job_id, execute_at, task)
    }

    /// Run a registered batch job right now, outside any schedule.
    pub async fn execute_immediate_batch_job(
        &self,
        job_type: JobType,
        overrides: BatchRunOverrides,
    ) -> Result<JobInstance> {
        let handler = self
            .registry
            .resolve(job_type)
            .ok_or_else(|| CoreError::UnsupportedJobType(job_type.to_string()))?;
        info!(manager_id = %self.id, job_type = %job_type, "Dispatching immediate batch job");
        handler.run(Arc::clone(&self.batch), overrides).await
    }

    /// Live instance first, then the persisted snapshot.
    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatusReport> {
        self.batch.get_job_status(job_id).await
    }

    /// Snapshot list of live batch job runs.
    pub fn get_running_jobs(&self) -> Vec<JobInstance> {
        self.batch.get_running_jobs()
    }

    /// Recurring task registry with run statistics.
    pub fn get_scheduled_tasks(&self) -> Vec<ScheduledTaskInfo> {
        self.recurring.get_scheduled_tasks()
    }

    /// Pending one-time jobs ordered by fire time.
    pub fn get_one_time_jobs(&self) -> Vec<OneTimeJobInfo> {
        self.one_time.jobs()
    }

    /// Cancel `job_id` wherever it lives: live batch run, then pending
    /// one-time job, then recurring task. The first layer that recognizes
    /// the id wins.
    pub async fn cancel_job(&self, job_id: &str) -> Result<CancelOutcome> {
        if self.batch.cancel_job(job_id).await {
            return Ok(CancelOutcome::BatchJob);
        }
        if self.one_time.cancel(job_id) {
            return Ok(CancelOutcome::OneTimeJob);
        }
        if self.recurring.stop_task(job_id) {
            return Ok(CancelOutcome::RecurringTask);
        }
        Err(CoreError::JobNotFound(job_id.to_string()))
    }

    /// Stop all recurring tasks and disarm every one-time job. Safe to
    /// call even if `initialize` never completed.
    pub fn shutdown(&self) {
        info!(manager_id = %self.id, "Shutting down SchedulingManager");
        self.recurring.shutdown();
        self.one_time.shutdown();
    }

    /// Arm the recurring schedule that keeps one batch-job type running
    /// at the configured cadence.
    fn register_recurring_batch_job(&self, job_type: JobType) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let batch = Arc::clone(&self.batch);
        let task: RecurringTask = Arc::new(move || {
            let registry = Arc::clone(&registry);
            let batch = Arc::clone(&batch);
            async move {
                let handler = registry.resolve(job_type).ok_or_else(|| {
                    anyhow::anyhow!("no handler registered for job type '{job_type}'")
                })?;
                let instance = handler.run(batch, BatchRunOverrides::default()).await?;
                debug!(
                    job_type = %job_type,
                    job_id = %instance.job_id,
                    status = %instance.status,
                    "Recurring batch job finished"
                );
                Ok(())
            }
            .boxed()
        });
        self.recurring.register_task(
            &format!("batch:{job_type}"),
            self.config.recurring_interval,
            task,
        )
    }

    /// Compute one-time schedules from live business entities. Each
    /// category degrades independently.
    async fn schedule_dynamic_jobs(&self) {
        match self.services.events.upcoming_events().await {
            Ok(events) => {
                let count = events.len();
                for event in events {
                    self.schedule_event_jobs(event);
                }
                info!(manager_id = %self.id, events = count, "Armed dynamic schedules for upcoming events");
            }
            Err(err) => {
                warn!(manager_id = %self.id, error = %err, "Skipping event schedules: upcoming events lookup failed");
            }
        }

        match self.services.coupons.active_coupons().await {
            Ok(coupons) => {
                let count = coupons.len();
                for coupon in coupons {
                    self.schedule_coupon_expiry_reminder(coupon);
                }
                info!(manager_id = %self.id, coupons = count, "Armed expiry reminders for active coupons");
            }
            Err(err) => {
                warn!(manager_id = %self.id, error = %err, "Skipping coupon expiry reminders: active coupons lookup failed");
            }
        }
    }

    /// One start-notification ahead of the event, one status transition
    /// exactly at its end.
    fn schedule_event_jobs(&self, event: UpcomingEvent) {
        let notifications = Arc::clone(&self.services.notifications);
        let payload = EventNotification {
            event_id: event.id.clone(),
            title: event.title.clone(),
            starts_at: event.start_time,
            audience: event.target_audience.clone(),
        };
        self.one_time.schedule(
            &format!("event-start:{}", event.id),
            event.start_time - chrono_duration(self.config.event_start_lead),
            Box::new(move || {
                async move { notifications.send_event_notification(payload).await }.boxed()
            }),
        );

        let events_service = Arc::clone(&self.services.events);
        let event_id = event.id.clone();
        self.one_time.schedule(
            &format!("event-end:{}", event.id),
            event.end_time,
            Box::new(move || {
                async move {
                    events_service
                        .update_event_status(&event_id, EventStatus::Ended)
                        .await
                }
                .boxed()
            }),
        );
    }

    /// Expiry reminder fanned out to every holder; one failed delivery
    /// does not stop the rest.
    fn schedule_coupon_expiry_reminder(&self, coupon: ActiveCoupon) {
        let coupons = Arc::clone(&self.services.coupons);
        let notifications = Arc::clone(&self.services.notifications);
        let ActiveCoupon {
            id,
            code,
            expires_at,
        } = coupon;
        let remind_at = expires_at - chrono_duration(self.config.coupon_expiry_lead);

        self.one_time.schedule(
            &format!("coupon-expiry:{id}"),
            remind_at,
            Box::new(move || {
                async move {
                    let holders = coupons.coupon_holders(&id).await?;
                    let total = holders.len();
                    let mut failures = 0usize;
                    for holder in holders {
                        let notification = Notification {
                            user_id: holder.user_id.clone(),
                            title: format!("Coupon {code} is about to expire"),
                            body: format!(
                                "Coupon {code} expires at {}. Use it before it is gone.",
                                expires_at.to_rfc3339()
                            ),
                        };
                        if let Err(err) = notifications.send_notification(notification).await {
                            failures += 1;
                            warn!(
                                coupon_id = %id,
                                user_id = %holder.user_id,
                                error = %err,
                                "Failed to deliver coupon expiry reminder"
                            );
                        }
                    }
                    info!(
                        coupon_id = %id,
                        delivered = total - failures,
                        failures,
                        "Coupon expiry reminder fan-out finished"
                    );
                    Ok(())
                }
                .boxed()
            }),
        );
    }
}

/// Leads beyond chrono's representable range degrade to firing immediately.
fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}
