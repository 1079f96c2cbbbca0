//! Scheduling manager scenarios: initialization, dynamic schedules,
//! immediate dispatch, cancellation cascade, and shutdown.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use futures::FutureExt;
use mercato_core::store::InMemoryProgressStore;
use mercato_core::{
    ActiveCoupon, BatchJobConfig, BatchJobHandler, BatchProcessor, BatchRunOverrides, CancelOutcome,
    CoreError, CouponHolder, CouponsService, DataSource, EventNotification, EventStatus,
    EventsService, ItemProcessor, JobInstance, JobStatus, JobType, Notification,
    NotificationService, RecurringScheduler, SchedulerConfig, SchedulerServices, SchedulingManager,
    UpcomingEvent,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct StubEvents {
    events: Vec<UpcomingEvent>,
    fail_lookup: bool,
    status_updates: Mutex<Vec<(String, EventStatus)>>,
}

impl StubEvents {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            events: Vec::new(),
            fail_lookup: false,
            status_updates: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl EventsService for StubEvents {
    async fn upcoming_events(&self) -> anyhow::Result<Vec<UpcomingEvent>> {
        if self.fail_lookup {
            anyhow::bail!("events service unavailable");
        }
        Ok(self.events.clone())
    }

    async fn update_event_status(
        &self,
        event_id: &str,
        status: EventStatus,
    ) -> anyhow::Result<()> {
        self.status_updates.lock().push((event_id.to_string(), status));
        Ok(())
    }
}

struct StubCoupons {
    coupons: Vec<ActiveCoupon>,
    holders: Vec<CouponHolder>,
    fail_lookup: bool,
}

impl StubCoupons {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            coupons: Vec::new(),
            holders: Vec::new(),
            fail_lookup: false,
        })
    }
}

#[async_trait]
impl CouponsService for StubCoupons {
    async fn active_coupons(&self) -> anyhow::Result<Vec<ActiveCoupon>> {
        if self.fail_lookup {
            anyhow::bail!("coupons service unavailable");
        }
        Ok(self.coupons.clone())
    }

    async fn coupon_holders(&self, _coupon_id: &str) -> anyhow::Result<Vec<CouponHolder>> {
        Ok(self.holders.clone())
    }
}

#[derive(Default)]
struct StubNotifications {
    event_notifications: Mutex<Vec<EventNotification>>,
    notifications: Mutex<Vec<Notification>>,
    fail_for_user: Option<String>,
}

#[async_trait]
impl NotificationService for StubNotifications {
    async fn send_event_notification(
        &self,
        notification: EventNotification,
    ) -> anyhow::Result<()> {
        self.event_notifications.lock().push(notification);
        Ok(())
    }

    async fn send_notification(&self, notification: Notification) -> anyhow::Result<()> {
        if self.fail_for_user.as_deref() == Some(notification.user_id.as_str()) {
            anyhow::bail!("push token expired");
        }
        self.notifications.lock().push(notification);
        Ok(())
    }
}

struct AlwaysSucceeds;

#[async_trait]
impl ItemProcessor<u64> for AlwaysSucceeds {
    async fn process(&self, _item: &u64) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handler running a small in-memory batch job, counting its dispatches.
struct CountingHandler {
    job_type: JobType,
    runs: Arc<AtomicUsize>,
}

impl CountingHandler {
    fn new(job_type: JobType) -> (Arc<Self>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                job_type,
                runs: Arc::clone(&runs),
            }),
            runs,
        )
    }
}

#[async_trait]
impl BatchJobHandler for CountingHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn run(
        &self,
        processor: Arc<BatchProcessor>,
        overrides: BatchRunOverrides,
    ) -> mercato_core::Result<JobInstance> {
        let run_index = self.runs.fetch_add(1, Ordering::SeqCst);
        let config = BatchJobConfig::new(
            format!("{}-{run_index}", self.job_type),
            self.job_type.to_string(),
            DataSource::in_memory((0..3u64).collect()),
            Arc::new(AlwaysSucceeds),
        )
        .with_batch_size(overrides.batch_size.unwrap_or(3));
        processor.execute_batch_job(config).await
    }
}

struct ManagerHarness {
    manager: SchedulingManager,
    notifications: Arc<StubNotifications>,
    events: Arc<StubEvents>,
    points_runs: Arc<AtomicUsize>,
}

fn build_manager(
    events: Arc<StubEvents>,
    coupons: Arc<StubCoupons>,
    notifications: Arc<StubNotifications>,
    config: SchedulerConfig,
) -> ManagerHarness {
    let batch = Arc::new(BatchProcessor::new(Arc::new(InMemoryProgressStore::new())));
    let (handler, points_runs) = CountingHandler::new(JobType::PointsExpiry);
    let services = SchedulerServices {
        events: Arc::clone(&events) as Arc<dyn EventsService>,
        coupons: coupons as Arc<dyn CouponsService>,
        notifications: Arc::clone(&notifications) as Arc<dyn NotificationService>,
    };
    let manager = SchedulingManager::new(
        batch,
        Arc::new(RecurringScheduler::new()),
        services,
        vec![handler],
        config,
    );
    ManagerHarness {
        manager,
        notifications,
        events,
        points_runs,
    }
}

fn default_harness() -> ManagerHarness {
    build_manager(
        StubEvents::empty(),
        StubCoupons::empty(),
        Arc::new(StubNotifications::default()),
        SchedulerConfig::default(),
    )
}

#[tokio::test]
async fn test_initialize_registers_handlers_and_dynamic_schedules() {
    let now = Utc::now();
    let events = Arc::new(StubEvents {
        events: vec![UpcomingEvent {
            id: "ev1".to_string(),
            title: "Summer sale kickoff".to_string(),
            start_time: now + ChronoDuration::hours(2),
            end_time: now + ChronoDuration::hours(3),
            target_audience: vec!["members".to_string()],
        }],
        fail_lookup: false,
        status_updates: Mutex::new(Vec::new()),
    });
    let coupons = Arc::new(StubCoupons {
        coupons: vec![ActiveCoupon {
            id: "c1".to_string(),
            code: "SUMMER20".to_string(),
            expires_at: now + ChronoDuration::days(2),
        }],
        holders: Vec::new(),
        fail_lookup: false,
    });
    let harness = build_manager(
        events,
        coupons,
        Arc::new(StubNotifications::default()),
        SchedulerConfig::default(),
    );

    harness.manager.initialize().await.unwrap();

    let one_time = harness.manager.get_one_time_jobs();
    let ids: Vec<&str> = one_time.iter().map(|job| job.job_id.as_str()).collect();
    assert!(ids.contains(&"event-start:ev1"));
    assert!(ids.contains(&"event-end:ev1"));
    assert!(ids.contains(&"coupon-expiry:c1"));

    let recurring = harness.manager.get_scheduled_tasks();
    assert_eq!(recurring.len(), 1);
    assert_eq!(recurring[0].name, "batch:points_expiry");

    harness.manager.shutdown();
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let harness = default_harness();

    harness.manager.initialize().await.unwrap();
    harness.manager.initialize().await.unwrap();

    assert_eq!(harness.manager.get_scheduled_tasks().len(), 1);
    harness.manager.shutdown();
}

#[tokio::test]
async fn test_failing_event_lookup_does_not_block_coupons() {
    let now = Utc::now();
    let events = Arc::new(StubEvents {
        events: Vec::new(),
        fail_lookup: true,
        status_updates: Mutex::new(Vec::new()),
    });
    let coupons = Arc::new(StubCoupons {
        coupons: vec![ActiveCoupon {
            id: "c9".to_string(),
            code: "LASTCALL".to_string(),
            expires_at: now + ChronoDuration::days(2),
        }],
        holders: Vec::new(),
        fail_lookup: false,
    });
    let harness = build_manager(
        events,
        coupons,
        Arc::new(StubNotifications::default()),
        SchedulerConfig::default(),
    );

    harness.manager.initialize().await.unwrap();

    let ids: Vec<String> = harness
        .manager
        .get_one_time_jobs()
        .into_iter()
        .map(|job| job.job_id)
        .collect();
    assert_eq!(ids, vec!["coupon-expiry:c9".to_string()]);
    harness.manager.shutdown();
}

#[tokio::test]
async fn test_immediate_dispatch_known_and_unknown_types() {
    let harness = default_harness();
    harness.manager.initialize().await.unwrap();

    let instance = harness
        .manager
        .execute_immediate_batch_job(JobType::PointsExpiry, BatchRunOverrides::default())
        .await
        .unwrap();
    assert_eq!(instance.status, JobStatus::Completed);
    assert_eq!(harness.points_runs.load(Ordering::SeqCst), 1);

    let err = harness
        .manager
        .execute_immediate_batch_job(JobType::DailyDigest, BatchRunOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnsupportedJobType(_)));

    harness.manager.shutdown();
}

#[tokio::test]
async fn test_one_time_job_fires_once_and_unregisters() {
    let harness = default_harness();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&fired);
    let armed = harness.manager.schedule_one_time_job(
        "t1",
        Utc::now() + ChronoDuration::milliseconds(40),
        Box::new(move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }),
    );
    assert!(armed);
    assert_eq!(harness.manager.get_one_time_jobs().len(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(harness.manager.get_one_time_jobs().is_empty());

    harness.manager.shutdown();
}

#[tokio::test]
async fn test_past_one_time_job_is_rejected() {
    let harness = default_harness();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&fired);
    let armed = harness.manager.schedule_one_time_job(
        "t-past",
        Utc::now() - ChronoDuration::seconds(5),
        Box::new(move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }),
    );

    assert!(!armed);
    assert!(harness.manager.get_one_time_jobs().is_empty());
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    harness.manager.shutdown();
}

#[tokio::test]
async fn test_cancel_cascade_across_layers() {
    let harness = default_harness();
    harness.manager.initialize().await.unwrap();

    harness.manager.schedule_one_time_job(
        "one-shot",
        Utc::now() + ChronoDuration::minutes(10),
        Box::new(|| async { Ok(()) }.boxed()),
    );

    assert_eq!(
        harness.manager.cancel_job("one-shot").await.unwrap(),
        CancelOutcome::OneTimeJob
    );
    assert_eq!(
        harness.manager.cancel_job("batch:points_expiry").await.unwrap(),
        CancelOutcome::RecurringTask
    );
    let err = harness.manager.cancel_job("nowhere").await.unwrap_err();
    assert!(matches!(err, CoreError::JobNotFound(_)));

    harness.manager.shutdown();
}

#[tokio::test]
async fn test_shutdown_without_initialize_is_safe() {
    let harness = default_harness();
    harness.manager.shutdown();
    harness.manager.shutdown();
    assert!(harness.manager.get_one_time_jobs().is_empty());
    assert!(harness.manager.get_scheduled_tasks().is_empty());
}

#[tokio::test]
async fn test_shutdown_clears_all_schedules() {
    let harness = default_harness();
    harness.manager.initialize().await.unwrap();
    harness.manager.schedule_one_time_job(
        "pending",
        Utc::now() + ChronoDuration::minutes(5),
        Box::new(|| async { Ok(()) }.boxed()),
    );

    harness.manager.shutdown();

    assert!(harness.manager.get_one_time_jobs().is_empty());
    assert!(harness.manager.get_scheduled_tasks().is_empty());
}

#[tokio::test]
async fn test_event_schedules_fire_notification_and_status_transition() {
    let now = Utc::now();
    let events = Arc::new(StubEvents {
        events: vec![UpcomingEvent {
            id: "ev7".to_string(),
            title: "Flash sale".to_string(),
            start_time: now + ChronoDuration::milliseconds(100),
            end_time: now + ChronoDuration::milliseconds(160),
            target_audience: vec!["everyone".to_string()],
        }],
        fail_lookup: false,
        status_updates: Mutex::new(Vec::new()),
    });
    let config = SchedulerConfig {
        // Fire the start notification 50ms ahead of the event.
        event_start_lead: Duration::from_millis(50),
        ..SchedulerConfig::default()
    };
    let harness = build_manager(
        events,
        StubCoupons::empty(),
        Arc::new(StubNotifications::default()),
        config,
    );

    harness.manager.initialize().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let sent = harness.notifications.event_notifications.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event_id, "ev7");

    let updates = harness.events.status_updates.lock();
    assert_eq!(updates.as_slice(), &[("ev7".to_string(), EventStatus::Ended)]);

    harness.manager.shutdown();
}

#[tokio::test]
async fn test_coupon_reminder_fan_out_tolerates_holder_failure() {
    let now = Utc::now();
    let coupons = Arc::new(StubCoupons {
        coupons: vec![ActiveCoupon {
            id: "c3".to_string(),
            code: "VIP10".to_string(),
            expires_at: now + ChronoDuration::milliseconds(150),
        }],
        holders: vec![
            CouponHolder { user_id: "u1".to_string() },
            CouponHolder { user_id: "u2".to_string() },
            CouponHolder { user_id: "u3".to_string() },
        ],
        fail_lookup: false,
    });
    let notifications = Arc::new(StubNotifications {
        fail_for_user: Some("u2".to_string()),
        ..StubNotifications::default()
    });
    let config = SchedulerConfig {
        // Remind 50ms ahead of expiry.
        coupon_expiry_lead: Duration::from_millis(50),
        ..SchedulerConfig::default()
    };
    let harness = build_manager(StubEvents::empty(), coupons, notifications, config);

    harness.manager.initialize().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let delivered = harness.notifications.notifications.lock();
    let recipients: Vec<&str> = delivered.iter().map(|n| n.user_id.as_str()).collect();
    assert_eq!(recipients, vec!["u1", "u3"]);
    assert!(delivered.iter().all(|n| n.title.contains("VIP10")));

    harness.manager.shutdown();
}
