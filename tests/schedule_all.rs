#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use garagedesk_lib::notifications::{
    NotificationContent, NotificationHandle, NotificationTrigger, ScheduledNotification,
};
use garagedesk_lib::repo::StaticCustomerRepository;
use garagedesk_lib::time::FixedClock;
use garagedesk_lib::{
    AppError, AppResult, Customer, CustomerRepository, InMemoryScheduler, NotificationScheduler,
    NotificationStats, ReminderNotifier, ReminderSettings,
};

#[path = "util.rs"]
mod util;

use util::{customer, vehicle};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 20, 12, 0, 0).unwrap()
}

fn notifier(scheduler: Arc<dyn NotificationScheduler>) -> ReminderNotifier {
    ReminderNotifier::with_clock(
        scheduler,
        ReminderSettings::default(),
        Arc::new(FixedClock(now())),
    )
}

/// Three future triggers (one merged) and one already-past trigger.
fn fleet() -> Vec<Customer> {
    vec![
        customer(
            "acme",
            "ACME Ltd",
            vec![
                vehicle("v1", "ABC-123", Some("2025-07-01"), Some("2025-07-01")),
                // trigger 2025-05-18: past
                vehicle("v2", "ABC-456", Some("2025-06-01"), None),
            ],
        ),
        customer(
            "bravo",
            "Bravo Haulage",
            vec![vehicle("v3", "BRV-1", Some("2025-08-01"), Some("2025-09-15"))],
        ),
    ]
}

#[tokio::test]
async fn repeated_runs_never_accumulate_notifications() {
    let scheduler = Arc::new(InMemoryScheduler::new());
    let notifier = notifier(scheduler.clone());

    let first = notifier.schedule_all_reminders(&fleet()).await;
    assert_eq!(first.candidates, 4);
    assert_eq!(first.scheduled, 3);
    assert_eq!(first.skipped_past, 1);
    assert_eq!(scheduler.len(), 3);

    let second = notifier.schedule_all_reminders(&fleet()).await;
    assert_eq!(second, first);
    assert_eq!(scheduler.len(), 3);

    // Customers removed: the previous set is wiped.
    let empty = notifier.schedule_all_reminders(&[]).await;
    assert_eq!(empty.scheduled, 0);
    assert!(scheduler.is_empty());
}

#[tokio::test]
async fn notifications_fire_lead_time_before_due_at_nine() {
    let scheduler = Arc::new(InMemoryScheduler::new());
    let notifier = notifier(scheduler.clone());
    notifier.schedule_all_reminders(&fleet()).await;

    let merged = scheduler
        .snapshot()
        .into_iter()
        .find(|n| n.content.data.vehicle_id == "v1")
        .unwrap();
    assert_eq!(
        merged.trigger_at,
        Utc.with_ymd_and_hms(2025, 6, 17, 9, 0, 0).unwrap()
    );
    assert_eq!(merged.content.title, "Inspection & Service Due");
    assert_eq!(merged.content.data.customer_id, "acme");
}

#[tokio::test]
async fn one_failing_vehicle_does_not_abort_the_batch() {
    let scheduler = Arc::new(InMemoryScheduler::new());
    scheduler.fail_schedule_for_vehicle("v3");
    let notifier = notifier(scheduler.clone());

    let outcome = notifier.schedule_all_reminders(&fleet()).await;
    assert_eq!(outcome.failed, 2);
    assert_eq!(outcome.scheduled, 1);
    assert_eq!(scheduler.len(), 1);
}

#[tokio::test]
async fn cancel_failure_is_reported_and_scheduling_continues() {
    let scheduler = Arc::new(InMemoryScheduler::new());
    let notifier = notifier(scheduler.clone());
    notifier.schedule_all_reminders(&fleet()).await;

    scheduler.fail_next_cancel();
    let outcome = notifier.schedule_all_reminders(&fleet()).await;
    assert!(outcome.cancel_failed);
    assert_eq!(outcome.scheduled, 3);
    // The stale set survived the failed cancel.
    assert_eq!(scheduler.len(), 6);

    let recovered = notifier.schedule_all_reminders(&fleet()).await;
    assert!(!recovered.cancel_failed);
    assert_eq!(scheduler.len(), 3);
}

#[tokio::test]
async fn stats_count_pending_by_type() {
    let scheduler = Arc::new(InMemoryScheduler::new());
    let notifier = notifier(scheduler.clone());
    notifier.schedule_all_reminders(&fleet()).await;

    assert_eq!(
        notifier.notification_stats().await,
        NotificationStats {
            total: 3,
            inspections: 1,
            services: 1,
            merged: 1,
        }
    );
}

struct FailingRepository;

#[async_trait]
impl CustomerRepository for FailingRepository {
    async fn list(&self) -> AppResult<Vec<Customer>> {
        Err(AppError::new("TEST/OFFLINE", "backend unavailable"))
    }
}

#[tokio::test]
async fn failed_refresh_leaves_existing_notifications() {
    let scheduler = Arc::new(InMemoryScheduler::new());
    let notifier = notifier(scheduler.clone());

    let outcome = notifier
        .refresh_from_repository(&StaticCustomerRepository::new(fleet()))
        .await
        .unwrap();
    assert_eq!(outcome.scheduled, 3);

    assert!(notifier
        .refresh_from_repository(&FailingRepository)
        .await
        .is_none());
    assert_eq!(scheduler.len(), 3);
}

/// Yields inside every call so two resets interleave unless serialized.
struct SlowScheduler {
    inner: InMemoryScheduler,
}

#[async_trait]
impl NotificationScheduler for SlowScheduler {
    async fn cancel_all(&self) -> AppResult<()> {
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        self.inner.cancel_all().await
    }

    async fn schedule(
        &self,
        trigger: NotificationTrigger,
        content: NotificationContent,
    ) -> AppResult<NotificationHandle> {
        tokio::time::sleep(StdDuration::from_millis(2)).await;
        self.inner.schedule(trigger, content).await
    }

    async fn list_scheduled(&self) -> AppResult<Vec<ScheduledNotification>> {
        self.inner.list_scheduled().await
    }
}

#[tokio::test]
async fn concurrent_resets_leave_a_single_set() {
    let scheduler = Arc::new(SlowScheduler {
        inner: InMemoryScheduler::new(),
    });
    let notifier = notifier(scheduler.clone());
    let customers = fleet();

    let (a, b) = tokio::join!(
        notifier.schedule_all_reminders(&customers),
        notifier.schedule_all_reminders(&customers)
    );

    assert_eq!(a.scheduled, 3);
    assert_eq!(b.scheduled, 3);
    // Interleaved cancel/schedule would have left six.
    assert_eq!(scheduler.inner.len(), 3);
}
