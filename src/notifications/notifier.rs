use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;

use super::{NotificationContent, NotificationData, NotificationScheduler, NotificationTrigger};
use crate::config::ReminderSettings;
use crate::logging::OperationScope;
use crate::model::Customer;
use crate::reminders::{candidate_reminders, Reminder, ReminderKind};
use crate::repo::CustomerRepository;
use crate::time::{local_to_utc, today_in, Clock, SystemClock};

/// Counts from one wipe-and-replace pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleOutcome {
    /// Reminders derived from the customer list, before trigger filtering.
    pub candidates: usize,
    pub scheduled: usize,
    /// Trigger time already passed.
    pub skipped_past: usize,
    /// Lead time pushed the trigger outside the representable calendar.
    pub skipped_out_of_range: usize,
    pub failed: usize,
    /// The initial cancel-all reported an error; scheduling went ahead anyway.
    pub cancel_failed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotificationStats {
    pub total: usize,
    pub inspections: usize,
    pub services: usize,
    pub merged: usize,
}

/// Turns reminders into scheduled alerts fired `lead_time_days` before the due
/// date at `notify_hour` local time.
pub struct ReminderNotifier {
    scheduler: Arc<dyn NotificationScheduler>,
    settings: ReminderSettings,
    clock: Arc<dyn Clock>,
    // Held for the whole cancel-then-reschedule sequence.
    in_flight: Mutex<()>,
}

impl ReminderNotifier {
    pub fn new(scheduler: Arc<dyn NotificationScheduler>, settings: ReminderSettings) -> Self {
        Self::with_clock(scheduler, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        scheduler: Arc<dyn NotificationScheduler>,
        settings: ReminderSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler,
            settings,
            clock,
            in_flight: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ReminderSettings {
        &self.settings
    }

    /// `due_date - lead_time` at `notify_hour:00` in the configured zone, or
    /// `None` when that day falls off the calendar.
    pub fn trigger_for(&self, due_date: NaiveDate) -> Option<DateTime<Utc>> {
        let lead = self.settings.lead_time_days;
        let day = if lead >= 0 {
            due_date.checked_sub_days(Days::new(lead.unsigned_abs()))?
        } else {
            due_date.checked_add_days(Days::new(lead.unsigned_abs()))?
        };
        let at = NaiveTime::from_hms_opt(self.settings.notify_hour, 0, 0).unwrap_or(NaiveTime::MIN);
        Some(local_to_utc(day.and_time(at), self.settings.timezone))
    }

    /// Cancel every pending notification, then schedule one per reminder whose
    /// trigger is still in the future. Concurrent calls run one at a time.
    pub async fn schedule_all_reminders(&self, customers: &[Customer]) -> ScheduleOutcome {
        let _guard = self.in_flight.lock().await;
        let scope = OperationScope::new("schedule_all_reminders", None);
        let mut outcome = ScheduleOutcome::default();

        if let Err(err) = self.scheduler.cancel_all().await {
            outcome.cancel_failed = true;
            tracing::warn!(
                target: "garagedesk",
                event = "notification_cancel_failed",
                code = %err.code(),
                error = %err
            );
        }

        let now = self.clock.now();
        let today = today_in(self.settings.timezone, now);
        let reminders = candidate_reminders(customers, today);
        outcome.candidates = reminders.len();

        for reminder in &reminders {
            let Some(at) = self.trigger_for(reminder.due_date) else {
                outcome.skipped_out_of_range += 1;
                tracing::warn!(
                    target: "garagedesk",
                    event = "notification_trigger_out_of_range",
                    vehicle_id = %reminder.vehicle_id,
                    due_date = %reminder.due_date,
                    lead_time_days = self.settings.lead_time_days
                );
                continue;
            };
            if at <= now {
                outcome.skipped_past += 1;
                continue;
            }

            let content = notification_content(reminder);
            match self
                .scheduler
                .schedule(NotificationTrigger { at }, content)
                .await
            {
                Ok(handle) => {
                    outcome.scheduled += 1;
                    tracing::debug!(
                        target: "garagedesk",
                        event = "notification_scheduled",
                        id = %handle,
                        vehicle_id = %reminder.vehicle_id,
                        types = %reminder.types_label(),
                        trigger_at = %at.to_rfc3339()
                    );
                }
                Err(err) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        target: "garagedesk",
                        event = "notification_schedule_failed",
                        vehicle_id = %reminder.vehicle_id,
                        due_date = %reminder.due_date,
                        code = %err.code(),
                        error = %err
                    );
                }
            }
        }

        let details = json!({
            "candidates": outcome.candidates,
            "scheduled": outcome.scheduled,
            "skipped_past": outcome.skipped_past,
            "skipped_out_of_range": outcome.skipped_out_of_range,
            "failed": outcome.failed,
            "cancel_failed": outcome.cancel_failed,
        });
        if outcome.failed > 0 || outcome.cancel_failed || outcome.skipped_out_of_range > 0 {
            scope.warn(details);
        } else {
            scope.success(details);
        }
        outcome
    }

    /// Fetch customers and reschedule. A failed fetch leaves the existing
    /// notifications untouched and returns `None`.
    pub async fn refresh_from_repository(
        &self,
        repo: &dyn CustomerRepository,
    ) -> Option<ScheduleOutcome> {
        match repo.list().await {
            Ok(customers) => Some(self.schedule_all_reminders(&customers).await),
            Err(err) => {
                tracing::warn!(
                    target: "garagedesk",
                    event = "notification_refresh_fetch_failed",
                    code = %err.code(),
                    error = %err
                );
                None
            }
        }
    }

    /// Tally the pending notifications by their payload types. A failed read
    /// reports zeros.
    pub async fn notification_stats(&self) -> NotificationStats {
        match self.scheduler.list_scheduled().await {
            Ok(pending) => tally(pending.iter().map(|n| n.content.data.types.as_slice())),
            Err(err) => {
                tracing::warn!(
                    target: "garagedesk",
                    event = "notification_stats_failed",
                    code = %err.code(),
                    error = %err
                );
                NotificationStats::default()
            }
        }
    }
}

fn tally<'a>(types: impl Iterator<Item = &'a [ReminderKind]>) -> NotificationStats {
    types.fold(NotificationStats::default(), |mut stats, kinds| {
        stats.total += 1;
        match kinds {
            [_, _] => stats.merged += 1,
            [ReminderKind::Inspection] => stats.inspections += 1,
            [ReminderKind::Service] => stats.services += 1,
            _ => {}
        }
        stats
    })
}

pub fn notification_content(reminder: &Reminder) -> NotificationContent {
    let due = reminder.due_date.format("%-d %b %Y");
    let vehicle = if reminder.vehicle_details.is_empty() {
        reminder.vehicle_reg.clone()
    } else {
        format!("{} ({})", reminder.vehicle_reg, reminder.vehicle_details)
    };
    let (title, body) = if reminder.is_merged {
        (
            "Inspection & Service Due".to_string(),
            format!(
                "{vehicle} for {} is due for both inspection and service on {due}.",
                reminder.customer_name
            ),
        )
    } else {
        let kind = reminder.types.first().copied().unwrap_or(ReminderKind::Service);
        (
            format!("{} Due", kind.label()),
            format!(
                "{vehicle} for {} is due for {} on {due}.",
                reminder.customer_name,
                kind.as_str()
            ),
        )
    };

    NotificationContent {
        title,
        body,
        data: NotificationData {
            customer_id: reminder.customer_id.clone(),
            vehicle_id: reminder.vehicle_id.clone(),
            types: reminder.types.clone(),
            due_date: reminder.due_date,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Vehicle;
    use crate::notifications::InMemoryScheduler;
    use crate::time::FixedClock;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn notifier_at(
        scheduler: Arc<InMemoryScheduler>,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> ReminderNotifier {
        let settings = ReminderSettings {
            timezone: tz,
            ..ReminderSettings::default()
        };
        ReminderNotifier::with_clock(scheduler, settings, Arc::new(FixedClock(now)))
    }

    fn customer(vehicles: Vec<Vehicle>) -> Customer {
        Customer {
            id: "c1".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            vehicles,
            ..Customer::default()
        }
    }

    fn vehicle(id: &str, inspection: Option<&str>, service: Option<&str>) -> Vehicle {
        Vehicle {
            id: id.into(),
            registration_number: format!("REG-{id}"),
            make: "Ford".into(),
            model: "Fiesta".into(),
            year: "2020".into(),
            inspection_due_date: inspection.map(str::to_string),
            service_due_date: service.map(str::to_string),
        }
    }

    #[test]
    fn trigger_is_lead_time_before_at_nine_local() {
        let scheduler = Arc::new(InMemoryScheduler::new());
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let notifier = notifier_at(scheduler, now, "Europe/London".parse().unwrap());
        let due = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        // 18 May 2025 09:00 BST
        assert_eq!(
            notifier.trigger_for(due),
            Some(Utc.with_ymd_and_hms(2025, 5, 18, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn trigger_off_the_calendar_is_none() {
        let settings = ReminderSettings {
            lead_time_days: 1_000_000_000,
            ..ReminderSettings::default()
        };
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let notifier = ReminderNotifier::with_clock(
            Arc::new(InMemoryScheduler::new()),
            settings,
            Arc::new(FixedClock(now)),
        );
        assert_eq!(notifier.trigger_for(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()), None);
    }

    #[tokio::test]
    async fn oversized_lead_time_skips_instead_of_panicking() {
        let scheduler = Arc::new(InMemoryScheduler::new());
        let settings = ReminderSettings {
            lead_time_days: 1_000_000_000,
            ..ReminderSettings::default()
        };
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let notifier =
            ReminderNotifier::with_clock(scheduler.clone(), settings, Arc::new(FixedClock(now)));
        let customers = vec![customer(vec![
            vehicle("a", Some("2025-06-01"), None),
            vehicle("b", None, Some("2025-07-01")),
        ])];

        let outcome = notifier.schedule_all_reminders(&customers).await;
        assert_eq!(outcome.candidates, 2);
        assert_eq!(outcome.skipped_out_of_range, 2);
        assert_eq!(outcome.scheduled, 0);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn content_wording_depends_on_merge() {
        let today = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        let c = customer(vec![
            vehicle("m", Some("2025-06-01"), Some("2025-06-01")),
            vehicle("s", None, Some("2025-06-03")),
        ]);
        let reminders = candidate_reminders(std::slice::from_ref(&c), today);

        let merged = notification_content(&reminders[0]);
        assert_eq!(merged.title, "Inspection & Service Due");
        assert_eq!(
            merged.body,
            "REG-m (2020 Ford Fiesta) for Ada Lovelace is due for both inspection and service on 1 Jun 2025."
        );
        assert_eq!(merged.data.types.len(), 2);

        let single = notification_content(&reminders[1]);
        assert_eq!(single.title, "Service Due");
        assert!(single.body.ends_with("is due for service on 3 Jun 2025."));
        assert_eq!(single.data.vehicle_id, "s");
    }

    #[tokio::test]
    async fn past_triggers_are_skipped_not_fired() {
        let scheduler = Arc::new(InMemoryScheduler::new());
        let now = Utc.with_ymd_and_hms(2025, 5, 20, 12, 0, 0).unwrap();
        let notifier = notifier_at(scheduler.clone(), now, Tz::UTC);
        let customers = vec![customer(vec![
            // trigger 18 May: already gone
            vehicle("near", Some("2025-06-01"), None),
            // trigger 20 May 09:00: earlier today, gone
            vehicle("edge", None, Some("2025-06-03")),
            // trigger 21 May 09:00
            vehicle("next", Some("2025-06-04"), None),
            // far future: no horizon on this path
            vehicle("far", None, Some("2026-01-15")),
        ])];

        let outcome = notifier.schedule_all_reminders(&customers).await;
        assert_eq!(outcome.candidates, 4);
        assert_eq!(outcome.skipped_past, 2);
        assert_eq!(outcome.scheduled, 2);
        assert_eq!(outcome.failed, 0);
        assert!(!outcome.cancel_failed);

        let ids: Vec<_> = scheduler
            .snapshot()
            .into_iter()
            .map(|n| n.content.data.vehicle_id)
            .collect();
        assert_eq!(ids, vec!["next", "far"]);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancel_failure_logs_one_warning_outcome() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let scheduler = Arc::new(InMemoryScheduler::new());
        scheduler.fail_next_cancel();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let notifier = notifier_at(scheduler, now, Tz::UTC);
        let outcome = notifier
            .schedule_all_reminders(&[customer(vec![vehicle("a", Some("2025-06-01"), None)])])
            .await;
        assert!(outcome.cancel_failed);
        assert_eq!(outcome.scheduled, 1);

        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let records: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert!(records.iter().all(|r| r["level"] != "ERROR"), "logs: {text}");
        assert!(records
            .iter()
            .any(|r| r["fields"]["event"] == "notification_cancel_failed"));
        let outcomes: Vec<_> = records
            .iter()
            .filter(|r| r["fields"]["duration_ms"].is_u64())
            .collect();
        assert_eq!(outcomes.len(), 1, "logs: {text}");
        assert_eq!(outcomes[0]["level"], "WARN");
    }

    #[test]
    fn tally_splits_single_and_merged() {
        let kinds: Vec<Vec<ReminderKind>> = vec![
            vec![ReminderKind::Inspection],
            vec![ReminderKind::Service],
            vec![ReminderKind::Service],
            vec![ReminderKind::Inspection, ReminderKind::Service],
        ];
        let stats = tally(kinds.iter().map(Vec::as_slice));
        assert_eq!(
            stats,
            NotificationStats {
                total: 4,
                inspections: 1,
                services: 2,
                merged: 1,
            }
        );
    }
}
