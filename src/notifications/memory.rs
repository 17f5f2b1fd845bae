use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    NotificationContent, NotificationHandle, NotificationScheduler, NotificationTrigger,
    ScheduledNotification, NOTIFY_CANCEL_FAILED, NOTIFY_SCHEDULE_FAILED,
};
use crate::{AppError, AppResult};

/// Process-local notification set. Failures can be injected per vehicle or
/// for the next cancel-all to exercise the notifier's degradation paths.
#[derive(Debug, Default)]
pub struct InMemoryScheduler {
    entries: Mutex<Vec<ScheduledNotification>>,
    next_id: AtomicU64,
    failing_vehicles: Mutex<HashSet<String>>,
    fail_next_cancel: AtomicBool,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `schedule` call whose payload names `vehicle_id` fails.
    pub fn fail_schedule_for_vehicle(&self, vehicle_id: impl Into<String>) {
        self.failing_vehicles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(vehicle_id.into());
    }

    pub fn fail_next_cancel(&self) {
        self.fail_next_cancel.store(true, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Vec<ScheduledNotification> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl NotificationScheduler for InMemoryScheduler {
    async fn cancel_all(&self) -> AppResult<()> {
        if self.fail_next_cancel.swap(false, Ordering::SeqCst) {
            return Err(AppError::new(
                NOTIFY_CANCEL_FAILED,
                "Injected cancel-all failure.",
            ));
        }
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    async fn schedule(
        &self,
        trigger: NotificationTrigger,
        content: NotificationContent,
    ) -> AppResult<NotificationHandle> {
        let failing = self
            .failing_vehicles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&content.data.vehicle_id);
        if failing {
            return Err(
                AppError::new(NOTIFY_SCHEDULE_FAILED, "Injected schedule failure.")
                    .with_context("vehicle_id", content.data.vehicle_id.clone()),
            );
        }

        let id = NotificationHandle(format!(
            "mem-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        ));
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ScheduledNotification {
                id: id.clone(),
                trigger_at: trigger.at,
                content,
            });
        Ok(id)
    }

    async fn list_scheduled(&self) -> AppResult<Vec<ScheduledNotification>> {
        Ok(self.snapshot())
    }
}
