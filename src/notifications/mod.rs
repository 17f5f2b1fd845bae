//! Local due-date notifications.
//!
//! The platform notification facility is modelled as the
//! [`NotificationScheduler`] capability: cancel everything, schedule one
//! alert, list what is pending. [`ReminderNotifier`] drives it with the
//! wipe-and-replace policy; the store implementations live alongside.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::reminders::ReminderKind;
use crate::AppResult;

pub mod memory;
pub mod notifier;
pub mod sqlite;

pub use memory::InMemoryScheduler;
pub use notifier::{NotificationStats, ReminderNotifier, ScheduleOutcome};
pub use sqlite::SqliteNotificationStore;

pub const NOTIFY_CANCEL_FAILED: &str = "NOTIFY/CANCEL_FAILED";
pub const NOTIFY_SCHEDULE_FAILED: &str = "NOTIFY/SCHEDULE_FAILED";
pub const NOTIFY_LIST_FAILED: &str = "NOTIFY/LIST_FAILED";
pub const NOTIFY_DECODE: &str = "NOTIFY/DECODE";

/// Payload carried opaquely with every notification; read back for stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub customer_id: String,
    pub vehicle_id: String,
    pub types: Vec<ReminderKind>,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    pub data: NotificationData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTrigger {
    pub at: DateTime<Utc>,
}

/// Opaque identifier handed back by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationHandle(pub String);

impl fmt::Display for NotificationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: NotificationHandle,
    pub trigger_at: DateTime<Utc>,
    pub content: NotificationContent,
}

#[async_trait]
pub trait NotificationScheduler: Send + Sync {
    async fn cancel_all(&self) -> AppResult<()>;

    async fn schedule(
        &self,
        trigger: NotificationTrigger,
        content: NotificationContent,
    ) -> AppResult<NotificationHandle>;

    async fn list_scheduled(&self) -> AppResult<Vec<ScheduledNotification>>;
}
