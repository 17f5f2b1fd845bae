use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use super::{
    NotificationContent, NotificationData, NotificationHandle, NotificationScheduler,
    NotificationTrigger, ScheduledNotification, NOTIFY_CANCEL_FAILED, NOTIFY_DECODE,
    NOTIFY_LIST_FAILED, NOTIFY_SCHEDULE_FAILED,
};
use crate::id::new_uuid_v7;
use crate::time::now_ms;
use crate::{AppError, AppResult};

/// Durable notification set backed by the `scheduled_notifications` table.
#[derive(Clone)]
pub struct SqliteNotificationStore {
    pool: SqlitePool,
}

fn wrap(err: sqlx::Error, code: &'static str, operation: &'static str) -> AppError {
    AppError::new(code, "Notification storage failed.")
        .with_context("operation", operation)
        .with_cause(err)
}

fn decode_row(row: &SqliteRow) -> AppResult<ScheduledNotification> {
    let id: String = row.try_get("id")?;
    let trigger_ms: i64 = row.try_get("trigger_at")?;
    let data_json: String = row.try_get("data")?;

    let trigger_at = DateTime::<Utc>::from_timestamp_millis(trigger_ms).ok_or_else(|| {
        AppError::new(NOTIFY_DECODE, "Stored trigger time is out of range.")
            .with_context("id", id.clone())
            .with_context("trigger_at", trigger_ms.to_string())
    })?;
    let data: NotificationData = serde_json::from_str(&data_json).map_err(|err| {
        AppError::new(NOTIFY_DECODE, "Stored notification payload is unreadable.")
            .with_context("id", id.clone())
            .with_cause(err)
    })?;

    Ok(ScheduledNotification {
        id: NotificationHandle(id),
        trigger_at,
        content: NotificationContent {
            title: row.try_get("title")?,
            body: row.try_get("body")?,
            data,
        },
    })
}

impl SqliteNotificationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, sql: &str, bound: Option<i64>) -> AppResult<Vec<ScheduledNotification>> {
        let mut query = sqlx::query(sql);
        if let Some(ms) = bound {
            query = query.bind(ms);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| wrap(e, NOTIFY_LIST_FAILED, "list"))?;
        rows.iter().map(decode_row).collect()
    }

    /// Notifications whose trigger time is at or before `now`.
    pub async fn due(&self, now: DateTime<Utc>) -> AppResult<Vec<ScheduledNotification>> {
        self.fetch(
            "SELECT id, trigger_at, title, body, data FROM scheduled_notifications \
             WHERE trigger_at <= ? ORDER BY trigger_at, id",
            Some(now.timestamp_millis()),
        )
        .await
    }
}

#[async_trait]
impl NotificationScheduler for SqliteNotificationStore {
    async fn cancel_all(&self) -> AppResult<()> {
        let res = sqlx::query("DELETE FROM scheduled_notifications")
            .execute(&self.pool)
            .await
            .map_err(|e| wrap(e, NOTIFY_CANCEL_FAILED, "cancel_all"))?;
        tracing::debug!(
            target: "garagedesk",
            event = "notifications_cancelled",
            count = res.rows_affected()
        );
        Ok(())
    }

    async fn schedule(
        &self,
        trigger: NotificationTrigger,
        content: NotificationContent,
    ) -> AppResult<NotificationHandle> {
        let id = new_uuid_v7();
        let data = serde_json::to_string(&content.data)?;
        sqlx::query(
            "INSERT INTO scheduled_notifications (id, trigger_at, title, body, data, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(trigger.at.timestamp_millis())
        .bind(&content.title)
        .bind(&content.body)
        .bind(&data)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            wrap(e, NOTIFY_SCHEDULE_FAILED, "schedule")
                .with_context("vehicle_id", content.data.vehicle_id.clone())
        })?;
        Ok(NotificationHandle(id))
    }

    async fn list_scheduled(&self) -> AppResult<Vec<ScheduledNotification>> {
        self.fetch(
            "SELECT id, trigger_at, title, body, data FROM scheduled_notifications \
             ORDER BY trigger_at, id",
            None,
        )
        .await
    }
}
