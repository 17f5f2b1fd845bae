//! Reminder emails. Delivery goes through [`EmailSender`]; the crate ships
//! [`OutboxSender`], which drops each message into a directory for an
//! external mail relay to pick up.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::id::new_uuid_v7;
use crate::logging::OperationScope;
use crate::reminders::Reminder;
use crate::retry::{retry_operation, RetryPolicy};
use crate::{AppError, AppResult};

pub const EMAIL_NO_RECIPIENT: &str = "EMAIL/NO_RECIPIENT";
pub const EMAIL_SEND_FAILED: &str = "EMAIL/SEND_FAILED";
pub const EMAIL_OUTBOX_WRITE: &str = "EMAIL/OUTBOX_WRITE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

fn plural_days(n: i64) -> String {
    if n == 1 {
        "1 day".to_string()
    } else {
        format!("{n} days")
    }
}

impl ReminderEmail {
    pub fn from_reminder(reminder: &Reminder) -> AppResult<Self> {
        let to = reminder.customer_email.trim();
        if to.is_empty() {
            return Err(
                AppError::new(EMAIL_NO_RECIPIENT, "Customer has no email address.")
                    .with_context("customer_id", reminder.customer_id.clone()),
            );
        }

        let what = if reminder.is_merged {
            "inspection and service".to_string()
        } else {
            reminder
                .types
                .first()
                .map(|kind| kind.as_str().to_string())
                .unwrap_or_default()
        };
        let vehicle = if reminder.vehicle_details.is_empty() {
            reminder.vehicle_reg.clone()
        } else {
            format!("{} ({})", reminder.vehicle_reg, reminder.vehicle_details)
        };
        let date = reminder.due_date.format("%-d %B %Y");

        let (subject, status) = if reminder.is_overdue {
            (
                format!("Overdue: {} for {}", reminder.types_label(), reminder.vehicle_reg),
                format!(
                    "Your vehicle {vehicle} was due for its {what} on {date} and is now {} overdue.",
                    plural_days(-reminder.days_until)
                ),
            )
        } else {
            let when = match reminder.days_until {
                0 => "today".to_string(),
                n => format!("in {}", plural_days(n)),
            };
            (
                format!("{} due for {}", reminder.types_label(), reminder.vehicle_reg),
                format!("Your vehicle {vehicle} is due for its {what} on {date} ({when})."),
            )
        };

        let body = format!(
            "Dear {},\n\n{status}\n\nPlease get in touch to book a convenient time.\n\nKind regards,\nThe workshop team\n",
            reminder.customer_name
        );

        Ok(Self {
            to: to.to_string(),
            subject,
            body,
        })
    }
}

/// Outbound mail transport.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &ReminderEmail) -> AppResult<()>;
}

impl ReminderEmail {
    /// RFC 5322-style text: headers, blank line, body.
    pub fn to_message(&self) -> String {
        format!(
            "To: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
            self.to,
            self.subject,
            self.body.replace('\n', "\r\n")
        )
    }
}

/// Writes one `.eml` file per message into a spool directory.
#[derive(Debug, Clone)]
pub struct OutboxSender {
    dir: PathBuf,
}

impl OutboxSender {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl EmailSender for OutboxSender {
    async fn send(&self, email: &ReminderEmail) -> AppResult<()> {
        let path = self.dir.join(format!("{}.eml", new_uuid_v7()));
        std::fs::create_dir_all(&self.dir)
            .and_then(|()| std::fs::write(&path, email.to_message()))
            .map_err(|err| {
                AppError::new(EMAIL_OUTBOX_WRITE, "Could not write to the outbox.")
                    .with_context("path", path.display().to_string())
                    .with_context("reason", err.to_string())
            })?;
        tracing::debug!(
            target: "garagedesk",
            event = "email_spooled",
            path = %path.display(),
            to = %email.to
        );
        Ok(())
    }
}

/// Build the email for `reminder` and deliver it, retrying per `policy`.
pub async fn send_reminder_email(
    sender: &dyn EmailSender,
    reminder: &Reminder,
    policy: &RetryPolicy,
) -> AppResult<ReminderEmail> {
    let scope = OperationScope::new("send_reminder_email", Some(reminder.customer_id.clone()));
    let result = deliver(sender, reminder, policy).await;
    match &result {
        Ok(email) => scope.success(json!({
            "vehicle_id": reminder.vehicle_id,
            "to": email.to,
        })),
        Err(err) => scope.fail(err),
    }
    result
}

async fn deliver(
    sender: &dyn EmailSender,
    reminder: &Reminder,
    policy: &RetryPolicy,
) -> AppResult<ReminderEmail> {
    let email = ReminderEmail::from_reminder(reminder)?;
    retry_operation(policy, "send_reminder_email", || sender.send(&email))
        .await
        .map_err(|err| {
            AppError::new(EMAIL_SEND_FAILED, "Could not send the reminder email.")
                .with_context("vehicle_id", reminder.vehicle_id.clone())
                .with_contexts(err.context().iter().map(|(k, v)| (k.clone(), v.clone())))
                .with_cause(err)
        })?;
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Customer, Vehicle};
    use crate::reminders::candidate_reminders;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn reminders_for(inspection: &str, service: &str, email: &str) -> Vec<Reminder> {
        let customer = Customer {
            id: "c1".into(),
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            email: email.into(),
            vehicles: vec![Vehicle {
                id: "v1".into(),
                registration_number: "AB12 CDE".into(),
                make: "Volvo".into(),
                model: "V70".into(),
                year: "2012".into(),
                inspection_due_date: Some(inspection.into()),
                service_due_date: Some(service.into()),
            }],
            ..Customer::default()
        };
        let today = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        candidate_reminders(&[customer], today)
    }

    struct FlakySender {
        failures_left: AtomicU32,
        sent: Mutex<Vec<ReminderEmail>>,
    }

    #[async_trait]
    impl EmailSender for FlakySender {
        async fn send(&self, email: &ReminderEmail) -> AppResult<()> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(AppError::new("SMTP/TRANSIENT", "try later"));
            }
            self.sent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(email.clone());
            Ok(())
        }
    }

    #[test]
    fn merged_upcoming_wording() {
        let r = &reminders_for("2025-06-13", "2025-06-13", "g@example.com")[0];
        let email = ReminderEmail::from_reminder(r).unwrap();
        assert_eq!(email.to, "g@example.com");
        assert_eq!(email.subject, "Inspection & Service due for AB12 CDE");
        assert!(email.body.starts_with("Dear Grace Hopper,"));
        assert!(email.body.contains(
            "AB12 CDE (2012 Volvo V70) is due for its inspection and service on 13 June 2025 (in 3 days)."
        ));
    }

    #[test]
    fn single_overdue_wording() {
        let reminders = reminders_for("2025-06-09", "2025-07-01", "g@example.com");
        let email = ReminderEmail::from_reminder(&reminders[0]).unwrap();
        assert_eq!(email.subject, "Overdue: Inspection for AB12 CDE");
        assert!(email
            .body
            .contains("was due for its inspection on 9 June 2025 and is now 1 day overdue."));
    }

    #[test]
    fn missing_email_is_rejected() {
        let r = &reminders_for("2025-06-13", "2025-06-13", "  ")[0];
        let err = ReminderEmail::from_reminder(r).unwrap_err();
        assert_eq!(err.code(), EMAIL_NO_RECIPIENT);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let sender = FlakySender {
            failures_left: AtomicU32::new(2),
            sent: Mutex::new(Vec::new()),
        };
        let r = &reminders_for("2025-06-13", "2025-06-13", "g@example.com")[0];
        send_reminder_email(&sender, r, &RetryPolicy::immediate(3))
            .await
            .unwrap();
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn outbox_writes_one_message_file() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = OutboxSender::new(dir.path().join("outbox"));
        let r = &reminders_for("2025-06-13", "2025-06-13", "g@example.com")[0];
        let email = send_reminder_email(&outbox, r, &RetryPolicy::immediate(1))
            .await
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(outbox.dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].extension().and_then(|e| e.to_str()), Some("eml"));
        let text = std::fs::read_to_string(&files[0]).unwrap();
        assert!(text.starts_with("To: g@example.com\r\nSubject: Inspection & Service due for AB12 CDE\r\n"));
        assert_eq!(text, email.to_message());
    }

    #[tokio::test]
    async fn exhausted_retries_report_send_failed() {
        let sender = FlakySender {
            failures_left: AtomicU32::new(5),
            sent: Mutex::new(Vec::new()),
        };
        let r = &reminders_for("2025-06-13", "2025-06-13", "g@example.com")[0];
        let err = send_reminder_email(&sender, r, &RetryPolicy::immediate(2))
            .await
            .unwrap_err();
        assert_eq!(err.code(), EMAIL_SEND_FAILED);
        assert_eq!(err.context().get("attempts").map(String::as_str), Some("2"));
        assert_eq!(err.cause().map(|c| c.code()), Some("SMTP/TRANSIENT"));
    }
}
