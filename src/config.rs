use std::env;
use std::path::PathBuf;

use chrono_tz::Tz;
use serde::Serialize;

use crate::{time, AppError, AppResult};

pub const CONFIG_INVALID: &str = "CONFIG/INVALID";
pub const CONFIG_DATA_DIR: &str = "CONFIG/DATA_DIR";

pub const DB_FILE_NAME: &str = "garagedesk.sqlite3";
pub const APP_DIR_NAME: &str = "garagedesk";
pub const FAKE_APPDATA_ENV: &str = "GARAGEDESK_FAKE_APPDATA";
pub const DB_PATH_ENV: &str = "GARAGEDESK_DB";

/// Upper bound for every day window and the lead time (about ten years).
pub const MAX_WINDOW_DAYS: i64 = 3650;

/// Windows and timings for reminder computation and notification scheduling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReminderSettings {
    /// Upper bound on `days_until` for the reminders list.
    pub horizon_days: i64,
    /// Shorter window used by the dashboard's "upcoming" panel.
    pub upcoming_days: i64,
    /// Threshold for the "due soon" badge.
    pub due_soon_days: i64,
    /// Days before the due date at which a notification fires.
    pub lead_time_days: i64,
    /// Local hour of day at which a notification fires.
    pub notify_hour: u32,
    #[serde(serialize_with = "serialize_tz")]
    pub timezone: Tz,
}

fn serialize_tz<S: serde::Serializer>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(tz.name())
}

impl Default for ReminderSettings {
    fn default() -> Self {
        ReminderSettings {
            horizon_days: 30,
            upcoming_days: 14,
            due_soon_days: crate::dates::DEFAULT_DUE_SOON_DAYS,
            lead_time_days: 14,
            notify_hour: 9,
            timezone: Tz::UTC,
        }
    }
}

impl ReminderSettings {
    /// Defaults overlaid with `GARAGEDESK_*` variables; the timezone comes from
    /// `GARAGEDESK_TZ` or the host.
    pub fn from_env() -> AppResult<Self> {
        let defaults = ReminderSettings::default();
        let settings = ReminderSettings {
            horizon_days: env_i64("GARAGEDESK_HORIZON_DAYS", defaults.horizon_days)?,
            upcoming_days: env_i64("GARAGEDESK_UPCOMING_DAYS", defaults.upcoming_days)?,
            due_soon_days: env_i64("GARAGEDESK_DUE_SOON_DAYS", defaults.due_soon_days)?,
            lead_time_days: env_i64("GARAGEDESK_LEAD_TIME_DAYS", defaults.lead_time_days)?,
            notify_hour: env_i64("GARAGEDESK_NOTIFY_HOUR", i64::from(defaults.notify_hour))?
                .try_into()
                .map_err(|_| {
                    AppError::new(CONFIG_INVALID, "Notification hour must be between 0 and 23.")
                        .with_context("key", "GARAGEDESK_NOTIFY_HOUR")
                })?,
            timezone: match env::var("GARAGEDESK_TZ") {
                Ok(name) if !name.trim().is_empty() => time::parse_timezone(name.trim()),
                _ => time::local_timezone(),
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> AppResult<()> {
        let windows = [
            ("horizon_days", self.horizon_days),
            ("upcoming_days", self.upcoming_days),
            ("due_soon_days", self.due_soon_days),
            ("lead_time_days", self.lead_time_days),
        ];
        for (key, value) in windows {
            if !(0..=MAX_WINDOW_DAYS).contains(&value) {
                return Err(AppError::new(
                    CONFIG_INVALID,
                    format!("Day windows must be between 0 and {MAX_WINDOW_DAYS}."),
                )
                .with_context("key", key)
                .with_context("value", value.to_string()));
            }
        }
        if self.notify_hour > 23 {
            return Err(
                AppError::new(CONFIG_INVALID, "Notification hour must be between 0 and 23.")
                    .with_context("key", "notify_hour")
                    .with_context("value", self.notify_hour.to_string()),
            );
        }
        Ok(())
    }
}

fn env_i64(key: &str, default: i64) -> AppResult<i64> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<i64>().map_err(|err| {
            AppError::new(CONFIG_INVALID, "Expected a whole number.")
                .with_context("key", key)
                .with_context("value", raw.clone())
                .with_context("error", err.to_string())
        }),
        _ => Ok(default),
    }
}

/// Application data directory; `GARAGEDESK_FAKE_APPDATA` wins when set.
pub fn app_data_dir() -> AppResult<PathBuf> {
    if let Ok(fake) = env::var(FAKE_APPDATA_ENV) {
        return Ok(PathBuf::from(fake));
    }
    dirs::data_dir()
        .or_else(|| env::current_dir().ok())
        .map(|base| base.join(APP_DIR_NAME))
        .ok_or_else(|| {
            AppError::new(CONFIG_DATA_DIR, "Failed to resolve application data directory")
        })
}

/// Database location: `GARAGEDESK_DB`, else the app data directory.
pub fn default_db_path() -> AppResult<PathBuf> {
    if let Ok(path) = env::var(DB_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(app_data_dir()?.join(DB_FILE_NAME))
}
