//! Vehicle inspection and service reminders for a small garage.
//!
//! Customers and their vehicles live in SQLite; [`reminders`] derives the
//! due-date list and [`notifications`] keeps one local alert per reminder.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use once_cell::sync::Lazy;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub mod config;
pub mod dates;
pub mod db;
pub mod email;
pub mod error;
pub mod id;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod notifications;
pub mod reminders;
pub mod repo;
pub mod retry;
pub mod time;

pub use config::ReminderSettings;
pub use error::{AppError, AppResult};
pub use model::{Customer, CustomerInput, Vehicle};
pub use notifications::{
    InMemoryScheduler, NotificationScheduler, NotificationStats, ReminderNotifier,
    ScheduleOutcome, SqliteNotificationStore,
};
pub use reminders::{compute_reminders, Reminder, ReminderKind};
pub use repo::{CustomerRepository, SqliteCustomerRepository};

pub const LOG_FILE_NAME: &str = "garagedesk.log";
const LOG_ENV: &str = "GARAGEDESK_LOG";

struct FileSink {
    dir: PathBuf,
    writer: NonBlocking,
    _guard: WorkerGuard,
}

impl FileSink {
    fn open(dir: PathBuf) -> Self {
        let appender = tracing_appender::rolling::never(&dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        Self {
            dir,
            writer,
            _guard: guard,
        }
    }
}

static FILE_SINK: Lazy<Mutex<Option<FileSink>>> = Lazy::new(|| Mutex::new(None));

/// Writer for the JSON layer. Output is dropped until a file sink is wired.
#[derive(Clone, Copy, Default)]
struct FileSinkWriter;

impl Write for FileSinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut sink = FILE_SINK.lock().unwrap_or_else(|e| e.into_inner());
        match sink.as_mut() {
            Some(sink) => sink.writer.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut sink = FILE_SINK.lock().unwrap_or_else(|e| e.into_inner());
        match sink.as_mut() {
            Some(sink) => sink.writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for FileSinkWriter {
    type Writer = FileSinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env(LOG_ENV))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber: human-readable lines on stderr plus a JSON
/// layer that writes to the log file once [`init_file_logging`] has run.
/// Later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(true),
        )
        .with(
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(FileSinkWriter),
        )
        .try_init();
}

/// Resolve `<app data>/logs`, create it, and route the JSON layer into
/// `garagedesk.log` there. Returns the log file path.
pub fn init_file_logging() -> anyhow::Result<PathBuf> {
    let dir = config::app_data_dir()?.join("logs");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create log directory {}", dir.display()))?;
    let path = dir.join(LOG_FILE_NAME);

    let previous = {
        let mut sink = FILE_SINK.lock().unwrap_or_else(|e| e.into_inner());
        sink.replace(FileSink::open(dir))
    };
    // Dropping the old guard flushes whatever it still buffered.
    drop(previous);

    tracing::info!(
        target: "garagedesk",
        event = "file_logging_ready",
        path = %path.display()
    );
    Ok(path)
}

/// Flush buffered file log lines to disk. The sink is reopened on the same
/// file so logging continues.
pub fn flush_file_logs() {
    let mut sink = FILE_SINK.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(old) = sink.take() {
        let dir = old.dir.clone();
        drop(old);
        *sink = Some(FileSink::open(dir));
    }
}
