use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use sqlx::SqlitePool;

use garagedesk_lib::config::{default_db_path, MAX_WINDOW_DAYS};
use garagedesk_lib::email::{send_reminder_email, OutboxSender};
use garagedesk_lib::reminders::{summarize, upcoming_reminders};
use garagedesk_lib::retry::RetryPolicy;
use garagedesk_lib::time::today_in;
use garagedesk_lib::{
    compute_reminders, db, migrate, CustomerInput, Reminder, ReminderNotifier, ReminderSettings,
    SqliteCustomerRepository, SqliteNotificationStore,
};

#[derive(Debug, Parser)]
#[command(
    name = "garagedesk",
    about = "Inspection and service reminders for garage customers",
    version
)]
struct Cli {
    /// SQLite database file. Defaults to GARAGEDESK_DB, then the app data directory.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Due-date reminders derived from the customer list.
    #[command(subcommand)]
    Reminders(RemindersCommand),
    /// Local notifications for upcoming due dates.
    #[command(subcommand)]
    Notifications(NotificationsCommand),
    /// Customer records.
    #[command(subcommand)]
    Customers(CustomersCommand),
    /// Database maintenance.
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum RemindersCommand {
    /// Overdue reminders plus everything due within the horizon.
    List {
        /// Days ahead to include. Defaults to GARAGEDESK_HORIZON_DAYS or 30.
        #[arg(long)]
        horizon: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// The shorter dashboard window with a summary line.
    Upcoming {
        #[arg(long)]
        json: bool,
    },
    /// Write one reminder email per listed reminder into an outbox directory.
    Email {
        /// Spool directory picked up by the mail relay.
        #[arg(long)]
        outbox: PathBuf,
        /// Days ahead to include. Defaults to GARAGEDESK_HORIZON_DAYS or 30.
        #[arg(long)]
        horizon: Option<i64>,
    },
}

#[derive(Debug, Subcommand)]
enum NotificationsCommand {
    /// Cancel every pending notification and schedule one per reminder.
    Schedule,
    /// Counts of pending notifications by type.
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum CustomersCommand {
    /// Import customers from a JSON array.
    Import { file: PathBuf },
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply pending schema migrations.
    Migrate,
}

fn main() {
    garagedesk_lib::init_logging();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => {
            garagedesk_lib::flush_file_logs();
        }
        Err(err) => {
            let message = format!("{err:#}");
            tracing::error!(target: "garagedesk", event = "cli_failed", error = %message);
            garagedesk_lib::flush_file_logs();
            eprintln!("Error: {message}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Err(err) = garagedesk_lib::init_file_logging() {
        let message = format!("{err:#}");
        tracing::warn!(target: "garagedesk", event = "file_logging_unavailable", error = %message);
    }

    let db_path = resolve_db_path(cli.db)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Reminders(cmd) => handle_reminders(&db_path, cmd).await,
            Commands::Notifications(cmd) => handle_notifications(&db_path, cmd).await,
            Commands::Customers(cmd) => handle_customers(&db_path, cmd).await,
            Commands::Db(DbCommand::Migrate) => {
                let pool = db::open_sqlite_pool(&db_path).await?;
                let applied = migrate::apply_migrations(&pool)
                    .await
                    .context("apply migrations")?;
                pool.close().await;
                println!("Applied {applied} migration(s) to {}", db_path.display());
                Ok(())
            }
        }
    })
}

fn resolve_db_path(flag: Option<PathBuf>) -> Result<PathBuf> {
    match flag {
        Some(path) => Ok(path),
        None => default_db_path().context("determine database path"),
    }
}

async fn open_ready_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = db::open_sqlite_pool(db_path).await?;
    migrate::apply_migrations(&pool)
        .await
        .context("apply migrations")?;
    Ok(pool)
}

fn load_settings() -> Result<ReminderSettings> {
    ReminderSettings::from_env().context("read reminder settings")
}

async fn handle_reminders(db_path: &Path, command: RemindersCommand) -> Result<()> {
    let settings = load_settings()?;
    let pool = open_ready_pool(db_path).await?;
    let repo = SqliteCustomerRepository::new(pool.clone());
    let customers = repo.list_customers().await.context("load customers")?;
    pool.close().await;

    let today = today_in(settings.timezone, Utc::now());
    match command {
        RemindersCommand::List { horizon, json } => {
            let horizon = checked_horizon(horizon, &settings)?;
            let reminders = compute_reminders(&customers, horizon, today);
            if json {
                println!("{}", serde_json::to_string_pretty(&reminders)?);
            } else {
                print_reminder_table(&reminders);
            }
        }
        RemindersCommand::Upcoming { json } => {
            let reminders = upcoming_reminders(&customers, &settings, today);
            let summary = summarize(&reminders, today, settings.due_soon_days);
            if json {
                let payload = json!({ "summary": summary, "reminders": reminders });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_reminder_table(&reminders);
                println!(
                    "{} reminder(s): {} overdue, {} due soon, {} combined",
                    summary.total, summary.overdue, summary.due_soon, summary.merged
                );
            }
        }
        RemindersCommand::Email { outbox, horizon } => {
            let horizon = checked_horizon(horizon, &settings)?;
            let reminders = compute_reminders(&customers, horizon, today);
            let sender = OutboxSender::new(outbox);
            let policy = RetryPolicy::default();
            let (mut sent, mut skipped) = (0usize, 0usize);
            for reminder in &reminders {
                if reminder.customer_email.trim().is_empty() {
                    skipped += 1;
                    continue;
                }
                send_reminder_email(&sender, reminder, &policy)
                    .await
                    .with_context(|| format!("email reminder for {}", reminder.vehicle_reg))?;
                sent += 1;
            }
            println!(
                "Queued {sent} email(s) in {}, {skipped} without an address",
                sender.dir().display()
            );
        }
    }
    Ok(())
}

fn checked_horizon(flag: Option<i64>, settings: &ReminderSettings) -> Result<i64> {
    let horizon = flag.unwrap_or(settings.horizon_days);
    if !(0..=MAX_WINDOW_DAYS).contains(&horizon) {
        anyhow::bail!("--horizon must be between 0 and {MAX_WINDOW_DAYS}");
    }
    Ok(horizon)
}

fn print_reminder_table(reminders: &[Reminder]) {
    if reminders.is_empty() {
        println!("No reminders.");
        return;
    }
    println!(
        "{:<12} {:>6}  {:<22} {:<12} {}",
        "DUE", "DAYS", "TYPE", "REG", "CUSTOMER"
    );
    for r in reminders {
        let days = if r.is_overdue {
            format!("{}!", r.days_until)
        } else {
            r.days_until.to_string()
        };
        println!(
            "{:<12} {:>6}  {:<22} {:<12} {}",
            r.due_date.format("%Y-%m-%d").to_string(),
            days,
            r.types_label(),
            r.vehicle_reg,
            r.customer_name
        );
    }
}

async fn handle_notifications(db_path: &Path, command: NotificationsCommand) -> Result<()> {
    let settings = load_settings()?;
    let pool = open_ready_pool(db_path).await?;
    let store = Arc::new(SqliteNotificationStore::new(pool.clone()));
    let notifier = ReminderNotifier::new(store, settings);

    let result = match command {
        NotificationsCommand::Schedule => {
            let repo = SqliteCustomerRepository::new(pool.clone());
            match notifier.refresh_from_repository(&repo).await {
                Some(outcome) => {
                    println!(
                        "Scheduled {} of {} reminder(s): {} already past, {} failed",
                        outcome.scheduled, outcome.candidates, outcome.skipped_past, outcome.failed
                    );
                    if outcome.cancel_failed {
                        eprintln!("warning: clearing previous notifications failed");
                    }
                    Ok(())
                }
                None => Err(anyhow::anyhow!(
                    "could not load customers; scheduled notifications left unchanged"
                )),
            }
        }
        NotificationsCommand::Stats { json } => {
            let stats = notifier.notification_stats().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "{} pending: {} inspection, {} service, {} combined",
                    stats.total, stats.inspections, stats.services, stats.merged
                );
            }
            Ok(())
        }
    };
    pool.close().await;
    result
}

async fn handle_customers(db_path: &Path, command: CustomersCommand) -> Result<()> {
    let pool = open_ready_pool(db_path).await?;
    let repo = SqliteCustomerRepository::new(pool.clone());

    let result = match command {
        CustomersCommand::Import { file } => import_customers(&repo, &file).await,
        CustomersCommand::List { json } => {
            let customers = repo.list_customers().await.context("load customers")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&customers)?);
            } else if customers.is_empty() {
                println!("No customers.");
            } else {
                for c in &customers {
                    println!(
                        "{}  {}  <{}>  {} vehicle(s)",
                        c.id,
                        c.display_name(),
                        c.email,
                        c.vehicles.len()
                    );
                }
            }
            Ok(())
        }
    };
    pool.close().await;
    result
}

async fn import_customers(repo: &SqliteCustomerRepository, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("read {}", file.display()))?;
    let inputs: Vec<CustomerInput> = serde_json::from_str(&raw)
        .with_context(|| format!("parse customers from {}", file.display()))?;

    // Reject the whole file before writing anything.
    for (index, input) in inputs.iter().enumerate() {
        input
            .validate()
            .with_context(|| format!("customer #{} in {}", index + 1, file.display()))?;
    }

    for input in inputs.iter().cloned() {
        repo.create(input).await.context("store customer")?;
    }
    println!("Imported {} customer(s)", inputs.len());
    Ok(())
}
