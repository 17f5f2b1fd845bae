//! Due-date reminder computation.
//!
//! Every vehicle contributes at most two reminders: one per tracked due date,
//! or a single merged reminder when inspection and service fall on the same
//! calendar date. The list view keeps reminders with `days_until <= horizon`
//! (overdue ones always qualify) and orders overdue reminders first, then by
//! ascending `days_until`, keeping input order for ties.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::ReminderSettings;
use crate::dates::{date_due_soon, days_between, parse_due_date};
use crate::model::{Customer, Vehicle};
use crate::repo::CustomerRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderKind {
    Inspection,
    Service,
}

impl ReminderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReminderKind::Inspection => "inspection",
            ReminderKind::Service => "service",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReminderKind::Inspection => "Inspection",
            ReminderKind::Service => "Service",
        }
    }
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reminder {
    pub customer_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub customer_mobile: String,
    pub vehicle_id: String,
    pub vehicle_reg: String,
    pub vehicle_make: String,
    pub vehicle_model: String,
    pub vehicle_details: String,
    /// Never empty; holds both kinds only for a merged reminder.
    pub types: Vec<ReminderKind>,
    pub due_date: NaiveDate,
    pub days_until: i64,
    pub is_overdue: bool,
    pub is_merged: bool,
}

impl Reminder {
    fn new(
        customer: &Customer,
        vehicle: &Vehicle,
        types: Vec<ReminderKind>,
        due_date: NaiveDate,
        today: NaiveDate,
    ) -> Self {
        let is_merged = types.len() == 2;
        Reminder {
            customer_id: customer.id.clone(),
            customer_name: customer.display_name(),
            customer_email: customer.email.clone(),
            customer_phone: customer.phone.clone(),
            customer_mobile: customer.mobile.clone(),
            vehicle_id: vehicle.id.clone(),
            vehicle_reg: vehicle.registration_number.clone(),
            vehicle_make: vehicle.make.clone(),
            vehicle_model: vehicle.model.clone(),
            vehicle_details: vehicle.details(),
            types,
            due_date,
            days_until: days_between(today, due_date),
            is_overdue: due_date < today,
            is_merged,
        }
    }

    pub fn includes(&self, kind: ReminderKind) -> bool {
        self.types.contains(&kind)
    }

    /// "Inspection & Service", "Inspection" or "Service".
    pub fn types_label(&self) -> String {
        self.types
            .iter()
            .map(|kind| kind.label())
            .collect::<Vec<_>>()
            .join(" & ")
    }
}

/// Merged-or-split reminders for one vehicle, with no horizon applied.
pub fn vehicle_reminders(customer: &Customer, vehicle: &Vehicle, today: NaiveDate) -> Vec<Reminder> {
    let inspection = parse_due_date(vehicle.inspection_due_date.as_deref());
    let service = parse_due_date(vehicle.service_due_date.as_deref());

    match (inspection, service) {
        (Some(inspection), Some(service)) if inspection == service => vec![Reminder::new(
            customer,
            vehicle,
            vec![ReminderKind::Inspection, ReminderKind::Service],
            inspection,
            today,
        )],
        _ => {
            let mut out = Vec::with_capacity(2);
            if let Some(date) = inspection {
                out.push(Reminder::new(
                    customer,
                    vehicle,
                    vec![ReminderKind::Inspection],
                    date,
                    today,
                ));
            }
            if let Some(date) = service {
                out.push(Reminder::new(
                    customer,
                    vehicle,
                    vec![ReminderKind::Service],
                    date,
                    today,
                ));
            }
            out
        }
    }
}

/// Every reminder for every vehicle in input order, unfiltered and unsorted.
pub fn candidate_reminders(customers: &[Customer], today: NaiveDate) -> Vec<Reminder> {
    customers
        .iter()
        .flat_map(|customer| {
            customer
                .vehicles
                .iter()
                .flat_map(move |vehicle| vehicle_reminders(customer, vehicle, today))
        })
        .collect()
}

/// Overdue first, then ascending `days_until`; stable.
pub fn sort_reminders(reminders: &mut [Reminder]) {
    reminders.sort_by_key(|reminder| (!reminder.is_overdue, reminder.days_until));
}

pub fn compute_reminders(
    customers: &[Customer],
    horizon_days: i64,
    today: NaiveDate,
) -> Vec<Reminder> {
    let mut reminders: Vec<Reminder> = candidate_reminders(customers, today)
        .into_iter()
        .filter(|reminder| reminder.days_until <= horizon_days)
        .collect();
    sort_reminders(&mut reminders);
    reminders
}

/// The dashboard panel: same rules as the list, narrower window.
pub fn upcoming_reminders(
    customers: &[Customer],
    settings: &ReminderSettings,
    today: NaiveDate,
) -> Vec<Reminder> {
    compute_reminders(customers, settings.upcoming_days, today)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReminderSummary {
    pub total: usize,
    pub overdue: usize,
    pub due_soon: usize,
    pub merged: usize,
}

pub fn summarize(reminders: &[Reminder], today: NaiveDate, due_soon_days: i64) -> ReminderSummary {
    reminders
        .iter()
        .fold(ReminderSummary::default(), |mut summary, reminder| {
            summary.total += 1;
            if reminder.is_overdue {
                summary.overdue += 1;
            }
            if date_due_soon(reminder.due_date, today, due_soon_days) {
                summary.due_soon += 1;
            }
            if reminder.is_merged {
                summary.merged += 1;
            }
            summary
        })
}

/// Load customers and compute the list. A repository failure is logged and
/// yields no reminders.
pub async fn reminders_from_repository(
    repo: &dyn CustomerRepository,
    horizon_days: i64,
    today: NaiveDate,
) -> Vec<Reminder> {
    match repo.list().await {
        Ok(customers) => compute_reminders(&customers, horizon_days, today),
        Err(err) => {
            tracing::warn!(
                target: "garagedesk",
                event = "reminders_fetch_failed",
                code = %err.code(),
                error = %err
            );
            Vec::new()
        }
    }
}
