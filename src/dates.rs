//! Calendar-date classification of vehicle due dates.
//!
//! Due dates arrive as free-form strings (`YYYY-MM-DD`, or an RFC 3339 /
//! `YYYY-MM-DDTHH:MM` timestamp whose date part is used). Anything absent,
//! blank or unparseable is "not tracked": [`is_overdue`] and [`is_due_soon`]
//! answer `false` and [`days_until`] answers `0`.

use chrono::{DateTime, NaiveDate};

pub const DEFAULT_DUE_SOON_DAYS: i64 = 7;

/// Parse a stored due date down to its calendar date.
pub fn parse_due_date(raw: Option<&str>) -> Option<NaiveDate> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }
    // `2025-06-01T00:00` and friends: keep the date prefix only.
    trimmed
        .split_once('T')
        .and_then(|(date, _)| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
}

/// Whole calendar days from `today` to `date`; negative once the date has passed.
pub fn days_between(today: NaiveDate, date: NaiveDate) -> i64 {
    date.signed_duration_since(today).num_days()
}

pub fn days_until(raw: Option<&str>, today: NaiveDate) -> i64 {
    parse_due_date(raw)
        .map(|date| days_between(today, date))
        .unwrap_or(0)
}

/// Strictly before today; a date due today is not overdue.
pub fn is_overdue(raw: Option<&str>, today: NaiveDate) -> bool {
    parse_due_date(raw).is_some_and(|date| date < today)
}

/// `0 < days_until <= threshold_days`. A date due today is neither overdue
/// nor due soon.
pub fn is_due_soon(raw: Option<&str>, today: NaiveDate, threshold_days: i64) -> bool {
    parse_due_date(raw).is_some_and(|date| date_due_soon(date, today, threshold_days))
}

pub fn date_due_soon(date: NaiveDate, today: NaiveDate, threshold_days: i64) -> bool {
    let days = days_between(today, date);
    days > 0 && days <= threshold_days
}
