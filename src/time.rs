use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Source of "now" for everything that classifies or schedules against the
/// current date. Tests pin it with [`FixedClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Resolve the host timezone. Unknown identifiers fall back to UTC.
pub fn local_timezone() -> Tz {
    match iana_time_zone::get_timezone() {
        Ok(name) => parse_timezone(&name),
        Err(err) => {
            tracing::warn!(
                target: "garagedesk",
                event = "tz_detect_failed",
                error = %err
            );
            Tz::UTC
        }
    }
}

pub fn parse_timezone(name: &str) -> Tz {
    name.parse().unwrap_or_else(|_| {
        tracing::warn!(target: "garagedesk", event = "tz_unknown", tz = %name);
        Tz::UTC
    })
}

/// Calendar date of `now` as seen in `tz`.
pub fn today_in(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Interpret a wall-clock time in `tz` and return the UTC instant. Ambiguous
/// times during a DST fall-back choose the earlier occurrence; times inside a
/// gap are shifted forward by the zone's offset.
pub fn local_to_utc(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    let local = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _latest) => earliest,
        LocalResult::None => tz
            .offset_from_utc_datetime(&naive)
            .fix()
            .from_utc_datetime(&naive)
            .with_timezone(&tz),
    };
    local.with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_reasonable() {
        let a = now_ms();
        assert!(a > 1_500_000_000_000); // after 2017
        assert!(a < 4_100_000_000_000); // before year ~2100
    }

    #[test]
    fn today_follows_the_zone_not_utc() {
        let now = Utc.with_ymd_and_hms(2025, 5, 19, 23, 30, 0).unwrap();
        let tokyo: Tz = "Asia/Tokyo".parse().unwrap();
        assert_eq!(today_in(tokyo, now), NaiveDate::from_ymd_opt(2025, 5, 20).unwrap());
        assert_eq!(today_in(Tz::UTC, now), NaiveDate::from_ymd_opt(2025, 5, 19).unwrap());
    }

    #[test]
    fn london_summer_time_shifts_by_one_hour() {
        let tz: Tz = "Europe/London".parse().unwrap();
        let naive = NaiveDate::from_ymd_opt(2025, 7, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let utc = local_to_utc(naive, tz);
        assert_eq!(utc, Utc.with_ymd_and_hms(2025, 7, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn unknown_zone_falls_back_to_utc() {
        assert_eq!(parse_timezone("Mars/Olympus_Mons"), Tz::UTC);
    }
}
