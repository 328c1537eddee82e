use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

/// Monday 00:00:00 through Sunday 23:59:59, in local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl WeekWindow {
    /// Window containing the current instant in `tz`.
    pub fn current(tz: Tz) -> Self {
        week_window(Utc::now().with_timezone(&tz).naive_local())
    }

    /// `YYYY-MM-DD ~ YYYY-MM-DD`
    pub fn label(&self) -> String {
        format!(
            "{} ~ {}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }

    /// Query bounds for timestamps stored in UTC. A bound that falls in a
    /// DST gap moves to the first instant after the gap.
    pub fn utc_bounds(&self, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = localize(&tz, self.start);
        let end = tz
            .from_local_datetime(&self.end)
            .latest()
            .unwrap_or_else(|| {
                localize(&tz, self.end + Duration::seconds(1)) - Duration::seconds(1)
            });
        (start.with_timezone(&Utc), end.with_timezone(&Utc))
    }
}

/// Resolves a local time, pushing times that fall in a DST gap forward.
pub fn localize(tz: &Tz, local: NaiveDateTime) -> DateTime<Tz> {
    let mut candidate = local;
    for _ in 0..4 {
        if let Some(resolved) = tz.from_local_datetime(&candidate).earliest() {
            return resolved;
        }
        candidate += Duration::minutes(30);
    }
    let offset = tz.offset_from_utc_datetime(&local).fix();
    tz.from_utc_datetime(&(local - offset))
}

pub fn week_window(reference: NaiveDateTime) -> WeekWindow {
    let offset = i64::from(reference.weekday().num_days_from_monday());
    let monday = reference.date() - Duration::days(offset);
    let start = monday.and_time(NaiveTime::MIN);
    let end = start + Duration::days(6) + Duration::hours(23) + Duration::minutes(59)
        + Duration::seconds(59);
    WeekWindow { start, end }
}
