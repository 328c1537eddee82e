use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::Serialize;

use crate::week::localize;

/// Fires once a week at a local wall-clock time, e.g. `fri 10:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeeklyTrigger {
    pub weekday: Weekday,
    pub hour: u32,
    pub minute: u32,
}

impl WeeklyTrigger {
    pub fn new(weekday: Weekday, hour: u32, minute: u32) -> Result<Self, String> {
        if hour > 23 || minute > 59 {
            return Err(format!("invalid time {hour:02}:{minute:02}"));
        }
        Ok(Self {
            weekday,
            hour,
            minute,
        })
    }

    /// First firing strictly after `after`, in the same zone.
    pub fn next_after(&self, after: &DateTime<Tz>) -> DateTime<Tz> {
        let tz = after.timezone();
        let today = after.date_naive();
        let days_ahead = (i64::from(self.weekday.num_days_from_monday())
            - i64::from(today.weekday().num_days_from_monday()))
        .rem_euclid(7);
        let time = NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN);

        let mut date = today + Duration::days(days_ahead);
        loop {
            let candidate = localize(&tz, date.and_time(time));
            if candidate > *after {
                return candidate;
            }
            date += Duration::days(7);
        }
    }
}

impl fmt::Display for WeeklyTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "every {} at {:02}:{:02}",
            self.weekday, self.hour, self.minute
        )
    }
}

impl FromStr for WeeklyTrigger {
    type Err = String;

    /// Parses `"<weekday> HH:MM"`, e.g. `"fri 18:00"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(day), Some(time), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!("expected \"<weekday> HH:MM\", got {s:?}"));
        };

        let weekday = day
            .parse::<Weekday>()
            .map_err(|_| format!("unknown weekday {day:?}"))?;
        let (hour, minute) = time
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got {time:?}"))?;
        let hour = hour
            .parse::<u32>()
            .map_err(|_| format!("invalid hour {hour:?}"))?;
        let minute = minute
            .parse::<u32>()
            .map_err(|_| format!("invalid minute {minute:?}"))?;

        Self::new(weekday, hour, minute)
    }
}
