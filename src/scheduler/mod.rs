//! Declarative backup schedules and their fire-time arithmetic.
//!
//! A [`ScheduleSpec`] holds up to three independent cadences. Each enabled
//! cadence becomes its own recurring trigger in [`runner::Scheduler`]; the
//! arithmetic lives here so it can be tested against fixed instants.

pub mod runner;

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Weekday};
use std::fmt;
use std::str::FromStr;

/// Upper bound on how far ahead a fire time is searched. Day 31 recurs within
/// two months, so a year is plenty.
const SEARCH_HORIZON_DAYS: u64 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    fn as_naive(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("invalid time '{s}', expected HH:MM"))?;
        let hour = h.parse().map_err(|_| format!("invalid hour in '{s}'"))?;
        let minute = m.parse().map_err(|_| format!("invalid minute in '{s}'"))?;
        TimeOfDay::new(hour, minute).ok_or_else(|| format!("time '{s}' is out of range"))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// One recurring trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Daily { at: TimeOfDay },
    Weekly { weekday: Weekday, at: TimeOfDay },
    /// Months without `day` are skipped, as cron does.
    Monthly { day: u32, at: TimeOfDay },
}

impl Cadence {
    pub fn name(&self) -> &'static str {
        match self {
            Cadence::Daily { .. } => "daily",
            Cadence::Weekly { .. } => "weekly",
            Cadence::Monthly { .. } => "monthly",
        }
    }

    fn matches(&self, date: NaiveDate) -> bool {
        match self {
            Cadence::Daily { .. } => true,
            Cadence::Weekly { weekday, .. } => date.weekday() == *weekday,
            Cadence::Monthly { day, .. } => date.day() == *day,
        }
    }

    fn at(&self) -> TimeOfDay {
        match self {
            Cadence::Daily { at } | Cadence::Weekly { at, .. } | Cadence::Monthly { at, .. } => *at,
        }
    }

    /// First fire time strictly after `after`, in the same time zone.
    ///
    /// Local times that do not exist (DST gaps) are skipped; ambiguous ones
    /// resolve to the earlier instant.
    pub fn next_fire<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let start = after.date_naive();
        let time = self.at().as_naive();

        (0..SEARCH_HORIZON_DAYS)
            .filter_map(|offset| start.checked_add_days(Days::new(offset)))
            .filter(|date| self.matches(*date))
            .filter_map(|date| tz.from_local_datetime(&date.and_time(time)).earliest())
            .find(|candidate| candidate > after)
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Daily { at } => write!(f, "daily at {at}"),
            Cadence::Weekly { weekday, at } => write!(f, "weekly on {} at {at}", weekday_name(*weekday)),
            Cadence::Monthly { day, at } => write!(f, "monthly on day {day} at {at}"),
        }
    }
}

/// Independent daily/weekly/monthly toggles. `None` means disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub daily: Option<TimeOfDay>,
    pub weekly: Option<(Weekday, TimeOfDay)>,
    pub monthly: Option<(u32, TimeOfDay)>,
}

impl ScheduleSpec {
    pub fn cadences(&self) -> Vec<Cadence> {
        let mut cadences = Vec::new();
        if let Some(at) = self.daily {
            cadences.push(Cadence::Daily { at });
        }
        if let Some((weekday, at)) = self.weekly {
            cadences.push(Cadence::Weekly { weekday, at });
        }
        if let Some((day, at)) = self.monthly {
            cadences.push(Cadence::Monthly { day, at });
        }
        cadences
    }

    pub fn is_empty(&self) -> bool {
        self.daily.is_none() && self.weekly.is_none() && self.monthly.is_none()
    }
}

/// Day-of-week index as used in schedules: 0 = Sunday … 6 = Saturday.
pub fn weekday_from_index(index: u32) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

pub fn weekday_from_name(name: &str) -> Option<Weekday> {
    match name.trim().to_ascii_lowercase().as_str() {
        "sunday" | "sun" => Some(Weekday::Sun),
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        _ => None,
    }
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Sun => "Sunday",
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(h: u32, m: u32) -> TimeOfDay {
        TimeOfDay::new(h, m).unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn parses_and_rejects_times() {
        assert_eq!("02:00".parse::<TimeOfDay>(), Ok(at(2, 0)));
        assert_eq!(" 23:59 ".parse::<TimeOfDay>(), Ok(at(23, 59)));
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
        assert_eq!(at(4, 5).to_string(), "04:05");
    }

    #[test]
    fn daily_fires_later_today_or_tomorrow() {
        let cadence = Cadence::Daily { at: at(2, 0) };
        assert_eq!(cadence.next_fire(&utc(2024, 3, 10, 1, 0)), Some(utc(2024, 3, 10, 2, 0)));
        assert_eq!(cadence.next_fire(&utc(2024, 3, 10, 2, 0)), Some(utc(2024, 3, 11, 2, 0)));
        assert_eq!(cadence.next_fire(&utc(2024, 12, 31, 23, 0)), Some(utc(2025, 1, 1, 2, 0)));
    }

    #[test]
    fn weekly_uses_sunday_as_index_zero() {
        let sunday = weekday_from_index(0).unwrap();
        assert_eq!(sunday, Weekday::Sun);
        assert_eq!(weekday_from_index(6), Some(Weekday::Sat));
        assert_eq!(weekday_from_index(7), None);

        let cadence = Cadence::Weekly { weekday: sunday, at: at(3, 0) };
        // 2024-03-13 is a Wednesday.
        assert_eq!(cadence.next_fire(&utc(2024, 3, 13, 12, 0)), Some(utc(2024, 3, 17, 3, 0)));
        // On the Sunday itself but after the time: next week.
        assert_eq!(cadence.next_fire(&utc(2024, 3, 17, 3, 30)), Some(utc(2024, 3, 24, 3, 0)));
    }

    #[test]
    fn monthly_skips_short_months() {
        let cadence = Cadence::Monthly { day: 31, at: at(4, 0) };
        assert_eq!(cadence.next_fire(&utc(2024, 1, 31, 5, 0)), Some(utc(2024, 3, 31, 4, 0)));

        let first = Cadence::Monthly { day: 1, at: at(4, 0) };
        assert_eq!(first.next_fire(&utc(2024, 2, 15, 0, 0)), Some(utc(2024, 3, 1, 4, 0)));
    }

    #[test]
    fn spec_yields_one_cadence_per_enabled_toggle() {
        let spec = ScheduleSpec {
            daily: Some(at(2, 0)),
            weekly: None,
            monthly: Some((1, at(4, 0))),
        };
        let names: Vec<_> = spec.cadences().iter().map(Cadence::name).collect();
        assert_eq!(names, vec!["daily", "monthly"]);
        assert!(ScheduleSpec::default().is_empty());
    }

    #[test]
    fn weekday_names_are_case_insensitive() {
        assert_eq!(weekday_from_name("Sunday"), Some(Weekday::Sun));
        assert_eq!(weekday_from_name("FRIDAY"), Some(Weekday::Fri));
        assert_eq!(weekday_from_name("someday"), None);
        assert_eq!(
            Cadence::Weekly { weekday: Weekday::Sun, at: at(3, 0) }.to_string(),
            "weekly on Sunday at 03:00"
        );
    }
}
