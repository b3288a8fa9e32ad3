//! Recurrence rules
//!
//! An [`RITiming`] describes when an action timing fires: a set of calendar
//! constraints (years, months, month days, week days) plus a start time that is
//! either `*asap`, a clock time with optional wildcards, or a one-shot delay.
//! All computation happens in UTC with one-second resolution.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;
use crate::AppResult;

pub const ASAP: &str = "*asap";
pub const EVERY_MINUTE: &str = "*every_minute";
pub const HOURLY: &str = "*hourly";
pub const DAILY: &str = "*daily";
pub const WEEKLY: &str = "*weekly";
pub const MONTHLY: &str = "*monthly";
pub const MONTHLY_ESTIMATED: &str = "*monthly_estimated";
pub const MONTH_END: &str = "*month_end";
pub const YEARLY: &str = "*yearly";

/// How far ahead an open-ended rule is searched
const SEARCH_HORIZON_DAYS: i64 = 366 * 8;

/// Number of days in the given month
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(31, |d| d.day())
}

/// Round up to the next whole second
fn ceil_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = t.timestamp_subsec_nanos();
    if nanos == 0 {
        t
    } else {
        t - Duration::nanoseconds(nanos as i64) + Duration::seconds(1)
    }
}

/// Time-of-day part of a timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartTime {
    /// Fires immediately, never queued for later
    Asap,
    /// Clock time, `None` components are wildcards
    Clock {
        hour: Option<u32>,
        minute: Option<u32>,
        second: Option<u32>,
    },
    /// Fires once, this long after the first evaluation
    Delayed(Duration),
}

impl StartTime {
    pub fn at(hour: u32, minute: u32, second: u32) -> Self {
        StartTime::Clock {
            hour: Some(hour),
            minute: Some(minute),
            second: Some(second),
        }
    }

    /// Earliest clock time matching the pattern at or after `min`
    fn earliest(
        hour: Option<u32>,
        minute: Option<u32>,
        second: Option<u32>,
        min: Option<NaiveTime>,
    ) -> Option<NaiveTime> {
        let hours: Vec<u32> = hour.map_or_else(|| (0..24).collect(), |h| vec![h]);
        let minutes: Vec<u32> = minute.map_or_else(|| (0..60).collect(), |m| vec![m]);
        let seconds: Vec<u32> = second.map_or_else(|| (0..60).collect(), |s| vec![s]);

        for &h in &hours {
            if let Some(min) = min {
                if h < min.hour() {
                    continue;
                }
            }
            for &m in &minutes {
                if let Some(min) = min {
                    if h == min.hour() && m < min.minute() {
                        continue;
                    }
                }
                for &s in &seconds {
                    let t = NaiveTime::from_hms_opt(h, m, s)?;
                    if min.map_or(true, |min| t >= min) {
                        return Some(t);
                    }
                }
            }
        }
        None
    }
}

fn parse_clock_part(part: &str, max: u32) -> AppResult<Option<u32>> {
    if part == "*" {
        return Ok(None);
    }
    let value: u32 = part
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("invalid start time component: {}", part)))?;
    if value > max {
        return Err(AppError::InvalidInput(format!(
            "start time component out of range: {}",
            part
        )));
    }
    Ok(Some(value))
}

/// Parse `1h30m`, `45s`, `500ms` style durations
fn parse_duration(s: &str) -> AppResult<Duration> {
    let invalid = || AppError::InvalidInput(format!("invalid duration: {}", s));
    let mut total = Duration::zero();
    let mut rest = s;
    if rest.is_empty() {
        return Err(invalid());
    }
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: i64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let step = match &rest[..unit_len] {
            "h" => Duration::try_hours(amount),
            "m" => Duration::try_minutes(amount),
            "s" => Duration::try_seconds(amount),
            "ms" => Duration::try_milliseconds(amount),
            _ => return Err(invalid()),
        }
        .ok_or_else(invalid)?;
        total = total.checked_add(&step).ok_or_else(invalid)?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

impl FromStr for StartTime {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == ASAP {
            return Ok(StartTime::Asap);
        }
        if let Some(delay) = s.strip_prefix('+') {
            return Ok(StartTime::Delayed(parse_duration(delay)?));
        }
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [h, m, sec] => Ok(StartTime::Clock {
                hour: parse_clock_part(h, 23)?,
                minute: parse_clock_part(m, 59)?,
                second: parse_clock_part(sec, 59)?,
            }),
            [h, m] => Ok(StartTime::Clock {
                hour: parse_clock_part(h, 23)?,
                minute: parse_clock_part(m, 59)?,
                second: Some(0),
            }),
            _ => Err(AppError::InvalidInput(format!("invalid start time: {}", s))),
        }
    }
}

impl fmt::Display for StartTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn part(v: &Option<u32>) -> String {
            v.map_or_else(|| "*".to_string(), |v| format!("{:02}", v))
        }
        match self {
            StartTime::Asap => f.write_str(ASAP),
            StartTime::Clock {
                hour,
                minute,
                second,
            } => write!(f, "{}:{}:{}", part(hour), part(minute), part(second)),
            StartTime::Delayed(d) => write!(f, "+{}ms", d.num_milliseconds()),
        }
    }
}

impl Serialize for StartTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StartTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Recurrence rule attached to an action timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RITiming {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub years: Vec<i32>,
    #[serde(default)]
    pub months: Vec<u32>,
    /// Negative values count from the end of the month, `-1` is the last day
    #[serde(default)]
    pub month_days: Vec<i32>,
    #[serde(default)]
    pub week_days: Vec<Weekday>,
    pub start_time: StartTime,
}

impl RITiming {
    pub fn asap() -> Self {
        Self::with_start(ASAP, StartTime::Asap)
    }

    fn with_start(id: &str, start_time: StartTime) -> Self {
        Self {
            id: id.to_string(),
            years: Vec::new(),
            months: Vec::new(),
            month_days: Vec::new(),
            week_days: Vec::new(),
            start_time,
        }
    }

    /// Expand a shortcut timing relative to `now`
    pub fn from_shortcut(name: &str, now: DateTime<Utc>) -> Option<Self> {
        let clock = StartTime::at(now.hour(), now.minute(), now.second());
        let timing = match name {
            ASAP => Self::asap(),
            EVERY_MINUTE => Self::with_start(
                name,
                StartTime::Clock {
                    hour: None,
                    minute: None,
                    second: Some(now.second()),
                },
            ),
            HOURLY => Self::with_start(
                name,
                StartTime::Clock {
                    hour: None,
                    minute: Some(now.minute()),
                    second: Some(now.second()),
                },
            ),
            DAILY => Self::with_start(name, clock),
            WEEKLY => Self {
                week_days: vec![now.weekday()],
                ..Self::with_start(name, clock)
            },
            MONTHLY | MONTHLY_ESTIMATED => Self {
                month_days: vec![now.day() as i32],
                ..Self::with_start(name, clock)
            },
            MONTH_END => Self {
                month_days: vec![-1],
                ..Self::with_start(name, clock)
            },
            YEARLY => Self {
                months: vec![now.month()],
                month_days: vec![now.day() as i32],
                ..Self::with_start(name, clock)
            },
            _ => return None,
        };
        Some(timing)
    }

    pub fn is_asap(&self) -> bool {
        self.start_time == StartTime::Asap
    }

    /// One-shot timings keep their first computed start time
    pub fn is_one_shot(&self) -> bool {
        matches!(self.start_time, StartTime::Delayed(_))
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.months.iter().any(|m| !(1..=12).contains(m)) {
            return Err(AppError::Validation(format!(
                "timing {}: months must be within 1..=12",
                self.id
            )));
        }
        if self
            .month_days
            .iter()
            .any(|d| *d == 0 || !(-31..=31).contains(d))
        {
            return Err(AppError::Validation(format!(
                "timing {}: month days must be within -31..=31 and non-zero",
                self.id
            )));
        }
        Ok(())
    }

    /// First instant at or after `from` that satisfies the rule
    ///
    /// Returns `None` when the rule has no occurrence left within the search
    /// horizon (e.g. all listed years are in the past).
    pub fn next_occurrence(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.start_time {
            StartTime::Asap => Some(from),
            StartTime::Delayed(delay) => from.checked_add_signed(*delay),
            StartTime::Clock {
                hour,
                minute,
                second,
            } => self.next_clock_occurrence(from, *hour, *minute, *second),
        }
    }

    fn next_clock_occurrence(
        &self,
        from: DateTime<Utc>,
        hour: Option<u32>,
        minute: Option<u32>,
        second: Option<u32>,
    ) -> Option<DateTime<Utc>> {
        let from = ceil_to_second(from);
        let (months, month_days) = self.normalized();

        let first_day = from.date_naive();
        let last_day = match self.years.iter().max() {
            Some(year) => NaiveDate::from_ymd_opt(*year, 12, 31)?,
            None => first_day.checked_add_signed(Duration::days(SEARCH_HORIZON_DAYS))?,
        };

        let mut day = first_day;
        while day <= last_day {
            if !self.years.is_empty() && !self.years.contains(&day.year()) {
                // jump to January 1st of the next listed year
                let next_year = self.years.iter().filter(|y| **y > day.year()).min()?;
                day = NaiveDate::from_ymd_opt(*next_year, 1, 1)?;
                continue;
            }
            if self.day_matches(day, &months, &month_days) {
                let min = (day == first_day).then(|| from.time());
                if let Some(t) = StartTime::earliest(hour, minute, second, min) {
                    return Some(day.and_time(t).and_utc());
                }
            }
            day = day.succ_opt()?;
        }
        None
    }

    /// Apply the calendar defaults: years alone mean January, months alone mean the 1st
    fn normalized(&self) -> (Vec<u32>, Vec<i32>) {
        let mut months = self.months.clone();
        let mut month_days = self.month_days.clone();
        if self.week_days.is_empty() && month_days.is_empty() {
            if months.is_empty() && !self.years.is_empty() {
                months.push(1);
            }
            if !months.is_empty() {
                month_days.push(1);
            }
        }
        (months, month_days)
    }

    fn day_matches(&self, day: NaiveDate, months: &[u32], month_days: &[i32]) -> bool {
        if !months.is_empty() && !months.contains(&day.month()) {
            return false;
        }
        if !month_days.is_empty() {
            let last = days_in_month(day.year(), day.month()) as i32;
            let dom = day.day() as i32;
            let estimated = self.id == MONTHLY_ESTIMATED;
            let hit = month_days.iter().any(|&md| {
                if md < 0 {
                    last + 1 + md == dom
                } else if estimated {
                    md.min(last) == dom
                } else {
                    md == dom
                }
            });
            if !hit {
                return false;
            }
        }
        self.week_days.is_empty() || self.week_days.contains(&day.weekday())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn daily_at(h: u32, m: u32, s: u32) -> RITiming {
        RITiming {
            start_time: StartTime::at(h, m, s),
            ..RITiming::asap()
        }
    }

    #[test]
    fn test_parse_start_time() {
        assert_eq!("*asap".parse::<StartTime>().unwrap(), StartTime::Asap);
        assert_eq!(
            "10:30:00".parse::<StartTime>().unwrap(),
            StartTime::at(10, 30, 0)
        );
        assert_eq!(
            "*:15:00".parse::<StartTime>().unwrap(),
            StartTime::Clock {
                hour: None,
                minute: Some(15),
                second: Some(0)
            }
        );
        assert_eq!(
            "+1h30m".parse::<StartTime>().unwrap(),
            StartTime::Delayed(Duration::minutes(90))
        );
        assert!("25:00:00".parse::<StartTime>().is_err());
        assert!("+1x".parse::<StartTime>().is_err());
    }

    #[test]
    fn test_start_time_serde_roundtrip() {
        let timing = daily_at(8, 0, 0);
        let json = serde_json::to_string(&timing).unwrap();
        assert!(json.contains("\"08:00:00\""));
        let back: RITiming = serde_json::from_str(&json).unwrap();
        assert_eq!(back, timing);
    }

    #[test]
    fn test_daily_next_occurrence() {
        let timing = daily_at(10, 0, 0);
        assert_eq!(
            timing.next_occurrence(utc(2024, 1, 1, 9, 0, 0)),
            Some(utc(2024, 1, 1, 10, 0, 0))
        );
        assert_eq!(
            timing.next_occurrence(utc(2024, 1, 1, 10, 0, 0)),
            Some(utc(2024, 1, 1, 10, 0, 0))
        );
        assert_eq!(
            timing.next_occurrence(utc(2024, 1, 1, 10, 0, 1)),
            Some(utc(2024, 1, 2, 10, 0, 0))
        );
    }

    #[test]
    fn test_subsecond_from_rounds_up() {
        let timing = daily_at(10, 0, 0);
        let from = utc(2024, 1, 1, 10, 0, 0) + Duration::nanoseconds(1);
        assert_eq!(timing.next_occurrence(from), Some(utc(2024, 1, 2, 10, 0, 0)));
    }

    #[test]
    fn test_hourly_wildcard() {
        let timing = RITiming {
            start_time: "*:30:00".parse().unwrap(),
            ..RITiming::asap()
        };
        assert_eq!(
            timing.next_occurrence(utc(2024, 1, 1, 9, 45, 0)),
            Some(utc(2024, 1, 1, 10, 30, 0))
        );
        assert_eq!(
            timing.next_occurrence(utc(2024, 1, 1, 23, 45, 0)),
            Some(utc(2024, 1, 2, 0, 30, 0))
        );
    }

    #[test]
    fn test_month_end() {
        let timing = RITiming::from_shortcut(MONTH_END, utc(2024, 1, 5, 0, 0, 0)).unwrap();
        assert_eq!(
            timing.next_occurrence(utc(2024, 2, 1, 0, 0, 0)),
            Some(utc(2024, 2, 29, 0, 0, 0))
        );
    }

    #[test]
    fn test_monthly_estimated_clamps_day() {
        let created = utc(2024, 1, 31, 12, 0, 0);
        let estimated = RITiming::from_shortcut(MONTHLY_ESTIMATED, created).unwrap();
        assert_eq!(
            estimated.next_occurrence(utc(2024, 2, 1, 0, 0, 0)),
            Some(utc(2024, 2, 29, 12, 0, 0))
        );

        let monthly = RITiming::from_shortcut(MONTHLY, created).unwrap();
        assert_eq!(
            monthly.next_occurrence(utc(2024, 2, 1, 0, 0, 0)),
            Some(utc(2024, 3, 31, 12, 0, 0))
        );
    }

    #[test]
    fn test_weekly() {
        // 2024-01-01 is a Monday
        let timing = RITiming::from_shortcut(WEEKLY, utc(2024, 1, 1, 8, 0, 0)).unwrap();
        assert_eq!(
            timing.next_occurrence(utc(2024, 1, 2, 0, 0, 0)),
            Some(utc(2024, 1, 8, 8, 0, 0))
        );
    }

    #[test]
    fn test_years_normalization() {
        let timing = RITiming {
            years: vec![2025],
            ..daily_at(0, 0, 0)
        };
        assert_eq!(
            timing.next_occurrence(utc(2024, 6, 1, 0, 0, 0)),
            Some(utc(2025, 1, 1, 0, 0, 0))
        );
        assert_eq!(timing.next_occurrence(utc(2025, 1, 1, 0, 0, 1)), None);
    }

    #[test]
    fn test_months_normalization() {
        let timing = RITiming {
            months: vec![3],
            ..daily_at(0, 0, 0)
        };
        assert_eq!(
            timing.next_occurrence(utc(2024, 1, 15, 0, 0, 0)),
            Some(utc(2024, 3, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_delayed_and_asap() {
        let from = utc(2024, 1, 1, 0, 0, 0);
        let delayed = RITiming {
            start_time: "+10m".parse().unwrap(),
            ..RITiming::asap()
        };
        assert!(delayed.is_one_shot());
        assert_eq!(delayed.next_occurrence(from), Some(utc(2024, 1, 1, 0, 10, 0)));
        assert_eq!(RITiming::asap().next_occurrence(from), Some(from));
    }

    #[test]
    fn test_out_of_range_delay_rejected() {
        for input in [
            "+9999999999999999h",
            "+9223372036854775807s",
            "+2000000000000h2000000000000h",
        ] {
            let err = input.parse::<StartTime>().unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)), "{}", input);
        }

        // A representable delay past the calendar range has no occurrence
        let delayed = RITiming {
            start_time: StartTime::Delayed(Duration::days(365 * 300_000)),
            ..RITiming::asap()
        };
        assert_eq!(delayed.next_occurrence(utc(2024, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn test_validate() {
        let bad = RITiming {
            months: vec![13],
            ..RITiming::asap()
        };
        assert!(bad.validate().is_err());
        let bad_day = RITiming {
            month_days: vec![0],
            ..RITiming::asap()
        };
        assert!(bad_day.validate().is_err());
        assert!(RITiming::from_shortcut(MONTH_END, Utc::now())
            .unwrap()
            .validate()
            .is_ok());
    }
}
