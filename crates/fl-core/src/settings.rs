//! User settings consulted by validation and statistics.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;
use crate::types::ValidationError;

/// How local days and hours are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimezoneMode {
    /// Follow the host's time zone, including DST changes.
    Local,
    /// A fixed offset east of UTC, in seconds.
    FixedOffset { seconds: i32 },
}

/// A time-of-day window such as a sleep or lunch period.
///
/// The window is half-open, `[start, end)`. When `end <= start` the window
/// wraps past midnight (e.g. 23:00–07:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Creates a window from two times of day.
    #[must_use]
    pub const fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Returns whether the window wraps past midnight.
    #[must_use]
    pub fn wraps_midnight(&self) -> bool {
        self.end <= self.start
    }

    /// Returns whether a local time of day falls inside the window.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start == self.end {
            return false;
        }
        if self.wraps_midnight() {
            time >= self.start || time < self.end
        } else {
            time >= self.start && time < self.end
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

impl FromStr for TimeWindow {
    type Err = ValidationError;

    /// Parses `HH:MM-HH:MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| ValidationError::InvalidTimeOfDay {
                value: s.to_string(),
            })?;
        Ok(Self::new(parse_hhmm(start)?, parse_hhmm(end)?))
    }
}

/// Parses an `HH:MM` time of day.
pub fn parse_hhmm(value: &str) -> Result<NaiveTime, ValidationError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| {
        ValidationError::InvalidTimeOfDay {
            value: value.to_string(),
        }
    })
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_hhmm(&s).map_err(serde::de::Error::custom)
    }
}

/// The single user settings record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Daily focus goal in seconds.
    pub daily_focus_goal_secs: i64,
    /// Sleep period; focus candidates touching it are rejected.
    pub sleep_window: TimeWindow,
    /// Optional lunch period; focus candidates touching it are rejected.
    #[serde(default)]
    pub lunch_window: Option<TimeWindow>,
    /// How local days are resolved.
    pub timezone: TimezoneMode,
    /// When set, the sleep window does not apply on Saturdays and Sundays.
    #[serde(default)]
    pub flexible_sleep_days: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            daily_focus_goal_secs: 4 * 3600,
            sleep_window: TimeWindow::new(hm(23, 0), hm(7, 0)),
            lunch_window: Some(TimeWindow::new(hm(12, 0), hm(13, 0))),
            timezone: TimezoneMode::Local,
            flexible_sleep_days: false,
        }
    }
}

impl Settings {
    /// Returns a calendar resolving days in this timezone mode.
    #[must_use]
    pub const fn calendar(&self) -> Calendar {
        Calendar::new(self.timezone)
    }

    /// Returns whether the sleep window applies to the given instant.
    pub fn in_sleep_window(&self, instant: DateTime<Utc>) -> bool {
        let calendar = self.calendar();
        if self.flexible_sleep_days && calendar.is_weekend(instant) {
            return false;
        }
        self.sleep_window.contains(calendar.time_of(instant))
    }

    /// Returns whether the lunch window applies to the given instant.
    pub fn in_lunch_window(&self, instant: DateTime<Utc>) -> bool {
        self.lunch_window
            .is_some_and(|window| window.contains(self.calendar().time_of(instant)))
    }
}

const fn hm(hour: u32, minute: u32) -> NaiveTime {
    match NaiveTime::from_hms_opt(hour, minute, 0) {
        Some(time) => time,
        None => NaiveTime::MIN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn utc_settings() -> Settings {
        Settings {
            timezone: TimezoneMode::FixedOffset { seconds: 0 },
            ..Settings::default()
        }
    }

    #[test]
    fn plain_window_is_half_open() {
        let lunch = TimeWindow::new(t(12, 0), t(13, 0));
        assert!(lunch.contains(t(12, 0)));
        assert!(lunch.contains(t(12, 59)));
        assert!(!lunch.contains(t(13, 0)));
        assert!(!lunch.contains(t(11, 59)));
    }

    #[test]
    fn wrapping_window_spans_midnight() {
        let sleep = TimeWindow::new(t(23, 0), t(7, 0));
        assert!(sleep.wraps_midnight());
        assert!(sleep.contains(t(23, 30)));
        assert!(sleep.contains(t(3, 0)));
        assert!(!sleep.contains(t(7, 0)));
        assert!(!sleep.contains(t(12, 0)));
    }

    #[test]
    fn empty_window_contains_nothing() {
        let window = TimeWindow::new(t(9, 0), t(9, 0));
        assert!(!window.contains(t(9, 0)));
    }

    #[test]
    fn window_parses_and_displays() {
        let window: TimeWindow = "22:30-06:15".parse().unwrap();
        assert_eq!(window, TimeWindow::new(t(22, 30), t(6, 15)));
        assert_eq!(window.to_string(), "22:30-06:15");
        assert!("22:30".parse::<TimeWindow>().is_err());
        assert!("25:00-06:00".parse::<TimeWindow>().is_err());
    }

    #[test]
    fn flexible_sleep_days_skip_weekends() {
        let mut settings = utc_settings();
        // 2025-03-08 is a Saturday.
        let saturday_night = Utc.with_ymd_and_hms(2025, 3, 8, 2, 0, 0).unwrap();
        let monday_night = Utc.with_ymd_and_hms(2025, 3, 10, 2, 0, 0).unwrap();

        assert!(settings.in_sleep_window(saturday_night));
        settings.flexible_sleep_days = true;
        assert!(!settings.in_sleep_window(saturday_night));
        assert!(settings.in_sleep_window(monday_night));
    }

    #[test]
    fn lunch_window_is_optional() {
        let mut settings = utc_settings();
        let noon = Utc.with_ymd_and_hms(2025, 3, 10, 12, 30, 0).unwrap();
        assert!(settings.in_lunch_window(noon));
        settings.lunch_window = None;
        assert!(!settings.in_lunch_window(noon));
    }

    #[test]
    fn settings_serde_roundtrip() {
        let settings = utc_settings();
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"23:00\""));
        assert!(json.contains("\"fixed_offset\""));
        let parsed: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, settings);
    }
}
