//! Local-day arithmetic.
//!
//! Statistics are bucketed by local calendar day and hour. The [`Calendar`]
//! resolves those against either the host time zone or a fixed UTC offset,
//! depending on the user's timezone mode.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime,
    NaiveTime, Offset, TimeZone, Timelike, Utc, Weekday,
};

use crate::settings::TimezoneMode;

/// Resolves UTC instants into local dates and hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    mode: TimezoneMode,
}

impl Calendar {
    /// Creates a calendar for the given timezone mode.
    #[must_use]
    pub const fn new(mode: TimezoneMode) -> Self {
        Self { mode }
    }

    /// A calendar pinned to UTC.
    #[must_use]
    pub const fn utc() -> Self {
        Self::new(TimezoneMode::FixedOffset { seconds: 0 })
    }

    /// Returns the timezone mode this calendar resolves against.
    #[must_use]
    pub const fn mode(&self) -> TimezoneMode {
        self.mode
    }

    /// Converts an instant to local wall-clock time.
    pub fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self.mode {
            TimezoneMode::Local => instant.with_timezone(&Local).naive_local(),
            TimezoneMode::FixedOffset { seconds } => {
                instant.with_timezone(&fixed_offset(seconds)).naive_local()
            }
        }
    }

    /// Returns the local date an instant falls on.
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.local(instant).date()
    }

    /// Returns the local hour (0–23) an instant falls in.
    pub fn hour_of(&self, instant: DateTime<Utc>) -> u32 {
        self.local(instant).hour()
    }

    /// Returns the local time of day of an instant.
    pub fn time_of(&self, instant: DateTime<Utc>) -> NaiveTime {
        self.local(instant).time()
    }

    /// Returns whether an instant falls on a Saturday or Sunday locally.
    pub fn is_weekend(&self, instant: DateTime<Utc>) -> bool {
        is_weekend_date(self.date_of(instant))
    }

    /// Half-open UTC interval covering the local day `[00:00, next 00:00)`.
    pub fn day_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let next = date + Duration::days(1);
        (self.midnight_utc(date), self.midnight_utc(next))
    }

    /// Half-open UTC interval covering `days` local days ending at `last` (inclusive).
    pub fn range_bounds(&self, last: NaiveDate, days: u32) -> (DateTime<Utc>, DateTime<Utc>) {
        let first = last - Duration::days(i64::from(days.max(1)) - 1);
        (self.midnight_utc(first), self.midnight_utc(last + Duration::days(1)))
    }

    /// Converts a local date at midnight to UTC.
    ///
    /// DST ambiguity resolves to the earlier instant; a midnight that falls in
    /// a spring-forward gap resolves to 01:00 local.
    fn midnight_utc(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::MIN);
        match self.mode {
            TimezoneMode::FixedOffset { seconds } => {
                let offset = fixed_offset(seconds);
                (midnight - Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc()
            }
            TimezoneMode::Local => match Local.from_local_datetime(&midnight) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
                LocalResult::None => {
                    let one_am = midnight + Duration::hours(1);
                    match Local.from_local_datetime(&one_am) {
                        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                            dt.with_timezone(&Utc)
                        }
                        LocalResult::None => midnight.and_utc(),
                    }
                }
            },
        }
    }
}

/// Returns whether a date is a Saturday or Sunday.
pub fn is_weekend_date(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Builds a fixed offset, falling back to UTC for out-of-range values.
fn fixed_offset(seconds: i32) -> FixedOffset {
    FixedOffset::east_opt(seconds).unwrap_or_else(|| {
        tracing::warn!(seconds, "fixed UTC offset out of range, using UTC");
        Utc.fix()
    })
}
