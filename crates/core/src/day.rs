//! UTC calendar days.
//!
//! Capacity admission and rate-limit windows are both keyed by the UTC day,
//! so every conversion from an instant goes through [`Day::of`], which
//! normalises the offset first.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time, UtcOffset};

/// A calendar day in UTC.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Day(Date);

impl Day {
    /// The UTC day containing `instant`.
    pub fn of(instant: OffsetDateTime) -> Self {
        Self(instant.to_offset(UtcOffset::UTC).date())
    }

    /// Wrap a calendar date.
    pub fn from_date(date: Date) -> Self {
        Self(date)
    }

    /// Parse a `YYYY-MM-DD` string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Date::parse(s, format_description!("[year]-[month]-[day]"))
            .map(Self)
            .map_err(|e| crate::Error::InvalidDay(format!("{s}: {e}")))
    }

    /// The underlying date.
    pub fn date(&self) -> Date {
        self.0
    }

    /// Midnight UTC at the start of this day.
    pub fn start(&self) -> OffsetDateTime {
        self.0.with_time(Time::MIDNIGHT).assume_utc()
    }

    /// The following day, saturating at the maximum representable date.
    pub fn next(&self) -> Self {
        Self(self.0.next_day().unwrap_or(self.0))
    }

    /// The day `n` days later, saturating at the maximum representable date.
    pub fn plus_days(&self, n: u32) -> Self {
        Self(
            self.0
                .checked_add(time::Duration::days(i64::from(n)))
                .unwrap_or(Date::MAX),
        )
    }

    /// Whole days from `self` to `later` (negative if `later` is earlier).
    pub fn days_until(&self, later: Day) -> i64 {
        (later.0 - self.0).whole_days()
    }
}

/// The next UTC midnight strictly after `now`.
///
/// Daily windows expire here, so a counter created at any moment of a day
/// lives until the day rolls over.
pub fn next_utc_midnight(now: OffsetDateTime) -> OffsetDateTime {
    Day::of(now).next().start()
}

impl From<Date> for Day {
    fn from(date: Date) -> Self {
        Self(date)
    }
}

impl From<Day> for Date {
    fn from(day: Day) -> Self {
        day.0
    }
}

impl fmt::Debug for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Day({self})")
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}",
            self.0.year(),
            u8::from(self.0.month()),
            self.0.day()
        )
    }
}

impl Serialize for Day {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Day {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Day::parse(&s).map_err(serde::de::Error::custom)
    }
}
