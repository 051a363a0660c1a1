//! Absolute ban expiry to the relative `<amount> <unit>` form consoles take.

use std::fmt;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

/// Stand-in expiry for bans without one.
pub const PERMANENT_BAN_EXPIRY: OffsetDateTime = datetime!(2521-01-01 0:00 UTC);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl BanUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            BanUnit::Minute => "minute",
            BanUnit::Hour => "hour",
            BanUnit::Day => "day",
            BanUnit::Week => "week",
            BanUnit::Month => "month",
            BanUnit::Year => "year",
        }
    }

    /// Length of one unit. Months are 30 days, years 365.
    pub fn length(&self) -> Duration {
        match self {
            BanUnit::Minute => Duration::minutes(1),
            BanUnit::Hour => Duration::hours(1),
            BanUnit::Day => Duration::days(1),
            BanUnit::Week => Duration::weeks(1),
            BanUnit::Month => Duration::days(30),
            BanUnit::Year => Duration::days(365),
        }
    }
}

impl fmt::Display for BanUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanDuration {
    pub amount: u64,
    pub unit: BanUnit,
}

impl BanDuration {
    /// Relative duration from `now` until `expires_at`, escalated to the
    /// largest unit that still reads naturally.
    ///
    /// `None` means permanent. An expiry in the past clamps to one minute.
    pub fn until(expires_at: Option<OffsetDateTime>, now: OffsetDateTime) -> Self {
        let remaining = expires_at.unwrap_or(PERMANENT_BAN_EXPIRY) - now;
        let in_units = |unit: BanUnit| remaining.as_seconds_f64() / unit.length().as_seconds_f64();

        let unit = if in_units(BanUnit::Minute) < 60.0 {
            BanUnit::Minute
        } else if in_units(BanUnit::Hour) < 24.0 {
            BanUnit::Hour
        } else if in_units(BanUnit::Day) < 7.0 {
            BanUnit::Day
        } else if in_units(BanUnit::Week) < 4.0 {
            BanUnit::Week
        } else if in_units(BanUnit::Month) < 12.0 {
            BanUnit::Month
        } else {
            BanUnit::Year
        };

        let amount = in_units(unit).round().max(1.0) as u64;
        Self { amount, unit }
    }

    pub fn length(&self) -> Duration {
        self.unit.length() * self.amount as u32
    }
}

/// Whole hours until `expires_at`, rounded up, for consoles that only take hours.
/// At least one.
pub fn whole_hours_until(expires_at: OffsetDateTime, now: OffsetDateTime) -> u64 {
    let secs = (expires_at - now).whole_seconds().max(0) as u64;
    secs.div_ceil(3600).max(1)
}

impl fmt::Display for BanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.unit)
    }
}
