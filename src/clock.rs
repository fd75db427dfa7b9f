//! Clock arithmetic between local minutes-of-day, UTC instants and fixed
//! UTC offsets.
//!
//! Offsets are treated as constant for the instant being converted: there is
//! no DST transition table, so a business whose offset changes seasonally must
//! have its calendar offset updated when the change happens.

use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};

use crate::engine::EngineError;
use crate::model::{MINUTES_PER_DAY, TimeOfDay, UtcOffsetMinutes};

/// Combine a local date and time-of-day under `offset` into a UTC instant.
/// Panics for dates at the edge of chrono's range; input dates go through
/// `checked_to_utc_instant` first.
pub fn to_utc_instant(date: NaiveDate, time: TimeOfDay, offset: UtcOffsetMinutes) -> DateTime<Utc> {
    let local_midnight = date.and_time(NaiveTime::MIN);
    (local_midnight + Duration::minutes(i64::from(time.minutes()) - i64::from(offset))).and_utc()
}

/// `to_utc_instant` that returns `None` when the result is not representable.
pub fn checked_to_utc_instant(date: NaiveDate, time: TimeOfDay, offset: UtcOffsetMinutes) -> Option<DateTime<Utc>> {
    let local_midnight = date.and_time(NaiveTime::MIN);
    local_midnight
        .checked_add_signed(Duration::minutes(i64::from(time.minutes()) - i64::from(offset)))
        .map(|dt| dt.and_utc())
}

/// Split a UTC instant into the local date and time-of-day seen under `offset`.
/// Seconds are truncated.
pub fn from_utc_instant(instant: DateTime<Utc>, offset: UtcOffsetMinutes) -> (NaiveDate, TimeOfDay) {
    let local = instant.naive_utc() + Duration::minutes(i64::from(offset));
    let minutes = local.hour() * 60 + local.minute();
    // hour() <= 23 and minute() <= 59, so this is always in range
    let time = TimeOfDay::new(i64::from(minutes)).unwrap_or(TimeOfDay::MIDNIGHT);
    (local.date(), time)
}

/// The business-local calendar date containing `instant`.
pub fn local_date(instant: DateTime<Utc>, offset: UtcOffsetMinutes) -> NaiveDate {
    from_utc_instant(instant, offset).0
}

/// Result of shifting a time-of-day into another zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertedTime {
    pub time: TimeOfDay,
    /// Calendar days the conversion moved across: -1 means the previous day
    /// in the target zone, +1 the next.
    pub day_shift: i32,
}

impl ConvertedTime {
    pub fn crosses_midnight(&self) -> bool {
        self.day_shift != 0
    }

    /// Apply the day shift to the source calendar date.
    pub fn shift_date(&self, date: NaiveDate) -> NaiveDate {
        date + Duration::days(i64::from(self.day_shift))
    }
}

/// Shift a time-of-day from `source` offset to `target` offset.
pub fn convert_time_of_day(time: TimeOfDay, source: UtcOffsetMinutes, target: UtcOffsetMinutes) -> ConvertedTime {
    let day = i32::from(MINUTES_PER_DAY);
    let raw = i32::from(time.minutes()) + (target - source);
    let minutes = raw.rem_euclid(day);
    ConvertedTime {
        time: TimeOfDay::new(i64::from(minutes)).unwrap_or(TimeOfDay::MIDNIGHT),
        day_shift: raw.div_euclid(day),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HourFormat {
    #[default]
    TwentyFourHour,
    TwelveHour,
}

/// Render minutes since midnight as `HH:MM` or `h:MM AM/PM`.
pub fn format_time_of_day(minutes: i64, format: HourFormat) -> Result<String, EngineError> {
    let time = TimeOfDay::new(minutes)?;
    Ok(match format {
        HourFormat::TwentyFourHour => time.to_string(),
        HourFormat::TwelveHour => {
            let suffix = if time.hour() < 12 { "AM" } else { "PM" };
            let hour = match time.hour() % 12 {
                0 => 12,
                h => h,
            };
            format!("{hour}:{:02} {suffix}", time.minute())
        }
    })
}

/// Parse `HH:MM` (24-hour) into a time-of-day.
pub fn parse_time_of_day(s: &str) -> Result<TimeOfDay, EngineError> {
    let (h, m) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| EngineError::InvalidInput(format!("expected HH:MM, got {s:?}")))?;
    let hour: u32 = h
        .parse()
        .map_err(|_| EngineError::InvalidInput(format!("bad hour in {s:?}")))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| EngineError::InvalidInput(format!("bad minute in {s:?}")))?;
    TimeOfDay::from_hm(hour, minute)
}

// ── Clock sources ────────────────────────────────────────────────

/// Source of "now" for the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for simulations and tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
