use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::*;

pub const MINUTES_PER_DAY: u16 = 1440;

/// Signed offset of a party from UTC, in minutes.
pub type UtcOffsetMinutes = i32;

/// Minutes since local midnight, always in `[0, 1439]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    pub fn new(minutes: i64) -> Result<Self, EngineError> {
        if (0..i64::from(MINUTES_PER_DAY)).contains(&minutes) {
            Ok(Self(minutes as u16))
        } else {
            Err(EngineError::InvalidRange(minutes))
        }
    }

    pub fn from_hm(hour: u32, minute: u32) -> Result<Self, EngineError> {
        if hour > 23 || minute > 59 {
            return Err(EngineError::InvalidRange(i64::from(hour) * 60 + i64::from(minute)));
        }
        Ok(Self((hour * 60 + minute) as u16))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    pub fn minute(self) -> u16 {
        self.0 % 60
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

pub fn validate_offset(offset: UtcOffsetMinutes) -> Result<(), EngineError> {
    if (MIN_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&offset) {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(format!("utc offset {offset} out of range")))
    }
}

// ── Business calendar ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open: TimeOfDay,
    pub close: TimeOfDay,
}

impl DayHours {
    pub fn new(open: TimeOfDay, close: TimeOfDay) -> Result<Self, EngineError> {
        if open >= close {
            return Err(EngineError::InvalidInput(format!(
                "opening time {open} must be before closing time {close}"
            )));
        }
        Ok(Self { open, close })
    }

    pub fn length_minutes(&self) -> u16 {
        self.close.minutes() - self.open.minutes()
    }
}

/// Weekly opening hours and booking horizon, read-only to the booking core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessCalendar {
    /// Indexed Monday (0) through Sunday (6). `None` means closed.
    pub hours: [Option<DayHours>; 7],
    pub min_notice_days: u32,
    pub max_notice_days: u32,
    pub utc_offset_minutes: UtcOffsetMinutes,
    /// Candidate start-time granularity.
    pub slot_minutes: u16,
}

impl BusinessCalendar {
    pub fn new(utc_offset_minutes: UtcOffsetMinutes, min_notice_days: u32, max_notice_days: u32, slot_minutes: u16) -> Self {
        Self {
            hours: [None; 7],
            min_notice_days,
            max_notice_days,
            utc_offset_minutes,
            slot_minutes,
        }
    }

    pub fn with_hours(mut self, weekday: chrono::Weekday, hours: DayHours) -> Self {
        self.hours[weekday.num_days_from_monday() as usize] = Some(hours);
        self
    }

    pub fn hours_on(&self, date: NaiveDate) -> Option<DayHours> {
        self.hours[date.weekday().num_days_from_monday() as usize]
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        validate_offset(self.utc_offset_minutes)?;
        if self.min_notice_days > self.max_notice_days {
            return Err(EngineError::InvalidInput(
                "min_notice_days must not exceed max_notice_days".into(),
            ));
        }
        if self.max_notice_days > MAX_NOTICE_DAYS {
            return Err(EngineError::LimitExceeded("notice window too long"));
        }
        if self.slot_minutes == 0 || self.slot_minutes > MAX_SLOT_MINUTES {
            return Err(EngineError::InvalidInput(format!(
                "slot granularity {} out of range",
                self.slot_minutes
            )));
        }
        for day in self.hours.iter().flatten() {
            if day.open >= day.close {
                return Err(EngineError::InvalidInput("opening time must precede closing time".into()));
            }
        }
        Ok(())
    }
}

/// Lead-time rule before an event start, below which changes are refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReschedulePolicy {
    pub min_lead_time_hours: u32,
    /// Cancellation-specific lead time; falls back to `min_lead_time_hours`.
    pub cancel_lead_time_hours: Option<u32>,
}

impl ReschedulePolicy {
    pub fn new(min_lead_time_hours: u32) -> Self {
        Self {
            min_lead_time_hours,
            cancel_lead_time_hours: None,
        }
    }

    pub fn lead_time_for(&self, purpose: ChallengePurpose) -> u32 {
        match purpose {
            ChallengePurpose::Cancel => self.cancel_lead_time_hours.unwrap_or(self.min_lead_time_hours),
            ChallengePurpose::Reschedule => self.min_lead_time_hours,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let longest = self.min_lead_time_hours.max(self.cancel_lead_time_hours.unwrap_or(0));
        if longest > MAX_LEAD_TIME_HOURS {
            return Err(EngineError::LimitExceeded("lead time too long"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
    pub duration_minutes: u32,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for BookingStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" | "canceled" => Ok(BookingStatus::Cancelled),
            other => Err(EngineError::InvalidInput(format!("unknown booking status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl Contact {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            phone: None,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(EngineError::InvalidInput(format!("invalid email: {email:?}")));
        }
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        if self.name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(EngineError::LimitExceeded("contact name too long"));
        }
        if self.phone.as_ref().is_some_and(|p| p.len() > MAX_PHONE_LEN) {
            return Err(EngineError::LimitExceeded("phone too long"));
        }
        Ok(())
    }

    /// Emails compare case-insensitively, ignoring surrounding whitespace.
    pub fn email_matches(&self, other: &str) -> bool {
        self.email.trim().eq_ignore_ascii_case(other.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub business_id: Ulid,
    pub event_date_utc: NaiveDate,
    /// Start time in UTC.
    pub event_time_minutes: TimeOfDay,
    pub duration_minutes: u32,
    pub status: BookingStatus,
    pub contact: Contact,
    /// Bumped on every committed mutation.
    pub version: u64,
    pub reschedule_reason: Option<String>,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }
}

// ── Availability ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    /// Overlaps an existing pending or confirmed booking.
    Booked,
    /// Starts at or before the current instant.
    Elapsed,
}

impl BlockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockReason::Booked => "booked",
            BlockReason::Elapsed => "elapsed",
        }
    }
}

/// Why a whole day has no candidate slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unavailable {
    OutsideNoticeWindow,
    Closed,
    /// The requested duration does not fit inside the day's opening hours.
    DoesNotFit,
}

impl Unavailable {
    pub fn as_str(self) -> &'static str {
        match self {
            Unavailable::OutsideNoticeWindow => "outside_notice_window",
            Unavailable::Closed => "closed",
            Unavailable::DoesNotFit => "does_not_fit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedSlot {
    pub start: TimeOfDay,
    pub reason: BlockReason,
}

/// Candidate start times for one business-local date, partitioned into
/// available and blocked. Both lists are sorted by start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSet {
    pub date: NaiveDate,
    pub duration_minutes: u32,
    pub available: Vec<TimeOfDay>,
    pub blocked: Vec<BlockedSlot>,
    pub reason: Option<Unavailable>,
}

impl SlotSet {
    pub fn empty(date: NaiveDate, duration_minutes: u32, reason: Unavailable) -> Self {
        Self {
            date,
            duration_minutes,
            available: Vec::new(),
            blocked: Vec::new(),
            reason: Some(reason),
        }
    }

    pub fn is_available(&self, start: TimeOfDay) -> bool {
        self.available.binary_search(&start).is_ok()
    }

    pub fn blocked_reason(&self, start: TimeOfDay) -> Option<BlockReason> {
        self.blocked
            .binary_search_by_key(&start, |b| b.start)
            .ok()
            .map(|i| self.blocked[i].reason)
    }
}

// ── Waitlist ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitlistSelection {
    Single(TimeOfDay),
    Multiple(Vec<TimeOfDay>),
    Range(TimeOfDay, TimeOfDay),
    All,
}

impl WaitlistSelection {
    pub fn mode(&self) -> &'static str {
        match self {
            WaitlistSelection::Single(_) => "single",
            WaitlistSelection::Multiple(_) => "multiple",
            WaitlistSelection::Range(..) => "range",
            WaitlistSelection::All => "all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub business_id: Ulid,
    pub contact_email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub event_date_utc: NaiveDate,
    pub event_time_minutes: TimeOfDay,
    pub duration_minutes: u32,
}

impl WaitlistEntry {
    pub fn same_slot(&self, other: &WaitlistEntry) -> bool {
        self.contact_email.eq_ignore_ascii_case(&other.contact_email)
            && self.event_date_utc == other.event_date_utc
            && self.event_time_minutes == other.event_time_minutes
    }
}

// ── Identity challenges ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengePurpose {
    Cancel,
    Reschedule,
}

impl ChallengePurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengePurpose::Cancel => "cancel",
            ChallengePurpose::Reschedule => "reschedule",
        }
    }
}

impl FromStr for ChallengePurpose {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cancel" => Ok(ChallengePurpose::Cancel),
            "reschedule" => Ok(ChallengePurpose::Reschedule),
            other => Err(EngineError::InvalidInput(format!("unknown purpose: {other}"))),
        }
    }
}

// ── Journal records ──────────────────────────────────────────────

/// Journal record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BusinessRegistered {
        id: Ulid,
        name: Option<String>,
        calendar: BusinessCalendar,
        policy: ReschedulePolicy,
    },
    CalendarUpdated {
        id: Ulid,
        calendar: BusinessCalendar,
    },
    PolicyUpdated {
        id: Ulid,
        policy: ReschedulePolicy,
    },
    ServiceAdded {
        service: Service,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingRescheduled {
        id: Ulid,
        business_id: Ulid,
        event_date_utc: NaiveDate,
        event_time_minutes: TimeOfDay,
        reason: Option<String>,
    },
    BookingCancelled {
        id: Ulid,
        business_id: Ulid,
    },
    WaitlistJoined {
        business_id: Ulid,
        entries: Vec<WaitlistEntry>,
    },
    /// Entries starting at or before `cutoff` were dropped.
    WaitlistExpired {
        business_id: Ulid,
        cutoff: DateTime<Utc>,
    },
}

impl Event {
    pub fn business_id(&self) -> Ulid {
        match self {
            Event::BusinessRegistered { id, .. }
            | Event::CalendarUpdated { id, .. }
            | Event::PolicyUpdated { id, .. } => *id,
            Event::ServiceAdded { service } => service.business_id,
            Event::BookingCreated { booking } => booking.business_id,
            Event::BookingRescheduled { business_id, .. }
            | Event::BookingCancelled { business_id, .. }
            | Event::WaitlistJoined { business_id, .. }
            | Event::WaitlistExpired { business_id, .. } => *business_id,
        }
    }
}

// ── Business-side notifications ──────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    BookingCreated {
        booking: Booking,
    },
    BookingRescheduled {
        booking: Booking,
        previous_date_utc: NaiveDate,
        previous_time_minutes: TimeOfDay,
    },
    BookingCancelled {
        booking: Booking,
    },
    /// A booked interval was vacated; `waitlisted` holds the entries whose
    /// slot overlaps it.
    SlotFreed {
        business_id: Ulid,
        event_date_utc: NaiveDate,
        event_time_minutes: TimeOfDay,
        duration_minutes: u32,
        waitlisted: Vec<WaitlistEntry>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub calendar: BusinessCalendar,
    pub policy: ReschedulePolicy,
    pub service_count: usize,
    pub booking_count: usize,
}
