use chrono::{DateTime, Duration, Utc};

use crate::clock::to_utc_instant;
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    AlreadyCancelled,
    EventAlreadyPassed,
    WithinLockoutWindow { hours: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenyReason),
}

impl Decision {
    pub fn into_result(self) -> Result<(), DenyReason> {
        match self {
            Decision::Allowed => Ok(()),
            Decision::Denied(reason) => Err(reason),
        }
    }
}

/// Absolute start of a booking. Bookings are stored in UTC.
pub fn event_start(booking: &Booking) -> DateTime<Utc> {
    to_utc_instant(booking.event_date_utc, booking.event_time_minutes, 0)
}

/// Whether `booking` may still be cancelled or rescheduled at `now`.
pub fn can_mutate(
    booking: &Booking,
    policy: &ReschedulePolicy,
    purpose: ChallengePurpose,
    now: DateTime<Utc>,
) -> Decision {
    if booking.status == BookingStatus::Cancelled {
        return Decision::Denied(DenyReason::AlreadyCancelled);
    }
    let start = event_start(booking);
    if start <= now {
        return Decision::Denied(DenyReason::EventAlreadyPassed);
    }
    let hours = policy.lead_time_for(purpose);
    if start - now < Duration::hours(i64::from(hours)) {
        return Decision::Denied(DenyReason::WithinLockoutWindow { hours });
    }
    Decision::Allowed
}
