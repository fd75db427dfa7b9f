use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::clock::{local_date, to_utc_instant};
use crate::model::*;

// ── Slot computation ──────────────────────────────────────────────

/// Inputs for one availability computation.
pub struct SlotQuery<'a> {
    /// Business-local calendar date.
    pub date: NaiveDate,
    pub calendar: &'a BusinessCalendar,
    pub duration_minutes: u32,
    /// Bookings that may overlap the date. Cancelled ones are ignored.
    pub bookings: &'a [Booking],
    pub now: DateTime<Utc>,
}

/// Half-open UTC interval of a booking.
pub fn booking_interval(booking: &Booking) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = to_utc_instant(booking.event_date_utc, booking.event_time_minutes, 0);
    (start, start + Duration::minutes(i64::from(booking.duration_minutes)))
}

/// Whether `date` lies within the business-local notice window seen at `now`.
pub fn within_notice_window(calendar: &BusinessCalendar, date: NaiveDate, now: DateTime<Utc>) -> bool {
    let today = local_date(now, calendar.utc_offset_minutes);
    let earliest = today + Duration::days(i64::from(calendar.min_notice_days));
    let latest = today + Duration::days(i64::from(calendar.max_notice_days));
    date >= earliest && date <= latest
}

/// Enumerate candidate starts for the day at calendar granularity such that
/// `start + duration <= close`.
pub fn candidate_starts(hours: &DayHours, slot_minutes: u16, duration_minutes: u32) -> Vec<TimeOfDay> {
    let close = u32::from(hours.close.minutes());
    let step = u32::from(slot_minutes.max(1));
    let mut out = Vec::new();
    let mut start = u32::from(hours.open.minutes());
    while start + duration_minutes <= close {
        if let Ok(t) = TimeOfDay::new(i64::from(start)) {
            out.push(t);
        }
        start += step;
    }
    out
}

/// Partition the day's candidate starts into available and blocked.
///
/// 1. Outside the notice window (business-local calendar) → empty.
/// 2. Closed weekday → empty.
/// 3. Duration longer than the opening hours → empty, not an error.
/// 4. Candidates starting at or before `now` are `Elapsed`.
/// 5. Candidates whose `[start, start + duration)` intersects any active
///    booking interval are `Booked`.
pub fn compute_slots(query: &SlotQuery<'_>) -> SlotSet {
    let SlotQuery { date, calendar, duration_minutes, bookings, now } = *query;

    if !within_notice_window(calendar, date, now) {
        return SlotSet::empty(date, duration_minutes, Unavailable::OutsideNoticeWindow);
    }
    let Some(hours) = calendar.hours_on(date) else {
        return SlotSet::empty(date, duration_minutes, Unavailable::Closed);
    };
    let candidates = candidate_starts(&hours, calendar.slot_minutes, duration_minutes);
    if candidates.is_empty() {
        return SlotSet::empty(date, duration_minutes, Unavailable::DoesNotFit);
    }

    let length = Duration::minutes(i64::from(duration_minutes));
    let mut occupied: Vec<(DateTime<Utc>, DateTime<Utc>)> = bookings
        .iter()
        .filter(|b| b.is_active())
        .map(booking_interval)
        .collect();
    occupied.sort_by_key(|iv| iv.0);

    let mut available = Vec::new();
    let mut blocked = Vec::new();
    for start in candidates {
        let slot_start = to_utc_instant(date, start, calendar.utc_offset_minutes);
        let slot_end = slot_start + length;
        if slot_start <= now {
            blocked.push(BlockedSlot { start, reason: BlockReason::Elapsed });
            continue;
        }
        // Intervals starting at or after slot_end can't intersect.
        let right = occupied.partition_point(|iv| iv.0 < slot_end);
        let overlaps = occupied[..right].iter().any(|iv| iv.1 > slot_start);
        if overlaps {
            blocked.push(BlockedSlot { start, reason: BlockReason::Booked });
        } else {
            available.push(start);
        }
    }

    SlotSet {
        date,
        duration_minutes,
        available,
        blocked,
        reason: None,
    }
}
