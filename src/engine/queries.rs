use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::{convert_time_of_day, from_utc_instant, to_utc_instant};
use crate::model::*;

use super::{Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Available,
    Blocked(BlockReason),
}

impl SlotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Blocked(reason) => reason.as_str(),
        }
    }
}

/// One candidate slot as a client in another zone sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotView {
    /// Start in the business's local frame.
    pub start: TimeOfDay,
    pub client_date: NaiveDate,
    pub client_time: TimeOfDay,
    pub status: SlotStatus,
}

/// Merge a slot set into one start-ordered list and shift each start into
/// the client's zone, carrying the calendar date along.
pub fn localize_slots(
    slots: &SlotSet,
    business_offset: UtcOffsetMinutes,
    client_offset: UtcOffsetMinutes,
) -> Vec<SlotView> {
    let mut views: Vec<SlotView> = slots
        .available
        .iter()
        .map(|t| (*t, SlotStatus::Available))
        .chain(slots.blocked.iter().map(|b| (b.start, SlotStatus::Blocked(b.reason))))
        .map(|(start, status)| {
            let shifted = convert_time_of_day(start, business_offset, client_offset);
            SlotView {
                start,
                client_date: shifted.shift_date(slots.date),
                client_time: shifted.time,
                status,
            }
        })
        .collect();
    views.sort_by_key(|v| v.start);
    views
}

impl Engine {
    pub async fn business_info(&self, id: Ulid) -> Result<BusinessInfo, EngineError> {
        let state = self.business(id)?;
        let guard = state.read().await;
        Ok(guard.info())
    }

    pub fn business_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.businesses.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Bookable and blocked starts for a business-local date and a set of
    /// services. Reads a snapshot; takes no mutation lock.
    pub async fn get_availability(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        service_ids: &[Ulid],
    ) -> Result<SlotSet, EngineError> {
        let state = self.business(business_id)?;
        let guard = state.read().await;
        let duration = guard.total_duration(service_ids)?;
        let slots = guard.slots(date, duration, self.clock.now(), None);
        metrics::counter!(crate::observability::AVAILABILITY_QUERIES_TOTAL,
            "outcome" => slots.reason.map_or("open", Unavailable::as_str))
        .increment(1);
        Ok(slots)
    }

    /// Availability plus the same slots rendered in the client's zone.
    pub async fn get_availability_for_client(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        service_ids: &[Ulid],
        client_offset: UtcOffsetMinutes,
    ) -> Result<(SlotSet, Vec<SlotView>), EngineError> {
        validate_offset(client_offset)?;
        let slots = self.get_availability(business_id, date, service_ids).await?;
        let offset = self.business_offset(business_id).await?;
        let views = localize_slots(&slots, offset, client_offset);
        Ok((slots, views))
    }

    pub async fn business_offset(&self, business_id: Ulid) -> Result<UtcOffsetMinutes, EngineError> {
        let state = self.business(business_id)?;
        let guard = state.read().await;
        Ok(guard.calendar.utc_offset_minutes)
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let (_, state) = self.business_of(booking_id)?;
        let guard = state.read().await;
        guard.booking(booking_id).cloned()
    }

    /// All bookings of a business ordered by start, cancelled included.
    pub async fn list_bookings(&self, business_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let state = self.business(business_id)?;
        let guard = state.read().await;
        let mut bookings: Vec<Booking> = guard.bookings.values().cloned().collect();
        bookings.sort_by_key(|b| (b.event_date_utc, b.event_time_minutes, b.id));
        Ok(bookings)
    }

    pub async fn list_services(&self, business_id: Ulid) -> Result<Vec<Service>, EngineError> {
        let state = self.business(business_id)?;
        let guard = state.read().await;
        let mut services: Vec<Service> = guard.services.values().cloned().collect();
        services.sort_by_key(|s| s.id);
        Ok(services)
    }

    /// Waitlist entries by UTC date, then join order.
    pub async fn list_waitlist(&self, business_id: Ulid) -> Result<Vec<WaitlistEntry>, EngineError> {
        let state = self.business(business_id)?;
        let guard = state.read().await;
        Ok(guard.waitlist.iter().cloned().collect())
    }

    /// Waitlist entries whose slot falls on a business-local date.
    pub async fn list_waitlist_on(&self, business_id: Ulid, date: NaiveDate) -> Result<Vec<WaitlistEntry>, EngineError> {
        let state = self.business(business_id)?;
        let guard = state.read().await;
        let offset = guard.calendar.utc_offset_minutes;
        Ok(guard
            .waitlist
            .around(date)
            .filter(|w| {
                let instant = to_utc_instant(w.event_date_utc, w.event_time_minutes, 0);
                from_utc_instant(instant, offset).0 == date
            })
            .cloned()
            .collect())
    }
}
