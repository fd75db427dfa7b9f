use std::sync::Arc;

use chrono::{NaiveDate, Weekday};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::waitlist::flatten_selection;
use super::{BusinessState, Engine, EngineError, TokenUse, can_mutate, utc_slot};

/// A booking request expressed in the business's local frame.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: Ulid,
    pub business_id: Ulid,
    pub date: NaiveDate,
    pub time: TimeOfDay,
    pub service_ids: Vec<Ulid>,
    pub contact: Contact,
    pub status: BookingStatus,
}

/// Reject a start that is taken or is not a candidate slot at all.
pub(super) fn require_available(slots: &SlotSet, time: TimeOfDay) -> Result<(), EngineError> {
    if slots.reason == Some(Unavailable::OutsideNoticeWindow) {
        return Err(EngineError::OutsideNoticeWindow { date: slots.date });
    }
    if slots.is_available(time) {
        return Ok(());
    }
    if slots.blocked_reason(time).is_some() {
        return Err(EngineError::SlotNoLongerAvailable);
    }
    Err(EngineError::InvalidInput(format!(
        "{time} is not a bookable start on {}",
        slots.date
    )))
}

fn check_name(name: &Option<String>) -> Result<(), EngineError> {
    if name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn register_business(
        &self,
        id: Ulid,
        name: Option<String>,
        calendar: BusinessCalendar,
        policy: ReschedulePolicy,
    ) -> Result<(), EngineError> {
        check_name(&name)?;
        calendar.validate()?;
        policy.validate()?;

        // The journal lock orders concurrent registrations of the same id.
        let mut journal = self.journal.lock().await;
        if self.businesses.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.businesses.len() >= MAX_BUSINESSES {
            return Err(EngineError::LimitExceeded("too many businesses"));
        }
        let event = Event::BusinessRegistered {
            id,
            name: name.clone(),
            calendar: calendar.clone(),
            policy,
        };
        journal
            .append(&event)
            .map_err(|e| EngineError::Journal(e.to_string()))?;
        let state = BusinessState::new(id, name, calendar, policy);
        self.businesses.insert(id, Arc::new(RwLock::new(state)));
        tracing::info!(business = %id, "business registered");
        Ok(())
    }

    pub async fn update_calendar(&self, id: Ulid, calendar: BusinessCalendar) -> Result<(), EngineError> {
        calendar.validate()?;
        let state = self.business(id)?;
        let mut guard = state.write().await;
        let event = Event::CalendarUpdated { id, calendar };
        self.commit(&mut guard, &event).await
    }

    /// Set or clear (`None` = closed) the opening hours of one weekday.
    pub async fn set_hours(&self, id: Ulid, weekday: Weekday, hours: Option<DayHours>) -> Result<(), EngineError> {
        let state = self.business(id)?;
        let mut guard = state.write().await;
        let mut calendar = guard.calendar.clone();
        calendar.hours[weekday.num_days_from_monday() as usize] = hours;
        calendar.validate()?;
        if calendar == guard.calendar {
            return Ok(());
        }
        let event = Event::CalendarUpdated { id, calendar };
        self.commit(&mut guard, &event).await
    }

    pub async fn update_policy(&self, id: Ulid, policy: ReschedulePolicy) -> Result<(), EngineError> {
        policy.validate()?;
        let state = self.business(id)?;
        let mut guard = state.write().await;
        let event = Event::PolicyUpdated { id, policy };
        self.commit(&mut guard, &event).await
    }

    pub async fn add_service(&self, service: Service) -> Result<(), EngineError> {
        if service.name.is_empty() || service.name.len() > MAX_NAME_LEN {
            return Err(EngineError::InvalidInput("service name must be 1..=256 bytes".into()));
        }
        if service.duration_minutes == 0 || service.duration_minutes > u32::from(MINUTES_PER_DAY) {
            return Err(EngineError::InvalidInput(format!(
                "service duration {} out of range",
                service.duration_minutes
            )));
        }
        let state = self.business(service.business_id)?;
        let mut guard = state.write().await;
        if let Some(existing) = guard.services.get(&service.id) {
            if *existing == service {
                return Ok(());
            }
            return Err(EngineError::AlreadyExists(service.id));
        }
        if guard.services.len() >= MAX_SERVICES_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many services on business"));
        }
        let event = Event::ServiceAdded { service };
        self.commit(&mut guard, &event).await
    }

    /// Create a booking after rechecking the slot under the per-date lock.
    /// Resubmitting an identical request returns the stored booking.
    pub async fn create_booking(&self, request: NewBooking) -> Result<Booking, EngineError> {
        request.contact.validate()?;
        check_name(&request.contact.name)?;
        if request.status == BookingStatus::Cancelled {
            return Err(EngineError::InvalidInput("a new booking cannot be cancelled".into()));
        }
        let state = self.business(request.business_id)?;

        let _day = self.lock_date(request.business_id, request.date).await;
        let mut guard = state.write().await;
        let (event_date_utc, event_time_minutes) =
            utc_slot(request.date, request.time, guard.calendar.utc_offset_minutes)?;

        if let Some(existing) = guard.bookings.get(&request.id) {
            let same = existing.event_date_utc == event_date_utc
                && existing.event_time_minutes == event_time_minutes
                && existing.contact.email_matches(&request.contact.email);
            return if same {
                Ok(existing.clone())
            } else {
                Err(EngineError::AlreadyExists(request.id))
            };
        }
        if self.booking_to_business.contains_key(&request.id) {
            return Err(EngineError::AlreadyExists(request.id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many bookings on business"));
        }

        let duration_minutes = guard.total_duration(&request.service_ids)?;
        let slots = guard.slots(request.date, duration_minutes, self.clock.now(), None);
        require_available(&slots, request.time)?;

        let booking = Booking {
            id: request.id,
            business_id: request.business_id,
            event_date_utc,
            event_time_minutes,
            duration_minutes,
            status: request.status,
            contact: Contact {
                email: request.contact.email.trim().to_string(),
                name: request.contact.name,
                phone: request.contact.phone,
            },
            version: 0,
            reschedule_reason: None,
        };
        let event = Event::BookingCreated { booking: booking.clone() };
        self.commit(&mut guard, &event).await?;
        drop(guard);

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        tracing::info!(booking = %booking.id, business = %booking.business_id, "booking created");
        self.notify.send(booking.business_id, Notification::BookingCreated { booking: booking.clone() });
        Ok(booking)
    }

    /// Put a contact on the waitlist for blocked slots of a business-local
    /// date. Returns the entries covering this request, including ones the
    /// contact already held.
    pub async fn join_waitlist(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        service_ids: &[Ulid],
        selection: WaitlistSelection,
        contact: Contact,
    ) -> Result<Vec<WaitlistEntry>, EngineError> {
        contact.validate()?;
        check_name(&contact.name)?;
        if let WaitlistSelection::Multiple(ts) = &selection
            && ts.len() > MAX_SELECTION_SLOTS
        {
            return Err(EngineError::LimitExceeded("too many slots in selection"));
        }
        let state = self.business(business_id)?;
        let mut guard = state.write().await;

        let duration = guard.total_duration(service_ids)?;
        let slots = guard.slots(date, duration, self.clock.now(), None);
        let entries = flatten_selection(&slots, &selection, business_id, &contact, guard.calendar.utc_offset_minutes)?;

        let fresh: Vec<WaitlistEntry> = entries
            .iter()
            .filter(|e| !guard.waitlist.contains(e))
            .cloned()
            .collect();
        if !fresh.is_empty() {
            if guard.waitlist.len() + fresh.len() > MAX_WAITLIST_PER_BUSINESS {
                return Err(EngineError::LimitExceeded("waitlist is full"));
            }
            let event = Event::WaitlistJoined { business_id, entries: fresh };
            self.commit(&mut guard, &event).await?;
        }
        tracing::info!(
            business = %business_id,
            %date,
            mode = selection.mode(),
            entries = entries.len(),
            "waitlist joined"
        );
        Ok(entries)
    }

    /// Cancel the booking a verified token was minted for. Retrying with a
    /// spent token returns the booking as the first call left it.
    pub async fn apply_cancel(&self, token: Ulid) -> Result<Booking, EngineError> {
        let used_for = TokenUse::Cancel;
        if let Some(outcome) = self.challenges.replay(token, &used_for, self.clock.now()) {
            return outcome;
        }
        let verified = self.challenges.check_token(token, ChallengePurpose::Cancel, self.clock.now())?;
        let (business_id, state) = self.business_of(verified.booking_id)?;

        // A reschedule may move the booking between the read and the lock.
        let (_day, mut guard) = loop {
            let date = {
                let guard = state.read().await;
                guard.local_date_of(guard.booking(verified.booking_id)?)
            };
            let day = self.lock_date(business_id, date).await;
            let guard = state.write().await;
            if guard.local_date_of(guard.booking(verified.booking_id)?) == date {
                break (day, guard);
            }
        };
        if let Some(outcome) = self.challenges.replay(token, &used_for, self.clock.now()) {
            return outcome;
        }

        let booking = guard.booking(verified.booking_id)?.clone();
        can_mutate(&booking, &guard.policy, ChallengePurpose::Cancel, self.clock.now()).into_result()?;

        let event = Event::BookingCancelled { id: booking.id, business_id };
        let mut journal = self.journal.lock().await;
        let spent = self.challenges.take_token(token).ok_or(EngineError::InvalidToken)?;
        if let Err(e) = self.commit_locked(&mut journal, &mut guard, &event) {
            self.challenges.restore_token(spent);
            return Err(e);
        }
        let cancelled = guard.booking(booking.id)?.clone();
        self.challenges.record_spent(spent, used_for, cancelled.clone());
        drop(journal);

        let waitlisted = guard.waitlisted_for(&booking);
        drop(guard);

        metrics::counter!(crate::observability::BOOKING_MUTATIONS_TOTAL, "kind" => "cancel").increment(1);
        tracing::info!(booking = %booking.id, business = %business_id, "booking cancelled");
        self.notify.send(business_id, Notification::BookingCancelled { booking: cancelled.clone() });
        self.notify.send(
            business_id,
            Notification::SlotFreed {
                business_id,
                event_date_utc: booking.event_date_utc,
                event_time_minutes: booking.event_time_minutes,
                duration_minutes: booking.duration_minutes,
                waitlisted,
            },
        );
        Ok(cancelled)
    }

    /// Move the booking a verified token was minted for to a new
    /// business-local date and time. A retry with the same arguments returns
    /// the moved booking.
    pub async fn apply_reschedule(
        &self,
        token: Ulid,
        new_date: NaiveDate,
        new_time: TimeOfDay,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("reschedule reason too long"));
        }
        let used_for = TokenUse::Reschedule {
            date: new_date,
            time: new_time,
            reason: reason.clone(),
        };
        if let Some(outcome) = self.challenges.replay(token, &used_for, self.clock.now()) {
            return outcome;
        }
        let verified = self.challenges.check_token(token, ChallengePurpose::Reschedule, self.clock.now())?;
        let (business_id, state) = self.business_of(verified.booking_id)?;

        let _day = self.lock_date(business_id, new_date).await;
        let mut guard = state.write().await;
        if let Some(outcome) = self.challenges.replay(token, &used_for, self.clock.now()) {
            return outcome;
        }

        let previous = guard.booking(verified.booking_id)?.clone();
        let now = self.clock.now();
        can_mutate(&previous, &guard.policy, ChallengePurpose::Reschedule, now).into_result()?;

        let slots = guard.slots(new_date, previous.duration_minutes, now, Some(previous.id));
        require_available(&slots, new_time)?;

        let (event_date_utc, event_time_minutes) =
            utc_slot(new_date, new_time, guard.calendar.utc_offset_minutes)?;
        let event = Event::BookingRescheduled {
            id: previous.id,
            business_id,
            event_date_utc,
            event_time_minutes,
            reason,
        };
        let mut journal = self.journal.lock().await;
        let spent = self.challenges.take_token(token).ok_or(EngineError::InvalidToken)?;
        if let Err(e) = self.commit_locked(&mut journal, &mut guard, &event) {
            self.challenges.restore_token(spent);
            return Err(e);
        }
        let moved = guard.booking(previous.id)?.clone();
        self.challenges.record_spent(spent, used_for, moved.clone());
        drop(journal);

        let waitlisted = guard.waitlisted_for(&previous);
        drop(guard);

        metrics::counter!(crate::observability::BOOKING_MUTATIONS_TOTAL, "kind" => "reschedule").increment(1);
        tracing::info!(
            booking = %moved.id,
            business = %business_id,
            from = %format!("{} {}", previous.event_date_utc, previous.event_time_minutes),
            to = %format!("{} {}", moved.event_date_utc, moved.event_time_minutes),
            "booking rescheduled"
        );
        self.notify.send(
            business_id,
            Notification::BookingRescheduled {
                booking: moved.clone(),
                previous_date_utc: previous.event_date_utc,
                previous_time_minutes: previous.event_time_minutes,
            },
        );
        self.notify.send(
            business_id,
            Notification::SlotFreed {
                business_id,
                event_date_utc: previous.event_date_utc,
                event_time_minutes: previous.event_time_minutes,
                duration_minutes: previous.duration_minutes,
                waitlisted,
            },
        );
        Ok(moved)
    }

    /// Drop waitlist entries whose slot has started, one journaled event per
    /// business that had any.
    pub async fn expire_waitlists(&self) -> Result<usize, EngineError> {
        let cutoff = self.clock.now();
        let mut removed = 0;
        for id in self.business_ids() {
            let Some(state) = self.get_business(&id) else {
                continue;
            };
            if !state.read().await.waitlist.has_started(cutoff) {
                continue;
            }
            let mut guard = state.write().await;
            if !guard.waitlist.has_started(cutoff) {
                continue;
            }
            let before = guard.waitlist.len();
            let event = Event::WaitlistExpired { business_id: id, cutoff };
            self.commit(&mut guard, &event).await?;
            removed += before - guard.waitlist.len();
        }
        Ok(removed)
    }
}
