mod availability;
mod challenge;
mod error;
mod identity;
mod mutations;
mod policy;
mod queries;
mod waitlist;
#[cfg(test)]
mod tests;

pub use availability::{SlotQuery, booking_interval, candidate_starts, compute_slots, within_notice_window};
pub use challenge::{ChallengeBook, ChallengeRecord, ChallengeSettings, ChallengeState, SweepStats, TokenUse, VerifiedToken};
pub use error::EngineError;
pub use identity::IssuedChallenge;
pub use mutations::NewBooking;
pub use policy::{Decision, DenyReason, can_mutate, event_start};
pub use queries::{SlotStatus, SlotView, localize_slots};
pub use waitlist::{Waitlist, flatten_selection};

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::clock::{Clock, checked_to_utc_instant, from_utc_instant, local_date};
use crate::journal::Journal;
use crate::model::*;
use crate::notify::{CodeSender, NotifyHub};

pub type SharedBusinessState = Arc<RwLock<BusinessState>>;

/// Everything the engine knows about one business. Mutated only through
/// `apply`, which is also what journal replay uses.
#[derive(Debug, Clone)]
pub struct BusinessState {
    pub id: Ulid,
    pub name: Option<String>,
    pub calendar: BusinessCalendar,
    pub policy: ReschedulePolicy,
    pub services: HashMap<Ulid, Service>,
    pub bookings: HashMap<Ulid, Booking>,
    /// Booking ids by UTC event date.
    by_date: BTreeMap<NaiveDate, Vec<Ulid>>,
    pub waitlist: Waitlist,
}

impl BusinessState {
    pub fn new(id: Ulid, name: Option<String>, calendar: BusinessCalendar, policy: ReschedulePolicy) -> Self {
        Self {
            id,
            name,
            calendar,
            policy,
            services: HashMap::new(),
            bookings: HashMap::new(),
            by_date: BTreeMap::new(),
            waitlist: Waitlist::default(),
        }
    }

    /// Apply an event directly. The caller holds the lock.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::CalendarUpdated { calendar, .. } => {
                self.calendar = calendar.clone();
            }
            Event::PolicyUpdated { policy, .. } => {
                self.policy = *policy;
            }
            Event::ServiceAdded { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::BookingCreated { booking } => {
                self.index(booking.event_date_utc, booking.id);
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingRescheduled {
                id,
                event_date_utc,
                event_time_minutes,
                reason,
                ..
            } => {
                let Some(previous) = self.bookings.get(id).map(|b| b.event_date_utc) else {
                    return;
                };
                self.unindex(previous, *id);
                self.index(*event_date_utc, *id);
                if let Some(b) = self.bookings.get_mut(id) {
                    b.event_date_utc = *event_date_utc;
                    b.event_time_minutes = *event_time_minutes;
                    b.reschedule_reason = reason.clone();
                    b.version += 1;
                }
            }
            Event::BookingCancelled { id, .. } => {
                if let Some(b) = self.bookings.get_mut(id) {
                    b.status = BookingStatus::Cancelled;
                    b.version += 1;
                }
            }
            Event::WaitlistJoined { entries, .. } => {
                for entry in entries {
                    self.waitlist.insert(entry.clone());
                }
            }
            Event::WaitlistExpired { cutoff, .. } => {
                self.waitlist.prune_started(*cutoff);
            }
            // Registration is handled at the DashMap level, not here
            Event::BusinessRegistered { .. } => {}
        }
    }

    fn index(&mut self, date: NaiveDate, id: Ulid) {
        self.by_date.entry(date).or_default().push(id);
    }

    fn unindex(&mut self, date: NaiveDate, id: Ulid) {
        if let Some(ids) = self.by_date.get_mut(&date) {
            ids.retain(|b| *b != id);
            if ids.is_empty() {
                self.by_date.remove(&date);
            }
        }
    }

    pub fn booking(&self, id: Ulid) -> Result<&Booking, EngineError> {
        self.bookings.get(&id).ok_or(EngineError::NotFound(id))
    }

    /// Active bookings that can overlap the business-local `date`.
    /// A local day spans at most three UTC dates for supported offsets.
    pub fn bookings_around(&self, date: NaiveDate, exclude: Option<Ulid>) -> Vec<Booking> {
        let from = date.pred_opt().unwrap_or(date);
        let to = date.succ_opt().unwrap_or(date);
        self.by_date
            .range(from..=to)
            .flat_map(|(_, ids)| ids.iter())
            .filter(|id| Some(**id) != exclude)
            .filter_map(|id| self.bookings.get(id))
            .filter(|b| b.is_active())
            .cloned()
            .collect()
    }

    /// Sum of the selected services' durations.
    pub fn total_duration(&self, service_ids: &[Ulid]) -> Result<u32, EngineError> {
        if service_ids.is_empty() {
            return Err(EngineError::InvalidInput("at least one service is required".into()));
        }
        if service_ids.len() > crate::limits::MAX_SERVICES_PER_REQUEST {
            return Err(EngineError::LimitExceeded("too many services in request"));
        }
        service_ids.iter().try_fold(0u32, |total, id| {
            let service = self.services.get(id).ok_or(EngineError::UnknownService(*id))?;
            Ok(total.saturating_add(service.duration_minutes))
        })
    }

    /// Fresh slot set for a business-local date.
    pub fn slots(&self, date: NaiveDate, duration_minutes: u32, now: DateTime<Utc>, exclude: Option<Ulid>) -> SlotSet {
        if !within_notice_window(&self.calendar, date, now) {
            return SlotSet::empty(date, duration_minutes, Unavailable::OutsideNoticeWindow);
        }
        let bookings = self.bookings_around(date, exclude);
        compute_slots(&SlotQuery {
            date,
            calendar: &self.calendar,
            duration_minutes,
            bookings: &bookings,
            now,
        })
    }

    /// Business-local date of a booking under the current calendar offset.
    pub fn local_date_of(&self, booking: &Booking) -> NaiveDate {
        local_date(event_start(booking), self.calendar.utc_offset_minutes)
    }

    /// Waitlist entries whose slot overlaps `booking`'s interval.
    pub fn waitlisted_for(&self, booking: &Booking) -> Vec<WaitlistEntry> {
        let (start, end) = booking_interval(booking);
        self.waitlist.overlapping(start, end)
    }

    pub fn info(&self) -> BusinessInfo {
        BusinessInfo {
            id: self.id,
            name: self.name.clone(),
            calendar: self.calendar.clone(),
            policy: self.policy,
            service_count: self.services.len(),
            booking_count: self.bookings.len(),
        }
    }
}

/// Local date and time under `offset` converted to the stored UTC form.
/// Dates chrono cannot shift are outside any notice window.
pub(crate) fn utc_slot(
    date: NaiveDate,
    time: TimeOfDay,
    offset: UtcOffsetMinutes,
) -> Result<(NaiveDate, TimeOfDay), EngineError> {
    checked_to_utc_instant(date, time, offset)
        .map(|instant| from_utc_instant(instant, 0))
        .ok_or(EngineError::OutsideNoticeWindow { date })
}

/// Run `fut` unless `token` fires first. Engine futures are safe to drop at
/// any await point, so abandoning one leaves no partial change behind.
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(EngineError::RequestCancelled),
        result = fut => result,
    }
}

pub struct Engine {
    pub(super) businesses: DashMap<Ulid, SharedBusinessState>,
    /// Reverse lookup: booking id → business id
    pub(super) booking_to_business: DashMap<Ulid, Ulid>,
    /// Serializes check-then-commit per (business, business-local date).
    pub(super) date_locks: DashMap<(Ulid, NaiveDate), Arc<Mutex<()>>>,
    pub(super) journal: Mutex<Journal>,
    pub challenges: ChallengeBook,
    pub notify: Arc<NotifyHub>,
    pub(super) sender: Arc<dyn CodeSender>,
    pub(super) clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        journal_path: &Path,
        notify: Arc<NotifyHub>,
        sender: Arc<dyn CodeSender>,
        clock: Arc<dyn Clock>,
        settings: ChallengeSettings,
    ) -> io::Result<Self> {
        settings
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let (journal, replay) = Journal::open(journal_path)?;

        // Rebuild plain state first, then share it.
        let mut states: HashMap<Ulid, BusinessState> = HashMap::new();
        let booking_to_business = DashMap::new();
        for event in &replay.events {
            match event {
                Event::BusinessRegistered { id, name, calendar, policy } => {
                    states
                        .entry(*id)
                        .or_insert_with(|| BusinessState::new(*id, name.clone(), calendar.clone(), *policy));
                }
                other => {
                    let business_id = other.business_id();
                    if let Some(state) = states.get_mut(&business_id) {
                        if let Event::BookingCreated { booking } = other {
                            booking_to_business.insert(booking.id, business_id);
                        }
                        state.apply(other);
                    }
                }
            }
        }
        tracing::info!(
            path = %journal_path.display(),
            events = replay.events.len(),
            businesses = states.len(),
            "journal replayed"
        );

        Ok(Self {
            businesses: states
                .into_iter()
                .map(|(id, state)| (id, Arc::new(RwLock::new(state))))
                .collect(),
            booking_to_business,
            date_locks: DashMap::new(),
            journal: Mutex::new(journal),
            challenges: ChallengeBook::new(settings),
            notify,
            sender,
            clock,
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn get_business(&self, id: &Ulid) -> Option<SharedBusinessState> {
        self.businesses.get(id).map(|e| e.value().clone())
    }

    pub(super) fn business(&self, id: Ulid) -> Result<SharedBusinessState, EngineError> {
        self.get_business(&id).ok_or(EngineError::NotFound(id))
    }

    pub fn business_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_business.get(booking_id).map(|e| *e.value())
    }

    pub(super) fn business_of(&self, booking_id: Ulid) -> Result<(Ulid, SharedBusinessState), EngineError> {
        let business_id = self
            .business_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        Ok((business_id, self.business(business_id)?))
    }

    /// Take the check-then-commit lock for one business-local date.
    pub(super) async fn lock_date(&self, business_id: Ulid, date: NaiveDate) -> OwnedMutexGuard<()> {
        let lock = self.date_locks.entry((business_id, date)).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop per-date locks nobody is holding or waiting on.
    pub fn prune_date_locks(&self) -> usize {
        let before = self.date_locks.len();
        self.date_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.date_locks.len())
    }

    pub fn date_lock_count(&self) -> usize {
        self.date_locks.len()
    }

    /// Journal-append then apply, with no await in between. The caller
    /// holds the business write lock and the journal lock.
    pub(super) fn commit_locked(
        &self,
        journal: &mut Journal,
        state: &mut BusinessState,
        event: &Event,
    ) -> Result<(), EngineError> {
        let started = std::time::Instant::now();
        journal
            .append(event)
            .map_err(|e| EngineError::Journal(e.to_string()))?;
        metrics::histogram!(crate::observability::JOURNAL_APPEND_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        if let Event::BookingCreated { booking } = event {
            self.booking_to_business.insert(booking.id, booking.business_id);
        }
        state.apply(event);
        Ok(())
    }

    /// Lock the journal, then append and apply.
    pub(super) async fn commit(&self, state: &mut BusinessState, event: &Event) -> Result<(), EngineError> {
        let mut journal = self.journal.lock().await;
        self.commit_locked(&mut journal, state, event)
    }
}
