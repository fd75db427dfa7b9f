use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use ulid::Ulid;

use crate::clock::{from_utc_instant, to_utc_instant};
use crate::model::*;

use super::EngineError;

/// Expand a waitlist selection into concrete UTC entries.
///
/// Only blocked slots can be waitlisted. `Range` and `All` expand over slots
/// blocked by existing bookings; slots that have elapsed are never emitted.
/// The caller must pass a freshly computed `SlotSet`.
pub fn flatten_selection(
    slots: &SlotSet,
    selection: &WaitlistSelection,
    business_id: Ulid,
    contact: &Contact,
    offset: UtcOffsetMinutes,
) -> Result<Vec<WaitlistEntry>, EngineError> {
    if slots.reason == Some(Unavailable::OutsideNoticeWindow) {
        return Err(EngineError::OutsideNoticeWindow { date: slots.date });
    }

    let starts: Vec<TimeOfDay> = match selection {
        WaitlistSelection::Single(t) => {
            require_booked(slots, *t)?;
            vec![*t]
        }
        WaitlistSelection::Multiple(ts) => {
            if ts.is_empty() {
                return Err(EngineError::InvalidSelection("no slots selected".into()));
            }
            let mut seen = HashSet::new();
            let mut out = Vec::with_capacity(ts.len());
            for t in ts {
                require_booked(slots, *t)?;
                if seen.insert(*t) {
                    out.push(*t);
                }
            }
            out
        }
        WaitlistSelection::Range(a, b) if a == b => {
            require_booked(slots, *a)?;
            vec![*a]
        }
        WaitlistSelection::Range(a, b) => {
            let (lo, hi) = if a < b { (*a, *b) } else { (*b, *a) };
            require_booked(slots, lo)?;
            require_booked(slots, hi)?;
            booked(slots).filter(|t| *t >= lo && *t <= hi).collect()
        }
        WaitlistSelection::All => {
            let all: Vec<TimeOfDay> = booked(slots).collect();
            if all.is_empty() {
                return Err(EngineError::InvalidSelection(format!(
                    "no booked slots on {} to wait for",
                    slots.date
                )));
            }
            all
        }
    };

    Ok(starts
        .into_iter()
        .map(|start| {
            let (event_date_utc, event_time_minutes) =
                from_utc_instant(to_utc_instant(slots.date, start, offset), 0);
            WaitlistEntry {
                business_id,
                contact_email: contact.email.trim().to_string(),
                name: contact.name.clone(),
                phone: contact.phone.clone(),
                event_date_utc,
                event_time_minutes,
                duration_minutes: slots.duration_minutes,
            }
        })
        .collect())
}

fn booked(slots: &SlotSet) -> impl Iterator<Item = TimeOfDay> + '_ {
    slots
        .blocked
        .iter()
        .filter(|b| b.reason == BlockReason::Booked)
        .map(|b| b.start)
}

fn require_booked(slots: &SlotSet, start: TimeOfDay) -> Result<(), EngineError> {
    if slots.is_available(start) {
        return Err(EngineError::InvalidSelection(format!(
            "{start} on {} is available and can be booked directly",
            slots.date
        )));
    }
    match slots.blocked_reason(start) {
        Some(BlockReason::Booked) => Ok(()),
        Some(BlockReason::Elapsed) => Err(EngineError::InvalidSelection(format!(
            "{start} on {} has already passed",
            slots.date
        ))),
        None => Err(EngineError::InvalidSelection(format!(
            "{start} is not a slot on {}",
            slots.date
        ))),
    }
}

/// Waitlist entries of one business, bucketed by UTC event date.
#[derive(Debug, Clone, Default)]
pub struct Waitlist {
    by_date: BTreeMap<NaiveDate, Vec<WaitlistEntry>>,
    len: usize,
}

impl Waitlist {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, entry: &WaitlistEntry) -> bool {
        self.by_date
            .get(&entry.event_date_utc)
            .is_some_and(|bucket| bucket.iter().any(|w| w.same_slot(entry)))
    }

    /// Add an entry unless the same contact already waits for that slot.
    pub fn insert(&mut self, entry: WaitlistEntry) -> bool {
        if self.contains(&entry) {
            return false;
        }
        self.by_date.entry(entry.event_date_utc).or_default().push(entry);
        self.len += 1;
        true
    }

    /// Entries ordered by UTC date, then join order.
    pub fn iter(&self) -> impl Iterator<Item = &WaitlistEntry> {
        self.by_date.values().flatten()
    }

    /// Entries on the UTC dates adjacent to and including `date`.
    pub fn around(&self, date: NaiveDate) -> impl Iterator<Item = &WaitlistEntry> {
        let from = date.pred_opt().unwrap_or(date);
        let to = date.succ_opt().unwrap_or(date);
        self.by_date.range(from..=to).flat_map(|(_, bucket)| bucket.iter())
    }

    /// Entries whose slot overlaps the half-open UTC interval.
    pub fn overlapping(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<WaitlistEntry> {
        self.around(start.date_naive())
            .filter(|w| {
                let w_start = to_utc_instant(w.event_date_utc, w.event_time_minutes, 0);
                let w_end = w_start + Duration::minutes(i64::from(w.duration_minutes));
                w_start < end && start < w_end
            })
            .cloned()
            .collect()
    }

    /// Whether any entry starts at or before `cutoff`.
    pub fn has_started(&self, cutoff: DateTime<Utc>) -> bool {
        self.by_date.iter().next().is_some_and(|(date, bucket)| {
            *date < cutoff.date_naive() || bucket.iter().any(|w| starts_by(w, cutoff))
        })
    }

    /// Drop entries whose slot starts at or before `cutoff`.
    pub fn prune_started(&mut self, cutoff: DateTime<Utc>) -> usize {
        let day = cutoff.date_naive();
        let mut removed = 0;
        let keep = match day.succ_opt() {
            Some(next) => self.by_date.split_off(&next),
            None => BTreeMap::new(),
        };
        for (date, bucket) in std::mem::replace(&mut self.by_date, keep) {
            if date < day {
                removed += bucket.len();
                continue;
            }
            let before = bucket.len();
            let left: Vec<WaitlistEntry> = bucket.into_iter().filter(|w| !starts_by(w, cutoff)).collect();
            removed += before - left.len();
            if !left.is_empty() {
                self.by_date.insert(date, left);
            }
        }
        self.len -= removed;
        removed
    }
}

fn starts_by(entry: &WaitlistEntry, cutoff: DateTime<Utc>) -> bool {
    to_utc_instant(entry.event_date_utc, entry.event_time_minutes, 0) <= cutoff
}
