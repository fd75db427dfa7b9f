use super::*;

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Weekday};

use crate::clock::ManualClock;
use crate::notify::{CodeDelivery, DeliveryError, MemoryCodeSender};

fn t(h: u32, m: u32) -> TimeOfDay {
    TimeOfDay::from_hm(h, m).unwrap()
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Monday 2026-03-02 08:00 UTC.
fn start_of_test() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
}

fn tuesday() -> NaiveDate {
    day(2026, 3, 10)
}

fn wednesday() -> NaiveDate {
    day(2026, 3, 11)
}

fn test_journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("reslot_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn open_engine(path: &Path, clock: Arc<ManualClock>, sender: Arc<dyn CodeSender>) -> Engine {
    Engine::new(path, Arc::new(NotifyHub::new()), sender, clock, ChallengeSettings::default()).unwrap()
}

struct Fixture {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    sender: Arc<MemoryCodeSender>,
    business: Ulid,
    /// 60 minutes.
    consult: Ulid,
    /// 30 minutes.
    quick: Ulid,
}

/// Business open 09:00-17:00 on weekdays, 30-minute grid, bookable up to
/// 30 days ahead, 24h lead time.
async fn fixture(name: &str, offset: UtcOffsetMinutes) -> Fixture {
    let path = test_journal_path(name);
    let clock = Arc::new(ManualClock::new(start_of_test()));
    let sender = Arc::new(MemoryCodeSender::new());
    let engine = Arc::new(open_engine(&path, clock.clone(), sender.clone()));

    let hours = DayHours::new(t(9, 0), t(17, 0)).unwrap();
    let mut calendar = BusinessCalendar::new(offset, 0, 30, 30);
    for wd in [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri] {
        calendar = calendar.with_hours(wd, hours);
    }
    let business = Ulid::new();
    engine
        .register_business(business, Some("Studio".into()), calendar, ReschedulePolicy::new(24))
        .await
        .unwrap();

    let consult = Ulid::new();
    let quick = Ulid::new();
    for (id, name, minutes) in [(consult, "Consult", 60), (quick, "Quick", 30)] {
        engine
            .add_service(Service { id, business_id: business, name: name.into(), duration_minutes: minutes })
            .await
            .unwrap();
    }

    Fixture { engine, clock, sender, business, consult, quick }
}

fn request(fx: &Fixture, date: NaiveDate, time: TimeOfDay, service: Ulid, email: &str) -> NewBooking {
    NewBooking {
        id: Ulid::new(),
        business_id: fx.business,
        date,
        time,
        service_ids: vec![service],
        contact: Contact::new(email),
        status: BookingStatus::Confirmed,
    }
}

async fn book(fx: &Fixture, date: NaiveDate, time: TimeOfDay, service: Ulid) -> Booking {
    fx.engine
        .create_booking(request(fx, date, time, service, "ann@example.com"))
        .await
        .unwrap()
}

/// Issue a challenge, read the delivered code, and trade it for a token.
async fn token_for(fx: &Fixture, booking_id: Ulid, purpose: ChallengePurpose) -> Ulid {
    let issued = fx
        .engine
        .issue_challenge(booking_id, purpose, "ann@example.com")
        .await
        .unwrap();
    let code = fx.sender.last_code(booking_id, purpose).unwrap();
    fx.engine.verify_challenge(issued.challenge_id, &code).unwrap().token
}

fn wrong_code(right: &str) -> String {
    if right == "111111" { "222222".into() } else { "111111".into() }
}

// ── Availability ─────────────────────────────────────────────

#[tokio::test]
async fn booked_interval_blocks_overlapping_starts() {
    let fx = fixture("overlap.journal", 0).await;
    book(&fx, tuesday(), t(10, 0), fx.consult).await;

    let slots = fx.engine.get_availability(fx.business, tuesday(), &[fx.quick]).await.unwrap();
    assert_eq!(slots.blocked_reason(t(10, 0)), Some(BlockReason::Booked));
    assert_eq!(slots.blocked_reason(t(10, 30)), Some(BlockReason::Booked));
    assert!(slots.is_available(t(9, 30)));
    assert!(slots.is_available(t(11, 0)));

    // A 60-minute request starting at 09:30 runs into the booking too.
    let long = fx.engine.get_availability(fx.business, tuesday(), &[fx.consult]).await.unwrap();
    assert_eq!(long.blocked_reason(t(9, 30)), Some(BlockReason::Booked));
    assert!(long.is_available(t(9, 0)));
    assert!(long.is_available(t(11, 0)));
}

#[tokio::test]
async fn availability_is_repeatable() {
    let fx = fixture("repeatable.journal", 0).await;
    book(&fx, tuesday(), t(13, 0), fx.quick).await;

    let a = fx.engine.get_availability(fx.business, tuesday(), &[fx.quick]).await.unwrap();
    let b = fx.engine.get_availability(fx.business, tuesday(), &[fx.quick]).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.available.len() + a.blocked.len(), 16);
}

#[tokio::test]
async fn whole_day_reasons() {
    let fx = fixture("day_reasons.journal", 0).await;
    let saturday = day(2026, 3, 7);
    let slots = fx.engine.get_availability(fx.business, saturday, &[fx.quick]).await.unwrap();
    assert_eq!(slots.reason, Some(Unavailable::Closed));

    let far = day(2026, 4, 10);
    let slots = fx.engine.get_availability(fx.business, far, &[fx.quick]).await.unwrap();
    assert_eq!(slots.reason, Some(Unavailable::OutsideNoticeWindow));

    // Nine hours of services do not fit an eight-hour day.
    let both = vec![fx.consult; 9];
    let slots = fx.engine.get_availability(fx.business, tuesday(), &both).await.unwrap();
    assert_eq!(slots.reason, Some(Unavailable::DoesNotFit));
}

#[tokio::test]
async fn elapsed_slots_are_blocked() {
    let fx = fixture("elapsed.journal", 0).await;
    fx.clock.set(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap());
    let slots = fx.engine.get_availability(fx.business, tuesday(), &[fx.quick]).await.unwrap();
    assert_eq!(slots.blocked_reason(t(12, 0)), Some(BlockReason::Elapsed));
    assert_eq!(slots.blocked_reason(t(9, 0)), Some(BlockReason::Elapsed));
    assert!(slots.is_available(t(12, 30)));
}

#[tokio::test]
async fn closing_a_weekday_empties_it() {
    let fx = fixture("set_hours.journal", 0).await;
    fx.engine.set_hours(fx.business, Weekday::Tue, None).await.unwrap();
    let slots = fx.engine.get_availability(fx.business, tuesday(), &[fx.quick]).await.unwrap();
    assert_eq!(slots.reason, Some(Unavailable::Closed));
    let info = fx.engine.business_info(fx.business).await.unwrap();
    assert_eq!(info.calendar.hours[1], None);
}

#[tokio::test]
async fn service_selection_errors() {
    let fx = fixture("services.journal", 0).await;
    let err = fx.engine.get_availability(fx.business, tuesday(), &[]).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    let stranger = Ulid::new();
    let err = fx.engine.get_availability(fx.business, tuesday(), &[stranger]).await.unwrap_err();
    assert_eq!(err, EngineError::UnknownService(stranger));
    let err = fx.engine.get_availability(Ulid::new(), tuesday(), &[fx.quick]).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn business_offset_shifts_storage_and_views() {
    // UTC+10: 09:00 local on the 10th is 23:00 UTC on the 9th.
    let fx = fixture("offset.journal", 600).await;
    let booking = book(&fx, tuesday(), t(9, 0), fx.consult).await;
    assert_eq!(booking.event_date_utc, day(2026, 3, 9));
    assert_eq!(booking.event_time_minutes, t(23, 0));

    let (slots, views) = fx
        .engine
        .get_availability_for_client(fx.business, tuesday(), &[fx.quick], -300)
        .await
        .unwrap();
    assert_eq!(slots.blocked_reason(t(9, 0)), Some(BlockReason::Booked));
    assert_eq!(slots.blocked_reason(t(9, 30)), Some(BlockReason::Booked));
    assert!(slots.is_available(t(10, 0)));

    let first = views[0];
    assert_eq!(first.start, t(9, 0));
    assert_eq!(first.client_date, day(2026, 3, 9));
    assert_eq!(first.client_time, t(18, 0));
    assert_eq!(first.status, SlotStatus::Blocked(BlockReason::Booked));
}

#[tokio::test]
async fn calendar_edge_dates_are_outside_notice_window() {
    let fx = fixture("edge_dates.journal", -300).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let token = token_for(&fx, booking.id, ChallengePurpose::Reschedule).await;

    for date in [NaiveDate::MAX, NaiveDate::MIN] {
        let slots = fx.engine.get_availability(fx.business, date, &[fx.quick]).await.unwrap();
        assert_eq!(slots.reason, Some(Unavailable::OutsideNoticeWindow));
        let (_, views) = fx
            .engine
            .get_availability_for_client(fx.business, date, &[fx.quick], 840)
            .await
            .unwrap();
        assert!(views.is_empty());

        let outside = EngineError::OutsideNoticeWindow { date };
        for time in [t(0, 0), t(23, 30)] {
            let err = fx
                .engine
                .create_booking(request(&fx, date, time, fx.quick, "ann@example.com"))
                .await
                .unwrap_err();
            assert_eq!(err, outside);
            let err = fx.engine.apply_reschedule(token, date, time, None).await.unwrap_err();
            assert_eq!(err, outside);
        }
        let err = fx
            .engine
            .join_waitlist(fx.business, date, &[fx.quick], WaitlistSelection::All, Contact::new("w@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err, outside);
        assert!(fx.engine.list_waitlist_on(fx.business, date).await.unwrap().is_empty());
    }

    // Nothing was spent or written.
    let moved = fx.engine.apply_reschedule(token, wednesday(), t(10, 0), None).await.unwrap();
    assert_eq!(moved.version, 1);
    assert_eq!(fx.engine.list_bookings(fx.business).await.unwrap().len(), 1);
}

// ── Booking creation ─────────────────────────────────────────

#[tokio::test]
async fn create_rejects_taken_and_invalid_starts() {
    let fx = fixture("create_rejects.journal", 0).await;
    book(&fx, tuesday(), t(10, 0), fx.consult).await;

    let taken = fx
        .engine
        .create_booking(request(&fx, tuesday(), t(10, 30), fx.quick, "bob@example.com"))
        .await;
    assert_eq!(taken, Err(EngineError::SlotNoLongerAvailable));

    let off_grid = fx
        .engine
        .create_booking(request(&fx, tuesday(), t(10, 15), fx.quick, "bob@example.com"))
        .await;
    assert!(matches!(off_grid, Err(EngineError::InvalidInput(_))));

    let too_far = fx
        .engine
        .create_booking(request(&fx, day(2026, 4, 10), t(10, 0), fx.quick, "bob@example.com"))
        .await;
    assert!(matches!(too_far, Err(EngineError::OutsideNoticeWindow { .. })));

    let bad_email = fx
        .engine
        .create_booking(request(&fx, tuesday(), t(14, 0), fx.quick, "nobody"))
        .await;
    assert!(matches!(bad_email, Err(EngineError::InvalidInput(_))));
}

#[tokio::test]
async fn create_is_idempotent_per_id() {
    let fx = fixture("create_idempotent.journal", 0).await;
    let req = request(&fx, tuesday(), t(10, 0), fx.consult, "ann@example.com");
    let first = fx.engine.create_booking(req.clone()).await.unwrap();
    let again = fx.engine.create_booking(req.clone()).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(fx.engine.list_bookings(fx.business).await.unwrap().len(), 1);

    let moved = NewBooking { time: t(14, 0), ..req };
    assert_eq!(fx.engine.create_booking(moved).await, Err(EngineError::AlreadyExists(first.id)));
}

#[tokio::test]
async fn setup_operations_validate() {
    let fx = fixture("setup.journal", 0).await;
    let calendar = BusinessCalendar::new(0, 0, 30, 30);
    let dup = fx
        .engine
        .register_business(fx.business, None, calendar, ReschedulePolicy::new(0))
        .await;
    assert_eq!(dup, Err(EngineError::AlreadyExists(fx.business)));

    // Re-adding an identical service is a no-op; a changed one is not.
    let same = Service { id: fx.quick, business_id: fx.business, name: "Quick".into(), duration_minutes: 30 };
    fx.engine.add_service(same.clone()).await.unwrap();
    let changed = Service { duration_minutes: 45, ..same };
    assert_eq!(fx.engine.add_service(changed).await, Err(EngineError::AlreadyExists(fx.quick)));
    assert_eq!(fx.engine.list_services(fx.business).await.unwrap().len(), 2);

    let zero = Service { id: Ulid::new(), business_id: fx.business, name: "Zero".into(), duration_minutes: 0 };
    assert!(matches!(fx.engine.add_service(zero).await, Err(EngineError::InvalidInput(_))));
}

// ── Identity challenges ──────────────────────────────────────

#[tokio::test]
async fn wrong_code_twice_then_right_code() {
    let fx = fixture("wrong_then_right.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;

    let issued = fx
        .engine
        .issue_challenge(booking.id, ChallengePurpose::Reschedule, "ANN@example.com ")
        .await
        .unwrap();
    let code = fx.sender.last_code(booking.id, ChallengePurpose::Reschedule).unwrap();
    assert_eq!(code.len(), 6);

    let wrong = wrong_code(&code);
    for _ in 0..2 {
        assert_eq!(fx.engine.verify_challenge(issued.challenge_id, &wrong), Err(EngineError::InvalidCode));
    }
    let token = fx.engine.verify_challenge(issued.challenge_id, &code).unwrap();
    assert_eq!(token.booking_id, booking.id);
    assert_eq!(token.purpose, ChallengePurpose::Reschedule);

    // A verified challenge cannot be replayed.
    assert_eq!(fx.engine.verify_challenge(issued.challenge_id, &code), Err(EngineError::InvalidCode));
    assert_eq!(
        fx.engine.challenges.state(issued.challenge_id, fx.engine.now()),
        ChallengeState::Verified
    );
}

#[tokio::test]
async fn verify_by_booking_uses_live_challenge() {
    let fx = fixture("verify_by_booking.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;

    assert_eq!(
        fx.engine.verify_for_booking(booking.id, ChallengePurpose::Cancel, "123456"),
        Err(EngineError::InvalidCode)
    );
    fx.engine
        .issue_challenge(booking.id, ChallengePurpose::Cancel, "ann@example.com")
        .await
        .unwrap();
    let code = fx.sender.last_code(booking.id, ChallengePurpose::Cancel).unwrap();
    let token = fx.engine.verify_for_booking(booking.id, ChallengePurpose::Cancel, &code).unwrap();
    assert_eq!(token.purpose, ChallengePurpose::Cancel);
}

#[tokio::test]
async fn challenge_expires() {
    let fx = fixture("challenge_expires.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let issued = fx
        .engine
        .issue_challenge(booking.id, ChallengePurpose::Cancel, "ann@example.com")
        .await
        .unwrap();
    let code = fx.sender.last_code(booking.id, ChallengePurpose::Cancel).unwrap();

    fx.clock.advance(Duration::minutes(10));
    assert_eq!(fx.engine.verify_challenge(issued.challenge_id, &code), Err(EngineError::Expired));
    assert_eq!(
        fx.engine.challenges.state(issued.challenge_id, fx.engine.now()),
        ChallengeState::Expired
    );
}

#[tokio::test]
async fn reissue_invalidates_previous_code() {
    let fx = fixture("reissue.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let first = fx
        .engine
        .issue_challenge(booking.id, ChallengePurpose::Cancel, "ann@example.com")
        .await
        .unwrap();
    let first_code = fx.sender.last_code(booking.id, ChallengePurpose::Cancel).unwrap();
    let second = fx
        .engine
        .issue_challenge(booking.id, ChallengePurpose::Cancel, "ann@example.com")
        .await
        .unwrap();
    assert_ne!(first.challenge_id, second.challenge_id);

    assert_eq!(fx.engine.verify_challenge(first.challenge_id, &first_code), Err(EngineError::InvalidCode));
    let second_code = fx.sender.last_code(booking.id, ChallengePurpose::Cancel).unwrap();
    assert!(fx.engine.verify_challenge(second.challenge_id, &second_code).is_ok());
}

#[tokio::test]
async fn challenge_requires_matching_contact() {
    let fx = fixture("contact_mismatch.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let err = fx
        .engine
        .issue_challenge(booking.id, ChallengePurpose::Cancel, "mallory@example.com")
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::ContactMismatch);
    assert!(fx.sender.deliveries().is_empty());
    assert!(fx.engine.challenges.is_empty());
}

struct DownSender;

#[async_trait::async_trait]
impl CodeSender for DownSender {
    async fn send_code(&self, _delivery: &CodeDelivery) -> Result<(), DeliveryError> {
        Err(DeliveryError("smtp unreachable".into()))
    }
}

#[tokio::test]
async fn failed_delivery_records_nothing() {
    let path = test_journal_path("delivery_failure.journal");
    let clock = Arc::new(ManualClock::new(start_of_test()));
    let engine = open_engine(&path, clock, Arc::new(DownSender));

    let business = Ulid::new();
    let calendar = BusinessCalendar::new(0, 0, 30, 30)
        .with_hours(Weekday::Tue, DayHours::new(t(9, 0), t(17, 0)).unwrap());
    engine
        .register_business(business, None, calendar, ReschedulePolicy::new(0))
        .await
        .unwrap();
    let service = Ulid::new();
    engine
        .add_service(Service { id: service, business_id: business, name: "Cut".into(), duration_minutes: 30 })
        .await
        .unwrap();
    let booking = engine
        .create_booking(NewBooking {
            id: Ulid::new(),
            business_id: business,
            date: tuesday(),
            time: t(9, 0),
            service_ids: vec![service],
            contact: Contact::new("ann@example.com"),
            status: BookingStatus::Pending,
        })
        .await
        .unwrap();

    let err = engine
        .issue_challenge(booking.id, ChallengePurpose::Cancel, "ann@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Delivery(_)));
    assert!(engine.challenges.is_empty());
    assert_eq!(engine.challenges.live_challenge(booking.id, ChallengePurpose::Cancel), None);
}

// ── Policy ───────────────────────────────────────────────────

#[tokio::test]
async fn lockout_window_applies_per_purpose() {
    let fx = fixture("lockout.journal", 0).await;
    // 25 hours ahead of the test start, outside the 24h lead time.
    let booking = book(&fx, day(2026, 3, 3), t(9, 0), fx.quick).await;
    let reschedule = token_for(&fx, booking.id, ChallengePurpose::Reschedule).await;

    fx.engine
        .update_policy(
            fx.business,
            ReschedulePolicy { min_lead_time_hours: 26, cancel_lead_time_hours: Some(12) },
        )
        .await
        .unwrap();

    let err = fx
        .engine
        .issue_challenge(booking.id, ChallengePurpose::Reschedule, "ann@example.com")
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::WithinLockoutWindow { hours: 26 });

    // The check is repeated at commit time, so an earlier token does not help.
    let err = fx
        .engine
        .apply_reschedule(reschedule, wednesday(), t(9, 0), None)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::WithinLockoutWindow { hours: 26 });

    // Cancelling has the shorter lead time.
    let cancel = token_for(&fx, booking.id, ChallengePurpose::Cancel).await;
    let cancelled = fx.engine.apply_cancel(cancel).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    let err = fx
        .engine
        .issue_challenge(booking.id, ChallengePurpose::Cancel, "ann@example.com")
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::AlreadyCancelled);
}

#[tokio::test]
async fn past_events_cannot_change() {
    let fx = fixture("past_event.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.quick).await;
    fx.clock.set(Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap());
    let err = fx
        .engine
        .issue_challenge(booking.id, ChallengePurpose::Cancel, "ann@example.com")
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::EventAlreadyPassed);
}

// ── Cancel / reschedule ──────────────────────────────────────

#[tokio::test]
async fn cancel_frees_slot_and_spends_token() {
    let fx = fixture("cancel.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let token = token_for(&fx, booking.id, ChallengePurpose::Cancel).await;

    let cancelled = fx.engine.apply_cancel(token).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.version, 1);

    let slots = fx.engine.get_availability(fx.business, tuesday(), &[fx.consult]).await.unwrap();
    assert!(slots.is_available(t(10, 0)));

    assert_eq!(fx.engine.challenges.token_count(), 0);
    let err = fx.engine.apply_reschedule(token, wednesday(), t(10, 0), None).await.unwrap_err();
    assert_eq!(err, EngineError::InvalidToken);
}

#[tokio::test]
async fn retried_mutations_return_committed_booking() {
    let fx = fixture("retry.journal", 0).await;
    let first = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let second = book(&fx, tuesday(), t(14, 0), fx.consult).await;
    let mut rx = fx.engine.notify.subscribe(fx.business);

    let cancel = token_for(&fx, first.id, ChallengePurpose::Cancel).await;
    let cancelled = fx.engine.apply_cancel(cancel).await.unwrap();
    assert_eq!(fx.engine.apply_cancel(cancel).await, Ok(cancelled.clone()));
    assert_eq!(fx.engine.get_booking(first.id).await.unwrap().version, 1);

    let move_token = token_for(&fx, second.id, ChallengePurpose::Reschedule).await;
    let moved = fx
        .engine
        .apply_reschedule(move_token, wednesday(), t(9, 0), Some("clash".into()))
        .await
        .unwrap();
    let again = fx
        .engine
        .apply_reschedule(move_token, wednesday(), t(9, 0), Some("clash".into()))
        .await;
    assert_eq!(again, Ok(moved.clone()));
    let elsewhere = fx.engine.apply_reschedule(move_token, wednesday(), t(11, 0), None).await;
    assert_eq!(elsewhere, Err(EngineError::InvalidToken));
    assert_eq!(fx.engine.get_booking(second.id).await.unwrap(), moved);

    // Retries do not announce anything again.
    let mut seen = 0;
    while rx.try_recv().is_ok() {
        seen += 1;
    }
    assert_eq!(seen, 4);

    // Spent tokens answer until they would have expired.
    fx.clock.advance(Duration::minutes(15));
    assert_eq!(fx.engine.apply_cancel(cancel).await, Err(EngineError::Expired));
    fx.engine.challenges.sweep(fx.engine.now());
    assert_eq!(fx.engine.apply_cancel(cancel).await, Err(EngineError::InvalidToken));
}

#[tokio::test]
async fn cancel_follows_booking_moved_while_waiting() {
    let fx = fixture("cancel_moved.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let cancel = token_for(&fx, booking.id, ChallengePurpose::Cancel).await;
    let move_token = token_for(&fx, booking.id, ChallengePurpose::Reschedule).await;

    let held = fx.engine.lock_date(fx.business, tuesday()).await;
    let engine = fx.engine.clone();
    let pending = tokio::spawn(async move { engine.apply_cancel(cancel).await });
    tokio::time::sleep(StdDuration::from_millis(50)).await;

    let moved = fx.engine.apply_reschedule(move_token, wednesday(), t(10, 0), None).await.unwrap();
    drop(held);

    let cancelled = pending.await.unwrap().unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.event_date_utc, wednesday());
    assert_eq!(cancelled.version, moved.version + 1);
}

#[tokio::test]
async fn token_is_bound_to_its_purpose() {
    let fx = fixture("token_purpose.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let cancel = token_for(&fx, booking.id, ChallengePurpose::Cancel).await;

    let err = fx
        .engine
        .apply_reschedule(cancel, wednesday(), t(10, 0), None)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::InvalidToken);
    assert_eq!(fx.engine.apply_cancel(Ulid::new()).await, Err(EngineError::InvalidToken));

    // The mismatched use did not spend it.
    assert!(fx.engine.apply_cancel(cancel).await.is_ok());
}

#[tokio::test]
async fn token_expires() {
    let fx = fixture("token_expires.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let token = token_for(&fx, booking.id, ChallengePurpose::Cancel).await;
    fx.clock.advance(Duration::minutes(15));
    assert_eq!(fx.engine.apply_cancel(token).await, Err(EngineError::Expired));
}

#[tokio::test]
async fn reschedule_moves_booking() {
    let fx = fixture("reschedule.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let mut rx = fx.engine.notify.subscribe(fx.business);
    let token = token_for(&fx, booking.id, ChallengePurpose::Reschedule).await;

    let moved = fx
        .engine
        .apply_reschedule(token, wednesday(), t(14, 0), Some("clash".into()))
        .await
        .unwrap();
    assert_eq!(moved.event_date_utc, wednesday());
    assert_eq!(moved.event_time_minutes, t(14, 0));
    assert_eq!(moved.version, 1);
    assert_eq!(moved.reschedule_reason.as_deref(), Some("clash"));

    let old_day = fx.engine.get_availability(fx.business, tuesday(), &[fx.consult]).await.unwrap();
    assert!(old_day.is_available(t(10, 0)));
    let new_day = fx.engine.get_availability(fx.business, wednesday(), &[fx.consult]).await.unwrap();
    assert_eq!(new_day.blocked_reason(t(14, 0)), Some(BlockReason::Booked));

    match rx.recv().await.unwrap() {
        Notification::BookingRescheduled { booking, previous_date_utc, previous_time_minutes } => {
            assert_eq!(booking.id, moved.id);
            assert_eq!(previous_date_utc, tuesday());
            assert_eq!(previous_time_minutes, t(10, 0));
        }
        other => panic!("unexpected notification: {other:?}"),
    }
    assert!(matches!(rx.recv().await.unwrap(), Notification::SlotFreed { .. }));
}

#[tokio::test]
async fn reschedule_may_overlap_its_own_interval() {
    let fx = fixture("reschedule_self.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let token = token_for(&fx, booking.id, ChallengePurpose::Reschedule).await;
    let moved = fx.engine.apply_reschedule(token, tuesday(), t(10, 30), None).await.unwrap();
    assert_eq!(moved.event_time_minutes, t(10, 30));
}

#[tokio::test]
async fn reschedule_into_taken_slot_keeps_booking_and_token() {
    let fx = fixture("reschedule_taken.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    book(&fx, wednesday(), t(9, 0), fx.consult).await;
    let token = token_for(&fx, booking.id, ChallengePurpose::Reschedule).await;

    let err = fx
        .engine
        .apply_reschedule(token, wednesday(), t(9, 30), None)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::SlotNoLongerAvailable);
    assert_eq!(fx.engine.get_booking(booking.id).await.unwrap(), booking);

    let moved = fx.engine.apply_reschedule(token, wednesday(), t(11, 0), None).await.unwrap();
    assert_eq!(moved.event_time_minutes, t(11, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reschedule_and_create_have_one_winner() {
    let fx = fixture("race.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let token = token_for(&fx, booking.id, ChallengePurpose::Reschedule).await;
    let rival = request(&fx, wednesday(), t(10, 0), fx.consult, "bob@example.com");

    let e1 = fx.engine.clone();
    let e2 = fx.engine.clone();
    let rival_id = rival.id;
    let (moved, created) = tokio::join!(
        tokio::spawn(async move { e1.apply_reschedule(token, wednesday(), t(10, 0), None).await }),
        tokio::spawn(async move { e2.create_booking(rival).await }),
    );
    let (moved, created) = (moved.unwrap(), created.unwrap());

    assert!(moved.is_ok() != created.is_ok(), "exactly one must win");
    if let Err(e) = &moved {
        assert_eq!(*e, EngineError::SlotNoLongerAvailable);
        assert_eq!(fx.engine.get_booking(booking.id).await.unwrap(), booking);
    }
    if let Err(e) = &created {
        assert_eq!(*e, EngineError::SlotNoLongerAvailable);
        assert!(matches!(fx.engine.get_booking(rival_id).await, Err(EngineError::NotFound(_))));
    }
    let wed = fx.engine.get_availability(fx.business, wednesday(), &[fx.consult]).await.unwrap();
    assert_eq!(wed.blocked_reason(t(10, 0)), Some(BlockReason::Booked));
}

#[tokio::test]
async fn abandoned_request_has_no_effect() {
    let fx = fixture("abandoned.journal", 0).await;
    let req = request(&fx, tuesday(), t(10, 0), fx.consult, "ann@example.com");

    let held = fx.engine.lock_date(fx.business, tuesday()).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        trigger.cancel();
    });
    let result = cancellable(&cancel, fx.engine.create_booking(req.clone())).await;
    assert_eq!(result, Err(EngineError::RequestCancelled));
    drop(held);

    assert!(fx.engine.list_bookings(fx.business).await.unwrap().is_empty());
    let slots = fx.engine.get_availability(fx.business, tuesday(), &[fx.consult]).await.unwrap();
    assert!(slots.is_available(t(10, 0)));

    // The same request goes through once retried.
    let booking = cancellable(&CancellationToken::new(), fx.engine.create_booking(req)).await.unwrap();
    assert_eq!(booking.event_time_minutes, t(10, 0));
}

// ── Waitlist ─────────────────────────────────────────────────

#[tokio::test]
async fn waitlist_accepts_booked_slots_only() {
    let fx = fixture("waitlist.journal", 0).await;
    book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let contact = Contact::new("wait@example.com");

    let entries = fx
        .engine
        .join_waitlist(fx.business, tuesday(), &[fx.quick], WaitlistSelection::Single(t(10, 0)), contact.clone())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);

    // Joining again does not duplicate.
    fx.engine
        .join_waitlist(fx.business, tuesday(), &[fx.quick], WaitlistSelection::Single(t(10, 0)), contact.clone())
        .await
        .unwrap();
    assert_eq!(fx.engine.list_waitlist(fx.business).await.unwrap().len(), 1);

    let all = fx
        .engine
        .join_waitlist(fx.business, tuesday(), &[fx.quick], WaitlistSelection::All, contact.clone())
        .await
        .unwrap();
    let times: Vec<TimeOfDay> = all.iter().map(|e| e.event_time_minutes).collect();
    assert_eq!(times, vec![t(10, 0), t(10, 30)]);
    assert_eq!(fx.engine.list_waitlist_on(fx.business, tuesday()).await.unwrap().len(), 2);

    let free = fx
        .engine
        .join_waitlist(fx.business, tuesday(), &[fx.quick], WaitlistSelection::Single(t(11, 0)), contact.clone())
        .await;
    assert!(matches!(free, Err(EngineError::InvalidSelection(_))));

    let far = fx
        .engine
        .join_waitlist(fx.business, day(2026, 4, 10), &[fx.quick], WaitlistSelection::All, contact)
        .await;
    assert!(matches!(far, Err(EngineError::OutsideNoticeWindow { .. })));
}

#[tokio::test]
async fn cancel_announces_freed_slot_to_waitlist() {
    let fx = fixture("slot_freed.journal", 0).await;
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    fx.engine
        .join_waitlist(
            fx.business,
            tuesday(),
            &[fx.quick],
            WaitlistSelection::Single(t(10, 30)),
            Contact::new("wait@example.com"),
        )
        .await
        .unwrap();

    let mut rx = fx.engine.notify.subscribe(fx.business);
    let token = token_for(&fx, booking.id, ChallengePurpose::Cancel).await;
    fx.engine.apply_cancel(token).await.unwrap();

    assert!(matches!(rx.recv().await.unwrap(), Notification::BookingCancelled { .. }));
    match rx.recv().await.unwrap() {
        Notification::SlotFreed { event_time_minutes, duration_minutes, waitlisted, .. } => {
            assert_eq!(event_time_minutes, t(10, 0));
            assert_eq!(duration_minutes, 60);
            assert_eq!(waitlisted.len(), 1);
            assert_eq!(waitlisted[0].contact_email, "wait@example.com");
        }
        other => panic!("unexpected notification: {other:?}"),
    }
}

// ── Journal ──────────────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let fx = fixture("restart.journal", 0).await;
    let path = fx.engine.journal.lock().await.path().to_path_buf();
    let booking = book(&fx, tuesday(), t(10, 0), fx.consult).await;
    let gone = book(&fx, tuesday(), t(14, 0), fx.quick).await;
    let token = token_for(&fx, booking.id, ChallengePurpose::Reschedule).await;
    fx.engine.apply_reschedule(token, wednesday(), t(9, 0), Some("moved".into())).await.unwrap();
    let token = token_for(&fx, gone.id, ChallengePurpose::Cancel).await;
    fx.engine.apply_cancel(token).await.unwrap();
    fx.engine
        .join_waitlist(fx.business, wednesday(), &[fx.quick], WaitlistSelection::All, Contact::new("w@example.com"))
        .await
        .unwrap();
    let business = fx.business;
    let clock = fx.clock.clone();
    drop(fx);

    let sender = Arc::new(MemoryCodeSender::new());
    let engine = open_engine(&path, clock, sender.clone());
    let restored = engine.get_booking(booking.id).await.unwrap();
    assert_eq!(restored.event_date_utc, wednesday());
    assert_eq!(restored.version, 1);
    assert_eq!(restored.reschedule_reason.as_deref(), Some("moved"));
    assert_eq!(engine.get_booking(gone.id).await.unwrap().status, BookingStatus::Cancelled);
    assert_eq!(engine.list_services(business).await.unwrap().len(), 2);
    assert_eq!(engine.list_waitlist(business).await.unwrap().len(), 2);

    // The booking index is rebuilt too.
    engine
        .issue_challenge(booking.id, ChallengePurpose::Cancel, "ann@example.com")
        .await
        .unwrap();
    assert_eq!(sender.deliveries().len(), 1);
}

#[tokio::test]
async fn date_locks_are_pruned_when_idle() {
    let fx = fixture("date_locks.journal", 0).await;
    book(&fx, tuesday(), t(10, 0), fx.consult).await;
    book(&fx, wednesday(), t(10, 0), fx.consult).await;
    assert_eq!(fx.engine.date_lock_count(), 2);

    let held = fx.engine.lock_date(fx.business, tuesday()).await;
    assert_eq!(fx.engine.prune_date_locks(), 1);
    assert_eq!(fx.engine.date_lock_count(), 1);
    drop(held);
    assert_eq!(fx.engine.prune_date_locks(), 1);
}
