//! Hard limits enforced by the engine. Requests exceeding these fail with
//! `EngineError::LimitExceeded` instead of degrading the shared state.

pub const MAX_BUSINESSES: usize = 10_000;
pub const MAX_SERVICES_PER_BUSINESS: usize = 512;
pub const MAX_SERVICES_PER_REQUEST: usize = 32;
pub const MAX_BOOKINGS_PER_BUSINESS: usize = 500_000;
pub const MAX_WAITLIST_PER_BUSINESS: usize = 100_000;
pub const MAX_SELECTION_SLOTS: usize = 288;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_REASON_LEN: usize = 1024;

/// Offsets span UTC-12:00 through UTC+14:00.
pub const MIN_UTC_OFFSET_MINUTES: i32 = -720;
pub const MAX_UTC_OFFSET_MINUTES: i32 = 840;

pub const MAX_NOTICE_DAYS: u32 = 730;
pub const MAX_SLOT_MINUTES: u16 = 720;
pub const MAX_LEAD_TIME_HOURS: u32 = 24 * 90;

pub const MIN_CODE_DIGITS: u32 = 4;
pub const MAX_CODE_DIGITS: u32 = 10;
