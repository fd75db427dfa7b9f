use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use super::policy::DenyReason;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("{date} is outside the booking notice window")]
    OutsideNoticeWindow { date: NaiveDate },

    #[error("time value {0} is outside 00:00-23:59")]
    InvalidRange(i64),

    #[error("invalid waitlist selection: {0}")]
    InvalidSelection(String),

    #[error("booking is already cancelled")]
    AlreadyCancelled,

    #[error("the booked event has already started")]
    EventAlreadyPassed,

    #[error("changes are locked within {hours}h of the event start")]
    WithinLockoutWindow { hours: u32 },

    #[error("verification code is not valid")]
    InvalidCode,

    #[error("verification has expired")]
    Expired,

    #[error("the requested slot is no longer available")]
    SlotNoLongerAvailable,

    #[error("request was cancelled before it completed")]
    RequestCancelled,

    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("already exists: {0}")]
    AlreadyExists(Ulid),

    #[error("unknown service: {0}")]
    UnknownService(Ulid),

    #[error("contact email does not match the booking")]
    ContactMismatch,

    #[error("verification token is not valid for this request")]
    InvalidToken,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("code delivery failed: {0}")]
    Delivery(String),

    #[error("journal error: {0}")]
    Journal(String),
}

impl EngineError {
    /// Stable label for metrics and wire error mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::OutsideNoticeWindow { .. } => "outside_notice_window",
            EngineError::InvalidRange(_) => "invalid_range",
            EngineError::InvalidSelection(_) => "invalid_selection",
            EngineError::AlreadyCancelled => "already_cancelled",
            EngineError::EventAlreadyPassed => "event_already_passed",
            EngineError::WithinLockoutWindow { .. } => "within_lockout_window",
            EngineError::InvalidCode => "invalid_code",
            EngineError::Expired => "expired",
            EngineError::SlotNoLongerAvailable => "slot_no_longer_available",
            EngineError::RequestCancelled => "request_cancelled",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::UnknownService(_) => "unknown_service",
            EngineError::ContactMismatch => "contact_mismatch",
            EngineError::InvalidToken => "invalid_token",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Delivery(_) => "delivery",
            EngineError::Journal(_) => "journal",
        }
    }
}

impl From<DenyReason> for EngineError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::AlreadyCancelled => EngineError::AlreadyCancelled,
            DenyReason::EventAlreadyPassed => EngineError::EventAlreadyPassed,
            DenyReason::WithinLockoutWindow { hours } => EngineError::WithinLockoutWindow { hours },
        }
    }
}
