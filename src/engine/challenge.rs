use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use subtle::ConstantTimeEq;
use ulid::Ulid;

use crate::limits::{MAX_CODE_DIGITS, MIN_CODE_DIGITS};
use crate::model::{Booking, ChallengePurpose, TimeOfDay};

use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    NotIssued,
    Issued,
    Verified,
    Expired,
    /// Superseded by a newer code for the same booking and purpose.
    Invalidated,
}

impl ChallengeState {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeState::NotIssued => "not_issued",
            ChallengeState::Issued => "issued",
            ChallengeState::Verified => "verified",
            ChallengeState::Expired => "expired",
            ChallengeState::Invalidated => "invalidated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChallengeRecord {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub business_id: Ulid,
    pub purpose: ChallengePurpose,
    pub contact_email: String,
    code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: ChallengeState,
}

/// Proof that the holder of a booking's contact address passed a challenge.
/// Single use: once a mutation spends it, only a retry of that same mutation
/// is answered, with the committed outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub token: Ulid,
    pub booking_id: Ulid,
    pub business_id: Ulid,
    pub purpose: ChallengePurpose,
    pub expires_at: DateTime<Utc>,
}

/// The mutation a token was spent on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenUse {
    Cancel,
    Reschedule {
        date: NaiveDate,
        time: TimeOfDay,
        reason: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct SpentToken {
    token: VerifiedToken,
    used_for: TokenUse,
    outcome: Booking,
}

#[derive(Debug, Clone, Copy)]
pub struct ChallengeSettings {
    pub ttl: Duration,
    pub token_ttl: Duration,
    pub code_digits: u32,
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(10),
            token_ttl: Duration::minutes(15),
            code_digits: 6,
        }
    }
}

impl ChallengeSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(MIN_CODE_DIGITS..=MAX_CODE_DIGITS).contains(&self.code_digits) {
            return Err(EngineError::InvalidInput(format!(
                "code length {} out of range",
                self.code_digits
            )));
        }
        if self.ttl <= Duration::zero() || self.token_ttl <= Duration::zero() {
            return Err(EngineError::InvalidInput("challenge lifetimes must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub challenges: usize,
    pub tokens: usize,
}

/// In-memory store of issued challenges and the tokens they mint.
///
/// Lock order is `live` then `records`; no method takes them the other way.
pub struct ChallengeBook {
    records: DashMap<Ulid, ChallengeRecord>,
    /// Current challenge per (booking, purpose).
    live: DashMap<(Ulid, ChallengePurpose), Ulid>,
    tokens: DashMap<Ulid, VerifiedToken>,
    /// Spent tokens, kept until they would have expired.
    spent: DashMap<Ulid, SpentToken>,
    settings: ChallengeSettings,
}

impl ChallengeBook {
    pub fn new(settings: ChallengeSettings) -> Self {
        Self {
            records: DashMap::new(),
            live: DashMap::new(),
            tokens: DashMap::new(),
            spent: DashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> ChallengeSettings {
        self.settings
    }

    /// Fresh zero-padded numeric code.
    pub fn generate_code(&self) -> String {
        let digits = self.settings.code_digits.clamp(MIN_CODE_DIGITS, MAX_CODE_DIGITS);
        let modulus = 10u128.pow(digits);
        let value = Ulid::new().random() % modulus;
        format!("{value:0width$}", width = digits as usize)
    }

    /// Record a delivered code, superseding any live one for the same
    /// booking and purpose.
    pub fn record(
        &self,
        booking_id: Ulid,
        business_id: Ulid,
        purpose: ChallengePurpose,
        contact_email: String,
        code: String,
        now: DateTime<Utc>,
    ) -> ChallengeRecord {
        let record = ChallengeRecord {
            id: Ulid::new(),
            booking_id,
            business_id,
            purpose,
            contact_email,
            code,
            issued_at: now,
            expires_at: now + self.settings.ttl,
            state: ChallengeState::Issued,
        };

        let mut live = self.live.entry((booking_id, purpose)).or_insert(record.id);
        let previous = *live;
        *live = record.id;
        if previous != record.id
            && let Some(mut old) = self.records.get_mut(&previous)
            && old.state == ChallengeState::Issued
        {
            old.state = ChallengeState::Invalidated;
        }
        self.records.insert(record.id, record.clone());
        record
    }

    /// The current challenge for a booking and purpose, if one was issued.
    pub fn live_challenge(&self, booking_id: Ulid, purpose: ChallengePurpose) -> Option<Ulid> {
        self.live.get(&(booking_id, purpose)).map(|id| *id)
    }

    pub fn get(&self, challenge_id: Ulid) -> Option<ChallengeRecord> {
        self.records.get(&challenge_id).map(|r| r.clone())
    }

    /// State as a caller would observe it at `now`.
    pub fn state(&self, challenge_id: Ulid, now: DateTime<Utc>) -> ChallengeState {
        match self.records.get(&challenge_id) {
            None => ChallengeState::NotIssued,
            Some(r) if r.state == ChallengeState::Issued && now >= r.expires_at => ChallengeState::Expired,
            Some(r) => r.state,
        }
    }

    /// Check a submitted code. A wrong code leaves the challenge open; the
    /// right code closes it and mints a token.
    pub fn verify(&self, challenge_id: Ulid, code: &str, now: DateTime<Utc>) -> Result<VerifiedToken, EngineError> {
        let (booking_id, business_id, purpose) = {
            let Some(mut record) = self.records.get_mut(&challenge_id) else {
                return Err(EngineError::InvalidCode);
            };
            match record.state {
                ChallengeState::Issued => {}
                ChallengeState::Expired => return Err(EngineError::Expired),
                ChallengeState::NotIssued | ChallengeState::Verified | ChallengeState::Invalidated => {
                    return Err(EngineError::InvalidCode);
                }
            }
            if now >= record.expires_at {
                record.state = ChallengeState::Expired;
                return Err(EngineError::Expired);
            }
            if !codes_match(&record.code, code) {
                return Err(EngineError::InvalidCode);
            }
            record.state = ChallengeState::Verified;
            (record.booking_id, record.business_id, record.purpose)
        };
        self.live.remove_if(&(booking_id, purpose), |_, id| *id == challenge_id);

        let token = VerifiedToken {
            token: Ulid::new(),
            booking_id,
            business_id,
            purpose,
            expires_at: now + self.settings.token_ttl,
        };
        self.tokens.insert(token.token, token.clone());
        Ok(token)
    }

    /// Look up a token without spending it.
    pub fn check_token(
        &self,
        token: Ulid,
        purpose: ChallengePurpose,
        now: DateTime<Utc>,
    ) -> Result<VerifiedToken, EngineError> {
        let found = self
            .tokens
            .get(&token)
            .map(|t| t.clone())
            .ok_or(EngineError::InvalidToken)?;
        if found.purpose != purpose {
            return Err(EngineError::InvalidToken);
        }
        if now >= found.expires_at {
            return Err(EngineError::Expired);
        }
        Ok(found)
    }

    /// Remove a token. Returns it if it was still present.
    pub fn take_token(&self, token: Ulid) -> Option<VerifiedToken> {
        self.tokens.remove(&token).map(|(_, t)| t)
    }

    /// Put back a token whose mutation failed to commit.
    pub fn restore_token(&self, token: VerifiedToken) {
        self.tokens.insert(token.token, token);
    }

    /// Remember what a taken token committed so a retry gets the same answer.
    pub fn record_spent(&self, token: VerifiedToken, used_for: TokenUse, outcome: Booking) {
        self.spent.insert(token.token, SpentToken { token, used_for, outcome });
    }

    /// The committed outcome when `token` was already spent on `used_for`.
    /// `None` if the token was never spent.
    pub fn replay(&self, token: Ulid, used_for: &TokenUse, now: DateTime<Utc>) -> Option<Result<Booking, EngineError>> {
        let spent = self.spent.get(&token)?;
        if now >= spent.token.expires_at {
            return Some(Err(EngineError::Expired));
        }
        if spent.used_for != *used_for {
            return Some(Err(EngineError::InvalidToken));
        }
        Some(Ok(spent.outcome.clone()))
    }

    /// Drop challenges and tokens past their lifetime.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepStats {
        let challenges_before = self.records.len();
        let tokens_before = self.tokens.len() + self.spent.len();

        self.live.retain(|_, id| {
            self.records
                .get(id)
                .is_some_and(|r| r.expires_at > now)
        });
        self.records.retain(|_, r| r.expires_at > now);
        self.tokens.retain(|_, t| t.expires_at > now);
        self.spent.retain(|_, s| s.token.expires_at > now);

        SweepStats {
            challenges: challenges_before.saturating_sub(self.records.len()),
            tokens: tokens_before.saturating_sub(self.tokens.len() + self.spent.len()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Business a live or spent token belongs to.
    pub fn token_business(&self, token: Ulid) -> Option<Ulid> {
        self.tokens
            .get(&token)
            .map(|t| t.business_id)
            .or_else(|| self.spent.get(&token).map(|s| s.token.business_id))
    }
}

fn codes_match(expected: &str, submitted: &str) -> bool {
    expected.as_bytes().ct_eq(submitted.trim().as_bytes()).into()
}
