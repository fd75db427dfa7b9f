use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::ChallengePurpose;
use crate::notify::CodeDelivery;

use super::{Engine, EngineError, VerifiedToken, can_mutate};

/// What the caller learns about an issued challenge. The code itself only
/// travels through the `CodeSender`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedChallenge {
    pub challenge_id: Ulid,
    pub booking_id: Ulid,
    pub purpose: ChallengePurpose,
    pub expires_at: DateTime<Utc>,
}

impl Engine {
    /// Send a one-time code to the booking's contact address.
    ///
    /// The submitted email must match the booking's contact and the policy
    /// must currently allow the change. The challenge is recorded only once
    /// delivery succeeded, so an abandoned or failed send leaves nothing live.
    pub async fn issue_challenge(
        &self,
        booking_id: Ulid,
        purpose: ChallengePurpose,
        contact_email: &str,
    ) -> Result<IssuedChallenge, EngineError> {
        let (business_id, state) = self.business_of(booking_id)?;
        let (booking, policy) = {
            let guard = state.read().await;
            (guard.booking(booking_id)?.clone(), guard.policy)
        };
        if !booking.contact.email_matches(contact_email) {
            return Err(EngineError::ContactMismatch);
        }
        let now = self.clock.now();
        can_mutate(&booking, &policy, purpose, now).into_result()?;

        let code = self.challenges.generate_code();
        let delivery = CodeDelivery {
            booking_id,
            purpose,
            contact_email: booking.contact.email.clone(),
            code,
            expires_at: now + self.challenges.settings().ttl,
        };
        if let Err(e) = self.sender.send_code(&delivery).await {
            metrics::counter!(crate::observability::CHALLENGES_ISSUED_TOTAL, "status" => "delivery_failed")
                .increment(1);
            tracing::warn!(booking = %booking_id, "code delivery failed: {e}");
            return Err(EngineError::Delivery(e.to_string()));
        }

        let record = self.challenges.record(
            booking_id,
            business_id,
            purpose,
            delivery.contact_email,
            delivery.code,
            now,
        );
        metrics::counter!(crate::observability::CHALLENGES_ISSUED_TOTAL, "status" => "ok").increment(1);
        tracing::info!(booking = %booking_id, challenge = %record.id, purpose = purpose.as_str(), "challenge issued");
        Ok(IssuedChallenge {
            challenge_id: record.id,
            booking_id,
            purpose,
            expires_at: record.expires_at,
        })
    }

    pub fn verify_challenge(&self, challenge_id: Ulid, code: &str) -> Result<VerifiedToken, EngineError> {
        let result = self.challenges.verify(challenge_id, code, self.clock.now());
        let outcome = match &result {
            Ok(_) => "verified",
            Err(e) => e.kind(),
        };
        metrics::counter!(crate::observability::CHALLENGE_VERIFICATIONS_TOTAL, "outcome" => outcome).increment(1);
        if let Ok(token) = &result {
            tracing::info!(booking = %token.booking_id, challenge = %challenge_id, "challenge verified");
        }
        result
    }

    /// Verify against the live challenge of a booking and purpose.
    pub fn verify_for_booking(
        &self,
        booking_id: Ulid,
        purpose: ChallengePurpose,
        code: &str,
    ) -> Result<VerifiedToken, EngineError> {
        let challenge_id = self
            .challenges
            .live_challenge(booking_id, purpose)
            .ok_or(EngineError::InvalidCode)?;
        self.verify_challenge(challenge_id, code)
    }
}
