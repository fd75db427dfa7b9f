use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{ChallengePurpose, Notification};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for business-side notifications, one channel per business.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a business. Creates the channel if needed.
    pub fn subscribe(&self, business_id: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(business_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, business_id: Ulid, notification: Notification) {
        if let Some(sender) = self.channels.get(&business_id) {
            let _ = sender.send(notification);
        }
    }

    /// Drop channels whose subscribers have all gone away.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before - self.channels.len()
    }
}

// ── Out-of-band code delivery ─────────────────────────────────────

/// A one-time code on its way to a booking's contact address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDelivery {
    pub booking_id: Ulid,
    pub purpose: ChallengePurpose,
    pub contact_email: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct DeliveryError(pub String);

/// Email/SMS gateway that carries one-time codes to clients.
#[async_trait]
pub trait CodeSender: Send + Sync {
    async fn send_code(&self, delivery: &CodeDelivery) -> Result<(), DeliveryError>;
}

/// Writes deliveries to the log. Suitable for development only.
pub struct LogCodeSender;

#[async_trait]
impl CodeSender for LogCodeSender {
    async fn send_code(&self, delivery: &CodeDelivery) -> Result<(), DeliveryError> {
        tracing::info!(
            booking = %delivery.booking_id,
            purpose = delivery.purpose.as_str(),
            to = %delivery.contact_email,
            "verification code issued"
        );
        tracing::debug!(booking = %delivery.booking_id, code = %delivery.code, "verification code");
        Ok(())
    }
}

/// Keeps every delivery in memory.
#[derive(Default)]
pub struct MemoryCodeSender {
    sent: Mutex<Vec<CodeDelivery>>,
}

impl MemoryCodeSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<CodeDelivery> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Most recent code sent for a booking and purpose.
    pub fn last_code(&self, booking_id: Ulid, purpose: ChallengePurpose) -> Option<String> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|d| d.booking_id == booking_id && d.purpose == purpose)
            .map(|d| d.code.clone())
    }
}

#[async_trait]
impl CodeSender for MemoryCodeSender {
    async fn send_code(&self, delivery: &CodeDelivery) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(delivery.clone());
        Ok(())
    }
}
