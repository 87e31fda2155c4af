//! Socket sends awaiting their echo.
//!
//! A send pushed over the socket is confirmed asynchronously by a
//! `new_message` push. Entries that stay unconfirmed past the ack timeout
//! are handed back so the session can roll them back.

use std::time::Duration;
use tokio::time::Instant;

use super::chat_composer::Draft;

/// A socket send that has not been echoed yet.
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub placeholder_id: i64,
    pub client_ref: String,
    pub draft: Draft,
    pub sent_at: Instant,
}

/// FIFO of pending socket sends.
pub struct DeliveryQueue {
    pending: Vec<PendingDelivery>,
    ack_timeout: Duration,
}

impl DeliveryQueue {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            pending: Vec::new(),
            ack_timeout,
        }
    }

    pub fn enqueue(&mut self, delivery: PendingDelivery) {
        log::debug!(
            "Awaiting echo for placeholder {} ({})",
            delivery.placeholder_id,
            delivery.client_ref
        );
        self.pending.push(delivery);
    }

    /// The placeholder was confirmed.
    pub fn acknowledge(&mut self, placeholder_id: i64) -> Option<PendingDelivery> {
        let index = self
            .pending
            .iter()
            .position(|p| p.placeholder_id == placeholder_id)?;
        Some(self.pending.remove(index))
    }

    /// The server rejected a socket send without saying which; blame the oldest.
    pub fn reject_oldest(&mut self) -> Option<PendingDelivery> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0))
        }
    }

    /// When the oldest entry times out.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .iter()
            .map(|p| p.sent_at + self.ack_timeout)
            .min()
    }

    /// Remove and return every entry past its deadline.
    pub fn take_expired(&mut self, now: Instant) -> Vec<PendingDelivery> {
        let timeout = self.ack_timeout;
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|p| now >= p.sent_at + timeout);
        self.pending = kept;
        for delivery in &expired {
            log::warn!(
                "No echo for placeholder {} after {:?}",
                delivery.placeholder_id,
                timeout
            );
        }
        expired
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
