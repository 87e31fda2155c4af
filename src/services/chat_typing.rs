use std::time::Duration;
use tokio::time::Instant;

/// Peer typing indicator.
///
/// Each signal re-arms a deadline; the indicator clears itself when the
/// deadline passes without a follow-up signal.
#[derive(Debug, Clone)]
pub struct TypingIndicator {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl TypingIndicator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Record a signal. Returns true when the indicator turned on.
    pub fn signal(&mut self, now: Instant) -> bool {
        let was_active = self.is_active(now);
        self.deadline = Some(now + self.timeout);
        !was_active
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now < d)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Clear once the deadline has passed. Returns true when the indicator turned off.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(d) if now >= d => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.deadline = None;
    }
}
