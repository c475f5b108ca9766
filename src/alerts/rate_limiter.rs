use crate::records::Timestamp;
use chrono::Duration;
use std::collections::VecDeque;

/// Sliding-window limiter for outgoing alert notifications
///
/// Tracks the send times of recent notifications and allows at most
/// `max_per_minute` of them in any trailing one-minute window. Callers pass
/// the current time explicitly so the window follows the engine clock.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_minute: usize,
    recent_notifications: VecDeque<Timestamp>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10)
    }
}

impl RateLimiter {
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            max_per_minute,
            recent_notifications: VecDeque::new(),
        }
    }

    pub fn max_per_minute(&self) -> usize {
        self.max_per_minute
    }

    /// Whether one more notification fits in the window ending at `now`
    pub fn can_send_at(&mut self, now: Timestamp) -> bool {
        self.cleanup_before(now);
        self.recent_notifications.len() < self.max_per_minute
    }

    /// Record a notification sent at `timestamp`
    pub fn record_notification_at(&mut self, timestamp: Timestamp) {
        self.recent_notifications.push_back(timestamp);
    }

    /// Check and record in one step
    ///
    /// Returns `false` without recording when the window is full.
    pub fn try_acquire(&mut self, now: Timestamp) -> bool {
        if !self.can_send_at(now) {
            return false;
        }
        self.record_notification_at(now);
        true
    }

    /// Notifications counted in the window ending at `now`
    pub fn current_count_at(&mut self, now: Timestamp) -> usize {
        self.cleanup_before(now);
        self.recent_notifications.len()
    }

    fn cleanup_before(&mut self, now: Timestamp) {
        let cutoff = now - Duration::minutes(1);
        // Timestamps may be recorded out of order, so scan the whole window
        self.recent_notifications.retain(|&time| time > cutoff);
    }
}
