//! Auto-reconnect backoff scheduler.
//!
//! A `tokio::time::interval`-driven background task, replacing the original
//! polling thread with a single-runtime timer source (SPEC_FULL.md §9).

use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const FAST_BACKOFF: Duration = Duration::from_secs(10);
const SLOW_BACKOFF: Duration = Duration::from_secs(60);
const FAST_BACKOFF_ATTEMPTS: u32 = 30;

/// `(attempt_count, next_attempt_time)`. `None` for `next_attempt_time`
/// suppresses the worker (set by a manual `disconnect()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectStatus {
    attempt_count: u32,
    next_attempt_time: Option<Instant>,
}

impl ReconnectStatus {
    /// Initial state right after a disconnect: attempt immediately.
    pub fn fresh(now: Instant) -> Self {
        Self { attempt_count: 0, next_attempt_time: Some(now) }
    }

    /// Suppressed state after a manual `disconnect()`.
    pub fn suppressed() -> Self {
        Self { attempt_count: 0, next_attempt_time: None }
    }

    pub fn is_suppressed(&self) -> bool {
        self.next_attempt_time.is_none()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// True if `now` has reached the scheduled next attempt.
    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self.next_attempt_time, Some(t) if now >= t)
    }

    /// Advance after a failed or still-pending attempt.
    pub fn advance(&mut self, now: Instant) {
        let backoff = if self.attempt_count < FAST_BACKOFF_ATTEMPTS { FAST_BACKOFF } else { SLOW_BACKOFF };
        self.attempt_count += 1;
        self.next_attempt_time = Some(now + backoff);
    }

    /// Reset after a successful connect.
    pub fn reset(&mut self, now: Instant) {
        self.attempt_count = 0;
        self.next_attempt_time = Some(now);
    }

    /// Suppress further automatic attempts until the next `reconnect()`.
    pub fn suppress(&mut self) {
        self.next_attempt_time = None;
    }
}

pub fn poll_interval() -> Duration {
    POLL_INTERVAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_status_is_due_immediately() {
        let now = Instant::now();
        let status = ReconnectStatus::fresh(now);
        assert!(status.is_due(now));
    }

    #[test]
    fn backoff_is_ten_seconds_for_first_thirty_attempts() {
        let mut status = ReconnectStatus::fresh(Instant::now());
        let start = Instant::now();
        for _ in 0..FAST_BACKOFF_ATTEMPTS {
            status.advance(start);
        }
        assert_eq!(status.attempt_count(), FAST_BACKOFF_ATTEMPTS);
    }

    #[test]
    fn backoff_switches_to_sixty_seconds_after_thirty_attempts() {
        let mut status = ReconnectStatus::fresh(Instant::now());
        let now = Instant::now();
        for _ in 0..FAST_BACKOFF_ATTEMPTS {
            status.advance(now);
        }
        let before = status;
        status.advance(now);
        let elapsed = status
            .next_attempt_time
            .unwrap()
            .duration_since(before.next_attempt_time.unwrap());
        // thirty-first attempt should schedule the 60s tier, not another 10s.
        assert!(elapsed >= SLOW_BACKOFF - FAST_BACKOFF);
    }

    #[test]
    fn successful_connect_resets_attempt_count() {
        let mut status = ReconnectStatus::fresh(Instant::now());
        let now = Instant::now();
        for _ in 0..5 {
            status.advance(now);
        }
        assert_eq!(status.attempt_count(), 5);
        status.reset(now);
        assert_eq!(status.attempt_count(), 0);
    }

    #[test]
    fn manual_disconnect_suppresses_worker() {
        let mut status = ReconnectStatus::fresh(Instant::now());
        status.suppress();
        assert!(status.is_suppressed());
        assert!(!status.is_due(Instant::now() + Duration::from_secs(3600)));
    }
}
