//! Deadline arithmetic
//!
//! Every external call is deadline-guarded. A `Deadline` is derived from the
//! request's own deadline or a per-channel default, and backoff is capped by
//! the time remaining; once the deadline elapses no further retries start.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Cap a backoff delay so it never outlives the deadline. Returns None
    /// when the delay would exceed the remaining time (skip backoff, give up).
    pub fn cap(&self, delay: Duration) -> Option<Duration> {
        let remaining = self.remaining();
        if remaining.is_zero() || delay >= remaining {
            None
        } else {
            Some(delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_counts_down() {
        let deadline = Deadline::after(Duration::from_millis(100));
        assert!(!deadline.expired());
        assert!(deadline.remaining() <= Duration::from_millis(100));
    }

    #[test]
    fn test_cap_refuses_overlong_backoff() {
        let deadline = Deadline::after(Duration::from_millis(50));
        assert!(deadline.cap(Duration::from_millis(10)).is_some());
        assert!(deadline.cap(Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_expired() {
        let deadline = Deadline::after(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert!(deadline.cap(Duration::from_millis(1)).is_none());
    }
}
