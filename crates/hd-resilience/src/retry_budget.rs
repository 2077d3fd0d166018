//! Process-wide retry budget
//!
//! A bucket of N retries per rolling window, shared across all adapters in a
//! process. When a backend degrades, the budget drains and further retries
//! are refused until the window rolls over, so a transient outage does not
//! turn into a retry storm.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

struct Window {
    remaining: u32,
    window_start: Instant,
}

pub struct RetryBudget {
    max: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl RetryBudget {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            state: Mutex::new(Window {
                remaining: max,
                window_start: Instant::now(),
            }),
        }
    }

    /// Try to take one retry token. Returns false when the budget for the
    /// current window is spent.
    pub fn try_consume(&self) -> bool {
        let mut state = self.state.lock();
        if state.window_start.elapsed() >= self.window {
            state.remaining = self.max;
            state.window_start = Instant::now();
        }
        if state.remaining == 0 {
            debug!("Retry budget exhausted for current window");
            return false;
        }
        state.remaining -= 1;
        true
    }

    pub fn remaining(&self) -> u32 {
        let mut state = self.state.lock();
        if state.window_start.elapsed() >= self.window {
            state.remaining = self.max;
            state.window_start = Instant::now();
        }
        state.remaining
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(20, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_drains() {
        let budget = RetryBudget::new(3, Duration::from_secs(60));
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_window_refills() {
        let budget = RetryBudget::new(1, Duration::from_millis(30));
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        std::thread::sleep(Duration::from_millis(40));
        assert!(budget.try_consume());
    }
}
