//! Per-provider circuit breakers
//!
//! State machine: closed -> open after `failure_threshold` consecutive
//! retryable failures; open -> half-open only once the wall clock passes
//! `open_until`; half-open -> closed after `success_threshold` consecutive
//! successes; any failure while half-open reopens immediately with a fresh
//! `open_until`. While half-open, at most `half_open_max_probes` requests
//! are in flight at a time.
//!
//! Non-retryable failures (bad token, invalid recipient, auth error) are a
//! caller problem, not a service outage, and never count toward the circuit.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self::Closed
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive retryable failures before opening.
    pub failure_threshold: u32,
    /// Consecutive successes in half-open before closing.
    pub success_threshold: u32,
    /// Time before transitioning from open to half-open.
    pub reset_timeout: Duration,
    /// Concurrent probes allowed while half-open.
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(60),
            half_open_max_probes: 2,
        }
    }
}

/// Snapshot of a breaker for health reporting.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DateTime<Utc>>,
    pub rejected_calls: u64,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    open_until: Option<Instant>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
}

/// Circuit breaker for one provider.
pub struct CircuitBreaker {
    name: String,
    inner: RwLock<Inner>,
    half_open_inflight: AtomicU32,
    rejected_calls: std::sync::atomic::AtomicU64,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                open_until: None,
                last_success: None,
                last_failure: None,
            }),
            half_open_inflight: AtomicU32::new(0),
            rejected_calls: std::sync::atomic::AtomicU64::new(0),
            config,
        }
    }

    /// Check whether a request may proceed. Half-open admission counts as an
    /// in-flight probe until the caller reports success or failure.
    pub fn allow_request(&self) -> bool {
        let allowed = self.check_and_transition();
        if !allowed {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    fn check_and_transition(&self) -> bool {
        {
            let inner = self.inner.read();
            match inner.state {
                CircuitState::Closed => return true,
                CircuitState::Open => {
                    let due = inner
                        .open_until
                        .map(|until| Instant::now() >= until)
                        .unwrap_or(true);
                    if !due {
                        return false;
                    }
                    // fall through to upgrade under the write lock
                }
                CircuitState::HalfOpen => {
                    return self.try_acquire_probe();
                }
            }
        }

        let mut inner = self.inner.write();
        // Re-check: another caller may have transitioned first.
        if inner.state == CircuitState::Open {
            let due = inner
                .open_until
                .map(|until| Instant::now() >= until)
                .unwrap_or(true);
            if !due {
                return false;
            }
            inner.state = CircuitState::HalfOpen;
            inner.consecutive_successes = 0;
            self.half_open_inflight.store(0, Ordering::SeqCst);
            debug!(provider = %self.name, "Circuit transitioning to half-open");
        }
        drop(inner);
        self.try_acquire_probe()
    }

    fn try_acquire_probe(&self) -> bool {
        let max = self.config.half_open_max_probes;
        let mut current = self.half_open_inflight.load(Ordering::SeqCst);
        loop {
            if current >= max {
                return false;
            }
            match self.half_open_inflight.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release_probe(&self) {
        let _ = self
            .half_open_inflight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        inner.consecutive_failures = 0;
        inner.last_success = Some(Utc::now());

        match inner.state {
            CircuitState::HalfOpen => {
                self.release_probe();
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.open_until = None;
                    info!(
                        provider = %self.name,
                        successes = inner.consecutive_successes,
                        "Circuit closed"
                    );
                }
            }
            CircuitState::Closed => {
                inner.consecutive_successes += 1;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a retryable failure. Non-retryable failures must not be
    /// reported here.
    pub fn record_failure(&self) {
        let mut inner = self.inner.write();
        inner.consecutive_successes = 0;
        inner.last_failure = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.open_until = Some(Instant::now() + self.config.reset_timeout);
                    warn!(
                        provider = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.release_probe();
                inner.state = CircuitState::Open;
                inner.open_until = Some(Instant::now() + self.config.reset_timeout);
                inner.consecutive_failures += 1;
                warn!(provider = %self.name, "Circuit re-opened on half-open failure");
            }
            CircuitState::Open => {
                inner.consecutive_failures += 1;
            }
        }
    }

    /// Record a non-retryable failure: a caller problem (bad token, invalid
    /// recipient, auth error) that must not count toward the circuit. Only
    /// releases the half-open probe slot, if any.
    pub fn record_non_retryable(&self) {
        if self.inner.read().state == CircuitState::HalfOpen {
            self.release_probe();
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.read();
        CircuitStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_success: inner.last_success,
            last_failure: inner.last_failure,
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
        }
    }

    /// Force the breaker back to closed (operational override).
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.open_until = None;
        self.half_open_inflight.store(0, Ordering::SeqCst);
    }
}

/// Registry of per-provider circuit breakers.
pub struct CircuitRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
}

impl CircuitRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get or create the breaker for a provider.
    pub fn get(&self, provider: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read();
            if let Some(breaker) = breakers.get(provider) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.breakers.write();
        breakers
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(provider.to_string(), self.config.clone()))
            })
            .clone()
    }

    pub fn all_stats(&self) -> HashMap<String, CircuitStats> {
        let breakers = self.breakers.read();
        breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.stats()))
            .collect()
    }

    pub fn open_count(&self) -> usize {
        let breakers = self.breakers.read();
        breakers
            .values()
            .filter(|b| b.state() == CircuitState::Open)
            .count()
    }

    pub fn reset(&self, provider: &str) -> bool {
        let breakers = self.breakers.read();
        if let Some(breaker) = breakers.get(provider) {
            breaker.reset();
            true
        } else {
            false
        }
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(50),
            half_open_max_probes: 2,
        }
    }

    #[test]
    fn test_trips_after_threshold() {
        let cb = CircuitBreaker::new("apns", fast_config());
        assert!(cb.allow_request());

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_open_until_gates_half_open() {
        let cb = CircuitBreaker::new("fcm", fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(!cb.allow_request());

        std::thread::sleep(Duration::from_millis(60));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_probe_cap() {
        let cb = CircuitBreaker::new("resend", fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));

        assert!(cb.allow_request());
        assert!(cb.allow_request());
        // Two probes in flight, the third is rejected.
        assert!(!cb.allow_request());

        cb.record_success();
        assert!(cb.allow_request());
    }

    #[test]
    fn test_half_open_closes_after_successes() {
        let cb = CircuitBreaker::new("deepl", fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));

        assert!(cb.allow_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.allow_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("google", fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));

        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // Fresh open_until, so immediately rejected again.
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let cb = CircuitBreaker::new("ses", fast_config());
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_shares_breakers() {
        let registry = CircuitRegistry::new(fast_config());
        let a = registry.get("apns");
        let b = registry.get("apns");
        a.record_failure();
        a.record_failure();
        a.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(registry.open_count(), 1);
    }
}
