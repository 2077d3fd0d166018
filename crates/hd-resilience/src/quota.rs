//! Provider quota gating
//!
//! Two signals with different horizons:
//! - the persisted monthly counter (checked by callers via the store) is
//!   authoritative for provider selection;
//! - an explicit quota rejection from a provider's own API marks the
//!   provider exhausted here for a short in-process cooldown.
//!
//! Quota checks are fail-open: when the counter store is unreachable the
//! provider is tried anyway and its API is left to refuse.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::info;

pub struct QuotaGate {
    cooldown: Duration,
    exhausted_until: Mutex<HashMap<String, Instant>>,
}

impl QuotaGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            exhausted_until: Mutex::new(HashMap::new()),
        }
    }

    /// Mark a provider exhausted after its API rejected for quota.
    pub fn mark_exhausted(&self, provider: &str) {
        let until = Instant::now() + self.cooldown;
        self.exhausted_until
            .lock()
            .insert(provider.to_string(), until);
        info!(
            provider = %provider,
            cooldown_secs = self.cooldown.as_secs(),
            "Provider marked quota-exhausted"
        );
    }

    /// Whether a provider is inside its exhaustion cooldown.
    pub fn is_exhausted(&self, provider: &str) -> bool {
        let mut map = self.exhausted_until.lock();
        match map.get(provider) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                map.remove(provider);
                false
            }
            None => false,
        }
    }
}

impl Default for QuotaGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_expires() {
        let gate = QuotaGate::new(Duration::from_millis(30));
        assert!(!gate.is_exhausted("deepl"));

        gate.mark_exhausted("deepl");
        assert!(gate.is_exhausted("deepl"));
        assert!(!gate.is_exhausted("google"));

        std::thread::sleep(Duration::from_millis(40));
        assert!(!gate.is_exhausted("deepl"));
    }
}
