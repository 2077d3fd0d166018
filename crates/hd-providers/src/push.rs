//! Push channel fan-out
//!
//! One notification fans out to every active device token the user has; each
//! token goes through the platform transport under that platform's circuit
//! breaker (`push-ios`, `push-android`, `push-web`). Tokens the provider
//! reports invalid are deactivated in the token repository exactly once.

use crate::{execute_guarded, Attempt, GuardedOutcome};
use async_trait::async_trait;
use hd_common::{DeliveryOutcome, DeviceToken, ErrorCode, Notification, Platform};
use hd_resilience::{CircuitRegistry, Deadline, RetryBudget};
use hd_store::DeviceTokenRepository;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A platform-specific push transport. Implementations perform exactly one
/// network attempt; retry policy lives in the channel.
#[async_trait]
pub trait PushTransport: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn attempt(
        &self,
        notification: &Notification,
        token: &DeviceToken,
        timeout: Duration,
    ) -> Attempt;
}

#[async_trait]
impl PushTransport for crate::ApnsTransport {
    fn provider_name(&self) -> &'static str {
        "push-ios"
    }

    async fn attempt(
        &self,
        notification: &Notification,
        token: &DeviceToken,
        timeout: Duration,
    ) -> Attempt {
        self.send_once(notification, &token.token, timeout).await
    }
}

#[async_trait]
impl PushTransport for crate::FcmTransport {
    fn provider_name(&self) -> &'static str {
        "push-android"
    }

    async fn attempt(
        &self,
        notification: &Notification,
        token: &DeviceToken,
        timeout: Duration,
    ) -> Attempt {
        self.send_once(notification, &token.token, timeout).await
    }
}

#[async_trait]
impl PushTransport for crate::WebPushTransport {
    fn provider_name(&self) -> &'static str {
        "push-web"
    }

    async fn attempt(
        &self,
        notification: &Notification,
        token: &DeviceToken,
        timeout: Duration,
    ) -> Attempt {
        self.send_once(notification, &token.token, timeout).await
    }
}

/// Per-token result of a push fan-out.
#[derive(Debug, Clone)]
pub struct TokenOutcome {
    pub token: String,
    pub platform: Platform,
    pub outcome: DeliveryOutcome,
}

pub struct PushChannel {
    transports: HashMap<Platform, Arc<dyn PushTransport>>,
    circuits: Arc<CircuitRegistry>,
    budget: Arc<RetryBudget>,
    tokens: Arc<dyn DeviceTokenRepository>,
    max_retries: u32,
}

impl PushChannel {
    pub fn new(
        circuits: Arc<CircuitRegistry>,
        budget: Arc<RetryBudget>,
        tokens: Arc<dyn DeviceTokenRepository>,
        max_retries: u32,
    ) -> Self {
        Self {
            transports: HashMap::new(),
            circuits,
            budget,
            tokens,
            max_retries,
        }
    }

    pub fn with_transport(mut self, platform: Platform, transport: Arc<dyn PushTransport>) -> Self {
        self.transports.insert(platform, transport);
        self
    }

    pub fn has_transport(&self, platform: Platform) -> bool {
        self.transports.contains_key(&platform)
    }

    /// Send to every given token concurrently. Each token is guarded by its
    /// platform's circuit; invalid tokens are deactivated before returning.
    pub async fn send(
        &self,
        notification: &Notification,
        tokens: &[DeviceToken],
        deadline: Deadline,
    ) -> Vec<TokenOutcome> {
        let mut handles = Vec::with_capacity(tokens.len());

        for token in tokens {
            let transport = match self.transports.get(&token.platform) {
                Some(transport) => Arc::clone(transport),
                None => {
                    handles.push(Handle::Immediate(TokenOutcome {
                        token: token.token.clone(),
                        platform: token.platform,
                        outcome: DeliveryOutcome::failed(
                            ErrorCode::ServiceUnavailable,
                            format!("no transport configured for {}", token.platform.as_str()),
                        ),
                    }));
                    continue;
                }
            };

            let breaker = self.circuits.get(transport.provider_name());
            let budget = Arc::clone(&self.budget);
            let max_retries = self.max_retries;
            let notification = notification.clone();
            let token = token.clone();

            handles.push(Handle::Spawned(tokio::spawn(async move {
                let provider = transport.provider_name();
                let guarded: GuardedOutcome = execute_guarded(
                    provider,
                    &breaker,
                    &budget,
                    deadline,
                    max_retries,
                    || {
                        let timeout = deadline.remaining().max(Duration::from_millis(1));
                        transport.attempt(&notification, &token, timeout)
                    },
                )
                .await;
                (token, guarded)
            })));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle {
                Handle::Immediate(outcome) => outcomes.push(outcome),
                Handle::Spawned(join) => match join.await {
                    Ok((token, guarded)) => {
                        if guarded.invalid_target {
                            if let Err(e) = self.tokens.deactivate(&token.token).await {
                                warn!(error = %e, "Failed to deactivate invalid token");
                            } else {
                                info!(platform = token.platform.as_str(), "Deactivated invalid push token");
                            }
                        }
                        outcomes.push(TokenOutcome {
                            token: token.token,
                            platform: token.platform,
                            outcome: guarded.outcome,
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Push dispatch task panicked");
                    }
                },
            }
        }
        outcomes
    }

    /// Collapse per-token outcomes into the channel-level outcome.
    pub fn aggregate(outcomes: &[TokenOutcome]) -> DeliveryOutcome {
        if outcomes.is_empty() {
            return DeliveryOutcome::failed(ErrorCode::NoTargets, "no active device tokens");
        }
        if let Some(success) = outcomes.iter().find(|o| o.outcome.is_success()) {
            return success.outcome.clone();
        }
        // All failed: prefer the circuit-open signal so callers can route.
        if let Some(open) = outcomes.iter().find(|o| {
            matches!(&o.outcome, DeliveryOutcome::Failed { code: ErrorCode::CircuitOpen, .. })
        }) {
            return open.outcome.clone();
        }
        outcomes[0].outcome.clone()
    }
}

enum Handle {
    Immediate(TokenOutcome),
    Spawned(tokio::task::JoinHandle<(DeviceToken, GuardedOutcome)>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hd_resilience::CircuitBreakerConfig;
    use hd_store::memory::MemoryDeviceTokens;
    use parking_lot::Mutex;
    use uuid::Uuid;

    struct FakeTransport {
        name: &'static str,
        script: Mutex<Vec<Attempt>>,
        calls: std::sync::atomic::AtomicU32,
    }

    impl FakeTransport {
        fn new(name: &'static str, script: Vec<Attempt>) -> Self {
            Self {
                name,
                script: Mutex::new(script),
                calls: std::sync::atomic::AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PushTransport for FakeTransport {
        fn provider_name(&self) -> &'static str {
            self.name
        }

        async fn attempt(
            &self,
            _notification: &Notification,
            _token: &DeviceToken,
            _timeout: Duration,
        ) -> Attempt {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut script = self.script.lock();
            if script.is_empty() {
                Attempt::Success { latency_ms: 1, message_id: None }
            } else {
                script.remove(0)
            }
        }
    }

    fn device_token(platform: Platform, token: &str) -> DeviceToken {
        DeviceToken {
            user_id: Uuid::new_v4(),
            token: token.to_string(),
            platform,
            is_active: true,
            p256dh: None,
            auth: None,
            last_used_at: None,
            created_at: Utc::now(),
        }
    }

    fn registry() -> Arc<CircuitRegistry> {
        Arc::new(CircuitRegistry::new(CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(60),
            half_open_max_probes: 2,
        }))
    }

    #[tokio::test]
    async fn test_invalid_token_deactivated_once() {
        let tokens = Arc::new(MemoryDeviceTokens::new());
        let token = device_token(Platform::Android, "bad-token");
        tokens.seed(token.clone());

        let circuits = registry();
        let transport = Arc::new(FakeTransport::new(
            "push-android",
            vec![Attempt::Fatal {
                code: ErrorCode::NoTargets,
                message: "UNREGISTERED".to_string(),
                invalid_target: true,
            }],
        ));
        let channel = PushChannel::new(
            Arc::clone(&circuits),
            Arc::new(RetryBudget::default()),
            tokens.clone(),
            1,
        )
        .with_transport(Platform::Android, transport.clone());

        let n = Notification::new(Uuid::new_v4(), hd_common::NotificationType::NewMessage, "t", "b");
        let outcomes = channel
            .send(&n, &[token], Deadline::after(Duration::from_secs(5)))
            .await;

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].outcome.is_success());
        assert_eq!(tokens.deactivated.lock().as_slice(), ["bad-token".to_string()]);
        // invalid token is not a circuit failure
        let stats = circuits.get("push-android").stats();
        assert_eq!(stats.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_open_circuit_means_zero_network_calls() {
        let tokens = Arc::new(MemoryDeviceTokens::new());
        let circuits = registry();
        let breaker = circuits.get("push-ios");
        for _ in 0..3 {
            breaker.record_failure();
        }

        let transport = Arc::new(FakeTransport::new("push-ios", vec![]));
        let channel = PushChannel::new(
            circuits,
            Arc::new(RetryBudget::default()),
            tokens,
            1,
        )
        .with_transport(Platform::Ios, transport.clone());

        let n = Notification::new(Uuid::new_v4(), hd_common::NotificationType::NewMessage, "t", "b");
        let outcomes = channel
            .send(
                &n,
                &[device_token(Platform::Ios, "ios-token")],
                Deadline::after(Duration::from_secs(5)),
            )
            .await;

        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        let aggregated = PushChannel::aggregate(&outcomes);
        assert!(matches!(
            aggregated,
            DeliveryOutcome::Failed { code: ErrorCode::CircuitOpen, retryable: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_aggregate_prefers_success() {
        let outcomes = vec![
            TokenOutcome {
                token: "a".to_string(),
                platform: Platform::Ios,
                outcome: DeliveryOutcome::failed(ErrorCode::ServiceUnavailable, "down"),
            },
            TokenOutcome {
                token: "b".to_string(),
                platform: Platform::Android,
                outcome: DeliveryOutcome::Delivered {
                    provider: "push-android".to_string(),
                    latency_ms: 12,
                },
            },
        ];
        assert!(PushChannel::aggregate(&outcomes).is_success());
    }

    #[tokio::test]
    async fn test_aggregate_empty_is_no_targets() {
        let aggregated = PushChannel::aggregate(&[]);
        assert!(matches!(
            aggregated,
            DeliveryOutcome::Failed { code: ErrorCode::NoTargets, .. }
        ));
    }
}
