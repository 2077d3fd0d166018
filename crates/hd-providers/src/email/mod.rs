//! Email provider set and routing
//!
//! Four providers behind one trait (Resend, SendGrid, AWS SES, SMTP). The
//! router picks a provider per mail kind using the configured order, skipping
//! providers whose circuit is open, whose monthly quota is spent, or whose
//! recent success rate is poor, and falls through to the next eligible
//! provider on retryable failure. A suppression-list check runs before any
//! provider is consulted and is never bypassed.

use crate::{execute_guarded, Attempt};
use async_trait::async_trait;
use hd_common::{DeliveryOutcome, ErrorCode};
use hd_config::EmailRouterConfig;
use hd_resilience::{CircuitRegistry, Deadline, QuotaGate, RetryBudget};
use hd_store::{SuppressionRepository, UsageRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod resend;
pub mod sendgrid;
pub mod ses;
pub mod smtp;

pub use resend::ResendProvider;
pub use sendgrid::SendGridProvider;
pub use ses::SesProvider;
pub use smtp::SmtpProvider;

/// A rendered email ready for dispatch.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    pub from_address: String,
    pub from_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    Transactional,
    Marketing,
}

/// Uniform provider result: {success, messageId, provider, latencyMs, error}.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSendResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub provider: String,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// One email provider attempt. Retry policy and circuit accounting live in
/// the router.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, message: &EmailMessage, timeout: Duration) -> Attempt;

    /// Uniform single send, without routing or retries.
    async fn send(&self, message: &EmailMessage, timeout: Duration) -> EmailSendResult {
        match self.attempt(message, timeout).await {
            Attempt::Success { latency_ms, message_id } => EmailSendResult {
                success: true,
                message_id,
                provider: self.name().to_string(),
                latency_ms,
                error: None,
            },
            Attempt::Retryable { message, .. } | Attempt::Fatal { message, .. } => {
                EmailSendResult {
                    success: false,
                    message_id: None,
                    provider: self.name().to_string(),
                    latency_ms: 0,
                    error: Some(message),
                }
            }
        }
    }
}

pub struct EmailRouter {
    providers: Vec<Arc<dyn EmailProvider>>,
    config: EmailRouterConfig,
    circuits: Arc<CircuitRegistry>,
    budget: Arc<RetryBudget>,
    quota_gate: Arc<QuotaGate>,
    suppressions: Arc<dyn SuppressionRepository>,
    usage: Arc<dyn UsageRepository>,
    max_retries: u32,
}

impl EmailRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EmailRouterConfig,
        circuits: Arc<CircuitRegistry>,
        budget: Arc<RetryBudget>,
        quota_gate: Arc<QuotaGate>,
        suppressions: Arc<dyn SuppressionRepository>,
        usage: Arc<dyn UsageRepository>,
        max_retries: u32,
    ) -> Self {
        Self {
            providers: Vec::new(),
            config,
            circuits,
            budget,
            quota_gate,
            suppressions,
            usage,
            max_retries,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn EmailProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    fn find(&self, name: &str) -> Option<Arc<dyn EmailProvider>> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .map(Arc::clone)
    }

    fn order_for(&self, kind: MailKind) -> &[String] {
        match kind {
            MailKind::Transactional => &self.config.transactional_order,
            MailKind::Marketing => &self.config.marketing_order,
        }
    }

    /// Monthly quota check. Fail-open: a store error allows the provider.
    async fn quota_ok(&self, provider: &str) -> bool {
        if self.quota_gate.is_exhausted(provider) {
            return false;
        }
        let limit = match self.config.monthly_quota.get(provider) {
            Some(limit) => *limit,
            None => return true,
        };
        let month = hd_store::translations::current_month();
        match self.usage.get_usage(provider, &month).await {
            Ok(Some(usage)) => usage.used < limit,
            Ok(None) => true,
            Err(e) => {
                warn!(provider = %provider, error = %e, "Quota store unreachable, failing open");
                true
            }
        }
    }

    /// Recent success rate; providers below 0.5 are deprioritised, not
    /// excluded (they may be the only option left).
    async fn health_score(&self, provider: &str) -> f64 {
        match self.usage.provider_success_rate(provider).await {
            Ok(Some(rate)) => rate,
            _ => 1.0,
        }
    }

    /// Eligible providers in preference order, healthy ones first.
    async fn eligible(&self, kind: MailKind) -> Vec<Arc<dyn EmailProvider>> {
        let mut healthy = Vec::new();
        let mut degraded = Vec::new();

        for name in self.order_for(kind) {
            let provider = match self.find(name) {
                Some(provider) => provider,
                None => continue,
            };
            if self.circuits.get(provider.name()).state() == hd_resilience::CircuitState::Open {
                debug!(provider = %name, "Skipping provider with open circuit");
                continue;
            }
            if !self.quota_ok(provider.name()).await {
                debug!(provider = %name, "Skipping quota-exhausted provider");
                continue;
            }
            if self.health_score(provider.name()).await >= 0.5 {
                healthy.push(provider);
            } else {
                degraded.push(provider);
            }
        }

        healthy.extend(degraded);
        healthy
    }

    /// Send through the first provider that succeeds. Retryable failures move
    /// on to the next eligible provider; non-retryable failures stop.
    pub async fn send(
        &self,
        message: &EmailMessage,
        kind: MailKind,
        deadline: Deadline,
    ) -> DeliveryOutcome {
        // Callers may leave the sender empty; the configured identity fills it.
        let mut message = message.clone();
        if message.from_address.is_empty() {
            message.from_address = self.config.from_address.clone();
            message.from_name = self.config.from_name.clone();
        }
        let message = &message;

        match self.suppressions.is_suppressed(&message.to).await {
            Ok(true) => {
                info!("Recipient on suppression list, not sending");
                return DeliveryOutcome::failed(
                    ErrorCode::SuppressedAddress,
                    "recipient on suppression list",
                );
            }
            Ok(false) => {}
            Err(e) => {
                // Suppression is a hard gate; without it we do not send.
                warn!(error = %e, "Suppression check failed");
                return DeliveryOutcome::failed(
                    ErrorCode::ServiceUnavailable,
                    "suppression check unavailable",
                );
            }
        }

        let eligible = self.eligible(kind).await;
        if eligible.is_empty() {
            return DeliveryOutcome::failed(
                ErrorCode::AllServicesFailed,
                "no eligible email provider",
            );
        }

        let mut last_outcome = None;
        for provider in eligible {
            if deadline.expired() {
                return DeliveryOutcome::failed(ErrorCode::DeadlineExceeded, "deadline exceeded");
            }

            let name = provider.name();
            let breaker = self.circuits.get(name);
            let guarded = execute_guarded(
                name,
                &breaker,
                &self.budget,
                deadline,
                self.max_retries,
                || {
                    let timeout = deadline.remaining().max(Duration::from_millis(1));
                    provider.attempt(message, timeout)
                },
            )
            .await;

            let success = guarded.outcome.is_success();
            let latency = match &guarded.outcome {
                DeliveryOutcome::Delivered { latency_ms, .. } => Some(*latency_ms as i64),
                _ => None,
            };
            let error_text = match &guarded.outcome {
                DeliveryOutcome::Failed { message, .. } => Some(message.clone()),
                _ => None,
            };
            if let Err(e) = self
                .usage
                .record_provider_metric(name, success, latency, error_text.as_deref())
                .await
            {
                debug!(error = %e, "Provider metric write failed");
            }

            match &guarded.outcome {
                DeliveryOutcome::Delivered { .. } => {
                    let month = hd_store::translations::current_month();
                    let limit = self.config.monthly_quota.get(name).copied().unwrap_or(0);
                    if let Err(e) = self.usage.record_usage(name, &month, 1, limit).await {
                        debug!(error = %e, "Usage counter write failed");
                    }
                    return guarded.outcome;
                }
                DeliveryOutcome::Failed { code, retryable, .. } => {
                    if *code == ErrorCode::QuotaExhausted {
                        self.quota_gate.mark_exhausted(name);
                    }
                    if !retryable && *code != ErrorCode::CircuitOpen {
                        return guarded.outcome;
                    }
                    warn!(provider = %name, code = %code, "Email provider failed, trying next");
                    last_outcome = Some(guarded.outcome);
                }
                _ => last_outcome = Some(guarded.outcome),
            }
        }

        last_outcome.unwrap_or_else(|| {
            DeliveryOutcome::failed(ErrorCode::AllServicesFailed, "all email providers failed")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hd_common::QuotaUsage;
    use hd_resilience::CircuitBreakerConfig;
    use hd_store::memory::{MemorySuppressions, MemoryTranslations};
    use parking_lot::Mutex;

    struct FakeProvider {
        name: &'static str,
        script: Mutex<Vec<Attempt>>,
        calls: std::sync::atomic::AtomicU32,
    }

    impl FakeProvider {
        fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(vec![]),
                calls: std::sync::atomic::AtomicU32::new(0),
            })
        }

        fn scripted(name: &'static str, script: Vec<Attempt>) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script),
                calls: std::sync::atomic::AtomicU32::new(0),
            })
        }

        fn call_count(&self) -> u32 {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmailProvider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn attempt(&self, _message: &EmailMessage, _timeout: Duration) -> Attempt {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut script = self.script.lock();
            if script.is_empty() {
                Attempt::Success { latency_ms: 2, message_id: None }
            } else {
                script.remove(0)
            }
        }
    }

    fn message() -> EmailMessage {
        EmailMessage {
            to: "user@example.com".to_string(),
            subject: "Hi".to_string(),
            html: "<p>Hi</p>".to_string(),
            text: None,
            from_address: "no-reply@herald.local".to_string(),
            from_name: "Herald".to_string(),
        }
    }

    fn router_with(
        providers: Vec<Arc<dyn EmailProvider>>,
        suppressions: Arc<MemorySuppressions>,
        usage: Arc<MemoryTranslations>,
        config: EmailRouterConfig,
    ) -> EmailRouter {
        let mut router = EmailRouter::new(
            config,
            Arc::new(CircuitRegistry::new(CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                reset_timeout: Duration::from_secs(60),
                half_open_max_probes: 2,
            })),
            Arc::new(RetryBudget::default()),
            Arc::new(QuotaGate::default()),
            suppressions,
            usage,
            1,
        );
        for provider in providers {
            router = router.with_provider(provider);
        }
        router
    }

    fn order(names: &[&str]) -> EmailRouterConfig {
        EmailRouterConfig {
            transactional_order: names.iter().map(|s| s.to_string()).collect(),
            marketing_order: names.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_suppressed_address_never_reaches_provider() {
        let suppressions = Arc::new(MemorySuppressions::new());
        suppressions
            .insert("user@example.com", "hard_bounce", None)
            .await
            .unwrap();
        let provider = FakeProvider::ok("resend");
        let router = router_with(
            vec![provider.clone()],
            suppressions,
            Arc::new(MemoryTranslations::new()),
            order(&["resend"]),
        );

        let outcome = router
            .send(&message(), MailKind::Transactional, Deadline::after(Duration::from_secs(5)))
            .await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::Failed { code: ErrorCode::SuppressedAddress, .. }
        ));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_falls_through_to_next_provider() {
        let failing = FakeProvider::scripted(
            "resend",
            vec![
                Attempt::Retryable {
                    code: ErrorCode::ServiceUnavailable,
                    message: "503".to_string(),
                },
                Attempt::Retryable {
                    code: ErrorCode::ServiceUnavailable,
                    message: "503".to_string(),
                },
            ],
        );
        let backup = FakeProvider::ok("ses");
        let router = router_with(
            vec![failing.clone(), backup.clone()],
            Arc::new(MemorySuppressions::new()),
            Arc::new(MemoryTranslations::new()),
            order(&["resend", "ses"]),
        );

        let outcome = router
            .send(&message(), MailKind::Transactional, Deadline::after(Duration::from_secs(30)))
            .await;

        assert!(outcome.is_success());
        if let DeliveryOutcome::Delivered { provider, .. } = outcome {
            assert_eq!(provider, "ses");
        }
        assert_eq!(backup.call_count(), 1);
    }

    #[tokio::test]
    async fn test_quota_exhausted_provider_is_skipped() {
        let usage = Arc::new(MemoryTranslations::new());
        usage.seed_usage(QuotaUsage {
            provider: "resend".to_string(),
            month: hd_store::translations::current_month(),
            used: 1000,
            limit: 1000,
        });
        let mut config = order(&["resend", "ses"]);
        config.monthly_quota.insert("resend".to_string(), 1000);

        let over_quota = FakeProvider::ok("resend");
        let backup = FakeProvider::ok("ses");
        let router = router_with(
            vec![over_quota.clone(), backup.clone()],
            Arc::new(MemorySuppressions::new()),
            usage,
            config,
        );

        let outcome = router
            .send(&message(), MailKind::Transactional, Deadline::after(Duration::from_secs(5)))
            .await;

        assert!(outcome.is_success());
        assert_eq!(over_quota.call_count(), 0);
        assert_eq!(backup.call_count(), 1);
    }

    #[tokio::test]
    async fn test_all_providers_failed() {
        let failing = FakeProvider::scripted(
            "resend",
            vec![
                Attempt::Retryable {
                    code: ErrorCode::ServiceUnavailable,
                    message: "503".to_string(),
                };
                4
            ],
        );
        let router = router_with(
            vec![failing],
            Arc::new(MemorySuppressions::new()),
            Arc::new(MemoryTranslations::new()),
            order(&["resend"]),
        );

        let outcome = router
            .send(&message(), MailKind::Transactional, Deadline::after(Duration::from_secs(30)))
            .await;
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_non_retryable_failure_stops_fallback() {
        let bad_recipient = FakeProvider::scripted(
            "resend",
            vec![Attempt::Fatal {
                code: ErrorCode::ValidationError,
                message: "invalid recipient".to_string(),
                invalid_target: false,
            }],
        );
        let backup = FakeProvider::ok("ses");
        let router = router_with(
            vec![bad_recipient, backup.clone()],
            Arc::new(MemorySuppressions::new()),
            Arc::new(MemoryTranslations::new()),
            order(&["resend", "ses"]),
        );

        let outcome = router
            .send(&message(), MailKind::Transactional, Deadline::after(Duration::from_secs(5)))
            .await;

        assert!(!outcome.is_success());
        assert_eq!(backup.call_count(), 0);
    }
}
