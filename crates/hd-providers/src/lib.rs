//! Herald Provider Adapter Layer
//!
//! One adapter per (channel, provider). Every adapter satisfies the same
//! contract: `send(payload, deadline) -> DeliveryOutcome` plus `health()`,
//! owns its circuit breaker, and draws retries from the process-wide retry
//! budget. Responses are classified as success, retryable failure (5xx,
//! 429, network, timeout) or non-retryable failure (bad token, invalid
//! recipient, auth error, other 4xx); non-retryable failures never count
//! toward the circuit.

use hd_common::{DeliveryOutcome, ErrorCode};
use hd_resilience::{CircuitBreaker, Deadline, RetryBudget};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub mod apns;
pub mod aws_sig;
pub mod email;
pub mod fcm;
pub mod inapp;
pub mod push;
pub mod sms;
pub mod webpush;

pub use apns::ApnsTransport;
pub use email::{EmailMessage, EmailProvider, EmailRouter, EmailSendResult, MailKind};
pub use fcm::FcmTransport;
pub use inapp::InAppAdapter;
pub use push::{PushChannel, PushTransport, TokenOutcome};
pub use sms::{SmsAdapter, UnconfiguredSms};
pub use webpush::WebPushTransport;

/// Classified result of one provider attempt.
#[derive(Debug, Clone)]
pub enum Attempt {
    Success {
        latency_ms: u64,
        /// Provider-assigned message id, when the provider returns one.
        message_id: Option<String>,
    },
    /// 5xx, 429, timeout, connection error. Counts toward the circuit.
    Retryable {
        code: ErrorCode,
        message: String,
    },
    /// Bad token, invalid recipient, auth error, other 4xx. Does not count
    /// toward the circuit.
    Fatal {
        code: ErrorCode,
        message: String,
        invalid_target: bool,
    },
}

/// Result of a guarded send including whether the target (device token,
/// subscription) turned out to be invalid and should be deactivated.
#[derive(Debug, Clone)]
pub struct GuardedOutcome {
    pub outcome: DeliveryOutcome,
    pub invalid_target: bool,
    pub attempts: u32,
}

/// Run one provider operation under the common adapter contract:
/// circuit acquire, deadline guard, bounded retries drawing from the shared
/// budget, exponential backoff capped by the remaining deadline.
pub async fn execute_guarded<F, Fut>(
    provider: &str,
    breaker: &Arc<CircuitBreaker>,
    budget: &Arc<RetryBudget>,
    deadline: Deadline,
    max_retries: u32,
    mut attempt_fn: F,
) -> GuardedOutcome
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Attempt>,
{
    if !breaker.allow_request() {
        debug!(provider = %provider, "Circuit open, rejecting without network call");
        metrics::counter!("herald.adapter.circuit_rejected", "provider" => provider.to_string())
            .increment(1);
        return GuardedOutcome {
            outcome: DeliveryOutcome::failed(ErrorCode::CircuitOpen, "circuit_open"),
            invalid_target: false,
            attempts: 0,
        };
    }

    let mut attempts = 0u32;
    let mut backoff = Duration::from_secs(1);

    loop {
        if deadline.expired() {
            breaker.record_non_retryable();
            return GuardedOutcome {
                outcome: DeliveryOutcome::failed(
                    ErrorCode::DeadlineExceeded,
                    "deadline exceeded before attempt",
                ),
                invalid_target: false,
                attempts,
            };
        }

        attempts += 1;
        let result = attempt_fn().await;

        match result {
            Attempt::Success { latency_ms, .. } => {
                breaker.record_success();
                metrics::counter!("herald.adapter.success", "provider" => provider.to_string())
                    .increment(1);
                return GuardedOutcome {
                    outcome: DeliveryOutcome::Delivered {
                        provider: provider.to_string(),
                        latency_ms,
                    },
                    invalid_target: false,
                    attempts,
                };
            }
            Attempt::Retryable { code, message } => {
                breaker.record_failure();
                metrics::counter!("herald.adapter.failure", "provider" => provider.to_string())
                    .increment(1);

                let can_retry = attempts <= max_retries
                    && budget.try_consume()
                    && breaker.allow_request();

                if !can_retry {
                    return GuardedOutcome {
                        outcome: DeliveryOutcome::failed(code, message),
                        invalid_target: false,
                        attempts,
                    };
                }

                // Backoff capped by the remaining deadline; when the delay
                // would outlive the deadline there is no point retrying.
                match deadline.cap(backoff) {
                    Some(delay) => {
                        warn!(
                            provider = %provider,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying after failure"
                        );
                        tokio::time::sleep(delay).await;
                        backoff *= 2;
                    }
                    None => {
                        return GuardedOutcome {
                            outcome: DeliveryOutcome::failed(code, message),
                            invalid_target: false,
                            attempts,
                        };
                    }
                }
            }
            Attempt::Fatal { code, message, invalid_target } => {
                breaker.record_non_retryable();
                metrics::counter!("herald.adapter.fatal", "provider" => provider.to_string())
                    .increment(1);
                return GuardedOutcome {
                    outcome: DeliveryOutcome::failed(code, message),
                    invalid_target,
                    attempts,
                };
            }
        }
    }
}

/// Map a reqwest transport error to an attempt classification.
pub(crate) fn classify_transport_error(e: &reqwest::Error) -> Attempt {
    if e.is_timeout() {
        Attempt::Retryable {
            code: ErrorCode::Timeout,
            message: "request timeout".to_string(),
        }
    } else if e.is_connect() {
        Attempt::Retryable {
            code: ErrorCode::ServiceUnavailable,
            message: format!("connection error: {}", e),
        }
    } else {
        Attempt::Retryable {
            code: ErrorCode::ServiceUnavailable,
            message: format!("request failed: {}", e),
        }
    }
}

/// Parse a Retry-After header value in seconds.
pub(crate) fn retry_after_secs(response: &reqwest::Response) -> u32 {
    response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(30)
}
