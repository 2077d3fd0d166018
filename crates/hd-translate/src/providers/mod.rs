//! Translation provider adapters
//!
//! Five providers in the default tier order: self-hosted LLM, DeepL, Google,
//! Microsoft, Amazon. Each performs exactly one attempt; the chain logic
//! (circuits, quotas, the retry budget, quality fallback) lives in the
//! service.

use async_trait::async_trait;
use std::time::Duration;

pub mod amazon;
pub mod deepl;
pub mod google;
pub mod llm;
pub mod microsoft;

pub use amazon::AmazonProvider;
pub use deepl::DeepLProvider;
pub use google::GoogleProvider;
pub use llm::LlmProvider;
pub use microsoft::MicrosoftProvider;

/// Classified result of one translation attempt.
#[derive(Debug, Clone)]
pub enum TranslateAttempt {
    Translated {
        text: String,
        latency_ms: u64,
    },
    /// 5xx, 429, timeout, network. Counts toward the circuit.
    Retryable {
        message: String,
    },
    /// Auth errors, unsupported language pairs, malformed responses.
    Fatal {
        message: String,
    },
    /// The provider's own API refused for quota; triggers the exhaustion
    /// cooldown without counting toward the circuit.
    QuotaRejected {
        message: String,
    },
}

#[async_trait]
pub trait TranslateProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        context: Option<&str>,
        timeout: Duration,
    ) -> TranslateAttempt;
}

/// Shared response classification for the plain-HTTP providers.
pub(crate) fn classify_status(provider: &str, status: u16, body_hint: &str) -> TranslateAttempt {
    match status {
        429 => TranslateAttempt::Retryable {
            message: format!("{} rate limited", provider),
        },
        403 if body_hint.contains("quota") || body_hint.contains("limit") => {
            TranslateAttempt::QuotaRejected {
                message: format!("{} quota rejected: {}", provider, body_hint),
            }
        }
        456 => TranslateAttempt::QuotaRejected {
            message: format!("{} character quota exhausted", provider),
        },
        500..=599 => TranslateAttempt::Retryable {
            message: format!("{} HTTP {}", provider, status),
        },
        _ => TranslateAttempt::Fatal {
            message: format!("{} HTTP {}: {}", provider, status, body_hint),
        },
    }
}

pub(crate) fn classify_transport(provider: &str, e: &reqwest::Error) -> TranslateAttempt {
    if e.is_timeout() {
        TranslateAttempt::Retryable {
            message: format!("{} timeout", provider),
        }
    } else {
        TranslateAttempt::Retryable {
            message: format!("{} transport error: {}", provider, e),
        }
    }
}
