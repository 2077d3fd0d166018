//! Error taxonomy
//!
//! Every failure surfaced across a component boundary carries a stable code
//! string, a human message, and a retryable flag. Adapter failures are
//! returned as structured results; only unexpected conditions propagate as
//! errors through this type.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Stable error code shared across the API surface and the delivery log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    Unauthenticated,
    Forbidden,
    NotFound,
    BlockedByPreferences,
    SuppressedAddress,
    NoTargets,
    Timeout,
    DeadlineExceeded,
    RateLimited,
    ServiceUnavailable,
    QuotaExhausted,
    CircuitOpen,
    LowQuality,
    AllServicesFailed,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::BlockedByPreferences => "BLOCKED_BY_PREFERENCES",
            ErrorCode::SuppressedAddress => "SUPPRESSED_ADDRESS",
            ErrorCode::NoTargets => "NO_TARGETS",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::QuotaExhausted => "QUOTA_EXHAUSTED",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::LowQuality => "LOW_QUALITY",
            ErrorCode::AllServicesFailed => "ALL_SERVICES_FAILED",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Whether a failure with this code may succeed on retry. CIRCUIT_OPEN
    /// is retryable in the sense that another provider may be tried.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout
                | ErrorCode::DeadlineExceeded
                | ErrorCode::RateLimited
                | ErrorCode::ServiceUnavailable
                | ErrorCode::CircuitOpen
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HeraldError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Blocked by preferences")]
    BlockedByPreferences,

    #[error("Recipient address is suppressed")]
    SuppressedAddress,

    #[error("No delivery targets for channel {0}")]
    NoTargets(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u32 },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Quota exhausted for {0}")]
    QuotaExhausted(String),

    #[error("Circuit open for {0}")]
    CircuitOpen(String),

    #[error("Translation quality {score} below threshold")]
    LowQuality { score: f64 },

    #[error("All providers failed")]
    AllServicesFailed,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HeraldError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HeraldError::Validation(_) => ErrorCode::ValidationError,
            HeraldError::Unauthenticated => ErrorCode::Unauthenticated,
            HeraldError::Forbidden => ErrorCode::Forbidden,
            HeraldError::NotFound(_) => ErrorCode::NotFound,
            HeraldError::BlockedByPreferences => ErrorCode::BlockedByPreferences,
            HeraldError::SuppressedAddress => ErrorCode::SuppressedAddress,
            HeraldError::NoTargets(_) => ErrorCode::NoTargets,
            HeraldError::DeadlineExceeded => ErrorCode::DeadlineExceeded,
            HeraldError::RateLimited { .. } => ErrorCode::RateLimited,
            HeraldError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            HeraldError::QuotaExhausted(_) => ErrorCode::QuotaExhausted,
            HeraldError::CircuitOpen(_) => ErrorCode::CircuitOpen,
            HeraldError::LowQuality { .. } => ErrorCode::LowQuality,
            HeraldError::AllServicesFailed => ErrorCode::AllServicesFailed,
            HeraldError::Database(_)
            | HeraldError::Serialization(_)
            | HeraldError::Config(_)
            | HeraldError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn retryable(&self) -> bool {
        self.code().retryable()
    }
}

pub type Result<T> = std::result::Result<T, HeraldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ErrorCode::Timeout.retryable());
        assert!(ErrorCode::RateLimited.retryable());
        assert!(ErrorCode::CircuitOpen.retryable());
        assert!(!ErrorCode::ValidationError.retryable());
        assert!(!ErrorCode::BlockedByPreferences.retryable());
        assert!(!ErrorCode::QuotaExhausted.retryable());
        assert!(!ErrorCode::NoTargets.retryable());
    }

    #[test]
    fn test_error_code_mapping() {
        let err = HeraldError::Validation("title empty".to_string());
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(!err.retryable());

        let err = HeraldError::CircuitOpen("apns".to_string());
        assert_eq!(err.code().as_str(), "CIRCUIT_OPEN");
        assert!(err.retryable());
    }
}
