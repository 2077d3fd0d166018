//! Herald Configuration System
//!
//! TOML-based configuration with environment variable override support.
//! Provider credentials are never read from TOML: they come exclusively
//! from the environment (see [`Secrets`]) and carry no in-code defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;
mod secrets;

pub use loader::ConfigLoader;
pub use secrets::{
    ApnsSecrets, AwsSecrets, EmailSecrets, FcmSecrets, Secrets, TranslationSecrets, VapidSecrets,
};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Missing environment variable: {0}")]
    MissingEnv(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub orchestrator: OrchestratorConfig,
    pub circuit: CircuitConfig,
    pub retry: RetryConfig,
    pub email: EmailRouterConfig,
    pub translation: TranslationConfig,
    pub digest: DigestConfig,

    /// Enable development mode (sandbox push endpoints, relaxed auth).
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            circuit: CircuitConfig::default(),
            retry: RetryConfig::default(),
            email: EmailRouterConfig::default(),
            translation: TranslationConfig::default(),
            digest: DigestConfig::default(),
            dev_mode: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_batch_size == 0 || self.orchestrator.max_batch_size > 1000 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_batch_size must be in 1..=1000".to_string(),
            ));
        }
        if self.digest.queue_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "digest.queue_concurrency must be > 0".to_string(),
            ));
        }
        if self.circuit.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "circuit.failure_threshold must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.translation.quality_threshold) {
            return Err(ConfigError::ValidationError(
                "translation.quality_threshold must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["http://localhost:4200".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/herald".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub enabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            enabled: true,
        }
    }
}

/// Notification pipeline tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Per-channel dispatch deadline in seconds.
    pub channel_deadline_secs: u64,
    /// Deadline for critical-priority dispatches.
    pub critical_deadline_secs: u64,
    /// Maximum notifications accepted per batch request.
    pub max_batch_size: usize,
    /// Maximum body length in characters.
    pub max_body_chars: usize,
    /// Furthest allowed scheduled-for horizon in days.
    pub max_schedule_days: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            channel_deadline_secs: 15,
            critical_deadline_secs: 30,
            max_batch_size: 1000,
            max_body_chars: 50_000,
            max_schedule_days: 90,
        }
    }
}

/// Circuit breaker tuning shared by all provider adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout_secs: u64,
    /// Concurrent probes allowed while half-open.
    pub half_open_max_probes: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            reset_timeout_secs: 60,
            half_open_max_probes: 2,
        }
    }
}

/// Process-wide retry budget: at most `max_retries` retries per window,
/// shared by all adapters, to stop retry storms during outages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub window_secs: u64,
    /// Per-adapter attempt cap beyond the first try.
    pub adapter_max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 20,
            window_secs: 60,
            adapter_max_retries: 1,
        }
    }
}

/// Email provider routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailRouterConfig {
    /// Provider order for transactional mail, best first.
    pub transactional_order: Vec<String>,
    /// Provider order for marketing mail.
    pub marketing_order: Vec<String>,
    /// Monthly send quota per provider (provider name -> limit).
    pub monthly_quota: std::collections::HashMap<String, i64>,
    pub from_address: String,
    pub from_name: String,
}

impl Default for EmailRouterConfig {
    fn default() -> Self {
        Self {
            transactional_order: vec![
                "resend".to_string(),
                "ses".to_string(),
                "sendgrid".to_string(),
                "smtp".to_string(),
            ],
            marketing_order: vec![
                "sendgrid".to_string(),
                "ses".to_string(),
                "resend".to_string(),
                "smtp".to_string(),
            ],
            monthly_quota: std::collections::HashMap::new(),
            from_address: "no-reply@herald.local".to_string(),
            from_name: "Herald".to_string(),
        }
    }
}

/// Translation engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// In-process LRU cache capacity.
    pub cache_capacity: usize,
    /// In-process cache TTL in seconds.
    pub cache_ttl_secs: u64,
    /// Distributed cache TTL in seconds.
    pub redis_ttl_secs: u64,
    /// Below this score the next provider tier is tried.
    pub quality_threshold: f64,
    /// Primary provider request deadline in seconds.
    pub request_deadline_secs: u64,
    /// Cooldown after a provider reports its quota exhausted.
    pub exhausted_cooldown_secs: u64,
    /// Monthly character quota per provider (provider name -> chars).
    pub monthly_quota: std::collections::HashMap<String, i64>,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 10_000,
            cache_ttl_secs: 3600,
            redis_ttl_secs: 86_400,
            quality_threshold: 0.5,
            request_deadline_secs: 10,
            exhausted_cooldown_secs: 300,
            monthly_quota: std::collections::HashMap::new(),
        }
    }
}

/// Queue and digest worker tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    /// Items claimed per queue worker pass.
    pub queue_batch_size: u32,
    /// Concurrent orchestrator invocations per pass.
    pub queue_concurrency: usize,
    /// Attempt cap before an item is marked failed.
    pub max_attempts: i32,
    /// Items stuck in processing longer than this are reset to pending.
    pub processing_timeout_minutes: i64,
    /// Digest entries processed per flush.
    pub digest_batch_limit: u32,
    /// Top titles listed per category in a digest email.
    pub digest_top_per_category: usize,
    /// Queue worker poll interval in seconds.
    pub poll_interval_secs: u64,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            queue_batch_size: 50,
            queue_concurrency: 5,
            max_attempts: 3,
            processing_timeout_minutes: 10,
            digest_batch_limit: 200,
            digest_top_per_category: 5,
            poll_interval_secs: 30,
        }
    }
}
