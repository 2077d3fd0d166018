//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "herald.toml",
    "./config/config.toml",
    "./config/herald.toml",
    "/etc/herald/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("HERALD_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // HTTP
        if let Ok(val) = env::var("HERALD_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("HERALD_HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("HERALD_CORS_ORIGINS") {
            config.http.cors_origins = val.split(',').map(|s| s.trim().to_string()).collect();
        }

        // Database
        if let Ok(val) = env::var("DATABASE_URL") {
            config.database.url = val;
        }
        if let Ok(val) = env::var("HERALD_DB_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                config.database.max_connections = n;
            }
        }

        // Redis
        if let Ok(val) = env::var("REDIS_URL") {
            config.redis.url = val;
        }
        if let Ok(val) = env::var("HERALD_REDIS_ENABLED") {
            config.redis.enabled = val.parse().unwrap_or(true);
        }

        // Orchestrator
        if let Ok(val) = env::var("HERALD_CHANNEL_DEADLINE_SECS") {
            if let Ok(secs) = val.parse() {
                config.orchestrator.channel_deadline_secs = secs;
            }
        }
        if let Ok(val) = env::var("HERALD_MAX_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.orchestrator.max_batch_size = n;
            }
        }

        // Circuit breaker
        if let Ok(val) = env::var("HERALD_CIRCUIT_FAILURE_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.circuit.failure_threshold = n;
            }
        }
        if let Ok(val) = env::var("HERALD_CIRCUIT_RESET_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.circuit.reset_timeout_secs = secs;
            }
        }

        // Retry budget
        if let Ok(val) = env::var("HERALD_RETRY_BUDGET_MAX") {
            if let Ok(n) = val.parse() {
                config.retry.max_retries = n;
            }
        }
        if let Ok(val) = env::var("HERALD_RETRY_BUDGET_WINDOW_SECS") {
            if let Ok(secs) = val.parse() {
                config.retry.window_secs = secs;
            }
        }

        // Email routing
        if let Ok(val) = env::var("HERALD_EMAIL_FROM_ADDRESS") {
            config.email.from_address = val;
        }
        if let Ok(val) = env::var("HERALD_EMAIL_FROM_NAME") {
            config.email.from_name = val;
        }

        // Translation
        if let Ok(val) = env::var("HERALD_TRANSLATION_CACHE_CAPACITY") {
            if let Ok(n) = val.parse() {
                config.translation.cache_capacity = n;
            }
        }
        if let Ok(val) = env::var("HERALD_TRANSLATION_QUALITY_THRESHOLD") {
            if let Ok(t) = val.parse() {
                config.translation.quality_threshold = t;
            }
        }

        // Digest / queue workers
        if let Ok(val) = env::var("HERALD_QUEUE_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                config.digest.queue_concurrency = n;
            }
        }
        if let Ok(val) = env::var("HERALD_QUEUE_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.digest.queue_batch_size = n;
            }
        }
        if let Ok(val) = env::var("HERALD_QUEUE_POLL_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.digest.poll_interval_secs = secs;
            }
        }

        // General
        if let Ok(val) = env::var("HERALD_DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
