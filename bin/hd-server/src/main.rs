//! Herald API server
//!
//! Builds the full service graph (store, resilience primitives, provider
//! adapters, orchestrator, workers, translation engine) and serves the HTTP
//! API. Prometheus metrics are exported on the scrape endpoint.

use anyhow::Context;
use hd_api::AppState;
use hd_common::logging::init_logging;
use hd_config::{ConfigLoader, Secrets};
use hd_digest::{AutomationProcessor, DigestProcessor, QueueProcessor};
use hd_orchestrator::Orchestrator;
use hd_providers::email::{ResendProvider, SendGridProvider, SesProvider, SmtpProvider};
use hd_providers::{
    ApnsTransport, EmailRouter, FcmTransport, InAppAdapter, PushChannel, UnconfiguredSms,
    WebPushTransport,
};
use hd_resilience::{CircuitBreakerConfig, CircuitRegistry, QuotaGate, RetryBudget};
use hd_store::PgStore;
use hd_translate::providers::{
    AmazonProvider, DeepLProvider, GoogleProvider, LlmProvider, MicrosoftProvider,
};
use hd_translate::{TranslateProvider, TranslationService};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("hd-server");

    let config = ConfigLoader::new().load().context("loading configuration")?;
    let secrets = Secrets::from_env();

    let jwt_secret = secrets.require_jwt_secret()?.to_string();
    let cron_secret = secrets.require_cron_secret()?.to_string();

    // Database
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("connecting to PostgreSQL")?;
    hd_store::init_schema(&pool).await?;
    let store = PgStore::new(pool);

    // Redis (optional)
    let redis = if config.redis.enabled {
        match redis::Client::open(config.redis.url.clone()) {
            Ok(client) => match redis::aio::ConnectionManager::new(client).await {
                Ok(manager) => Some(manager),
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, realtime and distributed cache disabled");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Invalid Redis URL");
                None
            }
        }
    } else {
        None
    };

    // Resilience primitives
    let circuits = Arc::new(CircuitRegistry::new(CircuitBreakerConfig {
        failure_threshold: config.circuit.failure_threshold,
        success_threshold: config.circuit.success_threshold,
        reset_timeout: Duration::from_secs(config.circuit.reset_timeout_secs),
        half_open_max_probes: config.circuit.half_open_max_probes,
    }));
    let budget = Arc::new(RetryBudget::new(
        config.retry.max_retries,
        Duration::from_secs(config.retry.window_secs),
    ));
    let quota_gate = Arc::new(QuotaGate::new(Duration::from_secs(
        config.translation.exhausted_cooldown_secs,
    )));

    // Push transports
    let mut push = PushChannel::new(
        Arc::clone(&circuits),
        Arc::clone(&budget),
        store.tokens.clone(),
        config.retry.adapter_max_retries,
    );
    if let Some(apns) = secrets.apns.clone() {
        push = push.with_transport(hd_common::Platform::Ios, Arc::new(ApnsTransport::new(apns)));
        info!("APNs transport configured");
    }
    if let Some(fcm) = secrets.fcm.clone() {
        push = push.with_transport(hd_common::Platform::Android, Arc::new(FcmTransport::new(fcm)));
        info!("FCM transport configured");
    }
    if let Some(vapid) = secrets.vapid.clone() {
        push = push.with_transport(hd_common::Platform::Web, Arc::new(WebPushTransport::new(vapid)));
        info!("WebPush transport configured");
    }
    let push = Arc::new(push);

    // Email providers
    let mut email = EmailRouter::new(
        config.email.clone(),
        Arc::clone(&circuits),
        Arc::clone(&budget),
        Arc::clone(&quota_gate),
        store.suppressions.clone(),
        store.translations.clone(),
        config.retry.adapter_max_retries,
    );
    if let Some(key) = secrets.email.resend_api_key.clone() {
        email = email.with_provider(Arc::new(ResendProvider::new(key)));
    }
    if let Some(key) = secrets.email.sendgrid_api_key.clone() {
        email = email.with_provider(Arc::new(SendGridProvider::new(key)));
    }
    if let Some(aws) = secrets.aws.clone() {
        email = email.with_provider(Arc::new(SesProvider::new(aws)));
    }
    if let Some(host) = secrets.email.smtp_host.clone() {
        match SmtpProvider::new(
            &host,
            secrets.email.smtp_username.clone(),
            secrets.email.smtp_password.clone(),
        ) {
            Ok(provider) => email = email.with_provider(Arc::new(provider)),
            Err(e) => warn!(error = %e, "SMTP provider unavailable"),
        }
    }
    info!(providers = ?email.provider_names(), "Email router configured");
    let email = Arc::new(email);

    let inapp = Arc::new(InAppAdapter::new(store.inapp.clone(), redis.clone()));

    // Orchestrator
    let orchestrator = Arc::new(Orchestrator::new(
        store.preferences.clone(),
        store.tokens.clone(),
        store.delivery_log.clone(),
        store.queue.clone(),
        store.digest_queue.clone(),
        store.directory.clone(),
        store.templates.clone(),
        push,
        email,
        Arc::new(UnconfiguredSms),
        inapp,
        config.orchestrator.clone(),
    ));

    // Workers (invoked over the operational endpoints)
    let queue_processor = Arc::new(QueueProcessor::new(
        store.queue.clone(),
        orchestrator.clone(),
        config.digest.clone(),
    ));
    let digest_processor = Arc::new(DigestProcessor::new(
        store.digest_queue.clone(),
        orchestrator.clone(),
        config.digest.clone(),
    ));
    let automation_processor = Arc::new(AutomationProcessor::new(
        store.automation.clone(),
        orchestrator.clone(),
        config.digest.clone(),
    ));

    // Translation engine
    let mut translate_providers: Vec<Arc<dyn TranslateProvider>> = Vec::new();
    if let Some(endpoint) = secrets.translation.llm_endpoint.clone() {
        translate_providers.push(Arc::new(LlmProvider::new(
            endpoint,
            secrets.translation.llm_api_key.clone(),
        )));
    }
    if let Some(key) = secrets.translation.deepl_api_key.clone() {
        translate_providers.push(Arc::new(DeepLProvider::new(key)));
    }
    if let Some(key) = secrets.translation.google_api_key.clone() {
        translate_providers.push(Arc::new(GoogleProvider::new(key)));
    }
    if let Some(key) = secrets.translation.microsoft_api_key.clone() {
        translate_providers.push(Arc::new(MicrosoftProvider::new(
            key,
            secrets.translation.microsoft_region.clone(),
        )));
    }
    if let Some(aws) = secrets.aws.clone() {
        translate_providers.push(Arc::new(AmazonProvider::new(aws)));
    }
    let translator = if translate_providers.is_empty() {
        warn!("No translation providers configured, translation API disabled");
        None
    } else {
        Some(TranslationService::new(
            config.translation.clone(),
            translate_providers,
            Arc::clone(&circuits),
            Arc::clone(&budget),
            Arc::clone(&quota_gate),
            store.translations.clone(),
            store.translation_queue.clone(),
            redis,
        ))
    };

    // Metrics exporter
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        warn!(error = %e, "Prometheus exporter not installed");
    }

    let state = AppState {
        orchestrator,
        queue_processor,
        digest_processor,
        automation_processor,
        translator,
        preferences: store.preferences.clone(),
        suppressions: store.suppressions.clone(),
        delivery_log: store.delivery_log.clone(),
        circuits,
        jwt_secret,
        cron_secret,
        webhook_secrets: secrets.webhook_secrets.clone(),
        version: VERSION.to_string(),
    };

    let app = hd_api::router(state);
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!(addr = %addr, version = VERSION, "Herald server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
