//! Herald background worker
//!
//! Runs the interval loops that drain the notification queue, flush digest
//! batches, and process the translation queue. Deployments that prefer
//! external cron can skip this binary and call the operational endpoints on
//! hd-server instead.

use anyhow::Context;
use hd_common::logging::init_logging;
use hd_config::{ConfigLoader, Secrets};
use hd_digest::{DigestProcessor, QueueProcessor, WorkerRunner};
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
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("hd-worker");

    let config = ConfigLoader::new().load().context("loading configuration")?;
    let secrets = Secrets::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("connecting to PostgreSQL")?;
    hd_store::init_schema(&pool).await?;
    let store = PgStore::new(pool);

    let redis = if config.redis.enabled {
        match redis::Client::open(config.redis.url.clone()) {
            Ok(client) => match redis::aio::ConnectionManager::new(client).await {
                Ok(manager) => Some(manager),
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, distributed cache disabled");
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

    let mut push = PushChannel::new(
        Arc::clone(&circuits),
        Arc::clone(&budget),
        store.tokens.clone(),
        config.retry.adapter_max_retries,
    );
    if let Some(apns) = secrets.apns.clone() {
        push = push.with_transport(hd_common::Platform::Ios, Arc::new(ApnsTransport::new(apns)));
    }
    if let Some(fcm) = secrets.fcm.clone() {
        push = push.with_transport(hd_common::Platform::Android, Arc::new(FcmTransport::new(fcm)));
    }
    if let Some(vapid) = secrets.vapid.clone() {
        push = push.with_transport(hd_common::Platform::Web, Arc::new(WebPushTransport::new(vapid)));
    }

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
        if let Ok(provider) = SmtpProvider::new(
            &host,
            secrets.email.smtp_username.clone(),
            secrets.email.smtp_password.clone(),
        ) {
            email = email.with_provider(Arc::new(provider));
        }
    }

    let orchestrator = Arc::new(Orchestrator::new(
        store.preferences.clone(),
        store.tokens.clone(),
        store.delivery_log.clone(),
        store.queue.clone(),
        store.digest_queue.clone(),
        store.directory.clone(),
        store.templates.clone(),
        Arc::new(push),
        Arc::new(email),
        Arc::new(UnconfiguredSms),
        Arc::new(InAppAdapter::new(store.inapp.clone(), redis.clone())),
        config.orchestrator.clone(),
    ));

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

    let runner = WorkerRunner::new(queue_processor, digest_processor, config.digest.clone());
    runner.start().await;

    // Translation queue loop, when providers are configured.
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

    if !translate_providers.is_empty() {
        let translator = TranslationService::new(
            config.translation.clone(),
            translate_providers,
            Arc::clone(&circuits),
            Arc::clone(&budget),
            quota_gate,
            store.translations.clone(),
            store.translation_queue.clone(),
            redis,
        );
        let poll = Duration::from_secs(config.digest.poll_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            loop {
                ticker.tick().await;
                if let Err(e) = translator.process_queue(50).await {
                    error!(error = %e, "Translation queue pass failed");
                }
            }
        });
        info!("Translation queue worker started");
    } else {
        warn!("No translation providers configured, translation worker disabled");
    }

    info!("Herald worker running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    runner.stop().await;
    Ok(())
}
