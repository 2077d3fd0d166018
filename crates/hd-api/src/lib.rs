//! Herald HTTP API
//!
//! Route surface:
//! - send surface (caller JWT): /send, /send/batch, /send/template
//! - preferences (caller JWT): /preferences, /preferences/dnd
//! - operational (cron secret): /digest/process, /queue/process,
//!   /automation/process, /translate/process-queue
//! - webhooks (per-provider signature): /webhook/{provider}
//! - public: /health, /stats
//! - translation (internal): /translate, /translate/batch, /translate/health

use axum::routing::{get, post};
use axum::Router;
use hd_digest::{AutomationProcessor, DigestProcessor, QueueProcessor};
use hd_orchestrator::Orchestrator;
use hd_resilience::CircuitRegistry;
use hd_store::{DeliveryLogRepository, PreferencesRepository, SuppressionRepository};
use hd_translate::TranslationService;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error;
pub mod handlers;
pub mod webhook;

pub use error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub queue_processor: Arc<QueueProcessor>,
    pub digest_processor: Arc<DigestProcessor>,
    pub automation_processor: Arc<AutomationProcessor>,
    pub translator: Option<TranslationService>,
    pub preferences: Arc<dyn PreferencesRepository>,
    pub suppressions: Arc<dyn SuppressionRepository>,
    pub delivery_log: Arc<dyn DeliveryLogRepository>,
    pub circuits: Arc<CircuitRegistry>,
    pub jwt_secret: String,
    pub cron_secret: String,
    /// Per-provider webhook signing secrets.
    pub webhook_secrets: HashMap<String, String>,
    pub version: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // send surface
        .route("/send", post(handlers::send::send))
        .route("/send/batch", post(handlers::send::send_batch))
        .route("/send/template", post(handlers::send::send_template))
        // preferences
        .route(
            "/preferences",
            get(handlers::preferences::get_preferences)
                .put(handlers::preferences::update_preferences),
        )
        .route(
            "/preferences/dnd",
            post(handlers::preferences::enable_dnd).delete(handlers::preferences::disable_dnd),
        )
        // operational
        .route("/digest/process", post(handlers::ops::process_digest))
        .route("/queue/process", post(handlers::ops::process_queue))
        .route("/automation/process", post(handlers::ops::process_automation))
        .route("/webhook/{provider}", post(handlers::ops::webhook))
        // public
        .route("/health", get(handlers::ops::health))
        .route("/stats", get(handlers::ops::stats))
        // translation
        .route("/translate", post(handlers::translate::translate))
        .route("/translate/batch", post(handlers::translate::batch_translate))
        .route(
            "/translate/process-queue",
            post(handlers::translate::process_queue),
        )
        .route("/translate/health", get(handlers::translate::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
