//! Operational handlers: workers, webhooks, health, stats

use crate::auth::authenticate_service;
use crate::webhook::{parse_events, verify_signature};
use crate::{ApiError, ApiResult, AppState};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use hd_common::{
    DeliveryStats, DigestFrequency, HealthReport, HealthState, HeraldError, ProviderStatus,
};
use hd_digest::{AutomationSummary, DigestSummary, QueuePassSummary};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DigestProcessRequest {
    pub frequency: DigestFrequency,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub dry_run: bool,
}

pub async fn process_digest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DigestProcessRequest>,
) -> ApiResult<Json<DigestSummary>> {
    authenticate_service(&headers, &state.cron_secret).map_err(ApiError)?;
    let summary = state
        .digest_processor
        .process(request.frequency, request.limit, request.dry_run)
        .await
        .map_err(ApiError)?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize, Default, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueProcessRequest {
    pub limit: Option<u32>,
}

pub async fn process_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueueProcessRequest>,
) -> ApiResult<Json<QueuePassSummary>> {
    authenticate_service(&headers, &state.cron_secret).map_err(ApiError)?;
    let summary = state
        .queue_processor
        .process(request.limit.unwrap_or(50))
        .await
        .map_err(ApiError)?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize, Default, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct AutomationProcessRequest {
    pub batch_size: Option<u32>,
    pub concurrency: Option<usize>,
    pub dry_run: bool,
}

pub async fn process_automation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AutomationProcessRequest>,
) -> ApiResult<Json<AutomationSummary>> {
    authenticate_service(&headers, &state.cron_secret).map_err(ApiError)?;
    let summary = state
        .automation_processor
        .process(
            request.batch_size.unwrap_or(100),
            request.concurrency.unwrap_or(5),
            request.dry_run,
        )
        .await
        .map_err(ApiError)?;
    Ok(Json(summary))
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: usize,
}

/// Provider webhook intake. Signature is verified synchronously; event
/// processing happens in the background, and the provider always gets a 2xx
/// once the delivery is accepted.
pub async fn webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let secret = state
        .webhook_secrets
        .get(&provider)
        .ok_or_else(|| ApiError(HeraldError::NotFound(format!("webhook '{}'", provider))))?;

    let signature = headers
        .get("X-Webhook-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError(HeraldError::Unauthenticated))?;
    if !verify_signature(&body, signature, secret) {
        return Err(ApiError(HeraldError::Forbidden));
    }

    let events = parse_events(&provider, &body);
    let received = events.len();
    metrics::counter!("herald.webhook.received", "provider" => provider.clone())
        .increment(received as u64);

    let suppressions = state.suppressions.clone();
    tokio::spawn(async move {
        for event in events {
            if event.is_suppression() {
                if let Some(email) = &event.email {
                    if let Err(e) = suppressions
                        .insert(email, &event.event_type, Some(&event.provider))
                        .await
                    {
                        warn!(error = %e, "Failed to record suppression");
                    }
                }
            } else {
                info!(
                    provider = %event.provider,
                    event_type = %event.event_type,
                    "Webhook delivery status update"
                );
            }
        }
    });

    Ok(Json(WebhookAck { received }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let mut services: std::collections::HashMap<String, ProviderStatus> = state
        .circuits
        .all_stats()
        .into_iter()
        .map(|(name, stats)| {
            (
                name,
                ProviderStatus {
                    circuit_state: stats.state.as_str().to_string(),
                    quota_percent: None,
                    last_success: stats.last_success,
                },
            )
        })
        .collect();

    if let Some(translator) = &state.translator {
        services.extend(translator.health().await);
    }

    let open: Vec<String> = services
        .iter()
        .filter(|(_, status)| status.circuit_state == "open")
        .map(|(name, _)| name.clone())
        .collect();

    let status = if open.is_empty() {
        HealthState::Healthy
    } else if open.len() < services.len() {
        HealthState::Degraded
    } else {
        HealthState::Unhealthy
    };

    let alerts = open
        .into_iter()
        .map(|name| format!("circuit open: {}", name))
        .collect();

    Json(HealthReport {
        status,
        version: state.version.clone(),
        services,
        alerts,
    })
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<DeliveryStats>> {
    let stats = state
        .delivery_log
        .stats_24h()
        .await
        .map_err(|e| ApiError(HeraldError::Database(e.to_string())))?;
    Ok(Json(stats))
}
