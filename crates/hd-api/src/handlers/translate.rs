//! Translation API handlers

use crate::auth::authenticate_service;
use crate::{ApiError, ApiResult, AppState};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use hd_common::{HeraldError, ProviderStatus};
use hd_translate::{TranslationRequest, TranslationService};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

fn translator(state: &AppState) -> Result<&TranslationService, ApiError> {
    state
        .translator
        .as_ref()
        .ok_or_else(|| ApiError(HeraldError::ServiceUnavailable("translation disabled".into())))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TranslateBody {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TranslateResponse {
    pub success: bool,
    pub translation: String,
    pub provider: String,
    pub quality: f64,
    pub cached: bool,
}

pub async fn translate(
    State(state): State<AppState>,
    Json(body): Json<TranslateBody>,
) -> ApiResult<Json<TranslateResponse>> {
    if body.text.trim().is_empty() {
        return Err(ApiError(HeraldError::Validation("text must not be empty".into())));
    }

    let mut request = TranslationRequest::adhoc(body.text, body.source_lang, body.target_lang);
    request.context = body.context;

    let outcome = translator(&state)?.translate(request).await.map_err(ApiError)?;
    Ok(Json(TranslateResponse {
        success: true,
        translation: outcome.text,
        provider: outcome.provider,
        quality: outcome.quality,
        cached: outcome.cached,
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchTranslateItem {
    pub text: String,
    pub source_lang: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchTranslateBody {
    pub items: Vec<BatchTranslateItem>,
    pub target_locale: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchTranslateEntry {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn batch_translate(
    State(state): State<AppState>,
    Json(body): Json<BatchTranslateBody>,
) -> ApiResult<Json<Vec<BatchTranslateEntry>>> {
    let translator = translator(&state)?;

    let requests: Vec<TranslationRequest> = body
        .items
        .into_iter()
        .map(|item| {
            let mut request =
                TranslationRequest::adhoc(item.text, item.source_lang, body.target_locale.clone());
            request.context = item.context;
            request
        })
        .collect();

    let results = translator.batch_translate(requests, &body.target_locale).await;
    let entries = results
        .into_iter()
        .map(|result| match result {
            Ok(outcome) => BatchTranslateEntry {
                success: true,
                translation: Some(outcome.text),
                provider: Some(outcome.provider),
                error: None,
            },
            Err(e) => BatchTranslateEntry {
                success: false,
                translation: None,
                provider: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    Ok(Json(entries))
}

#[derive(Debug, Deserialize, Default, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessQueueBody {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessQueueResponse {
    pub done: u32,
    pub failed: u32,
}

pub async fn process_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ProcessQueueBody>,
) -> ApiResult<Json<ProcessQueueResponse>> {
    authenticate_service(&headers, &state.cron_secret).map_err(ApiError)?;
    let (done, failed) = translator(&state)?
        .process_queue(body.limit.unwrap_or(50))
        .await
        .map_err(ApiError)?;
    Ok(Json(ProcessQueueResponse { done, failed }))
}

pub async fn health(
    State(state): State<AppState>,
) -> ApiResult<Json<HashMap<String, ProviderStatus>>> {
    Ok(Json(translator(&state)?.health().await))
}
