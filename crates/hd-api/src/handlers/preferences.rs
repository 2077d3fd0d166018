//! Preference handlers

use crate::auth::authenticate;
use crate::{ApiError, ApiResult, AppState};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use hd_common::{HeraldError, NotificationPreferences};
use hd_store::preferences::{DndUpdate, PreferencesUpdate};
use serde::Deserialize;
use utoipa::ToSchema;

pub async fn get_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<NotificationPreferences>> {
    let caller = authenticate(&headers, &state.jwt_secret).map_err(ApiError)?;
    let prefs = state
        .preferences
        .get(caller.user_id)
        .await
        .map_err(|e| ApiError(HeraldError::Database(e.to_string())))?;
    Ok(Json(prefs))
}

/// Partial update, deep-merged: untouched paths survive.
pub async fn update_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<PreferencesUpdate>,
) -> ApiResult<Json<NotificationPreferences>> {
    let caller = authenticate(&headers, &state.jwt_secret).map_err(ApiError)?;
    let prefs = state
        .preferences
        .update(caller.user_id, update)
        .await
        .map_err(|e| ApiError(HeraldError::Database(e.to_string())))?;
    Ok(Json(prefs))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DndRequest {
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// 1 to 168 hours, used when `until` is absent.
    #[serde(default)]
    pub duration_hours: Option<i64>,
}

pub async fn enable_dnd(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DndRequest>,
) -> ApiResult<Json<NotificationPreferences>> {
    let caller = authenticate(&headers, &state.jwt_secret).map_err(ApiError)?;

    let until = match (request.until, request.duration_hours) {
        (Some(until), _) => {
            if until <= Utc::now() {
                return Err(ApiError(HeraldError::Validation(
                    "dnd until must be in the future".into(),
                )));
            }
            until
        }
        (None, Some(hours)) => {
            if !(1..=168).contains(&hours) {
                return Err(ApiError(HeraldError::Validation(
                    "duration_hours must be between 1 and 168".into(),
                )));
            }
            Utc::now() + Duration::hours(hours)
        }
        (None, None) => {
            return Err(ApiError(HeraldError::Validation(
                "either until or duration_hours is required".into(),
            )))
        }
    };

    let update = PreferencesUpdate {
        dnd: Some(DndUpdate {
            enabled: Some(true),
            until: Some(until),
        }),
        ..Default::default()
    };
    let prefs = state
        .preferences
        .update(caller.user_id, update)
        .await
        .map_err(|e| ApiError(HeraldError::Database(e.to_string())))?;
    Ok(Json(prefs))
}

pub async fn disable_dnd(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<NotificationPreferences>> {
    let caller = authenticate(&headers, &state.jwt_secret).map_err(ApiError)?;

    let update = PreferencesUpdate {
        dnd: Some(DndUpdate {
            enabled: Some(false),
            until: None,
        }),
        ..Default::default()
    };
    let prefs = state
        .preferences
        .update(caller.user_id, update)
        .await
        .map_err(|e| ApiError(HeraldError::Database(e.to_string())))?;
    Ok(Json(prefs))
}
