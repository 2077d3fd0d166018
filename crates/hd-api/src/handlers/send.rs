//! Send surface handlers

use crate::auth::authenticate;
use crate::{ApiError, ApiResult, AppState};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use hd_common::{Channel, HeraldError, Notification, NotificationType, Priority};
use hd_orchestrator::{BatchOptions, BatchResult, SendResult};
use serde::Deserialize;
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: HashMap<String, String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub sound: Option<String>,
    #[serde(default)]
    pub badge: Option<u32>,
    #[serde(default)]
    pub collapse_key: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u32>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl SendRequest {
    pub fn into_notification(self) -> Notification {
        let mut n = Notification::new(self.user_id, self.notification_type, self.title, self.body);
        n.data = self.data;
        n.image_url = self.image_url;
        n.sound = self.sound;
        n.badge = self.badge;
        n.collapse_key = self.collapse_key;
        n.ttl_seconds = self.ttl_seconds;
        n.category_id = self.category_id;
        n.thread_id = self.thread_id;
        if let Some(priority) = self.priority {
            n.priority = priority;
        }
        n.scheduled_for = self.scheduled_for;
        n.channels = self.channels;
        n
    }
}

/// Callers may send to themselves; service and admin roles to anyone.
fn authorize_target(caller: &crate::auth::Caller, target: Uuid) -> Result<(), HeraldError> {
    if caller.user_id == target || caller.role == "service" || caller.role == "admin" {
        Ok(())
    } else {
        Err(HeraldError::Forbidden)
    }
}

pub async fn send(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> ApiResult<Json<SendResult>> {
    let caller = authenticate(&headers, &state.jwt_secret).map_err(ApiError)?;
    authorize_target(&caller, request.user_id).map_err(ApiError)?;

    let result = state
        .orchestrator
        .send(request.into_notification())
        .await
        .map_err(ApiError)?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub notifications: Vec<SendRequest>,
    #[serde(default)]
    pub options: BatchOptions,
}

pub async fn send_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> ApiResult<Json<BatchResult>> {
    let caller = authenticate(&headers, &state.jwt_secret).map_err(ApiError)?;
    for item in &request.notifications {
        authorize_target(&caller, item.user_id).map_err(ApiError)?;
    }

    let notifications = request
        .notifications
        .into_iter()
        .map(SendRequest::into_notification)
        .collect();
    let result = state
        .orchestrator
        .batch_send(notifications, request.options)
        .await
        .map_err(ApiError)?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRequest {
    pub user_id: Uuid,
    pub template: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

pub async fn send_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TemplateRequest>,
) -> ApiResult<Json<SendResult>> {
    let caller = authenticate(&headers, &state.jwt_secret).map_err(ApiError)?;
    authorize_target(&caller, request.user_id).map_err(ApiError)?;

    let result = state
        .orchestrator
        .template_send(
            request.user_id,
            &request.template,
            request.variables,
            request.channels,
            request.priority,
        )
        .await
        .map_err(ApiError)?;
    Ok(Json(result))
}
