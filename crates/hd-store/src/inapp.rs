//! In-app notification rows
//!
//! The in-app channel has no external provider: delivery is a row in
//! `in_app_notifications` plus a realtime publish handled by the adapter.

use anyhow::Result;
use async_trait::async_trait;
use hd_common::Notification;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[async_trait]
pub trait InAppRepository: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<()>;
    async fn unread_count(&self, user_id: Uuid) -> Result<i64>;
}

pub struct PgInApp {
    pool: PgPool,
}

impl PgInApp {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InAppRepository for PgInApp {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        let data = serde_json::to_value(&notification.data)?;
        let type_name = serde_json::to_string(&notification.notification_type)?;
        sqlx::query(
            "INSERT INTO in_app_notifications (id, user_id, notification_type, title, body, data, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now()) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(type_name.trim_matches('"'))
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM in_app_notifications WHERE user_id = $1 AND NOT is_read",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("count"))
    }
}
