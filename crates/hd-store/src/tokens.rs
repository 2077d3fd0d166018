//! Device token repository

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hd_common::{DeviceToken, Platform};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

fn platform_from_str(s: &str) -> Platform {
    match s {
        "ios" => Platform::Ios,
        "android" => Platform::Android,
        _ => Platform::Web,
    }
}

#[async_trait]
pub trait DeviceTokenRepository: Send + Sync {
    /// Active tokens for the given users, optionally filtered by platform.
    async fn list_active(
        &self,
        user_ids: &[Uuid],
        platforms: Option<&[Platform]>,
    ) -> Result<Vec<DeviceToken>>;

    /// Register or refresh a token.
    async fn upsert(&self, token: &DeviceToken) -> Result<()>;

    /// Deactivate an invalid token or endpoint. Safe to call repeatedly.
    async fn deactivate(&self, token: &str) -> Result<()>;

    async fn touch(&self, token: &str, at: DateTime<Utc>) -> Result<()>;
}

pub struct PgDeviceTokens {
    pool: PgPool,
}

impl PgDeviceTokens {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> DeviceToken {
        DeviceToken {
            user_id: row.get("user_id"),
            token: row.get("token"),
            platform: platform_from_str(row.get("platform")),
            is_active: row.get("is_active"),
            p256dh: row.try_get("p256dh").ok(),
            auth: row.try_get("auth").ok(),
            last_used_at: row.try_get("last_used_at").ok(),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl DeviceTokenRepository for PgDeviceTokens {
    async fn list_active(
        &self,
        user_ids: &[Uuid],
        platforms: Option<&[Platform]>,
    ) -> Result<Vec<DeviceToken>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = match platforms {
            Some(platforms) => {
                let names: Vec<String> =
                    platforms.iter().map(|p| p.as_str().to_string()).collect();
                sqlx::query(
                    "SELECT token, user_id, platform, is_active, p256dh, auth, last_used_at, created_at \
                     FROM device_tokens WHERE user_id = ANY($1) AND platform = ANY($2) AND is_active",
                )
                .bind(user_ids)
                .bind(&names)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT token, user_id, platform, is_active, p256dh, auth, last_used_at, created_at \
                     FROM device_tokens WHERE user_id = ANY($1) AND is_active",
                )
                .bind(user_ids)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let tokens = rows.iter().map(Self::parse_row).collect::<Vec<_>>();
        debug!(users = user_ids.len(), tokens = tokens.len(), "Listed active device tokens");
        Ok(tokens)
    }

    async fn upsert(&self, token: &DeviceToken) -> Result<()> {
        sqlx::query(
            "INSERT INTO device_tokens (token, user_id, platform, is_active, p256dh, auth, last_used_at, created_at) \
             VALUES ($1, $2, $3, TRUE, $4, $5, $6, $7) \
             ON CONFLICT (token) DO UPDATE \
             SET user_id = $2, platform = $3, is_active = TRUE, p256dh = $4, auth = $5, last_used_at = $6",
        )
        .bind(&token.token)
        .bind(token.user_id)
        .bind(token.platform.as_str())
        .bind(&token.p256dh)
        .bind(&token.auth)
        .bind(token.last_used_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate(&self, token: &str) -> Result<()> {
        let result = sqlx::query("UPDATE device_tokens SET is_active = FALSE WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            info!("Deactivated invalid device token");
        }
        Ok(())
    }

    async fn touch(&self, token: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE device_tokens SET last_used_at = $2 WHERE token = $1")
            .bind(token)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
