//! Email suppression list
//!
//! Hard bounces and complaints land here via provider webhooks. The check
//! runs before email provider selection and is never bypassed, not even by
//! critical priority.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

#[async_trait]
pub trait SuppressionRepository: Send + Sync {
    async fn is_suppressed(&self, email: &str) -> Result<bool>;
    async fn insert(&self, email: &str, reason: &str, provider: Option<&str>) -> Result<()>;
}

pub struct PgSuppressions {
    pool: PgPool,
}

impl PgSuppressions {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SuppressionRepository for PgSuppressions {
    async fn is_suppressed(&self, email: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM email_suppressions WHERE email = $1")
            .bind(email.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(&self, email: &str, reason: &str, provider: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO email_suppressions (email, reason, provider, created_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(email.to_lowercase())
        .bind(reason)
        .bind(provider)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(reason = %reason, "Address added to suppression list");
        }
        Ok(())
    }
}
