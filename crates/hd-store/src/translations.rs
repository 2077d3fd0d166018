//! Translation persistence and usage accounting

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use hd_common::{QuotaUsage, TranslationRecord};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use tracing::debug;

/// Stable hash of the source text, used to detect stale translations.
pub fn source_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Monthly usage counters and provider health metrics, shared by the email
/// router and the translation engine.
#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// Atomically add `amount` (characters for translation, sends for email)
    /// to the provider's monthly counter; returns the new usage row.
    async fn record_usage(
        &self,
        provider: &str,
        month: &str,
        amount: i64,
        limit: i64,
    ) -> Result<QuotaUsage>;

    async fn get_usage(&self, provider: &str, month: &str) -> Result<Option<QuotaUsage>>;

    /// Record one provider call outcome for health scoring.
    async fn record_provider_metric(
        &self,
        provider: &str,
        success: bool,
        latency_ms: Option<i64>,
        error: Option<&str>,
    ) -> Result<()>;

    /// Success rate over the trailing hour, per provider, in [0, 1].
    async fn provider_success_rate(&self, provider: &str) -> Result<Option<f64>>;
}

#[async_trait]
pub trait TranslationRepository: UsageRepository {
    /// Upsert on the natural key (content_type, content_id, field_name,
    /// target_locale): re-enqueueing the same item yields one stored row.
    async fn store(&self, record: &TranslationRecord) -> Result<()>;

    async fn get(
        &self,
        content_type: &str,
        content_id: &str,
        field_name: &str,
        target_locale: &str,
    ) -> Result<Option<TranslationRecord>>;
}

pub struct PgTranslations {
    pool: PgPool,
}

impl PgTranslations {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageRepository for PgTranslations {
    async fn record_usage(
        &self,
        provider: &str,
        month: &str,
        amount: i64,
        limit: i64,
    ) -> Result<QuotaUsage> {
        let row = sqlx::query(
            "INSERT INTO translation_usage (provider, month, used, quota_limit) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (provider, month) \
             DO UPDATE SET used = translation_usage.used + $3 \
             RETURNING used, quota_limit",
        )
        .bind(provider)
        .bind(month)
        .bind(amount)
        .bind(limit)
        .fetch_one(&self.pool)
        .await?;

        Ok(QuotaUsage {
            provider: provider.to_string(),
            month: month.to_string(),
            used: row.get("used"),
            limit: row.get("quota_limit"),
        })
    }

    async fn get_usage(&self, provider: &str, month: &str) -> Result<Option<QuotaUsage>> {
        let row = sqlx::query(
            "SELECT used, quota_limit FROM translation_usage WHERE provider = $1 AND month = $2",
        )
        .bind(provider)
        .bind(month)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| QuotaUsage {
            provider: provider.to_string(),
            month: month.to_string(),
            used: row.get("used"),
            limit: row.get("quota_limit"),
        }))
    }

    async fn record_provider_metric(
        &self,
        provider: &str,
        success: bool,
        latency_ms: Option<i64>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO email_provider_health_metrics (provider, success, latency_ms, error_message, created_at) \
             VALUES ($1, $2, $3, $4, now())",
        )
        .bind(provider)
        .bind(success)
        .bind(latency_ms)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn provider_success_rate(&self, provider: &str) -> Result<Option<f64>> {
        let row = sqlx::query(
            "SELECT COUNT(*) FILTER (WHERE success) AS ok, COUNT(*) AS total \
             FROM email_provider_health_metrics \
             WHERE provider = $1 AND created_at > now() - interval '1 hour'",
        )
        .bind(provider)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        if total == 0 {
            return Ok(None);
        }
        let ok: i64 = row.get("ok");
        Ok(Some(ok as f64 / total as f64))
    }
}

#[async_trait]
impl TranslationRepository for PgTranslations {
    async fn store(&self, record: &TranslationRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO dynamic_content_translations \
             (content_type, content_id, field_name, target_locale, translated_text, source_hash, quality, provider, expires_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now()) \
             ON CONFLICT (content_type, content_id, field_name, target_locale) \
             DO UPDATE SET translated_text = $5, source_hash = $6, quality = $7, provider = $8, expires_at = $9, updated_at = now()",
        )
        .bind(&record.content_type)
        .bind(&record.content_id)
        .bind(&record.field_name)
        .bind(&record.target_locale)
        .bind(&record.translated_text)
        .bind(&record.source_hash)
        .bind(record.quality)
        .bind(&record.provider)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        debug!(
            locale = %record.target_locale,
            provider = %record.provider,
            quality = record.quality,
            "Stored translation"
        );
        Ok(())
    }

    async fn get(
        &self,
        content_type: &str,
        content_id: &str,
        field_name: &str,
        target_locale: &str,
    ) -> Result<Option<TranslationRecord>> {
        let row = sqlx::query(
            "SELECT content_type, content_id, field_name, target_locale, translated_text, source_hash, quality, provider, expires_at \
             FROM dynamic_content_translations \
             WHERE content_type = $1 AND content_id = $2 AND field_name = $3 AND target_locale = $4 \
               AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(content_type)
        .bind(content_id)
        .bind(field_name)
        .bind(target_locale)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| TranslationRecord {
            content_type: row.get("content_type"),
            content_id: row.get("content_id"),
            field_name: row.get("field_name"),
            target_locale: row.get("target_locale"),
            translated_text: row.get("translated_text"),
            source_hash: row.get("source_hash"),
            quality: row.get("quality"),
            provider: row.get("provider"),
            expires_at: row.try_get("expires_at").ok().flatten(),
        }))
    }
}

// ============================================================================
// Translation queue
// ============================================================================

/// A queued translation job. The natural key is (content_type, content_id,
/// field_name, target_locale); re-enqueueing replaces the source text
/// instead of adding a second row.
#[derive(Debug, Clone)]
pub struct TranslationQueueItem {
    pub id: uuid::Uuid,
    pub content_type: String,
    pub content_id: String,
    pub field_name: String,
    pub source_text: String,
    pub source_locale: String,
    pub target_locale: String,
    pub attempts: i32,
}

#[async_trait]
pub trait TranslationQueueRepository: Send + Sync {
    async fn enqueue(&self, item: &TranslationQueueItem) -> Result<()>;
    async fn claim(&self, limit: u32) -> Result<Vec<TranslationQueueItem>>;
    async fn mark_done(&self, id: uuid::Uuid) -> Result<()>;
    async fn mark_failed(&self, id: uuid::Uuid, error: &str, max_attempts: i32) -> Result<()>;
}

pub struct PgTranslationQueue {
    pool: PgPool,
}

impl PgTranslationQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TranslationQueueRepository for PgTranslationQueue {
    async fn enqueue(&self, item: &TranslationQueueItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO translation_queue \
             (id, content_type, content_id, field_name, source_text, source_locale, target_locale, status, attempts, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', 0, now(), now()) \
             ON CONFLICT (content_type, content_id, field_name, target_locale) \
             DO UPDATE SET source_text = $5, source_locale = $6, status = 'pending', updated_at = now()",
        )
        .bind(item.id)
        .bind(&item.content_type)
        .bind(&item.content_id)
        .bind(&item.field_name)
        .bind(&item.source_text)
        .bind(&item.source_locale)
        .bind(&item.target_locale)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim(&self, limit: u32) -> Result<Vec<TranslationQueueItem>> {
        let rows = sqlx::query(
            "UPDATE translation_queue SET status = 'processing', updated_at = now() \
             WHERE id IN ( \
                 SELECT id FROM translation_queue WHERE status = 'pending' \
                 ORDER BY created_at ASC LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, content_type, content_id, field_name, source_text, source_locale, target_locale, attempts",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TranslationQueueItem {
                id: row.get("id"),
                content_type: row.get("content_type"),
                content_id: row.get("content_id"),
                field_name: row.get("field_name"),
                source_text: row.get("source_text"),
                source_locale: row.get("source_locale"),
                target_locale: row.get("target_locale"),
                attempts: row.get("attempts"),
            })
            .collect())
    }

    async fn mark_done(&self, id: uuid::Uuid) -> Result<()> {
        sqlx::query("UPDATE translation_queue SET status = 'completed', updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: uuid::Uuid, error: &str, max_attempts: i32) -> Result<()> {
        sqlx::query(
            "UPDATE translation_queue \
             SET attempts = attempts + 1, last_error = $2, \
                 status = CASE WHEN attempts + 1 >= $3 THEN 'failed' ELSE 'pending' END, \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Current month in "YYYY-MM" form, the quota accounting period.
pub fn current_month() -> String {
    Utc::now().format("%Y-%m").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_hash_is_stable() {
        assert_eq!(source_hash("hello"), source_hash("hello"));
        assert_ne!(source_hash("hello"), source_hash("hello "));
        assert_eq!(source_hash("hello").len(), 64);
    }

    #[test]
    fn test_current_month_format() {
        let month = current_month();
        assert_eq!(month.len(), 7);
        assert_eq!(month.as_bytes()[4], b'-');
    }
}
