//! Digest batch repository
//!
//! One accumulator row per (user, frequency, consolidation key). Appending
//! an item upserts the row and pushes onto the JSONB items array; the flush
//! worker selects rows whose next_flush has passed.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hd_common::{DigestBatchEntry, DigestFrequency, DigestItem};
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

fn frequency_from_str(s: &str) -> DigestFrequency {
    match s {
        "hourly" => DigestFrequency::Hourly,
        "weekly" => DigestFrequency::Weekly,
        _ => DigestFrequency::Daily,
    }
}

#[async_trait]
pub trait DigestQueueRepository: Send + Sync {
    /// Append an item to the user's accumulator, creating it with the given
    /// next_flush when absent.
    async fn append(
        &self,
        user_id: Uuid,
        frequency: DigestFrequency,
        consolidation_key: Option<&str>,
        item: &DigestItem,
        next_flush: DateTime<Utc>,
    ) -> Result<()>;

    /// Entries due for flushing (next_flush <= now).
    async fn due_entries(
        &self,
        frequency: DigestFrequency,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DigestBatchEntry>>;

    /// Delete a flushed entry.
    async fn complete(&self, id: Uuid) -> Result<()>;

    /// Keep a failed entry, bump attempts, push next_flush forward.
    async fn defer(&self, id: Uuid, next_flush: DateTime<Utc>) -> Result<()>;
}

pub struct PgDigestQueue {
    pool: PgPool,
}

impl PgDigestQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DigestQueueRepository for PgDigestQueue {
    async fn append(
        &self,
        user_id: Uuid,
        frequency: DigestFrequency,
        consolidation_key: Option<&str>,
        item: &DigestItem,
        next_flush: DateTime<Utc>,
    ) -> Result<()> {
        let item_json = serde_json::to_value(item)?;
        // The empty string stands in for "no consolidation key" so the
        // composite unique constraint applies.
        let key = consolidation_key.unwrap_or("");

        sqlx::query(
            "INSERT INTO digest_batches (id, user_id, frequency, consolidation_key, items, next_flush, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, jsonb_build_array($5::jsonb), $6, now(), now()) \
             ON CONFLICT (user_id, frequency, consolidation_key) \
             DO UPDATE SET items = digest_batches.items || $5::jsonb, updated_at = now()",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(frequency.as_str())
        .bind(key)
        .bind(&item_json)
        .bind(next_flush)
        .execute(&self.pool)
        .await?;

        debug!(
            user_id = %user_id,
            frequency = frequency.as_str(),
            "Appended digest item"
        );
        Ok(())
    }

    async fn due_entries(
        &self,
        frequency: DigestFrequency,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DigestBatchEntry>> {
        let rows = sqlx::query(
            "SELECT id, user_id, frequency, consolidation_key, items, next_flush, attempts \
             FROM digest_batches \
             WHERE frequency = $1 AND next_flush <= $2 \
             ORDER BY next_flush ASC \
             LIMIT $3",
        )
        .bind(frequency.as_str())
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let items: serde_json::Value = row.get("items");
            let items: Vec<DigestItem> = serde_json::from_value(items)?;
            let frequency: String = row.get("frequency");
            let key: String = row.get("consolidation_key");
            entries.push(DigestBatchEntry {
                id: row.get("id"),
                user_id: row.get("user_id"),
                frequency: frequency_from_str(&frequency),
                consolidation_key: if key.is_empty() { None } else { Some(key) },
                items,
                next_flush: row.get("next_flush"),
                attempts: row.get("attempts"),
            });
        }
        Ok(entries)
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM digest_batches WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn defer(&self, id: Uuid, next_flush: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE digest_batches \
             SET attempts = attempts + 1, next_flush = $2, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(next_flush)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
