//! Durable notification queue
//!
//! Claim-then-update: a worker pass atomically flips a batch of due pending
//! items to processing (`FOR UPDATE SKIP LOCKED`), so two concurrent workers
//! never claim the same item. Items stuck in processing beyond the timeout
//! are reset to pending at the start of each pass.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hd_common::{Notification, QueueItem, QueueStatus};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn insert(&self, item: &QueueItem) -> Result<()>;

    /// Atomically claim up to `limit` due pending items, oldest
    /// `scheduled_for` first, flipping them to processing.
    async fn claim(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<QueueItem>>;

    async fn mark_status(
        &self,
        id: Uuid,
        status: QueueStatus,
        error: Option<String>,
    ) -> Result<()>;

    /// Retryable failure below the attempt cap: bump attempts, back to pending.
    async fn retry(&self, id: Uuid, error: String) -> Result<()>;

    /// Reset items stuck in processing longer than `threshold`. Returns the
    /// number of items reset.
    async fn reset_stuck(&self, threshold: Duration) -> Result<u64>;

    async fn pending_count(&self) -> Result<i64>;
}

pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<QueueItem> {
        let payload: serde_json::Value = row.get("payload");
        let payload: Notification = serde_json::from_value(payload)?;
        let status: String = row.get("status");
        Ok(QueueItem {
            id: row.get("id"),
            user_id: row.get("user_id"),
            payload,
            status: QueueStatus::from_str(&status),
            attempts: row.get("attempts"),
            scheduled_for: row.get("scheduled_for"),
            consolidation_key: row.try_get("consolidation_key").ok().flatten(),
            priority: row.get("priority"),
            last_error: row.try_get("last_error").ok().flatten(),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl QueueRepository for PgQueue {
    async fn insert(&self, item: &QueueItem) -> Result<()> {
        let payload = serde_json::to_value(&item.payload)?;
        sqlx::query(
            "INSERT INTO notification_queue \
             (id, user_id, payload, status, attempts, scheduled_for, consolidation_key, priority, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), now()) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(item.id)
        .bind(item.user_id)
        .bind(&payload)
        .bind(item.status.as_str())
        .bind(item.attempts)
        .bind(item.scheduled_for)
        .bind(&item.consolidation_key)
        .bind(item.priority)
        .execute(&self.pool)
        .await?;

        debug!(
            queue_item_id = %item.id,
            scheduled_for = %item.scheduled_for,
            "Queue item inserted"
        );
        Ok(())
    }

    async fn claim(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        // scheduled_for == now counts as due.
        let rows = sqlx::query(
            "UPDATE notification_queue SET status = 'processing', updated_at = now() \
             WHERE id IN ( \
                 SELECT id FROM notification_queue \
                 WHERE status = 'pending' AND scheduled_for <= $1 \
                 ORDER BY scheduled_for ASC \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, user_id, payload, status, attempts, scheduled_for, \
                       consolidation_key, priority, last_error, created_at, updated_at",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(Self::parse_row(row)?);
        }
        // Claim order is not guaranteed by RETURNING.
        items.sort_by_key(|i| i.scheduled_for);

        debug!(count = items.len(), "Claimed queue items");
        Ok(items)
    }

    async fn mark_status(
        &self,
        id: Uuid,
        status: QueueStatus,
        error: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE notification_queue \
             SET status = $2, last_error = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retry(&self, id: Uuid, error: String) -> Result<()> {
        sqlx::query(
            "UPDATE notification_queue \
             SET status = 'pending', attempts = attempts + 1, last_error = $2, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_stuck(&self, threshold: Duration) -> Result<u64> {
        let cutoff = Utc::now() - threshold;
        let result = sqlx::query(
            "UPDATE notification_queue \
             SET status = 'pending', updated_at = now() \
             WHERE status = 'processing' AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            info!(count = count, "Reset stuck queue items to pending");
        }
        Ok(count)
    }

    async fn pending_count(&self) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS count FROM notification_queue WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        Ok(row.get("count"))
    }
}

// ============================================================================
// Email automation queue
// ============================================================================

/// A scheduled template-backed email.
#[derive(Debug, Clone)]
pub struct AutomationItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub template_slug: String,
    pub variables: std::collections::HashMap<String, String>,
    pub attempts: i32,
    pub scheduled_for: DateTime<Utc>,
}

#[async_trait]
pub trait AutomationQueueRepository: Send + Sync {
    async fn insert(&self, item: &AutomationItem) -> Result<()>;
    async fn claim(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<AutomationItem>>;
    async fn mark_status(&self, id: Uuid, status: QueueStatus, error: Option<String>)
        -> Result<()>;
    /// Return a claimed item to pending without counting an attempt
    /// (dry runs).
    async fn release(&self, id: Uuid) -> Result<()>;
}

pub struct PgAutomationQueue {
    pool: PgPool,
}

impl PgAutomationQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AutomationQueueRepository for PgAutomationQueue {
    async fn insert(&self, item: &AutomationItem) -> Result<()> {
        let variables = serde_json::to_value(&item.variables)?;
        sqlx::query(
            "INSERT INTO email_automation_queue \
             (id, user_id, template_slug, variables, status, attempts, scheduled_for, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 'pending', $5, $6, now(), now()) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(item.id)
        .bind(item.user_id)
        .bind(&item.template_slug)
        .bind(&variables)
        .bind(item.attempts)
        .bind(item.scheduled_for)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<AutomationItem>> {
        let rows = sqlx::query(
            "UPDATE email_automation_queue SET status = 'processing', updated_at = now() \
             WHERE id IN ( \
                 SELECT id FROM email_automation_queue \
                 WHERE status = 'pending' AND scheduled_for <= $1 \
                 ORDER BY scheduled_for ASC \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, user_id, template_slug, variables, attempts, scheduled_for",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let variables: serde_json::Value = row.get("variables");
            items.push(AutomationItem {
                id: row.get("id"),
                user_id: row.get("user_id"),
                template_slug: row.get("template_slug"),
                variables: serde_json::from_value(variables)?,
                attempts: row.get("attempts"),
                scheduled_for: row.get("scheduled_for"),
            });
        }
        items.sort_by_key(|i| i.scheduled_for);
        Ok(items)
    }

    async fn mark_status(
        &self,
        id: Uuid,
        status: QueueStatus,
        error: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE email_automation_queue \
             SET status = $2, last_error = $3, attempts = attempts + 1, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE email_automation_queue SET status = 'pending', updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
