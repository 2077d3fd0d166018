//! Delivery log repository
//!
//! One row per (notification x channel). The partial unique index on
//! terminal statuses enforces at most one terminal record per pair; a
//! second terminal insert for the same pair is dropped, not duplicated.

use anyhow::Result;
use async_trait::async_trait;
use hd_common::{DeliveryRecord, DeliveryStats};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::debug;

#[async_trait]
pub trait DeliveryLogRepository: Send + Sync {
    async fn insert(&self, record: &DeliveryRecord) -> Result<()>;

    /// Counters over the trailing 24 hours.
    async fn stats_24h(&self) -> Result<DeliveryStats>;
}

pub struct PgDeliveryLog {
    pool: PgPool,
}

impl PgDeliveryLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryLogRepository for PgDeliveryLog {
    async fn insert(&self, record: &DeliveryRecord) -> Result<()> {
        let latency: Option<i64> = record.latency_ms.map(|ms| ms as i64);
        sqlx::query(
            "INSERT INTO notification_delivery_log \
             (notification_id, user_id, channel, provider, attempts, status, error_code, error_message, latency_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT DO NOTHING",
        )
        .bind(record.notification_id)
        .bind(record.user_id)
        .bind(record.channel.as_str())
        .bind(&record.provider)
        .bind(record.attempts as i32)
        .bind(record.status.as_str())
        .bind(&record.error_code)
        .bind(&record.error_message)
        .bind(latency)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        debug!(
            notification_id = %record.notification_id,
            channel = %record.channel,
            status = ?record.status,
            "Delivery record written"
        );
        Ok(())
    }

    async fn stats_24h(&self) -> Result<DeliveryStats> {
        let rows = sqlx::query(
            "SELECT status, channel, COUNT(*) AS count \
             FROM notification_delivery_log \
             WHERE created_at > now() - interval '24 hours' \
             GROUP BY status, channel",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = DeliveryStats::default();
        let mut by_channel: HashMap<String, i64> = HashMap::new();

        for row in rows {
            let status: String = row.get("status");
            let channel: String = row.get("channel");
            let count: i64 = row.get("count");
            match status.as_str() {
                "delivered" => stats.delivered += count,
                "failed" => stats.failed += count,
                "blocked" => stats.blocked += count,
                "scheduled" | "deferred" => stats.scheduled += count,
                _ => {}
            }
            *by_channel.entry(channel).or_default() += count;
        }

        stats.by_channel = by_channel;
        Ok(stats)
    }
}
