//! In-app channel adapter
//!
//! No external provider: delivery writes an `in_app_notifications` row and
//! publishes a realtime event on the user's Redis channel. The row write is
//! authoritative; a failed publish only degrades liveness, so it is logged
//! and the delivery still counts.

use hd_common::{DeliveryOutcome, ErrorCode, Notification};
use hd_store::InAppRepository;
use redis::aio::ConnectionManager;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub struct InAppAdapter {
    repo: Arc<dyn InAppRepository>,
    redis: Option<ConnectionManager>,
}

impl InAppAdapter {
    pub fn new(repo: Arc<dyn InAppRepository>, redis: Option<ConnectionManager>) -> Self {
        Self { repo, redis }
    }

    pub async fn send(&self, notification: &Notification) -> DeliveryOutcome {
        let started = Instant::now();

        if let Err(e) = self.repo.insert(notification).await {
            return DeliveryOutcome::failed(
                ErrorCode::ServiceUnavailable,
                format!("in-app store write failed: {}", e),
            );
        }

        if let Some(redis) = &self.redis {
            let channel = format!("user:{}:notifications", notification.user_id);
            let event = json!({
                "id": notification.id,
                "type": notification.notification_type,
                "title": notification.title,
                "body": notification.body,
                "data": notification.data,
            });
            let mut conn = redis.clone();
            let publish: redis::RedisResult<i64> = redis::cmd("PUBLISH")
                .arg(&channel)
                .arg(event.to_string())
                .query_async(&mut conn)
                .await;
            match publish {
                Ok(subscribers) => {
                    debug!(channel = %channel, subscribers, "Published in-app event")
                }
                Err(e) => warn!(error = %e, "In-app realtime publish failed"),
            }
        }

        DeliveryOutcome::Delivered {
            provider: "in_app".to_string(),
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }
}
