//! Herald Queue & Digest Processors
//!
//! Workers that drain the durable queues and re-enter the orchestrator:
//! - QueueProcessor: scheduled and retryable notifications
//! - DigestProcessor: per-user consolidation into one summary email
//! - AutomationProcessor: template-backed scheduled emails
//! - WorkerRunner: interval loops with clean shutdown
//!
//! All workers use claim-then-update: at most one terminal success per item,
//! with stuck items reset to pending at the start of each pass.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use hd_common::{
    Category, Channel, DigestBatchEntry, DigestFrequency, HeraldError, Notification,
    NotificationType, QueueItem, QueueStatus,
};
use hd_config::DigestConfig;
use hd_orchestrator::NotificationSender;
use hd_store::{AutomationQueueRepository, DigestQueueRepository, QueueRepository};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

// ============================================================================
// Queue processor
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueuePassSummary {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub stuck_reset: u64,
}

pub struct QueueProcessor {
    queue: Arc<dyn QueueRepository>,
    sender: Arc<dyn NotificationSender>,
    config: DigestConfig,
}

impl QueueProcessor {
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        sender: Arc<dyn NotificationSender>,
        config: DigestConfig,
    ) -> Self {
        Self { queue, sender, config }
    }

    /// One worker pass: reset stuck items, claim due pending items in
    /// scheduled_for order, dispatch each through the orchestrator with
    /// bounded concurrency.
    pub async fn process(&self, limit: u32) -> hd_common::Result<QueuePassSummary> {
        let stuck_reset = self
            .queue
            .reset_stuck(Duration::minutes(self.config.processing_timeout_minutes))
            .await
            .map_err(|e| HeraldError::Database(e.to_string()))?;

        let items = self
            .queue
            .claim(limit, Utc::now())
            .await
            .map_err(|e| HeraldError::Database(e.to_string()))?;

        let mut summary = QueuePassSummary {
            claimed: items.len(),
            stuck_reset,
            ..Default::default()
        };
        if items.is_empty() {
            return Ok(summary);
        }

        debug!(count = items.len(), "Processing claimed queue items");
        metrics::gauge!("herald.queue.claimed").set(items.len() as f64);

        for chunk in items.chunks(self.config.queue_concurrency) {
            let outcomes = join_all(chunk.iter().map(|item| self.process_item(item))).await;
            for outcome in outcomes {
                match outcome {
                    ItemOutcome::Completed => summary.completed += 1,
                    ItemOutcome::Retried => summary.retried += 1,
                    ItemOutcome::Failed => summary.failed += 1,
                }
            }
        }

        info!(
            claimed = summary.claimed,
            completed = summary.completed,
            retried = summary.retried,
            failed = summary.failed,
            "Queue pass complete"
        );
        Ok(summary)
    }

    async fn process_item(&self, item: &QueueItem) -> ItemOutcome {
        let mut notification = item.payload.clone();
        // The item is due; the orchestrator must not re-defer it.
        notification.scheduled_for = None;

        let (retryable, error) = match self.sender.send_notification(notification).await {
            Ok(result) if result.success => {
                if let Err(e) = self
                    .queue
                    .mark_status(item.id, QueueStatus::Completed, None)
                    .await
                {
                    warn!(queue_item_id = %item.id, error = %e, "Failed to mark item completed");
                }
                metrics::counter!("herald.queue.completed").increment(1);
                return ItemOutcome::Completed;
            }
            Ok(result) => {
                let retryable = result
                    .channels
                    .iter()
                    .any(|c| c.retryable.unwrap_or(false));
                let error = result
                    .channels
                    .iter()
                    .find_map(|c| c.error.clone())
                    .unwrap_or_else(|| "delivery failed".to_string());
                (retryable, error)
            }
            Err(e) => (e.retryable(), e.to_string()),
        };

        let attempts_after = item.attempts + 1;
        if retryable && attempts_after < self.config.max_attempts {
            if let Err(e) = self.queue.retry(item.id, error).await {
                warn!(queue_item_id = %item.id, error = %e, "Failed to requeue item");
            }
            metrics::counter!("herald.queue.retried").increment(1);
            ItemOutcome::Retried
        } else {
            if let Err(e) = self
                .queue
                .mark_status(item.id, QueueStatus::Failed, Some(error))
                .await
            {
                warn!(queue_item_id = %item.id, error = %e, "Failed to mark item failed");
            }
            metrics::counter!("herald.queue.failed").increment(1);
            ItemOutcome::Failed
        }
    }
}

enum ItemOutcome {
    Completed,
    Retried,
    Failed,
}

// ============================================================================
// Digest processor
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DigestSummary {
    pub entries: usize,
    pub flushed: usize,
    pub deferred: usize,
    pub dry_run: bool,
}

fn section_label(category: Category) -> &'static str {
    match category {
        Category::Chats => "Messages",
        Category::Posts => "Listings",
        Category::Social => "Social",
        Category::System => "System",
        Category::Marketing => "Offers",
        Category::Security => "Security",
    }
}

/// Render one user's accumulated items into a digest notification: grouped
/// by category, top N titles per category, overflow counted.
pub fn render_digest(entry: &DigestBatchEntry, top_per_category: usize) -> Notification {
    let mut by_category: BTreeMap<&'static str, Vec<&hd_common::DigestItem>> = BTreeMap::new();
    for item in &entry.items {
        by_category
            .entry(section_label(item.category))
            .or_default()
            .push(item);
    }

    let total = entry.items.len();
    let mut body = String::new();
    for (label, items) in &by_category {
        body.push_str(&format!("{} ({})\n", label, items.len()));
        for item in items.iter().take(top_per_category) {
            body.push_str(&format!("- {}\n", item.title));
        }
        if items.len() > top_per_category {
            body.push_str(&format!("  and {} more\n", items.len() - top_per_category));
        }
        body.push('\n');
    }

    let title = match entry.frequency {
        DigestFrequency::Hourly => format!("Your hourly update ({})", total),
        DigestFrequency::Daily => format!("Your daily digest ({})", total),
        DigestFrequency::Weekly => format!("Your weekly digest ({})", total),
    };

    let mut notification = Notification::new(
        entry.user_id,
        NotificationType::Digest,
        title,
        body.trim_end().to_string(),
    );
    notification.channels = vec![Channel::Email];
    notification
}

pub struct DigestProcessor {
    digest_queue: Arc<dyn DigestQueueRepository>,
    sender: Arc<dyn NotificationSender>,
    config: DigestConfig,
}

impl DigestProcessor {
    pub fn new(
        digest_queue: Arc<dyn DigestQueueRepository>,
        sender: Arc<dyn NotificationSender>,
        config: DigestConfig,
    ) -> Self {
        Self { digest_queue, sender, config }
    }

    pub async fn process(
        &self,
        frequency: DigestFrequency,
        limit: Option<u32>,
        dry_run: bool,
    ) -> hd_common::Result<DigestSummary> {
        let limit = limit.unwrap_or(self.config.digest_batch_limit);
        let entries = self
            .digest_queue
            .due_entries(frequency, Utc::now(), limit)
            .await
            .map_err(|e| HeraldError::Database(e.to_string()))?;

        let mut summary = DigestSummary {
            entries: entries.len(),
            dry_run,
            ..Default::default()
        };

        for entry in entries {
            if entry.items.is_empty() {
                // Nothing accumulated; drop the empty shell.
                let _ = self.digest_queue.complete(entry.id).await;
                continue;
            }
            if dry_run {
                debug!(user_id = %entry.user_id, items = entry.items.len(), "Dry run, skipping flush");
                continue;
            }

            let notification = render_digest(&entry, self.config.digest_top_per_category);
            match self.sender.send_notification(notification).await {
                Ok(result) if result.success => {
                    if let Err(e) = self.digest_queue.complete(entry.id).await {
                        warn!(error = %e, "Failed to complete digest entry");
                    }
                    summary.flushed += 1;
                    metrics::counter!("herald.digest.flushed").increment(1);
                }
                other => {
                    if let Err(e) = &other {
                        warn!(user_id = %entry.user_id, error = %e, "Digest flush failed");
                    }
                    let retry_at = Utc::now() + Duration::minutes(15);
                    if let Err(e) = self.digest_queue.defer(entry.id, retry_at).await {
                        warn!(error = %e, "Failed to defer digest entry");
                    }
                    summary.deferred += 1;
                    metrics::counter!("herald.digest.deferred").increment(1);
                }
            }
        }

        info!(
            frequency = frequency.as_str(),
            entries = summary.entries,
            flushed = summary.flushed,
            deferred = summary.deferred,
            dry_run,
            "Digest pass complete"
        );
        Ok(summary)
    }
}

// ============================================================================
// Automation processor
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutomationSummary {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    pub dry_run: bool,
}

pub struct AutomationProcessor {
    automation: Arc<dyn AutomationQueueRepository>,
    sender: Arc<dyn NotificationSender>,
    config: DigestConfig,
}

impl AutomationProcessor {
    pub fn new(
        automation: Arc<dyn AutomationQueueRepository>,
        sender: Arc<dyn NotificationSender>,
        config: DigestConfig,
    ) -> Self {
        Self { automation, sender, config }
    }

    /// Drain the scheduled-email queue. Items are sliced into groups of
    /// `concurrency`; each group is awaited before the next starts.
    pub async fn process(
        &self,
        batch_size: u32,
        concurrency: usize,
        dry_run: bool,
    ) -> hd_common::Result<AutomationSummary> {
        let items = self
            .automation
            .claim(batch_size, Utc::now())
            .await
            .map_err(|e| HeraldError::Database(e.to_string()))?;

        let mut summary = AutomationSummary {
            claimed: items.len(),
            dry_run,
            ..Default::default()
        };

        if dry_run {
            for item in &items {
                let _ = self.automation.release(item.id).await;
            }
            return Ok(summary);
        }

        let concurrency = concurrency.max(1);
        for group in items.chunks(concurrency) {
            let outcomes = join_all(group.iter().map(|item| async move {
                let result = self
                    .sender
                    .send_template(
                        item.user_id,
                        &item.template_slug,
                        item.variables.clone(),
                        Some(vec![Channel::Email]),
                        None,
                    )
                    .await;
                (item, result)
            }))
            .await;

            for (item, result) in outcomes {
                match result {
                    Ok(send) if send.success => {
                        let _ = self
                            .automation
                            .mark_status(item.id, QueueStatus::Completed, None)
                            .await;
                        summary.sent += 1;
                    }
                    outcome => {
                        let (retryable, error) = match outcome {
                            Ok(send) => (
                                send.channels.iter().any(|c| c.retryable.unwrap_or(false)),
                                "delivery failed".to_string(),
                            ),
                            Err(e) => (e.retryable(), e.to_string()),
                        };
                        let status = if retryable && item.attempts + 1 < self.config.max_attempts {
                            summary.retried += 1;
                            QueueStatus::Pending
                        } else {
                            summary.failed += 1;
                            QueueStatus::Failed
                        };
                        let _ = self
                            .automation
                            .mark_status(item.id, status, Some(error))
                            .await;
                    }
                }
            }
        }

        info!(
            claimed = summary.claimed,
            sent = summary.sent,
            retried = summary.retried,
            failed = summary.failed,
            "Automation pass complete"
        );
        Ok(summary)
    }
}

// ============================================================================
// Worker runner
// ============================================================================

/// Interval-driven worker loops. The queue worker runs every poll interval;
/// digest flushes are checked every five minutes per frequency (entries gate
/// themselves through next_flush).
pub struct WorkerRunner {
    queue: Arc<QueueProcessor>,
    digest: Arc<DigestProcessor>,
    config: DigestConfig,
    running: Arc<RwLock<bool>>,
}

impl WorkerRunner {
    pub fn new(queue: Arc<QueueProcessor>, digest: Arc<DigestProcessor>, config: DigestConfig) -> Self {
        Self {
            queue,
            digest,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Worker runner already running");
                return;
            }
            *running = true;
        }

        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            "Starting Herald workers"
        );

        let queue = Arc::clone(&self.queue);
        let batch = self.config.queue_batch_size;
        let poll = std::time::Duration::from_secs(self.config.poll_interval_secs);
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let mut ticker = interval(poll);
            loop {
                ticker.tick().await;
                if !*running.read().await {
                    break;
                }
                if let Err(e) = queue.process(batch).await {
                    error!(error = %e, "Queue worker pass failed");
                }
            }
        });

        let digest = Arc::clone(&self.digest);
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let mut ticker = interval(std::time::Duration::from_secs(300));
            loop {
                ticker.tick().await;
                if !*running.read().await {
                    break;
                }
                for frequency in [
                    DigestFrequency::Hourly,
                    DigestFrequency::Daily,
                    DigestFrequency::Weekly,
                ] {
                    if let Err(e) = digest.process(frequency, None, false).await {
                        error!(frequency = frequency.as_str(), error = %e, "Digest pass failed");
                    }
                }
            }
        });
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("Herald workers stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hd_common::{DigestItem, Priority};
    use hd_orchestrator::{ChannelResult, SendResult};
    use hd_store::memory::{MemoryDigestQueue, MemoryQueue};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use uuid::Uuid;

    /// Scripted sender: per-call outcomes, records every notification.
    struct FakeSender {
        script: Mutex<Vec<SendScript>>,
        pub sent: Mutex<Vec<Notification>>,
    }

    #[derive(Clone, Copy)]
    enum SendScript {
        Ok,
        FailRetryable,
        FailTerminal,
    }

    impl FakeSender {
        fn always_ok() -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(vec![]),
                sent: Mutex::new(vec![]),
            })
        }

        fn scripted(script: Vec<SendScript>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                sent: Mutex::new(vec![]),
            })
        }

        fn result(notification: &Notification, script: SendScript) -> SendResult {
            let (status, retryable) = match script {
                SendScript::Ok => (hd_common::DeliveryStatus::Delivered, None),
                SendScript::FailRetryable => (hd_common::DeliveryStatus::Failed, Some(true)),
                SendScript::FailTerminal => (hd_common::DeliveryStatus::Failed, Some(false)),
            };
            SendResult {
                notification_id: notification.id,
                user_id: notification.user_id,
                success: matches!(script, SendScript::Ok),
                channels: vec![ChannelResult {
                    channel: Channel::Email,
                    status,
                    provider: None,
                    error: retryable.map(|_| "boom".to_string()),
                    error_code: None,
                    retryable,
                    scheduled_for: None,
                }],
                timestamp: Utc::now(),
            }
        }
    }

    #[async_trait]
    impl NotificationSender for FakeSender {
        async fn send_notification(
            &self,
            notification: Notification,
        ) -> hd_common::Result<SendResult> {
            let script = {
                let mut script = self.script.lock();
                if script.is_empty() {
                    SendScript::Ok
                } else {
                    script.remove(0)
                }
            };
            let result = Self::result(&notification, script);
            self.sent.lock().push(notification);
            Ok(result)
        }

        async fn send_template(
            &self,
            user_id: Uuid,
            _template_name: &str,
            _variables: HashMap<String, String>,
            _channels: Option<Vec<Channel>>,
            _priority: Option<Priority>,
        ) -> hd_common::Result<SendResult> {
            let n = Notification::new(user_id, NotificationType::SystemAnnouncement, "t", "b");
            let script = {
                let mut script = self.script.lock();
                if script.is_empty() {
                    SendScript::Ok
                } else {
                    script.remove(0)
                }
            };
            let result = Self::result(&n, script);
            self.sent.lock().push(n);
            Ok(result)
        }
    }

    fn queue_item(queue: &MemoryQueue, scheduled_for: DateTime<Utc>) -> Uuid {
        let user_id = Uuid::new_v4();
        let item = QueueItem {
            id: Uuid::new_v4(),
            user_id,
            payload: Notification::new(user_id, NotificationType::NewMessage, "t", "b"),
            status: QueueStatus::Pending,
            attempts: 0,
            scheduled_for,
            consolidation_key: None,
            priority: 5,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = item.id;
        futures::executor::block_on(queue.insert(&item)).unwrap();
        id
    }

    fn digest_entry(digest: &MemoryDigestQueue, user_id: Uuid, titles: &[&str]) {
        for title in titles {
            let item = DigestItem {
                notification_type: NotificationType::ListingFavorited,
                category: Category::Posts,
                title: title.to_string(),
                body: "body".to_string(),
                data: HashMap::new(),
                created_at: Utc::now(),
            };
            futures::executor::block_on(digest.append(
                user_id,
                DigestFrequency::Daily,
                None,
                &item,
                Utc::now() - Duration::minutes(1),
            ))
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_queue_pass_completes_items() {
        let queue = Arc::new(MemoryQueue::new());
        let id = queue_item(&queue, Utc::now() - Duration::minutes(1));
        let sender = FakeSender::always_ok();
        let processor = QueueProcessor::new(queue.clone(), sender, DigestConfig::default());

        let summary = processor.process(10).await.unwrap();

        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(queue.get(id).unwrap().status, QueueStatus::Completed);
    }

    #[tokio::test]
    async fn test_retryable_failure_returns_to_pending() {
        let queue = Arc::new(MemoryQueue::new());
        let id = queue_item(&queue, Utc::now() - Duration::minutes(1));
        let sender = FakeSender::scripted(vec![SendScript::FailRetryable]);
        let processor = QueueProcessor::new(queue.clone(), sender, DigestConfig::default());

        let summary = processor.process(10).await.unwrap();

        assert_eq!(summary.retried, 1);
        let item = queue.get(id).unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.attempts, 1);
        assert!(item.last_error.is_some());
    }

    #[tokio::test]
    async fn test_attempt_cap_marks_failed() {
        let queue = Arc::new(MemoryQueue::new());
        let id = queue_item(&queue, Utc::now() - Duration::minutes(1));
        let sender = FakeSender::scripted(vec![SendScript::FailRetryable; 5]);
        let processor = QueueProcessor::new(queue.clone(), sender, DigestConfig::default());

        // Three passes: pending -> pending -> failed (max_attempts = 3).
        processor.process(10).await.unwrap();
        processor.process(10).await.unwrap();
        let summary = processor.process(10).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(queue.get(id).unwrap().status, QueueStatus::Failed);
    }

    #[tokio::test]
    async fn test_terminal_failure_fails_immediately() {
        let queue = Arc::new(MemoryQueue::new());
        let id = queue_item(&queue, Utc::now() - Duration::minutes(1));
        let sender = FakeSender::scripted(vec![SendScript::FailTerminal]);
        let processor = QueueProcessor::new(queue.clone(), sender, DigestConfig::default());

        let summary = processor.process(10).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(queue.get(id).unwrap().status, QueueStatus::Failed);
    }

    #[tokio::test]
    async fn test_future_items_not_claimed() {
        let queue = Arc::new(MemoryQueue::new());
        queue_item(&queue, Utc::now() + Duration::hours(1));
        let sender = FakeSender::always_ok();
        let processor = QueueProcessor::new(queue.clone(), sender, DigestConfig::default());

        let summary = processor.process(10).await.unwrap();
        assert_eq!(summary.claimed, 0);
    }

    #[tokio::test]
    async fn test_two_workers_claim_disjoint_items() {
        let queue = Arc::new(MemoryQueue::new());
        for _ in 0..100 {
            queue_item(&queue, Utc::now() - Duration::minutes(1));
        }
        let sender = FakeSender::always_ok();
        let a = QueueProcessor::new(queue.clone(), sender.clone(), DigestConfig::default());
        let b = QueueProcessor::new(queue.clone(), sender.clone(), DigestConfig::default());

        let (sa, sb) = tokio::join!(a.process(100), b.process(100));
        let (sa, sb) = (sa.unwrap(), sb.unwrap());

        // Every item processed exactly once across both workers.
        assert_eq!(sa.completed + sb.completed, 100);
        assert_eq!(sender.sent.lock().len(), 100);
        assert!(queue
            .all()
            .iter()
            .all(|i| i.status == QueueStatus::Completed));
    }

    #[tokio::test]
    async fn test_digest_renders_sections_and_completes() {
        let digest = Arc::new(MemoryDigestQueue::new());
        let user_id = Uuid::new_v4();
        digest_entry(&digest, user_id, &["Chair", "Table", "Lamp"]);

        let sender = FakeSender::always_ok();
        let processor = DigestProcessor::new(digest.clone(), sender.clone(), DigestConfig::default());

        let summary = processor
            .process(DigestFrequency::Daily, None, false)
            .await
            .unwrap();

        assert_eq!(summary.flushed, 1);
        assert!(digest.all().is_empty());

        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 1);
        let digest_email = &sent[0];
        assert_eq!(digest_email.notification_type, NotificationType::Digest);
        assert_eq!(digest_email.channels, vec![Channel::Email]);
        assert!(digest_email.body.contains("Listings (3)"));
        assert!(digest_email.body.contains("- Chair"));
        assert!(digest_email.body.contains("- Table"));
        assert!(digest_email.body.contains("- Lamp"));
    }

    #[tokio::test]
    async fn test_digest_overflow_count() {
        let entry = DigestBatchEntry {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            frequency: DigestFrequency::Daily,
            consolidation_key: None,
            items: (0..8)
                .map(|i| DigestItem {
                    notification_type: NotificationType::ListingFavorited,
                    category: Category::Posts,
                    title: format!("Item {}", i),
                    body: "b".to_string(),
                    data: HashMap::new(),
                    created_at: Utc::now(),
                })
                .collect(),
            next_flush: Utc::now(),
            attempts: 0,
        };
        let n = render_digest(&entry, 5);
        assert!(n.body.contains("Listings (8)"));
        assert!(n.body.contains("and 3 more"));
        assert!(n.title.contains("(8)"));
    }

    #[tokio::test]
    async fn test_digest_dry_run_flushes_nothing() {
        let digest = Arc::new(MemoryDigestQueue::new());
        digest_entry(&digest, Uuid::new_v4(), &["Chair"]);

        let sender = FakeSender::always_ok();
        let processor = DigestProcessor::new(digest.clone(), sender.clone(), DigestConfig::default());

        let summary = processor
            .process(DigestFrequency::Daily, None, true)
            .await
            .unwrap();

        assert_eq!(summary.entries, 1);
        assert_eq!(summary.flushed, 0);
        assert_eq!(digest.all().len(), 1);
        assert!(sender.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_digest_failure_defers_with_attempt() {
        let digest = Arc::new(MemoryDigestQueue::new());
        digest_entry(&digest, Uuid::new_v4(), &["Chair"]);

        let sender = FakeSender::scripted(vec![SendScript::FailRetryable]);
        let processor = DigestProcessor::new(digest.clone(), sender, DigestConfig::default());

        let summary = processor
            .process(DigestFrequency::Daily, None, false)
            .await
            .unwrap();

        assert_eq!(summary.deferred, 1);
        let entries = digest.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempts, 1);
        assert!(entries[0].next_flush > Utc::now());
    }
}
