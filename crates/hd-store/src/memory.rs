//! In-memory repository doubles
//!
//! Used by unit and integration tests across the workspace, and by
//! development mode when no database is configured. Semantics match the
//! PostgreSQL implementations, including claim atomicity and upsert keys.

pub use crate::directory::MemoryUserDirectory;
use crate::preferences::{merge_preferences, PreferencesUpdate};
use crate::queue::AutomationItem;
use crate::templates::Template;
use crate::translations::{TranslationQueueItem, TranslationQueueRepository};
use crate::{
    AutomationQueueRepository, DeliveryLogRepository, DeviceTokenRepository,
    DigestQueueRepository, PreferencesRepository, QueueRepository, SuppressionRepository,
    TemplateRepository, TranslationRepository, UsageRepository,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hd_common::{
    DeliveryRecord, DeliveryStats, DeviceToken, DigestBatchEntry, DigestFrequency, DigestItem,
    Notification, NotificationPreferences, Platform, QueueItem, QueueStatus, QuotaUsage,
    TranslationRecord,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// Preferences
// ============================================================================

#[derive(Default)]
pub struct MemoryPreferences {
    store: Mutex<HashMap<Uuid, NotificationPreferences>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user's preferences directly.
    pub fn seed(&self, prefs: NotificationPreferences) {
        self.store.lock().insert(prefs.user_id, prefs);
    }
}

#[async_trait]
impl PreferencesRepository for MemoryPreferences {
    async fn get(&self, user_id: Uuid) -> Result<NotificationPreferences> {
        let mut store = self.store.lock();
        Ok(store
            .entry(user_id)
            .or_insert_with(|| NotificationPreferences::defaults(user_id))
            .clone())
    }

    async fn update(
        &self,
        user_id: Uuid,
        update: PreferencesUpdate,
    ) -> Result<NotificationPreferences> {
        let mut store = self.store.lock();
        let prefs = store
            .entry(user_id)
            .or_insert_with(|| NotificationPreferences::defaults(user_id));
        merge_preferences(prefs, &update);
        Ok(prefs.clone())
    }
}

// ============================================================================
// Device tokens
// ============================================================================

#[derive(Default)]
pub struct MemoryDeviceTokens {
    tokens: Mutex<Vec<DeviceToken>>,
    pub deactivated: Mutex<Vec<String>>,
}

impl MemoryDeviceTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, token: DeviceToken) {
        self.tokens.lock().push(token);
    }
}

#[async_trait]
impl DeviceTokenRepository for MemoryDeviceTokens {
    async fn list_active(
        &self,
        user_ids: &[Uuid],
        platforms: Option<&[Platform]>,
    ) -> Result<Vec<DeviceToken>> {
        let tokens = self.tokens.lock();
        Ok(tokens
            .iter()
            .filter(|t| t.is_active && user_ids.contains(&t.user_id))
            .filter(|t| platforms.map(|p| p.contains(&t.platform)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn upsert(&self, token: &DeviceToken) -> Result<()> {
        let mut tokens = self.tokens.lock();
        tokens.retain(|t| t.token != token.token);
        tokens.push(token.clone());
        Ok(())
    }

    async fn deactivate(&self, token: &str) -> Result<()> {
        let mut tokens = self.tokens.lock();
        for t in tokens.iter_mut() {
            if t.token == token {
                t.is_active = false;
            }
        }
        self.deactivated.lock().push(token.to_string());
        Ok(())
    }

    async fn touch(&self, token: &str, at: DateTime<Utc>) -> Result<()> {
        let mut tokens = self.tokens.lock();
        for t in tokens.iter_mut() {
            if t.token == token {
                t.last_used_at = Some(at);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Delivery log
// ============================================================================

#[derive(Default)]
pub struct MemoryDeliveryLog {
    pub records: Mutex<Vec<DeliveryRecord>>,
}

impl MemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.records.lock().len()
    }
}

#[async_trait]
impl DeliveryLogRepository for MemoryDeliveryLog {
    async fn insert(&self, record: &DeliveryRecord) -> Result<()> {
        let mut records = self.records.lock();
        // At most one terminal record per (notification, channel).
        let terminal = |status: hd_common::DeliveryStatus| {
            matches!(
                status,
                hd_common::DeliveryStatus::Delivered
                    | hd_common::DeliveryStatus::Failed
                    | hd_common::DeliveryStatus::Blocked
            )
        };
        if terminal(record.status)
            && records.iter().any(|r| {
                r.notification_id == record.notification_id
                    && r.channel == record.channel
                    && terminal(r.status)
            })
        {
            return Ok(());
        }
        records.push(record.clone());
        Ok(())
    }

    async fn stats_24h(&self) -> Result<DeliveryStats> {
        let records = self.records.lock();
        let cutoff = Utc::now() - Duration::hours(24);
        let mut stats = DeliveryStats::default();
        for record in records.iter().filter(|r| r.created_at > cutoff) {
            match record.status {
                hd_common::DeliveryStatus::Delivered => stats.delivered += 1,
                hd_common::DeliveryStatus::Failed => stats.failed += 1,
                hd_common::DeliveryStatus::Blocked => stats.blocked += 1,
                _ => stats.scheduled += 1,
            }
            *stats
                .by_channel
                .entry(record.channel.as_str().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }
}

// ============================================================================
// Notification queue
// ============================================================================

#[derive(Default)]
pub struct MemoryQueue {
    items: Mutex<HashMap<Uuid, QueueItem>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<QueueItem> {
        self.items.lock().values().cloned().collect()
    }

    pub fn get(&self, id: Uuid) -> Option<QueueItem> {
        self.items.lock().get(&id).cloned()
    }
}

#[async_trait]
impl QueueRepository for MemoryQueue {
    async fn insert(&self, item: &QueueItem) -> Result<()> {
        self.items
            .lock()
            .entry(item.id)
            .or_insert_with(|| item.clone());
        Ok(())
    }

    async fn claim(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let mut items = self.items.lock();
        let mut due: Vec<Uuid> = items
            .values()
            .filter(|i| i.status == QueueStatus::Pending && i.scheduled_for <= now)
            .map(|i| i.id)
            .collect();
        due.sort_by_key(|id| items[id].scheduled_for);
        due.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            let item = items.get_mut(&id).unwrap();
            item.status = QueueStatus::Processing;
            item.updated_at = now;
            claimed.push(item.clone());
        }
        Ok(claimed)
    }

    async fn mark_status(
        &self,
        id: Uuid,
        status: QueueStatus,
        error: Option<String>,
    ) -> Result<()> {
        if let Some(item) = self.items.lock().get_mut(&id) {
            item.status = status;
            item.last_error = error;
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn retry(&self, id: Uuid, error: String) -> Result<()> {
        if let Some(item) = self.items.lock().get_mut(&id) {
            item.status = QueueStatus::Pending;
            item.attempts += 1;
            item.last_error = Some(error);
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reset_stuck(&self, threshold: Duration) -> Result<u64> {
        let cutoff = Utc::now() - threshold;
        let mut count = 0;
        for item in self.items.lock().values_mut() {
            if item.status == QueueStatus::Processing && item.updated_at < cutoff {
                item.status = QueueStatus::Pending;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn pending_count(&self) -> Result<i64> {
        Ok(self
            .items
            .lock()
            .values()
            .filter(|i| i.status == QueueStatus::Pending)
            .count() as i64)
    }
}

// ============================================================================
// Digest queue
// ============================================================================

#[derive(Default)]
pub struct MemoryDigestQueue {
    entries: Mutex<Vec<DigestBatchEntry>>,
}

impl MemoryDigestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<DigestBatchEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl DigestQueueRepository for MemoryDigestQueue {
    async fn append(
        &self,
        user_id: Uuid,
        frequency: DigestFrequency,
        consolidation_key: Option<&str>,
        item: &DigestItem,
        next_flush: DateTime<Utc>,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        let existing = entries.iter_mut().find(|e| {
            e.user_id == user_id
                && e.frequency == frequency
                && e.consolidation_key.as_deref() == consolidation_key
        });
        match existing {
            Some(entry) => entry.items.push(item.clone()),
            None => entries.push(DigestBatchEntry {
                id: Uuid::new_v4(),
                user_id,
                frequency,
                consolidation_key: consolidation_key.map(|s| s.to_string()),
                items: vec![item.clone()],
                next_flush,
                attempts: 0,
            }),
        }
        Ok(())
    }

    async fn due_entries(
        &self,
        frequency: DigestFrequency,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DigestBatchEntry>> {
        let entries = self.entries.lock();
        let mut due: Vec<DigestBatchEntry> = entries
            .iter()
            .filter(|e| e.frequency == frequency && e.next_flush <= now)
            .cloned()
            .collect();
        due.sort_by_key(|e| e.next_flush);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        self.entries.lock().retain(|e| e.id != id);
        Ok(())
    }

    async fn defer(&self, id: Uuid, next_flush: DateTime<Utc>) -> Result<()> {
        for entry in self.entries.lock().iter_mut() {
            if entry.id == id {
                entry.attempts += 1;
                entry.next_flush = next_flush;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Automation queue
// ============================================================================

#[derive(Default)]
pub struct MemoryAutomationQueue {
    items: Mutex<HashMap<Uuid, (AutomationItem, QueueStatus)>>,
}

impl MemoryAutomationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, id: Uuid) -> Option<QueueStatus> {
        self.items.lock().get(&id).map(|(_, s)| *s)
    }
}

#[async_trait]
impl AutomationQueueRepository for MemoryAutomationQueue {
    async fn insert(&self, item: &AutomationItem) -> Result<()> {
        self.items
            .lock()
            .entry(item.id)
            .or_insert_with(|| (item.clone(), QueueStatus::Pending));
        Ok(())
    }

    async fn claim(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<AutomationItem>> {
        let mut items = self.items.lock();
        let mut due: Vec<AutomationItem> = items
            .values()
            .filter(|(i, s)| *s == QueueStatus::Pending && i.scheduled_for <= now)
            .map(|(i, _)| i.clone())
            .collect();
        due.sort_by_key(|i| i.scheduled_for);
        due.truncate(limit as usize);
        for item in &due {
            items.get_mut(&item.id).unwrap().1 = QueueStatus::Processing;
        }
        Ok(due)
    }

    async fn mark_status(
        &self,
        id: Uuid,
        status: QueueStatus,
        _error: Option<String>,
    ) -> Result<()> {
        if let Some(entry) = self.items.lock().get_mut(&id) {
            entry.1 = status;
        }
        Ok(())
    }

    async fn release(&self, id: Uuid) -> Result<()> {
        if let Some(entry) = self.items.lock().get_mut(&id) {
            entry.1 = QueueStatus::Pending;
        }
        Ok(())
    }
}

// ============================================================================
// Suppressions
// ============================================================================

#[derive(Default)]
pub struct MemorySuppressions {
    emails: Mutex<HashMap<String, String>>,
}

impl MemorySuppressions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SuppressionRepository for MemorySuppressions {
    async fn is_suppressed(&self, email: &str) -> Result<bool> {
        Ok(self.emails.lock().contains_key(&email.to_lowercase()))
    }

    async fn insert(&self, email: &str, reason: &str, _provider: Option<&str>) -> Result<()> {
        self.emails
            .lock()
            .entry(email.to_lowercase())
            .or_insert_with(|| reason.to_string());
        Ok(())
    }
}

// ============================================================================
// Templates
// ============================================================================

#[derive(Default)]
pub struct MemoryTemplates {
    templates: Mutex<HashMap<String, Template>>,
}

impl MemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, template: Template) {
        self.templates
            .lock()
            .insert(template.slug.clone(), template);
    }
}

#[async_trait]
impl TemplateRepository for MemoryTemplates {
    async fn get(&self, slug: &str, locale: Option<&str>) -> Result<Option<Template>> {
        let templates = self.templates.lock();
        if let Some(locale) = locale {
            let localized = format!("{}_{}", slug, locale);
            if let Some(t) = templates.get(&localized) {
                return Ok(Some(t.clone()));
            }
        }
        Ok(templates.get(slug).cloned())
    }
}

// ============================================================================
// Translations
// ============================================================================

#[derive(Default)]
pub struct MemoryTranslations {
    records: Mutex<HashMap<(String, String, String, String), TranslationRecord>>,
    usage: Mutex<HashMap<(String, String), QuotaUsage>>,
    pub metrics: Mutex<Vec<(String, bool)>>,
}

impl MemoryTranslations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn seed_usage(&self, usage: QuotaUsage) {
        self.usage
            .lock()
            .insert((usage.provider.clone(), usage.month.clone()), usage);
    }
}

#[async_trait]
impl TranslationRepository for MemoryTranslations {
    async fn store(&self, record: &TranslationRecord) -> Result<()> {
        let key = (
            record.content_type.clone(),
            record.content_id.clone(),
            record.field_name.clone(),
            record.target_locale.clone(),
        );
        self.records.lock().insert(key, record.clone());
        Ok(())
    }

    async fn get(
        &self,
        content_type: &str,
        content_id: &str,
        field_name: &str,
        target_locale: &str,
    ) -> Result<Option<TranslationRecord>> {
        let key = (
            content_type.to_string(),
            content_id.to_string(),
            field_name.to_string(),
            target_locale.to_string(),
        );
        Ok(self.records.lock().get(&key).cloned())
    }
}

#[async_trait]
impl UsageRepository for MemoryTranslations {
    async fn record_usage(
        &self,
        provider: &str,
        month: &str,
        chars: i64,
        limit: i64,
    ) -> Result<QuotaUsage> {
        let mut usage = self.usage.lock();
        let entry = usage
            .entry((provider.to_string(), month.to_string()))
            .or_insert_with(|| QuotaUsage {
                provider: provider.to_string(),
                month: month.to_string(),
                used: 0,
                limit,
            });
        entry.used += chars;
        Ok(entry.clone())
    }

    async fn get_usage(&self, provider: &str, month: &str) -> Result<Option<QuotaUsage>> {
        Ok(self
            .usage
            .lock()
            .get(&(provider.to_string(), month.to_string()))
            .cloned())
    }

    async fn record_provider_metric(
        &self,
        provider: &str,
        success: bool,
        _latency_ms: Option<i64>,
        _error: Option<&str>,
    ) -> Result<()> {
        self.metrics.lock().push((provider.to_string(), success));
        Ok(())
    }

    async fn provider_success_rate(&self, provider: &str) -> Result<Option<f64>> {
        let metrics = self.metrics.lock();
        let relevant: Vec<&(String, bool)> =
            metrics.iter().filter(|(p, _)| p == provider).collect();
        if relevant.is_empty() {
            return Ok(None);
        }
        let ok = relevant.iter().filter(|(_, s)| *s).count();
        Ok(Some(ok as f64 / relevant.len() as f64))
    }
}

// ============================================================================
// In-app notifications
// ============================================================================

#[derive(Default)]
pub struct MemoryInApp {
    pub rows: Mutex<Vec<Notification>>,
}

impl MemoryInApp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.rows.lock().len()
    }
}

#[async_trait]
impl crate::InAppRepository for MemoryInApp {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        let mut rows = self.rows.lock();
        if !rows.iter().any(|n| n.id == notification.id) {
            rows.push(notification.clone());
        }
        Ok(())
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|n| n.user_id == user_id)
            .count() as i64)
    }
}

// ============================================================================
// Translation queue
// ============================================================================

#[derive(Default)]
pub struct MemoryTranslationQueue {
    items: Mutex<HashMap<Uuid, (TranslationQueueItem, QueueStatus)>>,
}

impl MemoryTranslationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, id: Uuid) -> Option<QueueStatus> {
        self.items.lock().get(&id).map(|(_, s)| *s)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[async_trait]
impl TranslationQueueRepository for MemoryTranslationQueue {
    async fn enqueue(&self, item: &TranslationQueueItem) -> Result<()> {
        let mut items = self.items.lock();
        // Upsert on the natural key.
        let existing = items
            .iter()
            .find(|(_, (i, _))| {
                i.content_type == item.content_type
                    && i.content_id == item.content_id
                    && i.field_name == item.field_name
                    && i.target_locale == item.target_locale
            })
            .map(|(id, _)| *id);
        match existing {
            Some(id) => {
                let entry = items.get_mut(&id).unwrap();
                entry.0.source_text = item.source_text.clone();
                entry.1 = QueueStatus::Pending;
            }
            None => {
                items.insert(item.id, (item.clone(), QueueStatus::Pending));
            }
        }
        Ok(())
    }

    async fn claim(&self, limit: u32) -> Result<Vec<TranslationQueueItem>> {
        let mut items = self.items.lock();
        let claimed: Vec<TranslationQueueItem> = items
            .values()
            .filter(|(_, s)| *s == QueueStatus::Pending)
            .take(limit as usize)
            .map(|(i, _)| i.clone())
            .collect();
        for item in &claimed {
            items.get_mut(&item.id).unwrap().1 = QueueStatus::Processing;
        }
        Ok(claimed)
    }

    async fn mark_done(&self, id: Uuid) -> Result<()> {
        if let Some(entry) = self.items.lock().get_mut(&id) {
            entry.1 = QueueStatus::Completed;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, _error: &str, max_attempts: i32) -> Result<()> {
        if let Some(entry) = self.items.lock().get_mut(&id) {
            entry.0.attempts += 1;
            entry.1 = if entry.0.attempts >= max_attempts {
                QueueStatus::Failed
            } else {
                QueueStatus::Pending
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hd_common::NotificationType;

    fn queue_item(scheduled_for: DateTime<Utc>) -> QueueItem {
        let user_id = Uuid::new_v4();
        QueueItem {
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
        }
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        for _ in 0..10 {
            queue.insert(&queue_item(now)).await.unwrap();
        }

        let first = queue.claim(10, now).await.unwrap();
        let second = queue.claim(10, now).await.unwrap();
        assert_eq!(first.len(), 10);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_claim_orders_by_scheduled_for() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        queue.insert(&queue_item(now - Duration::minutes(1))).await.unwrap();
        queue.insert(&queue_item(now - Duration::minutes(5))).await.unwrap();
        queue.insert(&queue_item(now - Duration::minutes(3))).await.unwrap();

        let claimed = queue.claim(10, now).await.unwrap();
        assert!(claimed.windows(2).all(|w| w[0].scheduled_for <= w[1].scheduled_for));
    }

    #[tokio::test]
    async fn test_due_exactly_now_is_claimed() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        queue.insert(&queue_item(now)).await.unwrap();
        let claimed = queue.claim(10, now).await.unwrap();
        assert_eq!(claimed.len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_log_single_terminal_record() {
        let log = MemoryDeliveryLog::new();
        let user_id = Uuid::new_v4();
        let n = Notification::new(user_id, NotificationType::NewMessage, "t", "b");
        let outcome = hd_common::DeliveryOutcome::Delivered {
            provider: "apns".to_string(),
            latency_ms: 5,
        };
        let record = DeliveryRecord::from_outcome(&n, hd_common::Channel::Push, &outcome);
        log.insert(&record).await.unwrap();
        log.insert(&record).await.unwrap();
        assert_eq!(log.count(), 1);
    }

    #[tokio::test]
    async fn test_digest_append_consolidates() {
        let digest = MemoryDigestQueue::new();
        let user_id = Uuid::new_v4();
        let item = DigestItem {
            notification_type: NotificationType::ListingFavorited,
            category: hd_common::Category::Posts,
            title: "t".to_string(),
            body: "b".to_string(),
            data: HashMap::new(),
            created_at: Utc::now(),
        };
        let flush = Utc::now() + Duration::hours(1);
        for _ in 0..3 {
            digest
                .append(user_id, DigestFrequency::Daily, None, &item, flush)
                .await
                .unwrap();
        }
        let entries = digest.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].items.len(), 3);
    }
}
