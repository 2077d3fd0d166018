use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

pub mod error;
pub mod logging;

pub use error::{ErrorCode, HeraldError, Result};

// ============================================================================
// Channels, Types, Categories, Priorities
// ============================================================================

/// A delivery medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Push,
    Email,
    Sms,
    InApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::InApp => "in_app",
        }
    }

    pub const ALL: [Channel; 4] = [Channel::Push, Channel::Email, Channel::Sms, Channel::InApp];
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic notification type. Closed set; every type maps to exactly one
/// category and carries a default priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    NewMessage,
    ListingFavorited,
    ListingExpired,
    ArrangementConfirmed,
    ArrangementReminder,
    SystemAnnouncement,
    AccountSecurity,
    Verification,
    PasswordReset,
    MarketingPromo,
    Digest,
}

impl NotificationType {
    /// Fixed type -> category mapping used by the preference gate.
    pub fn category(&self) -> Category {
        match self {
            NotificationType::NewMessage => Category::Chats,
            NotificationType::ListingFavorited | NotificationType::ListingExpired => Category::Posts,
            NotificationType::ArrangementConfirmed | NotificationType::ArrangementReminder => {
                Category::Social
            }
            NotificationType::SystemAnnouncement | NotificationType::Digest => Category::System,
            NotificationType::AccountSecurity
            | NotificationType::Verification
            | NotificationType::PasswordReset => Category::Security,
            NotificationType::MarketingPromo => Category::Marketing,
        }
    }

    /// Default priority when the request does not set one.
    pub fn default_priority(&self) -> Priority {
        match self {
            NotificationType::AccountSecurity | NotificationType::PasswordReset => Priority::Critical,
            NotificationType::NewMessage | NotificationType::Verification => Priority::High,
            NotificationType::MarketingPromo | NotificationType::Digest => Priority::Low,
            _ => Priority::Normal,
        }
    }

    /// Types that must always be able to reach the user by email and that
    /// qualify for the push -> email fallback.
    pub fn is_critical_security(&self) -> bool {
        matches!(
            self,
            NotificationType::AccountSecurity
                | NotificationType::Verification
                | NotificationType::PasswordReset
        )
    }
}

/// Coarse grouping of notification types for preference evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Chats,
    Posts,
    Social,
    System,
    Marketing,
    Security,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Chats => "chats",
            Category::Posts => "posts",
            Category::Social => "social",
            Category::System => "system",
            Category::Marketing => "marketing",
            Category::Security => "security",
        }
    }

    pub const ALL: [Category; 6] = [
        Category::Chats,
        Category::Posts,
        Category::Social,
        Category::System,
        Category::Marketing,
        Category::Security,
    ];
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

// ============================================================================
// Notification
// ============================================================================

/// The unit accepted by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    /// Opaque key-value bag forwarded to clients. Scalar strings only.
    #[serde(default)]
    pub data: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapse_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Requested channels. Empty means "derive from type and preferences".
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl Notification {
    pub fn new(user_id: Uuid, notification_type: NotificationType, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            notification_type,
            title: title.into(),
            body: body.into(),
            data: HashMap::new(),
            image_url: None,
            sound: None,
            badge: None,
            collapse_key: None,
            ttl_seconds: None,
            category_id: None,
            thread_id: None,
            priority: notification_type.default_priority(),
            scheduled_for: None,
            channels: Vec::new(),
        }
    }

    pub fn category(&self) -> Category {
        self.notification_type.category()
    }
}

// ============================================================================
// Preferences
// ============================================================================

/// Delivery cadence for a (category, channel) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Instant,
    Hourly,
    Daily,
    Weekly,
    Never,
}

impl Default for Frequency {
    fn default() -> Self {
        Frequency::Instant
    }
}

impl Frequency {
    /// Digest frequencies defer delivery; instant does not, never blocks.
    pub fn is_digest(&self) -> bool {
        matches!(self, Frequency::Hourly | Frequency::Daily | Frequency::Weekly)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSetting {
    pub enabled: bool,
    #[serde(default)]
    pub frequency: Frequency,
}

impl Default for ChannelSetting {
    fn default() -> Self {
        Self { enabled: true, frequency: Frequency::Instant }
    }
}

/// Per-category channel settings. Absent categories fall back to the
/// enabled/instant default on read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CategorySetting {
    #[serde(default)]
    pub push: ChannelSetting,
    #[serde(default)]
    pub email: ChannelSetting,
    #[serde(default)]
    pub sms: ChannelSetting,
}

impl CategorySetting {
    pub fn for_channel(&self, channel: Channel) -> ChannelSetting {
        match channel {
            Channel::Push => self.push.clone(),
            Channel::Email => self.email.clone(),
            Channel::Sms => self.sms.clone(),
            // In-app has no per-category knob; it follows the global enable.
            Channel::InApp => ChannelSetting::default(),
        }
    }
}

/// Daily recurring silence window in the user's timezone.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    pub enabled: bool,
    /// "HH:MM", 24-hour clock.
    pub start: String,
    /// "HH:MM". May be earlier than start (window wraps midnight).
    pub end: String,
    /// IANA timezone name, e.g. "Europe/Prague".
    pub timezone: String,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "22:00".to_string(),
            end: "08:00".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DigestSettings {
    pub daily_enabled: bool,
    /// "HH:MM" local time of the daily flush.
    pub daily_time: String,
    pub weekly_enabled: bool,
    /// 0 = Sunday .. 6 = Saturday.
    pub weekly_day: u8,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            daily_enabled: false,
            daily_time: "09:00".to_string(),
            weekly_enabled: false,
            weekly_day: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DndSettings {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl DndSettings {
    /// DND is active while enabled and the until timestamp has not passed.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.until.map(|u| now < u).unwrap_or(false)
    }
}

/// Full per-user preference record. First read creates defaults:
/// every channel globally enabled, every category instant.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub user_id: Uuid,
    pub push_enabled: bool,
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub in_app_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub phone_verified: bool,
    #[serde(default)]
    pub quiet_hours: QuietHours,
    #[serde(default)]
    pub digest: DigestSettings,
    #[serde(default)]
    pub dnd: DndSettings,
    /// category -> channel settings; missing keys mean enabled/instant.
    #[serde(default)]
    pub categories: HashMap<Category, CategorySetting>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreferences {
    pub fn defaults(user_id: Uuid) -> Self {
        Self {
            user_id,
            push_enabled: true,
            email_enabled: true,
            sms_enabled: true,
            in_app_enabled: true,
            phone_number: None,
            phone_verified: false,
            quiet_hours: QuietHours::default(),
            digest: DigestSettings::default(),
            dnd: DndSettings::default(),
            categories: HashMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn channel_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Push => self.push_enabled,
            Channel::Email => self.email_enabled,
            Channel::Sms => self.sms_enabled,
            Channel::InApp => self.in_app_enabled,
        }
    }

    pub fn category_setting(&self, category: Category, channel: Channel) -> ChannelSetting {
        self.categories
            .get(&category)
            .map(|c| c.for_channel(channel))
            .unwrap_or_default()
    }
}

// ============================================================================
// Device Tokens
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
        }
    }
}

/// A push delivery target. For web endpoints, `p256dh`/`auth` carry the
/// subscription key material.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceToken {
    pub user_id: Uuid,
    /// APNs/FCM token or WebPush endpoint URL.
    pub token: String,
    pub platform: Platform,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p256dh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Delivery
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
    Blocked,
    Deferred,
    Scheduled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Blocked => "blocked",
            DeliveryStatus::Deferred => "deferred",
            DeliveryStatus::Scheduled => "scheduled",
        }
    }
}

/// Outcome of one channel dispatch. Returned by adapters as a structured
/// result, never thrown across the channel boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered {
        provider: String,
        latency_ms: u64,
    },
    Scheduled {
        scheduled_for: DateTime<Utc>,
    },
    Blocked {
        reason: String,
    },
    Failed {
        code: ErrorCode,
        message: String,
        retryable: bool,
    },
}

impl DeliveryOutcome {
    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let retryable = code.retryable();
        DeliveryOutcome::Failed { code, message, retryable }
    }

    pub fn status(&self) -> DeliveryStatus {
        match self {
            DeliveryOutcome::Delivered { .. } => DeliveryStatus::Delivered,
            DeliveryOutcome::Scheduled { .. } => DeliveryStatus::Scheduled,
            DeliveryOutcome::Blocked { .. } => DeliveryStatus::Blocked,
            DeliveryOutcome::Failed { .. } => DeliveryStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryOutcome::Failed { retryable: true, .. })
    }
}

/// One row per (notification x channel) in the delivery log.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub attempts: u32,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn from_outcome(notification: &Notification, channel: Channel, outcome: &DeliveryOutcome) -> Self {
        let (provider, error_code, error_message, latency_ms) = match outcome {
            DeliveryOutcome::Delivered { provider, latency_ms } => {
                (Some(provider.clone()), None, None, Some(*latency_ms))
            }
            DeliveryOutcome::Scheduled { .. } => (None, None, None, None),
            DeliveryOutcome::Blocked { reason } => {
                (None, Some("BLOCKED_BY_PREFERENCES".to_string()), Some(reason.clone()), None)
            }
            DeliveryOutcome::Failed { code, message, .. } => {
                (None, Some(code.as_str().to_string()), Some(message.clone()), None)
            }
        };
        Self {
            notification_id: notification.id,
            user_id: notification.user_id,
            channel,
            provider,
            attempts: 1,
            status: outcome.status(),
            error_code,
            error_message,
            latency_ms,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Queue Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => QueueStatus::Processing,
            "completed" => QueueStatus::Completed,
            "failed" => QueueStatus::Failed,
            _ => QueueStatus::Pending,
        }
    }
}

/// Durable record for scheduled and digest-deferred notifications.
///
/// Items progress strictly pending -> processing -> (completed | failed |
/// pending); reverting to pending only on retry below the attempt cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payload: Notification,
    pub status: QueueStatus,
    pub attempts: i32,
    pub scheduled_for: DateTime<Utc>,
    pub consolidation_key: Option<String>,
    /// 1 (lowest) .. 10 (highest).
    pub priority: i16,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Digest Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DigestFrequency {
    Hourly,
    Daily,
    Weekly,
}

impl DigestFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestFrequency::Hourly => "hourly",
            DigestFrequency::Daily => "daily",
            DigestFrequency::Weekly => "weekly",
        }
    }

    pub fn from_frequency(f: Frequency) -> Option<Self> {
        match f {
            Frequency::Hourly => Some(DigestFrequency::Hourly),
            Frequency::Daily => Some(DigestFrequency::Daily),
            Frequency::Weekly => Some(DigestFrequency::Weekly),
            _ => None,
        }
    }
}

/// One deferred item inside a user's digest accumulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestItem {
    pub notification_type: NotificationType,
    pub category: Category,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Per-user digest accumulator keyed by (user_id, frequency,
/// consolidation_key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestBatchEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub frequency: DigestFrequency,
    pub consolidation_key: Option<String>,
    pub items: Vec<DigestItem>,
    pub next_flush: DateTime<Utc>,
    pub attempts: i32,
}

// ============================================================================
// Webhook Events
// ============================================================================

/// Normalised provider webhook event extracted from each provider's
/// documented envelope.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub provider: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

impl WebhookEvent {
    /// Hard-bounce and complaint events place the address on the
    /// suppression list.
    pub fn is_suppression(&self) -> bool {
        matches!(self.event_type.as_str(), "bounced" | "complained" | "spam_report")
    }
}

// ============================================================================
// Health & Stats Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health of a single provider adapter as reported by `health()`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdapterHealth {
    pub status: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub circuit_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthState,
    pub version: String,
    pub services: HashMap<String, ProviderStatus>,
    pub alerts: Vec<String>,
}

/// 24-hour delivery counters for the stats endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStats {
    pub delivered: i64,
    pub failed: i64,
    pub blocked: i64,
    pub scheduled: i64,
    pub by_channel: HashMap<String, i64>,
}

// ============================================================================
// Translation Types
// ============================================================================

/// A stored translation keyed by (content_type, content_id, field_name,
/// target_locale).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRecord {
    pub content_type: String,
    pub content_id: String,
    pub field_name: String,
    pub target_locale: String,
    pub translated_text: String,
    pub source_hash: String,
    /// Quality score in [0, 1].
    pub quality: f64,
    pub provider: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Monthly quota usage for an external provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub provider: String,
    /// "YYYY-MM".
    pub month: String,
    pub used: i64,
    pub limit: i64,
}

impl QuotaUsage {
    pub fn percent_used(&self) -> f64 {
        if self.limit <= 0 {
            return 0.0;
        }
        (self.used as f64 / self.limit as f64) * 100.0
    }

    pub fn exhausted(&self) -> bool {
        self.limit > 0 && self.used >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_category_mapping() {
        assert_eq!(NotificationType::NewMessage.category(), Category::Chats);
        assert_eq!(NotificationType::ListingFavorited.category(), Category::Posts);
        assert_eq!(NotificationType::PasswordReset.category(), Category::Security);
        assert_eq!(NotificationType::Digest.category(), Category::System);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_default_category_setting_is_instant_enabled() {
        let prefs = NotificationPreferences::defaults(Uuid::new_v4());
        let setting = prefs.category_setting(Category::Chats, Channel::Push);
        assert!(setting.enabled);
        assert_eq!(setting.frequency, Frequency::Instant);
    }

    #[test]
    fn test_dnd_active_window() {
        let mut dnd = DndSettings::default();
        let now = Utc::now();
        assert!(!dnd.is_active(now));

        dnd.enabled = true;
        dnd.until = Some(now + chrono::Duration::hours(1));
        assert!(dnd.is_active(now));

        dnd.until = Some(now - chrono::Duration::hours(1));
        assert!(!dnd.is_active(now));
    }

    #[test]
    fn test_delivery_outcome_status() {
        let outcome = DeliveryOutcome::Delivered { provider: "apns".to_string(), latency_ms: 42 };
        assert_eq!(outcome.status(), DeliveryStatus::Delivered);
        assert!(outcome.is_success());

        let failed = DeliveryOutcome::failed(ErrorCode::ServiceUnavailable, "down");
        assert!(failed.is_retryable());

        let blocked = DeliveryOutcome::failed(ErrorCode::NoTargets, "no tokens");
        assert!(!blocked.is_retryable());
    }

    #[test]
    fn test_queue_status_round_trip() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Completed,
            QueueStatus::Failed,
        ] {
            assert_eq!(QueueStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn test_quota_percent() {
        let usage = QuotaUsage {
            provider: "deepl".to_string(),
            month: "2026-08".to_string(),
            used: 250_000,
            limit: 500_000,
        };
        assert!((usage.percent_used() - 50.0).abs() < f64::EPSILON);
        assert!(!usage.exhausted());
    }

    #[test]
    fn test_notification_serde_camel_case() {
        let n = Notification::new(
            Uuid::new_v4(),
            NotificationType::NewMessage,
            "Hi",
            "You have a new message",
        );
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "new_message");
        assert!(json.get("userId").is_some());
        assert!(json.get("user_id").is_none());
    }
}
