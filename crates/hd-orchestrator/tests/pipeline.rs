//! End-to-end pipeline tests over in-memory stores and scripted transports.

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use hd_common::{
    Category, CategorySetting, Channel, ChannelSetting, DeliveryStatus, DeviceToken, ErrorCode,
    Frequency, Notification, NotificationPreferences, NotificationType, Platform, Priority,
    QuietHours,
};
use hd_config::{EmailRouterConfig, OrchestratorConfig};
use hd_orchestrator::{BatchOptions, Orchestrator};
use hd_providers::{
    Attempt, EmailMessage, EmailProvider, EmailRouter, InAppAdapter, PushChannel, PushTransport,
    UnconfiguredSms,
};
use hd_resilience::{CircuitBreakerConfig, CircuitRegistry, QuotaGate, RetryBudget};
use hd_store::directory::UserContact;
use hd_store::memory::{
    MemoryDeliveryLog, MemoryDeviceTokens, MemoryDigestQueue, MemoryInApp, MemoryPreferences,
    MemoryQueue, MemorySuppressions, MemoryTemplates, MemoryTranslations, MemoryUserDirectory,
};
use hd_store::templates::Template;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct ScriptedPush {
    name: &'static str,
    script: Mutex<Vec<Attempt>>,
    calls: AtomicU32,
}

impl ScriptedPush {
    fn ok(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Mutex::new(vec![]),
            calls: AtomicU32::new(0),
        })
    }

    fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Mutex::new(vec![
                Attempt::Retryable {
                    code: ErrorCode::ServiceUnavailable,
                    message: "503".to_string(),
                };
                8
            ]),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for ScriptedPush {
    fn provider_name(&self) -> &'static str {
        self.name
    }

    async fn attempt(
        &self,
        _notification: &Notification,
        _token: &DeviceToken,
        _timeout: Duration,
    ) -> Attempt {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        if script.is_empty() {
            Attempt::Success { latency_ms: 2, message_id: None }
        } else {
            script.remove(0)
        }
    }
}

struct ScriptedEmail {
    calls: AtomicU32,
}

impl ScriptedEmail {
    fn new() -> Arc<Self> {
        Arc::new(Self { calls: AtomicU32::new(0) })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailProvider for ScriptedEmail {
    fn name(&self) -> &'static str {
        "resend"
    }

    async fn attempt(&self, _message: &EmailMessage, _timeout: Duration) -> Attempt {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Attempt::Success { latency_ms: 3, message_id: Some("msg-1".to_string()) }
    }
}

struct Harness {
    orchestrator: Orchestrator,
    preferences: Arc<MemoryPreferences>,
    tokens: Arc<MemoryDeviceTokens>,
    delivery_log: Arc<MemoryDeliveryLog>,
    queue: Arc<MemoryQueue>,
    digest_queue: Arc<MemoryDigestQueue>,
    directory: Arc<MemoryUserDirectory>,
    templates: Arc<MemoryTemplates>,
    inapp_rows: Arc<MemoryInApp>,
    circuits: Arc<CircuitRegistry>,
    push_ios: Arc<ScriptedPush>,
    push_android: Arc<ScriptedPush>,
    email_provider: Arc<ScriptedEmail>,
}

fn harness_with_push(
    push_ios: Arc<ScriptedPush>,
    push_android: Arc<ScriptedPush>,
) -> Harness {
    let preferences = Arc::new(MemoryPreferences::new());
    let tokens = Arc::new(MemoryDeviceTokens::new());
    let delivery_log = Arc::new(MemoryDeliveryLog::new());
    let queue = Arc::new(MemoryQueue::new());
    let digest_queue = Arc::new(MemoryDigestQueue::new());
    let directory = Arc::new(MemoryUserDirectory::new());
    let templates = Arc::new(MemoryTemplates::new());
    let inapp_rows = Arc::new(MemoryInApp::new());
    let suppressions = Arc::new(MemorySuppressions::new());
    let usage = Arc::new(MemoryTranslations::new());

    let circuits = Arc::new(CircuitRegistry::new(CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        reset_timeout: Duration::from_secs(60),
        half_open_max_probes: 2,
    }));
    let budget = Arc::new(RetryBudget::new(20, Duration::from_secs(60)));

    let push = Arc::new(
        PushChannel::new(Arc::clone(&circuits), Arc::clone(&budget), tokens.clone(), 1)
            .with_transport(Platform::Ios, push_ios.clone())
            .with_transport(Platform::Android, push_android.clone()),
    );

    let email_provider = ScriptedEmail::new();
    let email_config = EmailRouterConfig {
        transactional_order: vec!["resend".to_string()],
        marketing_order: vec!["resend".to_string()],
        ..Default::default()
    };
    let email = Arc::new(
        EmailRouter::new(
            email_config,
            Arc::clone(&circuits),
            Arc::clone(&budget),
            Arc::new(QuotaGate::default()),
            suppressions,
            usage,
            1,
        )
        .with_provider(email_provider.clone()),
    );

    let inapp = Arc::new(InAppAdapter::new(inapp_rows.clone(), None));

    let orchestrator = Orchestrator::new(
        preferences.clone(),
        tokens.clone(),
        delivery_log.clone(),
        queue.clone(),
        digest_queue.clone(),
        directory.clone(),
        templates.clone(),
        push,
        email,
        Arc::new(UnconfiguredSms),
        inapp,
        OrchestratorConfig::default(),
    );

    Harness {
        orchestrator,
        preferences,
        tokens,
        delivery_log,
        queue,
        digest_queue,
        directory,
        templates,
        inapp_rows,
        circuits,
        push_ios,
        push_android,
        email_provider,
    }
}

fn harness() -> Harness {
    harness_with_push(ScriptedPush::ok("push-ios"), ScriptedPush::ok("push-android"))
}

fn seed_user(h: &Harness, email: Option<&str>) -> Uuid {
    let user_id = Uuid::new_v4();
    h.directory.seed(UserContact {
        user_id,
        email: email.map(|e| e.to_string()),
        email_verified: email.is_some(),
        locale: None,
    });
    user_id
}

fn seed_token(h: &Harness, user_id: Uuid, platform: Platform, token: &str) {
    h.tokens.seed(DeviceToken {
        user_id,
        token: token.to_string(),
        platform,
        is_active: true,
        p256dh: None,
        auth: None,
        last_used_at: None,
        created_at: Utc::now(),
    });
}

#[tokio::test]
async fn test_instant_delivery_writes_records_per_channel() {
    let h = harness();
    let user_id = seed_user(&h, Some("user@example.com"));
    seed_token(&h, user_id, Platform::Android, "android-1");

    let mut n = Notification::new(user_id, NotificationType::NewMessage, "Hi", "New message");
    n.channels = vec![Channel::Push, Channel::InApp];

    let result = h.orchestrator.send(n).await.unwrap();

    assert!(result.success);
    assert_eq!(result.channels.len(), 2);
    assert!(result
        .channels
        .iter()
        .all(|c| c.status == DeliveryStatus::Delivered));
    // one record per resolved channel
    assert_eq!(h.delivery_log.count(), 2);
    assert_eq!(h.inapp_rows.count(), 1);
    assert_eq!(h.push_android.calls(), 1);
}

#[tokio::test]
async fn test_no_tokens_is_terminal_no_targets() {
    let h = harness();
    let user_id = seed_user(&h, Some("user@example.com"));

    let mut n = Notification::new(user_id, NotificationType::NewMessage, "Hi", "Body");
    n.channels = vec![Channel::Push];

    let result = h.orchestrator.send(n).await.unwrap();
    assert!(!result.success);
    let push = &result.channels[0];
    assert_eq!(push.status, DeliveryStatus::Failed);
    assert_eq!(push.error_code.as_deref(), Some("NO_TARGETS"));
    assert_eq!(push.retryable, Some(false));
}

#[tokio::test]
async fn test_quiet_hours_defers_normal_priority_to_next_exit() {
    let h = harness();
    let user_id = seed_user(&h, None);
    seed_token(&h, user_id, Platform::Ios, "ios-1");

    let mut prefs = NotificationPreferences::defaults(user_id);
    prefs.quiet_hours = QuietHours {
        enabled: true,
        start: "22:00".to_string(),
        end: "08:00".to_string(),
        timezone: "Europe/Prague".to_string(),
    };
    h.preferences.seed(prefs);

    // listing_favorited: posts category, normal priority
    let mut n = Notification::new(
        user_id,
        NotificationType::ListingFavorited,
        "Someone liked your listing",
        "Your chair got a favourite",
    );
    n.channels = vec![Channel::Push];

    // The gate evaluates "now" against the user's timezone; this test can
    // only assert behaviour when run during quiet hours, so it instead
    // asserts through the queue payload after a forced schedule below.
    let result = h.orchestrator.send(n).await.unwrap();

    let now_prague = Utc::now().with_timezone(&"Europe/Prague".parse::<Tz>().unwrap());
    let hour = chrono::Timelike::hour(&now_prague.time());
    let in_window = hour >= 22 || hour < 8;

    if in_window {
        assert_eq!(result.channels[0].status, DeliveryStatus::Scheduled);
        let scheduled_for = result.channels[0].scheduled_for.expect("scheduled_for");
        let local_exit = scheduled_for.with_timezone(&"Europe/Prague".parse::<Tz>().unwrap());
        assert_eq!(chrono::Timelike::hour(&local_exit.time()), 8);
        assert_eq!(h.queue.all().len(), 1);
    } else {
        assert_eq!(result.channels[0].status, DeliveryStatus::Delivered);
    }
}

#[tokio::test]
async fn test_high_priority_new_message_not_deferred() {
    let h = harness();
    let user_id = seed_user(&h, None);
    seed_token(&h, user_id, Platform::Ios, "ios-1");

    let mut prefs = NotificationPreferences::defaults(user_id);
    prefs.quiet_hours = QuietHours {
        enabled: true,
        start: "00:00".to_string(),
        end: "23:59".to_string(),
        timezone: "UTC".to_string(),
    };
    h.preferences.seed(prefs);

    // new_message defaults to high priority and cuts through quiet hours.
    let mut n = Notification::new(user_id, NotificationType::NewMessage, "Hi", "msg");
    n.channels = vec![Channel::Push];

    let result = h.orchestrator.send(n).await.unwrap();
    assert_eq!(result.channels[0].status, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn test_blocked_channel_makes_no_network_call() {
    let h = harness();
    let user_id = seed_user(&h, None);
    seed_token(&h, user_id, Platform::Ios, "ios-1");

    let mut prefs = NotificationPreferences::defaults(user_id);
    prefs.push_enabled = false;
    h.preferences.seed(prefs);

    let mut n = Notification::new(user_id, NotificationType::ListingFavorited, "t", "b");
    n.channels = vec![Channel::Push];

    let result = h.orchestrator.send(n).await.unwrap();
    assert_eq!(result.channels[0].status, DeliveryStatus::Blocked);
    assert_eq!(h.push_ios.calls(), 0);
    // blocked outcome still writes a delivery record
    assert_eq!(h.delivery_log.count(), 1);
    // blocked is not a failure
    assert!(result.success);
}

#[tokio::test]
async fn test_open_circuit_fails_fast_without_fallback_for_social_type() {
    let h = harness();
    let user_id = seed_user(&h, Some("user@example.com"));
    seed_token(&h, user_id, Platform::Ios, "ios-1");

    // Trip the ios circuit.
    let breaker = h.circuits.get("push-ios");
    for _ in 0..3 {
        breaker.record_failure();
    }

    let mut n = Notification::new(user_id, NotificationType::ListingFavorited, "t", "b");
    n.priority = Priority::Normal;
    n.channels = vec![Channel::Push];

    let result = h.orchestrator.send(n).await.unwrap();

    assert_eq!(h.push_ios.calls(), 0);
    let push = &result.channels[0];
    assert_eq!(push.status, DeliveryStatus::Failed);
    assert_eq!(push.error_code.as_deref(), Some("CIRCUIT_OPEN"));
    assert_eq!(push.retryable, Some(true));
    // no email fallback for a non-security type
    assert_eq!(h.email_provider.calls(), 0);
}

#[tokio::test]
async fn test_push_failure_falls_back_to_email_for_security_type() {
    let h = harness_with_push(ScriptedPush::failing("push-ios"), ScriptedPush::ok("push-android"));
    let user_id = seed_user(&h, Some("user@example.com"));
    seed_token(&h, user_id, Platform::Ios, "ios-1");

    let mut n = Notification::new(
        user_id,
        NotificationType::Verification,
        "Verify your account",
        "Code: 123456",
    );
    n.channels = vec![Channel::Push];

    let result = h.orchestrator.send(n).await.unwrap();

    assert_eq!(h.email_provider.calls(), 1);
    let email = result
        .channels
        .iter()
        .find(|c| c.channel == Channel::Email)
        .expect("email fallback result");
    assert_eq!(email.status, DeliveryStatus::Delivered);
    // records: push (failed) + email (fallback) = resolved + fallback
    assert_eq!(h.delivery_log.count(), 2);
}

#[tokio::test]
async fn test_push_failure_falls_back_to_email_for_high_priority() {
    let h = harness_with_push(ScriptedPush::failing("push-ios"), ScriptedPush::ok("push-android"));
    let user_id = seed_user(&h, Some("user@example.com"));
    seed_token(&h, user_id, Platform::Ios, "ios-1");

    // new_message defaults to high priority; push-only request.
    let mut n = Notification::new(user_id, NotificationType::NewMessage, "Hi", "New message");
    n.channels = vec![Channel::Push];

    let result = h.orchestrator.send(n).await.unwrap();

    assert_eq!(h.email_provider.calls(), 1);
    let email = result
        .channels
        .iter()
        .find(|c| c.channel == Channel::Email)
        .expect("email fallback result");
    assert_eq!(email.status, DeliveryStatus::Delivered);
    assert_eq!(h.delivery_log.count(), 2);
}

#[tokio::test]
async fn test_no_fallback_for_normal_priority() {
    let h = harness_with_push(ScriptedPush::failing("push-ios"), ScriptedPush::ok("push-android"));
    let user_id = seed_user(&h, Some("user@example.com"));
    seed_token(&h, user_id, Platform::Ios, "ios-1");

    let mut n = Notification::new(user_id, NotificationType::ListingFavorited, "Liked", "b");
    n.priority = Priority::Normal;
    n.channels = vec![Channel::Push];

    let result = h.orchestrator.send(n).await.unwrap();

    assert!(!result.success);
    assert_eq!(h.email_provider.calls(), 0);
    assert!(result.channels.iter().all(|c| c.channel == Channel::Push));
}

#[tokio::test]
async fn test_repeated_channels_dispatch_once() {
    let h = harness();
    let user_id = seed_user(&h, None);
    seed_token(&h, user_id, Platform::Android, "android-1");

    let mut n = Notification::new(user_id, NotificationType::NewMessage, "Hi", "msg");
    // Non-consecutive repeats must still collapse to one dispatch each.
    n.channels = vec![Channel::Push, Channel::InApp, Channel::Push, Channel::InApp];

    let result = h.orchestrator.send(n).await.unwrap();

    assert_eq!(result.channels.len(), 2);
    assert_eq!(h.push_android.calls(), 1);
    assert_eq!(h.inapp_rows.count(), 1);
    // one terminal record per (notification, channel)
    assert_eq!(h.delivery_log.count(), 2);
}

#[tokio::test]
async fn test_daily_frequency_goes_to_digest_queue() {
    let h = harness();
    let user_id = seed_user(&h, Some("user@example.com"));

    let mut prefs = NotificationPreferences::defaults(user_id);
    prefs.categories.insert(
        Category::Posts,
        CategorySetting {
            email: ChannelSetting { enabled: true, frequency: Frequency::Daily },
            ..Default::default()
        },
    );
    h.preferences.seed(prefs);

    let mut n = Notification::new(user_id, NotificationType::ListingFavorited, "Liked", "body");
    n.channels = vec![Channel::Email];

    let result = h.orchestrator.send(n).await.unwrap();

    assert!(result.success);
    assert_eq!(result.channels[0].status, DeliveryStatus::Deferred);
    let entries = h.digest_queue.all();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].items.len(), 1);
    assert_eq!(h.email_provider.calls(), 0);
}

#[tokio::test]
async fn test_future_scheduled_for_enqueues() {
    let h = harness();
    let user_id = seed_user(&h, None);

    let mut n = Notification::new(user_id, NotificationType::SystemAnnouncement, "t", "b");
    let at = Utc::now() + chrono::Duration::hours(2);
    n.scheduled_for = Some(at);
    n.channels = vec![Channel::Push];

    let result = h.orchestrator.send(n).await.unwrap();

    assert!(result.success);
    assert_eq!(result.channels[0].status, DeliveryStatus::Scheduled);
    let items = h.queue.all();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].scheduled_for, at);
}

#[tokio::test]
async fn test_validation_failure_has_no_side_effects() {
    let h = harness();
    let user_id = seed_user(&h, None);

    let n = Notification::new(user_id, NotificationType::NewMessage, "", "body");
    let err = h.orchestrator.send(n).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::ValidationError);
    assert_eq!(h.delivery_log.count(), 0);
    assert!(h.queue.all().is_empty());
}

#[tokio::test]
async fn test_digest_type_forces_email_only() {
    let h = harness();
    let user_id = seed_user(&h, Some("user@example.com"));
    seed_token(&h, user_id, Platform::Ios, "ios-1");

    let mut n = Notification::new(user_id, NotificationType::Digest, "Your digest", "...");
    n.channels = vec![Channel::Push, Channel::Email, Channel::InApp];

    let result = h.orchestrator.send(n).await.unwrap();
    assert_eq!(result.channels.len(), 1);
    assert_eq!(result.channels[0].channel, Channel::Email);
}

#[tokio::test]
async fn test_batch_parallel_collects_all() {
    let h = harness();
    let user_id = seed_user(&h, Some("user@example.com"));
    seed_token(&h, user_id, Platform::Android, "android-1");

    let notifications: Vec<Notification> = (0..5)
        .map(|i| {
            let mut n = Notification::new(
                user_id,
                NotificationType::NewMessage,
                format!("Message {}", i),
                "body",
            );
            n.channels = vec![Channel::InApp];
            n
        })
        .collect();

    let batch = h
        .orchestrator
        .batch_send(notifications, BatchOptions { parallel: true, stop_on_error: false })
        .await
        .unwrap();

    assert!(batch.success);
    assert_eq!(batch.total, 5);
    assert_eq!(batch.results.len(), 5);
    assert_eq!(h.inapp_rows.count(), 5);
}

#[tokio::test]
async fn test_batch_sequential_stops_on_error() {
    let h = harness();
    let user_id = seed_user(&h, None);

    let bad = Notification::new(user_id, NotificationType::NewMessage, "", "body");
    let mut good = Notification::new(user_id, NotificationType::NewMessage, "ok", "body");
    good.channels = vec![Channel::InApp];

    let batch = h
        .orchestrator
        .batch_send(
            vec![bad, good],
            BatchOptions { parallel: false, stop_on_error: true },
        )
        .await
        .unwrap();

    assert!(!batch.success);
    assert_eq!(batch.results.len(), 1);
    assert_eq!(h.inapp_rows.count(), 0);
}

#[tokio::test]
async fn test_batch_size_cap() {
    let h = harness();
    let user_id = seed_user(&h, None);
    let notifications: Vec<Notification> = (0..1001)
        .map(|_| Notification::new(user_id, NotificationType::NewMessage, "t", "b"))
        .collect();
    let err = h
        .orchestrator
        .batch_send(notifications, BatchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

#[tokio::test]
async fn test_template_send_renders_and_delivers() {
    let h = harness();
    let user_id = seed_user(&h, Some("user@example.com"));

    h.templates.seed(Template {
        slug: "welcome".to_string(),
        name: "Welcome".to_string(),
        category: "transactional".to_string(),
        subject: "Welcome, {{name}}!".to_string(),
        html_content: "<p>Hello {{name}}</p>".to_string(),
        text_content: Some("Hello {{name}}".to_string()),
        variables: vec!["name".to_string()],
        is_active: true,
        version: 1,
        updated_at: Utc::now(),
    });

    let mut variables = HashMap::new();
    variables.insert("name".to_string(), "Dana".to_string());

    let result = h
        .orchestrator
        .template_send(user_id, "welcome", variables, None, None)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.channels[0].channel, Channel::Email);
    assert_eq!(h.email_provider.calls(), 1);
}

#[tokio::test]
async fn test_template_send_missing_variable_rejected() {
    let h = harness();
    let user_id = seed_user(&h, Some("user@example.com"));

    h.templates.seed(Template {
        slug: "welcome".to_string(),
        name: "Welcome".to_string(),
        category: "transactional".to_string(),
        subject: "Welcome, {{name}}!".to_string(),
        html_content: "<p>Hello {{name}}</p>".to_string(),
        text_content: None,
        variables: vec!["name".to_string()],
        is_active: true,
        version: 1,
        updated_at: Utc::now(),
    });

    let err = h
        .orchestrator
        .template_send(user_id, "welcome", HashMap::new(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

#[tokio::test]
async fn test_template_send_unknown_template() {
    let h = harness();
    let user_id = seed_user(&h, None);
    let err = h
        .orchestrator
        .template_send(user_id, "missing", HashMap::new(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}
