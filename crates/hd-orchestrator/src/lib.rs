//! Herald Notification Orchestrator
//!
//! Per-request decisioning and channel fan-out. Pipeline, in strict order:
//! validate, resolve channels, preference gate, scheduled/digest deferral,
//! instant dispatch (concurrent per channel, deadline-guarded), push-to-email
//! fallback for the critical-security set, delivery records, result
//! assembly. Validation and preference failures are never retried; provider
//! retry policy lives below the channel adapters.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use hd_common::{
    Channel, DeliveryOutcome, DeliveryRecord, DeliveryStatus, DigestItem, ErrorCode, HeraldError,
    Notification, NotificationType, Priority, QueueItem, QueueStatus,
};
use hd_config::OrchestratorConfig;
use hd_providers::{EmailMessage, EmailRouter, InAppAdapter, MailKind, PushChannel, SmsAdapter};
use hd_resilience::Deadline;
use hd_store::{
    DeliveryLogRepository, DeviceTokenRepository, DigestQueueRepository, PreferencesRepository,
    QueueRepository, TemplateRepository, UserDirectory,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod gate;
pub mod validate;

use gate::{gate_channel, next_digest_flush, GateDecision};

// ============================================================================
// Results
// ============================================================================

/// Per-channel outcome in the send response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResult {
    pub channel: Channel,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl ChannelResult {
    fn from_outcome(channel: Channel, outcome: &DeliveryOutcome) -> Self {
        match outcome {
            DeliveryOutcome::Delivered { provider, .. } => Self {
                channel,
                status: DeliveryStatus::Delivered,
                provider: Some(provider.clone()),
                error: None,
                error_code: None,
                retryable: None,
                scheduled_for: None,
            },
            DeliveryOutcome::Scheduled { scheduled_for } => Self {
                channel,
                status: DeliveryStatus::Scheduled,
                provider: None,
                error: None,
                error_code: None,
                retryable: None,
                scheduled_for: Some(*scheduled_for),
            },
            DeliveryOutcome::Blocked { reason } => Self {
                channel,
                status: DeliveryStatus::Blocked,
                provider: None,
                error: Some(reason.clone()),
                error_code: Some(ErrorCode::BlockedByPreferences.as_str().to_string()),
                retryable: Some(false),
                scheduled_for: None,
            },
            DeliveryOutcome::Failed { code, message, retryable } => Self {
                channel,
                status: DeliveryStatus::Failed,
                provider: None,
                error: Some(message.clone()),
                error_code: Some(code.as_str().to_string()),
                retryable: Some(*retryable),
                scheduled_for: None,
            },
        }
    }

    fn deferred(channel: Channel) -> Self {
        Self {
            channel,
            status: DeliveryStatus::Deferred,
            provider: None,
            error: None,
            error_code: None,
            retryable: None,
            scheduled_for: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub success: bool,
    pub channels: Vec<ChannelResult>,
    pub timestamp: DateTime<Utc>,
}

impl SendResult {
    fn assemble(notification: &Notification, channels: Vec<ChannelResult>) -> Self {
        let success = channels
            .iter()
            .all(|c| c.status != DeliveryStatus::Failed);
        Self {
            notification_id: notification.id,
            user_id: notification.user_id,
            success,
            channels,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchOptions {
    pub parallel: bool,
    pub stop_on_error: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SendResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub success: bool,
    pub total: usize,
    pub results: Vec<BatchItemResult>,
}

fn queue_priority(priority: Priority) -> i16 {
    match priority {
        Priority::Critical => 10,
        Priority::High => 8,
        Priority::Normal => 5,
        Priority::Low => 2,
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// The orchestrator's send surface, as seen by the queue and digest workers
/// that re-enter it.
#[async_trait::async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_notification(&self, notification: Notification) -> hd_common::Result<SendResult>;

    async fn send_template(
        &self,
        user_id: Uuid,
        template_name: &str,
        variables: HashMap<String, String>,
        channels: Option<Vec<Channel>>,
        priority: Option<Priority>,
    ) -> hd_common::Result<SendResult>;
}

#[async_trait::async_trait]
impl NotificationSender for Orchestrator {
    async fn send_notification(&self, notification: Notification) -> hd_common::Result<SendResult> {
        self.send(notification).await
    }

    async fn send_template(
        &self,
        user_id: Uuid,
        template_name: &str,
        variables: HashMap<String, String>,
        channels: Option<Vec<Channel>>,
        priority: Option<Priority>,
    ) -> hd_common::Result<SendResult> {
        self.template_send(user_id, template_name, variables, channels, priority)
            .await
    }
}

pub struct Orchestrator {
    preferences: Arc<dyn PreferencesRepository>,
    tokens: Arc<dyn DeviceTokenRepository>,
    delivery_log: Arc<dyn DeliveryLogRepository>,
    queue: Arc<dyn QueueRepository>,
    digest_queue: Arc<dyn DigestQueueRepository>,
    directory: Arc<dyn UserDirectory>,
    templates: Arc<dyn TemplateRepository>,
    push: Arc<PushChannel>,
    email: Arc<EmailRouter>,
    sms: Arc<dyn SmsAdapter>,
    inapp: Arc<InAppAdapter>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        preferences: Arc<dyn PreferencesRepository>,
        tokens: Arc<dyn DeviceTokenRepository>,
        delivery_log: Arc<dyn DeliveryLogRepository>,
        queue: Arc<dyn QueueRepository>,
        digest_queue: Arc<dyn DigestQueueRepository>,
        directory: Arc<dyn UserDirectory>,
        templates: Arc<dyn TemplateRepository>,
        push: Arc<PushChannel>,
        email: Arc<EmailRouter>,
        sms: Arc<dyn SmsAdapter>,
        inapp: Arc<InAppAdapter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            preferences,
            tokens,
            delivery_log,
            queue,
            digest_queue,
            directory,
            templates,
            push,
            email,
            sms,
            inapp,
            config,
        }
    }

    /// Channels used when the request names none, derived from the type.
    fn default_channels(notification_type: NotificationType) -> Vec<Channel> {
        match notification_type {
            NotificationType::Digest => vec![Channel::Email],
            NotificationType::MarketingPromo => vec![Channel::Email],
            t if t.is_critical_security() => vec![Channel::Email, Channel::Push],
            NotificationType::SystemAnnouncement => {
                vec![Channel::Push, Channel::Email, Channel::InApp]
            }
            _ => vec![Channel::Push, Channel::InApp],
        }
    }

    fn resolve_channels(notification: &Notification) -> Vec<Channel> {
        // Digest notifications go out by email only, whatever was asked.
        if notification.notification_type == NotificationType::Digest {
            return vec![Channel::Email];
        }

        let mut channels = if notification.channels.is_empty() {
            Self::default_channels(notification.notification_type)
        } else {
            notification.channels.clone()
        };

        // Critical security types always reach the user by email.
        if notification.notification_type.is_critical_security()
            && !channels.contains(&Channel::Email)
        {
            channels.push(Channel::Email);
        }

        // Callers may repeat channels; keep the first occurrence of each.
        let mut seen: Vec<Channel> = Vec::with_capacity(channels.len());
        channels.retain(|channel| {
            if seen.contains(channel) {
                false
            } else {
                seen.push(*channel);
                true
            }
        });
        channels
    }

    fn channel_deadline(&self, priority: Priority) -> Deadline {
        let secs = if priority == Priority::Critical {
            self.config.critical_deadline_secs
        } else {
            self.config.channel_deadline_secs
        };
        Deadline::after(Duration::from_secs(secs))
    }

    /// Send one notification through the full pipeline.
    pub async fn send(&self, notification: Notification) -> hd_common::Result<SendResult> {
        let now = Utc::now();
        validate::validate(&notification, &self.config, now)?;

        let channels = Self::resolve_channels(&notification);
        metrics::counter!("herald.orchestrator.accepted").increment(1);

        // Scheduled path: a future scheduled_for defers the whole request.
        if let Some(scheduled_for) = notification.scheduled_for {
            if scheduled_for > now {
                return self.enqueue_scheduled(notification, channels, scheduled_for).await;
            }
        }

        let prefs = self
            .preferences
            .get(notification.user_id)
            .await
            .map_err(|e| HeraldError::Database(e.to_string()))?;

        let mut results: Vec<ChannelResult> = Vec::with_capacity(channels.len());
        let mut instant: Vec<Channel> = Vec::new();
        let mut scheduled: HashMap<i64, (DateTime<Utc>, Vec<Channel>)> = HashMap::new();

        for channel in &channels {
            match gate_channel(&notification, &prefs, *channel, now) {
                GateDecision::DeliverNow => instant.push(*channel),
                GateDecision::Digest(frequency) => {
                    let item = DigestItem {
                        notification_type: notification.notification_type,
                        category: notification.category(),
                        title: notification.title.clone(),
                        body: notification.body.clone(),
                        data: notification.data.clone(),
                        created_at: now,
                    };
                    let flush = next_digest_flush(
                        frequency,
                        &prefs.digest,
                        &prefs.quiet_hours.timezone,
                        now,
                    );
                    if let Err(e) = self
                        .digest_queue
                        .append(
                            notification.user_id,
                            frequency,
                            notification.collapse_key.as_deref(),
                            &item,
                            flush,
                        )
                        .await
                    {
                        warn!(error = %e, "Digest enqueue failed");
                        results.push(ChannelResult::from_outcome(
                            *channel,
                            &DeliveryOutcome::failed(
                                ErrorCode::ServiceUnavailable,
                                "digest enqueue failed",
                            ),
                        ));
                        continue;
                    }
                    metrics::counter!("herald.orchestrator.digest_deferred").increment(1);
                    results.push(ChannelResult::deferred(*channel));
                    self.record(&notification, *channel, DeliveryStatus::Deferred, None, None)
                        .await;
                }
                GateDecision::Schedule(at) => {
                    scheduled
                        .entry(at.timestamp())
                        .or_insert_with(|| (at, Vec::new()))
                        .1
                        .push(*channel);
                }
                GateDecision::Blocked { reason } => {
                    debug!(
                        notification_id = %notification.id,
                        channel = %channel,
                        reason = %reason,
                        "Channel blocked by preferences"
                    );
                    metrics::counter!("herald.orchestrator.blocked").increment(1);
                    let outcome = DeliveryOutcome::Blocked { reason };
                    results.push(ChannelResult::from_outcome(*channel, &outcome));
                    self.record_outcome(&notification, *channel, &outcome).await;
                }
            }
        }

        // One queue item per distinct wake-up instant.
        for (_, (at, deferred_channels)) in scheduled {
            let mut payload = notification.clone();
            payload.channels = deferred_channels.clone();
            payload.scheduled_for = Some(at);
            let item = QueueItem {
                id: Uuid::new_v4(),
                user_id: notification.user_id,
                payload,
                status: QueueStatus::Pending,
                attempts: 0,
                scheduled_for: at,
                consolidation_key: None,
                priority: queue_priority(notification.priority),
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            self.queue
                .insert(&item)
                .await
                .map_err(|e| HeraldError::Database(e.to_string()))?;
            metrics::counter!("herald.orchestrator.scheduled").increment(1);

            for channel in deferred_channels {
                let outcome = DeliveryOutcome::Scheduled { scheduled_for: at };
                results.push(ChannelResult::from_outcome(channel, &outcome));
                self.record_outcome(&notification, channel, &outcome).await;
            }
        }

        // Instant path: all immediate channels dispatch concurrently.
        let deadline = self.channel_deadline(notification.priority);
        let dispatches = instant.iter().map(|channel| {
            let channel = *channel;
            let notification = &notification;
            let prefs = &prefs;
            async move {
                (channel, self.dispatch(notification, prefs, channel, deadline).await)
            }
        });
        let mut outcomes: Vec<(Channel, DeliveryOutcome)> = join_all(dispatches).await;

        // Fallback: push produced no successful delivery and the type must
        // reach the user; try email once. Never widens beyond email.
        let push_attempted = outcomes.iter().any(|(c, _)| *c == Channel::Push);
        let push_succeeded = outcomes
            .iter()
            .any(|(c, o)| *c == Channel::Push && o.is_success());
        let email_attempted = outcomes.iter().any(|(c, _)| *c == Channel::Email)
            || results.iter().any(|r| r.channel == Channel::Email);
        let fallback_eligible = notification.notification_type.is_critical_security()
            || notification.priority >= Priority::High;

        if push_attempted && !push_succeeded && fallback_eligible && !email_attempted {
            info!(
                notification_id = %notification.id,
                "Push yielded no delivery, falling back to email"
            );
            metrics::counter!("herald.orchestrator.fallback_email").increment(1);
            let outcome = self
                .dispatch(&notification, &prefs, Channel::Email, deadline)
                .await;
            outcomes.push((Channel::Email, outcome));
        }

        for (channel, outcome) in &outcomes {
            results.push(ChannelResult::from_outcome(*channel, outcome));
            self.record_outcome(&notification, *channel, outcome).await;
        }

        Ok(SendResult::assemble(&notification, results))
    }

    async fn enqueue_scheduled(
        &self,
        notification: Notification,
        channels: Vec<Channel>,
        scheduled_for: DateTime<Utc>,
    ) -> hd_common::Result<SendResult> {
        let now = Utc::now();
        let mut payload = notification.clone();
        payload.channels = channels.clone();
        let item = QueueItem {
            id: Uuid::new_v4(),
            user_id: notification.user_id,
            payload,
            status: QueueStatus::Pending,
            attempts: 0,
            scheduled_for,
            consolidation_key: notification.collapse_key.clone(),
            priority: queue_priority(notification.priority),
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.queue
            .insert(&item)
            .await
            .map_err(|e| HeraldError::Database(e.to_string()))?;

        info!(
            notification_id = %notification.id,
            scheduled_for = %scheduled_for,
            "Notification scheduled"
        );

        let results = channels
            .into_iter()
            .map(|channel| {
                ChannelResult::from_outcome(channel, &DeliveryOutcome::Scheduled { scheduled_for })
            })
            .collect();
        Ok(SendResult::assemble(&notification, results))
    }

    async fn dispatch(
        &self,
        notification: &Notification,
        prefs: &hd_common::NotificationPreferences,
        channel: Channel,
        deadline: Deadline,
    ) -> DeliveryOutcome {
        match channel {
            Channel::Push => {
                let tokens = match self
                    .tokens
                    .list_active(&[notification.user_id], None)
                    .await
                {
                    Ok(tokens) => tokens,
                    Err(e) => {
                        return DeliveryOutcome::failed(
                            ErrorCode::ServiceUnavailable,
                            format!("token lookup failed: {}", e),
                        )
                    }
                };
                if tokens.is_empty() {
                    return DeliveryOutcome::failed(
                        ErrorCode::NoTargets,
                        "no active device tokens",
                    );
                }
                let outcomes = self.push.send(notification, &tokens, deadline).await;
                PushChannel::aggregate(&outcomes)
            }
            Channel::Email => {
                let contact = match self.directory.contact(notification.user_id).await {
                    Ok(contact) => contact,
                    Err(e) => {
                        return DeliveryOutcome::failed(
                            ErrorCode::ServiceUnavailable,
                            format!("contact lookup failed: {}", e),
                        )
                    }
                };
                let Some(address) = contact.as_ref().and_then(|c| c.verified_email()) else {
                    return DeliveryOutcome::failed(
                        ErrorCode::NoTargets,
                        "no verified email address",
                    );
                };
                let kind = if notification.category() == hd_common::Category::Marketing {
                    MailKind::Marketing
                } else {
                    MailKind::Transactional
                };
                let message = EmailMessage {
                    to: address.to_string(),
                    subject: notification.title.clone(),
                    html: format!("<p>{}</p>", notification.body),
                    text: Some(notification.body.clone()),
                    from_address: String::new(),
                    from_name: String::new(),
                };
                self.email.send(&message, kind, deadline).await
            }
            Channel::Sms => {
                if !self.sms.is_configured() {
                    return DeliveryOutcome::failed(
                        ErrorCode::ServiceUnavailable,
                        "no SMS provider configured",
                    );
                }
                let Some(phone) = prefs
                    .phone_number
                    .as_deref()
                    .filter(|_| prefs.phone_verified)
                else {
                    return DeliveryOutcome::failed(
                        ErrorCode::NoTargets,
                        "no verified phone number",
                    );
                };
                self.sms.send(phone, &notification.body).await
            }
            Channel::InApp => self.inapp.send(notification).await,
        }
    }

    async fn record_outcome(
        &self,
        notification: &Notification,
        channel: Channel,
        outcome: &DeliveryOutcome,
    ) {
        let record = DeliveryRecord::from_outcome(notification, channel, outcome);
        if let Err(e) = self.delivery_log.insert(&record).await {
            // A lost log row must not fail a delivery that already happened.
            warn!(
                notification_id = %notification.id,
                channel = %channel,
                error = %e,
                "Delivery log write failed"
            );
        }
    }

    async fn record(
        &self,
        notification: &Notification,
        channel: Channel,
        status: DeliveryStatus,
        error_code: Option<String>,
        error_message: Option<String>,
    ) {
        let record = DeliveryRecord {
            notification_id: notification.id,
            user_id: notification.user_id,
            channel,
            provider: None,
            attempts: 1,
            status,
            error_code,
            error_message,
            latency_ms: None,
            created_at: Utc::now(),
        };
        if let Err(e) = self.delivery_log.insert(&record).await {
            warn!(error = %e, "Delivery log write failed");
        }
    }

    /// Send up to `max_batch_size` notifications, sequentially or in
    /// parallel. The batch succeeds iff every item succeeded or was
    /// intentionally scheduled or blocked.
    pub async fn batch_send(
        &self,
        notifications: Vec<Notification>,
        options: BatchOptions,
    ) -> hd_common::Result<BatchResult> {
        if notifications.len() > self.config.max_batch_size {
            return Err(HeraldError::Validation(format!(
                "batch exceeds {} notifications",
                self.config.max_batch_size
            )));
        }

        let total = notifications.len();
        let mut results = Vec::with_capacity(total);

        if options.parallel {
            let futures: Vec<_> = notifications
                .into_iter()
                .map(|n| self.send(n))
                .collect();
            for outcome in join_all(futures).await {
                results.push(match outcome {
                    Ok(result) => BatchItemResult {
                        success: result.success,
                        result: Some(result),
                        error: None,
                    },
                    Err(e) => BatchItemResult {
                        success: false,
                        result: None,
                        error: Some(e.to_string()),
                    },
                });
            }
        } else {
            for notification in notifications {
                let outcome = self.send(notification).await;
                let item = match outcome {
                    Ok(result) => BatchItemResult {
                        success: result.success,
                        result: Some(result),
                        error: None,
                    },
                    Err(e) => BatchItemResult {
                        success: false,
                        result: None,
                        error: Some(e.to_string()),
                    },
                };
                let failed = !item.success;
                results.push(item);
                if failed && options.stop_on_error {
                    break;
                }
            }
        }

        let success = results.iter().all(|r| r.success);
        Ok(BatchResult { success, total, results })
    }

    /// Render a template and enter the normal pipeline.
    pub async fn template_send(
        &self,
        user_id: Uuid,
        template_name: &str,
        variables: HashMap<String, String>,
        channels: Option<Vec<Channel>>,
        priority: Option<Priority>,
    ) -> hd_common::Result<SendResult> {
        let locale = self
            .directory
            .contact(user_id)
            .await
            .ok()
            .flatten()
            .and_then(|c| c.locale);

        let template = self
            .templates
            .get(template_name, locale.as_deref())
            .await
            .map_err(|e| HeraldError::Database(e.to_string()))?
            .ok_or_else(|| HeraldError::NotFound(format!("template '{}'", template_name)))?;

        let missing = template.missing_variables(&variables);
        if !missing.is_empty() {
            return Err(HeraldError::Validation(format!(
                "missing template variables: {}",
                missing.join(", ")
            )));
        }

        let (subject, html, text) = template.render(&variables);
        let notification_type = match template.category.as_str() {
            "marketing" => NotificationType::MarketingPromo,
            "security" => NotificationType::AccountSecurity,
            _ => NotificationType::SystemAnnouncement,
        };

        let mut notification = Notification::new(
            user_id,
            notification_type,
            subject,
            text.unwrap_or(html),
        );
        notification.channels = channels.unwrap_or_else(|| vec![Channel::Email]);
        if let Some(priority) = priority {
            notification.priority = priority;
        }
        self.send(notification).await
    }
}
