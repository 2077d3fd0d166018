//! Herald Data Access Layer
//!
//! Narrow, typed repository traits over the SQL store, plus the PostgreSQL
//! implementations and in-memory doubles for tests and development.
//!
//! All mutating operations are idempotent with respect to their natural key
//! where one exists (e.g. the translation upsert key). Repository failures
//! surface as `anyhow::Error`; callers decide what is fatal.

use sqlx::PgPool;
use tracing::info;

pub mod delivery_log;
pub mod digest_queue;
pub mod directory;
pub mod inapp;
pub mod memory;
pub mod preferences;
pub mod queue;
pub mod suppressions;
pub mod templates;
pub mod tokens;
pub mod translations;

pub use delivery_log::{DeliveryLogRepository, PgDeliveryLog};
pub use directory::{MemoryUserDirectory, PgUserDirectory, UserContact, UserDirectory};
pub use digest_queue::{DigestQueueRepository, PgDigestQueue};
pub use inapp::{InAppRepository, PgInApp};
pub use preferences::{merge_preferences, PgPreferences, PreferencesRepository, PreferencesUpdate};
pub use queue::{
    AutomationItem, AutomationQueueRepository, PgAutomationQueue, PgQueue, QueueRepository,
};
pub use suppressions::{PgSuppressions, SuppressionRepository};
pub use templates::{PgTemplates, Template, TemplateRepository};
pub use tokens::{DeviceTokenRepository, PgDeviceTokens};
pub use translations::{
    PgTranslationQueue, PgTranslations, TranslationQueueItem, TranslationQueueRepository,
    TranslationRepository, UsageRepository,
};

/// Create all Herald tables if they do not exist.
pub async fn init_schema(pool: &PgPool) -> anyhow::Result<()> {
    let ddl = r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        email TEXT,
        email_verified BOOLEAN NOT NULL DEFAULT FALSE,
        locale TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS notification_preferences (
        user_id UUID PRIMARY KEY,
        prefs JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS device_tokens (
        token TEXT PRIMARY KEY,
        user_id UUID NOT NULL,
        platform TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        p256dh TEXT,
        auth TEXT,
        last_used_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE INDEX IF NOT EXISTS idx_device_tokens_user ON device_tokens(user_id) WHERE is_active;

    CREATE TABLE IF NOT EXISTS notification_delivery_log (
        id BIGSERIAL PRIMARY KEY,
        notification_id UUID NOT NULL,
        user_id UUID NOT NULL,
        channel TEXT NOT NULL,
        provider TEXT,
        attempts INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL,
        error_code TEXT,
        error_message TEXT,
        latency_ms BIGINT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_delivery_terminal
        ON notification_delivery_log(notification_id, channel)
        WHERE status IN ('delivered', 'failed', 'blocked');
    CREATE INDEX IF NOT EXISTS idx_delivery_created ON notification_delivery_log(created_at);

    CREATE TABLE IF NOT EXISTS notification_queue (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        payload JSONB NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        scheduled_for TIMESTAMPTZ NOT NULL,
        consolidation_key TEXT,
        priority SMALLINT NOT NULL DEFAULT 5,
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE INDEX IF NOT EXISTS idx_queue_due
        ON notification_queue(scheduled_for) WHERE status = 'pending';

    CREATE TABLE IF NOT EXISTS digest_batches (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        frequency TEXT NOT NULL,
        consolidation_key TEXT NOT NULL DEFAULT '',
        items JSONB NOT NULL DEFAULT '[]',
        next_flush TIMESTAMPTZ NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (user_id, frequency, consolidation_key)
    );
    CREATE INDEX IF NOT EXISTS idx_digest_flush ON digest_batches(next_flush);

    CREATE TABLE IF NOT EXISTS email_automation_queue (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        template_slug TEXT NOT NULL,
        variables JSONB NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        scheduled_for TIMESTAMPTZ NOT NULL,
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS in_app_notifications (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        notification_type TEXT NOT NULL,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        data JSONB NOT NULL DEFAULT '{}',
        is_read BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE INDEX IF NOT EXISTS idx_in_app_user ON in_app_notifications(user_id, created_at);

    CREATE TABLE IF NOT EXISTS email_suppressions (
        email TEXT PRIMARY KEY,
        reason TEXT NOT NULL,
        provider TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS email_templates (
        slug TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        category TEXT NOT NULL,
        subject TEXT NOT NULL,
        html_content TEXT NOT NULL,
        text_content TEXT,
        variables JSONB NOT NULL DEFAULT '[]',
        metadata JSONB NOT NULL DEFAULT '{}',
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        version INTEGER NOT NULL DEFAULT 1,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS dynamic_content_translations (
        content_type TEXT NOT NULL,
        content_id TEXT NOT NULL,
        field_name TEXT NOT NULL,
        target_locale TEXT NOT NULL,
        translated_text TEXT NOT NULL,
        source_hash TEXT NOT NULL,
        quality DOUBLE PRECISION NOT NULL,
        provider TEXT NOT NULL,
        expires_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (content_type, content_id, field_name, target_locale)
    );

    CREATE TABLE IF NOT EXISTS translation_queue (
        id UUID PRIMARY KEY,
        content_type TEXT NOT NULL,
        content_id TEXT NOT NULL,
        field_name TEXT NOT NULL,
        source_text TEXT NOT NULL,
        source_locale TEXT NOT NULL,
        target_locale TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (content_type, content_id, field_name, target_locale)
    );

    CREATE TABLE IF NOT EXISTS translation_usage (
        provider TEXT NOT NULL,
        month TEXT NOT NULL,
        used BIGINT NOT NULL DEFAULT 0,
        quota_limit BIGINT NOT NULL DEFAULT 0,
        PRIMARY KEY (provider, month)
    );

    CREATE TABLE IF NOT EXISTS email_provider_health_metrics (
        id BIGSERIAL PRIMARY KEY,
        provider TEXT NOT NULL,
        success BOOLEAN NOT NULL,
        latency_ms BIGINT,
        error_message TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE INDEX IF NOT EXISTS idx_provider_health ON email_provider_health_metrics(provider, created_at);
    "#;

    for statement in ddl.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Initialized Herald schema");
    Ok(())
}

/// The full PostgreSQL repository bundle.
#[derive(Clone)]
pub struct PgStore {
    pub preferences: std::sync::Arc<PgPreferences>,
    pub tokens: std::sync::Arc<PgDeviceTokens>,
    pub delivery_log: std::sync::Arc<PgDeliveryLog>,
    pub queue: std::sync::Arc<PgQueue>,
    pub automation: std::sync::Arc<PgAutomationQueue>,
    pub digest_queue: std::sync::Arc<PgDigestQueue>,
    pub templates: std::sync::Arc<PgTemplates>,
    pub suppressions: std::sync::Arc<PgSuppressions>,
    pub inapp: std::sync::Arc<PgInApp>,
    pub translations: std::sync::Arc<PgTranslations>,
    pub translation_queue: std::sync::Arc<PgTranslationQueue>,
    pub directory: std::sync::Arc<PgUserDirectory>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            preferences: std::sync::Arc::new(PgPreferences::new(pool.clone())),
            tokens: std::sync::Arc::new(PgDeviceTokens::new(pool.clone())),
            delivery_log: std::sync::Arc::new(PgDeliveryLog::new(pool.clone())),
            queue: std::sync::Arc::new(PgQueue::new(pool.clone())),
            automation: std::sync::Arc::new(PgAutomationQueue::new(pool.clone())),
            digest_queue: std::sync::Arc::new(PgDigestQueue::new(pool.clone())),
            templates: std::sync::Arc::new(PgTemplates::new(pool.clone())),
            suppressions: std::sync::Arc::new(PgSuppressions::new(pool.clone())),
            inapp: std::sync::Arc::new(PgInApp::new(pool.clone())),
            translations: std::sync::Arc::new(PgTranslations::new(pool.clone())),
            translation_queue: std::sync::Arc::new(PgTranslationQueue::new(pool.clone())),
            directory: std::sync::Arc::new(PgUserDirectory::new(pool)),
        }
    }
}
