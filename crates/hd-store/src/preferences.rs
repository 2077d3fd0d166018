//! Preference repository
//!
//! Preferences live as one JSONB document per user. The first read creates
//! the enabled/instant defaults. Partial updates are deep-merged: only the
//! paths present in the update change, untouched paths survive.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use hd_common::{
    Category, CategorySetting, ChannelSetting, DigestSettings, DndSettings, Frequency,
    NotificationPreferences, QuietHours,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

// ============================================================================
// Partial update types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSettingUpdate {
    pub enabled: Option<bool>,
    pub frequency: Option<Frequency>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUpdate {
    pub push: Option<ChannelSettingUpdate>,
    pub email: Option<ChannelSettingUpdate>,
    pub sms: Option<ChannelSettingUpdate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietHoursUpdate {
    pub enabled: Option<bool>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestUpdate {
    pub daily_enabled: Option<bool>,
    pub daily_time: Option<String>,
    pub weekly_enabled: Option<bool>,
    pub weekly_day: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DndUpdate {
    pub enabled: Option<bool>,
    pub until: Option<chrono::DateTime<Utc>>,
}

/// Partial preference update; every field optional, category sub-trees
/// merged key by key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesUpdate {
    pub push_enabled: Option<bool>,
    pub email_enabled: Option<bool>,
    pub sms_enabled: Option<bool>,
    pub in_app_enabled: Option<bool>,
    pub phone_number: Option<String>,
    pub phone_verified: Option<bool>,
    pub quiet_hours: Option<QuietHoursUpdate>,
    pub digest: Option<DigestUpdate>,
    pub dnd: Option<DndUpdate>,
    pub categories: Option<HashMap<Category, CategoryUpdate>>,
}

fn merge_channel(base: &mut ChannelSetting, update: &ChannelSettingUpdate) {
    if let Some(enabled) = update.enabled {
        base.enabled = enabled;
    }
    if let Some(frequency) = update.frequency {
        base.frequency = frequency;
    }
}

fn merge_quiet_hours(base: &mut QuietHours, update: &QuietHoursUpdate) {
    if let Some(enabled) = update.enabled {
        base.enabled = enabled;
    }
    if let Some(ref start) = update.start {
        base.start = start.clone();
    }
    if let Some(ref end) = update.end {
        base.end = end.clone();
    }
    if let Some(ref tz) = update.timezone {
        base.timezone = tz.clone();
    }
}

fn merge_digest(base: &mut DigestSettings, update: &DigestUpdate) {
    if let Some(v) = update.daily_enabled {
        base.daily_enabled = v;
    }
    if let Some(ref v) = update.daily_time {
        base.daily_time = v.clone();
    }
    if let Some(v) = update.weekly_enabled {
        base.weekly_enabled = v;
    }
    if let Some(v) = update.weekly_day {
        base.weekly_day = v;
    }
}

fn merge_dnd(base: &mut DndSettings, update: &DndUpdate) {
    if let Some(v) = update.enabled {
        base.enabled = v;
    }
    if update.until.is_some() {
        base.until = update.until;
    }
}

/// Deep-merge a partial update into a full preference tree. Pure function;
/// category sub-trees merge per channel rather than being replaced.
pub fn merge_preferences(prefs: &mut NotificationPreferences, update: &PreferencesUpdate) {
    if let Some(v) = update.push_enabled {
        prefs.push_enabled = v;
    }
    if let Some(v) = update.email_enabled {
        prefs.email_enabled = v;
    }
    if let Some(v) = update.sms_enabled {
        prefs.sms_enabled = v;
    }
    if let Some(v) = update.in_app_enabled {
        prefs.in_app_enabled = v;
    }
    if let Some(ref v) = update.phone_number {
        prefs.phone_number = Some(v.clone());
        // A changed number must be re-verified.
        prefs.phone_verified = false;
    }
    if let Some(v) = update.phone_verified {
        prefs.phone_verified = v;
    }
    if let Some(ref qh) = update.quiet_hours {
        merge_quiet_hours(&mut prefs.quiet_hours, qh);
    }
    if let Some(ref d) = update.digest {
        merge_digest(&mut prefs.digest, d);
    }
    if let Some(ref d) = update.dnd {
        merge_dnd(&mut prefs.dnd, d);
    }
    if let Some(ref categories) = update.categories {
        for (category, cat_update) in categories {
            let entry = prefs
                .categories
                .entry(*category)
                .or_insert_with(CategorySetting::default);
            if let Some(ref push) = cat_update.push {
                merge_channel(&mut entry.push, push);
            }
            if let Some(ref email) = cat_update.email {
                merge_channel(&mut entry.email, email);
            }
            if let Some(ref sms) = cat_update.sms {
                merge_channel(&mut entry.sms, sms);
            }
        }
    }
    prefs.updated_at = Utc::now();
}

// ============================================================================
// Repository
// ============================================================================

#[async_trait]
pub trait PreferencesRepository: Send + Sync {
    /// Load a user's preferences, creating the defaults on first read.
    async fn get(&self, user_id: Uuid) -> Result<NotificationPreferences>;

    /// Deep-merge a partial update and persist; returns the merged tree.
    async fn update(&self, user_id: Uuid, update: PreferencesUpdate)
        -> Result<NotificationPreferences>;
}

pub struct PgPreferences {
    pool: PgPool,
}

impl PgPreferences {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn save(&self, prefs: &NotificationPreferences) -> Result<()> {
        let json = serde_json::to_value(prefs)?;
        sqlx::query(
            "INSERT INTO notification_preferences (user_id, prefs, updated_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (user_id) DO UPDATE SET prefs = $2, updated_at = now()",
        )
        .bind(prefs.user_id)
        .bind(&json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PreferencesRepository for PgPreferences {
    async fn get(&self, user_id: Uuid) -> Result<NotificationPreferences> {
        let row = sqlx::query("SELECT prefs FROM notification_preferences WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: serde_json::Value = row.get("prefs");
                Ok(serde_json::from_value(json)?)
            }
            None => {
                let defaults = NotificationPreferences::defaults(user_id);
                self.save(&defaults).await?;
                debug!(user_id = %user_id, "Created default preferences");
                Ok(defaults)
            }
        }
    }

    async fn update(
        &self,
        user_id: Uuid,
        update: PreferencesUpdate,
    ) -> Result<NotificationPreferences> {
        let mut prefs = self.get(user_id).await?;
        merge_preferences(&mut prefs, &update);
        self.save(&prefs).await?;
        Ok(prefs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_preserves_untouched_paths() {
        let mut prefs = NotificationPreferences::defaults(Uuid::new_v4());
        prefs.quiet_hours.timezone = "Europe/Prague".to_string();

        let update = PreferencesUpdate {
            email_enabled: Some(false),
            quiet_hours: Some(QuietHoursUpdate {
                enabled: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        merge_preferences(&mut prefs, &update);

        assert!(!prefs.email_enabled);
        assert!(prefs.push_enabled);
        assert!(prefs.quiet_hours.enabled);
        // untouched paths unchanged
        assert_eq!(prefs.quiet_hours.timezone, "Europe/Prague");
        assert_eq!(prefs.quiet_hours.start, "22:00");
    }

    #[test]
    fn test_merge_category_subtree() {
        let mut prefs = NotificationPreferences::defaults(Uuid::new_v4());

        let mut categories = HashMap::new();
        categories.insert(
            Category::Posts,
            CategoryUpdate {
                email: Some(ChannelSettingUpdate {
                    frequency: Some(Frequency::Daily),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let update = PreferencesUpdate {
            categories: Some(categories),
            ..Default::default()
        };
        merge_preferences(&mut prefs, &update);

        let posts_email = prefs.category_setting(Category::Posts, hd_common::Channel::Email);
        assert!(posts_email.enabled);
        assert_eq!(posts_email.frequency, Frequency::Daily);
        // other channels of the same category untouched
        let posts_push = prefs.category_setting(Category::Posts, hd_common::Channel::Push);
        assert_eq!(posts_push.frequency, Frequency::Instant);
    }

    #[test]
    fn test_phone_change_resets_verification() {
        let mut prefs = NotificationPreferences::defaults(Uuid::new_v4());
        prefs.phone_verified = true;

        let update = PreferencesUpdate {
            phone_number: Some("+420123456789".to_string()),
            ..Default::default()
        };
        merge_preferences(&mut prefs, &update);

        assert_eq!(prefs.phone_number.as_deref(), Some("+420123456789"));
        assert!(!prefs.phone_verified);
    }
}
