//! Request validation
//!
//! Fails fast with a validation error before any side effect. Limits: body
//! up to 50,000 characters, schedule horizon 90 days, TTL strictly positive
//! when present.

use chrono::{DateTime, Duration, Utc};
use hd_common::{HeraldError, Notification};
use hd_config::OrchestratorConfig;

pub fn validate(
    notification: &Notification,
    config: &OrchestratorConfig,
    now: DateTime<Utc>,
) -> Result<(), HeraldError> {
    if notification.title.trim().is_empty() {
        return Err(HeraldError::Validation("title must not be empty".into()));
    }
    if notification.body.trim().is_empty() {
        return Err(HeraldError::Validation("body must not be empty".into()));
    }
    if notification.body.chars().count() > config.max_body_chars {
        return Err(HeraldError::Validation(format!(
            "body exceeds {} characters",
            config.max_body_chars
        )));
    }
    if notification.user_id.is_nil() {
        return Err(HeraldError::Validation("user id must be a valid UUID".into()));
    }
    if let Some(ttl) = notification.ttl_seconds {
        if ttl == 0 {
            return Err(HeraldError::Validation("ttl_seconds must be positive".into()));
        }
    }
    if let Some(scheduled_for) = notification.scheduled_for {
        if scheduled_for < now {
            return Err(HeraldError::Validation(
                "scheduled_for must not be in the past".into(),
            ));
        }
        if scheduled_for > now + Duration::days(config.max_schedule_days) {
            return Err(HeraldError::Validation(format!(
                "scheduled_for must be within {} days",
                config.max_schedule_days
            )));
        }
    }
    for (key, value) in &notification.data {
        if key.is_empty() {
            return Err(HeraldError::Validation("data keys must not be empty".into()));
        }
        if value.len() > 4096 {
            return Err(HeraldError::Validation(format!(
                "data value for '{}' exceeds 4096 bytes",
                key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hd_common::NotificationType;
    use uuid::Uuid;

    fn base() -> (Notification, OrchestratorConfig) {
        (
            Notification::new(Uuid::new_v4(), NotificationType::NewMessage, "Hi", "Body"),
            OrchestratorConfig::default(),
        )
    }

    #[test]
    fn test_valid_notification_passes() {
        let (n, config) = base();
        assert!(validate(&n, &config, Utc::now()).is_ok());
    }

    #[test]
    fn test_empty_title_rejected() {
        let (mut n, config) = base();
        n.title = "   ".to_string();
        assert!(validate(&n, &config, Utc::now()).is_err());
    }

    #[test]
    fn test_body_length_boundary() {
        let (mut n, config) = base();
        n.body = "x".repeat(50_000);
        assert!(validate(&n, &config, Utc::now()).is_ok());
        n.body.push('x');
        assert!(validate(&n, &config, Utc::now()).is_err());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let (mut n, config) = base();
        n.ttl_seconds = Some(0);
        assert!(validate(&n, &config, Utc::now()).is_err());
        n.ttl_seconds = Some(1);
        assert!(validate(&n, &config, Utc::now()).is_ok());
    }

    #[test]
    fn test_schedule_horizon() {
        let (mut n, config) = base();
        let now = Utc::now();
        n.scheduled_for = Some(now + Duration::days(89));
        assert!(validate(&n, &config, now).is_ok());
        n.scheduled_for = Some(now + Duration::days(91));
        assert!(validate(&n, &config, now).is_err());
        n.scheduled_for = Some(now - Duration::hours(1));
        assert!(validate(&n, &config, now).is_err());
    }

    #[test]
    fn test_nil_user_rejected() {
        let (mut n, config) = base();
        n.user_id = Uuid::nil();
        assert!(validate(&n, &config, Utc::now()).is_err());
    }
}
