//! Provider webhook verification and normalisation
//!
//! Each provider posts its own envelope; after the HMAC signature check the
//! payload is reduced to normalised `WebhookEvent`s. Bounce and complaint
//! events feed the suppression list.

use chrono::{DateTime, TimeZone, Utc};
use hd_common::WebhookEvent;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify the provider's HMAC-SHA256 signature over the raw body.
pub fn verify_signature(body: &[u8], signature_hex: &str, secret: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn timestamp_or_now(seconds: Option<i64>) -> DateTime<Utc> {
    seconds
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .unwrap_or_else(Utc::now)
}

/// Parse a provider payload into normalised events. Unknown providers and
/// unparseable payloads yield an empty list, not an error; the webhook
/// endpoint has already accepted the delivery.
pub fn parse_events(provider: &str, body: &[u8]) -> Vec<WebhookEvent> {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return Vec::new();
    };
    match provider {
        "resend" => parse_resend(&value),
        "sendgrid" => parse_sendgrid(&value),
        "ses" => parse_ses(&value),
        _ => Vec::new(),
    }
}

/// Resend: {"type": "email.bounced", "created_at": "...", "data": {...}}.
fn parse_resend(value: &serde_json::Value) -> Vec<WebhookEvent> {
    let Some(event_type) = value.get("type").and_then(|t| t.as_str()) else {
        return Vec::new();
    };
    let normalized = match event_type {
        "email.bounced" => "bounced",
        "email.complained" => "complained",
        "email.delivered" => "delivered",
        "email.opened" => "opened",
        other => other,
    };
    let data = value.get("data").cloned().unwrap_or_default();
    let email = data
        .get("to")
        .and_then(|to| match to {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(a) => a.first().and_then(|v| v.as_str()).map(String::from),
            _ => None,
        });
    vec![WebhookEvent {
        provider: "resend".to_string(),
        event_type: normalized.to_string(),
        message_id: data
            .get("email_id")
            .and_then(|v| v.as_str())
            .map(String::from),
        email,
        status: normalized.to_string(),
        timestamp: value
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(Utc::now),
    }]
}

/// SendGrid posts an array of events.
fn parse_sendgrid(value: &serde_json::Value) -> Vec<WebhookEvent> {
    let Some(events) = value.as_array() else {
        return Vec::new();
    };
    events
        .iter()
        .filter_map(|event| {
            let event_type = event.get("event")?.as_str()?;
            let normalized = match event_type {
                "bounce" => "bounced",
                "spamreport" => "spam_report",
                "delivered" => "delivered",
                "open" => "opened",
                other => other,
            };
            Some(WebhookEvent {
                provider: "sendgrid".to_string(),
                event_type: normalized.to_string(),
                message_id: event
                    .get("sg_message_id")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                email: event.get("email").and_then(|v| v.as_str()).map(String::from),
                status: normalized.to_string(),
                timestamp: timestamp_or_now(event.get("timestamp").and_then(|v| v.as_i64())),
            })
        })
        .collect()
}

/// SES events arrive wrapped in an SNS notification whose Message field is
/// itself JSON.
fn parse_ses(value: &serde_json::Value) -> Vec<WebhookEvent> {
    let message = match value.get("Message").and_then(|m| m.as_str()) {
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(inner) => inner,
            Err(_) => return Vec::new(),
        },
        None => value.clone(),
    };

    let Some(notification_type) = message.get("notificationType").and_then(|t| t.as_str()) else {
        return Vec::new();
    };
    let (normalized, recipients_path) = match notification_type {
        "Bounce" => ("bounced", "bounce"),
        "Complaint" => ("complained", "complaint"),
        "Delivery" => ("delivered", "delivery"),
        _ => return Vec::new(),
    };

    let message_id = message
        .get("mail")
        .and_then(|m| m.get("messageId"))
        .and_then(|v| v.as_str())
        .map(String::from);

    let recipients: Vec<String> = message
        .get(recipients_path)
        .and_then(|section| {
            section
                .get("bouncedRecipients")
                .or_else(|| section.get("complainedRecipients"))
                .or_else(|| section.get("recipients"))
        })
        .and_then(|r| r.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| match entry {
                    serde_json::Value::String(s) => Some(s.clone()),
                    other => other
                        .get("emailAddress")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                })
                .collect()
        })
        .unwrap_or_default();

    recipients
        .into_iter()
        .map(|email| WebhookEvent {
            provider: "ses".to_string(),
            event_type: normalized.to_string(),
            message_id: message_id.clone(),
            email: Some(email),
            status: normalized.to_string(),
            timestamp: Utc::now(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let body = br#"{"type":"email.bounced"}"#;
        let mut mac = HmacSha256::new_from_slice(b"whsec").unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(body, &signature, "whsec"));
        assert!(!verify_signature(body, &signature, "wrong"));
        assert!(!verify_signature(b"tampered", &signature, "whsec"));
        assert!(!verify_signature(body, "zz-not-hex", "whsec"));
    }

    #[test]
    fn test_parse_resend_bounce() {
        let body = serde_json::json!({
            "type": "email.bounced",
            "created_at": "2026-08-01T10:00:00Z",
            "data": { "email_id": "msg-1", "to": ["user@example.com"] }
        });
        let events = parse_events("resend", body.to_string().as_bytes());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "bounced");
        assert_eq!(events[0].email.as_deref(), Some("user@example.com"));
        assert!(events[0].is_suppression());
    }

    #[test]
    fn test_parse_sendgrid_batch() {
        let body = serde_json::json!([
            { "event": "delivered", "email": "a@example.com", "timestamp": 1_750_000_000 },
            { "event": "bounce", "email": "b@example.com", "sg_message_id": "sg-1", "timestamp": 1_750_000_001 }
        ]);
        let events = parse_events("sendgrid", body.to_string().as_bytes());
        assert_eq!(events.len(), 2);
        assert!(!events[0].is_suppression());
        assert!(events[1].is_suppression());
        assert_eq!(events[1].message_id.as_deref(), Some("sg-1"));
    }

    #[test]
    fn test_parse_ses_sns_wrapped_bounce() {
        let inner = serde_json::json!({
            "notificationType": "Bounce",
            "bounce": { "bouncedRecipients": [{ "emailAddress": "c@example.com" }] },
            "mail": { "messageId": "ses-9" }
        });
        let body = serde_json::json!({
            "Type": "Notification",
            "Message": inner.to_string()
        });
        let events = parse_events("ses", body.to_string().as_bytes());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].email.as_deref(), Some("c@example.com"));
        assert_eq!(events[0].message_id.as_deref(), Some("ses-9"));
        assert!(events[0].is_suppression());
    }

    #[test]
    fn test_unknown_provider_yields_nothing() {
        assert!(parse_events("mystery", b"{}").is_empty());
    }

    #[test]
    fn test_garbage_body_yields_nothing() {
        assert!(parse_events("resend", b"not json").is_empty());
    }
}
