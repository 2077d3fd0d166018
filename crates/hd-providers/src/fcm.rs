//! FCM v1 push transport (OAuth service-account auth)
//!
//! The service-account JWT (RS256) is exchanged for an OAuth access token at
//! Google's token endpoint; the token is cached for `expires_in - 60`
//! seconds with a single refresher. Message JSON follows the v1 envelope:
//! `{message: {token, notification, android, data}}` with string-only data.
//! `UNREGISTERED` and `INVALID_ARGUMENT` error codes deactivate the token.

use crate::{classify_transport_error, Attempt};
use chrono::Utc;
use hd_common::{Category, ErrorCode, Notification, Priority};
use hd_config::FcmSecrets;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::debug;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// Android notification channel per category; clients register matching
/// channels at install time.
fn android_channel(category: Category) -> (&'static str, &'static str) {
    match category {
        Category::Chats => ("messages", "message_sound"),
        Category::Posts => ("listings", "default"),
        Category::Social => ("social", "default"),
        Category::Security => ("security", "alarm"),
        Category::System => ("system", "default"),
        Category::Marketing => ("promotions", "default"),
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct FcmErrorBody {
    error: Option<FcmErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct FcmErrorDetail {
    status: Option<String>,
    message: Option<String>,
}

pub struct FcmTransport {
    client: Client,
    secrets: FcmSecrets,
    token_url: String,
    send_url: String,
    token_cache: RwLock<Option<(String, Instant, Duration)>>,
}

impl FcmTransport {
    pub fn new(secrets: FcmSecrets) -> Self {
        let send_url = format!(
            "https://fcm.googleapis.com/v1/projects/{}/messages:send",
            secrets.project_id
        );
        Self {
            client: Client::builder()
                .pool_max_idle_per_host(10)
                .build()
                .expect("Failed to build HTTP client"),
            secrets,
            token_url: TOKEN_URL.to_string(),
            send_url,
            token_cache: RwLock::new(None),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_urls(secrets: FcmSecrets, token_url: String, send_url: String) -> Self {
        let mut transport = Self::new(secrets);
        transport.token_url = token_url;
        transport.send_url = send_url;
        transport
    }

    async fn access_token(&self) -> Result<String, String> {
        {
            let cache = self.token_cache.read();
            if let Some((token, minted_at, ttl)) = cache.as_ref() {
                if minted_at.elapsed() < *ttl {
                    return Ok(token.clone());
                }
            }
        }

        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: self.secrets.client_email.clone(),
            scope: FCM_SCOPE.to_string(),
            aud: self.token_url.clone(),
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(self.secrets.private_key.as_bytes())
            .map_err(|e| format!("FCM key parse failed: {}", e))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| format!("FCM assertion signing failed: {}", e))?;

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| format!("token exchange failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("token exchange HTTP {}", response.status()));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| format!("token response parse failed: {}", e))?;

        let ttl = Duration::from_secs(token.expires_in.saturating_sub(60));
        *self.token_cache.write() = Some((token.access_token.clone(), Instant::now(), ttl));
        debug!(ttl_secs = ttl.as_secs(), "Refreshed FCM access token");
        Ok(token.access_token)
    }

    /// FCM v1 message envelope. The data dict carries strings only.
    fn build_message(&self, notification: &Notification, device_token: &str) -> serde_json::Value {
        let (channel_id, sound) = android_channel(notification.category());

        let mut notification_block = json!({
            "title": notification.title,
            "body": notification.body,
        });
        if let Some(ref image) = notification.image_url {
            notification_block["image"] = json!(image);
        }

        let mut android_notification = json!({
            "channel_id": channel_id,
            "sound": notification.sound.as_deref().unwrap_or(sound),
            "visibility": if notification.category() == Category::Security { "PRIVATE" } else { "PUBLIC" },
        });
        if let Some(ref collapse_key) = notification.collapse_key {
            android_notification["tag"] = json!(collapse_key);
        }

        let mut android = json!({
            "priority": match notification.priority {
                Priority::Critical | Priority::High => "HIGH",
                _ => "NORMAL",
            },
            "notification": android_notification,
        });
        if let Some(ttl) = notification.ttl_seconds {
            android["ttl"] = json!(format!("{}s", ttl));
        }

        json!({
            "message": {
                "token": device_token,
                "notification": notification_block,
                "android": android,
                "data": notification.data,
            }
        })
    }

    pub async fn send_once(
        &self,
        notification: &Notification,
        device_token: &str,
        timeout: Duration,
    ) -> Attempt {
        let access_token = match self.access_token().await {
            Ok(token) => token,
            Err(message) => {
                // Token exchange failures are backend trouble, retryable.
                return Attempt::Retryable {
                    code: ErrorCode::ServiceUnavailable,
                    message,
                };
            }
        };

        let body = self.build_message(notification, device_token);
        let started = Instant::now();

        let response = match self
            .client
            .post(&self.send_url)
            .timeout(timeout)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return classify_transport_error(&e),
        };

        let status = response.status();
        let status_code = status.as_u16();
        let latency_ms = started.elapsed().as_millis() as u64;

        if status.is_success() {
            // v1 success body: {"name": "projects/*/messages/<id>"}
            let message_id = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("name").and_then(|n| n.as_str()).map(|s| s.to_string()));
            return Attempt::Success { latency_ms, message_id };
        }

        let detail = response
            .json::<FcmErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error);
        let error_status = detail
            .as_ref()
            .and_then(|d| d.status.clone())
            .unwrap_or_default();
        let message = detail
            .and_then(|d| d.message)
            .unwrap_or_else(|| format!("HTTP {}", status_code));

        if error_status == "UNREGISTERED" || error_status == "INVALID_ARGUMENT" {
            return Attempt::Fatal {
                code: ErrorCode::NoTargets,
                message: format!("FCM invalid token: {}", error_status),
                invalid_target: true,
            };
        }
        if status_code == 429 {
            return Attempt::Retryable {
                code: ErrorCode::RateLimited,
                message,
            };
        }
        if status.is_server_error() {
            return Attempt::Retryable {
                code: ErrorCode::ServiceUnavailable,
                message: format!("FCM {}: {}", status_code, message),
            };
        }
        Attempt::Fatal {
            code: ErrorCode::ServiceUnavailable,
            message: format!("FCM {}: {}", status_code, message),
            invalid_target: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn secrets() -> FcmSecrets {
        FcmSecrets {
            project_id: "herald-test".to_string(),
            client_email: "svc@herald-test.iam.gserviceaccount.com".to_string(),
            private_key: "not-a-key".to_string(),
        }
    }

    #[test]
    fn test_message_envelope() {
        let transport = FcmTransport::new(secrets());
        let mut n = Notification::new(
            Uuid::new_v4(),
            hd_common::NotificationType::NewMessage,
            "Hi",
            "New message",
        );
        n.ttl_seconds = Some(3600);
        n.data.insert("chatId".to_string(), "42".to_string());

        let message = transport.build_message(&n, "token-abc");
        assert_eq!(message["message"]["token"], "token-abc");
        assert_eq!(message["message"]["notification"]["title"], "Hi");
        assert_eq!(message["message"]["android"]["priority"], "HIGH");
        assert_eq!(message["message"]["android"]["ttl"], "3600s");
        assert_eq!(message["message"]["android"]["notification"]["channel_id"], "messages");
        assert_eq!(message["message"]["data"]["chatId"], "42");
    }

    #[test]
    fn test_security_visibility_private() {
        let transport = FcmTransport::new(secrets());
        let n = Notification::new(
            Uuid::new_v4(),
            hd_common::NotificationType::AccountSecurity,
            "Alert",
            "New sign-in",
        );
        let message = transport.build_message(&n, "t");
        assert_eq!(
            message["message"]["android"]["notification"]["visibility"],
            "PRIVATE"
        );
        assert_eq!(
            message["message"]["android"]["notification"]["channel_id"],
            "security"
        );
    }

    #[test]
    fn test_send_url_embeds_project() {
        let transport = FcmTransport::new(secrets());
        assert!(transport.send_url.contains("/projects/herald-test/"));
    }
}
