//! APNs push transport (HTTP/2, ES256 token auth)
//!
//! Provider JWTs are signed with the team's ES256 key and cached for 50
//! minutes (Apple rejects tokens older than an hour). Each device token gets
//! its own POST with the canonical `aps` dictionary; Apple's invalid-token
//! reasons (`BadDeviceToken`, `Unregistered`, `DeviceTokenNotForTopic`) and
//! HTTP 410 mark the token for deactivation.

use crate::{classify_transport_error, Attempt};
use chrono::Utc;
use hd_common::{ErrorCode, Notification, Priority};
use hd_config::ApnsSecrets;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::debug;

const JWT_LIFETIME: Duration = Duration::from_secs(50 * 60);

const PRODUCTION_HOST: &str = "https://api.push.apple.com";
const SANDBOX_HOST: &str = "https://api.sandbox.push.apple.com";

#[derive(Debug, Serialize)]
struct ApnsClaims {
    iss: String,
    iat: i64,
}

#[derive(Debug, Deserialize)]
struct ApnsErrorBody {
    reason: Option<String>,
}

fn is_invalid_token_reason(reason: &str) -> bool {
    matches!(
        reason,
        "BadDeviceToken" | "Unregistered" | "DeviceTokenNotForTopic"
    )
}

pub struct ApnsTransport {
    client: Client,
    secrets: ApnsSecrets,
    host: String,
    jwt_cache: RwLock<Option<(String, Instant)>>,
}

impl ApnsTransport {
    pub fn new(secrets: ApnsSecrets) -> Self {
        let host = if secrets.environment == "sandbox" {
            SANDBOX_HOST
        } else {
            PRODUCTION_HOST
        };
        Self {
            client: Client::builder()
                .pool_max_idle_per_host(10)
                .build()
                .expect("Failed to build HTTP client"),
            host: host.to_string(),
            secrets,
            jwt_cache: RwLock::new(None),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_host(secrets: ApnsSecrets, host: String) -> Self {
        let mut transport = Self::new(secrets);
        transport.host = host;
        transport
    }

    /// Cached provider JWT; a single refresher signs near expiry, readers
    /// reuse the cached value.
    fn provider_jwt(&self) -> Result<String, jsonwebtoken::errors::Error> {
        {
            let cache = self.jwt_cache.read();
            if let Some((token, minted_at)) = cache.as_ref() {
                if minted_at.elapsed() < JWT_LIFETIME {
                    return Ok(token.clone());
                }
            }
        }

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.secrets.key_id.clone());
        let claims = ApnsClaims {
            iss: self.secrets.team_id.clone(),
            iat: Utc::now().timestamp(),
        };
        let key = EncodingKey::from_ec_pem(self.secrets.private_key.as_bytes())?;
        let token = jsonwebtoken::encode(&header, &claims, &key)?;

        *self.jwt_cache.write() = Some((token.clone(), Instant::now()));
        debug!("Minted fresh APNs provider JWT");
        Ok(token)
    }

    /// Canonical `aps` dictionary plus the custom data keys.
    fn build_payload(&self, notification: &Notification) -> serde_json::Value {
        let mut aps = json!({
            "alert": {
                "title": notification.title,
                "body": notification.body,
            },
        });

        if let Some(ref sound) = notification.sound {
            aps["sound"] = json!(sound);
        }
        if let Some(badge) = notification.badge {
            aps["badge"] = json!(badge);
        }
        if let Some(ref thread_id) = notification.thread_id {
            aps["thread-id"] = json!(thread_id);
        }
        if let Some(ref category_id) = notification.category_id {
            aps["category"] = json!(category_id);
        }

        aps["interruption-level"] = json!(match notification.priority {
            Priority::Critical => "critical",
            Priority::High => "time-sensitive",
            Priority::Normal => "active",
            Priority::Low => "passive",
        });
        aps["relevance-score"] = json!(match notification.priority {
            Priority::Critical => 1.0,
            Priority::High => 0.75,
            Priority::Normal => 0.5,
            Priority::Low => 0.25,
        });

        let mut payload = json!({ "aps": aps });
        for (key, value) in &notification.data {
            payload[key] = json!(value);
        }
        payload
    }

    /// One POST to APNs for one device token.
    pub async fn send_once(
        &self,
        notification: &Notification,
        device_token: &str,
        timeout: Duration,
    ) -> Attempt {
        let jwt = match self.provider_jwt() {
            Ok(jwt) => jwt,
            Err(e) => {
                return Attempt::Fatal {
                    code: ErrorCode::Internal,
                    message: format!("APNs JWT signing failed: {}", e),
                    invalid_target: false,
                }
            }
        };

        let url = format!("{}/3/device/{}", self.host, device_token);
        let payload = self.build_payload(notification);

        let apns_priority = match notification.priority {
            Priority::Low => "5",
            _ => "10",
        };
        let expiration = notification
            .ttl_seconds
            .map(|ttl| (Utc::now().timestamp() + ttl as i64).to_string())
            .unwrap_or_else(|| "0".to_string());

        let started = Instant::now();
        let mut request = self
            .client
            .post(&url)
            .timeout(timeout)
            .bearer_auth(jwt)
            .header("apns-topic", &self.secrets.bundle_id)
            .header("apns-push-type", "alert")
            .header("apns-priority", apns_priority)
            .header("apns-expiration", expiration)
            .json(&payload);

        if let Some(ref collapse_key) = notification.collapse_key {
            request = request.header("apns-collapse-id", collapse_key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return classify_transport_error(&e),
        };

        let status = response.status();
        let status_code = status.as_u16();
        let latency_ms = started.elapsed().as_millis() as u64;

        if status.is_success() {
            let message_id = response
                .headers()
                .get("apns-id")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            return Attempt::Success { latency_ms, message_id };
        }

        let reason = response
            .json::<ApnsErrorBody>()
            .await
            .ok()
            .and_then(|b| b.reason)
            .unwrap_or_default();

        if status_code == 410 || is_invalid_token_reason(&reason) {
            return Attempt::Fatal {
                code: ErrorCode::NoTargets,
                message: format!("APNs invalid token: {}", reason),
                invalid_target: true,
            };
        }
        if status_code == 429 {
            return Attempt::Retryable {
                code: ErrorCode::RateLimited,
                message: format!("APNs rate limited: {}", reason),
            };
        }
        if status.is_server_error() {
            return Attempt::Retryable {
                code: ErrorCode::ServiceUnavailable,
                message: format!("APNs {}: {}", status_code, reason),
            };
        }
        Attempt::Fatal {
            code: ErrorCode::ServiceUnavailable,
            message: format!("APNs {}: {}", status_code, reason),
            invalid_target: false,
        }
    }
}
