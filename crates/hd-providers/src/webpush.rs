//! WebPush transport (VAPID auth)
//!
//! Each subscription endpoint gets a VAPID-signed POST: an ES256 JWT whose
//! audience is the endpoint's origin, carried as
//! `Authorization: vapid t=<jwt>, k=<public key>`. HTTP 404 and 410 mean
//! the subscription is gone and must be deactivated.

use crate::{classify_transport_error, Attempt};
use chrono::Utc;
use hd_common::{ErrorCode, Notification, Priority};
use hd_config::VapidSecrets;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// VAPID JWTs are minted per origin and reused until shortly before expiry.
const VAPID_JWT_LIFETIME: Duration = Duration::from_secs(11 * 3600);

#[derive(Debug, Serialize)]
struct VapidClaims {
    aud: String,
    exp: i64,
    sub: String,
}

fn urgency(priority: Priority) -> &'static str {
    match priority {
        Priority::Critical | Priority::High => "high",
        Priority::Normal => "normal",
        Priority::Low => "low",
    }
}

fn endpoint_origin(endpoint: &str) -> Option<String> {
    let rest = endpoint.strip_prefix("https://")?;
    let host = rest.split('/').next()?;
    Some(format!("https://{}", host))
}

pub struct WebPushTransport {
    client: Client,
    secrets: VapidSecrets,
    jwt_cache: RwLock<HashMap<String, (String, Instant)>>,
}

impl WebPushTransport {
    pub fn new(secrets: VapidSecrets) -> Self {
        Self {
            client: Client::builder()
                .pool_max_idle_per_host(10)
                .build()
                .expect("Failed to build HTTP client"),
            secrets,
            jwt_cache: RwLock::new(HashMap::new()),
        }
    }

    fn vapid_jwt(&self, origin: &str) -> Result<String, jsonwebtoken::errors::Error> {
        {
            let cache = self.jwt_cache.read();
            if let Some((token, minted_at)) = cache.get(origin) {
                if minted_at.elapsed() < VAPID_JWT_LIFETIME {
                    return Ok(token.clone());
                }
            }
        }

        let claims = VapidClaims {
            aud: origin.to_string(),
            exp: Utc::now().timestamp() + 12 * 3600,
            sub: self.secrets.subject.clone(),
        };
        let key = EncodingKey::from_ec_pem(self.secrets.private_key.as_bytes())?;
        let token = jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &key)?;

        self.jwt_cache
            .write()
            .insert(origin.to_string(), (token.clone(), Instant::now()));
        Ok(token)
    }

    fn build_payload(&self, notification: &Notification) -> serde_json::Value {
        json!({
            "title": notification.title,
            "body": notification.body,
            "icon": notification.image_url,
            "tag": notification.collapse_key,
            "data": notification.data,
        })
    }

    pub async fn send_once(
        &self,
        notification: &Notification,
        endpoint: &str,
        timeout: Duration,
    ) -> Attempt {
        let origin = match endpoint_origin(endpoint) {
            Some(origin) => origin,
            None => {
                return Attempt::Fatal {
                    code: ErrorCode::NoTargets,
                    message: "malformed subscription endpoint".to_string(),
                    invalid_target: true,
                }
            }
        };

        let jwt = match self.vapid_jwt(&origin) {
            Ok(jwt) => jwt,
            Err(e) => {
                return Attempt::Fatal {
                    code: ErrorCode::Internal,
                    message: format!("VAPID signing failed: {}", e),
                    invalid_target: false,
                }
            }
        };

        let ttl = notification.ttl_seconds.unwrap_or(86_400);
        let payload = self.build_payload(notification);
        let started = Instant::now();

        let response = match self
            .client
            .post(endpoint)
            .timeout(timeout)
            .header(
                "Authorization",
                format!("vapid t={}, k={}", jwt, self.secrets.public_key),
            )
            .header("TTL", ttl.to_string())
            .header("Urgency", urgency(notification.priority))
            .json(&payload)
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
            return Attempt::Success { latency_ms, message_id: None };
        }
        if status_code == 404 || status_code == 410 {
            return Attempt::Fatal {
                code: ErrorCode::NoTargets,
                message: format!("subscription gone ({})", status_code),
                invalid_target: true,
            };
        }
        if status_code == 429 {
            return Attempt::Retryable {
                code: ErrorCode::RateLimited,
                message: "push service rate limited".to_string(),
            };
        }
        if status.is_server_error() {
            return Attempt::Retryable {
                code: ErrorCode::ServiceUnavailable,
                message: format!("push service {}", status_code),
            };
        }
        Attempt::Fatal {
            code: ErrorCode::ServiceUnavailable,
            message: format!("push service {}", status_code),
            invalid_target: false,
        }
    }
}
