//! SendGrid email provider

use crate::{classify_transport_error, retry_after_secs, Attempt};
use async_trait::async_trait;
use hd_common::ErrorCode;
use reqwest::Client;
use serde_json::json;
use std::time::{Duration, Instant};

const API_URL: &str = "https://api.sendgrid.com/v3/mail/send";

pub struct SendGridProvider {
    client: Client,
    api_key: String,
    api_url: String,
}

impl SendGridProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_url: API_URL.to_string(),
        }
    }

    pub fn with_api_url(mut self, api_url: String) -> Self {
        self.api_url = api_url;
        self
    }
}

#[async_trait]
impl super::EmailProvider for SendGridProvider {
    fn name(&self) -> &'static str {
        "sendgrid"
    }

    async fn attempt(&self, message: &super::EmailMessage, timeout: Duration) -> Attempt {
        let mut content = vec![json!({ "type": "text/html", "value": message.html })];
        if let Some(ref text) = message.text {
            // SendGrid requires text/plain before text/html.
            content.insert(0, json!({ "type": "text/plain", "value": text }));
        }

        let body = json!({
            "personalizations": [{ "to": [{ "email": message.to }] }],
            "from": { "email": message.from_address, "name": message.from_name },
            "subject": message.subject,
            "content": content,
        });

        let started = Instant::now();
        let response = match self
            .client
            .post(&self.api_url)
            .timeout(timeout)
            .bearer_auth(&self.api_key)
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

        // SendGrid answers 202 Accepted with the id in X-Message-Id.
        if status.is_success() {
            let message_id = response
                .headers()
                .get("X-Message-Id")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            return Attempt::Success { latency_ms, message_id };
        }
        if status_code == 429 {
            let retry_after = retry_after_secs(&response);
            return Attempt::Retryable {
                code: ErrorCode::RateLimited,
                message: format!("sendgrid rate limited, retry after {}s", retry_after),
            };
        }
        if status.is_server_error() {
            return Attempt::Retryable {
                code: ErrorCode::ServiceUnavailable,
                message: format!("sendgrid HTTP {}", status_code),
            };
        }
        if status_code == 401 || status_code == 403 {
            return Attempt::Fatal {
                code: ErrorCode::Unauthenticated,
                message: "sendgrid auth error".to_string(),
                invalid_target: false,
            };
        }
        Attempt::Fatal {
            code: ErrorCode::ValidationError,
            message: format!("sendgrid HTTP {}", status_code),
            invalid_target: false,
        }
    }
}
