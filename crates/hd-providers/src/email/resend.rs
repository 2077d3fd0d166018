//! Resend email provider

use crate::{classify_transport_error, retry_after_secs, Attempt};
use async_trait::async_trait;
use hd_common::ErrorCode;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

const API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: Option<String>,
}

pub struct ResendProvider {
    client: Client,
    api_key: String,
    api_url: String,
}

impl ResendProvider {
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
impl super::EmailProvider for ResendProvider {
    fn name(&self) -> &'static str {
        "resend"
    }

    async fn attempt(&self, message: &super::EmailMessage, timeout: Duration) -> Attempt {
        let mut body = json!({
            "from": format!("{} <{}>", message.from_name, message.from_address),
            "to": [message.to],
            "subject": message.subject,
            "html": message.html,
        });
        if let Some(ref text) = message.text {
            body["text"] = json!(text);
        }

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

        if status.is_success() {
            let message_id = response
                .json::<ResendResponse>()
                .await
                .ok()
                .and_then(|r| r.id);
            return Attempt::Success { latency_ms, message_id };
        }
        if status_code == 429 {
            let retry_after = retry_after_secs(&response);
            return Attempt::Retryable {
                code: ErrorCode::RateLimited,
                message: format!("resend rate limited, retry after {}s", retry_after),
            };
        }
        if status.is_server_error() {
            return Attempt::Retryable {
                code: ErrorCode::ServiceUnavailable,
                message: format!("resend HTTP {}", status_code),
            };
        }
        if status_code == 401 || status_code == 403 {
            return Attempt::Fatal {
                code: ErrorCode::Unauthenticated,
                message: "resend auth error".to_string(),
                invalid_target: false,
            };
        }
        let detail = response.text().await.unwrap_or_default();
        Attempt::Fatal {
            code: ErrorCode::ValidationError,
            message: format!("resend HTTP {}: {}", status_code, detail),
            invalid_target: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{EmailMessage, EmailProvider};
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> EmailMessage {
        EmailMessage {
            to: "user@example.com".to_string(),
            subject: "Hi".to_string(),
            html: "<p>Hi</p>".to_string(),
            text: Some("Hi".to_string()),
            from_address: "no-reply@herald.local".to_string(),
            from_name: "Herald".to_string(),
        }
    }

    #[tokio::test]
    async fn test_success_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("Authorization", "Bearer key-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_abc"
            })))
            .mount(&server)
            .await;

        let provider = ResendProvider::new("key-123".to_string())
            .with_api_url(format!("{}/emails", server.uri()));
        let result = provider.send(&message(), Duration::from_secs(5)).await;

        assert!(result.success);
        assert_eq!(result.message_id.as_deref(), Some("msg_abc"));
        assert_eq!(result.provider, "resend");
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = ResendProvider::new("key-123".to_string())
            .with_api_url(format!("{}/emails", server.uri()));
        let attempt = provider.attempt(&message(), Duration::from_secs(5)).await;
        assert!(matches!(attempt, Attempt::Retryable { .. }));
    }

    #[tokio::test]
    async fn test_bad_request_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid to"))
            .mount(&server)
            .await;

        let provider = ResendProvider::new("key-123".to_string())
            .with_api_url(format!("{}/emails", server.uri()));
        let attempt = provider.attempt(&message(), Duration::from_secs(5)).await;
        assert!(matches!(attempt, Attempt::Fatal { .. }));
    }
}
