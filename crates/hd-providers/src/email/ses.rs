//! AWS SES email provider (Signature V4 query API)

use crate::aws_sig::{sign, SigV4Params};
use crate::{classify_transport_error, Attempt};
use async_trait::async_trait;
use chrono::Utc;
use hd_common::ErrorCode;
use hd_config::AwsSecrets;
use reqwest::Client;
use std::time::{Duration, Instant};

fn url_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

pub struct SesProvider {
    client: Client,
    secrets: AwsSecrets,
    endpoint: String,
    host: String,
}

impl SesProvider {
    pub fn new(secrets: AwsSecrets) -> Self {
        let host = format!("email.{}.amazonaws.com", secrets.region);
        Self {
            client: Client::new(),
            endpoint: format!("https://{}/", host),
            host,
            secrets,
        }
    }

    pub fn with_endpoint(mut self, endpoint: String, host: String) -> Self {
        self.endpoint = endpoint;
        self.host = host;
        self
    }

    fn build_form(&self, message: &super::EmailMessage) -> String {
        let mut pairs = vec![
            ("Action".to_string(), "SendEmail".to_string()),
            ("Version".to_string(), "2010-12-01".to_string()),
            (
                "Source".to_string(),
                format!("{} <{}>", message.from_name, message.from_address),
            ),
            (
                "Destination.ToAddresses.member.1".to_string(),
                message.to.clone(),
            ),
            ("Message.Subject.Data".to_string(), message.subject.clone()),
            ("Message.Body.Html.Data".to_string(), message.html.clone()),
        ];
        if let Some(ref text) = message.text {
            pairs.push(("Message.Body.Text.Data".to_string(), text.clone()));
        }
        pairs
            .iter()
            .map(|(k, v)| format!("{}={}", url_encode(k), url_encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[async_trait]
impl super::EmailProvider for SesProvider {
    fn name(&self) -> &'static str {
        "ses"
    }

    async fn attempt(&self, message: &super::EmailMessage, timeout: Duration) -> Attempt {
        let body = self.build_form(message);
        let signed = sign(
            &SigV4Params {
                access_key_id: &self.secrets.access_key_id,
                secret_access_key: &self.secrets.secret_access_key,
                region: &self.secrets.region,
                service: "email",
                host: &self.host,
                method: "POST",
                path: "/",
                query: "",
                body: body.as_bytes(),
                content_type: "application/x-www-form-urlencoded",
                extra_headers: &[],
            },
            Utc::now(),
        );

        let started = Instant::now();
        let response = match self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Authorization", signed.authorization)
            .header("X-Amz-Date", signed.amz_date)
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return classify_transport_error(&e),
        };

        let status = response.status();
        let status_code = status.as_u16();
        let latency_ms = started.elapsed().as_millis() as u64;
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            // <MessageId>...</MessageId> from the XML response.
            let message_id = text
                .split("<MessageId>")
                .nth(1)
                .and_then(|rest| rest.split("</MessageId>").next())
                .map(|s| s.to_string());
            return Attempt::Success { latency_ms, message_id };
        }
        if status_code == 429 || text.contains("Throttling") {
            return Attempt::Retryable {
                code: ErrorCode::RateLimited,
                message: "SES throttled".to_string(),
            };
        }
        if text.contains("LimitExceeded") || text.contains("MaxSendingRateExceeded") {
            return Attempt::Fatal {
                code: ErrorCode::QuotaExhausted,
                message: "SES sending quota exceeded".to_string(),
                invalid_target: false,
            };
        }
        if status.is_server_error() {
            return Attempt::Retryable {
                code: ErrorCode::ServiceUnavailable,
                message: format!("SES HTTP {}", status_code),
            };
        }
        Attempt::Fatal {
            code: ErrorCode::ValidationError,
            message: format!("SES HTTP {}: {}", status_code, text),
            invalid_target: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{EmailMessage, EmailProvider};
    use super::*;
    use wiremock::matchers::{header_exists, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn secrets() -> AwsSecrets {
        AwsSecrets {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    fn message() -> EmailMessage {
        EmailMessage {
            to: "user@example.com".to_string(),
            subject: "Hi there".to_string(),
            html: "<p>Hi</p>".to_string(),
            text: None,
            from_address: "no-reply@herald.local".to_string(),
            from_name: "Herald".to_string(),
        }
    }

    #[test]
    fn test_form_encoding() {
        let provider = SesProvider::new(secrets());
        let form = provider.build_form(&message());
        assert!(form.contains("Action=SendEmail"));
        assert!(form.contains("Destination.ToAddresses.member.1=user%40example.com"));
        assert!(form.contains("Message.Subject.Data=Hi%20there"));
    }

    #[tokio::test]
    async fn test_signed_request_and_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("Authorization"))
            .and(header_exists("X-Amz-Date"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<SendEmailResponse><SendEmailResult><MessageId>ses-123</MessageId></SendEmailResult></SendEmailResponse>",
            ))
            .mount(&server)
            .await;

        let provider = SesProvider::new(secrets())
            .with_endpoint(format!("{}/", server.uri()), "localhost".to_string());
        let result = provider.send(&message(), Duration::from_secs(5)).await;

        assert!(result.success);
        assert_eq!(result.message_id.as_deref(), Some("ses-123"));
    }

    #[tokio::test]
    async fn test_throttling_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string("<ErrorResponse><Error><Code>Throttling</Code></Error></ErrorResponse>"),
            )
            .mount(&server)
            .await;

        let provider = SesProvider::new(secrets())
            .with_endpoint(format!("{}/", server.uri()), "localhost".to_string());
        let attempt = provider.attempt(&message(), Duration::from_secs(5)).await;
        assert!(matches!(attempt, Attempt::Retryable { .. }));
    }
}
