//! SMTP email provider (lettre)
//!
//! Plain SMTP relay for deployments that bring their own mail server. Used
//! as the last-resort provider in the default routing order.

use crate::Attempt;
use async_trait::async_trait;
use hd_common::ErrorCode;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::{Duration, Instant};

pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpProvider {
    pub fn new(host: &str, username: Option<String>, password: Option<String>) -> Result<Self, lettre::transport::smtp::Error> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)?;
        if let (Some(username), Some(password)) = (username, password) {
            builder = builder.credentials(Credentials::new(username, password));
        }
        Ok(Self {
            transport: builder.build(),
        })
    }

    fn build_message(message: &super::EmailMessage) -> Result<Message, String> {
        let from: Mailbox = format!("{} <{}>", message.from_name, message.from_address)
            .parse()
            .map_err(|e| format!("invalid from address: {}", e))?;
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| format!("invalid recipient: {}", e))?;

        let builder = Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.clone());

        let built = match &message.text {
            Some(text) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(message.html.clone()),
                    ),
            ),
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(message.html.clone()),
        };
        built.map_err(|e| format!("message build failed: {}", e))
    }
}

#[async_trait]
impl super::EmailProvider for SmtpProvider {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn attempt(&self, message: &super::EmailMessage, timeout: Duration) -> Attempt {
        let email = match Self::build_message(message) {
            Ok(email) => email,
            Err(message) => {
                return Attempt::Fatal {
                    code: ErrorCode::ValidationError,
                    message,
                    invalid_target: false,
                }
            }
        };

        let started = Instant::now();
        let send = self.transport.send(email);
        let result = match tokio::time::timeout(timeout, send).await {
            Ok(result) => result,
            Err(_) => {
                return Attempt::Retryable {
                    code: ErrorCode::Timeout,
                    message: "SMTP send timed out".to_string(),
                }
            }
        };

        match result {
            Ok(response) => Attempt::Success {
                latency_ms: started.elapsed().as_millis() as u64,
                message_id: response.message().next().map(|s| s.to_string()),
            },
            Err(e) if e.is_permanent() => Attempt::Fatal {
                code: ErrorCode::ValidationError,
                message: format!("SMTP permanent failure: {}", e),
                invalid_target: false,
            },
            Err(e) => Attempt::Retryable {
                code: ErrorCode::ServiceUnavailable,
                message: format!("SMTP transient failure: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::EmailMessage;
    use super::*;

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

    #[test]
    fn test_build_multipart_message() {
        let built = SmtpProvider::build_message(&message());
        assert!(built.is_ok());
    }

    #[test]
    fn test_invalid_recipient_rejected() {
        let mut bad = message();
        bad.to = "not an address".to_string();
        assert!(SmtpProvider::build_message(&bad).is_err());
    }
}
