//! Amazon Translate provider (SigV4, JSON 1.1 target protocol)

use super::{classify_transport, TranslateAttempt, TranslateProvider};
use async_trait::async_trait;
use chrono::Utc;
use hd_config::AwsSecrets;
use hd_providers::aws_sig::{sign, SigV4Params};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

const TARGET: &str = "AWSShineFrontendService_20170701.TranslateText";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AmazonResponse {
    translated_text: String,
}

pub struct AmazonProvider {
    client: Client,
    secrets: AwsSecrets,
    endpoint: String,
    host: String,
}

impl AmazonProvider {
    pub fn new(secrets: AwsSecrets) -> Self {
        let host = format!("translate.{}.amazonaws.com", secrets.region);
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
}

#[async_trait]
impl TranslateProvider for AmazonProvider {
    fn name(&self) -> &'static str {
        "amazon"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        _context: Option<&str>,
        timeout: Duration,
    ) -> TranslateAttempt {
        let body = json!({
            "Text": text,
            "SourceLanguageCode": source_lang,
            "TargetLanguageCode": target_lang,
        })
        .to_string();

        let signed = sign(
            &SigV4Params {
                access_key_id: &self.secrets.access_key_id,
                secret_access_key: &self.secrets.secret_access_key,
                region: &self.secrets.region,
                service: "translate",
                host: &self.host,
                method: "POST",
                path: "/",
                query: "",
                body: body.as_bytes(),
                content_type: "application/x-amz-json-1.1",
                extra_headers: &[("x-amz-target", TARGET)],
            },
            Utc::now(),
        );

        let started = Instant::now();
        let response = match self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .header("Content-Type", "application/x-amz-json-1.1")
            .header("X-Amz-Target", TARGET)
            .header("X-Amz-Date", signed.amz_date)
            .header("Authorization", signed.authorization)
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return classify_transport(self.name(), &e),
        };

        let status = response.status().as_u16();
        let text_body = response.text().await.unwrap_or_default();

        if (200..300).contains(&status) {
            return match serde_json::from_str::<AmazonResponse>(&text_body) {
                Ok(parsed) => TranslateAttempt::Translated {
                    text: parsed.translated_text,
                    latency_ms: started.elapsed().as_millis() as u64,
                },
                Err(e) => TranslateAttempt::Fatal {
                    message: format!("amazon response parse failed: {}", e),
                },
            };
        }

        if text_body.contains("ThrottlingException") {
            return TranslateAttempt::Retryable {
                message: "amazon throttled".to_string(),
            };
        }
        if text_body.contains("LimitExceededException")
            || text_body.contains("ServiceQuotaExceeded")
        {
            return TranslateAttempt::QuotaRejected {
                message: "amazon quota rejected".to_string(),
            };
        }
        if (500..600).contains(&status) {
            return TranslateAttempt::Retryable {
                message: format!("amazon HTTP {}", status),
            };
        }
        TranslateAttempt::Fatal {
            message: format!("amazon HTTP {}: {}", status, text_body),
        }
    }
}

#[cfg(test)]
mod tests {
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

    #[tokio::test]
    async fn test_signed_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("Authorization"))
            .and(header_exists("X-Amz-Target"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "TranslatedText": "Hallo",
                "SourceLanguageCode": "en",
                "TargetLanguageCode": "de"
            })))
            .mount(&server)
            .await;

        let provider = AmazonProvider::new(secrets())
            .with_endpoint(format!("{}/", server.uri()), "localhost".to_string());
        let attempt = provider
            .translate("Hello", "en", "de", None, Duration::from_secs(5))
            .await;
        assert!(matches!(attempt, TranslateAttempt::Translated { text, .. } if text == "Hallo"));
    }

    #[tokio::test]
    async fn test_throttling_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "__type": "ThrottlingException", "message": "Rate exceeded"
            })))
            .mount(&server)
            .await;

        let provider = AmazonProvider::new(secrets())
            .with_endpoint(format!("{}/", server.uri()), "localhost".to_string());
        let attempt = provider
            .translate("Hello", "en", "de", None, Duration::from_secs(5))
            .await;
        assert!(matches!(attempt, TranslateAttempt::Retryable { .. }));
    }
}
