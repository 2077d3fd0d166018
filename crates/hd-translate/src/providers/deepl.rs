//! DeepL translation provider

use super::{classify_status, classify_transport, TranslateAttempt, TranslateProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};

const API_URL: &str = "https://api-free.deepl.com/v2/translate";

#[derive(Debug, Deserialize)]
struct DeepLResponse {
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
}

pub struct DeepLProvider {
    client: Client,
    api_key: String,
    api_url: String,
}

impl DeepLProvider {
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
impl TranslateProvider for DeepLProvider {
    fn name(&self) -> &'static str {
        "deepl"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        _context: Option<&str>,
        timeout: Duration,
    ) -> TranslateAttempt {
        let started = Instant::now();
        let response = match self
            .client
            .post(&self.api_url)
            .timeout(timeout)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .form(&[
                ("text", text),
                ("source_lang", &source_lang.to_uppercase()),
                ("target_lang", &target_lang.to_uppercase()),
                ("tag_handling", "html"),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return classify_transport(self.name(), &e),
        };

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let hint = response.text().await.unwrap_or_default();
            return classify_status(self.name(), status, &hint);
        }

        match response.json::<DeepLResponse>().await {
            Ok(parsed) => match parsed.translations.into_iter().next() {
                Some(t) => TranslateAttempt::Translated {
                    text: t.text,
                    latency_ms: started.elapsed().as_millis() as u64,
                },
                None => TranslateAttempt::Fatal {
                    message: "deepl returned no translations".to_string(),
                },
            },
            Err(e) => TranslateAttempt::Fatal {
                message: format!("deepl response parse failed: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_quota_456_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(456))
            .mount(&server)
            .await;

        let provider = DeepLProvider::new("key".to_string()).with_api_url(server.uri());
        let attempt = provider
            .translate("Hello", "en", "de", None, Duration::from_secs(5))
            .await;
        assert!(matches!(attempt, TranslateAttempt::QuotaRejected { .. }));
    }

    #[tokio::test]
    async fn test_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "translations": [{ "detected_source_language": "EN", "text": "Hallo" }]
            })))
            .mount(&server)
            .await;

        let provider = DeepLProvider::new("key".to_string()).with_api_url(server.uri());
        let attempt = provider
            .translate("Hello", "en", "de", None, Duration::from_secs(5))
            .await;
        assert!(matches!(attempt, TranslateAttempt::Translated { text, .. } if text == "Hallo"));
    }
}
