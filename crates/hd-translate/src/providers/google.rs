//! Google Cloud Translation provider (v2 API)

use super::{classify_status, classify_transport, TranslateAttempt, TranslateProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

const API_URL: &str = "https://translation.googleapis.com/language/translate/v2";

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    data: GoogleData,
}

#[derive(Debug, Deserialize)]
struct GoogleData {
    translations: Vec<GoogleTranslation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTranslation {
    translated_text: String,
}

pub struct GoogleProvider {
    client: Client,
    api_key: String,
    api_url: String,
}

impl GoogleProvider {
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
impl TranslateProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
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
            "q": text,
            "source": source_lang,
            "target": target_lang,
            "format": "html",
        });

        let started = Instant::now();
        let response = match self
            .client
            .post(&self.api_url)
            .timeout(timeout)
            .query(&[("key", &self.api_key)])
            .json(&body)
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

        match response.json::<GoogleResponse>().await {
            Ok(parsed) => match parsed.data.translations.into_iter().next() {
                Some(t) => TranslateAttempt::Translated {
                    text: t.translated_text,
                    latency_ms: started.elapsed().as_millis() as u64,
                },
                None => TranslateAttempt::Fatal {
                    message: "google returned no translations".to_string(),
                },
            },
            Err(e) => TranslateAttempt::Fatal {
                message: format!("google response parse failed: {}", e),
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
    async fn test_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "translations": [{ "translatedText": "Bonjour" }] }
            })))
            .mount(&server)
            .await;

        let provider = GoogleProvider::new("key".to_string()).with_api_url(server.uri());
        let attempt = provider
            .translate("Hello", "en", "fr", None, Duration::from_secs(5))
            .await;
        assert!(matches!(attempt, TranslateAttempt::Translated { text, .. } if text == "Bonjour"));
    }

    #[tokio::test]
    async fn test_quota_403_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_string("Daily quota limit exceeded for project"),
            )
            .mount(&server)
            .await;

        let provider = GoogleProvider::new("key".to_string()).with_api_url(server.uri());
        let attempt = provider
            .translate("Hello", "en", "fr", None, Duration::from_secs(5))
            .await;
        assert!(matches!(attempt, TranslateAttempt::QuotaRejected { .. }));
    }
}
