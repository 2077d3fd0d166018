//! Microsoft Translator provider (v3 API)

use super::{classify_status, classify_transport, TranslateAttempt, TranslateProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

const API_URL: &str = "https://api.cognitive.microsofttranslator.com/translate";

#[derive(Debug, Deserialize)]
struct MsEntry {
    translations: Vec<MsTranslation>,
}

#[derive(Debug, Deserialize)]
struct MsTranslation {
    text: String,
}

pub struct MicrosoftProvider {
    client: Client,
    api_key: String,
    region: Option<String>,
    api_url: String,
}

impl MicrosoftProvider {
    pub fn new(api_key: String, region: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            region,
            api_url: API_URL.to_string(),
        }
    }

    pub fn with_api_url(mut self, api_url: String) -> Self {
        self.api_url = api_url;
        self
    }
}

#[async_trait]
impl TranslateProvider for MicrosoftProvider {
    fn name(&self) -> &'static str {
        "microsoft"
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
        let mut request = self
            .client
            .post(&self.api_url)
            .timeout(timeout)
            .query(&[
                ("api-version", "3.0"),
                ("from", source_lang),
                ("to", target_lang),
                ("textType", "html"),
            ])
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .json(&json!([{ "Text": text }]));
        if let Some(ref region) = self.region {
            request = request.header("Ocp-Apim-Subscription-Region", region);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return classify_transport(self.name(), &e),
        };

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let hint = response.text().await.unwrap_or_default();
            return classify_status(self.name(), status, &hint);
        }

        match response.json::<Vec<MsEntry>>().await {
            Ok(entries) => match entries
                .into_iter()
                .next()
                .and_then(|e| e.translations.into_iter().next())
            {
                Some(t) => TranslateAttempt::Translated {
                    text: t.text,
                    latency_ms: started.elapsed().as_millis() as u64,
                },
                None => TranslateAttempt::Fatal {
                    message: "microsoft returned no translations".to_string(),
                },
            },
            Err(e) => TranslateAttempt::Fatal {
                message: format!("microsoft response parse failed: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_success_with_subscription_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Ocp-Apim-Subscription-Key", "ms-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "translations": [{ "text": "Hola", "to": "es" }] }
            ])))
            .mount(&server)
            .await;

        let provider =
            MicrosoftProvider::new("ms-key".to_string(), None).with_api_url(server.uri());
        let attempt = provider
            .translate("Hello", "en", "es", None, Duration::from_secs(5))
            .await;
        assert!(matches!(attempt, TranslateAttempt::Translated { text, .. } if text == "Hola"));
    }
}
