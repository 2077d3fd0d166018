//! Self-hosted LLM translation provider (primary tier)
//!
//! Talks to an OpenAI-compatible chat completions endpoint. The system
//! prompt pins the task to translation only; optional caller context is
//! forwarded to disambiguate short strings.

use super::{classify_status, classify_transport, TranslateAttempt, TranslateProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct LlmProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl LlmProvider {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl TranslateProvider for LlmProvider {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        context: Option<&str>,
        timeout: Duration,
    ) -> TranslateAttempt {
        let mut system = format!(
            "You are a translation engine. Translate the user's text from {} to {}. \
             Preserve any HTML tags exactly. Reply with the translation only.",
            source_lang, target_lang
        );
        if let Some(context) = context {
            system.push_str(&format!(" Context: {}", context));
        }

        let body = json!({
            "model": "default",
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": text },
            ],
        });

        let started = Instant::now();
        let mut request = self.client.post(&self.endpoint).timeout(timeout).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
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

        match response.json::<ChatResponse>().await {
            Ok(parsed) => match parsed.choices.into_iter().next() {
                Some(choice) => TranslateAttempt::Translated {
                    text: choice.message.content.trim().to_string(),
                    latency_ms: started.elapsed().as_millis() as u64,
                },
                None => TranslateAttempt::Fatal {
                    message: "llm returned no choices".to_string(),
                },
            },
            Err(e) => TranslateAttempt::Fatal {
                message: format!("llm response parse failed: {}", e),
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
    async fn test_translates_from_chat_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": " Ahoj světe " } }]
            })))
            .mount(&server)
            .await;

        let provider = LlmProvider::new(server.uri(), None);
        let attempt = provider
            .translate("Hello world", "en", "cs", None, Duration::from_secs(5))
            .await;

        match attempt {
            TranslateAttempt::Translated { text, .. } => assert_eq!(text, "Ahoj světe"),
            other => panic!("expected translation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_5xx_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let provider = LlmProvider::new(server.uri(), None);
        let attempt = provider
            .translate("Hello", "en", "cs", None, Duration::from_secs(5))
            .await;
        assert!(matches!(attempt, TranslateAttempt::Retryable { .. }));
    }
}
