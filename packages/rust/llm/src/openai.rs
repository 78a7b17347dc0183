//! Chat-completions backend for OpenAI-compatible endpoints.
//!
//! Covers both the `openai` and `grok` provider roles; they differ only
//! in base URL, model, and key env var.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use bookforge_shared::{BookForgeError, OpenAiCompatConfig, Result, api_key_from_env};

use crate::{GenRequest, TextGenerator, build_http_client};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    provider_label: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl OpenAiCompatBackend {
    pub fn from_config(config: &OpenAiCompatConfig, provider_label: &'static str) -> Result<Self> {
        let api_key = api_key_from_env(&config.api_key_env)?;
        Ok(Self {
            client: build_http_client(REQUEST_TIMEOUT)?,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            provider_label,
        })
    }

    #[cfg(test)]
    fn for_tests(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: "test-key".into(),
            model: "test-model".into(),
            base_url,
            provider_label: "openai",
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatBackend {
    #[instrument(skip_all, fields(provider = self.provider_label, model = %self.model))]
    async fn generate(&self, request: &GenRequest) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BookForgeError::Network(format!("{}: {e}", self.provider_label)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BookForgeError::Provider(format!(
                "{}: HTTP {status}: {detail}",
                self.provider_label
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            BookForgeError::Provider(format!("{}: bad response: {e}", self.provider_label))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(BookForgeError::Provider(format!(
                "{}: empty completion",
                self.provider_label
            )));
        }
        Ok(text)
    }

    fn provider(&self) -> &'static str {
        self.provider_label
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn generates_from_chat_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [
                    {"message": {"role": "assistant", "content": "Completed text"}}
                ]
            })))
            .mount(&server)
            .await;

        let backend = OpenAiCompatBackend::for_tests(server.uri());
        let out = backend
            .generate(&GenRequest::new("sys", "user"))
            .await
            .expect("generate");
        assert_eq!(out, "Completed text");
    }

    #[tokio::test]
    async fn missing_choices_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let backend = OpenAiCompatBackend::for_tests(server.uri());
        let err = backend
            .generate(&GenRequest::new("sys", "user"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookForgeError::Provider(_)));
    }
}
