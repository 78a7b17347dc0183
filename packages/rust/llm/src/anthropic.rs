//! Anthropic Messages API backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use bookforge_shared::{AnthropicConfig, BookForgeError, Result, api_key_from_env};

use crate::{GenRequest, TextGenerator, build_http_client};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl AnthropicBackend {
    pub fn from_config(config: &AnthropicConfig) -> Result<Self> {
        let api_key = api_key_from_env(&config.api_key_env)?;
        Ok(Self {
            client: build_http_client(REQUEST_TIMEOUT)?,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    #[cfg(test)]
    fn for_tests(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: "test-key".into(),
            model: "test-model".into(),
            base_url,
        }
    }
}

#[async_trait]
impl TextGenerator for AnthropicBackend {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, request: &GenRequest) -> Result<String> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system,
            "messages": [{"role": "user", "content": request.user}],
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| BookForgeError::Network(format!("anthropic: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BookForgeError::Provider(format!(
                "anthropic: HTTP {status}: {detail}"
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| BookForgeError::Provider(format!("anthropic: bad response: {e}")))?;

        let text = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(BookForgeError::Provider("anthropic: empty completion".into()));
        }
        Ok(text)
    }

    fn provider(&self) -> &'static str {
        "anthropic"
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
    async fn generates_from_messages_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [
                    {"type": "text", "text": "Hello "},
                    {"type": "text", "text": "world"}
                ]
            })))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::for_tests(server.uri());
        let out = backend
            .generate(&GenRequest::new("sys", "user"))
            .await
            .expect("generate");
        assert_eq!(out, "Hello world");
    }

    #[tokio::test]
    async fn empty_completion_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"content": []})),
            )
            .mount(&server)
            .await;

        let backend = AnthropicBackend::for_tests(server.uri());
        let err = backend
            .generate(&GenRequest::new("sys", "user"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookForgeError::Provider(_)));
    }

    #[tokio::test]
    async fn api_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::for_tests(server.uri());
        let err = backend
            .generate(&GenRequest::new("sys", "user"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("529"));
    }
}
