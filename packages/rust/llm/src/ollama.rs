//! Ollama backend for locally hosted models.
//!
//! Uses the non-streaming `/api/generate` endpoint. Ollama's generate
//! API takes a single prompt, so the system framing is prepended to the
//! user prompt.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use bookforge_shared::{BookForgeError, OllamaConfig, Result};

use crate::{GenRequest, TextGenerator, build_http_client};

pub struct OllamaBackend {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaBackend {
    pub fn from_config(config: &OllamaConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(Duration::from_secs(config.timeout_secs))?,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    #[cfg(test)]
    fn for_tests(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: "test-model".into(),
            base_url,
        }
    }
}

#[async_trait]
impl TextGenerator for OllamaBackend {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, request: &GenRequest) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let prompt = if request.system.is_empty() {
            request.user.clone()
        } else {
            format!("{}\n\n{}", request.system, request.user)
        };
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {"temperature": request.temperature, "num_predict": request.max_tokens},
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BookForgeError::Network(format!("ollama: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BookForgeError::Provider(format!(
                "ollama: HTTP {status}: {detail}"
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BookForgeError::Provider(format!("ollama: bad response: {e}")))?;

        if parsed.response.trim().is_empty() {
            return Err(BookForgeError::Provider("ollama: empty completion".into()));
        }
        Ok(parsed.response)
    }

    fn provider(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn generates_with_combined_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "prompt": "You are terse.\n\nSay hi",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "hi"
            })))
            .mount(&server)
            .await;

        let backend = OllamaBackend::for_tests(server.uri());
        let out = backend
            .generate(&GenRequest::new("You are terse.", "Say hi"))
            .await
            .expect("generate");
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn empty_response_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "  "})),
            )
            .mount(&server)
            .await;

        let backend = OllamaBackend::for_tests(server.uri());
        let err = backend
            .generate(&GenRequest::new("", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookForgeError::Provider(_)));
    }
}
