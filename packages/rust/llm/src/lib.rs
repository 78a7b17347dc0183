//! Model backends for BookForge.
//!
//! Every provider implements [`TextGenerator`]; pipeline code holds
//! `Arc<dyn TextGenerator>` and never branches on provider names. The
//! [`build_backend`] factory maps a configured [`ProviderKind`] to a
//! concrete backend, resolving API keys from the environment at build
//! time so a missing key fails the command that needed the provider,
//! not an unrelated one.

mod anthropic;
mod ollama;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;

use bookforge_shared::{BookForgeError, ProviderKind, ProvidersConfig, Result};

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiCompatBackend;

// ---------------------------------------------------------------------------
// TextGenerator
// ---------------------------------------------------------------------------

/// One generation request: a system prompt framing the task and a user
/// prompt carrying the material.
#[derive(Debug, Clone)]
pub struct GenRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 4_096,
            temperature: 0.7,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A text-generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion. An empty completion is a `Provider` error.
    async fn generate(&self, request: &GenRequest) -> Result<String>;

    /// Provider label for log records ("anthropic", "ollama", ...).
    fn provider(&self) -> &'static str;

    /// Model identifier for log records.
    fn model(&self) -> &str;
}

impl std::fmt::Debug for dyn TextGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextGenerator")
            .field("provider", &self.provider())
            .field("model", &self.model())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Backend factory
// ---------------------------------------------------------------------------

/// Build the backend configured for a role.
///
/// Returns `Ok(None)` for [`ProviderKind::None`], letting optional roles
/// (research) be disabled in config.
pub fn build_backend(
    providers: &ProvidersConfig,
    kind: ProviderKind,
) -> Result<Option<Arc<dyn TextGenerator>>> {
    let backend: Arc<dyn TextGenerator> = match kind {
        ProviderKind::None => return Ok(None),
        ProviderKind::Anthropic => Arc::new(AnthropicBackend::from_config(&providers.anthropic)?),
        ProviderKind::Openai => Arc::new(OpenAiCompatBackend::from_config(
            &providers.openai,
            "openai",
        )?),
        ProviderKind::Grok => Arc::new(OpenAiCompatBackend::from_config(&providers.grok, "grok")?),
        ProviderKind::Ollama => Arc::new(OllamaBackend::from_config(&providers.ollama)?),
    };
    Ok(Some(backend))
}

/// Like [`build_backend`], but a disabled role is an error. Used for
/// roles that must exist (writer, classifier).
pub fn require_backend(
    providers: &ProvidersConfig,
    kind: ProviderKind,
    role: &str,
) -> Result<Arc<dyn TextGenerator>> {
    build_backend(providers, kind)?.ok_or_else(|| {
        BookForgeError::config(format!("provider for role `{role}` is set to `none`"))
    })
}

pub(crate) fn build_http_client(timeout: std::time::Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BookForgeError::Network(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_provider_builds_nothing() {
        let providers = ProvidersConfig::default();
        let backend = build_backend(&providers, ProviderKind::None).expect("build");
        assert!(backend.is_none());
    }

    #[test]
    fn require_backend_rejects_none() {
        let providers = ProvidersConfig::default();
        let err = require_backend(&providers, ProviderKind::None, "writer").unwrap_err();
        assert!(err.to_string().contains("writer"));
    }

    #[test]
    fn ollama_needs_no_api_key() {
        let providers = ProvidersConfig::default();
        let backend = build_backend(&providers, ProviderKind::Ollama)
            .expect("build")
            .expect("backend");
        assert_eq!(backend.provider(), "ollama");
    }
}
