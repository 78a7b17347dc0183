//! Application configuration for BookForge.
//!
//! User config lives at `~/.bookforge/bookforge.toml`.
//! CLI flags override config file values, which override defaults.
//! Draft caps additionally honor a runtime override file written next to
//! the topic store, so caps can be adjusted without editing the TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BookForgeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "bookforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".bookforge";

/// Runtime cap override file, stored under the topic storage root.
const RUNTIME_CAPS_FILE: &str = "runtime_caps.json";

// ---------------------------------------------------------------------------
// Config structs (matching bookforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Ingestion gates and budgets.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Draft accumulator word caps (static defaults).
    #[serde(default)]
    pub caps: DraftCaps,

    /// Social API settings.
    #[serde(default)]
    pub social: SocialConfig,

    /// Model backend selection and per-provider settings.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Autopilot loop defaults.
    #[serde(default)]
    pub autopilot: AutopilotConfig,

    /// Swarm drafting settings.
    #[serde(default)]
    pub swarm: SwarmConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory for per-topic filesystem storage.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// Path to the libSQL database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_path: default_database_path(),
        }
    }
}

fn default_storage_dir() -> String {
    "~/.bookforge/topics".into()
}
fn default_database_path() -> String {
    "~/.bookforge/bookforge.db".into()
}

/// `[ingest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Minimum word count for a fetched source to be worth a model call.
    #[serde(default = "default_min_words")]
    pub min_words: usize,

    /// Maximum characters per chunk handed to the classifier.
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,

    /// Social API call budget per ingest run.
    #[serde(default = "default_social_max_calls")]
    pub social_max_calls_per_run: usize,

    /// HTTP fetch timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            min_words: default_min_words(),
            chunk_max_chars: default_chunk_max_chars(),
            social_max_calls_per_run: default_social_max_calls(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_min_words() -> usize {
    300
}
fn default_chunk_max_chars() -> usize {
    3500
}
fn default_social_max_calls() -> usize {
    50
}
fn default_fetch_timeout() -> u64 {
    20
}

/// `[caps]` section — static defaults for the draft word caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftCaps {
    /// Word cap per chapter draft accumulator.
    #[serde(default = "default_silo_cap")]
    pub max_words_per_silo: usize,

    /// Word cap across all chapter draft accumulators.
    #[serde(default = "default_total_cap")]
    pub max_words_total: usize,
}

impl Default for DraftCaps {
    fn default() -> Self {
        Self {
            max_words_per_silo: default_silo_cap(),
            max_words_total: default_total_cap(),
        }
    }
}

fn default_silo_cap() -> usize {
    2_000
}
fn default_total_cap() -> usize {
    25_000
}

/// Partial runtime override for [`DraftCaps`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DraftCapsOverride {
    max_words_per_silo: Option<usize>,
    max_words_total: Option<usize>,
}

impl DraftCaps {
    /// Resolve effective caps: static defaults merged with the runtime
    /// override file under `storage_root`, if present.
    pub fn load(storage_root: &Path, defaults: DraftCaps) -> DraftCaps {
        let path = storage_root.join(RUNTIME_CAPS_FILE);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return defaults;
        };
        match serde_json::from_str::<DraftCapsOverride>(&content) {
            Ok(overrides) => DraftCaps {
                max_words_per_silo: overrides
                    .max_words_per_silo
                    .unwrap_or(defaults.max_words_per_silo),
                max_words_total: overrides
                    .max_words_total
                    .unwrap_or(defaults.max_words_total),
            },
            Err(e) => {
                tracing::warn!(?path, error = %e, "ignoring malformed runtime caps file");
                defaults
            }
        }
    }

    /// Persist these caps as the runtime override under `storage_root`.
    pub fn save(&self, storage_root: &Path) -> Result<()> {
        std::fs::create_dir_all(storage_root)
            .map_err(|e| BookForgeError::io(storage_root, e))?;
        let path = storage_root.join(RUNTIME_CAPS_FILE);
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| BookForgeError::parse(e.to_string()))?;
        std::fs::write(&path, content).map_err(|e| BookForgeError::io(&path, e))?;
        Ok(())
    }
}

/// `[social]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialConfig {
    /// Name of the env var holding the bearer token (never the token itself).
    #[serde(default = "default_bearer_env")]
    pub bearer_token_env: String,

    /// Minimum spacing between calls to the social API.
    #[serde(default = "default_social_spacing")]
    pub min_seconds_between_calls: f64,

    /// API base URL (overridable for tests and mirrors).
    #[serde(default = "default_social_base")]
    pub api_base_url: String,
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            bearer_token_env: default_bearer_env(),
            min_seconds_between_calls: default_social_spacing(),
            api_base_url: default_social_base(),
        }
    }
}

fn default_bearer_env() -> String {
    "BOOKFORGE_SOCIAL_BEARER_TOKEN".into()
}
fn default_social_spacing() -> f64 {
    2.0
}
fn default_social_base() -> String {
    "https://api.x.com/2".into()
}

/// Which model backend fills a given role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    Openai,
    Grok,
    Ollama,
    /// No backend for this role (valid for research only).
    None,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Grok => "grok",
            Self::Ollama => "ollama",
            Self::None => "none",
        }
    }
}

/// `[providers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Backend for chapter prose and reviews.
    #[serde(default = "default_writer_provider")]
    pub writer: ProviderKind,

    /// Backend for research memos (`none` disables memos).
    #[serde(default = "default_research_provider")]
    pub research: ProviderKind,

    /// Backend for classification and nugget extraction.
    #[serde(default = "default_classifier_provider")]
    pub classifier: ProviderKind,

    #[serde(default)]
    pub anthropic: AnthropicConfig,

    #[serde(default)]
    pub openai: OpenAiCompatConfig,

    #[serde(default)]
    pub grok: OpenAiCompatConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            writer: default_writer_provider(),
            research: default_research_provider(),
            classifier: default_classifier_provider(),
            anthropic: AnthropicConfig::default(),
            openai: OpenAiCompatConfig::default(),
            grok: OpenAiCompatConfig::grok_default(),
            ollama: OllamaConfig::default(),
        }
    }
}

fn default_writer_provider() -> ProviderKind {
    ProviderKind::Ollama
}
fn default_research_provider() -> ProviderKind {
    ProviderKind::None
}
fn default_classifier_provider() -> ProviderKind {
    ProviderKind::Ollama
}

/// `[providers.anthropic]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default = "default_anthropic_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
    #[serde(default = "default_anthropic_base")]
    pub base_url: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_anthropic_key_env(),
            model: default_anthropic_model(),
            base_url: default_anthropic_base(),
        }
    }
}

fn default_anthropic_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn default_anthropic_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_anthropic_base() -> String {
    "https://api.anthropic.com".into()
}

/// `[providers.openai]` / `[providers.grok]` section — any endpoint speaking
/// the chat-completions dialect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCompatConfig {
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_base")]
    pub base_url: String,
}

impl Default for OpenAiCompatConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openai_key_env(),
            model: default_openai_model(),
            base_url: default_openai_base(),
        }
    }
}

impl OpenAiCompatConfig {
    fn grok_default() -> Self {
        Self {
            api_key_env: "GROK_API_KEY".into(),
            model: "grok-3".into(),
            base_url: "https://api.x.ai".into(),
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_openai_model() -> String {
    "gpt-4o-mini".into()
}
fn default_openai_base() -> String {
    "https://api.openai.com".into()
}

/// `[providers.ollama]` section — locally hosted inference server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    #[serde(default = "default_ollama_timeout")]
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base(),
            model: default_ollama_model(),
            timeout_secs: default_ollama_timeout(),
        }
    }
}

fn default_ollama_base() -> String {
    "http://localhost:11434".into()
}
fn default_ollama_model() -> String {
    "llama3.1:8b".into()
}
fn default_ollama_timeout() -> u64 {
    120
}

/// `[autopilot]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopilotConfig {
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,

    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,

    /// Pending backlog size at which discovery breadth narrows.
    #[serde(default = "default_backlog_threshold")]
    pub backlog_threshold: usize,

    /// Per-feed discovery limit applied once the backlog threshold is hit.
    #[serde(default = "default_narrow_per_feed")]
    pub narrow_per_feed_limit: usize,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            cooldown_seconds: default_cooldown(),
            backlog_threshold: default_backlog_threshold(),
            narrow_per_feed_limit: default_narrow_per_feed(),
        }
    }
}

fn default_max_cycles() -> u32 {
    6
}
fn default_cooldown() -> u64 {
    30
}
fn default_backlog_threshold() -> usize {
    50
}
fn default_narrow_per_feed() -> usize {
    8
}

/// `[swarm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Chapters drafted concurrently.
    #[serde(default = "default_swarm_parallel")]
    pub max_parallel: usize,

    /// Pull recent social posts into chapter context.
    #[serde(default)]
    pub use_social: bool,

    /// Pull web-search snippets into chapter context.
    #[serde(default)]
    pub use_web: bool,

    /// Web snippets gathered per chapter.
    #[serde(default = "default_web_sources")]
    pub web_sources_per_chapter: usize,

    /// Words kept per web snippet.
    #[serde(default = "default_web_max_words")]
    pub web_max_words: usize,

    /// Author voice preset name passed to the writer prompt.
    #[serde(default = "default_voice_preset")]
    pub voice_preset: String,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_swarm_parallel(),
            use_social: false,
            use_web: false,
            web_sources_per_chapter: default_web_sources(),
            web_max_words: default_web_max_words(),
            voice_preset: default_voice_preset(),
        }
    }
}

fn default_swarm_parallel() -> usize {
    3
}
fn default_web_sources() -> usize {
    3
}
fn default_web_max_words() -> usize {
    400
}
fn default_voice_preset() -> String {
    "default".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.bookforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BookForgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.bookforge/bookforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BookForgeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        BookForgeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BookForgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BookForgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BookForgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

/// Read an API key from the env var named in config.
///
/// Missing or empty keys are a `Config` error scoped to the call that
/// needed the provider.
pub fn api_key_from_env(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(BookForgeError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}
