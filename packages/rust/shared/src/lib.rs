//! Shared types, error model, and configuration for BookForge.
//!
//! This crate is the foundation depended on by all other BookForge crates.
//! It provides:
//! - [`BookForgeError`] — the unified error type with tagged gate/cap reasons
//! - Domain types ([`SourceDoc`], [`ChapterBrief`], [`IdeaItem`], run records)
//! - The fixed chapter taxonomy ([`SILO_TITLES`])
//! - Configuration ([`AppConfig`], [`DraftCaps`], config loading)

pub mod config;
pub mod error;
pub mod topic;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnthropicConfig, AppConfig, AutopilotConfig, DefaultsConfig, DraftCaps, IngestConfig,
    OllamaConfig, OpenAiCompatConfig, ProviderKind, ProvidersConfig, SocialConfig, SwarmConfig,
    api_key_from_env, config_dir, config_file_path, expand_path, init_config, load_config,
    load_config_from,
};
pub use error::{BookForgeError, CapKind, FetchReason, Result};
pub use topic::{normalize_terms, slugify, text_mentions_term};
pub use types::{
    AutopilotStatus, ChapterBrief, CycleRecord, IdeaItem, IdeaStatus, IngestStats, SILO_COUNT,
    SILO_TITLES, SourceDoc, SourceStatus, SwarmChapterResult, forced_silo, silo_title,
};
