//! Error types for BookForge.
//!
//! Library crates use [`BookForgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Expected stopping conditions carry typed payloads ([`FetchReason`],
//! [`CapKind`]) so callers can branch on them without string-matching
//! messages. Two conditions are deliberately *not* errors: an unparseable
//! silo classification (defaults to silo 0) and an unparseable swarm review
//! (degrades to a zero-score placeholder).

use std::path::PathBuf;

/// Why a source was rejected by fetch/clean or the ingest quality gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    /// The page looked like a bot-block or captcha wall.
    Blocked,
    /// Cleaned text fell below the minimum word threshold.
    TooShort,
    /// None of the topic's terms appeared in the text sample.
    OffTopic,
    /// The URL could not be parsed or dispatched (e.g. a social URL
    /// without a post id).
    InvalidUrl,
}

impl FetchReason {
    /// Stable code written into failure log records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::TooShort => "too_short",
            Self::OffTopic => "off_topic",
            Self::InvalidUrl => "invalid_url",
        }
    }
}

/// Which draft-accumulator cap was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapKind {
    /// A single chapter's per-silo word cap.
    Silo(u8),
    /// The total word cap across all chapters.
    Total,
}

impl CapKind {
    /// Stable code written into failure log records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Silo(_) => "draft_silo_cap",
            Self::Total => "draft_total_cap",
        }
    }
}

/// Top-level error type for all BookForge operations.
#[derive(Debug, thiserror::Error)]
pub enum BookForgeError {
    /// Configuration loading or validation error, including a missing
    /// API key for a selected provider.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP transport error.
    #[error("network error: {0}")]
    Network(String),

    /// A source was rejected by fetch/clean or an ingest quality gate.
    #[error("fetch rejected: {}", .0.code())]
    Fetch(FetchReason),

    /// A draft word cap would be exceeded; ingestion for the source stops.
    #[error("draft cap exceeded: {}", .0.code())]
    Cap(CapKind),

    /// The external API rate-limited us twice in a row.
    #[error("rate limited after retry")]
    RateLimited,

    /// Model backend error (bad response shape, empty completion).
    #[error("provider error: {0}")]
    Provider(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Response or document parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BookForgeError>;

impl BookForgeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable reason code for ingest failure records.
    ///
    /// Gate and cap rejections keep their specific codes; everything else
    /// collapses to a generic `failed`.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Fetch(reason) => reason.code(),
            Self::Cap(kind) => kind.code(),
            Self::RateLimited => "rate_limited",
            _ => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = BookForgeError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = BookForgeError::Fetch(FetchReason::TooShort);
        assert_eq!(err.to_string(), "fetch rejected: too_short");
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(
            BookForgeError::Fetch(FetchReason::Blocked).reason_code(),
            "blocked"
        );
        assert_eq!(
            BookForgeError::Cap(CapKind::Silo(3)).reason_code(),
            "draft_silo_cap"
        );
        assert_eq!(
            BookForgeError::Cap(CapKind::Total).reason_code(),
            "draft_total_cap"
        );
        assert_eq!(
            BookForgeError::Network("timeout".into()).reason_code(),
            "failed"
        );
    }
}
