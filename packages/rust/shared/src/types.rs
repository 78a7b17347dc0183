//! Core domain types for BookForge topics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of chapter silos, including silo 0 (unclassified).
pub const SILO_COUNT: u8 = 11;

/// Fixed chapter taxonomy. Index 0 is the unclassified bucket; 1–10 are the
/// thematic chapters every book is organized under.
pub const SILO_TITLES: [&str; SILO_COUNT as usize] = [
    "Unclassified",
    "The Why Now Brief",
    "The 1-Hour Quick Start",
    "Core Concepts Without the Fluff",
    "Step-By-Step Build",
    "Real-World Use Cases",
    "Gotchas, Fail States, Troubleshooting",
    "Security, Privacy, Risks, Compliance",
    "Performance, Scale, Cost Control",
    "Tooling, Templates, Checklists",
    "Roadmap, What's Next, Series Hooks",
];

/// Title for a silo number, falling back to "Unclassified" for out-of-range
/// values.
pub fn silo_title(silo_number: u8) -> &'static str {
    SILO_TITLES
        .get(silo_number as usize)
        .copied()
        .unwrap_or(SILO_TITLES[0])
}

/// If an origin label pins a source to a silo (`silo:N`), return that silo.
///
/// Discovery collaborators use this convention to force-route a candidate
/// past the classifier.
pub fn forced_silo(origin: &str) -> Option<u8> {
    let rest = origin.strip_prefix("silo:")?;
    let n: u8 = rest.trim().parse().ok()?;
    (n < SILO_COUNT).then_some(n)
}

// ---------------------------------------------------------------------------
// SourceDoc
// ---------------------------------------------------------------------------

/// Lifecycle of a queued source URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Extracted,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracted => "extracted",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "extracted" => Ok(Self::Extracted),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown source status: {other}")),
        }
    }
}

/// A queued source URL for a topic, stored in the database.
///
/// Invariant: at most one row per (topic, url) pair. Created by the source
/// queue; only the ingest runner mutates `status` afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDoc {
    /// Unique identifier (UUID v7).
    pub id: String,
    /// Owning topic slug.
    pub topic_slug: String,
    /// Source URL.
    pub url: String,
    /// Host extracted from the URL.
    pub domain: String,
    /// Origin label ("discovery", "manual", "silo:N", ...).
    pub origin: String,
    /// Current lifecycle state.
    pub status: SourceStatus,
    /// When the source was queued.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ChapterBrief / IdeaItem
// ---------------------------------------------------------------------------

/// Per-chapter editorial brief, lazily created with taxonomy defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterBrief {
    pub topic_slug: String,
    pub silo_number: u8,
    pub title: String,
    pub goal: String,
    /// Ordered outline bullet points.
    pub outline: Vec<String>,
    pub notes: String,
    pub status: String,
}

impl ChapterBrief {
    /// Default brief for a silo, used by the idempotent `ensure` upsert.
    pub fn taxonomy_default(topic_slug: &str, silo_number: u8) -> Self {
        Self {
            topic_slug: topic_slug.to_string(),
            silo_number,
            title: silo_title(silo_number).to_string(),
            goal: String::new(),
            outline: Vec::new(),
            notes: String::new(),
            status: "draft".into(),
        }
    }
}

/// Lifecycle of an idea in the backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdeaStatus {
    Backlog,
    Assigned,
}

impl IdeaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Assigned => "assigned",
        }
    }
}

/// A free-text idea, optionally assigned to a chapter silo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaItem {
    pub id: String,
    pub topic_slug: String,
    pub text: String,
    pub status: IdeaStatus,
    /// Assigned silo, if any.
    pub silo_number: Option<u8>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Run statistics & log records
// ---------------------------------------------------------------------------

/// Summary of one ingest run over a topic's pending sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    /// Sources attempted (skipped-over-budget sources are not counted).
    pub processed: usize,
    /// Sources fully extracted into chapter drafts.
    pub extracted: usize,
    /// Sources that failed a gate, a cap, or the fetch itself.
    pub failed: usize,
    /// Social API sources consumed from the per-run budget.
    pub social_calls: usize,
    /// Wall-clock duration in seconds.
    pub duration_seconds: f64,
}

/// One immutable autopilot cycle record, appended to `autopilot.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub timestamp: DateTime<Utc>,
    pub cycle: u32,
    /// New sources queued this cycle.
    pub queued: usize,
    /// Discovery candidates seen (before dedup).
    pub candidates: usize,
    pub pending_before: usize,
    pub pending_after: usize,
    /// Total draft words across all silos after this cycle.
    pub draft_words: usize,
    pub duration_seconds: f64,
    pub ingest: IngestStats,
}

/// Mutable autopilot status snapshot, overwritten each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopilotStatus {
    pub running: bool,
    pub last_cycle: u32,
    pub updated_at: DateTime<Utc>,
    pub draft_words: usize,
}

/// Per-chapter result record for a swarm run, appended to `swarm.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmChapterResult {
    pub timestamp: DateTime<Utc>,
    pub silo_number: u8,
    pub title: String,
    pub duration_seconds: f64,
    pub word_count: usize,
    pub review_score: i64,
    pub social_posts: usize,
    pub web_sources: usize,
    pub writer_provider: String,
    pub writer_model: String,
    pub research_provider: String,
    pub research_model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silo_title_lookup() {
        assert_eq!(silo_title(0), "Unclassified");
        assert_eq!(silo_title(4), "Step-By-Step Build");
        // Out-of-range falls back to unclassified.
        assert_eq!(silo_title(42), "Unclassified");
    }

    #[test]
    fn forced_silo_parses_convention() {
        assert_eq!(forced_silo("silo:7"), Some(7));
        assert_eq!(forced_silo("silo: 3"), Some(3));
        assert_eq!(forced_silo("silo:11"), None);
        assert_eq!(forced_silo("discovery"), None);
        assert_eq!(forced_silo("manual"), None);
    }

    #[test]
    fn source_status_roundtrip() {
        for status in [
            SourceStatus::Pending,
            SourceStatus::Extracted,
            SourceStatus::Failed,
        ] {
            let parsed: SourceStatus = status.as_str().parse().expect("parse status");
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<SourceStatus>().is_err());
    }

    #[test]
    fn cycle_record_serialization() {
        let record = CycleRecord {
            timestamp: Utc::now(),
            cycle: 3,
            queued: 5,
            candidates: 12,
            pending_before: 9,
            pending_after: 6,
            draft_words: 1840,
            duration_seconds: 2.5,
            ingest: IngestStats {
                processed: 8,
                extracted: 6,
                failed: 2,
                social_calls: 1,
                duration_seconds: 2.1,
            },
        };
        let json = serde_json::to_string(&record).expect("serialize");
        let parsed: CycleRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.cycle, 3);
        assert_eq!(parsed.ingest.extracted, 6);
    }
}
