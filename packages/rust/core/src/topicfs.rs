//! Per-topic filesystem layout.
//!
//! Each topic lives under `<storage_dir>/<slug>`:
//!
//! ```text
//! silo_00/ .. silo_10/      draft.md, swarm_draft.md, swarm_draft.prev.md,
//!                           swarm_review.json, swarm_sources.json,
//!                           author_notes.txt
//! inbox/meta/sources.jsonl  append-only inbox log
//! metrics/                  ingest_success.jsonl, ingest_failures.jsonl,
//!                           autopilot.jsonl, swarm.jsonl,
//!                           autopilot_status.json, autopilot.stop
//! ```
//!
//! The ingestion accumulator (`draft.md`) and the swarm's final draft
//! (`swarm_draft.md`) are distinct files, so the two subsystems never
//! contend for the same write target.

use std::path::{Path, PathBuf};

use serde::Serialize;

use bookforge_shared::{AutopilotStatus, BookForgeError, Result, SILO_COUNT, silo_title};

/// Handle to one topic's on-disk layout. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TopicFs {
    root: PathBuf,
}

impl TopicFs {
    pub fn new(storage_root: &Path, slug: &str) -> Self {
        Self {
            root: storage_root.join(slug),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    pub fn silo_dir(&self, silo_number: u8) -> PathBuf {
        self.root.join(format!("silo_{silo_number:02}"))
    }

    /// The ingestion draft accumulator for a chapter.
    pub fn draft_path(&self, silo_number: u8) -> PathBuf {
        self.silo_dir(silo_number).join("draft.md")
    }

    /// The swarm's final chapter draft.
    pub fn swarm_draft_path(&self, silo_number: u8) -> PathBuf {
        self.silo_dir(silo_number).join("swarm_draft.md")
    }

    pub fn swarm_backup_path(&self, silo_number: u8) -> PathBuf {
        self.silo_dir(silo_number).join("swarm_draft.prev.md")
    }

    pub fn swarm_review_path(&self, silo_number: u8) -> PathBuf {
        self.silo_dir(silo_number).join("swarm_review.json")
    }

    pub fn swarm_sources_path(&self, silo_number: u8) -> PathBuf {
        self.silo_dir(silo_number).join("swarm_sources.json")
    }

    pub fn author_notes_path(&self, silo_number: u8) -> PathBuf {
        self.silo_dir(silo_number).join("author_notes.txt")
    }

    pub fn inbox_log_path(&self) -> PathBuf {
        self.root.join("inbox").join("meta").join("sources.jsonl")
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.root.join("metrics")
    }

    pub fn ingest_success_path(&self) -> PathBuf {
        self.metrics_dir().join("ingest_success.jsonl")
    }

    pub fn ingest_failures_path(&self) -> PathBuf {
        self.metrics_dir().join("ingest_failures.jsonl")
    }

    pub fn autopilot_log_path(&self) -> PathBuf {
        self.metrics_dir().join("autopilot.jsonl")
    }

    pub fn swarm_log_path(&self) -> PathBuf {
        self.metrics_dir().join("swarm.jsonl")
    }

    pub fn autopilot_status_path(&self) -> PathBuf {
        self.metrics_dir().join("autopilot_status.json")
    }

    pub fn stop_sentinel_path(&self) -> PathBuf {
        self.metrics_dir().join("autopilot.stop")
    }

    // -----------------------------------------------------------------------
    // Structure
    // -----------------------------------------------------------------------

    /// Create the full directory layout; idempotent. Seeds each chapter's
    /// `draft.md` with a title heading when absent, never touching an
    /// existing accumulator.
    pub fn ensure_structure(&self) -> Result<()> {
        for silo in 0..SILO_COUNT {
            let dir = self.silo_dir(silo);
            std::fs::create_dir_all(&dir).map_err(|e| BookForgeError::io(&dir, e))?;

            let draft = self.draft_path(silo);
            if !draft.exists() {
                let heading = format!("# {}\n\n", silo_title(silo));
                std::fs::write(&draft, heading).map_err(|e| BookForgeError::io(&draft, e))?;
            }
        }

        let inbox_meta = self.root.join("inbox").join("meta");
        std::fs::create_dir_all(&inbox_meta).map_err(|e| BookForgeError::io(&inbox_meta, e))?;

        let metrics = self.metrics_dir();
        std::fs::create_dir_all(&metrics).map_err(|e| BookForgeError::io(&metrics, e))?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads and writes
    // -----------------------------------------------------------------------

    /// Append one record to a JSONL file, creating parent dirs as needed.
    pub fn append_jsonl<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BookForgeError::io(parent, e))?;
        }
        let mut line = serde_json::to_string(record)
            .map_err(|e| BookForgeError::parse(e.to_string()))?;
        line.push('\n');

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| BookForgeError::io(path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| BookForgeError::io(path, e))?;
        Ok(())
    }

    /// File contents, or empty string when absent.
    pub fn read_or_empty(&self, path: &Path) -> String {
        std::fs::read_to_string(path).unwrap_or_default()
    }

    /// Whitespace-word count of a file; 0 when absent.
    pub fn word_count(&self, path: &Path) -> usize {
        self.read_or_empty(path).split_whitespace().count()
    }

    /// Words in a single chapter's draft accumulator.
    pub fn silo_draft_words(&self, silo_number: u8) -> usize {
        self.word_count(&self.draft_path(silo_number))
    }

    /// Total draft accumulator words across all chapters.
    pub fn draft_total_words(&self) -> usize {
        (0..SILO_COUNT)
            .map(|silo| self.silo_draft_words(silo))
            .sum()
    }

    /// Author's free-form notes for a chapter (empty when unset).
    pub fn author_notes(&self, silo_number: u8) -> String {
        self.read_or_empty(&self.author_notes_path(silo_number))
    }

    /// Overwrite the autopilot status snapshot.
    pub fn write_status(&self, status: &AutopilotStatus) -> Result<()> {
        let path = self.autopilot_status_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BookForgeError::io(parent, e))?;
        }
        let content = serde_json::to_string_pretty(status)
            .map_err(|e| BookForgeError::parse(e.to_string()))?;
        std::fs::write(&path, content).map_err(|e| BookForgeError::io(&path, e))?;
        Ok(())
    }

    /// The last written status snapshot, if any.
    pub fn read_status(&self) -> Option<AutopilotStatus> {
        let content = std::fs::read_to_string(self.autopilot_status_path()).ok()?;
        serde_json::from_str(&content).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn temp_fs() -> TopicFs {
        let root = std::env::temp_dir().join(format!("bf-topicfs-{}", Uuid::now_v7()));
        TopicFs::new(&root, "test-topic")
    }

    #[test]
    fn ensure_structure_is_idempotent_and_preserves_drafts() {
        let fs = temp_fs();
        fs.ensure_structure().expect("first ensure");

        assert!(fs.draft_path(0).exists());
        assert!(fs.draft_path(10).exists());
        assert!(fs.metrics_dir().exists());
        assert_eq!(
            fs.read_or_empty(&fs.draft_path(4)),
            "# Step-By-Step Build\n\n"
        );

        // Write into a draft, re-ensure, content survives.
        std::fs::write(fs.draft_path(4), "# Step-By-Step Build\n\nReal content").unwrap();
        fs.ensure_structure().expect("second ensure");
        assert!(fs.read_or_empty(&fs.draft_path(4)).contains("Real content"));

        let _ = std::fs::remove_dir_all(fs.root().parent().unwrap());
    }

    #[test]
    fn word_counts_sum_across_silos() {
        let fs = temp_fs();
        fs.ensure_structure().unwrap();

        std::fs::write(fs.draft_path(1), "one two three").unwrap();
        std::fs::write(fs.draft_path(2), "four five").unwrap();

        assert_eq!(fs.silo_draft_words(1), 3);
        assert_eq!(fs.silo_draft_words(2), 2);
        // Remaining silos hold their seeded headings.
        let expected: usize = 5 + (0..SILO_COUNT)
            .filter(|s| *s != 1 && *s != 2)
            .map(|s| fs.silo_draft_words(s))
            .sum::<usize>();
        assert_eq!(fs.draft_total_words(), expected);

        let _ = std::fs::remove_dir_all(fs.root().parent().unwrap());
    }

    #[test]
    fn jsonl_appends_one_line_per_record() {
        let fs = temp_fs();
        fs.ensure_structure().unwrap();

        let path = fs.ingest_success_path();
        fs.append_jsonl(&path, &serde_json::json!({"n": 1})).unwrap();
        fs.append_jsonl(&path, &serde_json::json!({"n": 2})).unwrap();

        let content = fs.read_or_empty(&path);
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"n\":2"));

        let _ = std::fs::remove_dir_all(fs.root().parent().unwrap());
    }

    #[test]
    fn status_snapshot_roundtrip() {
        let fs = temp_fs();
        fs.ensure_structure().unwrap();
        assert!(fs.read_status().is_none());

        let status = AutopilotStatus {
            running: true,
            last_cycle: 2,
            updated_at: Utc::now(),
            draft_words: 123,
        };
        fs.write_status(&status).unwrap();

        let read = fs.read_status().expect("status exists");
        assert!(read.running);
        assert_eq!(read.last_cycle, 2);
        assert_eq!(read.draft_words, 123);

        let _ = std::fs::remove_dir_all(fs.root().parent().unwrap());
    }
}
