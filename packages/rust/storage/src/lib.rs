//! libSQL storage layer for BookForge.
//!
//! The [`Storage`] struct wraps a libSQL database holding topics, queued
//! source URLs, chapter briefs, and the idea backlog. Draft text itself
//! lives on the filesystem (see `bookforge-core`); the database carries the
//! queue and editorial metadata the pipeline coordinates on.
//!
//! The ingest runner relies on [`Storage::set_source_status`] being a
//! single-row update so each source's progress is durable on its own.

mod migrations;

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use uuid::Uuid;

use bookforge_shared::{
    BookForgeError, ChapterBrief, IdeaItem, IdeaStatus, Result, SourceDoc, SourceStatus,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BookForgeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    BookForgeError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Topic operations
    // -----------------------------------------------------------------------

    /// Insert a new topic record.
    pub async fn insert_topic(&self, slug: &str, name: &str, keywords: &[String]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let keywords_json = serde_json::to_string(keywords)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO topics (slug, name, keywords_json, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![slug, name, keywords_json.as_str(), now.as_str()],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get a topic by slug. Returns `(name, keywords)`.
    pub async fn get_topic(&self, slug: &str) -> Result<Option<(String, Vec<String>)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, keywords_json FROM topics WHERE slug = ?1",
                params![slug],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let name: String = row
                    .get(0)
                    .map_err(|e| BookForgeError::Storage(e.to_string()))?;
                let keywords_json: String = row
                    .get(1)
                    .map_err(|e| BookForgeError::Storage(e.to_string()))?;
                let keywords: Vec<String> =
                    serde_json::from_str(&keywords_json).unwrap_or_default();
                Ok(Some((name, keywords)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(BookForgeError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Source queue operations
    // -----------------------------------------------------------------------

    /// The set of URLs already known for a topic, regardless of status.
    pub async fn existing_urls(&self, topic_slug: &str) -> Result<HashSet<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url FROM source_docs WHERE topic_slug = ?1",
                params![topic_slug],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;

        let mut urls = HashSet::new();
        while let Ok(Some(row)) = rows.next().await {
            let url: String = row
                .get(0)
                .map_err(|e| BookForgeError::Storage(e.to_string()))?;
            urls.insert(url);
        }
        Ok(urls)
    }

    /// Insert a new source document.
    pub async fn insert_source(&self, source: &SourceDoc) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO source_docs (id, topic_slug, url, domain, origin, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    source.id.as_str(),
                    source.topic_slug.as_str(),
                    source.url.as_str(),
                    source.domain.as_str(),
                    source.origin.as_str(),
                    source.status.as_str(),
                    source.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;
        Ok(())
    }

    /// List pending sources for a topic, oldest first.
    pub async fn list_pending(&self, topic_slug: &str) -> Result<Vec<SourceDoc>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, topic_slug, url, domain, origin, status, created_at
                 FROM source_docs WHERE topic_slug = ?1 AND status = 'pending'
                 ORDER BY created_at, id",
                params![topic_slug],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_source(&row)?);
        }
        Ok(results)
    }

    /// Count pending sources for a topic.
    pub async fn count_pending(&self, topic_slug: &str) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM source_docs
                 WHERE topic_slug = ?1 AND status = 'pending'",
                params![topic_slug],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| BookForgeError::Storage(e.to_string()))?;
                Ok(count as usize)
            }
            _ => Ok(0),
        }
    }

    /// Update a single source's status. One row, one statement — each
    /// source's transition commits independently of the rest of a run.
    pub async fn set_source_status(&self, source_id: &str, status: SourceStatus) -> Result<()> {
        self.conn
            .execute(
                "UPDATE source_docs SET status = ?1 WHERE id = ?2",
                params![status.as_str(), source_id],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Chapter brief operations
    // -----------------------------------------------------------------------

    /// Insert a brief if none exists for its (topic, silo). Idempotent.
    pub async fn ensure_brief(&self, brief: &ChapterBrief) -> Result<()> {
        let outline_json = serde_json::to_string(&brief.outline)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;
        let id = Uuid::now_v7().to_string();
        self.conn
            .execute(
                "INSERT INTO chapter_briefs (id, topic_slug, silo_number, title, goal, outline_json, notes, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(topic_slug, silo_number) DO NOTHING",
                params![
                    id.as_str(),
                    brief.topic_slug.as_str(),
                    i64::from(brief.silo_number),
                    brief.title.as_str(),
                    brief.goal.as_str(),
                    outline_json.as_str(),
                    brief.notes.as_str(),
                    brief.status.as_str(),
                ],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get the brief for a (topic, silo), if any.
    pub async fn get_brief(&self, topic_slug: &str, silo_number: u8) -> Result<Option<ChapterBrief>> {
        let mut rows = self
            .conn
            .query(
                "SELECT topic_slug, silo_number, title, goal, outline_json, notes, status
                 FROM chapter_briefs WHERE topic_slug = ?1 AND silo_number = ?2",
                params![topic_slug, i64::from(silo_number)],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_brief(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(BookForgeError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Idea operations
    // -----------------------------------------------------------------------

    /// Insert an idea into the backlog.
    pub async fn insert_idea(&self, idea: &IdeaItem) -> Result<()> {
        let tags_json = serde_json::to_string(&idea.tags)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO ideas (id, topic_slug, text, status, silo_number, tags_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    idea.id.as_str(),
                    idea.topic_slug.as_str(),
                    idea.text.as_str(),
                    idea.status.as_str(),
                    idea.silo_number.map(i64::from),
                    tags_json.as_str(),
                    idea.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Ideas assigned to a specific silo.
    pub async fn list_ideas_for_silo(
        &self,
        topic_slug: &str,
        silo_number: u8,
    ) -> Result<Vec<IdeaItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, topic_slug, text, status, silo_number, tags_json, created_at
                 FROM ideas WHERE topic_slug = ?1 AND silo_number = ?2
                 ORDER BY created_at, id",
                params![topic_slug, i64::from(silo_number)],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_idea(&row)?);
        }
        Ok(results)
    }

    /// Ideas with no silo assignment.
    pub async fn list_unassigned_ideas(&self, topic_slug: &str) -> Result<Vec<IdeaItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, topic_slug, text, status, silo_number, tags_json, created_at
                 FROM ideas WHERE topic_slug = ?1 AND silo_number IS NULL
                 ORDER BY created_at, id",
                params![topic_slug],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_idea(&row)?);
        }
        Ok(results)
    }

    /// Ideas still in backlog state.
    pub async fn list_backlog_ideas(&self, topic_slug: &str) -> Result<Vec<IdeaItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, topic_slug, text, status, silo_number, tags_json, created_at
                 FROM ideas WHERE topic_slug = ?1 AND status = 'backlog'
                 ORDER BY created_at, id",
                params![topic_slug],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_idea(&row)?);
        }
        Ok(results)
    }

    /// Assign an idea to a silo and mark it assigned.
    pub async fn assign_idea(&self, idea_id: &str, silo_number: u8) -> Result<()> {
        self.conn
            .execute(
                "UPDATE ideas SET silo_number = ?1, status = 'assigned' WHERE id = ?2",
                params![i64::from(silo_number), idea_id],
            )
            .await
            .map_err(|e| BookForgeError::Storage(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_source(row: &libsql::Row) -> Result<SourceDoc> {
    let status_str: String = row
        .get(5)
        .map_err(|e| BookForgeError::Storage(e.to_string()))?;
    Ok(SourceDoc {
        id: row
            .get::<String>(0)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?,
        topic_slug: row
            .get::<String>(1)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?,
        url: row
            .get::<String>(2)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?,
        domain: row
            .get::<String>(3)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?,
        origin: row
            .get::<String>(4)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?,
        status: status_str
            .parse()
            .map_err(BookForgeError::Storage)?,
        created_at: parse_timestamp(row, 6)?,
    })
}

fn row_to_brief(row: &libsql::Row) -> Result<ChapterBrief> {
    let outline_json: String = row
        .get(4)
        .map_err(|e| BookForgeError::Storage(e.to_string()))?;
    Ok(ChapterBrief {
        topic_slug: row
            .get::<String>(0)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?,
        silo_number: row
            .get::<i64>(1)
            .map_err(|e| BookForgeError::Storage(e.to_string()))? as u8,
        title: row
            .get::<String>(2)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?,
        goal: row
            .get::<String>(3)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?,
        outline: serde_json::from_str(&outline_json).unwrap_or_default(),
        notes: row
            .get::<String>(5)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?,
        status: row
            .get::<String>(6)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?,
    })
}

fn row_to_idea(row: &libsql::Row) -> Result<IdeaItem> {
    let status_str: String = row
        .get(3)
        .map_err(|e| BookForgeError::Storage(e.to_string()))?;
    let status = match status_str.as_str() {
        "assigned" => IdeaStatus::Assigned,
        _ => IdeaStatus::Backlog,
    };
    let tags_json: String = row
        .get(5)
        .map_err(|e| BookForgeError::Storage(e.to_string()))?;
    Ok(IdeaItem {
        id: row
            .get::<String>(0)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?,
        topic_slug: row
            .get::<String>(1)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?,
        text: row
            .get::<String>(2)
            .map_err(|e| BookForgeError::Storage(e.to_string()))?,
        status,
        silo_number: row.get::<i64>(4).ok().map(|v| v as u8),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        created_at: parse_timestamp(row, 6)?,
    })
}

fn parse_timestamp(row: &libsql::Row, idx: i32) -> Result<chrono::DateTime<chrono::Utc>> {
    let s: String = row
        .get(idx)
        .map_err(|e| BookForgeError::Storage(e.to_string()))?;
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| BookForgeError::Storage(format!("invalid date: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookforge_shared::silo_title;
    use chrono::Utc;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("bf_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn test_source(topic: &str, url: &str) -> SourceDoc {
        SourceDoc {
            id: Uuid::now_v7().to_string(),
            topic_slug: topic.into(),
            url: url.into(),
            domain: "example.com".into(),
            origin: "manual".into(),
            status: SourceStatus::Pending,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("bf_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn topic_crud() {
        let storage = test_storage().await;
        storage
            .insert_topic("rust-async", "Rust Async", &["tokio".into()])
            .await
            .expect("insert topic");

        let topic = storage.get_topic("rust-async").await.expect("get topic");
        let (name, keywords) = topic.expect("topic exists");
        assert_eq!(name, "Rust Async");
        assert_eq!(keywords, vec!["tokio"]);

        assert!(storage.get_topic("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn source_queue_lifecycle() {
        let storage = test_storage().await;
        storage.insert_topic("t", "Topic", &[]).await.unwrap();

        let source = test_source("t", "https://example.com/a");
        storage.insert_source(&source).await.expect("insert");

        let pending = storage.list_pending("t").await.expect("list pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "https://example.com/a");
        assert_eq!(pending[0].status, SourceStatus::Pending);
        assert_eq!(storage.count_pending("t").await.unwrap(), 1);

        storage
            .set_source_status(&source.id, SourceStatus::Extracted)
            .await
            .expect("set status");
        assert_eq!(storage.count_pending("t").await.unwrap(), 0);
        assert!(storage.list_pending("t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_url_rejected() {
        let storage = test_storage().await;
        storage.insert_topic("t", "Topic", &[]).await.unwrap();

        storage
            .insert_source(&test_source("t", "https://example.com/a"))
            .await
            .unwrap();
        // Same (topic, url) violates the unique constraint.
        let dup = storage
            .insert_source(&test_source("t", "https://example.com/a"))
            .await;
        assert!(dup.is_err());

        let urls = storage.existing_urls("t").await.unwrap();
        assert_eq!(urls.len(), 1);
        assert!(urls.contains("https://example.com/a"));
    }

    #[tokio::test]
    async fn ensure_brief_is_idempotent() {
        let storage = test_storage().await;
        storage.insert_topic("t", "Topic", &[]).await.unwrap();

        let brief = ChapterBrief::taxonomy_default("t", 3);
        storage.ensure_brief(&brief).await.expect("first ensure");

        // A second ensure with different content must not overwrite.
        let mut changed = brief.clone();
        changed.goal = "should not land".into();
        storage.ensure_brief(&changed).await.expect("second ensure");

        let stored = storage.get_brief("t", 3).await.unwrap().expect("brief");
        assert_eq!(stored.title, silo_title(3));
        assert_eq!(stored.goal, "");
    }

    #[tokio::test]
    async fn idea_assignment() {
        let storage = test_storage().await;
        storage.insert_topic("t", "Topic", &[]).await.unwrap();

        let idea = IdeaItem {
            id: Uuid::now_v7().to_string(),
            topic_slug: "t".into(),
            text: "cover backpressure".into(),
            status: IdeaStatus::Backlog,
            silo_number: None,
            tags: vec!["concurrency".into()],
            created_at: Utc::now(),
        };
        storage.insert_idea(&idea).await.expect("insert idea");

        assert_eq!(storage.list_unassigned_ideas("t").await.unwrap().len(), 1);
        assert_eq!(storage.list_backlog_ideas("t").await.unwrap().len(), 1);
        assert!(storage.list_ideas_for_silo("t", 5).await.unwrap().is_empty());

        storage.assign_idea(&idea.id, 5).await.expect("assign");

        assert!(storage.list_unassigned_ideas("t").await.unwrap().is_empty());
        assert!(storage.list_backlog_ideas("t").await.unwrap().is_empty());
        let assigned = storage.list_ideas_for_silo("t", 5).await.unwrap();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].status, IdeaStatus::Assigned);
        assert_eq!(assigned[0].tags, vec!["concurrency"]);
    }
}
