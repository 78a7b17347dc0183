//! SQL migration definitions for the BookForge database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: topics, source_docs, chapter_briefs, ideas",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Book topics
CREATE TABLE IF NOT EXISTS topics (
    slug          TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    keywords_json TEXT NOT NULL DEFAULT '[]',
    created_at    TEXT NOT NULL
);

-- Queued source URLs; one row per (topic, url)
CREATE TABLE IF NOT EXISTS source_docs (
    id         TEXT PRIMARY KEY,
    topic_slug TEXT NOT NULL REFERENCES topics(slug) ON DELETE CASCADE,
    url        TEXT NOT NULL,
    domain     TEXT NOT NULL,
    origin     TEXT NOT NULL,
    status     TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    UNIQUE(topic_slug, url)
);

CREATE INDEX IF NOT EXISTS idx_source_docs_topic_status
    ON source_docs(topic_slug, status);

-- Per-chapter editorial briefs; one row per (topic, silo)
CREATE TABLE IF NOT EXISTS chapter_briefs (
    id           TEXT PRIMARY KEY,
    topic_slug   TEXT NOT NULL REFERENCES topics(slug) ON DELETE CASCADE,
    silo_number  INTEGER NOT NULL,
    title        TEXT NOT NULL,
    goal         TEXT NOT NULL DEFAULT '',
    outline_json TEXT NOT NULL DEFAULT '[]',
    notes        TEXT NOT NULL DEFAULT '',
    status       TEXT NOT NULL DEFAULT 'draft',
    UNIQUE(topic_slug, silo_number)
);

-- Idea backlog
CREATE TABLE IF NOT EXISTS ideas (
    id          TEXT PRIMARY KEY,
    topic_slug  TEXT NOT NULL REFERENCES topics(slug) ON DELETE CASCADE,
    text        TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'backlog',
    silo_number INTEGER,
    tags_json   TEXT NOT NULL DEFAULT '[]',
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ideas_topic_silo ON ideas(topic_slug, silo_number);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
