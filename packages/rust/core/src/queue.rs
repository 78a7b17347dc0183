//! Source queue: URL intake with dedup and inbox logging.

use chrono::Utc;
use tracing::{debug, info, instrument};
use url::Url;
use uuid::Uuid;

use bookforge_shared::{Result, SourceDoc, SourceStatus};
use bookforge_storage::Storage;

use crate::discovery::SourceCandidate;
use crate::topicfs::TopicFs;

/// Queue candidate URLs for a topic.
///
/// Duplicates (already-known URLs for the topic, or repeats within the
/// batch) are dropped while preserving input order. Survivors are
/// appended to the inbox log first, then inserted as pending rows.
/// Returns the number added; a second identical call adds 0.
#[instrument(skip_all, fields(slug = %slug, candidates = candidates.len()))]
pub async fn queue_sources(
    storage: &Storage,
    fs: &TopicFs,
    slug: &str,
    candidates: &[SourceCandidate],
    default_origin: &str,
) -> Result<usize> {
    if candidates.is_empty() {
        return Ok(0);
    }

    let mut known = storage.existing_urls(slug).await?;
    let mut added = 0;

    for candidate in candidates {
        let url = candidate.url.trim();
        if url.is_empty() || known.contains(url) {
            debug!(%url, "skipping duplicate or empty candidate");
            continue;
        }
        known.insert(url.to_string());

        let origin = candidate
            .origin
            .as_deref()
            .unwrap_or(default_origin)
            .to_string();
        let doc = SourceDoc {
            id: Uuid::now_v7().to_string(),
            topic_slug: slug.to_string(),
            url: url.to_string(),
            domain: domain_of(url),
            origin,
            status: SourceStatus::Pending,
            created_at: Utc::now(),
        };

        // Inbox log first: the append-only record survives even if the
        // insert below fails.
        fs.append_jsonl(
            &fs.inbox_log_path(),
            &serde_json::json!({
                "timestamp": doc.created_at.to_rfc3339(),
                "url": doc.url,
                "domain": doc.domain,
                "origin": doc.origin,
            }),
        )?;

        storage.insert_source(&doc).await?;
        added += 1;
    }

    info!(added, "queued sources");
    Ok(added)
}

fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn setup() -> (Storage, TopicFs) {
        let dir = std::env::temp_dir().join(format!("bf-queue-{}", Uuid::now_v7()));
        let storage = Storage::open(&dir.join("test.db")).await.unwrap();
        storage.insert_topic("t", "Topic", &[]).await.unwrap();
        let fs = TopicFs::new(&dir.join("topics"), "t");
        fs.ensure_structure().unwrap();
        (storage, fs)
    }

    #[tokio::test]
    async fn queueing_is_idempotent() {
        let (storage, fs) = setup().await;
        let candidates = vec![
            SourceCandidate::new("https://example.com/a"),
            SourceCandidate::new("https://example.com/b"),
            // In-batch repeat
            SourceCandidate::new("https://example.com/a"),
        ];

        let first = queue_sources(&storage, &fs, "t", &candidates, "manual")
            .await
            .unwrap();
        assert_eq!(first, 2);

        let second = queue_sources(&storage, &fs, "t", &candidates, "manual")
            .await
            .unwrap();
        assert_eq!(second, 0);

        assert_eq!(storage.count_pending("t").await.unwrap(), 2);
        // Inbox log has exactly one line per queued URL.
        let log = fs.read_or_empty(&fs.inbox_log_path());
        assert_eq!(log.lines().count(), 2);
    }

    #[tokio::test]
    async fn origin_defaults_and_domain_parsing() {
        let (storage, fs) = setup().await;
        let candidates = vec![
            SourceCandidate::new("https://blog.example.com/post"),
            SourceCandidate::with_origin("https://example.org/deep", "silo:4"),
        ];
        queue_sources(&storage, &fs, "t", &candidates, "discovery")
            .await
            .unwrap();

        let pending = storage.list_pending("t").await.unwrap();
        assert_eq!(pending[0].domain, "blog.example.com");
        assert_eq!(pending[0].origin, "discovery");
        assert_eq!(pending[1].origin, "silo:4");
    }

    #[tokio::test]
    async fn empty_input_queues_nothing() {
        let (storage, fs) = setup().await;
        let added = queue_sources(&storage, &fs, "t", &[], "manual").await.unwrap();
        assert_eq!(added, 0);
    }
}
