//! Ingestion runner: drain a topic's pending sources into chapter drafts.
//!
//! Sources are processed strictly sequentially so the draft-cap checks
//! stay race-free. Every per-source error is contained: the source is
//! marked failed with a reason code and the loop moves on. Status
//! transitions commit per source, so a crash mid-run leaves prior
//! progress durable.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use bookforge_fetch::{Fetcher, chunk_text, word_count};
use bookforge_llm::TextGenerator;
use bookforge_shared::{
    BookForgeError, CapKind, DraftCaps, FetchReason, IngestConfig, IngestStats, Result, SourceDoc,
    SourceStatus, forced_silo, text_mentions_term,
};
use bookforge_storage::Storage;

use crate::classify::{append_to_silo, classify_chunk, extract_nuggets};
use crate::topicfs::TopicFs;

/// Head-of-text sample checked for topic terms.
const OFF_TOPIC_SAMPLE_CHARS: usize = 4_000;

/// What a successfully extracted source contributed.
struct SourceOutcome {
    words: usize,
    chunks: usize,
    content_hash: String,
}

/// One ingest pass over a topic's pending sources.
pub struct IngestRunner {
    topic_name: String,
    slug: String,
    /// Normalized topic terms for the off-topic gate.
    terms: Vec<String>,
    fetcher: Fetcher,
    classifier: Arc<dyn TextGenerator>,
    config: IngestConfig,
    caps: DraftCaps,
}

impl IngestRunner {
    pub fn new(
        topic_name: impl Into<String>,
        slug: impl Into<String>,
        terms: Vec<String>,
        fetcher: Fetcher,
        classifier: Arc<dyn TextGenerator>,
        config: IngestConfig,
        caps: DraftCaps,
    ) -> Self {
        Self {
            topic_name: topic_name.into(),
            slug: slug.into(),
            terms,
            fetcher,
            classifier,
            config,
            caps,
        }
    }

    /// Process all pending sources for the topic and return run stats.
    ///
    /// Social-media sources are skipped (left pending, not counted) once
    /// the per-run social call budget is spent, or when no social client
    /// is configured at all.
    #[instrument(skip_all, fields(slug = %self.slug))]
    pub async fn run(&self, storage: &Storage, fs: &TopicFs) -> Result<IngestStats> {
        let start = Instant::now();
        let mut stats = IngestStats::default();

        let sources = storage.list_pending(&self.slug).await?;
        info!(pending = sources.len(), "starting ingest run");

        for source in sources {
            let is_social = self.fetcher.is_social(&source.url);
            if is_social
                && (!self.fetcher.social_enabled()
                    || stats.social_calls >= self.config.social_max_calls_per_run)
            {
                continue;
            }

            stats.processed += 1;
            let source_start = Instant::now();

            match self.process_source(fs, &source).await {
                Ok(outcome) => {
                    if is_social {
                        stats.social_calls += 1;
                    }
                    storage
                        .set_source_status(&source.id, SourceStatus::Extracted)
                        .await?;
                    stats.extracted += 1;
                    fs.append_jsonl(
                        &fs.ingest_success_path(),
                        &serde_json::json!({
                            "timestamp": Utc::now().to_rfc3339(),
                            "source_id": source.id,
                            "url": source.url,
                            "words": outcome.words,
                            "chunks": outcome.chunks,
                            "content_sha256": outcome.content_hash,
                            "duration_seconds": source_start.elapsed().as_secs_f64(),
                        }),
                    )?;
                }
                Err(err) => {
                    warn!(url = %source.url, error = %err, "source failed");
                    storage
                        .set_source_status(&source.id, SourceStatus::Failed)
                        .await?;
                    stats.failed += 1;
                    fs.append_jsonl(
                        &fs.ingest_failures_path(),
                        &serde_json::json!({
                            "timestamp": Utc::now().to_rfc3339(),
                            "source_id": source.id,
                            "url": source.url,
                            "reason": err.reason_code(),
                            "detail": err.to_string(),
                        }),
                    )?;
                }
            }
        }

        stats.duration_seconds = start.elapsed().as_secs_f64();
        info!(
            processed = stats.processed,
            extracted = stats.extracted,
            failed = stats.failed,
            social_calls = stats.social_calls,
            "ingest run completed"
        );
        Ok(stats)
    }

    /// Fetch, gate, chunk, classify, extract, append — for one source.
    async fn process_source(&self, fs: &TopicFs, source: &SourceDoc) -> Result<SourceOutcome> {
        let text = self.fetcher.fetch(&source.url).await?;

        let words = word_count(&text);
        if words < self.config.min_words {
            return Err(BookForgeError::Fetch(FetchReason::TooShort));
        }

        let sample: String = text.chars().take(OFF_TOPIC_SAMPLE_CHARS).collect();
        if !text_mentions_term(&sample, &self.terms) {
            return Err(BookForgeError::Fetch(FetchReason::OffTopic));
        }

        let chunks = chunk_text(&text, self.config.chunk_max_chars);
        let forced = forced_silo(&source.origin);

        for chunk in &chunks {
            // Total cap first: exhausting it ends the whole source, not
            // just this chunk.
            if fs.draft_total_words() >= self.caps.max_words_total {
                return Err(BookForgeError::Cap(CapKind::Total));
            }

            let silo = match forced {
                Some(silo) => silo,
                None => classify_chunk(&*self.classifier, &self.topic_name, chunk).await?,
            };

            if fs.silo_draft_words(silo) >= self.caps.max_words_per_silo {
                return Err(BookForgeError::Cap(CapKind::Silo(silo)));
            }

            let nuggets =
                extract_nuggets(&*self.classifier, &self.topic_name, silo, chunk).await?;

            // Appending must never push a draft past its cap, so the
            // extracted size is re-checked before the write.
            let nugget_words = word_count(&nuggets);
            if fs.draft_total_words() + nugget_words > self.caps.max_words_total {
                return Err(BookForgeError::Cap(CapKind::Total));
            }
            if fs.silo_draft_words(silo) + nugget_words > self.caps.max_words_per_silo {
                return Err(BookForgeError::Cap(CapKind::Silo(silo)));
            }
            append_to_silo(fs, silo, &nuggets)?;
        }

        Ok(SourceOutcome {
            words,
            chunks: chunks.len(),
            content_hash: content_hash(&text),
        })
    }
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
