//! Swarm drafting orchestrator.
//!
//! Launches one task per selected chapter under a counting semaphore,
//! so total concurrent outbound model calls stay bounded and one slow
//! chapter never serializes the rest. Failures are collected per
//! chapter and returned alongside successes; a single bad chapter
//! never aborts the batch.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use bookforge_fetch::{Fetcher, SocialClient};
use bookforge_llm::{GenRequest, TextGenerator};
use bookforge_shared::{
    ChapterBrief, Result, SILO_COUNT, SwarmChapterResult, SwarmConfig, silo_title,
};
use bookforge_storage::Storage;

use crate::classify::{parse_silo_response, silo_menu};
use crate::discovery::DiscoverySource;
use crate::topicfs::TopicFs;

// ---------------------------------------------------------------------------
// Review parsing
// ---------------------------------------------------------------------------

/// Structural review of a drafted chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewReport {
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// Parse a review response, degrading to a zero-score placeholder when
/// the model did not return usable JSON.
pub fn parse_review(response: &str) -> ReviewReport {
    // Models wrap JSON in prose or code fences often enough that we
    // extract the outermost object before parsing.
    let candidate = match (response.find('{'), response.rfind('}')) {
        (Some(start), Some(end)) if start < end => &response[start..=end],
        _ => response,
    };
    match serde_json::from_str(candidate) {
        Ok(report) => report,
        Err(_) => ReviewReport {
            score: 0,
            strengths: Vec::new(),
            gaps: vec!["Review parse failed".into()],
            risks: vec![response.chars().take(2_000).collect()],
        },
    }
}

// ---------------------------------------------------------------------------
// Chapter context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
struct WebSource {
    url: String,
    snippet: String,
}

/// Everything a chapter task needs, gathered up front so spawned tasks
/// never touch the database.
struct ChapterJob {
    silo_number: u8,
    brief: ChapterBrief,
    ideas: Vec<String>,
    draft_notes: String,
    author_notes: String,
}

// ---------------------------------------------------------------------------
// Swarm
// ---------------------------------------------------------------------------

/// Outcome of one swarm run: completed chapter records plus per-chapter
/// errors.
pub struct SwarmSummary {
    pub completed: Vec<SwarmChapterResult>,
    pub errors: Vec<(u8, String)>,
}

pub struct Swarm {
    topic_name: String,
    slug: String,
    writer: Arc<dyn TextGenerator>,
    research: Option<Arc<dyn TextGenerator>>,
    social: Option<SocialClient>,
    /// Supplies web-evidence URLs per chapter when `use_web` is on.
    web_discovery: Option<Arc<dyn DiscoverySource>>,
    fetcher: Fetcher,
    config: SwarmConfig,
}

impl Swarm {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topic_name: impl Into<String>,
        slug: impl Into<String>,
        writer: Arc<dyn TextGenerator>,
        research: Option<Arc<dyn TextGenerator>>,
        social: Option<SocialClient>,
        web_discovery: Option<Arc<dyn DiscoverySource>>,
        fetcher: Fetcher,
        config: SwarmConfig,
    ) -> Self {
        Self {
            topic_name: topic_name.into(),
            slug: slug.into(),
            writer,
            research,
            social,
            web_discovery,
            fetcher,
            config,
        }
    }

    /// Make sure every silo has a chapter brief, creating taxonomy
    /// defaults for missing ones. Idempotent; never overwrites.
    pub async fn ensure_briefs(&self, storage: &Storage) -> Result<()> {
        for silo in 0..SILO_COUNT {
            storage
                .ensure_brief(&ChapterBrief::taxonomy_default(&self.slug, silo))
                .await?;
        }
        Ok(())
    }

    /// Draft the selected chapters (all 11 when `silos` is `None`).
    #[instrument(skip_all, fields(slug = %self.slug))]
    pub async fn run(
        &self,
        storage: &Storage,
        fs: &TopicFs,
        silos: Option<Vec<u8>>,
        include_unassigned: bool,
    ) -> Result<SwarmSummary> {
        self.ensure_briefs(storage).await?;
        fs.ensure_structure()?;

        let selected: Vec<u8> = match silos {
            Some(list) => list.into_iter().filter(|s| *s < SILO_COUNT).collect(),
            None => (0..SILO_COUNT).collect(),
        };

        let unassigned: Vec<String> = if include_unassigned {
            storage
                .list_unassigned_ideas(&self.slug)
                .await?
                .into_iter()
                .map(|idea| idea.text)
                .collect()
        } else {
            Vec::new()
        };

        // Gather all database-backed context on this task; spawned
        // chapter tasks only see files and backends.
        let mut jobs = Vec::new();
        for &silo in &selected {
            let brief = storage
                .get_brief(&self.slug, silo)
                .await?
                .unwrap_or_else(|| ChapterBrief::taxonomy_default(&self.slug, silo));
            let mut ideas: Vec<String> = storage
                .list_ideas_for_silo(&self.slug, silo)
                .await?
                .into_iter()
                .map(|idea| idea.text)
                .collect();
            ideas.extend(unassigned.iter().cloned());

            jobs.push(ChapterJob {
                silo_number: silo,
                brief,
                ideas,
                draft_notes: fs.read_or_empty(&fs.draft_path(silo)),
                author_notes: fs.author_notes(silo),
            });
        }

        info!(
            chapters = jobs.len(),
            max_parallel = self.config.max_parallel,
            "starting swarm run"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let mut tasks: JoinSet<(u8, Result<SwarmChapterResult>)> = JoinSet::new();

        for job in jobs {
            let semaphore = semaphore.clone();
            let fs = fs.clone();
            let writer = self.writer.clone();
            let research = self.research.clone();
            let social = self.social.clone();
            let web_discovery = self.web_discovery.clone();
            let fetcher = self.fetcher.clone();
            let config = self.config.clone();
            let topic_name = self.topic_name.clone();
            let silo = job.silo_number;

            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let result = draft_chapter(
                    &topic_name,
                    &fs,
                    job,
                    writer,
                    research,
                    social,
                    web_discovery,
                    fetcher,
                    &config,
                )
                .await;
                (silo, result)
            });
        }

        let mut completed = Vec::new();
        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(record))) => {
                    fs.append_jsonl(&fs.swarm_log_path(), &record)?;
                    completed.push(record);
                }
                Ok((silo, Err(e))) => {
                    warn!(silo, error = %e, "chapter failed");
                    errors.push((silo, e.to_string()));
                }
                Err(e) => {
                    warn!(error = %e, "chapter task panicked");
                    errors.push((u8::MAX, e.to_string()));
                }
            }
        }

        completed.sort_by_key(|record| record.silo_number);
        info!(
            completed = completed.len(),
            errors = errors.len(),
            "swarm run finished"
        );
        Ok(SwarmSummary { completed, errors })
    }

    /// Assign backlog ideas to silos, one classifier call each.
    pub async fn auto_assign_ideas(
        &self,
        storage: &Storage,
        classifier: &dyn TextGenerator,
    ) -> Result<usize> {
        let ideas = storage.list_backlog_ideas(&self.slug).await?;
        let mut assigned = 0;

        for idea in ideas {
            let user = format!(
                "Assign this idea to the best chapter silo (0-10). Return only the number.\n\n\
                 Topic: {}\nSilos:\n{}\n\nIdea:\n{}",
                self.topic_name,
                silo_menu(),
                idea.text.chars().take(800).collect::<String>(),
            );
            let request = GenRequest::new("You are a precise librarian.", user)
                .with_max_tokens(16)
                .with_temperature(0.0);
            let response = classifier.generate(&request).await?;
            let silo = parse_silo_response(&response);
            storage.assign_idea(&idea.id, silo).await?;
            assigned += 1;
        }
        Ok(assigned)
    }
}

// ---------------------------------------------------------------------------
// Per-chapter pipeline
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn draft_chapter(
    topic_name: &str,
    fs: &TopicFs,
    job: ChapterJob,
    writer: Arc<dyn TextGenerator>,
    research: Option<Arc<dyn TextGenerator>>,
    social: Option<SocialClient>,
    web_discovery: Option<Arc<dyn DiscoverySource>>,
    fetcher: Fetcher,
    config: &SwarmConfig,
) -> Result<SwarmChapterResult> {
    let start = Instant::now();
    let silo = job.silo_number;
    let title = if job.brief.title.is_empty() {
        silo_title(silo).to_string()
    } else {
        job.brief.title.clone()
    };

    // Optional social signal.
    let mut social_posts = Vec::new();
    if config.use_social
        && let Some(client) = &social
    {
        let query = format!("{topic_name} {title}");
        match client.search_recent(&query, 6).await {
            Ok(posts) => social_posts = posts,
            Err(e) => debug!(silo, error = %e, "social search failed, continuing without"),
        }
    }
    let social_notes: String = social_posts
        .iter()
        .map(|post| format!("- {}", post.text))
        .collect::<Vec<_>>()
        .join("\n");

    // Optional web evidence, fetched through the same fetch-and-clean
    // path as ingestion.
    let mut web_sources: Vec<WebSource> = Vec::new();
    if config.use_web
        && let Some(discovery) = &web_discovery
    {
        let query = format!("{topic_name} {title}");
        let candidates = discovery
            .discover(&query, Some(config.web_sources_per_chapter))
            .await
            .unwrap_or_default();
        for candidate in candidates.iter().take(config.web_sources_per_chapter) {
            match fetcher.fetch(&candidate.url).await {
                Ok(text) => {
                    let snippet = text
                        .split_whitespace()
                        .take(config.web_max_words)
                        .collect::<Vec<_>>()
                        .join(" ");
                    if !snippet.is_empty() {
                        web_sources.push(WebSource {
                            url: candidate.url.clone(),
                            snippet,
                        });
                    }
                }
                Err(e) => debug!(url = %candidate.url, error = %e, "web evidence fetch failed"),
            }
        }
    }
    let web_notes: String = web_sources
        .iter()
        .map(|source| format!("URL: {}\n{}", source.url, source.snippet))
        .collect::<Vec<_>>()
        .join("\n\n");

    // Optional research memo folded into the brief notes.
    let mut notes = job.brief.notes.clone();
    let mut research_memo = String::new();
    if let Some(backend) = &research {
        let user = format!(
            "Topic: {topic_name}\nChapter: {title}\nGoal: {}\nOutline: {:?}\n\n\
             Brief notes:\n{}\n\nIdeas:\n{}\n\nDraft notes:\n{}\n\n\
             Author notes:\n{}\n\nSocial notes:\n{}\n\nWeb evidence:\n{}",
            job.brief.goal,
            job.brief.outline,
            notes,
            bullet_list(&job.ideas, 25),
            head(&job.draft_notes, 4_000),
            head(&job.author_notes, 1_500),
            head(&social_notes, 1_500),
            head(&web_notes, 4_000),
        );
        let request = GenRequest::new(
            "You are a research assistant. Create a concise memo with factual anchors, \
             gaps, and questions. Avoid speculation.",
            user,
        )
        .with_max_tokens(1_200);
        research_memo = backend.generate(&request).await?;
        if !research_memo.trim().is_empty() {
            notes = format!("{}\n\n{}", notes, research_memo).trim().to_string();
        }
    }

    // Chapter prose.
    let write_request = GenRequest::new(
        "You are a senior ghostwriter. Write original prose with a clear narrative arc. \
         Do not copy phrases from sources. If evidence is weak, flag gaps.",
        format!(
            "Topic: {topic_name}\nChapter: {title}\nVoice: {}\n\n\
             Chapter goal: {}\nOutline: {:?}\n\n\
             Brief notes:\n{}\n\n\
             Idea pool:\n{}\n\n\
             Author notes:\n{}\n\n\
             Draft notes (do not copy verbatim):\n{}\n\n\
             Social notes (signals only, paraphrase):\n{}\n\n\
             Web evidence (paraphrase, cite by URL if useful):\n{}\n\n\
             Write the chapter in coherent narrative form. Use section headings if helpful.",
            config.voice_preset,
            job.brief.goal,
            job.brief.outline,
            notes,
            bullet_list(&job.ideas, 30),
            head(&job.author_notes, 2_000),
            head(&job.draft_notes, 4_000),
            head(&social_notes, 1_000),
            head(&web_notes, 4_000),
        ),
    )
    .with_max_tokens(3_200);
    let chapter_text = writer.generate(&write_request).await?;

    // Back up any prior final draft before overwriting.
    let draft_path = fs.swarm_draft_path(silo);
    if draft_path.exists() {
        let backup = fs.swarm_backup_path(silo);
        if let Err(e) = std::fs::copy(&draft_path, &backup) {
            warn!(silo, error = %e, "failed to back up previous draft");
        }
    }
    std::fs::write(&draft_path, chapter_text.trim())
        .map_err(|e| bookforge_shared::BookForgeError::io(&draft_path, e))?;

    // Structural review; an unparseable response degrades, never fails.
    let review_request = GenRequest::new(
        "You are a meticulous book editor.",
        format!(
            "Topic: {topic_name}\nChapter: {title}\nGoal: {}\nOutline: {:?}\n\n\
             Evaluate the chapter for coverage, coherence, repetition, and missing evidence. \
             Return JSON with keys: score (1-10), strengths (list), gaps (list), risks (list).\n\n\
             Chapter text:\n{}",
            job.brief.goal,
            job.brief.outline,
            head(&chapter_text, 4_000),
        ),
    )
    .with_max_tokens(800);
    let review = match writer.generate(&review_request).await {
        Ok(response) => parse_review(&response),
        Err(e) => parse_review(&format!("review call failed: {e}")),
    };

    let review_path = fs.swarm_review_path(silo);
    std::fs::write(
        &review_path,
        serde_json::to_string_pretty(&review)
            .map_err(|e| bookforge_shared::BookForgeError::parse(e.to_string()))?,
    )
    .map_err(|e| bookforge_shared::BookForgeError::io(&review_path, e))?;

    // Provenance manifest.
    let sources_path = fs.swarm_sources_path(silo);
    let manifest = serde_json::json!({
        "timestamp": Utc::now().to_rfc3339(),
        "silo": silo,
        "title": title,
        "social_posts": social_posts.iter().map(|p| &p.text).collect::<Vec<_>>(),
        "web_sources": web_sources,
        "research_memo": research_memo,
        "writer_provider": writer.provider(),
        "writer_model": writer.model(),
        "research_provider": research.as_ref().map(|r| r.provider()).unwrap_or("none"),
        "research_model": research.as_ref().map(|r| r.model()).unwrap_or(""),
    });
    std::fs::write(
        &sources_path,
        serde_json::to_string_pretty(&manifest)
            .map_err(|e| bookforge_shared::BookForgeError::parse(e.to_string()))?,
    )
    .map_err(|e| bookforge_shared::BookForgeError::io(&sources_path, e))?;

    Ok(SwarmChapterResult {
        timestamp: Utc::now(),
        silo_number: silo,
        title,
        duration_seconds: start.elapsed().as_secs_f64(),
        word_count: chapter_text.split_whitespace().count(),
        review_score: review.score,
        social_posts: social_posts.len(),
        web_sources: web_sources.len(),
        writer_provider: writer.provider().to_string(),
        writer_model: writer.model().to_string(),
        research_provider: research
            .as_ref()
            .map(|r| r.provider().to_string())
            .unwrap_or_else(|| "none".into()),
        research_model: research
            .as_ref()
            .map(|r| r.model().to_string())
            .unwrap_or_default(),
    })
}

fn bullet_list(items: &[String], limit: usize) -> String {
    items
        .iter()
        .take(limit)
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn head(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bookforge_shared::{BookForgeError, IdeaItem, IdeaStatus};
    use std::time::Duration;
    use uuid::Uuid;

    /// Writer that answers review prompts with JSON and everything else
    /// with prose. Optionally fails for one chapter title.
    struct ScriptedWriter {
        fail_title: Option<&'static str>,
    }

    #[async_trait]
    impl TextGenerator for ScriptedWriter {
        async fn generate(&self, request: &GenRequest) -> bookforge_shared::Result<String> {
            if let Some(title) = self.fail_title
                && request.user.contains(title)
            {
                return Err(BookForgeError::Provider("scripted failure".into()));
            }
            if request.user.contains("Return JSON") {
                Ok(r#"{"score": 8, "strengths": ["clear"], "gaps": [], "risks": []}"#.into())
            } else if request.user.contains("Return only the number") {
                Ok("7".into())
            } else {
                Ok("A drafted chapter with several words of prose.".into())
            }
        }

        fn provider(&self) -> &'static str {
            "test"
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    async fn setup() -> (Storage, TopicFs) {
        let dir = std::env::temp_dir().join(format!("bf-swarm-{}", Uuid::now_v7()));
        let storage = Storage::open(&dir.join("test.db")).await.unwrap();
        storage.insert_topic("t", "Topic", &[]).await.unwrap();
        let fs = TopicFs::new(&dir.join("topics"), "t");
        fs.ensure_structure().unwrap();
        (storage, fs)
    }

    fn test_swarm(fail_title: Option<&'static str>) -> Swarm {
        Swarm::new(
            "Topic",
            "t",
            Arc::new(ScriptedWriter { fail_title }),
            None,
            None,
            None,
            Fetcher::new(Duration::from_secs(5), None).unwrap(),
            SwarmConfig::default(),
        )
    }

    #[test]
    fn review_parse_handles_fences_and_garbage() {
        let fenced = "Here you go:\n```json\n{\"score\": 6, \"gaps\": [\"thin\"]}\n```";
        let review = parse_review(fenced);
        assert_eq!(review.score, 6);
        assert_eq!(review.gaps, vec!["thin"]);

        let garbage = parse_review("I think it's pretty good overall!");
        assert_eq!(garbage.score, 0);
        assert_eq!(garbage.gaps, vec!["Review parse failed"]);
        assert!(garbage.risks[0].contains("pretty good"));
    }

    #[tokio::test]
    async fn ensure_briefs_creates_full_taxonomy_once() {
        let (storage, _fs) = setup().await;
        let swarm = test_swarm(None);

        swarm.ensure_briefs(&storage).await.unwrap();
        swarm.ensure_briefs(&storage).await.unwrap();

        for silo in 0..SILO_COUNT {
            let brief = storage.get_brief("t", silo).await.unwrap().expect("brief");
            assert_eq!(brief.title, silo_title(silo));
        }
    }

    #[tokio::test]
    async fn drafts_selected_chapters_with_artifacts() {
        let (storage, fs) = setup().await;
        let swarm = test_swarm(None);

        let summary = swarm
            .run(&storage, &fs, Some(vec![2, 3]), true)
            .await
            .expect("run");

        assert_eq!(summary.completed.len(), 2);
        assert!(summary.errors.is_empty());
        for silo in [2u8, 3] {
            assert!(fs.swarm_draft_path(silo).exists());
            let review: ReviewReport = serde_json::from_str(
                &fs.read_or_empty(&fs.swarm_review_path(silo)),
            )
            .expect("review json");
            assert_eq!(review.score, 8);
            assert!(fs.swarm_sources_path(silo).exists());
        }
        assert_eq!(fs.read_or_empty(&fs.swarm_log_path()).lines().count(), 2);
        assert_eq!(summary.completed[0].silo_number, 2);
        assert!(summary.completed[0].word_count > 0);
    }

    #[tokio::test]
    async fn rerun_backs_up_previous_draft() {
        let (storage, fs) = setup().await;
        let swarm = test_swarm(None);

        swarm.run(&storage, &fs, Some(vec![1]), false).await.unwrap();
        assert!(!fs.swarm_backup_path(1).exists());

        swarm.run(&storage, &fs, Some(vec![1]), false).await.unwrap();
        assert!(fs.swarm_backup_path(1).exists());
        assert_eq!(
            fs.read_or_empty(&fs.swarm_backup_path(1)),
            fs.read_or_empty(&fs.swarm_draft_path(1))
        );
    }

    #[tokio::test]
    async fn failing_chapter_does_not_abort_batch() {
        let (storage, fs) = setup().await;
        // Silo 2's taxonomy title appears in its prompts.
        let swarm = test_swarm(Some("The 1-Hour Quick Start"));

        let summary = swarm
            .run(&storage, &fs, Some(vec![2, 3]), false)
            .await
            .unwrap();

        assert_eq!(summary.completed.len(), 1);
        assert_eq!(summary.completed[0].silo_number, 3);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].0, 2);
        assert!(fs.swarm_draft_path(3).exists());
        assert!(!fs.swarm_draft_path(2).exists());
    }

    #[tokio::test]
    async fn auto_assign_moves_backlog_ideas() {
        let (storage, _fs) = setup().await;
        let swarm = test_swarm(None);

        let idea = IdeaItem {
            id: Uuid::now_v7().to_string(),
            topic_slug: "t".into(),
            text: "cover deployment pitfalls".into(),
            status: IdeaStatus::Backlog,
            silo_number: None,
            tags: Vec::new(),
            created_at: Utc::now(),
        };
        storage.insert_idea(&idea).await.unwrap();

        let classifier = ScriptedWriter { fail_title: None };
        let assigned = swarm
            .auto_assign_ideas(&storage, &classifier)
            .await
            .unwrap();
        assert_eq!(assigned, 1);

        let in_silo = storage.list_ideas_for_silo("t", 7).await.unwrap();
        assert_eq!(in_silo.len(), 1);
        assert_eq!(in_silo[0].status, IdeaStatus::Assigned);
    }
}
