//! Autopilot: repeated discover → queue → ingest cycles with metrics.
//!
//! The loop is cancellable through an explicit [`StopSignal`] handle.
//! Cooldowns sleep in short slices so a stop request lands within a few
//! seconds, never after a full cooldown.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};

use bookforge_shared::{
    AutopilotConfig, AutopilotStatus, BookForgeError, CycleRecord, Result,
};
use bookforge_storage::Storage;

use crate::discovery::DiscoverySource;
use crate::ingest::IngestRunner;
use crate::queue::queue_sources;
use crate::topicfs::TopicFs;

/// Poll interval for the stop signal during cooldowns.
const STOP_POLL_SLICE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// StopSignal
// ---------------------------------------------------------------------------

/// External cancellation handle for the autopilot loop.
pub trait StopSignal: Send + Sync {
    /// Has a stop been requested?
    fn should_stop(&self) -> bool;

    /// Consume the request so the next run starts clean.
    fn clear(&self);
}

/// Filesystem-backed stop signal: file presence means stop.
///
/// Lets an operator (or another process) halt a running loop by
/// touching the sentinel next to the topic's metrics.
pub struct SentinelFile {
    path: PathBuf,
}

impl SentinelFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn for_topic(fs: &TopicFs) -> Self {
        Self::new(fs.stop_sentinel_path())
    }

    /// Request a stop by creating the sentinel.
    pub fn request_stop(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BookForgeError::io(parent, e))?;
        }
        std::fs::write(&self.path, b"stop\n").map_err(|e| BookForgeError::io(&self.path, e))?;
        Ok(())
    }
}

impl StopSignal for SentinelFile {
    fn should_stop(&self) -> bool {
        self.path.exists()
    }

    fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// In-process stop signal for embedding and tests.
#[derive(Default)]
pub struct AtomicStop {
    flag: AtomicBool,
}

impl AtomicStop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl StopSignal for AtomicStop {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Autopilot
// ---------------------------------------------------------------------------

/// Per-run options layered over [`AutopilotConfig`].
#[derive(Debug, Clone)]
pub struct AutopilotOpts {
    pub max_cycles: u32,
    pub cooldown_seconds: u64,
    /// Stop once total draft words reach this target.
    pub target_words: Option<usize>,
    /// Stop after a cycle that queued nothing and processed nothing.
    pub stop_on_converged: bool,
}

impl AutopilotOpts {
    pub fn from_config(config: &AutopilotConfig) -> Self {
        Self {
            max_cycles: config.max_cycles,
            cooldown_seconds: config.cooldown_seconds,
            target_words: None,
            stop_on_converged: true,
        }
    }
}

/// Outcome of an autopilot run.
pub struct AutopilotOutcome {
    pub cycles: Vec<CycleRecord>,
    /// Where the append-only cycle log lives.
    pub log_path: PathBuf,
}

pub struct Autopilot {
    topic_name: String,
    slug: String,
    discovery: Arc<dyn DiscoverySource>,
    stop: Arc<dyn StopSignal>,
    config: AutopilotConfig,
}

impl Autopilot {
    pub fn new(
        topic_name: impl Into<String>,
        slug: impl Into<String>,
        discovery: Arc<dyn DiscoverySource>,
        stop: Arc<dyn StopSignal>,
        config: AutopilotConfig,
    ) -> Self {
        Self {
            topic_name: topic_name.into(),
            slug: slug.into(),
            discovery,
            stop,
            config,
        }
    }

    /// Run up to `opts.max_cycles` cycles, stopping early on the stop
    /// signal, the word target, or convergence.
    #[instrument(skip_all, fields(slug = %self.slug, max_cycles = opts.max_cycles))]
    pub async fn run(
        &self,
        storage: &Storage,
        fs: &TopicFs,
        runner: &IngestRunner,
        opts: &AutopilotOpts,
    ) -> Result<AutopilotOutcome> {
        fs.ensure_structure()?;
        fs.write_status(&AutopilotStatus {
            running: true,
            last_cycle: 0,
            updated_at: Utc::now(),
            draft_words: fs.draft_total_words(),
        })?;

        let mut cycles = Vec::new();

        'cycles: for cycle in 1..=opts.max_cycles {
            if self.stop.should_stop() {
                info!(cycle, "stop requested, exiting loop");
                break;
            }

            let record = match self.run_cycle(storage, fs, runner, cycle).await {
                Ok(record) => record,
                Err(e) => {
                    // A failed cycle is recorded and the loop continues.
                    warn!(cycle, error = %e, "cycle failed");
                    fs.append_jsonl(
                        &fs.autopilot_log_path(),
                        &serde_json::json!({
                            "timestamp": Utc::now().to_rfc3339(),
                            "cycle": cycle,
                            "error": e.to_string(),
                        }),
                    )?;
                    if self.cooldown(opts.cooldown_seconds).await {
                        break;
                    }
                    continue;
                }
            };

            fs.append_jsonl(&fs.autopilot_log_path(), &record)?;
            fs.write_status(&AutopilotStatus {
                running: true,
                last_cycle: cycle,
                updated_at: Utc::now(),
                draft_words: record.draft_words,
            })?;

            let converged = record.queued == 0 && record.ingest.processed == 0;
            let target_reached = opts
                .target_words
                .is_some_and(|target| record.draft_words >= target);
            cycles.push(record);

            if target_reached {
                info!(cycle, "word target reached");
                break;
            }
            if opts.stop_on_converged && converged {
                info!(cycle, "converged: nothing queued, nothing processed");
                break;
            }
            if cycle < opts.max_cycles && self.cooldown(opts.cooldown_seconds).await {
                break 'cycles;
            }
        }

        fs.write_status(&AutopilotStatus {
            running: false,
            last_cycle: cycles.last().map(|c| c.cycle).unwrap_or(0),
            updated_at: Utc::now(),
            draft_words: fs.draft_total_words(),
        })?;
        self.stop.clear();

        Ok(AutopilotOutcome {
            cycles,
            log_path: fs.autopilot_log_path(),
        })
    }

    async fn run_cycle(
        &self,
        storage: &Storage,
        fs: &TopicFs,
        runner: &IngestRunner,
        cycle: u32,
    ) -> Result<CycleRecord> {
        let start = Instant::now();
        let pending_before = storage.count_pending(&self.slug).await?;

        // Narrow discovery once the backlog is already deep; no point
        // queueing faster than ingest drains.
        let per_feed = if pending_before < self.config.backlog_threshold {
            None
        } else {
            Some(self.config.narrow_per_feed_limit)
        };

        let candidates = self.discovery.discover(&self.topic_name, per_feed).await?;
        let queued = queue_sources(storage, fs, &self.slug, &candidates, "discovery").await?;
        let ingest = runner.run(storage, fs).await?;
        let pending_after = storage.count_pending(&self.slug).await?;
        let draft_words = fs.draft_total_words();

        info!(
            cycle,
            queued,
            processed = ingest.processed,
            draft_words,
            "cycle completed"
        );

        Ok(CycleRecord {
            timestamp: Utc::now(),
            cycle,
            queued,
            candidates: candidates.len(),
            pending_before,
            pending_after,
            draft_words,
            duration_seconds: start.elapsed().as_secs_f64(),
            ingest,
        })
    }

    /// Sleep the cooldown in slices, polling the stop signal. Returns
    /// true when a stop was requested mid-wait.
    async fn cooldown(&self, seconds: u64) -> bool {
        let deadline = Instant::now() + Duration::from_secs(seconds);
        loop {
            if self.stop.should_stop() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep((deadline - now).min(STOP_POLL_SLICE)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{SourceCandidate, StaticDiscovery};
    use async_trait::async_trait;
    use bookforge_fetch::Fetcher;
    use bookforge_llm::{GenRequest, TextGenerator};
    use bookforge_shared::{DraftCaps, IngestConfig};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct NullGen;

    #[async_trait]
    impl TextGenerator for NullGen {
        async fn generate(&self, _request: &GenRequest) -> bookforge_shared::Result<String> {
            Ok("0".into())
        }

        fn provider(&self) -> &'static str {
            "test"
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    /// Records the per-feed limits it was asked for.
    struct RecordingDiscovery {
        limits: Mutex<Vec<Option<usize>>>,
    }

    #[async_trait]
    impl DiscoverySource for RecordingDiscovery {
        async fn discover(
            &self,
            _topic_name: &str,
            per_feed_limit: Option<usize>,
        ) -> bookforge_shared::Result<Vec<SourceCandidate>> {
            self.limits.lock().unwrap().push(per_feed_limit);
            Ok(Vec::new())
        }
    }

    async fn setup() -> (Storage, TopicFs) {
        let dir = std::env::temp_dir().join(format!("bf-autopilot-{}", Uuid::now_v7()));
        let storage = Storage::open(&dir.join("test.db")).await.unwrap();
        storage.insert_topic("t", "Topic", &[]).await.unwrap();
        let fs = TopicFs::new(&dir.join("topics"), "t");
        fs.ensure_structure().unwrap();
        (storage, fs)
    }

    fn test_runner() -> IngestRunner {
        IngestRunner::new(
            "Topic",
            "t",
            vec![],
            Fetcher::new(Duration::from_secs(5), None).unwrap(),
            Arc::new(NullGen),
            IngestConfig::default(),
            DraftCaps::default(),
        )
    }

    fn fast_opts() -> AutopilotOpts {
        AutopilotOpts {
            max_cycles: 6,
            cooldown_seconds: 0,
            target_words: None,
            stop_on_converged: true,
        }
    }

    #[tokio::test]
    async fn converged_cycle_stops_the_loop() {
        let (storage, fs) = setup().await;
        let autopilot = Autopilot::new(
            "Topic",
            "t",
            Arc::new(StaticDiscovery::new(Vec::new())),
            Arc::new(AtomicStop::new()),
            AutopilotConfig::default(),
        );

        let outcome = autopilot
            .run(&storage, &fs, &test_runner(), &fast_opts())
            .await
            .expect("run");

        // Nothing to discover, nothing pending: one converged cycle.
        assert_eq!(outcome.cycles.len(), 1);
        assert_eq!(outcome.cycles[0].queued, 0);
        assert_eq!(outcome.cycles[0].ingest.processed, 0);

        let status = fs.read_status().expect("status written");
        assert!(!status.running);
        assert_eq!(status.last_cycle, 1);
        assert_eq!(fs.read_or_empty(&fs.autopilot_log_path()).lines().count(), 1);
    }

    #[tokio::test]
    async fn pre_triggered_stop_runs_zero_cycles() {
        let (storage, fs) = setup().await;
        let stop = Arc::new(AtomicStop::new());
        stop.trigger();

        let autopilot = Autopilot::new(
            "Topic",
            "t",
            Arc::new(StaticDiscovery::new(Vec::new())),
            stop.clone(),
            AutopilotConfig::default(),
        );

        let outcome = autopilot
            .run(&storage, &fs, &test_runner(), &fast_opts())
            .await
            .unwrap();

        assert!(outcome.cycles.is_empty());
        assert!(!fs.read_status().unwrap().running);
        // Signal is consumed on exit.
        assert!(!stop.should_stop());
    }

    #[tokio::test]
    async fn word_target_stops_before_convergence_check() {
        let (storage, fs) = setup().await;
        std::fs::write(fs.draft_path(1), "word ".repeat(500)).unwrap();

        let autopilot = Autopilot::new(
            "Topic",
            "t",
            Arc::new(StaticDiscovery::new(Vec::new())),
            Arc::new(AtomicStop::new()),
            AutopilotConfig::default(),
        );

        let mut opts = fast_opts();
        opts.target_words = Some(100);
        opts.stop_on_converged = false;

        let outcome = autopilot
            .run(&storage, &fs, &test_runner(), &opts)
            .await
            .unwrap();
        assert_eq!(outcome.cycles.len(), 1);
        assert!(outcome.cycles[0].draft_words >= 100);
    }

    #[tokio::test]
    async fn deep_backlog_narrows_discovery() {
        let (storage, fs) = setup().await;
        // Queue enough pending sources to cross the threshold.
        // Unroutable local URLs: ingest fails them fast without leaving
        // the machine.
        let candidates: Vec<SourceCandidate> = (0..3)
            .map(|i| SourceCandidate::new(format!("http://127.0.0.1:1/{i}")))
            .collect();
        queue_sources(&storage, &fs, "t", &candidates, "manual")
            .await
            .unwrap();

        let discovery = Arc::new(RecordingDiscovery {
            limits: Mutex::new(Vec::new()),
        });
        let config = AutopilotConfig {
            backlog_threshold: 2,
            narrow_per_feed_limit: 8,
            ..AutopilotConfig::default()
        };
        let autopilot = Autopilot::new(
            "Topic",
            "t",
            discovery.clone(),
            Arc::new(AtomicStop::new()),
            config,
        );

        let mut opts = fast_opts();
        opts.max_cycles = 1;
        // Pending sources will fail fast (unreachable hosts) but the
        // discovery breadth decision happens before ingest.
        let _ = autopilot.run(&storage, &fs, &test_runner(), &opts).await;

        let limits = discovery.limits.lock().unwrap();
        assert_eq!(limits.as_slice(), &[Some(8)]);
    }

    #[test]
    fn sentinel_file_lifecycle() {
        let dir = std::env::temp_dir().join(format!("bf-sentinel-{}", Uuid::now_v7()));
        let fs = TopicFs::new(&dir, "t");
        fs.ensure_structure().unwrap();

        let sentinel = SentinelFile::for_topic(&fs);
        assert!(!sentinel.should_stop());

        sentinel.request_stop().unwrap();
        assert!(sentinel.should_stop());

        sentinel.clear();
        assert!(!sentinel.should_stop());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
