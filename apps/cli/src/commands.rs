//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

use bookforge_core::autopilot::{Autopilot, AutopilotOpts, SentinelFile};
use bookforge_core::discovery::{SourceCandidate, StaticDiscovery};
use bookforge_core::ingest::IngestRunner;
use bookforge_core::queue::queue_sources;
use bookforge_core::swarm::Swarm;
use bookforge_core::topicfs::TopicFs;
use bookforge_fetch::{Fetcher, SocialClient};
use bookforge_llm::{TextGenerator, build_backend, require_backend};
use bookforge_shared::{
    AppConfig, DraftCaps, SILO_COUNT, config_file_path, expand_path, init_config, load_config,
    normalize_terms, silo_title, slugify,
};
use bookforge_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// BookForge — turn queued sources into a book manuscript.
#[derive(Parser)]
#[command(
    name = "bookforge",
    version,
    about = "Queue research sources, ingest them into chapter drafts, and draft chapters with LLM backends.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Create a new book topic and its on-disk structure.
    Init {
        /// Human-readable topic name (the slug is derived from it).
        name: String,

        /// Search keywords for the off-topic gate (comma-separated).
        #[arg(short, long, value_delimiter = ',')]
        keywords: Vec<String>,
    },

    /// Queue source URLs for a topic.
    Queue {
        /// Topic name or slug.
        topic: String,

        /// URLs to queue.
        urls: Vec<String>,

        /// File with one URL per line (blank lines and # comments skipped).
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Origin tag recorded with each source (e.g. manual, silo:4).
        #[arg(long, default_value = "manual")]
        origin: String,
    },

    /// Process all pending sources into chapter drafts.
    Ingest {
        /// Topic name or slug.
        topic: String,
    },

    /// Run discover-queue-ingest cycles until converged or stopped.
    Autopilot {
        /// Topic name or slug.
        topic: String,

        /// Seed URL for discovery (can be specified multiple times).
        #[arg(long)]
        seed: Vec<String>,

        /// Maximum cycles to run (defaults to config).
        #[arg(long)]
        max_cycles: Option<u32>,

        /// Seconds to wait between cycles (defaults to config).
        #[arg(long)]
        cooldown: Option<u64>,

        /// Stop once total draft words reach this target.
        #[arg(long)]
        target_words: Option<usize>,

        /// Ask a running autopilot to stop after its current cycle.
        #[arg(long)]
        stop: bool,
    },

    /// Draft chapters in parallel from accumulated silo material.
    Swarm {
        /// Topic name or slug.
        topic: String,

        /// Silo numbers to draft (comma-separated). Defaults to all.
        #[arg(long, value_delimiter = ',')]
        silos: Option<Vec<u8>>,

        /// Fold unassigned backlog ideas into every chapter's notes.
        #[arg(long)]
        include_unassigned: bool,

        /// Assign backlog ideas to silos with the classifier first.
        #[arg(long)]
        assign_ideas: bool,
    },

    /// Show pending sources, draft word counts, and autopilot state.
    Status {
        /// Topic name or slug.
        topic: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "bookforge=info",
        1 => "bookforge=debug",
        _ => "bookforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init { name, keywords } => cmd_init(&name, &keywords).await,
        Command::Queue {
            topic,
            urls,
            file,
            origin,
        } => cmd_queue(&topic, &urls, file.as_deref(), &origin).await,
        Command::Ingest { topic } => cmd_ingest(&topic).await,
        Command::Autopilot {
            topic,
            seed,
            max_cycles,
            cooldown,
            target_words,
            stop,
        } => cmd_autopilot(&topic, &seed, max_cycles, cooldown, target_words, stop).await,
        Command::Swarm {
            topic,
            silos,
            include_unassigned,
            assign_ideas,
        } => cmd_swarm(&topic, silos, include_unassigned, assign_ideas).await,
        Command::Status { topic } => cmd_status(&topic).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared wiring
// ---------------------------------------------------------------------------

/// Everything a topic-scoped command needs: config, database, topic
/// identity, and the topic's filesystem layout.
struct TopicContext {
    config: AppConfig,
    storage: Storage,
    fs: TopicFs,
    slug: String,
    name: String,
    keywords: Vec<String>,
}

async fn open_topic(topic: &str) -> Result<TopicContext> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;

    let slug = slugify(topic);
    let (name, keywords) = storage
        .get_topic(&slug)
        .await?
        .ok_or_else(|| eyre!("unknown topic `{slug}` — run `bookforge init` first"))?;

    let storage_root = expand_path(&config.defaults.storage_dir);
    let fs = TopicFs::new(&storage_root, &slug);

    Ok(TopicContext {
        config,
        storage,
        fs,
        slug,
        name,
        keywords,
    })
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let db_path = expand_path(&config.defaults.database_path);
    Ok(Storage::open(&db_path).await?)
}

/// Build the fetcher, attaching a social client only when the configured
/// bearer token env var is actually set.
fn build_fetcher(config: &AppConfig) -> Result<Fetcher> {
    let timeout = Duration::from_secs(config.ingest.fetch_timeout_secs);

    let social = if std::env::var(&config.social.bearer_token_env).is_ok() {
        Some(SocialClient::from_config(&config.social, timeout)?)
    } else {
        None
    };

    Ok(Fetcher::new(timeout, social)?)
}

fn build_ingest_runner(ctx: &TopicContext) -> Result<IngestRunner> {
    let fetcher = build_fetcher(&ctx.config)?;
    let classifier: Arc<dyn TextGenerator> = require_backend(
        &ctx.config.providers,
        ctx.config.providers.classifier,
        "classifier",
    )?;

    let storage_root = expand_path(&ctx.config.defaults.storage_dir);
    let caps = DraftCaps::load(&storage_root, ctx.config.caps);
    let terms = normalize_terms(&ctx.name, ctx.keywords.iter().map(String::as_str));

    Ok(IngestRunner::new(
        ctx.name.clone(),
        ctx.slug.clone(),
        terms,
        fetcher,
        classifier,
        ctx.config.ingest.clone(),
        caps,
    ))
}

fn spinner(msg: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    bar.enable_steady_tick(Duration::from_millis(80));
    bar.set_message(msg.to_string());
    bar
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_init(name: &str, keywords: &[String]) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;

    let slug = slugify(name);
    if storage.get_topic(&slug).await?.is_some() {
        return Err(eyre!("topic `{slug}` already exists"));
    }

    storage.insert_topic(&slug, name, keywords).await?;

    let storage_root = expand_path(&config.defaults.storage_dir);
    let fs = TopicFs::new(&storage_root, &slug);
    fs.ensure_structure()?;

    info!(%slug, "created topic");

    println!();
    println!("  Topic created.");
    println!("  Name:     {name}");
    println!("  Slug:     {slug}");
    println!("  Keywords: {}", keywords.join(", "));
    println!("  Path:     {}", fs.root().display());
    println!();

    Ok(())
}

async fn cmd_queue(topic: &str, urls: &[String], file: Option<&Path>, origin: &str) -> Result<()> {
    let ctx = open_topic(topic).await?;

    let mut raw: Vec<String> = urls.to_vec();
    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre!("cannot read {}: {e}", path.display()))?;
        raw.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from),
        );
    }

    if raw.is_empty() {
        return Err(eyre!("no URLs given — pass them as arguments or via --file"));
    }

    // Reject anything that is not a URL before it reaches the queue.
    // file:// sources are allowed for local notes and transcripts.
    for url in &raw {
        Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    }

    let candidates: Vec<SourceCandidate> = raw.iter().map(SourceCandidate::new).collect();

    ctx.fs.ensure_structure()?;
    let added = queue_sources(&ctx.storage, &ctx.fs, &ctx.slug, &candidates, origin).await?;
    let pending = ctx.storage.count_pending(&ctx.slug).await?;

    println!();
    println!("  Queued {added} new source(s) ({} duplicate(s) skipped).", raw.len() - added);
    println!("  Pending: {pending}");
    println!();

    Ok(())
}

async fn cmd_ingest(topic: &str) -> Result<()> {
    let ctx = open_topic(topic).await?;
    let runner = build_ingest_runner(&ctx)?;

    ctx.fs.ensure_structure()?;

    let bar = spinner("Processing pending sources…");
    let stats = runner.run(&ctx.storage, &ctx.fs).await?;
    bar.finish_and_clear();

    println!();
    println!("  Ingest run finished in {:.1}s", stats.duration_seconds);
    println!("  Processed:    {}", stats.processed);
    println!("  Extracted:    {}", stats.extracted);
    println!("  Failed:       {}", stats.failed);
    println!("  Social calls: {}", stats.social_calls);
    println!("  Draft words:  {}", ctx.fs.draft_total_words());
    println!();

    Ok(())
}

async fn cmd_autopilot(
    topic: &str,
    seeds: &[String],
    max_cycles: Option<u32>,
    cooldown: Option<u64>,
    target_words: Option<usize>,
    stop: bool,
) -> Result<()> {
    let ctx = open_topic(topic).await?;
    let sentinel = SentinelFile::for_topic(&ctx.fs);

    if stop {
        sentinel.request_stop()?;
        println!("  Stop requested — autopilot exits after its current cycle.");
        return Ok(());
    }

    let runner = build_ingest_runner(&ctx)?;

    let candidates: Vec<SourceCandidate> = seeds
        .iter()
        .map(|url| SourceCandidate::with_origin(url, "autopilot"))
        .collect();
    let discovery = Arc::new(StaticDiscovery::new(candidates));

    let mut opts = AutopilotOpts::from_config(&ctx.config.autopilot);
    if let Some(cycles) = max_cycles {
        opts.max_cycles = cycles;
    }
    if let Some(secs) = cooldown {
        opts.cooldown_seconds = secs;
    }
    opts.target_words = target_words;

    let autopilot = Autopilot::new(
        ctx.name.clone(),
        ctx.slug.clone(),
        discovery,
        Arc::new(sentinel),
        ctx.config.autopilot.clone(),
    );

    let outcome = autopilot.run(&ctx.storage, &ctx.fs, &runner, &opts).await?;

    println!();
    println!("  Autopilot finished after {} cycle(s).", outcome.cycles.len());
    for record in &outcome.cycles {
        println!(
            "  Cycle {}: queued {}, extracted {}, failed {}, draft words {}",
            record.cycle,
            record.queued,
            record.ingest.extracted,
            record.ingest.failed,
            record.draft_words,
        );
    }
    println!("  Log: {}", outcome.log_path.display());
    println!();

    Ok(())
}

async fn cmd_swarm(
    topic: &str,
    silos: Option<Vec<u8>>,
    include_unassigned: bool,
    assign_ideas: bool,
) -> Result<()> {
    let ctx = open_topic(topic).await?;

    let writer = require_backend(&ctx.config.providers, ctx.config.providers.writer, "writer")?;
    let research = build_backend(&ctx.config.providers, ctx.config.providers.research)?;

    let fetcher = build_fetcher(&ctx.config)?;
    let timeout = Duration::from_secs(ctx.config.ingest.fetch_timeout_secs);
    let social = if ctx.config.swarm.use_social
        && std::env::var(&ctx.config.social.bearer_token_env).is_ok()
    {
        Some(SocialClient::from_config(&ctx.config.social, timeout)?)
    } else {
        None
    };

    let swarm = Swarm::new(
        ctx.name.clone(),
        ctx.slug.clone(),
        writer,
        research,
        social,
        None,
        fetcher,
        ctx.config.swarm.clone(),
    );

    if assign_ideas {
        let classifier = require_backend(
            &ctx.config.providers,
            ctx.config.providers.classifier,
            "classifier",
        )?;
        let assigned = swarm
            .auto_assign_ideas(&ctx.storage, classifier.as_ref())
            .await?;
        println!("  Assigned {assigned} backlog idea(s) to silos.");
    }

    let bar = spinner("Drafting chapters…");
    let summary = swarm
        .run(&ctx.storage, &ctx.fs, silos, include_unassigned)
        .await?;
    bar.finish_and_clear();

    println!();
    println!("  Swarm run finished: {} chapter(s) drafted.", summary.completed.len());
    for result in &summary.completed {
        println!(
            "  Silo {:>2}  {:<45} {:>6} words  score {}  ({:.1}s)",
            result.silo_number,
            result.title,
            result.word_count,
            result.review_score,
            result.duration_seconds,
        );
    }
    for (silo, error) in &summary.errors {
        println!("  Silo {silo:>2}  FAILED: {error}");
    }
    println!();

    Ok(())
}

async fn cmd_status(topic: &str) -> Result<()> {
    let ctx = open_topic(topic).await?;

    let pending = ctx.storage.count_pending(&ctx.slug).await?;

    println!();
    println!("  Topic:       {} ({})", ctx.name, ctx.slug);
    println!("  Pending:     {pending}");
    println!("  Draft words: {}", ctx.fs.draft_total_words());
    println!();
    for silo in 0..SILO_COUNT {
        println!(
            "  Silo {:>2}  {:<45} {:>6} words",
            silo,
            silo_title(silo),
            ctx.fs.silo_draft_words(silo),
        );
    }

    if let Some(status) = ctx.fs.read_status() {
        println!();
        println!(
            "  Autopilot:   {} (last cycle {}, updated {})",
            if status.running { "running" } else { "idle" },
            status.last_cycle,
            status.updated_at.to_rfc3339(),
        );
    }
    println!();

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("  Config written to {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let rendered = toml::to_string_pretty(&config)?;
    println!("# {}", config_file_path()?.display());
    println!("{rendered}");
    Ok(())
}
