//! mining-news: Bitcoin mining news pipeline entrypoint.
//!
//! `fetch` pulls recent events into the queue, `generate` turns queued events into
//! article files, `thread` formats an article as a numbered post thread.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mining_news_pipeline::config::ApiKeys;
use mining_news_pipeline::generate::gemini::GeminiGenerator;
use mining_news_pipeline::generate::thread::build_thread;
use mining_news_pipeline::generate::{process_queue, Article, ConsumeOutcome};
use mining_news_pipeline::ingest::config::load_config_default;
use mining_news_pipeline::ingest::providers::{EventRegistryClient, FixtureSource};
use mining_news_pipeline::ingest::scheduler::{run_scheduled, IngestSchedulerCfg};
use mining_news_pipeline::ingest::types::EventSource;
use mining_news_pipeline::ingest::{IngestOptions, IngestReport, IngestionPipeline};
use mining_news_pipeline::ledger::{DedupLedger, LedgerPaths};
use mining_news_pipeline::metrics::Metrics;
use mining_news_pipeline::relevance::RelevanceFilter;

const EXIT_FAILURE: u8 = 1;
const EXIT_ALL_FAILED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "mining-news")]
#[command(about = "Fetch, filter and queue Bitcoin mining news events")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    /// Write Prometheus exposition text here on exit
    #[arg(long, global = true, env = "METRICS_FILE")]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch recent events and append new ones to the queue
    Fetch(FetchArgs),
    /// Generate articles for every queued event
    Generate(GenerateArgs),
    /// Print a post thread for a generated article
    Thread(ThreadArgs),
}

#[derive(Args, Debug)]
struct LedgerArgs {
    /// Queue file
    #[arg(long, default_value = "events.json")]
    queue_file: PathBuf,

    /// Processed-events file
    #[arg(long, default_value = "processed_events.json")]
    processed_file: PathBuf,

    /// Failed-events file
    #[arg(long, default_value = "failed_events.json")]
    failed_file: PathBuf,

    /// Skip ids that already failed this many times (0 = never skip)
    #[arg(long, default_value_t = 3, env = "MAX_FAILURES")]
    max_failures: u32,
}

impl LedgerArgs {
    fn paths(&self) -> LedgerPaths {
        LedgerPaths {
            queue: self.queue_file.clone(),
            processed: self.processed_file.clone(),
            failed: self.failed_file.clone(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Uris,
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Look back this many minutes
    #[arg(long, default_value_t = 90, env = "RECENCY_MINUTES")]
    recency_minutes: u32,

    /// Look back this many days (overrides --recency-minutes)
    #[arg(long)]
    days_back: Option<u32>,

    /// Keep at most this many events per run
    #[arg(long, default_value_t = 5, env = "MAX_EVENTS")]
    max_events: usize,

    #[command(flatten)]
    ledger: LedgerArgs,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    output_format: OutputFormat,

    /// Re-queue events even if already processed
    #[arg(long)]
    force: bool,

    /// Simulate without calling the API or writing files
    #[arg(long)]
    dry_run: bool,

    /// Cap the window at 2 hours and the batch at 10 events
    #[arg(long)]
    fast_mode: bool,

    /// Read events from a JSON fixture instead of the API
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Repeat the fetch on this interval until Ctrl-C
    #[arg(long)]
    every_minutes: Option<u64>,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[command(flatten)]
    ledger: LedgerArgs,

    /// Directory for article JSON files
    #[arg(long, default_value = "articles")]
    articles_dir: PathBuf,

    /// Read event details from a JSON fixture instead of the API
    #[arg(long)]
    fixture: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ThreadFormat {
    Json,
    Text,
}

#[derive(Args, Debug)]
struct ThreadArgs {
    /// Article JSON file, or `-` for stdin
    article_file: PathBuf,

    #[arg(long, default_value_t = 8)]
    max_posts: usize,

    #[arg(long, value_enum, default_value_t = ThreadFormat::Json)]
    format: ThreadFormat,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mining_news_pipeline=info,mining_news=info,warn"));
    // Logs go to stderr; stdout carries command output.
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

fn build_source(fixture: Option<&Path>, keys: &ApiKeys) -> Result<Arc<dyn EventSource>> {
    match fixture {
        Some(path) => {
            let src = FixtureSource::from_path(path)?;
            info!(events = src.len(), path = %path.display(), "using fixture source");
            Ok(Arc::new(src))
        }
        None => Ok(Arc::new(EventRegistryClient::new(
            keys.require_event_registry()?,
        )?)),
    }
}

fn print_report(report: &IngestReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let s = serde_json::to_string_pretty(&report.summary())
                .context("serializing run summary")?;
            println!("{s}");
        }
        OutputFormat::Uris => {
            if report.found_nothing_new() && !report.queue.is_empty() {
                info!("no new events; emitting existing queue");
            }
            for uri in &report.queue {
                println!("{uri}");
            }
        }
    }
    Ok(())
}

async fn run_fetch(args: FetchArgs, keys: &ApiKeys) -> Result<ExitCode> {
    let cfg = load_config_default()?;
    let filter = RelevanceFilter::new(&cfg.relevance)?;

    let mut opts = IngestOptions {
        recency_minutes: args
            .days_back
            .map(|d| d.saturating_mul(24 * 60))
            .unwrap_or(args.recency_minutes),
        max_events: args.max_events,
        dry_run: args.dry_run,
        force: args.force,
    };
    if args.fast_mode {
        opts = opts.fast();
        info!(
            recency_minutes = opts.recency_minutes,
            max_events = opts.max_events,
            "fast mode"
        );
    }

    // Dry runs never touch the source, so they need no credentials.
    let source: Arc<dyn EventSource> = if opts.dry_run && args.fixture.is_none() {
        Arc::new(FixtureSource::new(Vec::new()))
    } else {
        build_source(args.fixture.as_deref(), keys)?
    };
    let pipeline = IngestionPipeline::new(source, cfg.query, filter);
    let paths = args.ledger.paths();

    if let Some(minutes) = args.every_minutes {
        let sched = IngestSchedulerCfg {
            interval: Duration::from_secs(minutes.max(1) * 60),
            max_runs: None,
            max_failures: args.ledger.max_failures,
        };
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = ?e, "ctrl-c handler failed; stopping");
            }
        };
        let format = args.output_format;
        let runs = run_scheduled(sched, &pipeline, &paths, &opts, shutdown, |r| {
            if let Err(e) = print_report(r, format) {
                warn!(error = ?e, "could not print run summary");
            }
        })
        .await?;
        info!(runs, "scheduler stopped");
        return Ok(ExitCode::SUCCESS);
    }

    let mut ledger = DedupLedger::open(paths, args.ledger.max_failures)?;
    let report = pipeline.run(&mut ledger, &opts).await?;
    if report.exhausted {
        warn!("all fallback attempts failed; queue left unchanged");
    }
    print_report(&report, args.output_format)?;
    Ok(ExitCode::SUCCESS)
}

async fn run_generate(args: GenerateArgs, keys: &ApiKeys) -> Result<ExitCode> {
    let mut ledger = DedupLedger::open(args.ledger.paths(), args.ledger.max_failures)?;
    if ledger.queue().is_empty() {
        info!("no new events to process");
        return Ok(ExitCode::SUCCESS);
    }

    let mut generator = GeminiGenerator::new(keys.require_gemini()?)?;
    if let Some(model) = keys.gemini_model.as_deref() {
        generator = generator.with_model(model);
    }
    let details = build_source(args.fixture.as_deref(), keys)?;
    std::fs::create_dir_all(&args.articles_dir)
        .with_context(|| format!("creating {}", args.articles_dir.display()))?;

    let report = process_queue(&mut ledger, &generator, details.as_ref(), &args.articles_dir).await?;
    let s = serde_json::to_string_pretty(&report).context("serializing generate report")?;
    println!("{s}");

    Ok(match report.outcome() {
        ConsumeOutcome::AllFailed => {
            error!(failed = report.failed.len(), "every queued event failed");
            ExitCode::from(EXIT_ALL_FAILED)
        }
        _ => ExitCode::SUCCESS,
    })
}

fn run_thread(args: ThreadArgs) -> Result<ExitCode> {
    let raw = if args.article_file.as_os_str() == "-" {
        let mut s = String::new();
        std::io::stdin()
            .read_to_string(&mut s)
            .context("reading article from stdin")?;
        s
    } else {
        std::fs::read_to_string(&args.article_file)
            .with_context(|| format!("reading {}", args.article_file.display()))?
    };
    let value: serde_json::Value = serde_json::from_str(&raw).context("parsing article JSON")?;
    let article: Article =
        serde_json::from_value(value.clone()).context("article JSON has unexpected shape")?;

    let posts = build_thread(&article, args.max_posts);
    if posts.is_empty() {
        return Err(anyhow!("failed to build a thread"));
    }
    match args.format {
        ThreadFormat::Json => {
            let total = posts.len();
            let out = serde_json::json!({
                "thread": posts,
                "total_posts": total,
                "created_at": chrono::Utc::now().to_rfc3339(),
                "source_article": {
                    "headline": article.headline,
                    "generated_at": value.get("generated_at").cloned().unwrap_or_default(),
                    "source_event_uri": value.get("source_event_uri").cloned().unwrap_or_default(),
                }
            });
            let s = serde_json::to_string_pretty(&out).context("serializing thread")?;
            println!("{s}");
        }
        ThreadFormat::Text => {
            for (i, post) in posts.iter().enumerate() {
                println!("Post {}:\n{post}\n", i + 1);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(command: Command) -> Result<ExitCode> {
    let keys = ApiKeys::from_env();
    match command {
        Command::Fetch(args) => run_fetch(args, &keys).await,
        Command::Generate(args) => run_generate(args, &keys).await,
        Command::Thread(args) => run_thread(args),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let metrics = cli.metrics_file.as_ref().and_then(|_| match Metrics::install() {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(error = ?e, "metrics disabled");
            None
        }
    });

    let code = match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "run failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    };

    if let (Some(m), Some(path)) = (metrics.as_ref(), cli.metrics_file.as_deref()) {
        if let Err(e) = m.write_textfile(path) {
            warn!(error = ?e, "could not write metrics file");
        }
    }
    code
}
