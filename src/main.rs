//! news-ingest: scheduled feed ingestion and account relinking.
//!
//! Both subcommands are run-to-completion jobs. Stats go to stdout as JSON,
//! logs go to stderr.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use news_ingest::config::{IngestConfig, SearchBackendKind};
use news_ingest::model::{DomainId, SourceId};
use news_ingest::telemetry::{self, Metrics};
use news_ingest::{
    ElasticSearch, HttpFetcher, IngestOptions, IngestPipeline, MemorySearch, MemoryStore,
    RelinkJob, SearchBackend, SourceFilter,
};

const ENV_STATE_PATH: &str = "NEWS_INGEST_STATE";
const DEFAULT_STATE_PATH: &str = "state/news.json";

#[derive(Debug, Parser)]
#[command(name = "news-ingest", version, about)]
struct Cli {
    /// Config file (overrides NEWS_INGEST_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot file holding sources, entries, links and keywords.
    #[arg(long, global = true, env = ENV_STATE_PATH, default_value = DEFAULT_STATE_PATH)]
    state: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll feed sources and ingest new entries.
    Run(RunArgs),
    /// Re-apply the account dictionary to every stored entry.
    Relink {
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Parse, dedup and match, but write nothing.
    #[arg(long)]
    dry_run: bool,

    /// Only these source ids (repeatable).
    #[arg(long = "source")]
    sources: Vec<i64>,

    /// Only sources of this domain.
    #[arg(long)]
    domain: Option<i64>,
}

fn load_config(path: Option<&Path>) -> Result<IngestConfig> {
    match path {
        Some(p) => IngestConfig::load_from(p),
        None => IngestConfig::load_default(),
    }
}

fn search_backend(cfg: &IngestConfig, store: &MemoryStore) -> Box<dyn SearchBackend> {
    match cfg.search.backend {
        SearchBackendKind::Memory => Box::new(MemorySearch::from_documents(store.search_documents())),
        SearchBackendKind::Elasticsearch => Box::new(
            ElasticSearch::new(&cfg.search.url, &cfg.search.index)
                .with_timeout(cfg.search.timeout_secs)
                .with_min_should_match(cfg.dedup.similarity_threshold),
        ),
    }
}

/// Ctrl-C flips the flag; jobs stop at the next entry or source boundary.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current batch");
            flag.store(true, Ordering::Relaxed);
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    telemetry::init_tracing(cli.json_logs);
    let metrics = Metrics::from_env()?;

    let cfg = load_config(cli.config.as_deref())?;
    let store = MemoryStore::load_or_default(&cli.state)
        .await
        .with_context(|| format!("loading state from {}", cli.state.display()))?;
    let cancel = cancel_on_ctrl_c();

    let dry_run = match &cli.command {
        Command::Run(args) => {
            let search = search_backend(&cfg, &store);
            let fetcher = HttpFetcher::new(cfg.ingest.fetch_timeout(), &cfg.ingest.user_agent)
                .context("building HTTP client")?;
            let mut options = IngestOptions::from_config(&cfg);
            options.dry_run = args.dry_run;
            options.cancel = Arc::clone(&cancel);

            let pipeline = IngestPipeline::new(&store, search.as_ref(), fetcher, &cfg, options)?;
            let filter = SourceFilter {
                ids: args.sources.iter().copied().map(SourceId).collect(),
                domain: args.domain.map(DomainId),
            };
            info!(backend = search.name(), dry_run = args.dry_run, "starting ingest run");
            let stats = pipeline.run_all(&filter).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            args.dry_run
        }
        Command::Relink { dry_run } => {
            let stats = RelinkJob::new(&store, &cfg.relink)
                .dry_run(*dry_run)
                .with_cancel(Arc::clone(&cancel))
                .run()
                .await
                .context("relink failed")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            *dry_run
        }
    };

    if !dry_run {
        store
            .save_snapshot(&cli.state)
            .await
            .with_context(|| format!("saving state to {}", cli.state.display()))?;
    }

    if let Some(m) = &metrics {
        if let Err(e) = m.write_textfile().await {
            warn!(error = ?e, path = %m.path().display(), "metrics textfile not written");
        }
    }
    Ok(())
}
