//! Corpus-Harvest main entry point
//!
//! This is the command-line interface for the resumable crawl engine.

use anyhow::Context;
use clap::Parser;
use corpus_harvest::config::{load_config_with_hash, validate, Config};
use corpus_harvest::crawler::{CrawlRequest, CrawlScheduler, EndPoint, StartPoint};
use corpus_harvest::output::{load_statistics, print_session_report, print_statistics};
use corpus_harvest::storage::{open_store, ContentStore};
use corpus_harvest::RunPhase;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Corpus-Harvest: a resumable, deduplicating crawl engine
///
/// Crawls numeric or discovered URL spaces of configured sources, stores each
/// accepted record exactly once and resumes interrupted runs from their
/// checkpoint.
#[derive(Parser, Debug)]
#[command(name = "corpus-harvest")]
#[command(version)]
#[command(about = "A resumable, deduplicating crawl engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Source to crawl (optional when the config has a single source)
    #[arg(short, long)]
    source: Option<String>,

    /// First identifier: a number, or `auto` to resume from the checkpoint
    ///
    /// After a completed run, `auto` continues past the highest identifier
    /// stored so far. Identifiers below it that an explicit `--start` left
    /// out are not revisited; they are reported and need their own `--start`.
    #[arg(long, default_value = "auto", value_parser = parse_start)]
    start: StartPoint,

    /// Last identifier, or `+COUNT` for a number of identifiers from the start
    #[arg(long, value_parser = parse_end)]
    end: Option<EndPoint>,

    /// Override the number of fetch workers
    #[arg(long)]
    concurrency: Option<usize>,

    /// Override the per-host politeness delay (milliseconds)
    #[arg(long, value_name = "MS")]
    rate_delay: Option<u64>,

    /// Drop politeness delays and multiply concurrency
    #[arg(long)]
    fast: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Show what would be crawled without fetching anything
    #[arg(long, conflicts_with_all = ["stats", "rebuild_checkpoint", "purge"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "rebuild_checkpoint", "purge"])]
    stats: bool,

    /// Repair the source's checkpoint from its stored records and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats", "purge"])]
    rebuild_checkpoint: bool,

    /// Delete every record, visited URL and the checkpoint of the source and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats", "rebuild_checkpoint"])]
    purge: bool,
}

fn parse_start(value: &str) -> Result<StartPoint, String> {
    if value.eq_ignore_ascii_case("auto") {
        return Ok(StartPoint::Auto);
    }
    value
        .parse()
        .map(StartPoint::At)
        .map_err(|_| format!("expected `auto` or an identifier, got '{}'", value))
}

fn parse_end(value: &str) -> Result<EndPoint, String> {
    match value.strip_prefix('+') {
        Some(count) => count
            .parse()
            .map(EndPoint::Count)
            .map_err(|_| format!("expected a count after '+', got '{}'", count)),
        None => value
            .parse()
            .map(EndPoint::At)
            .map_err(|_| format!("expected an identifier or +COUNT, got '{}'", value)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("corpus_harvest=info,warn"),
            1 => EnvFilter::new("corpus_harvest=debug,info"),
            2 => EnvFilter::new("corpus_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::debug!("Configuration hash: {}", config_hash);

    if let Some(concurrency) = cli.concurrency {
        config.engine.concurrency = concurrency;
    }
    if let Some(rate_delay) = cli.rate_delay {
        config.engine.rate_delay_ms = rate_delay;
    }
    if cli.fast {
        config.engine.fast_mode = true;
    }
    validate(&config).context("Invalid command-line override")?;

    if cli.stats {
        handle_stats(&config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let source = resolve_source(&config, cli.source.as_deref())?;

    if cli.rebuild_checkpoint {
        handle_rebuild_checkpoint(&config, &source)?;
        return Ok(ExitCode::SUCCESS);
    }
    if cli.purge {
        handle_purge(&config, &source)?;
        return Ok(ExitCode::SUCCESS);
    }

    let request = CrawlRequest {
        source,
        start: cli.start,
        end: cli.end.unwrap_or(EndPoint::Configured),
    };
    let scheduler = CrawlScheduler::from_config(config, config_hash);

    if cli.dry_run {
        handle_dry_run(&scheduler, &request)?;
        return Ok(ExitCode::SUCCESS);
    }

    handle_crawl(&scheduler, request).await
}

/// Picks the source named on the command line, or the only configured one
fn resolve_source(config: &Config, requested: Option<&str>) -> anyhow::Result<String> {
    match requested {
        Some(name) => {
            if config.source(name).is_none() {
                anyhow::bail!("Unknown source '{}'", name);
            }
            Ok(name.to_string())
        }
        None => match config.sources.as_slice() {
            [only] => Ok(only.name.clone()),
            sources => anyhow::bail!(
                "--source is required; configured sources: {}",
                sources
                    .iter()
                    .map(|s| s.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        },
    }
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = open_store(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&store)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --rebuild-checkpoint mode
fn handle_rebuild_checkpoint(config: &Config, source: &str) -> anyhow::Result<()> {
    let source_config = config
        .source(source)
        .with_context(|| format!("Unknown source '{}'", source))?;
    let Some(template) = source_config.template()? else {
        anyhow::bail!(
            "Source '{}' has no url-template; only numeric sources carry identifiers",
            source
        );
    };

    let mut store = open_store(Path::new(&config.output.database_path))?;
    match store.rebuild_checkpoint(source, &template)? {
        Some(checkpoint) => {
            println!("Checkpoint for {}:", source);
            println!(
                "  Last identifier: {}",
                checkpoint
                    .last_identifier
                    .map_or_else(|| "-".to_string(), |id| id.to_string())
            );
            println!("  Last URL: {}", checkpoint.last_url.as_deref().unwrap_or("-"));
            println!("  Status: {}", checkpoint.status);
        }
        None => println!("No records or checkpoint stored for {}", source),
    }

    Ok(())
}

/// Handles the --purge mode
fn handle_purge(config: &Config, source: &str) -> anyhow::Result<()> {
    let mut store = open_store(Path::new(&config.output.database_path))?;
    let purged = store.purge_source(source)?;

    tracing::info!("Purged source {}", source);
    println!("Purged {}:", source);
    println!("  Records: {}", purged.records);
    println!("  Visited URLs: {}", purged.visited);
    println!(
        "  Checkpoint: {}",
        if purged.checkpoint { "removed" } else { "none" }
    );

    Ok(())
}

/// Handles the --dry-run mode: shows the resolved work without crawling
fn handle_dry_run(scheduler: &CrawlScheduler, request: &CrawlRequest) -> anyhow::Result<()> {
    let plan = scheduler.plan(request)?;
    let engine = &scheduler.config().engine;

    println!("=== Corpus-Harvest Dry Run ===\n");
    println!("Source: {}", plan.source);
    println!(
        "Workers: {} (per host: {}, delay: {:?})",
        engine.effective_concurrency(),
        engine.effective_per_host_concurrency(),
        engine.effective_rate_delay()
    );

    match &plan.checkpoint {
        Some(checkpoint) => println!(
            "Checkpoint: last={} status={}",
            checkpoint
                .last_identifier
                .map_or_else(|| "-".to_string(), |id| id.to_string()),
            checkpoint.status
        ),
        None => println!("Checkpoint: none"),
    }
    println!("Visited URLs: {}", plan.visited);
    if plan.skipped_below > 0 {
        println!(
            "Not revisited by auto start: {} unvisited identifiers below the resume point",
            plan.skipped_below
        );
    }

    match (&plan.range, plan.pending) {
        (Some(range), Some(pending)) => println!(
            "Would fetch {} of identifiers {}..={}",
            pending,
            range.start(),
            range.end()
        ),
        (None, Some(_)) => println!("Identifier range is empty, nothing to fetch"),
        _ => println!("Items are discovered from listing pages at run time"),
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(scheduler: &CrawlScheduler, request: CrawlRequest) -> anyhow::Result<ExitCode> {
    let cancel = CancellationToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, pausing after in-flight items");
            interrupt.cancel();
        }
    });

    let summary = scheduler.run(request, cancel).await?;
    print_session_report(&summary);

    Ok(match summary.status {
        RunPhase::Completed => ExitCode::SUCCESS,
        RunPhase::Paused => ExitCode::from(2),
        _ => ExitCode::from(1),
    })
}
