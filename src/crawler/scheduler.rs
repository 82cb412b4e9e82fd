//! Crawl session scheduler
//!
//! The scheduler drives one source through the run phases:
//!
//! 1. Initializing: open the store, repair the checkpoint, load the visited
//!    set, register the run
//! 2. Discovering: compute the work list (a numeric identifier range or a
//!    bounded crawl of listing pages)
//! 3. Draining: feed the worker pool and collect outcomes
//! 4. Finalizing: flush the writer and persist the terminal checkpoint
//!
//! Cancellation at any point leads to Finalizing with a `Paused` outcome.

use crate::config::{Config, SourceConfig};
use crate::crawler::{
    build_http_client, Discoverer, FetchResult, FetchWorkerPool, Parser, PoliteFetcher,
    PoliteRateLimiter, RetryPolicy, SelectorDiscoverer, SelectorParser, WorkItem, WorkerContext,
};
use crate::guard::{ResourceGuard, ResourceProbe};
use crate::output::{collect_outcomes, CrawlCounters, CrawlSummary};
use crate::robots::{RobotsCache, RobotsCheck};
use crate::state::{Checkpoint, CheckpointStatus, RunPhase};
use crate::storage::{ContentStore, SqliteContentStore, StoreWriter};
use crate::url::{host_key, normalize_url, UrlTemplate};
use crate::{ConfigError, HarvestError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// First identifier of a numeric crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPoint {
    /// Resume from the stored checkpoint
    Auto,
    At(u64),
}

/// Last identifier of a numeric crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndPoint {
    /// The source's configured `end-id`
    Configured,
    At(u64),
    /// This many identifiers starting at the start point
    Count(u64),
}

/// One crawl session request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRequest {
    pub source: String,
    pub start: StartPoint,
    pub end: EndPoint,
}

impl CrawlRequest {
    /// Requests an `auto` start up to the configured end
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            start: StartPoint::Auto,
            end: EndPoint::Configured,
        }
    }

    pub fn start_at(mut self, identifier: u64) -> Self {
        self.start = StartPoint::At(identifier);
        self
    }

    pub fn end_at(mut self, identifier: u64) -> Self {
        self.end = EndPoint::At(identifier);
        self
    }

    pub fn count(mut self, count: u64) -> Self {
        self.end = EndPoint::Count(count);
        self
    }
}

/// What a run would do, computed without fetching or writing
#[derive(Debug, Clone)]
pub struct CrawlPlan {
    pub source: String,
    pub checkpoint: Option<Checkpoint>,
    /// Identifier range of a numeric source; `None` if empty or discovered
    pub range: Option<RangeInclusive<u64>>,
    /// Unvisited identifiers in the range; `None` for discovered sources
    pub pending: Option<u64>,
    /// Unvisited identifiers between the configured start and an `auto`
    /// resume point; these are only crawled with an explicit `--start`
    pub skipped_below: u64,
    pub visited: usize,
}

type WorkIter = Box<dyn Iterator<Item = WorkItem> + Send>;

/// Phase bookkeeping with transition checks
struct PhaseTracker<'a> {
    source: &'a str,
    phase: RunPhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            phase: RunPhase::Initializing,
        }
    }

    fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::debug!("{}: {} -> {}", self.source, self.phase, next);
        self.phase = next;
        Ok(())
    }
}

/// Runs crawl sessions for the sources of one configuration
pub struct CrawlScheduler {
    config: Config,
    config_hash: String,
    guard: Arc<ResourceGuard>,
    parsers: HashMap<String, Arc<dyn Parser>>,
    discoverers: HashMap<String, Arc<dyn Discoverer>>,
    robots: Option<Arc<dyn RobotsCheck>>,
}

impl CrawlScheduler {
    /// Creates a scheduler
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `config_hash` - Hash of the configuration file, stored with each run
    pub fn from_config(config: Config, config_hash: impl Into<String>) -> Self {
        let guard = Arc::new(ResourceGuard::new(&config.resources));
        Self {
            config,
            config_hash: config_hash.into(),
            guard,
            parsers: HashMap::new(),
            discoverers: HashMap::new(),
            robots: None,
        }
    }

    /// Replaces the selector parser of one source
    pub fn with_parser(mut self, source: impl Into<String>, parser: Arc<dyn Parser>) -> Self {
        self.parsers.insert(source.into(), parser);
        self
    }

    /// Replaces the selector discoverer of one source
    pub fn with_discoverer(
        mut self,
        source: impl Into<String>,
        discoverer: Arc<dyn Discoverer>,
    ) -> Self {
        self.discoverers.insert(source.into(), discoverer);
        self
    }

    /// Samples host load through `probe` instead of the system
    pub fn with_probe(mut self, probe: Box<dyn ResourceProbe>) -> Self {
        self.guard = Arc::new(ResourceGuard::with_probe(&self.config.resources, probe));
        self
    }

    /// Replaces the robots.txt check used by sources that respect robots
    pub fn with_robots(mut self, robots: Arc<dyn RobotsCheck>) -> Self {
        self.robots = Some(robots);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn source(&self, name: &str) -> Result<&SourceConfig> {
        self.config
            .source(name)
            .ok_or_else(|| HarvestError::UnknownSource(name.to_string()))
    }

    fn open_store(&self) -> Result<SqliteContentStore> {
        SqliteContentStore::new(Path::new(&self.config.output.database_path))
    }

    fn parser_for(&self, source: &SourceConfig) -> Result<Arc<dyn Parser>> {
        match self.parsers.get(&source.name) {
            Some(parser) => Ok(Arc::clone(parser)),
            None => Ok(Arc::new(SelectorParser::from_config(source)?)),
        }
    }

    fn discoverer_for(&self, source: &SourceConfig) -> Result<Arc<dyn Discoverer>> {
        if let Some(discoverer) = self.discoverers.get(&source.name) {
            return Ok(Arc::clone(discoverer));
        }
        let config = source.discovery.as_ref().ok_or_else(|| {
            ConfigError::Validation(format!(
                "Source '{}' has seeds but no [source.discovery] section",
                source.name
            ))
        })?;
        Ok(Arc::new(SelectorDiscoverer::from_config(config)?))
    }

    fn build_fetcher(&self, source: &SourceConfig) -> Result<PoliteFetcher> {
        let engine = &self.config.engine;
        let client = build_http_client(&self.config.user_agent, engine.request_timeout())?;

        let limiter = Arc::new(PoliteRateLimiter::new(
            engine.effective_rate_delay(),
            engine.effective_per_host_concurrency(),
        ));
        if !engine.fast_mode {
            for (host, delay_ms) in &source.host_delays {
                limiter.set_delay(&host.to_lowercase(), Duration::from_millis(*delay_ms));
            }
        }

        let robots = if source.respect_robots {
            Some(match &self.robots {
                Some(robots) => Arc::clone(robots),
                None => Arc::new(RobotsCache::new(
                    client.clone(),
                    self.config.user_agent.crawler_name.clone(),
                )) as Arc<dyn RobotsCheck>,
            })
        } else {
            None
        };

        Ok(PoliteFetcher::new(
            client,
            limiter,
            Arc::clone(&self.guard),
            robots,
            RetryPolicy {
                max_retries: engine.max_retries,
                delay: engine.retry_delay(),
            },
        ))
    }

    /// Computes what a run would do without fetching or writing
    pub fn plan(&self, request: &CrawlRequest) -> Result<CrawlPlan> {
        let source = self.source(&request.source)?;
        let store = self.open_store()?;
        let checkpoint = store.get_checkpoint(&source.name)?;
        let visited = store.load_visited(&source.name)?;

        let (range, pending, skipped_below) = match source.template()? {
            Some(template) => {
                let range = resolve_range(source, checkpoint.as_ref(), request)?;
                let pending = count_pending(&template, range.as_ref(), &visited);
                let below =
                    unvisited_below_resume(source, checkpoint.as_ref(), request, &template, &visited);
                (range, Some(pending), below)
            }
            None => (None, None, 0),
        };

        Ok(CrawlPlan {
            source: source.name.clone(),
            checkpoint,
            range,
            pending,
            skipped_below,
            visited: visited.len(),
        })
    }

    /// Runs one crawl session to a terminal phase
    ///
    /// # Arguments
    ///
    /// * `request` - Source and identifier range
    /// * `cancel` - Cancelling pauses the run; items in flight finish first
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlSummary)` - The run reached Completed, Paused or Error
    /// * `Err(HarvestError)` - The run could not start
    pub async fn run(&self, request: CrawlRequest, cancel: CancellationToken) -> Result<CrawlSummary> {
        let started = Instant::now();
        let source = self.source(&request.source)?;
        let mut phase = PhaseTracker::new(&source.name);

        // ===== Initializing =====
        let template = source.template()?;
        let parser = self.parser_for(source)?;
        let listing = match &template {
            Some(_) => None,
            None => Some((self.discoverer_for(source)?, seed_urls(source)?)),
        };

        let mut store = self.open_store()?;
        if let Some(template) = &template {
            if let Some(repaired) = store.rebuild_checkpoint(&source.name, template)? {
                tracing::debug!(
                    "Checkpoint for {} at {:?} ({})",
                    source.name,
                    repaired.last_identifier,
                    repaired.status
                );
            }
        }
        let checkpoint = store.get_checkpoint(&source.name)?;
        let range = match &template {
            Some(_) => resolve_range(source, checkpoint.as_ref(), &request)?,
            None => None,
        };
        let visited = store.load_visited(&source.name)?;
        if let Some(template) = &template {
            let below =
                unvisited_below_resume(source, checkpoint.as_ref(), &request, template, &visited);
            if below > 0 {
                tracing::warn!(
                    "{} identifiers below the resume point of {} were never visited; \
                     pass --start {} to crawl them",
                    below,
                    source.name,
                    source.start_id
                );
            }
        }
        let fetcher = Arc::new(self.build_fetcher(source)?);

        let run_id = store.create_run(&source.name, &self.config_hash)?;
        store.update_checkpoint(&source.name, None, None, CheckpointStatus::Running)?;
        tracing::info!(
            "Starting run {} for {} ({} URLs already visited)",
            run_id,
            source.name,
            visited.len()
        );

        let run_token = cancel.child_token();

        // ===== Discovering =====
        phase.advance(RunPhase::Discovering)?;
        let (work, queued): (WorkIter, u64) = match (&template, listing) {
            (Some(template), _) => {
                let queued = count_pending(template, range.as_ref(), &visited);
                match &range {
                    Some(range) => tracing::info!(
                        "Identifiers {}..={}: {} pending",
                        range.start(),
                        range.end(),
                        queued
                    ),
                    None => tracing::info!("Identifier range is empty, nothing to fetch"),
                }
                (
                    numeric_work(&source.name, template.clone(), range, visited),
                    queued,
                )
            }
            (None, Some((discoverer, seeds))) => {
                let items = discover_items(
                    source,
                    seeds,
                    discoverer.as_ref(),
                    &fetcher,
                    &visited,
                    &run_token,
                )
                .await;
                let queued = items.len() as u64;
                tracing::info!("Discovered {} new item URLs", queued);
                (Box::new(items.into_iter()), queued)
            }
            (None, None) => (Box::new(std::iter::empty()), 0),
        };

        // ===== Draining =====
        let (mut store, counters) = if run_token.is_cancelled() {
            (store, CrawlCounters::default())
        } else {
            phase.advance(RunPhase::Draining)?;
            let (writer, writer_task) =
                StoreWriter::spawn(store, self.config.engine.write_batch_size);

            let mut counters = self
                .drain(source, work, queued, fetcher, parser, writer.clone(), &run_token)
                .await?;

            if let Err(e) = writer.flush().await {
                tracing::error!("Final flush failed: {}", e);
                counters.store_failures += 1;
            }
            drop(writer);
            (writer_task.join().await?, counters)
        };

        // ===== Finalizing =====
        phase.advance(RunPhase::Finalizing)?;
        let mut terminal = if counters.store_failures > 0 {
            RunPhase::Error
        } else if run_token.is_cancelled() || counters.errors > 0 {
            // Failed items stay unvisited; a paused checkpoint makes the
            // next auto start revisit them.
            RunPhase::Paused
        } else {
            RunPhase::Completed
        };

        let status = terminal
            .checkpoint_status()
            .unwrap_or(CheckpointStatus::Error);
        if let Err(e) = store.update_checkpoint(&source.name, None, None, status) {
            tracing::error!("Failed to write final checkpoint: {}", e);
            terminal = RunPhase::Error;
        }
        let status = terminal
            .checkpoint_status()
            .unwrap_or(CheckpointStatus::Error);
        if let Err(e) = store.finish_run(run_id, status, &counters.totals()) {
            tracing::warn!("Failed to record run totals: {}", e);
        }
        let checkpoint = store.get_checkpoint(&source.name).unwrap_or_else(|e| {
            tracing::warn!("Failed to read final checkpoint: {}", e);
            None
        });

        phase.advance(terminal)?;
        tracing::info!(
            "Run {} for {} finished {}: {} accepted, {} skipped, {} errors",
            run_id,
            source.name,
            terminal,
            counters.accepted,
            counters.skipped(),
            counters.errors
        );

        Ok(CrawlSummary {
            source: source.name.clone(),
            status: terminal,
            queued,
            counters,
            elapsed: started.elapsed(),
            checkpoint,
        })
    }

    /// Feeds the queue, runs the worker pool and collects outcomes
    #[allow(clippy::too_many_arguments)]
    async fn drain(
        &self,
        source: &SourceConfig,
        work: WorkIter,
        queued: u64,
        fetcher: Arc<PoliteFetcher>,
        parser: Arc<dyn Parser>,
        writer: StoreWriter,
        run_token: &CancellationToken,
    ) -> Result<CrawlCounters> {
        let engine = &self.config.engine;
        let concurrency = engine.effective_concurrency().max(1);

        let (queue_tx, queue_rx) = mpsc::channel(concurrency * 2);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let collector = tokio::spawn(collect_outcomes(
            outcome_rx,
            queued,
            engine.progress_interval,
        ));
        let feeder = tokio::spawn(feed_queue(work, queue_tx, run_token.clone()));

        let ctx = WorkerContext::new(
            source.name.clone(),
            fetcher,
            parser,
            source.validation_rules(),
            &source.absence_markers,
            writer,
        );
        FetchWorkerPool::new(ctx, concurrency)
            .run(queue_rx, outcome_tx, run_token.clone())
            .await;

        let fed = feeder.await?;
        let counters = collector.await?;
        tracing::debug!("Fed {} items to {} workers", fed, concurrency);
        Ok(counters)
    }
}

/// Resolves the identifier range of a numeric source
///
/// # Returns
///
/// * `Ok(Some(range))` - Identifiers to consider
/// * `Ok(None)` - The range is empty (start past end, or a zero count)
/// * `Err(HarvestError)` - No end was given and the source has no `end-id`
fn resolve_range(
    source: &SourceConfig,
    checkpoint: Option<&Checkpoint>,
    request: &CrawlRequest,
) -> Result<Option<RangeInclusive<u64>>> {
    let start = match request.start {
        StartPoint::At(identifier) => identifier,
        StartPoint::Auto => checkpoint.map_or(source.start_id, |cp| {
            cp.resume_point(source.start_id)
        }),
    };

    let end = match request.end {
        EndPoint::At(identifier) => identifier,
        EndPoint::Count(0) => return Ok(None),
        EndPoint::Count(count) => start.saturating_add(count - 1),
        EndPoint::Configured => source.end_id.ok_or_else(|| {
            ConfigError::Validation(format!(
                "Source '{}' has no end-id; pass an explicit end or count",
                source.name
            ))
        })?,
    };

    Ok((start <= end).then_some(start..=end))
}

/// Counts unvisited identifiers an `auto` start jumps over
///
/// A completed checkpoint resumes after its last identifier, which can sit
/// above a never-crawled stretch when an earlier run used an explicit start.
fn unvisited_below_resume(
    source: &SourceConfig,
    checkpoint: Option<&Checkpoint>,
    request: &CrawlRequest,
    template: &UrlTemplate,
    visited: &HashSet<String>,
) -> u64 {
    if request.start != StartPoint::Auto {
        return 0;
    }
    let resume = checkpoint.map_or(source.start_id, |cp| cp.resume_point(source.start_id));
    let below = (resume > source.start_id).then(|| source.start_id..=resume - 1);
    count_pending(template, below.as_ref(), visited)
}

fn count_pending(
    template: &UrlTemplate,
    range: Option<&RangeInclusive<u64>>,
    visited: &HashSet<String>,
) -> u64 {
    range
        .cloned()
        .into_iter()
        .flatten()
        .filter(|id| !visited.contains(&template.render(*id)))
        .count() as u64
}

/// Lazily yields the unvisited work items of an identifier range
fn numeric_work(
    source: &str,
    template: UrlTemplate,
    range: Option<RangeInclusive<u64>>,
    visited: HashSet<String>,
) -> WorkIter {
    let source = source.to_string();
    Box::new(range.into_iter().flatten().filter_map(move |id| {
        if visited.contains(&template.render(id)) {
            return None;
        }
        match WorkItem::numeric(&source, id, &template) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("Skipping identifier {}: {}", id, e);
                None
            }
        }
    }))
}

fn seed_urls(source: &SourceConfig) -> Result<Vec<Url>> {
    source
        .seeds
        .iter()
        .map(|seed| normalize_url(seed).map_err(HarvestError::from))
        .collect()
}

/// Crawls listing pages breadth first and collects unvisited item URLs
///
/// Each listing page is fetched at most once. Expansion stops at
/// `max-pages` fetched listings or `max-depth` levels below the seeds.
async fn discover_items(
    source: &SourceConfig,
    seeds: Vec<Url>,
    discoverer: &dyn Discoverer,
    fetcher: &PoliteFetcher,
    visited: &HashSet<String>,
    cancel: &CancellationToken,
) -> Vec<WorkItem> {
    let mut frontier: VecDeque<(Url, u32)> = seeds.into_iter().map(|url| (url, 0)).collect();
    let mut seen_pages = HashSet::new();
    let mut seen_items = HashSet::new();
    let mut items = Vec::new();
    let mut fetched = 0;

    while let Some((page, depth)) = frontier.pop_front() {
        if cancel.is_cancelled() {
            tracing::info!("Discovery cancelled after {} listing pages", fetched);
            break;
        }
        if fetched >= source.max_pages {
            tracing::info!("Reached max-pages ({}) during discovery", source.max_pages);
            break;
        }
        if !seen_pages.insert(page.as_str().to_string()) {
            continue;
        }

        fetched += 1;
        let body = match fetcher.fetch(&page, &host_key(&page)).await {
            FetchResult::Success { body, .. } => body,
            FetchResult::Disallowed => {
                tracing::debug!("Listing page blocked by robots.txt: {}", page);
                continue;
            }
            other => {
                tracing::warn!("Listing page {} unavailable: {:?}", page, other);
                continue;
            }
        };

        let found = discoverer.discover(&page, &body);
        tracing::debug!(
            "{} (depth {}): {} items, {} listings",
            page,
            depth,
            found.items.len(),
            found.more.len()
        );

        for url in found.items {
            if visited.contains(url.as_str()) || !seen_items.insert(url.as_str().to_string()) {
                continue;
            }
            items.push(WorkItem::discovered(&source.name, url));
        }

        if depth < source.max_depth {
            for url in found.more {
                if !seen_pages.contains(url.as_str()) {
                    frontier.push_back((url, depth + 1));
                }
            }
        }
    }

    items
}

/// Sends work items into the bounded queue until exhausted or cancelled
async fn feed_queue(work: WorkIter, queue: mpsc::Sender<WorkItem>, cancel: CancellationToken) -> u64 {
    let mut fed = 0;
    for item in work {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = queue.send(item) => {
                if sent.is_err() {
                    break;
                }
                fed += 1;
            }
        }
    }
    fed
}
