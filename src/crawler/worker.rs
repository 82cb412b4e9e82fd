//! Fetch workers
//!
//! Workers pull [`WorkItem`]s from a shared queue, fetch them politely, parse
//! and validate the page, and hand accepted records to the store writer. Each
//! finished item produces exactly one [`ItemOutcome`] on the outcome channel.

use crate::content::{validate, ValidationError, ValidationRules};
use crate::crawler::{FetchResult, Parser, PoliteFetcher, WorkItem};
use crate::storage::{SaveOutcome, StoreWriter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Why an item was skipped rather than accepted
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// 404/410 or an absence marker: a gap in the URL space
    NotFound,
    DuplicateUrl,
    DuplicateFingerprint,
    /// The parser found no usable content
    ParseFailed,
    /// The record failed validation
    Invalid(ValidationError),
    /// robots.txt forbids the URL
    RobotsDenied,
}

/// Result of processing one work item
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Accepted,
    Skipped(SkipReason),
    /// Fetch failed; the URL stays unvisited so a later run retries it
    Failed(String),
    /// The store rejected a write; the run stops
    StoreFailed(String),
}

/// Everything a worker needs to process items of one source
pub struct WorkerContext {
    pub source: String,
    pub fetcher: Arc<PoliteFetcher>,
    pub parser: Arc<dyn Parser>,
    pub rules: ValidationRules,
    absence_markers: Vec<String>,
    pub writer: StoreWriter,
}

impl WorkerContext {
    /// Creates a context
    ///
    /// # Arguments
    ///
    /// * `source` - Source name
    /// * `fetcher` - Shared polite fetcher
    /// * `parser` - Page parser of the source
    /// * `rules` - Validation rules of the source
    /// * `absence_markers` - Phrases that mark a 200 page as missing content
    /// * `writer` - Store writer handle
    pub fn new(
        source: impl Into<String>,
        fetcher: Arc<PoliteFetcher>,
        parser: Arc<dyn Parser>,
        rules: ValidationRules,
        absence_markers: &[String],
        writer: StoreWriter,
    ) -> Self {
        Self {
            source: source.into(),
            fetcher,
            parser,
            rules,
            absence_markers: absence_markers
                .iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            writer,
        }
    }

    /// Returns true if the page announces that the requested content is missing
    fn is_absent(&self, body: &str) -> bool {
        if self.absence_markers.is_empty() {
            return false;
        }
        let lowered = body.to_lowercase();
        self.absence_markers.iter().any(|m| lowered.contains(m))
    }

    /// Marks the item visited and reports it skipped
    async fn skip_visited(&self, item: &WorkItem, reason: SkipReason) -> ItemOutcome {
        match self.writer.mark_visited(item.url.as_str(), &self.source).await {
            Ok(()) => ItemOutcome::Skipped(reason),
            Err(e) => {
                tracing::error!("Failed to mark {} visited: {}", item.url, e);
                ItemOutcome::StoreFailed(e.to_string())
            }
        }
    }
}

/// Processes one work item end to end
///
/// # Visited Marking
///
/// | Outcome | Marked visited |
/// |---------|----------------|
/// | Accepted, duplicate | yes, atomically with the save |
/// | Gap, parse failure, invalid | yes |
/// | Robots denied, fetch failure | no |
pub async fn process_item(ctx: &WorkerContext, item: &WorkItem) -> ItemOutcome {
    let body = match ctx.fetcher.fetch(&item.url, &item.host).await {
        FetchResult::Success { body, .. } => body,
        FetchResult::NotFound { status_code } => {
            tracing::debug!("Gap at {} (HTTP {})", item.url, status_code);
            return ctx.skip_visited(item, SkipReason::NotFound).await;
        }
        FetchResult::Disallowed => {
            tracing::debug!("Blocked by robots.txt: {}", item.url);
            return ItemOutcome::Skipped(SkipReason::RobotsDenied);
        }
        FetchResult::Transient { error, .. } => {
            tracing::warn!("Giving up on {} after retries: {}", item.url, error);
            return ItemOutcome::Failed(error);
        }
        FetchResult::Failed { error, .. } => {
            tracing::warn!("Failed to fetch {}: {}", item.url, error);
            return ItemOutcome::Failed(error);
        }
    };

    if ctx.is_absent(&body) {
        tracing::debug!("Absence marker on {}", item.url);
        return ctx.skip_visited(item, SkipReason::NotFound).await;
    }

    let parsed = catch_unwind(AssertUnwindSafe(|| ctx.parser.parse(&body, item)));
    let record = match parsed {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::debug!("No content extracted from {}", item.url);
            return ctx.skip_visited(item, SkipReason::ParseFailed).await;
        }
        Err(_) => {
            tracing::warn!("Parser panicked on {}", item.url);
            return ctx.skip_visited(item, SkipReason::ParseFailed).await;
        }
    };

    if let Err(e) = validate(&record, &ctx.rules) {
        tracing::debug!("Rejected {}: {}", item.url, e);
        return ctx.skip_visited(item, SkipReason::Invalid(e)).await;
    }

    match ctx
        .writer
        .accept(record, item.url.as_str(), item.identifier)
        .await
    {
        Ok(SaveOutcome::Inserted) => {
            tracing::trace!("Accepted {}", item.url);
            ItemOutcome::Accepted
        }
        Ok(SaveOutcome::DuplicateUrl) => {
            tracing::debug!("Duplicate URL {}", item.url);
            ItemOutcome::Skipped(SkipReason::DuplicateUrl)
        }
        Ok(SaveOutcome::DuplicateFingerprint) => {
            tracing::debug!("Duplicate content at {}", item.url);
            ItemOutcome::Skipped(SkipReason::DuplicateFingerprint)
        }
        Err(e) => {
            tracing::error!("Failed to save {}: {}", item.url, e);
            ItemOutcome::StoreFailed(e.to_string())
        }
    }
}

/// Fixed-size pool of fetch workers sharing one queue
pub struct FetchWorkerPool {
    ctx: Arc<WorkerContext>,
    size: usize,
}

impl FetchWorkerPool {
    pub fn new(ctx: WorkerContext, size: usize) -> Self {
        Self {
            ctx: Arc::new(ctx),
            size: size.max(1),
        }
    }

    /// Runs workers until the queue is drained or `cancel` fires
    ///
    /// A store failure cancels `cancel` so the feeder and the other workers
    /// stop; in-flight items still report their outcomes.
    ///
    /// # Arguments
    ///
    /// * `queue` - Work items to process
    /// * `outcomes` - Receives one outcome per finished item
    /// * `cancel` - Run cancellation token
    pub async fn run(
        self,
        queue: mpsc::Receiver<WorkItem>,
        outcomes: mpsc::UnboundedSender<ItemOutcome>,
        cancel: CancellationToken,
    ) {
        let queue = Arc::new(Mutex::new(queue));
        let mut workers = JoinSet::new();

        for worker_id in 0..self.size {
            let queue = Arc::clone(&queue);
            let ctx = Arc::clone(&self.ctx);
            let outcomes = outcomes.clone();
            let cancel = cancel.clone();

            workers.spawn(async move {
                loop {
                    let next = {
                        let mut queue = queue.lock().await;
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            item = queue.recv() => item,
                        }
                    };
                    let Some(item) = next else {
                        break;
                    };

                    let outcome = process_item(&ctx, &item).await;
                    if matches!(outcome, ItemOutcome::StoreFailed(_)) {
                        cancel.cancel();
                    }
                    if outcomes.send(outcome).is_err() {
                        break;
                    }
                }
                tracing::trace!("Worker {} finished", worker_id);
            });
        }
        drop(outcomes);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker task failed: {}", e);
            }
        }
    }
}
