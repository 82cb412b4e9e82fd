//! Running progress and the end-of-session report

use crate::crawler::{ItemOutcome, SkipReason};
use crate::state::{Checkpoint, RunPhase};
use crate::storage::RunTotals;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Per-run item counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlCounters {
    /// Items that reached a final outcome
    pub processed: u64,
    pub accepted: u64,
    pub skipped_not_found: u64,
    pub skipped_duplicate: u64,
    pub skipped_invalid: u64,
    pub skipped_robots: u64,
    /// Fetch failures after retries
    pub errors: u64,
    pub store_failures: u64,
}

impl CrawlCounters {
    /// Counts one outcome
    pub fn record(&mut self, outcome: &ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Accepted => self.accepted += 1,
            ItemOutcome::Skipped(SkipReason::NotFound) => self.skipped_not_found += 1,
            ItemOutcome::Skipped(SkipReason::DuplicateUrl)
            | ItemOutcome::Skipped(SkipReason::DuplicateFingerprint) => {
                self.skipped_duplicate += 1
            }
            ItemOutcome::Skipped(SkipReason::ParseFailed)
            | ItemOutcome::Skipped(SkipReason::Invalid(_)) => self.skipped_invalid += 1,
            ItemOutcome::Skipped(SkipReason::RobotsDenied) => self.skipped_robots += 1,
            ItemOutcome::Failed(_) => self.errors += 1,
            ItemOutcome::StoreFailed(_) => self.store_failures += 1,
        }
    }

    pub fn skipped(&self) -> u64 {
        self.skipped_not_found + self.skipped_duplicate + self.skipped_invalid + self.skipped_robots
    }

    /// Totals persisted on the run row
    pub fn totals(&self) -> RunTotals {
        RunTotals {
            total: self.processed,
            accepted: self.accepted,
            skipped: self.skipped(),
            errors: self.errors + self.store_failures,
        }
    }
}

/// Items per minute over `elapsed`
pub fn per_minute(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return 0.0;
    }
    count as f64 * 60.0 / secs
}

/// Formats a duration as `1h 02m 03s`, `2m 03s` or `3s`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Consumes item outcomes until every sender is gone
///
/// Logs a progress line every `progress_interval` items with throughput and
/// an ETA against `expected_total`.
///
/// # Arguments
///
/// * `outcomes` - Outcome channel fed by the worker pool
/// * `expected_total` - Number of items queued for this run
/// * `progress_interval` - Items between progress lines; 0 disables them
///
/// # Returns
///
/// The final counters
pub async fn collect_outcomes(
    mut outcomes: mpsc::UnboundedReceiver<ItemOutcome>,
    expected_total: u64,
    progress_interval: u64,
) -> CrawlCounters {
    let started = Instant::now();
    let mut counters = CrawlCounters::default();

    while let Some(outcome) = outcomes.recv().await {
        counters.record(&outcome);

        if progress_interval > 0 && counters.processed % progress_interval == 0 {
            let rate = per_minute(counters.processed, started.elapsed());
            let remaining = expected_total.saturating_sub(counters.processed);
            let eta = if rate > 0.0 {
                format_duration(Duration::from_secs_f64(remaining as f64 * 60.0 / rate))
            } else {
                "unknown".to_string()
            };
            tracing::info!(
                "Progress: {}/{} processed, {} accepted, {} skipped, {} errors ({:.1} pages/min, ETA {})",
                counters.processed,
                expected_total,
                counters.accepted,
                counters.skipped(),
                counters.errors,
                rate,
                eta
            );
        }
    }

    counters
}

/// Outcome of one crawl session
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub source: String,
    /// Terminal phase: Completed, Paused or Error
    pub status: RunPhase,
    /// Items queued after visited filtering
    pub queued: u64,
    pub counters: CrawlCounters,
    pub elapsed: Duration,
    /// Checkpoint as stored after the session
    pub checkpoint: Option<Checkpoint>,
}

impl CrawlSummary {
    pub fn pages_per_minute(&self) -> f64 {
        per_minute(self.counters.processed, self.elapsed)
    }
}

fn checkpoint_heading(status: RunPhase) -> &'static str {
    if status == RunPhase::Error {
        "Last successful checkpoint"
    } else {
        "Checkpoint"
    }
}

/// Prints the final session report to stdout
///
/// An `Error` session also prints the last checkpoint so the operator can
/// resume from it.
pub fn print_session_report(summary: &CrawlSummary) {
    let counters = &summary.counters;

    println!("=== Session Report: {} ===\n", summary.source);
    println!("Status: {}", summary.status);
    println!("Elapsed: {}", format_duration(summary.elapsed));
    println!("Throughput: {:.1} pages/min", summary.pages_per_minute());
    println!();

    println!("Items:");
    println!("  Queued: {}", summary.queued);
    println!("  Processed: {}", counters.processed);
    println!("  Accepted: {}", counters.accepted);
    println!("  Skipped: {}", counters.skipped());
    println!("    Gaps (not found): {}", counters.skipped_not_found);
    println!("    Duplicates: {}", counters.skipped_duplicate);
    println!("    Invalid or unparsable: {}", counters.skipped_invalid);
    println!("    Blocked by robots.txt: {}", counters.skipped_robots);
    println!("  Errors: {}", counters.errors);
    if counters.store_failures > 0 {
        println!("  Store failures: {}", counters.store_failures);
    }
    println!();

    match &summary.checkpoint {
        Some(checkpoint) => {
            println!("{}:", checkpoint_heading(summary.status));
            println!(
                "  Last identifier: {}",
                checkpoint
                    .last_identifier
                    .map_or_else(|| "-".to_string(), |id| id.to_string())
            );
            println!(
                "  Last URL: {}",
                checkpoint.last_url.as_deref().unwrap_or("-")
            );
            println!("  Status: {}", checkpoint.status);
            println!("  Updated: {}", checkpoint.updated_at.to_rfc3339());
        }
        None => println!("No checkpoint recorded"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ValidationError;

    #[test]
    fn test_error_report_points_at_last_good_checkpoint() {
        assert_eq!(
            checkpoint_heading(RunPhase::Error),
            "Last successful checkpoint"
        );
        assert_eq!(checkpoint_heading(RunPhase::Paused), "Checkpoint");
    }

    #[test]
    fn test_counters_classify_outcomes() {
        let mut counters = CrawlCounters::default();
        for outcome in [
            ItemOutcome::Accepted,
            ItemOutcome::Accepted,
            ItemOutcome::Skipped(SkipReason::NotFound),
            ItemOutcome::Skipped(SkipReason::DuplicateFingerprint),
            ItemOutcome::Skipped(SkipReason::Invalid(ValidationError::MissingField("title"))),
            ItemOutcome::Skipped(SkipReason::RobotsDenied),
            ItemOutcome::Failed("HTTP 503".to_string()),
        ] {
            counters.record(&outcome);
        }

        assert_eq!(counters.processed, 7);
        assert_eq!(counters.accepted, 2);
        assert_eq!(counters.skipped(), 4);
        assert_eq!(counters.errors, 1);
        assert_eq!(
            counters.totals(),
            RunTotals {
                total: 7,
                accepted: 2,
                skipped: 4,
                errors: 1,
            }
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3)), "3s");
        assert_eq!(format_duration(Duration::from_secs(123)), "2m 03s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h 02m 03s");
    }

    #[test]
    fn test_per_minute() {
        assert_eq!(per_minute(10, Duration::ZERO), 0.0);
        assert!((per_minute(30, Duration::from_secs(30)) - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_collect_outcomes_until_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let collector = tokio::spawn(collect_outcomes(rx, 3, 1));
        tx.send(ItemOutcome::Accepted).unwrap();
        tx.send(ItemOutcome::Skipped(SkipReason::NotFound)).unwrap();
        tx.send(ItemOutcome::StoreFailed("disk full".to_string())).unwrap();
        drop(tx);

        let counters = collector.await.unwrap();
        assert_eq!(counters.processed, 3);
        assert_eq!(counters.store_failures, 1);
    }
}
