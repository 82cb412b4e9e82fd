//! Output module for crawl progress and reports
//!
//! This module handles:
//! - Counting item outcomes and logging running progress with an ETA
//! - The end-of-session report
//! - Store statistics for the `--stats` command

mod report;
pub mod stats;

pub use report::{
    collect_outcomes, format_duration, per_minute, print_session_report, CrawlCounters,
    CrawlSummary,
};
pub use stats::{load_statistics, print_statistics};
