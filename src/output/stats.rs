//! Store statistics display
//!
//! Prints what the content store holds: records per source, content type and
//! language, the visited set size and every checkpoint.

use crate::storage::{ContentStore, StoreStatistics};
use crate::Result;
use std::collections::BTreeMap;

/// Loads statistics from the store
pub fn load_statistics(store: &dyn ContentStore) -> Result<StoreStatistics> {
    Ok(store.stats()?)
}

fn print_breakdown(title: &str, counts: &BTreeMap<String, u64>, total: u64) {
    if counts.is_empty() {
        return;
    }

    println!("{}:", title);
    // Sort by count (descending), then name
    let mut sorted: Vec<_> = counts.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    for (name, count) in sorted {
        let percentage = if total > 0 {
            (*count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", name, count, percentage);
    }
    println!();
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Store Statistics ===\n");

    println!("Overview:");
    println!("  Total records: {}", stats.total_records);
    println!("  Visited URLs: {}", stats.visited_urls);
    println!();

    print_breakdown("Records by Source", &stats.by_source, stats.total_records);
    print_breakdown(
        "Records by Content Type",
        &stats.by_content_type,
        stats.total_records,
    );
    print_breakdown("Records by Language", &stats.by_language, stats.total_records);

    if !stats.checkpoints.is_empty() {
        println!("Checkpoints:");
        for checkpoint in &stats.checkpoints {
            println!(
                "  {}: last={} status={} updated={}",
                checkpoint.source,
                checkpoint
                    .last_identifier
                    .map_or_else(|| "-".to_string(), |id| id.to_string()),
                checkpoint.status,
                checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        println!();
    }
}
