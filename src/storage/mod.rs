//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the engine, including:
//! - SQLite database initialization and schema management
//! - Deduplicating record inserts (by URL and by content fingerprint)
//! - The visited set and per-source checkpoints
//! - Run tracking
//! - The single writer task that serializes every mutation during a crawl

mod schema;
mod sqlite;
mod traits;
mod writer;

pub use sqlite::SqliteContentStore;
pub use traits::{ContentStore, StorageError, StorageResult};
pub use writer::{StoreWriter, WriterTask};

use crate::state::{Checkpoint, CheckpointStatus};
use crate::HarvestError;
use std::collections::BTreeMap;
use std::path::Path;

/// Opens or creates the content store database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteContentStore)` - Successfully initialized store
/// * `Err(HarvestError)` - Failed to open the database
pub fn open_store(path: &Path) -> Result<SqliteContentStore, HarvestError> {
    SqliteContentStore::new(path)
}

/// Result of a deduplicating save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The record was new and is now stored
    Inserted,

    /// A record with the same URL (or ID) already exists
    DuplicateUrl,

    /// A record with the same content fingerprint already exists
    DuplicateFingerprint,
}

impl SaveOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// Filters for [`ContentStore::query`]
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub source: Option<String>,
    pub content_type: Option<String>,
    pub language: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryFilter {
    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub source: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: CheckpointStatus,
    pub totals: RunTotals,
}

/// Counters persisted on a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub total: u64,
    pub accepted: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Rows removed by a purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub records: usize,
    pub visited: usize,
    pub checkpoint: bool,
}

/// Aggregated store contents
#[derive(Debug, Clone, Default)]
pub struct StoreStatistics {
    pub total_records: u64,
    pub by_source: BTreeMap<String, u64>,
    pub by_content_type: BTreeMap<String, u64>,
    pub by_language: BTreeMap<String, u64>,
    pub visited_urls: u64,
    pub checkpoints: Vec<Checkpoint>,
}
