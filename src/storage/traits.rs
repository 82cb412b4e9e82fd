//! Storage traits and error types
//!
//! This module defines the trait interface for the content store and
//! associated error types.

use crate::content::Record;
use crate::state::{Checkpoint, CheckpointStatus};
use crate::storage::{PurgeSummary, QueryFilter, RunRecord, RunTotals, SaveOutcome, StoreStatistics};
use crate::url::UrlTemplate;
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Identifier {0} does not fit the database integer range")]
    IdentifierOverflow(u64),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store writer has shut down")]
    WriterClosed,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for content store implementations
///
/// The store exclusively owns records, the visited set and checkpoints.
/// During a crawl every mutating call is funnelled through a single writer
/// task, so implementations need not be shareable across threads.
pub trait ContentStore {
    // ===== Records =====

    /// Persists a record unless its URL or fingerprint is already stored
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Record inserted
    /// * `Ok(false)` - Duplicate URL or duplicate content, nothing written
    /// * `Err(StorageError)` - Write failed; not retried
    fn save(&mut self, record: &Record) -> StorageResult<bool> {
        Ok(self.save_detailed(record)? == SaveOutcome::Inserted)
    }

    /// Persists a record and reports which dedup gate, if any, rejected it
    fn save_detailed(&mut self, record: &Record) -> StorageResult<SaveOutcome>;

    /// Saves a parsed record, marks its URLs visited and advances the checkpoint
    ///
    /// All three writes happen atomically. The checkpoint only moves when the
    /// record was inserted; duplicates are still marked visited.
    ///
    /// # Arguments
    ///
    /// * `record` - The validated record
    /// * `item_url` - URL of the work item that produced the record
    /// * `identifier` - Numeric identifier of the work item, if any
    fn accept(
        &mut self,
        record: &Record,
        item_url: &str,
        identifier: Option<u64>,
    ) -> StorageResult<SaveOutcome>;

    /// Query records, newest first
    fn query(&self, filter: &QueryFilter) -> StorageResult<Vec<Record>>;

    /// Deletes every record, visited entry and the checkpoint of one source
    fn purge_source(&mut self, source: &str) -> StorageResult<PurgeSummary>;

    // ===== Visited Set =====

    /// Marks a URL as processed; idempotent
    fn mark_visited(&mut self, url: &str, source: &str) -> StorageResult<()>;

    /// Loads every URL ever marked visited for a source
    fn load_visited(&self, source: &str) -> StorageResult<HashSet<String>>;

    /// Returns true if the URL was marked visited by any source
    fn is_visited(&self, url: &str) -> StorageResult<bool>;

    // ===== Checkpoints =====

    /// Gets the checkpoint of a source
    fn get_checkpoint(&self, source: &str) -> StorageResult<Option<Checkpoint>>;

    /// Upserts the checkpoint of a source
    ///
    /// `last_identifier` never decreases. A `None` identifier keeps the
    /// stored one. `last_url` follows the identifier that wins.
    fn update_checkpoint(
        &mut self,
        source: &str,
        last_identifier: Option<u64>,
        last_url: Option<&str>,
        status: CheckpointStatus,
    ) -> StorageResult<()>;

    /// Lists the checkpoints of all sources
    fn list_checkpoints(&self) -> StorageResult<Vec<Checkpoint>>;

    /// Raises a source's checkpoint to the highest identifier found among its records
    ///
    /// # Arguments
    ///
    /// * `source` - Source name
    /// * `template` - URL template used to recover identifiers from record URLs
    ///
    /// # Returns
    ///
    /// The checkpoint after repair, or `None` if the source has neither
    /// records nor a checkpoint
    fn rebuild_checkpoint(
        &mut self,
        source: &str,
        template: &UrlTemplate,
    ) -> StorageResult<Option<Checkpoint>>;

    // ===== Run Management =====

    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `source` - Source being crawled
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, source: &str, config_hash: &str) -> StorageResult<i64>;

    /// Stamps a run with its terminal status and totals
    fn finish_run(
        &mut self,
        run_id: i64,
        status: CheckpointStatus,
        totals: &RunTotals,
    ) -> StorageResult<()>;

    /// Gets the most recent run of a source
    fn latest_run(&self, source: &str) -> StorageResult<Option<RunRecord>>;

    // ===== Statistics =====

    /// Aggregated counts over the whole store
    fn stats(&self) -> StorageResult<StoreStatistics>;
}
