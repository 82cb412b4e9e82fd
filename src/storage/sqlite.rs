//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the ContentStore trait.

use crate::content::Record;
use crate::state::{Checkpoint, CheckpointStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ContentStore, StorageError, StorageResult};
use crate::storage::{
    PurgeSummary, QueryFilter, RunRecord, RunTotals, SaveOutcome, StoreStatistics,
};
use crate::url::UrlTemplate;
use crate::HarvestError;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

const RECORD_COLUMNS: &str = "id, source, url, title, body, content_type, metadata, language, \
                              retrieved_at, content_fingerprint";

const CHECKPOINT_COLUMNS: &str = "source, last_identifier, last_url, status, updated_at";

const RUN_COLUMNS: &str =
    "id, source, started_at, finished_at, config_hash, status, total, accepted, skipped, errors";

/// Keeps the larger identifier; `last_url` follows whichever identifier wins.
/// SQLite evaluates every SET expression against the pre-update row.
const UPSERT_CHECKPOINT_SQL: &str = "
    INSERT INTO checkpoints (source, last_identifier, last_url, status, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(source) DO UPDATE SET
        last_url = CASE
            WHEN excluded.last_identifier IS NULL
              OR checkpoints.last_identifier IS NULL
              OR excluded.last_identifier >= checkpoints.last_identifier
            THEN COALESCE(excluded.last_url, checkpoints.last_url)
            ELSE checkpoints.last_url
        END,
        last_identifier = CASE
            WHEN checkpoints.last_identifier IS NULL THEN excluded.last_identifier
            WHEN excluded.last_identifier IS NULL THEN checkpoints.last_identifier
            ELSE MAX(checkpoints.last_identifier, excluded.last_identifier)
        END,
        status = excluded.status,
        updated_at = excluded.updated_at
";

/// SQLite content store
pub struct SqliteContentStore {
    conn: Connection,
}

impl SqliteContentStore {
    /// Creates a new SqliteContentStore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteContentStore)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Opens a write transaction spanning several commands
    pub fn begin_batch(&self) -> StorageResult<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    /// Commits the open batch, if any
    pub fn commit_batch(&self) -> StorageResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    /// Rolls back the open batch, if any
    pub fn rollback_batch(&self) -> StorageResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn grouped_counts(&self, column: &str) -> StorageResult<BTreeMap<String, u64>> {
        let sql = format!(
            "SELECT COALESCE({}, 'unknown'), COUNT(*) FROM records GROUP BY 1",
            column
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (key, count) = row?;
            counts.insert(key, count);
        }
        Ok(counts)
    }
}

impl ContentStore for SqliteContentStore {
    // ===== Records =====

    fn save_detailed(&mut self, record: &Record) -> StorageResult<SaveOutcome> {
        let sp = self.conn.savepoint()?;
        let outcome = insert_record(&sp, record)?;
        sp.commit()?;
        Ok(outcome)
    }

    fn accept(
        &mut self,
        record: &Record,
        item_url: &str,
        identifier: Option<u64>,
    ) -> StorageResult<SaveOutcome> {
        let sp = self.conn.savepoint()?;

        let outcome = insert_record(&sp, record)?;
        mark_visited_in(&sp, item_url, &record.source)?;
        if record.url != item_url {
            mark_visited_in(&sp, &record.url, &record.source)?;
        }
        if outcome.is_inserted() {
            upsert_checkpoint(
                &sp,
                &record.source,
                identifier,
                Some(item_url),
                CheckpointStatus::Running,
            )?;
        }

        sp.commit()?;
        Ok(outcome)
    }

    fn query(&self, filter: &QueryFilter) -> StorageResult<Vec<Record>> {
        let mut sql = format!("SELECT {} FROM records", RECORD_COLUMNS);
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        for (column, value) in [
            ("source", &filter.source),
            ("content_type", &filter.content_type),
            ("language", &filter.language),
        ] {
            if let Some(value) = value {
                clauses.push(format!("{} = ?", column));
                values.push(Value::Text(value.clone()));
            }
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY retrieved_at DESC, rowid DESC");

        if filter.limit.is_some() || filter.offset.is_some() {
            let limit = filter
                .limit
                .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
                .unwrap_or(-1);
            let offset = filter
                .offset
                .map(|o| i64::try_from(o).unwrap_or(i64::MAX))
                .unwrap_or(0);
            sql.push_str(" LIMIT ? OFFSET ?");
            values.push(Value::Integer(limit));
            values.push(Value::Integer(offset));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn purge_source(&mut self, source: &str) -> StorageResult<PurgeSummary> {
        let sp = self.conn.savepoint()?;
        let records = sp.execute("DELETE FROM records WHERE source = ?1", [source])?;
        let visited = sp.execute("DELETE FROM visited_urls WHERE source = ?1", [source])?;
        let checkpoint = sp.execute("DELETE FROM checkpoints WHERE source = ?1", [source])? > 0;
        sp.commit()?;

        Ok(PurgeSummary {
            records,
            visited,
            checkpoint,
        })
    }

    // ===== Visited Set =====

    fn mark_visited(&mut self, url: &str, source: &str) -> StorageResult<()> {
        mark_visited_in(&self.conn, url, source)
    }

    fn load_visited(&self, source: &str) -> StorageResult<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM visited_urls WHERE source = ?1")?;
        let rows = stmt.query_map([source], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    fn is_visited(&self, url: &str) -> StorageResult<bool> {
        let visited = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM visited_urls WHERE url = ?1)",
            [url],
            |row| row.get(0),
        )?;
        Ok(visited)
    }

    // ===== Checkpoints =====

    fn get_checkpoint(&self, source: &str) -> StorageResult<Option<Checkpoint>> {
        let sql = format!(
            "SELECT {} FROM checkpoints WHERE source = ?1",
            CHECKPOINT_COLUMNS
        );
        let checkpoint = self
            .conn
            .query_row(&sql, [source], checkpoint_from_row)
            .optional()?;
        Ok(checkpoint)
    }

    fn update_checkpoint(
        &mut self,
        source: &str,
        last_identifier: Option<u64>,
        last_url: Option<&str>,
        status: CheckpointStatus,
    ) -> StorageResult<()> {
        upsert_checkpoint(&self.conn, source, last_identifier, last_url, status)
    }

    fn list_checkpoints(&self) -> StorageResult<Vec<Checkpoint>> {
        let sql = format!(
            "SELECT {} FROM checkpoints ORDER BY source",
            CHECKPOINT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], checkpoint_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn rebuild_checkpoint(
        &mut self,
        source: &str,
        template: &UrlTemplate,
    ) -> StorageResult<Option<Checkpoint>> {
        let urls: Vec<String> = {
            let mut stmt = self
                .conn
                .prepare("SELECT url FROM records WHERE source = ?1")?;
            let rows = stmt.query_map([source], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };

        let highest = urls
            .iter()
            .filter_map(|url| template.extract_id(url).map(|id| (id, url)))
            .max_by_key(|(id, _)| *id);

        let current = self.get_checkpoint(source)?;
        let Some((id, url)) = highest else {
            return Ok(current);
        };

        let stored = current.as_ref().and_then(|c| c.last_identifier);
        if stored.map_or(true, |last| last < id) {
            // Records beyond a "completed" marker mean the marker cannot be
            // trusted as a resume point; fall back to the visited set.
            let status = match current.as_ref().map(|c| c.status) {
                Some(CheckpointStatus::Completed) | None => CheckpointStatus::Paused,
                Some(status) => status,
            };
            tracing::info!(
                "Raising checkpoint for {} from {:?} to {} ({})",
                source,
                stored,
                id,
                url
            );
            upsert_checkpoint(&self.conn, source, Some(id), Some(url), status)?;
        }

        self.get_checkpoint(source)
    }

    // ===== Run Management =====

    fn create_run(&mut self, source: &str, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (source, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                source,
                now,
                config_hash,
                CheckpointStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: CheckpointStatus,
        totals: &RunTotals,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE runs SET finished_at = ?1, status = ?2, total = ?3, accepted = ?4,
             skipped = ?5, errors = ?6 WHERE id = ?7",
            params![
                now,
                status.to_db_string(),
                totals.total as i64,
                totals.accepted as i64,
                totals.skipped as i64,
                totals.errors as i64,
                run_id
            ],
        )?;
        Ok(())
    }

    fn latest_run(&self, source: &str) -> StorageResult<Option<RunRecord>> {
        let sql = format!(
            "SELECT {} FROM runs WHERE source = ?1 ORDER BY id DESC LIMIT 1",
            RUN_COLUMNS
        );
        let run = self
            .conn
            .query_row(&sql, [source], run_from_row)
            .optional()?;
        Ok(run)
    }

    // ===== Statistics =====

    fn stats(&self) -> StorageResult<StoreStatistics> {
        let total_records: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        let visited_urls: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM visited_urls", [], |row| row.get(0))?;

        Ok(StoreStatistics {
            total_records: total_records as u64,
            by_source: self.grouped_counts("source")?,
            by_content_type: self.grouped_counts("content_type")?,
            by_language: self.grouped_counts("language")?,
            visited_urls: visited_urls as u64,
            checkpoints: self.list_checkpoints()?,
        })
    }
}

/// Dedup-checks and inserts one record on an open connection or savepoint
fn insert_record(conn: &Connection, record: &Record) -> StorageResult<SaveOutcome> {
    let url_taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM records WHERE url = ?1 OR id = ?2)",
        params![record.url, record.id],
        |row| row.get(0),
    )?;
    if url_taken {
        return Ok(SaveOutcome::DuplicateUrl);
    }

    let fingerprint_taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM records WHERE content_fingerprint = ?1)",
        [&record.content_fingerprint],
        |row| row.get(0),
    )?;
    if fingerprint_taken {
        return Ok(SaveOutcome::DuplicateFingerprint);
    }

    let metadata = serde_json::to_string(&record.metadata)?;
    conn.execute(
        &format!(
            "INSERT INTO records ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            RECORD_COLUMNS
        ),
        params![
            record.id,
            record.source,
            record.url,
            record.title,
            record.body,
            record.content_type,
            metadata,
            record.language,
            record.retrieved_at.to_rfc3339(),
            record.content_fingerprint,
        ],
    )?;

    Ok(SaveOutcome::Inserted)
}

fn mark_visited_in(conn: &Connection, url: &str, source: &str) -> StorageResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO visited_urls (url, source, visited_at) VALUES (?1, ?2, ?3)",
        params![url, source, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn upsert_checkpoint(
    conn: &Connection,
    source: &str,
    last_identifier: Option<u64>,
    last_url: Option<&str>,
    status: CheckpointStatus,
) -> StorageResult<()> {
    let last_identifier = last_identifier
        .map(|id| i64::try_from(id).map_err(|_| StorageError::IdentifierOverflow(id)))
        .transpose()?;

    conn.execute(
        UPSERT_CHECKPOINT_SQL,
        params![
            source,
            last_identifier,
            last_url,
            status.to_db_string(),
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

fn parse_status(column: usize, value: &str) -> rusqlite::Result<CheckpointStatus> {
    CheckpointStatus::from_db_string(value).ok_or_else(|| {
        conversion_error(
            column,
            StorageError::Corrupt(format!("unknown status '{}'", value)),
        )
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let metadata: String = row.get(6)?;
    let retrieved_at: String = row.get(8)?;

    Ok(Record {
        id: row.get(0)?,
        source: row.get(1)?,
        url: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        content_type: row.get(5)?,
        metadata: serde_json::from_str(&metadata).map_err(|e| conversion_error(6, e))?,
        language: row.get(7)?,
        retrieved_at: parse_timestamp(8, &retrieved_at)?,
        content_fingerprint: row.get(9)?,
    })
}

fn checkpoint_from_row(row: &Row<'_>) -> rusqlite::Result<Checkpoint> {
    let last_identifier: Option<i64> = row.get(1)?;
    let status: String = row.get(3)?;
    let updated_at: String = row.get(4)?;

    Ok(Checkpoint {
        source: row.get(0)?,
        last_identifier: last_identifier
            .map(|id| u64::try_from(id).map_err(|e| conversion_error(1, e)))
            .transpose()?,
        last_url: row.get(2)?,
        status: parse_status(3, &status)?,
        updated_at: parse_timestamp(4, &updated_at)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let status: String = row.get(5)?;

    Ok(RunRecord {
        id: row.get(0)?,
        source: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: parse_status(5, &status)?,
        totals: RunTotals {
            total: row.get::<_, i64>(6)? as u64,
            accepted: row.get::<_, i64>(7)? as u64,
            skipped: row.get::<_, i64>(8)? as u64,
            errors: row.get::<_, i64>(9)? as u64,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "one two three four five six seven eight nine ten";

    fn record(id: u64, body: &str) -> Record {
        Record::new(
            format!("islamqa_{}", id),
            "islamqa",
            format!("https://islamqa.info/en/answers/{}", id),
            format!("Question {}", id),
            body,
            "fatwa",
        )
    }

    fn template() -> UrlTemplate {
        UrlTemplate::parse("https://islamqa.info/en/answers/{id}").unwrap()
    }

    #[test]
    fn test_create_in_memory() {
        let store = SqliteContentStore::new_in_memory();
        assert!(store.is_ok());
    }

    #[test]
    fn test_save_and_duplicate_url() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        let first = record(1, BODY);

        assert!(store.save(&first).unwrap());

        // Same URL, different content
        let mut again = record(1, "a completely different body of text here");
        again.id = "other_id".to_string();
        assert_eq!(
            store.save_detailed(&again).unwrap(),
            SaveOutcome::DuplicateUrl
        );
    }

    #[test]
    fn test_duplicate_fingerprint() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        let a = Record::new("s_1", "s", "https://a.test/1", "Same Title", BODY, "fatwa");
        let b = Record::new(
            "s_2",
            "s",
            "https://a.test/2",
            "same  title",
            BODY.to_uppercase(),
            "fatwa",
        );

        assert_eq!(store.save_detailed(&a).unwrap(), SaveOutcome::Inserted);
        assert_eq!(
            store.save_detailed(&b).unwrap(),
            SaveOutcome::DuplicateFingerprint
        );
        assert_eq!(store.query(&QueryFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_accept_marks_visited_and_advances_checkpoint() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        let r = record(5, BODY);

        let outcome = store.accept(&r, &r.url, Some(5)).unwrap();
        assert_eq!(outcome, SaveOutcome::Inserted);
        assert!(store.is_visited(&r.url).unwrap());

        let cp = store.get_checkpoint("islamqa").unwrap().unwrap();
        assert_eq!(cp.last_identifier, Some(5));
        assert_eq!(cp.last_url.as_deref(), Some(r.url.as_str()));
        assert_eq!(cp.status, CheckpointStatus::Running);
    }

    #[test]
    fn test_accept_duplicate_marks_visited_without_checkpoint() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        let original = record(1, BODY);
        store.accept(&original, &original.url, Some(1)).unwrap();

        // Identical content published under a second identifier
        let mut copy = record(9, BODY);
        copy.title = original.title.clone();
        copy.content_fingerprint = original.content_fingerprint.clone();

        let outcome = store.accept(&copy, &copy.url, Some(9)).unwrap();
        assert_eq!(outcome, SaveOutcome::DuplicateFingerprint);
        assert!(store.is_visited(&copy.url).unwrap());

        let cp = store.get_checkpoint("islamqa").unwrap().unwrap();
        assert_eq!(cp.last_identifier, Some(1));
    }

    #[test]
    fn test_checkpoint_never_regresses() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        store
            .update_checkpoint("s", Some(10), Some("u10"), CheckpointStatus::Running)
            .unwrap();
        store
            .update_checkpoint("s", Some(4), Some("u4"), CheckpointStatus::Running)
            .unwrap();
        store
            .update_checkpoint("s", None, None, CheckpointStatus::Paused)
            .unwrap();

        let cp = store.get_checkpoint("s").unwrap().unwrap();
        assert_eq!(cp.last_identifier, Some(10));
        assert_eq!(cp.last_url.as_deref(), Some("u10"));
        assert_eq!(cp.status, CheckpointStatus::Paused);

        store
            .update_checkpoint("s", Some(11), Some("u11"), CheckpointStatus::Completed)
            .unwrap();
        let cp = store.get_checkpoint("s").unwrap().unwrap();
        assert_eq!(cp.last_identifier, Some(11));
        assert_eq!(cp.last_url.as_deref(), Some("u11"));
    }

    #[test]
    fn test_checkpoint_without_identifier_tracks_url() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        store
            .update_checkpoint("blog", None, Some("https://b.test/a"), CheckpointStatus::Running)
            .unwrap();
        store
            .update_checkpoint("blog", None, Some("https://b.test/b"), CheckpointStatus::Running)
            .unwrap();

        let cp = store.get_checkpoint("blog").unwrap().unwrap();
        assert_eq!(cp.last_identifier, None);
        assert_eq!(cp.last_url.as_deref(), Some("https://b.test/b"));
    }

    #[test]
    fn test_load_visited_is_per_source() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        store.mark_visited("https://a.test/1", "a").unwrap();
        store.mark_visited("https://a.test/1", "a").unwrap();
        store.mark_visited("https://b.test/1", "b").unwrap();

        let visited = store.load_visited("a").unwrap();
        assert_eq!(visited.len(), 1);
        assert!(visited.contains("https://a.test/1"));
    }

    #[test]
    fn test_rebuild_checkpoint_raises_lagging_marker() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        for id in [3, 17, 8] {
            store.save(&record(id, &format!("{} {}", BODY, id))).unwrap();
        }
        store
            .update_checkpoint("islamqa", Some(3), None, CheckpointStatus::Completed)
            .unwrap();

        let cp = store
            .rebuild_checkpoint("islamqa", &template())
            .unwrap()
            .unwrap();
        assert_eq!(cp.last_identifier, Some(17));
        assert_eq!(
            cp.last_url.as_deref(),
            Some("https://islamqa.info/en/answers/17")
        );
        assert_eq!(cp.status, CheckpointStatus::Paused);

        // Idempotent
        let again = store
            .rebuild_checkpoint("islamqa", &template())
            .unwrap()
            .unwrap();
        assert_eq!(again.last_identifier, Some(17));
    }

    #[test]
    fn test_rebuild_checkpoint_empty_source() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        assert!(store
            .rebuild_checkpoint("islamqa", &template())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_query_filters_and_paging() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        for id in 1..=5 {
            store.save(&record(id, &format!("{} {}", BODY, id))).unwrap();
        }
        let arabic = Record::new("ar_1", "dorar", "https://dorar.net/1", "سؤال", "جواب طويل", "hadith");
        store.save(&arabic).unwrap();

        let all = store.query(&QueryFilter::source("islamqa")).unwrap();
        assert_eq!(all.len(), 5);

        let page = store
            .query(&QueryFilter {
                source: Some("islamqa".to_string()),
                limit: Some(2),
                offset: Some(1),
                ..QueryFilter::default()
            })
            .unwrap();
        assert_eq!(page.len(), 2);

        let hadith = store
            .query(&QueryFilter {
                content_type: Some("hadith".to_string()),
                language: Some("arabic".to_string()),
                ..QueryFilter::default()
            })
            .unwrap();
        assert_eq!(hadith.len(), 1);
        assert_eq!(hadith[0].id, "ar_1");
    }

    #[test]
    fn test_query_roundtrips_metadata() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        let r = record(1, BODY).with_metadata("category", "Prayer");
        store.save(&r).unwrap();

        let stored = store.query(&QueryFilter::default()).unwrap();
        assert_eq!(stored[0].metadata.get("category").map(String::as_str), Some("Prayer"));
        assert_eq!(stored[0].content_fingerprint, r.content_fingerprint);
    }

    #[test]
    fn test_purge_source() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        let r = record(1, BODY);
        store.accept(&r, &r.url, Some(1)).unwrap();
        store.mark_visited("https://other.test/1", "other").unwrap();

        let summary = store.purge_source("islamqa").unwrap();
        assert_eq!(
            summary,
            PurgeSummary {
                records: 1,
                visited: 1,
                checkpoint: true
            }
        );
        assert!(store.get_checkpoint("islamqa").unwrap().is_none());
        assert!(store.is_visited("https://other.test/1").unwrap());
    }

    #[test]
    fn test_runs() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        let run_id = store.create_run("islamqa", "abc123").unwrap();
        assert!(run_id > 0);

        let totals = RunTotals {
            total: 5,
            accepted: 3,
            skipped: 2,
            errors: 0,
        };
        store
            .finish_run(run_id, CheckpointStatus::Completed, &totals)
            .unwrap();

        let run = store.latest_run("islamqa").unwrap().unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.status, CheckpointStatus::Completed);
        assert_eq!(run.totals, totals);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_stats() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        let r = record(1, BODY);
        store.accept(&r, &r.url, Some(1)).unwrap();
        store.mark_visited("https://islamqa.info/en/answers/2", "islamqa").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.by_source.get("islamqa"), Some(&1));
        assert_eq!(stats.by_content_type.get("fatwa"), Some(&1));
        assert_eq!(stats.visited_urls, 2);
        assert_eq!(stats.checkpoints.len(), 1);
    }

    #[test]
    fn test_batch_rollback_discards_writes() {
        let mut store = SqliteContentStore::new_in_memory().unwrap();
        store.begin_batch().unwrap();
        store.save(&record(1, BODY)).unwrap();
        store.rollback_batch().unwrap();

        assert!(store.query(&QueryFilter::default()).unwrap().is_empty());

        store.begin_batch().unwrap();
        store.save(&record(2, BODY)).unwrap();
        store.commit_batch().unwrap();
        assert_eq!(store.query(&QueryFilter::default()).unwrap().len(), 1);
    }
}
