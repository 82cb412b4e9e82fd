//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Corpus-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Accepted content records
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    content_type TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    language TEXT,
    retrieved_at TEXT NOT NULL,
    content_fingerprint TEXT NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_records_source ON records(source);
CREATE INDEX IF NOT EXISTS idx_records_content_type ON records(content_type);
CREATE INDEX IF NOT EXISTS idx_records_language ON records(language);
CREATE INDEX IF NOT EXISTS idx_records_retrieved_at ON records(retrieved_at);

-- Every URL already processed (saved, duplicate, gap or skipped)
CREATE TABLE IF NOT EXISTS visited_urls (
    url TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    visited_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_visited_source ON visited_urls(source);

-- One resume marker per source
CREATE TABLE IF NOT EXISTS checkpoints (
    source TEXT PRIMARY KEY,
    last_identifier INTEGER,
    last_url TEXT,
    status TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One row per crawl session
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    total INTEGER NOT NULL DEFAULT 0,
    accepted INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_runs_source ON runs(source);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_initializes() {
        let conn = Connection::open_in_memory().unwrap();
        let result = initialize_schema(&conn);
        assert!(result.is_ok());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        let result = initialize_schema(&conn);

        assert!(result.is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["records", "visited_urls", "checkpoints", "runs"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_fingerprint_unique_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let insert = "INSERT INTO records (id, source, url, title, body, content_type, retrieved_at, content_fingerprint)
                      VALUES (?1, 's', ?2, 't', 'b', 'fatwa', '2024-01-01T00:00:00Z', 'abc')";
        conn.execute(insert, ["s_1", "https://a.test/1"]).unwrap();
        let second = conn.execute(insert, ["s_2", "https://a.test/2"]);
        assert!(second.is_err());
    }
}
