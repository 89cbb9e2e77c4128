//! SQLite database shared by the metadata index and the vector index
//!
//! One connection behind a mutex; both indexes hold a cheap clone of the
//! handle. Vectors are BLOBs and similarity is computed in Rust.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, ToSql};

use crate::core::types::RecordKind;
use crate::error::Result;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Set index metadata
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.lock().execute(
            "INSERT INTO index_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Get index metadata
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.lock()
            .query_row(
                "SELECT value FROM index_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| e.into())
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Record headers; content lives in the document store
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL CHECK(kind IN ('conversation', 'knowledge', 'note')),
            title TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',  -- JSON array
            created_at INTEGER NOT NULL,      -- epoch millis
            updated_at INTEGER NOT NULL,
            metadata TEXT,                    -- JSON object
            archived INTEGER NOT NULL DEFAULT 0,
            byte_size INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind);
        CREATE INDEX IF NOT EXISTS idx_records_created ON records(created_at);
        CREATE INDEX IF NOT EXISTS idx_records_archived ON records(archived);

        -- Keyword index over title, content snapshot and tags
        CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(
            id UNINDEXED,
            title,
            content,
            tags,
            tokenize = 'porter unicode61'
        );

        -- One current vector per (record, model)
        CREATE TABLE IF NOT EXISTS embeddings (
            id TEXT PRIMARY KEY,
            record_id TEXT NOT NULL,
            vector BLOB NOT NULL,
            model TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (record_id, model),
            FOREIGN KEY (record_id) REFERENCES records(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_embeddings_model ON embeddings(model);

        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT
        );
        "#,
    )?;

    Ok(())
}

impl ToSql for RecordKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RecordKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_roundtrip() -> Result<()> {
        let db = Database::open_in_memory()?;
        assert_eq!(db.get_meta("last_backfill")?, None);
        db.set_meta("last_backfill", "1")?;
        db.set_meta("last_backfill", "2")?;
        assert_eq!(db.get_meta("last_backfill")?, Some("2".to_string()));
        Ok(())
    }

    #[test]
    fn test_file_database_reopens() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("nested/memory.db");
        Database::open(&path)?.set_meta("k", "v")?;
        assert_eq!(Database::open(&path)?.get_meta("k")?, Some("v".to_string()));
        Ok(())
    }

    #[test]
    fn test_kind_column_check() -> Result<()> {
        let db = Database::open_in_memory()?;
        let conn = db.lock();
        let result = conn.execute(
            "INSERT INTO records (id, kind, title, created_at, updated_at) VALUES ('x', 'photo', 't', 0, 0)",
            [],
        );
        assert!(result.is_err());
        conn.execute(
            "INSERT INTO records (id, kind, title, created_at, updated_at) VALUES ('y', ?1, 't', 0, 0)",
            params![RecordKind::Note],
        )?;
        let kind: RecordKind = conn.query_row("SELECT kind FROM records WHERE id = 'y'", [], |r| r.get(0))?;
        assert_eq!(kind, RecordKind::Note);
        Ok(())
    }
}
