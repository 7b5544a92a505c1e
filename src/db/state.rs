//! Incremental-pass state, persisted in its own database file.
//!
//! For every indexed file this records the content fingerprint of the
//! last successful pass and the set of chunk ids the file declared.
//! The index builder uses the fingerprint to skip unchanged files and
//! the id sets to compute which stored rows are no longer declared by
//! anyone and must be pruned.
use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, Result, params};

const STATE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS file_state (
    file_path TEXT PRIMARY KEY,
    fingerprint TEXT NOT NULL,
    chunk_ids TEXT NOT NULL,
    indexed_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Recorded state of one file from the previous pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub fingerprint: String,
    pub chunk_ids: Vec<i64>,
}

pub struct StateDb {
    conn: Connection,
}

impl StateDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(STATE_SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(STATE_SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Map of file path → recorded state for all files of the last pass.
    pub fn load_all(&self) -> Result<HashMap<String, FileState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_path, fingerprint, chunk_ids FROM file_state")?;
        let rows = stmt.query_map([], |row| {
            let path: String = row.get(0)?;
            let fingerprint: String = row.get(1)?;
            let ids_json: String = row.get(2)?;
            Ok((path, fingerprint, ids_json))
        })?;

        let mut out = HashMap::new();
        for row in rows {
            let (path, fingerprint, ids_json) = row?;
            let chunk_ids: Vec<i64> = serde_json::from_str(&ids_json).unwrap_or_default();
            out.insert(
                path,
                FileState {
                    fingerprint,
                    chunk_ids,
                },
            );
        }
        Ok(out)
    }

    /// Record (upsert) a file's fingerprint and declared chunk ids.
    pub fn record_file(&mut self, path: &str, fingerprint: &str, chunk_ids: &[i64]) -> Result<()> {
        let ids_json = serde_json::to_string(chunk_ids).unwrap_or_else(|_| "[]".to_string());
        self.conn.execute(
            r#"
            INSERT INTO file_state (file_path, fingerprint, chunk_ids, indexed_at)
            VALUES (?, ?, ?, datetime('now'))
            ON CONFLICT(file_path) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                chunk_ids = excluded.chunk_ids,
                indexed_at = excluded.indexed_at
            "#,
            params![path, fingerprint, ids_json],
        )?;
        Ok(())
    }

    /// Drop state rows for files that vanished from the walk.
    pub fn remove_files(&mut self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM file_state WHERE file_path = ?")?;
            for path in paths {
                stmt.execute(params![path])?;
            }
        }
        tx.commit()
    }
}
