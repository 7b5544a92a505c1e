//! Vector store on SQLite + sqlite-vec.
//!
//! One `code_chunks` table keyed by content-derived id, with the embedding
//! stored as a float32 BLOB that `vec_distance_cosine` scans directly.
//! The incremental-pass bookkeeping lives in a separate database file
//! ([`state`]), so the vector store holds nothing but the chunks.
use rusqlite::{Connection, OpenFlags, Result};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;
use tracing::info;

pub mod chunks;
pub mod search;
pub mod state;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS code_chunks (
    id INTEGER PRIMARY KEY,
    file_path TEXT NOT NULL,
    language TEXT NOT NULL,
    content TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    embedding BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunk_file ON code_chunks(file_path);
"#;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// A persisted chunk row: content-derived id, file provenance, text,
/// line span, embedding.
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub id: i64,
    pub file_path: String,
    pub language: String,
    pub content: String,
    pub start_line: i64,
    pub end_line: i64,
    pub embedding: Vec<f32>,
}

/// Wrapper around a SQLite connection initialized with sqlite-vec and the
/// chunk schema.
pub struct Store {
    pub(crate) conn: Connection,
}

impl Store {
    /// Open (and create if needed) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        init_sqlite_vec();

        let conn = Connection::open(path)?;
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("opened vector store {} (sqlite-vec {})", path.display(), vec_version);

        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Open the store read-only; queries through this connection see a
    /// consistent snapshot and cannot block a concurrent index update.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }
}

/// Serialize a float32 vector into the BLOB layout sqlite-vec expects.
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(vec).to_vec()
}
