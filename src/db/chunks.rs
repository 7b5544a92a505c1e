//! Chunk row CRUD: upsert-by-id declarations and stale-id pruning.
use rusqlite::{Result, params};

use super::{ChunkRow, Store, serialize_vector};

impl Store {
    /// Declare (upsert) a batch of chunk rows in one transaction.
    ///
    /// `id` is content-derived, so a row re-declared from another file
    /// simply has its provenance metadata overwritten in place.
    pub fn upsert_chunks(&mut self, rows: &[ChunkRow]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO code_chunks (id, file_path, language, content, start_line, end_line, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    file_path = excluded.file_path,
                    language = excluded.language,
                    content = excluded.content,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    embedding = excluded.embedding
                "#,
            )?;
            for row in rows {
                stmt.execute(params![
                    row.id,
                    row.file_path,
                    row.language,
                    row.content,
                    row.start_line,
                    row.end_line,
                    serialize_vector(&row.embedding),
                ])?;
            }
        }
        tx.commit()
    }

    /// All chunk ids currently stored.
    pub fn list_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT id FROM code_chunks")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    /// All stored (id, file_path) pairs.
    pub fn list_provenance(&self) -> Result<Vec<(i64, String)>> {
        let mut stmt = self.conn.prepare("SELECT id, file_path FROM code_chunks")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }

    /// Repoint a chunk row at a different declaring file, keeping its
    /// content and embedding.
    pub fn update_provenance(
        &mut self,
        id: i64,
        file_path: &str,
        language: &str,
        start_line: i64,
        end_line: i64,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE code_chunks
            SET file_path = ?, language = ?, start_line = ?, end_line = ?
            WHERE id = ?
            "#,
            params![file_path, language, start_line, end_line, id],
        )?;
        Ok(())
    }

    /// Delete the given chunk ids in one transaction.
    pub fn delete_ids(&mut self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM code_chunks WHERE id = ?")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()
    }

    /// Number of stored chunks.
    pub fn chunk_count(&self) -> Result<usize> {
        self.conn
            .query_row("SELECT count(*) FROM code_chunks", [], |row| row.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, file: &str, content: &str) -> ChunkRow {
        ChunkRow {
            id,
            file_path: file.to_string(),
            language: "rust".to_string(),
            content: content.to_string(),
            start_line: 1,
            end_line: 3,
            embedding: vec![0.5; 8],
        }
    }

    #[test]
    fn test_upsert_and_count() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .upsert_chunks(&[row(1, "a.rs", "one"), row(2, "a.rs", "two")])
            .unwrap();
        assert_eq!(store.chunk_count().unwrap(), 2);
    }

    #[test]
    fn test_upsert_same_id_overwrites_in_place() {
        let mut store = Store::open_in_memory().unwrap();
        store.upsert_chunks(&[row(7, "a.rs", "shared text")]).unwrap();
        store.upsert_chunks(&[row(7, "b.rs", "shared text")]).unwrap();

        assert_eq!(store.chunk_count().unwrap(), 1);
        let file: String = store
            .conn
            .query_row("SELECT file_path FROM code_chunks WHERE id = 7", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(file, "b.rs");
    }

    #[test]
    fn test_delete_ids() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .upsert_chunks(&[row(1, "a.rs", "one"), row(2, "b.rs", "two"), row(3, "c.rs", "three")])
            .unwrap();
        store.delete_ids(&[1, 3]).unwrap();

        assert_eq!(store.list_ids().unwrap(), vec![2]);
    }

    #[test]
    fn test_update_provenance_keeps_content_and_embedding() {
        let mut store = Store::open_in_memory().unwrap();
        store.upsert_chunks(&[row(5, "old.rs", "shared text")]).unwrap();

        store.update_provenance(5, "new.rs", "rust", 10, 12).unwrap();

        assert_eq!(store.list_provenance().unwrap(), vec![(5, "new.rs".to_string())]);
        let (content, start): (String, i64) = store
            .conn
            .query_row(
                "SELECT content, start_line FROM code_chunks WHERE id = 5",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(content, "shared text");
        assert_eq!(start, 10);
    }

    #[test]
    fn test_delete_empty_is_noop() {
        let mut store = Store::open_in_memory().unwrap();
        store.upsert_chunks(&[row(1, "a.rs", "one")]).unwrap();
        store.delete_ids(&[]).unwrap();
        assert_eq!(store.chunk_count().unwrap(), 1);
    }
}
