//! Nearest-neighbor search over stored chunk vectors.
use rusqlite::{Result, params};
use serde::Serialize;

use super::{Store, serialize_vector};

/// A ranked search hit. Same shape as a stored chunk minus the embedding,
/// plus a similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub file_path: String,
    pub language: String,
    pub content: String,
    pub start_line: i64,
    pub end_line: i64,
    /// Cosine similarity, `1 - distance`; higher is better. In `[-1, 1]`,
    /// practically `[0, 1]` for normalized embeddings.
    pub score: f64,
}

impl Store {
    /// Scan all chunk vectors by cosine distance to `query_vector`,
    /// ascending, and return the page `[offset, offset + limit)`.
    ///
    /// Ties in distance break deterministically on chunk id.
    pub fn nearest_chunks(
        &self,
        query_vector: &[f32],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<QueryHit>> {
        let blob = serialize_vector(query_vector);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                file_path,
                language,
                content,
                start_line,
                end_line,
                vec_distance_cosine(embedding, ?) AS distance
            FROM code_chunks
            ORDER BY distance ASC, id ASC
            LIMIT ? OFFSET ?
            "#,
        )?;

        let rows = stmt.query_map(
            params![blob, limit as i64, offset as i64],
            |row| {
                let distance: f64 = row.get(5)?;
                Ok(QueryHit {
                    file_path: row.get(0)?,
                    language: row.get(1)?,
                    content: row.get(2)?,
                    start_line: row.get(3)?,
                    end_line: row.get(4)?,
                    score: 1.0 - distance,
                })
            },
        )?;

        rows.collect()
    }
}
