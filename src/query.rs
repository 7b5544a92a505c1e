//! Vector query engine.
//!
//! Embeds the query text and scans the stored chunk vectors by cosine
//! distance. Queries open the store read-only, so they never block or
//! corrupt a concurrent index pass; an absent store is a recoverable
//! error the caller reports rather than an empty result.
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::db::Store;
use crate::db::search::QueryHit;
use crate::embedder::{Embedder, EmbedderError};

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("no index found at {0}; run update_index first")]
    IndexMissing(String),

    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

/// Read-side counterpart of the index builder.
pub struct QueryEngine {
    config: Arc<Config>,
    embedder: Arc<dyn Embedder>,
}

impl QueryEngine {
    pub fn new(config: Arc<Config>, embedder: Arc<dyn Embedder>) -> Self {
        Self { config, embedder }
    }

    /// Return the `[offset, offset + limit)` page of chunks nearest to
    /// `text`, best first.
    ///
    /// Blocking: runs inference and reads SQLite.
    pub fn query(&self, text: &str, limit: usize, offset: usize) -> Result<Vec<QueryHit>, QueryError> {
        let store_path = self.config.store_path();
        if !store_path.exists() {
            return Err(QueryError::IndexMissing(
                store_path.display().to_string(),
            ));
        }

        let query_vector = self.embedder.embed_query(text)?;
        let store = Store::open_read_only(&store_path)?;
        let hits = store.nearest_chunks(&query_vector, limit, offset)?;
        debug!("query returned {} hits (limit {limit}, offset {offset})", hits.len());
        Ok(hits)
    }
}
