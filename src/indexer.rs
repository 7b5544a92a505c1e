//! Incremental index builder.
//!
//! One pass walks the codebase, skips files whose content fingerprint
//! matches the previous pass, re-chunks and re-embeds the rest, then
//! prunes every stored chunk no current file declares. Chunk rows are
//! keyed by content-derived id, so identical text is stored once no
//! matter how many files contain it, and a pass over an unchanged tree
//! writes nothing.
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunker::{Chunk, ChunkParams, chunk_text};
use crate::config::Config;
use crate::db::state::StateDb;
use crate::db::{ChunkRow, Store};
use crate::embedder::Embedder;
use crate::ids::{chunk_id, content_fingerprint};
use crate::languages::{LanguageConfig, detect_language};
use crate::walker::FileWalker;

/// Outcome of one index pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IndexStats {
    pub files_added: usize,
    pub files_updated: usize,
    pub files_skipped: usize,
    pub files_removed: usize,
    pub chunks_written: usize,
    pub chunks_deleted: usize,
    /// Shared rows whose provenance was repointed at a file that still
    /// declares them.
    pub chunks_relinked: usize,
}

/// Drives index passes against the configured codebase root.
pub struct IndexBuilder {
    config: Arc<Config>,
    embedder: Arc<dyn Embedder>,
    params: ChunkParams,
}

impl IndexBuilder {
    pub fn new(config: Arc<Config>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            embedder,
            params: ChunkParams::default(),
        }
    }

    /// Run one full incremental pass and return its stats.
    ///
    /// Blocking: reads files, runs inference and writes SQLite. Callers
    /// on an async runtime run this through `spawn_blocking`.
    pub fn update(&self) -> Result<IndexStats> {
        fs::create_dir_all(self.config.index_dir()).with_context(|| {
            format!(
                "failed to create index directory {}",
                self.config.index_dir().display()
            )
        })?;

        let mut store = Store::open(self.config.store_path())?;
        let mut state = StateDb::open(self.config.state_path())?;

        let previous = state.load_all()?;
        let files = FileWalker::new(&self.config.root_path)?.walk();
        info!("index pass over {} files in {}", files.len(), self.config.root_path.display());

        let mut stats = IndexStats::default();
        // Every id declared by some current file survives the prune. The
        // declarer lists (walk order) also drive provenance reconciliation
        // below.
        let mut keep: HashSet<i64> = HashSet::new();
        let mut declarers: HashMap<i64, Vec<String>> = HashMap::new();
        let declare = |declarers: &mut HashMap<i64, Vec<String>>, rel: &str, ids: &[i64]| {
            for &id in ids {
                declarers.entry(id).or_default().push(rel.to_string());
            }
        };

        for rel in &files {
            let abs = self.config.root_path.join(rel);
            let bytes = match fs::read(&abs) {
                Ok(bytes) => bytes,
                Err(e) => {
                    // Transient read failures keep the previous rows alive
                    // rather than tearing them out of the index.
                    warn!("skipping unreadable file {rel}: {e}");
                    if let Some(prev) = previous.get(rel) {
                        keep.extend(&prev.chunk_ids);
                        declare(&mut declarers, rel, &prev.chunk_ids);
                    }
                    continue;
                }
            };

            let fingerprint = content_fingerprint(&bytes);
            let prev = previous.get(rel);
            if let Some(prev) = prev {
                if prev.fingerprint == fingerprint {
                    keep.extend(&prev.chunk_ids);
                    declare(&mut declarers, rel, &prev.chunk_ids);
                    stats.files_skipped += 1;
                    continue;
                }
                stats.files_updated += 1;
            } else {
                stats.files_added += 1;
            }

            let Ok(text) = String::from_utf8(bytes) else {
                // Binary content: remember the fingerprint with no chunks
                // so the file is not re-read every pass.
                debug!("file {rel} is not valid UTF-8, indexing no chunks");
                state.record_file(rel, &fingerprint, &[])?;
                continue;
            };

            let ids = self.index_file(&mut store, rel, &text)?;
            stats.chunks_written += ids.len();
            state.record_file(rel, &fingerprint, &ids)?;
            declare(&mut declarers, rel, &ids);
            keep.extend(ids);
        }

        // Files that vanished since the previous pass.
        let current: HashSet<&String> = files.iter().collect();
        let removed: Vec<String> = previous
            .keys()
            .filter(|path| !current.contains(path))
            .cloned()
            .collect();
        stats.files_removed = removed.len();
        state.remove_files(&removed)?;

        // Prune rows no longer declared by any file.
        let stale: Vec<i64> = store
            .list_ids()?
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();
        stats.chunks_deleted = stale.len();
        store.delete_ids(&stale)?;

        // A surviving shared row can still carry the path of a file that
        // was deleted or rewritten (last-writer-wins upsert). Repoint such
        // rows at the first file that still declares them.
        let mut relink_by_file: HashMap<String, Vec<i64>> = HashMap::new();
        for (id, path) in store.list_provenance()? {
            if let Some(files) = declarers.get(&id) {
                if !files.iter().any(|f| *f == path) {
                    relink_by_file.entry(files[0].clone()).or_default().push(id);
                }
            }
        }
        let mut relinks: Vec<(String, Vec<i64>)> = relink_by_file.into_iter().collect();
        relinks.sort();
        for (rel, ids) in relinks {
            stats.chunks_relinked += self.relink_chunks(&mut store, &rel, &ids)?;
        }

        info!(
            "index pass done: +{} ~{} ={} -{} files, {} chunks written, {} pruned",
            stats.files_added,
            stats.files_updated,
            stats.files_skipped,
            stats.files_removed,
            stats.chunks_written,
            stats.chunks_deleted,
        );
        Ok(stats)
    }

    /// Chunk, embed and upsert one file. Returns the declared chunk ids.
    fn index_file(&self, store: &mut Store, rel: &str, text: &str) -> Result<Vec<i64>> {
        let language_config = Path::new(rel)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(LanguageConfig::get_by_extension);
        let language = detect_language(rel);

        let chunks = chunk_text(text, language_config.as_ref(), &self.params);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .with_context(|| format!("embedding failed for {rel}"))?;

        let ids: Vec<i64> = chunks.iter().map(|c| chunk_id(&c.text)).collect();
        let rows: Vec<ChunkRow> = chunks
            .iter()
            .zip(&ids)
            .zip(embeddings)
            .map(|((chunk, &id), embedding)| ChunkRow {
                id,
                file_path: rel.to_string(),
                language: language.to_string(),
                content: chunk.text.clone(),
                start_line: chunk.start_line as i64,
                end_line: chunk.end_line as i64,
                embedding,
            })
            .collect();

        store.upsert_chunks(&rows)?;
        debug!("indexed {rel}: {} chunks", rows.len());
        Ok(ids)
    }

    /// Rewrite the provenance of `ids` to `rel` by re-chunking it. The
    /// stored content and embeddings stay untouched; ids are content-
    /// derived, so re-chunking recovers the file's own line spans without
    /// inference.
    fn relink_chunks(&self, store: &mut Store, rel: &str, ids: &[i64]) -> Result<usize> {
        let abs = self.config.root_path.join(rel);
        let text = match fs::read_to_string(&abs) {
            Ok(text) => text,
            Err(e) => {
                warn!("cannot re-read {rel} to fix chunk provenance: {e}");
                return Ok(0);
            }
        };

        let language_config = Path::new(rel)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(LanguageConfig::get_by_extension);
        let language = detect_language(rel);

        let chunks = chunk_text(&text, language_config.as_ref(), &self.params);
        let by_id: HashMap<i64, &Chunk> =
            chunks.iter().map(|c| (chunk_id(&c.text), c)).collect();

        let mut relinked = 0;
        for &id in ids {
            if let Some(chunk) = by_id.get(&id) {
                store.update_provenance(
                    id,
                    rel,
                    language,
                    chunk.start_line as i64,
                    chunk.end_line as i64,
                )?;
                relinked += 1;
            }
        }
        debug!("repointed {relinked} shared chunks at {rel}");
        Ok(relinked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use tempfile::TempDir;

    fn test_config(root: &Path) -> Arc<Config> {
        Arc::new(Config {
            root_path: root.to_path_buf(),
            model: "local/intfloat/multilingual-e5-small".to_string(),
            device: "cpu".to_string(),
            trust_remote_code: false,
            batch_size: 32,
        })
    }

    fn builder(config: &Arc<Config>) -> IndexBuilder {
        IndexBuilder::new(Arc::clone(config), Arc::new(MockEmbedder::default()))
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_initial_pass_indexes_all_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/lib.rs", "pub fn add(a: i32, b: i32) -> i32 { a + b }\n");
        write(dir.path(), "app.py", "def greet(name):\n    return f\"hi {name}\"\n");

        let config = test_config(dir.path());
        let stats = builder(&config).update().unwrap();

        assert_eq!(stats.files_added, 2);
        assert_eq!(stats.files_skipped, 0);
        assert!(stats.chunks_written >= 2);

        let store = Store::open(config.store_path()).unwrap();
        assert_eq!(store.chunk_count().unwrap(), stats.chunks_written);
    }

    #[test]
    fn test_second_pass_over_unchanged_tree_writes_nothing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/lib.rs", "pub fn add(a: i32, b: i32) -> i32 { a + b }\n");
        write(dir.path(), "util.py", "def double(x):\n    return x * 2\n");

        let config = test_config(dir.path());
        builder(&config).update().unwrap();
        let stats = builder(&config).update().unwrap();

        assert_eq!(stats.files_added, 0);
        assert_eq!(stats.files_updated, 0);
        assert_eq!(stats.files_skipped, 2);
        assert_eq!(stats.chunks_written, 0);
        assert_eq!(stats.chunks_deleted, 0);
        assert_eq!(stats.chunks_relinked, 0);
    }

    #[test]
    fn test_modified_file_replaces_its_chunks() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "main.go", "package main\n\nfunc old() {}\n");

        let config = test_config(dir.path());
        builder(&config).update().unwrap();

        write(dir.path(), "main.go", "package main\n\nfunc renamed() {}\n");
        let stats = builder(&config).update().unwrap();

        assert_eq!(stats.files_updated, 1);
        assert!(stats.chunks_written >= 1);
        assert!(stats.chunks_deleted >= 1);

        let store = Store::open(config.store_path()).unwrap();
        let contents: Vec<String> = store
            .nearest_chunks(&MockEmbedder::default().embed_query("code").unwrap(), 100, 0)
            .unwrap()
            .into_iter()
            .map(|h| h.content)
            .collect();
        assert!(contents.iter().any(|c| c.contains("renamed")));
        assert!(!contents.iter().any(|c| c.contains("func old")));
    }

    #[test]
    fn test_deleted_file_chunks_pruned() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "keep.rs", "pub fn keep() -> u8 { 1 }\n");
        write(dir.path(), "gone.rs", "pub fn gone() -> u8 { 2 }\n");

        let config = test_config(dir.path());
        builder(&config).update().unwrap();

        fs::remove_file(dir.path().join("gone.rs")).unwrap();
        let stats = builder(&config).update().unwrap();

        assert_eq!(stats.files_removed, 1);
        assert!(stats.chunks_deleted >= 1);

        let store = Store::open(config.store_path()).unwrap();
        let contents: Vec<String> = store
            .nearest_chunks(&MockEmbedder::default().embed_query("code").unwrap(), 100, 0)
            .unwrap()
            .into_iter()
            .map(|h| h.content)
            .collect();
        assert!(contents.iter().any(|c| c.contains("keep")));
        assert!(!contents.iter().any(|c| c.contains("gone")));
    }

    #[test]
    fn test_identical_content_across_files_stored_once() {
        let dir = TempDir::new().unwrap();
        let shared = "pub fn shared_helper(x: u64) -> u64 { x.rotate_left(3) }\n";
        write(dir.path(), "a.rs", shared);
        write(dir.path(), "b.rs", shared);

        let config = test_config(dir.path());
        builder(&config).update().unwrap();

        let store = Store::open(config.store_path()).unwrap();
        let count_both = store.chunk_count().unwrap();
        drop(store);

        // Removing one declarer must not prune rows the other declares,
        // and surviving rows must not keep the deleted file's path.
        fs::remove_file(dir.path().join("b.rs")).unwrap();
        let stats = builder(&config).update().unwrap();
        assert_eq!(stats.files_removed, 1);
        assert_eq!(stats.chunks_deleted, 0);
        assert!(stats.chunks_relinked >= 1);

        let store = Store::open(config.store_path()).unwrap();
        assert_eq!(store.chunk_count().unwrap(), count_both);
        for (_, path) in store.list_provenance().unwrap() {
            assert_ne!(path, "b.rs");
        }
    }

    #[test]
    fn test_shared_chunk_repointed_when_declarer_is_rewritten() {
        let dir = TempDir::new().unwrap();
        let shared = "pub fn shared_helper(x: u64) -> u64 { x.rotate_left(3) }\n";
        write(dir.path(), "a.rs", shared);
        write(dir.path(), "b.rs", shared);

        let config = test_config(dir.path());
        builder(&config).update().unwrap();

        // b.rs stops declaring the shared chunk but still exists.
        write(dir.path(), "b.rs", "pub fn something_else() -> u8 { 0 }\n");
        let stats = builder(&config).update().unwrap();
        assert_eq!(stats.files_updated, 1);

        // The shared row must now point at a.rs, the remaining declarer.
        let store = Store::open(config.store_path()).unwrap();
        let hits = store
            .nearest_chunks(&MockEmbedder::default().embed_query("shared helper rotate").unwrap(), 10, 0)
            .unwrap();
        let survivor = hits
            .iter()
            .find(|h| h.content.contains("shared_helper"))
            .expect("shared chunk still stored");
        assert_eq!(survivor.file_path, "a.rs");
    }

    #[test]
    fn test_invalid_utf8_file_indexed_without_chunks() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "ok.rs", "pub fn fine() {}\n");
        fs::write(dir.path().join("bad.rs"), [0xffu8, 0xfe, 0x00, 0x80]).unwrap();

        let config = test_config(dir.path());
        let stats = builder(&config).update().unwrap();
        assert_eq!(stats.files_added, 2);

        // Second pass skips the binary file by fingerprint.
        let stats = builder(&config).update().unwrap();
        assert_eq!(stats.files_skipped, 2);
    }

    #[test]
    fn test_index_directory_not_walked() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "lib.rs", "pub fn real() {}\n");

        let config = test_config(dir.path());
        builder(&config).update().unwrap();
        // The store itself lives under the root; a second pass must not
        // try to index it.
        let stats = builder(&config).update().unwrap();
        assert_eq!(stats.files_added, 0);
        assert_eq!(stats.files_skipped, 1);
    }
}
