//! Memoizing wrapper around any [`Embedder`].
//!
//! Cache keys hash the backend configuration fingerprint, the encoding
//! side (document vs query), and the exact input text, so a config
//! change can never serve a stale vector and the asymmetric query
//! prompt never collides with a document of the same text.
use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use super::{Embedder, EmbedderError};

type CacheKey = [u8; 32];

/// An [`Embedder`] that memoizes per-text results of an inner backend.
pub struct CachedEmbedder<E> {
    inner: E,
    config_fingerprint: String,
    cache: Mutex<HashMap<CacheKey, Vec<f32>>>,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E, config_fingerprint: String) -> Self {
        Self {
            inner,
            config_fingerprint,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, side: &str, text: &str) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(self.config_fingerprint.as_bytes());
        hasher.update([0]);
        hasher.update(side.as_bytes());
        hasher.update([0]);
        hasher.update(text.as_bytes());
        hasher.finalize().into()
    }

    fn lookup(&self, keys: &[CacheKey]) -> Vec<Option<Vec<f32>>> {
        let cache = self.cache.lock().expect("embedder cache lock");
        keys.iter().map(|k| cache.get(k).cloned()).collect()
    }

    fn store(&self, entries: impl IntoIterator<Item = (CacheKey, Vec<f32>)>) {
        let mut cache = self.cache.lock().expect("embedder cache lock");
        cache.extend(entries);
    }
}

impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let keys: Vec<CacheKey> = texts.iter().map(|t| self.key("doc", t)).collect();
        let mut slots = self.lookup(&keys);

        let miss_indices: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.is_none().then_some(i))
            .collect();

        if !miss_indices.is_empty() {
            // The lock is not held while the backend runs.
            let miss_texts: Vec<&str> = miss_indices.iter().map(|&i| texts[i]).collect();
            let computed = self.inner.embed_batch(&miss_texts)?;
            if computed.len() != miss_texts.len() {
                return Err(EmbedderError::InferenceFailed(format!(
                    "backend returned {} vectors for {} texts",
                    computed.len(),
                    miss_texts.len()
                )));
            }

            self.store(
                miss_indices
                    .iter()
                    .zip(&computed)
                    .map(|(&i, vec)| (keys[i], vec.clone())),
            );
            for (&i, vec) in miss_indices.iter().zip(computed) {
                slots[i] = Some(vec);
            }
        }

        Ok(slots.into_iter().map(|slot| slot.expect("slot filled")).collect())
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let key = self.key("query", text);
        if let Some(hit) = self.lookup(&[key]).pop().flatten() {
            return Ok(hit);
        }
        let vec = self.inner.embed_query(text)?;
        self.store([(key, vec.clone())]);
        Ok(vec)
    }

    fn dimensions(&self) -> Result<usize, EmbedderError> {
        self.inner.dimensions()
    }
}
