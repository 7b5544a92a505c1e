//! Deterministic in-memory embedder for tests.
//!
//! Hashes each token of the input into a fixed bucket, so texts sharing
//! identifiers produce similar vectors. Crude, but enough for search
//! tests to rank a chunk containing the query's words above unrelated
//! ones, with no model files and no network.
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError, l2_normalize};

pub const MOCK_DIMENSIONS: usize = 384;

/// Bag-of-tokens embedder with deterministic output.
pub struct MockEmbedder {
    dimensions: usize,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self {
            dimensions: MOCK_DIMENSIONS,
        }
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            vec[bucket] += 1.0;
        }
        l2_normalize(&mut vec);
        vec
    }
}

impl Embedder for MockEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        Ok(self.embed_one(text))
    }

    fn dimensions(&self) -> Result<usize, EmbedderError> {
        Ok(self.dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_deterministic() {
        let mock = MockEmbedder::default();
        let a = mock.embed_query("fn calculate_fibonacci(n: u64)").unwrap();
        let b = mock.embed_query("fn calculate_fibonacci(n: u64)").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unit_norm_for_nonempty_text() {
        let mock = MockEmbedder::default();
        let v = mock.embed_query("hello world").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_token_overlap_increases_similarity() {
        let mock = MockEmbedder::default();
        let fib = mock
            .embed_query("def calculate_fibonacci(n): return fibonacci numbers")
            .unwrap();
        let query = mock.embed_query("fibonacci calculation").unwrap();
        let unrelated = mock
            .embed_query("open the database connection pool")
            .unwrap();

        assert!(cosine(&fib, &query) > cosine(&unrelated, &query));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let mock = MockEmbedder::default();
        let v = mock.embed_query("").unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }
}
