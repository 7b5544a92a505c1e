//! Embedding service: turns text into fixed-dimension float vectors.
//!
//! Two backend families are selected once at startup from the model
//! identifier's prefix tag: `local/<repo>` runs an ONNX model in-process,
//! `remote/<model>` delegates to an external embeddings API. Both are
//! wrapped in a memoizing cache keyed by the backend configuration plus
//! the exact input text.
pub mod cache;
pub mod download;
pub mod mock;
pub mod onnx;
pub mod remote;
pub mod tokenizer;

use std::sync::Arc;

use thiserror::Error;

use crate::config::Config;
use cache::CachedEmbedder;
use onnx::{OnnxEmbedder, OnnxOptions};
use remote::RemoteEmbedder;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    #[error("backend request failed: {0}")]
    RequestFailed(String),

    #[error("invalid embedder configuration: {0}")]
    Configuration(String),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` for concurrent use behind
/// `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a batch of document texts into vectors, one per input, in
    /// input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Embed a single query text. Backends that distinguish query and
    /// document encoding apply their asymmetric prompt here.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Output vector dimensionality, derived from the model once and
    /// memoized. Fails with a configuration error if undeterminable.
    fn dimensions(&self) -> Result<usize, EmbedderError>;
}

/// Backend family, chosen once from the model identifier prefix and
/// immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process ONNX inference; the payload is a HuggingFace repo id.
    Local(String),
    /// External embeddings API; the payload is the API model name.
    Remote(String),
}

impl BackendKind {
    pub fn parse(model: &str) -> Result<Self, EmbedderError> {
        if let Some(repo) = model.strip_prefix("local/") {
            if repo.is_empty() {
                return Err(EmbedderError::Configuration(
                    "empty local model name".to_string(),
                ));
            }
            return Ok(Self::Local(repo.to_string()));
        }
        if let Some(name) = model.strip_prefix("remote/") {
            if name.is_empty() {
                return Err(EmbedderError::Configuration(
                    "empty remote model name".to_string(),
                ));
            }
            return Ok(Self::Remote(name.to_string()));
        }
        Err(EmbedderError::Configuration(format!(
            "model identifier must start with 'local/' or 'remote/', got '{model}'"
        )))
    }
}

/// Asymmetric query prompt for model families that encode queries and
/// documents differently. The e5 family expects a `query: ` prefix on
/// the query side.
#[must_use]
pub fn query_prompt_for(model: &str) -> Option<String> {
    if model.contains("e5") {
        Some("query: ".to_string())
    } else {
        None
    }
}

/// Construct the process-wide embedder from the resolved configuration.
///
/// The returned embedder is cheap to build; the underlying model is
/// loaded lazily on first use.
pub fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>, EmbedderError> {
    let kind = BackendKind::parse(&config.model)?;
    let memo_key = format!(
        "{}|{}|{}|normalize=true|{}",
        config.model,
        config.device,
        config.trust_remote_code,
        query_prompt_for(&config.model).unwrap_or_default(),
    );

    match kind {
        BackendKind::Local(repo) => {
            let model_dir = config.models_dir().join(repo.replace('/', "--"));
            let inner = OnnxEmbedder::new(OnnxOptions {
                model_repo: repo.clone(),
                model_dir,
                device: config.device.clone(),
                trust_remote_code: config.trust_remote_code,
                normalize: true,
                query_prompt: query_prompt_for(&repo),
                max_batch_size: config.batch_size,
            });
            Ok(Arc::new(CachedEmbedder::new(inner, memo_key)))
        }
        BackendKind::Remote(name) => {
            let inner = RemoteEmbedder::from_env(name, true, config.batch_size)?;
            Ok(Arc::new(CachedEmbedder::new(inner, memo_key)))
        }
    }
}

/// L2-normalize a vector in place; zero vectors are left untouched.
pub(crate) fn l2_normalize(vec: &mut [f32]) {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq > 0.0 {
        let inv = 1.0 / norm_sq.sqrt();
        for v in vec {
            *v *= inv;
        }
    }
}
