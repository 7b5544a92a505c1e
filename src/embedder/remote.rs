//! Remote embedding backend over an OpenAI-compatible embeddings API.
//!
//! Sends batched `POST {base}/embeddings` requests with the blocking
//! reqwest client; callers run this off the async runtime. Endpoint and
//! credentials come from the environment so any compatible provider
//! works unchanged.
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, EmbedderError, l2_normalize};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedder backed by a remote embeddings endpoint.
pub struct RemoteEmbedder {
    model: String,
    api_base: String,
    api_key: Option<String>,
    normalize: bool,
    max_batch_size: usize,
    client: Client,
    dims: OnceLock<usize>,
}

impl RemoteEmbedder {
    pub fn new(
        model: String,
        api_base: String,
        api_key: Option<String>,
        normalize: bool,
        max_batch_size: usize,
    ) -> Result<Self, EmbedderError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                EmbedderError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            model,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            normalize,
            max_batch_size,
            client,
            dims: OnceLock::new(),
        })
    }

    /// Build from `CODEVEC_EMBEDDING_API_BASE` / `CODEVEC_EMBEDDING_API_KEY`,
    /// falling back to the OpenAI endpoint and `OPENAI_API_KEY`.
    pub fn from_env(
        model: String,
        normalize: bool,
        max_batch_size: usize,
    ) -> Result<Self, EmbedderError> {
        let api_base = std::env::var("CODEVEC_EMBEDDING_API_BASE")
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let api_key = std::env::var("CODEVEC_EMBEDDING_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();
        Self::new(model, api_base, api_key, normalize, max_batch_size)
    }

    /// One request for a batch no larger than `max_batch_size`.
    fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("embedding {} texts via {}", texts.len(), self.api_base);

        let url = format!("{}/embeddings", self.api_base);
        let mut req = self.client.post(&url).json(&EmbeddingsRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .map_err(|e| EmbedderError::RequestFailed(format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(EmbedderError::RequestFailed(format!(
                "{url} returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingsResponse = resp
            .json()
            .map_err(|e| EmbedderError::RequestFailed(format!("malformed response: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbedderError::RequestFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // The API may return items out of order; restore input order.
        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);

        let mut out = Vec::with_capacity(items.len());
        for mut item in items {
            if self.normalize {
                l2_normalize(&mut item.embedding);
            }
            out.push(item.embedding);
        }
        Ok(out)
    }
}

impl Embedder for RemoteEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut out = Vec::with_capacity(texts.len());
        for slice in texts.chunks(self.max_batch_size.max(1)) {
            out.extend(self.request(slice)?);
        }
        Ok(out)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vecs = self.request(&[text])?;
        vecs.pop()
            .ok_or_else(|| EmbedderError::RequestFailed("empty embeddings response".to_string()))
    }

    fn dimensions(&self) -> Result<usize, EmbedderError> {
        if let Some(&dims) = self.dims.get() {
            return Ok(dims);
        }
        let probe = self.request(&["dimension probe"])?;
        let dims = probe
            .first()
            .map(Vec::len)
            .filter(|&d| d > 0)
            .ok_or_else(|| {
                EmbedderError::Configuration(format!(
                    "could not determine output dimensions of remote model {}",
                    self.model
                ))
            })?;
        let _ = self.dims.set(dims);
        Ok(dims)
    }
}
