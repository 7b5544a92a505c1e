//! ONNX Runtime embedder using the `ort` crate.
//!
//! Runs a sentence-transformer ONNX model in-process: tokenize, run the
//! session, mean-pool the hidden states under the attention mask, then
//! L2-normalize. The model and tokenizer load lazily on first use, so
//! constructing the embedder never touches the network or the disk.
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use ort::execution_providers::CUDAExecutionProvider;
use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use super::tokenizer::{EncodedBatch, ModelTokenizer};
use super::{Embedder, EmbedderError, download, l2_normalize};

/// Model repos whose HuggingFace packaging pulls in custom Python code.
/// Loading these requires the explicit trust opt-in.
const REMOTE_CODE_PREFIXES: &[&str] = &["jinaai/", "nomic-ai/"];

/// Construction options for [`OnnxEmbedder`], resolved from configuration.
pub struct OnnxOptions {
    /// HuggingFace repo id, e.g. `intfloat/multilingual-e5-small`.
    pub model_repo: String,
    /// Local directory holding (or receiving) the model files.
    pub model_dir: PathBuf,
    /// `cpu` or `cuda`.
    pub device: String,
    pub trust_remote_code: bool,
    /// L2-normalize output vectors.
    pub normalize: bool,
    /// Prefix applied to query-side texts, e.g. `query: ` for e5 models.
    pub query_prompt: Option<String>,
    /// Maximum texts per inference call; larger batches are sliced.
    pub max_batch_size: usize,
}

struct ModelBundle {
    session: Mutex<Session>,
    tokenizer: ModelTokenizer,
}

impl std::fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBundle").finish_non_exhaustive()
    }
}

/// ONNX-backed embedder. Cheap to construct; the session, tokenizer and
/// output dimensionality are resolved once on first use and shared.
pub struct OnnxEmbedder {
    opts: OnnxOptions,
    bundle: OnceLock<ModelBundle>,
    init_lock: Mutex<()>,
    dims: OnceLock<usize>,
}

impl OnnxEmbedder {
    #[must_use]
    pub fn new(opts: OnnxOptions) -> Self {
        Self {
            opts,
            bundle: OnceLock::new(),
            init_lock: Mutex::new(()),
            dims: OnceLock::new(),
        }
    }

    /// Get the loaded model, initializing it on first call.
    ///
    /// Double-checked under `init_lock` so concurrent first callers block
    /// on one initialization instead of racing downloads.
    fn bundle(&self) -> Result<&ModelBundle, EmbedderError> {
        if let Some(bundle) = self.bundle.get() {
            return Ok(bundle);
        }

        let _guard = self
            .init_lock
            .lock()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("init lock poisoned: {e}")))?;
        if let Some(bundle) = self.bundle.get() {
            return Ok(bundle);
        }

        let bundle = self.load_bundle()?;
        let _ = self.bundle.set(bundle);
        Ok(self.bundle.get().expect("bundle just initialized"))
    }

    fn load_bundle(&self) -> Result<ModelBundle, EmbedderError> {
        let repo = &self.opts.model_repo;
        if !self.opts.trust_remote_code
            && REMOTE_CODE_PREFIXES.iter().any(|p| repo.starts_with(p))
        {
            return Err(EmbedderError::Configuration(format!(
                "model '{repo}' ships custom model code; set CODEVEC_TRUST_REMOTE_CODE=true to load it"
            )));
        }

        download::ensure_model_files(repo, &self.opts.model_dir)
            .map_err(|e| EmbedderError::ModelLoadFailed(e.to_string()))?;

        info!("loading ONNX model {repo} on {}", self.opts.device);

        let mut builder = Session::builder()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder error: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?;
        if self.opts.device == "cuda" {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(|e| {
                    EmbedderError::ModelLoadFailed(format!("cuda provider error: {e}"))
                })?;
        }
        let session = builder
            .commit_from_file(self.opts.model_dir.join("model.onnx"))
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load error: {e}")))?;

        let tokenizer = ModelTokenizer::from_model_dir(&self.opts.model_dir)?;

        info!("ONNX model {repo} loaded");
        Ok(ModelBundle {
            session: Mutex::new(session),
            tokenizer,
        })
    }

    /// Run one inference pass over a batch no larger than `max_batch_size`.
    fn run_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let bundle = self.bundle()?;
        let encoded = bundle.tokenizer.encode_batch(texts)?;
        let EncodedBatch {
            input_ids,
            attention_mask,
            batch,
            seq_len,
        } = encoded;

        let input_ids_val = Tensor::from_array(([batch, seq_len], input_ids))
            .map_err(|e| EmbedderError::InferenceFailed(format!("input_ids error: {e}")))?;
        let attention_mask_val =
            Tensor::from_array(([batch, seq_len], attention_mask.clone()))
                .map_err(|e| EmbedderError::InferenceFailed(format!("attention_mask error: {e}")))?;
        let token_type_ids_val =
            Tensor::from_array(([batch, seq_len], vec![0i64; batch * seq_len]))
                .map_err(|e| EmbedderError::InferenceFailed(format!("token_type_ids error: {e}")))?;

        let mut session = bundle
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_val,
                "attention_mask" => attention_mask_val,
                "token_type_ids" => token_type_ids_val,
            ])
            .map_err(|e| EmbedderError::InferenceFailed(format!("inference failed: {e}")))?;

        // Flat hidden states, shape [batch, seq_len, hidden].
        let (_shape, hidden_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;

        if batch * seq_len == 0 || hidden_data.len() % (batch * seq_len) != 0 {
            return Err(EmbedderError::InferenceFailed(format!(
                "unexpected output size {} for batch {batch} x seq {seq_len}",
                hidden_data.len()
            )));
        }
        let hidden_size = hidden_data.len() / (batch * seq_len);

        let mut result = Vec::with_capacity(batch);
        for b in 0..batch {
            let row = &hidden_data[b * seq_len * hidden_size..(b + 1) * seq_len * hidden_size];
            let mask = &attention_mask[b * seq_len..(b + 1) * seq_len];
            let mut pooled = mean_pooling(row, mask, seq_len, hidden_size);
            if self.opts.normalize {
                l2_normalize(&mut pooled);
            }
            result.push(pooled);
        }
        Ok(result)
    }
}

impl Embedder for OnnxEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut out = Vec::with_capacity(texts.len());
        for slice in texts.chunks(self.opts.max_batch_size.max(1)) {
            out.extend(self.run_batch(slice)?);
        }
        Ok(out)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let prompted;
        let input = match &self.opts.query_prompt {
            Some(prompt) => {
                prompted = format!("{prompt}{text}");
                prompted.as_str()
            }
            None => text,
        };
        let mut vecs = self.run_batch(&[input])?;
        vecs.pop()
            .ok_or_else(|| EmbedderError::InferenceFailed("empty inference output".to_string()))
    }

    fn dimensions(&self) -> Result<usize, EmbedderError> {
        if let Some(&dims) = self.dims.get() {
            return Ok(dims);
        }
        let probe = self.run_batch(&["dimension probe"])?;
        let dims = probe
            .first()
            .map(Vec::len)
            .filter(|&d| d > 0)
            .ok_or_else(|| {
                EmbedderError::Configuration(format!(
                    "could not determine output dimensions of {}",
                    self.opts.model_repo
                ))
            })?;
        let _ = self.dims.set(dims);
        Ok(dims)
    }
}

/// Mean pooling over one row of hidden states, weighted by the attention
/// mask. `hidden` is flat with shape `[seq_len, hidden_size]`.
fn mean_pooling(hidden: &[f32], attention_mask: &[i64], seq_len: usize, hidden_size: usize) -> Vec<f32> {
    let mut result = vec![0.0f32; hidden_size];
    let mut mask_sum: f32 = 0.0;

    for t in 0..seq_len {
        let mask = attention_mask[t] as f32;
        mask_sum += mask;
        for h in 0..hidden_size {
            result[h] += hidden[t * hidden_size + h] * mask;
        }
    }

    if mask_sum > 0.0 {
        for v in &mut result {
            *v /= mask_sum;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn opts(repo: &str, trust: bool) -> OnnxOptions {
        OnnxOptions {
            model_repo: repo.to_string(),
            model_dir: PathBuf::from("/nonexistent"),
            device: "cpu".to_string(),
            trust_remote_code: trust,
            normalize: true,
            query_prompt: None,
            max_batch_size: 32,
        }
    }

    #[test]
    fn test_mean_pooling_simple() {
        let hidden = vec![1.0, 2.0, 3.0];
        let mask = vec![1i64];
        assert_eq!(mean_pooling(&hidden, &mask, 1, 3), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_mean_pooling_ignores_padding() {
        // Second token is padding; only the first contributes.
        let hidden = vec![1.0, 2.0, 10.0, 20.0];
        let mask = vec![1i64, 0i64];
        assert_eq!(mean_pooling(&hidden, &mask, 2, 2), vec![1.0, 2.0]);
    }

    #[test]
    fn test_mean_pooling_averages_real_tokens() {
        let hidden = vec![2.0, 4.0, 4.0, 8.0];
        let mask = vec![1i64, 1i64];
        assert_eq!(mean_pooling(&hidden, &mask, 2, 2), vec![3.0, 6.0]);
    }

    #[test]
    fn test_untrusted_remote_code_model_rejected() {
        let embedder = OnnxEmbedder::new(opts("jinaai/jina-embeddings-v2-base-code", false));
        let err = embedder.bundle().unwrap_err();
        assert!(matches!(err, EmbedderError::Configuration(_)));
    }

    #[test]
    fn test_construction_is_lazy() {
        // Pointing at a nonexistent directory must not fail until use.
        let _embedder = OnnxEmbedder::new(opts("intfloat/multilingual-e5-small", false));
    }

    /// Requires downloaded model files; run with `cargo test -- --ignored`.
    #[test]
    #[ignore]
    fn test_onnx_embed_batch_with_real_model() {
        let model_dir = Path::new("models/intfloat--multilingual-e5-small");
        if !model_dir.join("model.onnx").exists() {
            return;
        }

        let embedder = OnnxEmbedder::new(OnnxOptions {
            model_repo: "intfloat/multilingual-e5-small".to_string(),
            model_dir: model_dir.to_path_buf(),
            device: "cpu".to_string(),
            trust_remote_code: false,
            normalize: true,
            query_prompt: Some("query: ".to_string()),
            max_batch_size: 2,
        });

        let vecs = embedder.embed_batch(&["hello", "world", "third"]).unwrap();
        assert_eq!(vecs.len(), 3);
        assert_eq!(vecs[0].len(), embedder.dimensions().unwrap());
        let norm: f32 = vecs[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }
}
