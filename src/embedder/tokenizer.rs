//! Tokenizer wrapper around the HuggingFace `tokenizers` crate.
//!
//! Produces padded, flattened id/mask buffers shaped for the ONNX
//! session input tensors.
use std::path::Path;

use tokenizers::Tokenizer;

use super::EmbedderError;

/// Sentence-transformer models cap input at 512 tokens.
const MAX_SEQUENCE_LENGTH: usize = 512;

/// A padded batch of encoded texts, flattened row-major as
/// `[batch, seq_len]` for direct tensor construction.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub batch: usize,
    pub seq_len: usize,
}

/// Wrapper around a `tokenizer.json` tokenizer configured with
/// truncation and in-batch padding.
pub struct ModelTokenizer {
    inner: Tokenizer,
}

impl ModelTokenizer {
    /// Load the tokenizer from a `tokenizer.json` in the model directory.
    pub fn from_model_dir(model_dir: &Path) -> Result<Self, EmbedderError> {
        let tokenizer_path = model_dir.join("tokenizer.json");
        if !tokenizer_path.exists() {
            return Err(EmbedderError::TokenizerError(format!(
                "tokenizer.json not found in {}",
                model_dir.display()
            )));
        }

        let mut inner = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbedderError::TokenizerError(format!("failed to load tokenizer: {e}")))?;

        let _ = inner.with_truncation(Some(tokenizers::TruncationParams {
            max_length: MAX_SEQUENCE_LENGTH,
            ..Default::default()
        }));
        inner.with_padding(Some(tokenizers::PaddingParams {
            ..Default::default()
        }));

        Ok(Self { inner })
    }

    /// Encode a batch of texts into padded, flattened tensors.
    pub fn encode_batch(&self, texts: &[&str]) -> Result<EncodedBatch, EmbedderError> {
        let encodings = self
            .inner
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbedderError::TokenizerError(format!("failed to encode batch: {e}")))?;

        let batch = encodings.len();
        let seq_len = encodings.first().map_or(0, |e| e.get_ids().len());

        let mut input_ids = Vec::with_capacity(batch * seq_len);
        let mut attention_mask = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        Ok(EncodedBatch {
            input_ids,
            attention_mask,
            batch,
            seq_len,
        })
    }
}
