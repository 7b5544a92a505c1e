//! Model file auto-download from HuggingFace.
//!
//! Fetches the ONNX model and tokenizer files into the local model
//! directory on first use; files already present are left alone.
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

/// Files required for the embedder, with their repo-relative URL paths.
const MODEL_FILES: &[(&str, &str)] = &[
    ("model.onnx", "onnx/model.onnx"),
    ("tokenizer.json", "tokenizer.json"),
    ("config.json", "config.json"),
    ("special_tokens_map.json", "special_tokens_map.json"),
    ("tokenizer_config.json", "tokenizer_config.json"),
];

/// Check whether all required model files exist in `model_dir`.
#[must_use]
pub fn all_files_present(model_dir: &Path) -> bool {
    MODEL_FILES
        .iter()
        .all(|(name, _)| model_dir.join(name).exists())
}

/// Download any missing model files for `repo` into `model_dir`,
/// creating the directory if needed.
pub fn ensure_model_files(repo: &str, model_dir: &Path) -> Result<()> {
    fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create model directory: {}", model_dir.display()))?;

    if all_files_present(model_dir) {
        info!("model files for {repo} already present");
        return Ok(());
    }

    info!("downloading model files for {repo} (one-time download)");

    for &(filename, url_path) in MODEL_FILES {
        let dest = model_dir.join(filename);
        if dest.exists() {
            continue;
        }

        let url = format!("https://huggingface.co/{repo}/resolve/main/{url_path}");
        info!("downloading {filename}");
        download_file(&dest, &url).with_context(|| format!("failed to download {filename}"))?;
    }

    info!("model download for {repo} complete");
    Ok(())
}

fn download_file(dest: &Path, url: &str) -> Result<()> {
    let resp =
        reqwest::blocking::get(url).with_context(|| format!("HTTP request failed: {url}"))?;

    if !resp.status().is_success() {
        anyhow::bail!("bad status: {} for {url}", resp.status());
    }

    let bytes = resp.bytes().context("failed to read response body")?;
    let mut file = fs::File::create(dest)
        .with_context(|| format!("failed to create file: {}", dest.display()))?;
    file.write_all(&bytes).context("failed to write file")?;
    Ok(())
}
