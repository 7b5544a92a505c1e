/// Configuration module for codevec.
///
/// Resolves the codebase root, embedding model, compute device, and index
/// storage paths once at process start. The resulting [`Config`] is shared
/// read-only (`Arc<Config>`) — no component mutates it afterwards.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

/// Directory created under the codebase root to hold index state.
pub const INDEX_DIR_NAME: &str = ".codevec_index";

/// Markers that identify a project root when no prior index exists.
/// Version-control metadata first, then common package manifests.
const ROOT_MARKERS: &[&str] = &[".git", "Cargo.toml", "package.json", "pyproject.toml", "go.mod"];

fn default_model() -> String {
    "local/intfloat/multilingual-e5-small".to_string()
}

const DEFAULT_BATCH_SIZE: usize = 16;

// ── Config struct ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Resolved codebase root (absolute).
    pub root_path: PathBuf,

    /// Embedding model identifier, prefixed with the backend tag
    /// (`local/...` or `remote/...`).
    pub model: String,

    /// Compute device for local inference: `cpu` or `cuda`.
    pub device: String,

    /// Opt-in for models shipping custom inference code.
    pub trust_remote_code: bool,

    /// Maximum number of texts per embedding batch.
    pub batch_size: usize,
}

/// Raw environment overrides, separated from [`Config::from_env`] so tests
/// can drive resolution without mutating process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    pub root_path: Option<String>,
    pub model: Option<String>,
    pub device: Option<String>,
    pub trust_remote_code: Option<String>,
    pub batch_size: Option<String>,
}

impl EnvOverrides {
    fn from_process_env() -> Self {
        let get = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            root_path: get("CODEVEC_ROOT_PATH"),
            model: get("CODEVEC_EMBEDDING_MODEL"),
            device: get("CODEVEC_DEVICE"),
            trust_remote_code: get("CODEVEC_TRUST_REMOTE_CODE"),
            batch_size: get("CODEVEC_BATCH_SIZE"),
        }
    }
}

impl Config {
    /// Resolve configuration from process environment and working directory.
    ///
    /// Invalid environment values are fatal; root discovery itself never
    /// fails.
    pub fn from_env() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to determine working directory")?;
        Self::resolve(EnvOverrides::from_process_env(), &cwd)
    }

    /// Resolve configuration from explicit overrides and a start directory.
    pub fn resolve(env: EnvOverrides, cwd: &Path) -> Result<Self> {
        let root_path = match env.root_path {
            Some(p) => std::path::absolute(Path::new(&p))
                .with_context(|| format!("invalid CODEVEC_ROOT_PATH: {p}"))?,
            None => discover_root(cwd),
        };

        let model = env.model.unwrap_or_else(default_model);

        let device = match env.device {
            Some(d) => d,
            None => detect_device(),
        };

        let trust_remote_code = match env.trust_remote_code.as_deref() {
            None => false,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => anyhow::bail!("invalid CODEVEC_TRUST_REMOTE_CODE: {other}"),
        };

        let batch_size = match env.batch_size {
            Some(b) => b
                .parse::<usize>()
                .with_context(|| format!("invalid CODEVEC_BATCH_SIZE: {b}"))?,
            None => DEFAULT_BATCH_SIZE,
        };

        let cfg = Self {
            root_path,
            model,
            device,
            trust_remote_code,
            batch_size,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(!self.model.is_empty(), "embedding model must not be empty");
        anyhow::ensure!(
            matches!(self.device.as_str(), "cpu" | "cuda"),
            "device must be 'cpu' or 'cuda', got '{}'",
            self.device
        );
        Ok(())
    }

    /// `<root>/.codevec_index/` — index storage directory.
    #[must_use]
    pub fn index_dir(&self) -> PathBuf {
        self.root_path.join(INDEX_DIR_NAME)
    }

    /// Path to the vector store database.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.index_dir().join("index.db")
    }

    /// Path to the incremental-pass state database.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.index_dir().join("state.db")
    }

    /// Directory for downloaded local model files.
    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.index_dir().join("models")
    }
}

// ── Root discovery ───────────────────────────────────────────────────

/// Discover the codebase root starting from `start`.
///
/// Precedence: nearest ancestor containing a prior `.codevec_index`
/// directory, then nearest ancestor containing any project-root marker,
/// then `start` itself. Never fails.
pub fn discover_root(start: &Path) -> PathBuf {
    let start = std::path::absolute(start).unwrap_or_else(|_| start.to_path_buf());

    if let Some(root) = find_ancestor(&start, |dir| dir.join(INDEX_DIR_NAME).is_dir()) {
        return root;
    }

    if let Some(root) = find_ancestor(&start, |dir| {
        ROOT_MARKERS.iter().any(|m| dir.join(m).exists())
    }) {
        return root;
    }

    start
}

/// Walk upward from `start` (inclusive) and return the first directory
/// matching `pred`.
fn find_ancestor(start: &Path, pred: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if pred(dir) {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

// ── Device detection ─────────────────────────────────────────────────

/// Probe for an available accelerator, falling back to CPU.
fn detect_device() -> String {
    use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};

    let cuda = CUDAExecutionProvider::default();
    if cuda.is_available().unwrap_or(false) {
        info!("CUDA execution provider available, using cuda");
        "cuda".to_string()
    } else {
        "cpu".to_string()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn overrides_with_root(root: &Path) -> EnvOverrides {
        EnvOverrides {
            root_path: Some(root.to_string_lossy().into_owned()),
            device: Some("cpu".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let dir = tempdir().unwrap();
        let cfg = Config::resolve(overrides_with_root(dir.path()), dir.path()).unwrap();
        assert_eq!(cfg.model, "local/intfloat/multilingual-e5-small");
        assert_eq!(cfg.batch_size, 16);
        assert!(!cfg.trust_remote_code);
        assert!(cfg.index_dir().ends_with(".codevec_index"));
        assert!(cfg.store_path().ends_with(".codevec_index/index.db"));
        assert!(cfg.state_path().ends_with(".codevec_index/state.db"));
    }

    #[test]
    fn test_explicit_root_override_wins() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("project");
        let elsewhere = dir.path().join("elsewhere");
        fs::create_dir_all(project.join(".git")).unwrap();
        fs::create_dir_all(&elsewhere).unwrap();

        let mut env = overrides_with_root(&elsewhere);
        env.root_path = Some(elsewhere.to_string_lossy().into_owned());
        let cfg = Config::resolve(env, &project).unwrap();
        assert_eq!(cfg.root_path, std::path::absolute(&elsewhere).unwrap());
    }

    #[test]
    fn test_discovery_prefers_index_marker_over_git() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("project");
        fs::create_dir_all(project.join(INDEX_DIR_NAME)).unwrap();
        fs::create_dir_all(project.join(".git")).unwrap();

        let nested = project.join("src").join("lib");
        fs::create_dir_all(&nested).unwrap();

        let root = discover_root(&nested);
        assert_eq!(root, std::path::absolute(&project).unwrap());
    }

    #[test]
    fn test_discovery_finds_git_in_ancestors() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        let deep = dir.path().join("a/b/c/d");
        fs::create_dir_all(&deep).unwrap();

        let root = discover_root(&deep);
        assert_eq!(root, std::path::absolute(dir.path()).unwrap());
    }

    #[test]
    fn test_discovery_finds_package_manifest() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        let deep = dir.path().join("src");
        fs::create_dir_all(&deep).unwrap();

        let root = discover_root(&deep);
        assert_eq!(root, std::path::absolute(dir.path()).unwrap());
    }

    #[test]
    fn test_discovery_falls_back_to_start() {
        let dir = tempdir().unwrap();
        let lonely = dir.path().join("standalone");
        fs::create_dir_all(&lonely).unwrap();

        let root = discover_root(&lonely);
        assert_eq!(root, std::path::absolute(&lonely).unwrap());
    }

    #[test]
    fn test_invalid_batch_size_is_fatal() {
        let dir = tempdir().unwrap();
        let mut env = overrides_with_root(dir.path());
        env.batch_size = Some("lots".to_string());
        assert!(Config::resolve(env, dir.path()).is_err());

        let mut env = overrides_with_root(dir.path());
        env.batch_size = Some("0".to_string());
        assert!(Config::resolve(env, dir.path()).is_err());
    }

    #[test]
    fn test_trust_remote_code_parsing() {
        let dir = tempdir().unwrap();
        for (raw, expected) in [("1", true), ("true", true), ("0", false), ("false", false)] {
            let mut env = overrides_with_root(dir.path());
            env.trust_remote_code = Some(raw.to_string());
            let cfg = Config::resolve(env, dir.path()).unwrap();
            assert_eq!(cfg.trust_remote_code, expected, "raw value {raw}");
        }

        let mut env = overrides_with_root(dir.path());
        env.trust_remote_code = Some("maybe".to_string());
        assert!(Config::resolve(env, dir.path()).is_err());
    }

    #[test]
    fn test_invalid_device_rejected() {
        let dir = tempdir().unwrap();
        let mut env = overrides_with_root(dir.path());
        env.device = Some("tpu".to_string());
        assert!(Config::resolve(env, dir.path()).is_err());
    }
}
