//! File walker and filter.
//!
//! Enumerates candidate source files under the codebase root. A file is
//! included iff its extension is on the allow-list AND no exclude rule
//! matches. Exclusion is authoritative: excluded directories are pruned
//! before descent, so nothing under them is ever walked.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::debug;

/// Source/text file extensions eligible for indexing.
pub const INCLUDED_EXTENSIONS: &[&str] = &[
    "py", "pyi", "js", "jsx", "ts", "tsx", "mjs", "cjs", "rs", "go",
];

/// Directory names pruned at any depth. Hidden directories (leading dot,
/// which also covers `.git` and the index directory itself) are pruned
/// separately by name.
const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    "__pycache__",
];

/// File-name globs removed even when the extension matches.
const EXCLUDED_FILES: &[&str] = &[
    "*.min.js",
    "*.min.css",
    "*.lock",
    "package-lock.json",
    "yarn.lock",
    "go.sum",
];

pub struct FileWalker {
    root: PathBuf,
    excluded_files: GlobSet,
}

impl FileWalker {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in EXCLUDED_FILES {
            builder.add(Glob::new(pattern).with_context(|| format!("bad pattern {pattern}"))?);
        }
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            excluded_files: builder.build().context("failed to build exclude set")?,
        })
    }

    /// Walk the root and return included files as root-relative paths with
    /// forward slashes, sorted for deterministic pass order.
    ///
    /// Unreadable entries and symlinks are skipped without error; symlinks
    /// are not followed, which also breaks symlink cycles.
    pub fn walk(&self) -> Vec<String> {
        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .follow_links(false)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                // Never descend into excluded or hidden directories. Depth 0
                // is the root itself, which may legitimately be hidden.
                if entry.depth() > 0 && entry.file_type().is_some_and(|t| t.is_dir()) {
                    if name.starts_with('.') || EXCLUDED_DIRS.contains(&name.as_ref()) {
                        return false;
                    }
                }
                true
            })
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();
            if !self.is_included(path) {
                continue;
            }
            if let Ok(rel) = path.strip_prefix(&self.root) {
                files.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }

        files.sort();
        files
    }

    fn is_included(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if !INCLUDED_EXTENSIONS.contains(&ext) {
            return false;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        !self.excluded_files.is_match(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn test_walk_includes_supported_extensions() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("main.rs"));
        touch(&dir.path().join("app.py"));
        touch(&dir.path().join("notes.md"));
        touch(&dir.path().join("binary.so"));

        let files = FileWalker::new(dir.path()).unwrap().walk();
        assert_eq!(files, vec!["app.py".to_string(), "main.rs".to_string()]);
    }

    #[test]
    fn test_walk_prunes_excluded_directories() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("src/lib.rs"));
        touch(&dir.path().join("node_modules/pkg/index.js"));
        touch(&dir.path().join("target/debug/build.rs"));
        touch(&dir.path().join("vendor/dep/dep.go"));
        touch(&dir.path().join("__pycache__/mod.py"));

        let files = FileWalker::new(dir.path()).unwrap().walk();
        assert_eq!(files, vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn test_walk_prunes_hidden_and_index_directories() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("ok.ts"));
        touch(&dir.path().join(".git/hooks/hook.py"));
        touch(&dir.path().join(".codevec_index/cached.rs"));
        touch(&dir.path().join(".hidden/secret.js"));

        let files = FileWalker::new(dir.path()).unwrap().walk();
        assert_eq!(files, vec!["ok.ts".to_string()]);
    }

    #[test]
    fn test_exclude_overrides_include() {
        // Extension says include, file-level exclude pattern wins.
        let dir = tempdir().unwrap();
        touch(&dir.path().join("bundle.min.js"));
        touch(&dir.path().join("app.js"));

        let files = FileWalker::new(dir.path()).unwrap().walk();
        assert_eq!(files, vec!["app.js".to_string()]);
    }

    #[test]
    fn test_walk_output_is_sorted_and_relative() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("b/two.rs"));
        touch(&dir.path().join("a/one.rs"));

        let files = FileWalker::new(dir.path()).unwrap().walk();
        assert_eq!(files, vec!["a/one.rs".to_string(), "b/two.rs".to_string()]);
    }
}
