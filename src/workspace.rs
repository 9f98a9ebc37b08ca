//! workspace.rs
//!
//! The repository working copy that file ids resolve against. Passed
//! explicitly into every operation.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalize a caller-supplied file id to a workspace-relative path.
    ///
    /// Accepts `tests/test_a.py`, `./tests/test_a.py`, `/tests/test_a.py`
    /// and `<root name>/tests/test_a.py`, unless the root itself contains an
    /// entry called `<root name>`. Ids that are empty or climb out of the
    /// workspace are rejected.
    pub fn relative(&self, file_id: &str) -> Result<String> {
        let cleaned = file_id.trim().replace('\\', "/");
        let mut rel = cleaned.as_str();

        loop {
            let next = rel.trim_start_matches('/');
            let next = next.strip_prefix("./").unwrap_or(next);
            if next == rel {
                break;
            }
            rel = next;
        }

        // `<root name>/...` is only a prefix when the root has no entry of
        // that name (`pandas/pandas/tests` must stay as written).
        if let Some(name) = self.root.file_name().and_then(|n| n.to_str()) {
            if let Some(rest) = rel.strip_prefix(name).and_then(|r| r.strip_prefix('/')) {
                if !self.root.join(name).exists() {
                    rel = rest;
                }
            }
        }

        let rel = rel.trim_end_matches('/');
        let path = Path::new(rel);
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

        if rel.is_empty() || escapes {
            return Err(Error::InvalidPath(file_id.to_string()));
        }
        Ok(rel.to_string())
    }

    pub fn resolve(&self, file_id: &str) -> Result<PathBuf> {
        Ok(self.root.join(self.relative(file_id)?))
    }

    /// Resolve a file that must already exist.
    pub fn resolve_existing(&self, file_id: &str) -> Result<PathBuf> {
        let path = self.resolve(file_id)?;
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::NotFound(path))
        }
    }

    /// Current content, or `None` if the file does not exist.
    pub fn read(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace `path` with `content` in one step (temp file + rename).
    pub fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
        let tmp = path.with_file_name(format!(".{file_name}.testgraft.tmp"));

        fs::write(&tmp, content)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(path = %path.display(), bytes = content.len(), "file written");
        Ok(())
    }

    /// Workspace-relative paths of all files, optionally filtered by
    /// extension, sorted.
    pub fn list(&self, ext: Option<&str>) -> Vec<String> {
        let mut out: Vec<String> = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_ignored(e.path()))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| match ext {
                Some(x) => e.path().extension().and_then(|s| s.to_str()) == Some(x),
                None => true,
            })
            .filter_map(|e| {
                e.path()
                    .strip_prefix(&self.root)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        out.sort();
        out
    }

    /// `git clone <url>` into the workspace root.
    pub fn clone_repo(&self, url: &str) -> Result<()> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::MissingField("repo_url"));
        }

        if let Some(parent) = self.root.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(%url, root = %self.root.display(), "cloning repository");
        let out = Command::new("git")
            .arg("clone")
            .arg("--quiet")
            .arg(url)
            .arg(&self.root)
            .output()
            .map_err(|e| Error::Clone(e.to_string()))?;

        if !out.status.success() {
            return Err(Error::Clone(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

fn is_ignored(path: &Path) -> bool {
    matches!(
        path.file_name().and_then(|n| n.to_str()),
        Some(".git" | "__pycache__" | ".pytest_cache" | ".venv" | "node_modules" | "target")
    )
}
