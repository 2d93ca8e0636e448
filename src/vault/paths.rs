use crate::error::VaultError;
use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct VaultPaths {
    pub corpus_root: PathBuf,
    pub store_dir: PathBuf,
    pub state_dir: PathBuf,
    pub progress_file: PathBuf,
    pub report_file: PathBuf,
    pub logs_dir: PathBuf,
    pub lock_file: PathBuf,
}

/// Values supplied on the command line; they win over env and defaults.
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub corpus_root: Option<PathBuf>,
    pub store_dir: Option<PathBuf>,
    pub progress_file: Option<PathBuf>,
    pub report_file: Option<PathBuf>,
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

fn pick(flag: Option<&PathBuf>, var: &str, fallback: PathBuf) -> PathBuf {
    match flag {
        Some(path) => path.clone(),
        None => env_or_default_path(var, fallback),
    }
}

/// Anchors `path` at `cwd` and resolves symlinks when it already exists, so
/// paths from flags, env and defaults compare equal when they name the same
/// directory.
fn anchor(cwd: &Path, path: PathBuf) -> PathBuf {
    let absolute = if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    };
    fs::canonicalize(&absolute).unwrap_or(absolute)
}

pub fn resolve_paths(overrides: &PathOverrides) -> Result<VaultPaths> {
    let cwd = env::current_dir().context("current directory is not accessible")?;
    let corpus_root = anchor(
        &cwd,
        pick(
            overrides.corpus_root.as_ref(),
            "SNIPVAULT_CORPUS_ROOT",
            cwd.clone(),
        ),
    );
    let store_dir = anchor(
        &cwd,
        pick(
            overrides.store_dir.as_ref(),
            "SNIPVAULT_STORE_DIR",
            corpus_root.join("Snippets"),
        ),
    );
    let state_dir = anchor(
        &cwd,
        env_or_default_path("SNIPVAULT_STATE_DIR", corpus_root.join(".snipvault")),
    );
    let progress_file = anchor(
        &cwd,
        pick(
            overrides.progress_file.as_ref(),
            "SNIPVAULT_PROGRESS_FILE",
            state_dir.join("dedup_progress.json"),
        ),
    );
    let report_file = anchor(
        &cwd,
        pick(
            overrides.report_file.as_ref(),
            "SNIPVAULT_REPORT_FILE",
            state_dir.join("dedup_report.txt"),
        ),
    );
    let logs_dir = state_dir.join("logs");
    let lock_file = state_dir.join("dedup.lock");

    Ok(VaultPaths {
        corpus_root,
        store_dir,
        state_dir,
        progress_file,
        report_file,
        logs_dir,
        lock_file,
    })
}

impl VaultPaths {
    /// Fails before any mutation when the corpus or the record store is absent.
    pub fn ensure_roots(&self) -> Result<(), VaultError> {
        if !self.corpus_root.is_dir() {
            return Err(VaultError::CorpusMissing(self.corpus_root.clone()));
        }
        if !self.store_dir.is_dir() {
            return Err(VaultError::StoreMissing(self.store_dir.clone()));
        }
        Ok(())
    }

    /// Path segment used inside embed links, e.g. `Snippets` in `![[Snippets/x.md]]`.
    pub fn link_prefix(&self) -> String {
        let relative = self
            .store_dir
            .strip_prefix(&self.corpus_root)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty());
        match relative {
            Some(rel) => join_components(rel),
            None => self
                .store_dir
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| "Snippets".to_string()),
        }
    }
}

fn join_components(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
pub(crate) fn test_paths(root: &Path) -> VaultPaths {
    let state_dir = root.join(".snipvault");
    VaultPaths {
        corpus_root: root.to_path_buf(),
        store_dir: root.join("Snippets"),
        progress_file: state_dir.join("dedup_progress.json"),
        report_file: state_dir.join("dedup_report.txt"),
        logs_dir: state_dir.join("logs"),
        lock_file: state_dir.join("dedup.lock"),
        state_dir,
    }
}
