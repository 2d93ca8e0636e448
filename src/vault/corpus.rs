use crate::error::VaultError;
use crate::vault::config::VaultCorpusConfig;
use crate::vault::paths::VaultPaths;
use anyhow::Result;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// The document set under the corpus root. Enumeration is sorted and
/// restartable; hidden directories, configured ignore dirs, and the record
/// store itself are never visited.
#[derive(Debug, Clone)]
pub struct Corpus {
    root: PathBuf,
    extensions: BTreeSet<String>,
    ignore_dirs: BTreeSet<String>,
    excluded: Vec<PathBuf>,
}

impl Corpus {
    pub fn new(paths: &VaultPaths, cfg: &VaultCorpusConfig) -> Result<Self, VaultError> {
        if !paths.corpus_root.is_dir() {
            return Err(VaultError::CorpusMissing(paths.corpus_root.clone()));
        }
        Ok(Self {
            root: canonical(&paths.corpus_root),
            extensions: cfg
                .extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            ignore_dirs: cfg.ignore_dirs.iter().map(|d| d.trim().to_string()).collect(),
            excluded: vec![canonical(&paths.store_dir), canonical(&paths.state_dir)],
        })
    }

    fn skip_dir(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || self.ignore_dirs.contains(name.as_ref()) {
            return true;
        }
        let here = canonical(entry.path());
        self.excluded.contains(&here)
    }

    fn is_document(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    pub fn documents(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.skip_dir(e));
        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_file() && self.is_document(entry.path()) {
                out.push(entry.into_path());
            }
        }
        Ok(out)
    }

    /// Corpus-relative path with `/` separators, used as provenance.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
