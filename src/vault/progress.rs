use crate::error::VaultError;
use crate::vault::record::RecordId;
use crate::vault::util::write_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const PROGRESS_SCHEMA_VERSION: u32 = 1;

/// Records already compared against every later record in the current pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressState {
    pub schema_version: u32,
    pub store_fingerprint: String,
    pub processed: BTreeSet<RecordId>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            schema_version: PROGRESS_SCHEMA_VERSION,
            store_fingerprint: String::new(),
            processed: BTreeSet::new(),
        }
    }
}

/// On-disk forms. Files are written as a `ProgressState` object so the store
/// fingerprint travels with the processed ids; a bare JSON list of ids, the
/// older format, is still read.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProgressFile {
    Current(ProgressState),
    Legacy(Vec<RecordId>),
}

/// sha256 over the sorted identifiers, one per line.
pub fn store_fingerprint(ids: &[RecordId]) -> String {
    let mut sorted: Vec<&str> = ids.iter().map(RecordId::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for id in sorted {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume {
    Fresh,
    Resumed(usize),
    /// Saved progress described a different store and was discarded.
    Stale(usize),
}

impl ProgressState {
    pub fn for_store(ids: &[RecordId]) -> Self {
        Self {
            store_fingerprint: store_fingerprint(ids),
            ..Self::default()
        }
    }

    pub fn is_processed(&self, id: &RecordId) -> bool {
        self.processed.contains(id)
    }

    pub fn mark(&mut self, id: &RecordId) {
        self.processed.insert(id.clone());
    }

    /// Adopts `saved` when it was built against the same store, otherwise
    /// starts over. Legacy files carry no fingerprint and are trusted as long
    /// as every id they list still exists.
    pub fn resume(ids: &[RecordId], saved: Option<ProgressState>) -> (Self, Resume) {
        let mut fresh = Self::for_store(ids);
        let Some(saved) = saved else {
            return (fresh, Resume::Fresh);
        };
        if saved.processed.is_empty() {
            return (fresh, Resume::Fresh);
        }

        let matches = if saved.store_fingerprint.is_empty() {
            saved.processed.iter().all(|id| ids.contains(id))
        } else {
            saved.store_fingerprint == fresh.store_fingerprint
        };
        if !matches {
            return (fresh, Resume::Stale(saved.processed.len()));
        }

        fresh.processed = saved.processed;
        let count = fresh.processed.len();
        (fresh, Resume::Resumed(count))
    }
}

pub fn load(path: &Path) -> Result<Option<ProgressState>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let parsed: ProgressFile =
        serde_json::from_str(&raw).map_err(|err| VaultError::ProgressCorrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    Ok(Some(match parsed {
        ProgressFile::Current(state) => state,
        ProgressFile::Legacy(ids) => ProgressState {
            processed: ids.into_iter().collect(),
            ..ProgressState::default()
        },
    }))
}

pub fn save(path: &Path, state: &ProgressState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(state)?;
    write_atomic(path, &format!("{data}\n"))
}

pub fn clear(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}
