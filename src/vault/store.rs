use crate::error::{VaultError, VaultErrorCode};
use crate::vault::record::{RECORD_EXTENSION, Record, RecordId};
use crate::vault::util::write_atomic;
use crate::vault::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One record file as seen by a pass. A malformed file keeps its slot with no
/// parsed record, so it takes part in enumeration order but never matches.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: RecordId,
    pub record: Option<Record>,
}

impl StoredRecord {
    pub fn payload(&self) -> &str {
        self.record.as_ref().map(|r| r.payload.as_str()).unwrap_or("")
    }

    pub fn is_comparable(&self) -> bool {
        !self.payload().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn open(dir: &Path) -> Result<Self, VaultError> {
        if !dir.is_dir() {
            return Err(VaultError::StoreMissing(dir.to_path_buf()));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn path_for(&self, id: &RecordId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// Record identifiers in enumeration order (sorted by file name).
    pub fn list_ids(&self) -> Result<Vec<RecordId>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read {}", self.dir.display()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.ends_with(&format!(".{RECORD_EXTENSION}")) {
                continue;
            }
            if let Some(id) = RecordId::from_file_name(name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn load(&self, id: &RecordId) -> Result<StoredRecord> {
        let path = self.path_for(id);
        let raw =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let record = match Record::parse(id.clone(), &path, &raw) {
            Ok(record) => Some(record),
            Err(err) => {
                warn::emit(WarnEvent {
                    code: VaultErrorCode::E004RecordMalformed.as_str(),
                    stage: "store",
                    action: "load-record",
                    target: &path.display().to_string(),
                    reason: "degraded-to-empty-payload",
                    err: &err.to_string(),
                });
                None
            }
        };
        Ok(StoredRecord {
            id: id.clone(),
            record,
        })
    }

    pub fn load_all(&self) -> Result<Vec<StoredRecord>> {
        self.list_ids()?.iter().map(|id| self.load(id)).collect()
    }

    /// What `write_new` would do with `record`, without touching the store.
    /// An existing file under the same identifier is reused when it holds the
    /// same payload and is a collision otherwise.
    pub fn check_new(&self, record: &Record) -> Result<WriteOutcome> {
        let path = self.path_for(&record.id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(WriteOutcome::Created),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let same = Record::parse(record.id.clone(), &path, &raw)
            .map(|existing| existing.payload == record.payload)
            .unwrap_or(false);
        if same {
            return Ok(WriteOutcome::AlreadyPresent);
        }
        Err(VaultError::IdentifierCollision {
            id: record.id.to_string(),
            path,
        }
        .into())
    }

    pub fn write_new(&self, record: &Record) -> Result<WriteOutcome> {
        let outcome = self.check_new(record)?;
        if outcome == WriteOutcome::Created {
            write_atomic(&self.path_for(&record.id), &record.render()?)?;
        }
        Ok(outcome)
    }

    /// Rewrites an existing record file in place (metadata repair).
    pub fn overwrite(&self, id: &RecordId, contents: &str) -> Result<()> {
        write_atomic(&self.path_for(id), contents)
    }

    /// Returns false when the file was already gone.
    pub fn delete(&self, id: &RecordId) -> Result<bool> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
        }
    }
}
