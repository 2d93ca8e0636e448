use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("record store root does not exist: {}", .0.display())]
    StoreMissing(PathBuf),
    #[error("corpus root does not exist: {}", .0.display())]
    CorpusMissing(PathBuf),
    #[error("config invalid: {0}")]
    InvalidConfig(String),
    #[error("malformed record {}: {reason}", .path.display())]
    MalformedRecord { path: PathBuf, reason: String },
    #[error("identifier collision on {id}: {} holds a different payload", .path.display())]
    IdentifierCollision { id: String, path: PathBuf },
    #[error("progress state unreadable {}: {reason}", .path.display())]
    ProgressCorrupt { path: PathBuf, reason: String },
    #[error("another dedup pass holds {}", .0.display())]
    PassLocked(PathBuf),
}

impl VaultError {
    pub fn code(&self) -> VaultErrorCode {
        match self {
            Self::StoreMissing(_) => VaultErrorCode::E001StoreMissing,
            Self::CorpusMissing(_) => VaultErrorCode::E002CorpusMissing,
            Self::InvalidConfig(_) => VaultErrorCode::E003ConfigInvalid,
            Self::MalformedRecord { .. } => VaultErrorCode::E004RecordMalformed,
            Self::IdentifierCollision { .. } => VaultErrorCode::E005IdCollision,
            Self::ProgressCorrupt { .. } => VaultErrorCode::E006ProgressCorrupt,
            Self::PassLocked(_) => VaultErrorCode::E007Locked,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultErrorCode {
    E001StoreMissing,
    E002CorpusMissing,
    E003ConfigInvalid,
    E004RecordMalformed,
    E005IdCollision,
    E006ProgressCorrupt,
    E007Locked,
}

impl VaultErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001StoreMissing => "E001_STORE_MISSING",
            Self::E002CorpusMissing => "E002_CORPUS_MISSING",
            Self::E003ConfigInvalid => "E003_CONFIG_INVALID",
            Self::E004RecordMalformed => "E004_RECORD_MALFORMED",
            Self::E005IdCollision => "E005_ID_COLLISION",
            Self::E006ProgressCorrupt => "E006_PROGRESS_CORRUPT",
            Self::E007Locked => "E007_LOCKED",
        }
    }
}
