use crate::vault::paths::VaultPaths;
use crate::vault::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    #[serde(rename = "extract")]
    Extract,
    #[serde(rename = "dedup.compare")]
    DedupCompare,
    #[serde(rename = "dedup.apply")]
    DedupApply,
    #[serde(rename = "repair")]
    Repair,
}

/// One line of `<logs_dir>/audit.log`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: Phase,
    pub ok: bool,
    pub corpus_root: String,
    pub counts: BTreeMap<&'static str, usize>,
}

impl AuditEvent {
    pub fn new(phase: Phase, paths: &VaultPaths) -> Result<Self> {
        Ok(Self {
            at_epoch_secs: now_epoch_secs()?,
            phase,
            ok: true,
            corpus_root: paths.corpus_root.display().to_string(),
            counts: BTreeMap::new(),
        })
    }

    pub fn count(mut self, key: &'static str, value: usize) -> Self {
        self.counts.insert(key, value);
        self
    }

    pub fn ok(mut self, ok: bool) -> Self {
        self.ok = ok;
        self
    }
}

pub fn append(paths: &VaultPaths, event: &AuditEvent) -> Result<()> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let path = paths.logs_dir.join("audit.log");
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{}", serde_json::to_string(event)?)
        .with_context(|| format!("failed to append {}", path.display()))?;
    Ok(())
}
