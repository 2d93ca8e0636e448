use crate::vault::record::RecordId;
use crate::vault::util::write_atomic;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// A pair kept apart but close enough for a human to look at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearDuplicate {
    pub first: RecordId,
    pub second: RecordId,
    pub score: f64,
}

impl NearDuplicate {
    pub fn line(&self) -> String {
        format!(
            "{} and {} (Similarity: {:.2})",
            self.first.file_name(),
            self.second.file_name(),
            self.score
        )
    }
}

pub fn render(pairs: &[NearDuplicate], floor: f64, exact: f64, at: DateTime<Local>) -> String {
    let mut out = format!(
        "Records with similarity in [{floor:.2}, {exact:.2}): {}\nGenerated {}\n\n",
        pairs.len(),
        at.format("%Y-%m-%d %H:%M:%S %z")
    );
    for pair in pairs {
        out.push_str(&pair.line());
        out.push('\n');
    }
    out
}

/// Overwrites the report sink with this pass's pairs.
pub fn write(path: &Path, pairs: &[NearDuplicate], floor: f64, exact: f64) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    write_atomic(path, &render(pairs, floor, exact, Local::now()))
}
