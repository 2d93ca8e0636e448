use crate::vault::record::RecordId;
use crate::vault::util::write_atomic;
use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;

/// Embed-link syntax pointing into the record store: `![[<prefix>/<file>]]`.
#[derive(Debug, Clone)]
pub struct ReferenceFormat {
    prefix: String,
    pattern: Regex,
}

impl ReferenceFormat {
    pub fn new(prefix: &str) -> Result<Self> {
        let prefix = prefix.trim_matches('/').to_string();
        let pattern = Regex::new(&format!(
            r"!\[\[{}/([^\]\r\n]+?)\]\]",
            regex::escape(&prefix)
        ))
        .with_context(|| format!("invalid reference prefix {prefix}"))?;
        Ok(Self { prefix, pattern })
    }

    pub fn token(&self, id: &RecordId) -> String {
        format!("![[{}/{}]]", self.prefix, id.file_name())
    }

    pub fn contains_reference(&self, content: &str) -> bool {
        self.pattern.is_match(content)
    }

    /// Record file names referenced by `content`, in order of appearance.
    pub fn referenced_files<'a>(&self, content: &'a str) -> Vec<&'a str> {
        self.pattern
            .captures_iter(content)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// Replaces every reference to `old` with one to `new`; `None` when `old`
    /// is not referenced at all.
    pub fn rewrite(&self, content: &str, old: &RecordId, new: &RecordId) -> Option<String> {
        let old_token = self.token(old);
        if !content.contains(&old_token) {
            return None;
        }
        Some(content.replace(&old_token, &self.token(new)))
    }
}

/// Applies `rewrite` to a document on disk; the file is written only when at
/// least one reference changed. Returns the number of replaced references.
pub fn rewrite_document(
    format: &ReferenceFormat,
    path: &Path,
    rewrites: &[(RecordId, RecordId)],
) -> Result<usize> {
    let mut content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut replaced = 0usize;
    for (old, new) in rewrites {
        let count = content.matches(&format.token(old)).count();
        if let Some(next) = format.rewrite(&content, old, new) {
            content = next;
            replaced += count;
        }
    }

    if replaced > 0 {
        write_atomic(path, &content)?;
    }
    Ok(replaced)
}
