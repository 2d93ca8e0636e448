use crate::error::VaultError;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

pub const SNIPPET_TAG: &str = "snippet";
pub const PLAIN_LANGUAGE: &str = "plain";
pub const RECORD_EXTENSION: &str = "md";
const DIGEST_HEX_CHARS: usize = 16;

static PAYLOAD_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([^\n`]*)\r?\n(.*?)```").expect("valid fence regex"));

/// Record identifier, also the stem of the record's file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// `<lang-slug>_<sha256 prefix>`; stable across runs and platforms.
    pub fn derive(language: &str, payload: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(language.as_bytes());
        hasher.update([0u8]);
        hasher.update(payload.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(format!(
            "{}_{}",
            language_slug(language),
            &digest[..DIGEST_HEX_CHARS]
        ))
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(&format!(".{RECORD_EXTENSION}"))?;
        if stem.is_empty() {
            return None;
        }
        Some(Self(stem.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.{RECORD_EXTENSION}", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

pub fn language_slug(language: &str) -> String {
    let slug: String = language
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if slug.trim_matches('_').is_empty() {
        PLAIN_LANGUAGE.to_string()
    } else {
        slug
    }
}

/// Leading metadata block of a record file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(
        rename = "source-note",
        default,
        deserialize_with = "note_link",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Accepts `source-note` as a string or as the nested flow list YAML makes of
/// an unquoted `[[note]]`.
fn note_link<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    fn flatten(value: &serde_yaml::Value) -> Option<String> {
        match value {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Sequence(items) => {
                let inner: Vec<String> = items.iter().filter_map(flatten).collect();
                Some(format!("[{}]", inner.join(", ")))
            }
            serde_yaml::Value::Null => None,
            other => serde_yaml::to_string(other)
                .ok()
                .map(|s| s.trim().to_string()),
        }
    }

    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(flatten))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub language: String,
    pub payload: String,
    pub meta: RecordMeta,
}

impl Record {
    /// Builds a fresh record for an extracted payload. `payload` must already be trimmed.
    pub fn new(language: &str, payload: &str, source_note: &str, context: &str) -> Self {
        let language = if language.trim().is_empty() {
            PLAIN_LANGUAGE
        } else {
            language.trim()
        };
        let context = context.trim();
        Self {
            id: RecordId::derive(language, payload),
            language: language.to_string(),
            payload: payload.to_string(),
            meta: RecordMeta {
                tags: canonical_tags(language, &[]),
                source_note: Some(format!("[[{source_note}]]")),
                context: (!context.is_empty()).then(|| context.to_string()),
            },
        }
    }

    pub fn render(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(&self.meta)
            .with_context(|| format!("failed to serialize metadata for {}", self.id))?;
        let mut out = String::with_capacity(yaml.len() + self.payload.len() + 32);
        out.push_str("---\n");
        out.push_str(&yaml);
        if !yaml.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("---\n");
        out.push_str(&format!("```{}\n{}\n```\n", self.language, self.payload));
        Ok(out)
    }

    /// Strict parse of a record file body.
    pub fn parse(id: RecordId, path: &Path, raw: &str) -> Result<Self, VaultError> {
        let malformed = |reason: &str| VaultError::MalformedRecord {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let (yaml, body) =
            split_front_matter(raw).ok_or_else(|| malformed("missing front matter block"))?;
        let meta = if yaml.trim().is_empty() {
            RecordMeta::default()
        } else {
            serde_yaml::from_str::<RecordMeta>(yaml)
                .map_err(|err| malformed(&format!("front matter: {err}")))?
        };

        let (annotation, payload) =
            first_fence(body).ok_or_else(|| malformed("no fenced payload block"))?;
        if payload.is_empty() {
            return Err(malformed("empty payload"));
        }

        let language = match annotation {
            Some(lang) => lang,
            None => meta
                .tags
                .iter()
                .find(|tag| tag.as_str() != SNIPPET_TAG)
                .cloned()
                .unwrap_or_else(|| PLAIN_LANGUAGE.to_string()),
        };

        Ok(Self {
            id,
            language,
            payload,
            meta,
        })
    }
}

/// `[snippet, <language>, ...extra]` without duplicates.
pub fn canonical_tags(language: &str, existing: &[String]) -> Vec<String> {
    let mut tags = vec![SNIPPET_TAG.to_string(), language.to_string()];
    for tag in existing {
        let tag = tag.trim();
        if tag.is_empty() || tags.iter().any(|t| t == tag) {
            continue;
        }
        tags.push(tag.to_string());
    }
    tags
}

/// Splits `---\n<yaml>\n---\n<body>`; `None` when the block is absent or unterminated.
pub fn split_front_matter(raw: &str) -> Option<(&str, &str)> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let rest = raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))?;
    if let Some(body) = rest.strip_prefix("---\n") {
        return Some(("", body));
    }

    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// First fenced block: (annotation, trimmed payload).
pub fn first_fence(body: &str) -> Option<(Option<String>, String)> {
    let caps = PAYLOAD_FENCE.captures(body)?;
    let annotation = caps
        .get(1)
        .and_then(|m| m.as_str().split_whitespace().next())
        .map(ToOwned::to_owned);
    let payload = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
    Some((annotation, payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn derived_id_is_stable_and_language_scoped() {
        let a = RecordId::derive("python", "print(1)");
        let b = RecordId::derive("python", "print(1)");
        let c = RecordId::derive("js", "print(1)");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("python_"));
        assert_eq!(a.as_str().len(), "python_".len() + 16);
        assert_eq!(a.file_name(), format!("{a}.md"));
    }

    #[test]
    fn language_slug_normalizes_odd_tags() {
        assert_eq!(language_slug("C++"), "c__");
        assert_eq!(language_slug("Rust"), "rust");
        assert_eq!(language_slug(""), "plain");
        assert_eq!(language_slug("--"), "plain");
    }

    #[test]
    fn rendered_record_parses_back() {
        let record = Record::new("python", "print(1)", "notes/a.md", "Example:");
        let rendered = record.render().expect("render");
        assert!(rendered.starts_with("---\n"));
        assert!(rendered.contains("- snippet\n"));
        assert!(rendered.contains("```python\nprint(1)\n```"));

        let parsed =
            Record::parse(record.id.clone(), &PathBuf::from("x.md"), &rendered).expect("parse");
        assert_eq!(parsed, record);
        assert_eq!(
            parsed.meta.source_note.as_deref(),
            Some("[[notes/a.md]]")
        );
    }

    #[test]
    fn parse_rejects_missing_fence() {
        let raw = "---\ntags:\n  - snippet\n---\njust text\n";
        let err = Record::parse(RecordId::from("py_1"), Path::new("py_1.md"), raw)
            .expect_err("malformed");
        assert!(err.to_string().contains("no fenced payload block"));
    }

    #[test]
    fn parse_rejects_missing_front_matter() {
        let raw = "```python\nprint(1)\n```\n";
        assert!(Record::parse(RecordId::from("py_1"), Path::new("py_1.md"), raw).is_err());
    }

    #[test]
    fn parse_trims_payload_and_falls_back_to_tag_language() {
        let raw = "---\ntags: [snippet, bash]\n---\n```\nls -la   \n\n```\n";
        let record =
            Record::parse(RecordId::from("bash_1"), Path::new("bash_1.md"), raw).expect("parse");
        assert_eq!(record.payload, "ls -la");
        assert_eq!(record.language, "bash");
    }

    #[test]
    fn unquoted_note_link_is_read_back_as_text() {
        let raw = "---\ntags: [snippet, python]\nsource-note: [[Daily/2024-01-02.md]]\ncontext: |\n  setup\n---\n\n```python\nx = 1\n```\n";
        let record =
            Record::parse(RecordId::from("python_1"), Path::new("python_1.md"), raw).expect("parse");
        assert_eq!(
            record.meta.source_note.as_deref(),
            Some("[[Daily/2024-01-02.md]]")
        );
        assert_eq!(record.meta.context.as_deref(), Some("setup\n"));
    }

    #[test]
    fn canonical_tags_keep_extras_once() {
        let tags = canonical_tags(
            "rust",
            &["snippet".to_string(), "rust".to_string(), "async".to_string()],
        );
        assert_eq!(tags, vec!["snippet", "rust", "async"]);
    }
}
