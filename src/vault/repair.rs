use crate::vault::record::{
    PLAIN_LANGUAGE, Record, RecordId, RecordMeta, SNIPPET_TAG, canonical_tags, first_fence,
    split_front_matter,
};
use crate::vault::store::RecordStore;
use anyhow::{Context, Result};
use std::fs;

pub const UNKNOWN_NOTE: &str = "[[unknown note]]";
pub const NO_CONTEXT: &str = "No context available.";

#[derive(Debug, Clone, Default)]
pub struct RepairOutcome {
    pub scanned: usize,
    pub rewritten: Vec<RecordId>,
    pub unchanged: usize,
    /// Files without a recoverable payload, with the reason.
    pub unrecoverable: Vec<(RecordId, String)>,
}

/// Reads `key: value` lines the way hand-edited files tend to be written.
fn scan_meta_lines(block: &str) -> RecordMeta {
    let mut meta = RecordMeta::default();
    let mut in_tag_list = false;
    for line in block.lines() {
        let trimmed = line.trim();
        if in_tag_list {
            if let Some(item) = trimmed.strip_prefix("- ") {
                meta.tags.push(item.trim().to_string());
                continue;
            }
            in_tag_list = false;
        }
        if let Some(rest) = trimmed.strip_prefix("tags:") {
            let rest = rest.trim().trim_start_matches('[').trim_end_matches(']');
            if rest.is_empty() {
                in_tag_list = true;
            }
            meta.tags.extend(
                rest.split(',')
                    .map(|tag| tag.trim().to_string())
                    .filter(|tag| !tag.is_empty()),
            );
        } else if let Some(rest) = trimmed.strip_prefix("source-note:") {
            let rest = rest.trim();
            if !rest.is_empty() {
                meta.source_note = Some(rest.to_string());
            }
        } else if let Some(rest) = trimmed.strip_prefix("context:") {
            let rest = rest.trim().trim_start_matches(['|', '>']).trim();
            if !rest.is_empty() {
                meta.context = Some(rest.to_string());
            }
        }
    }
    meta
}

/// Lenient counterpart of `Record::parse`: recovers whatever metadata it can
/// and fills in the rest. Fails only when no payload can be found.
pub fn recover(id: &RecordId, raw: &str) -> Result<Record, String> {
    let (meta, body) = match split_front_matter(raw) {
        Some((yaml, body)) => {
            let meta = serde_yaml::from_str::<RecordMeta>(yaml)
                .unwrap_or_else(|_| scan_meta_lines(yaml));
            (meta, body)
        }
        None => (RecordMeta::default(), raw),
    };

    let (annotation, payload) =
        first_fence(body).ok_or_else(|| "no fenced payload block".to_string())?;
    if payload.is_empty() {
        return Err("empty payload".to_string());
    }

    let language = annotation
        .or_else(|| {
            meta.tags
                .iter()
                .find(|tag| tag.as_str() != SNIPPET_TAG)
                .cloned()
        })
        .unwrap_or_else(|| PLAIN_LANGUAGE.to_string());

    let source_note = meta
        .source_note
        .filter(|note| !note.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_NOTE.to_string());
    let context = meta
        .context
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| NO_CONTEXT.to_string());

    Ok(Record {
        id: id.clone(),
        meta: RecordMeta {
            tags: canonical_tags(&language, &meta.tags),
            source_note: Some(source_note),
            context: Some(context),
        },
        language,
        payload,
    })
}

pub fn run_repair(store: &RecordStore, dry_run: bool) -> Result<RepairOutcome> {
    let mut outcome = RepairOutcome::default();
    for id in store.list_ids()? {
        outcome.scanned += 1;
        let path = store.path_for(&id);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let record = match recover(&id, &raw) {
            Ok(record) => record,
            Err(reason) => {
                outcome.unrecoverable.push((id, reason));
                continue;
            }
        };
        let rendered = record.render()?;
        if rendered == raw {
            outcome.unchanged += 1;
            continue;
        }
        if !dry_run {
            store.overwrite(&id, &rendered)?;
        }
        outcome.rewritten.push(id);
    }
    Ok(outcome)
}
