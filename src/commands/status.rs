use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;

use crate::commands::{CommandReport, ThresholdOverrides, prepare};
use crate::vault::corpus::Corpus;
use crate::vault::paths::PathOverrides;
use crate::vault::progress::{self, ProgressState, Resume};
use crate::vault::reference::ReferenceFormat;
use crate::vault::store::RecordStore;

pub fn run(overrides: &PathOverrides) -> Result<CommandReport> {
    let (paths, cfg) = prepare(overrides, &ThresholdOverrides::default())?;
    let mut report = CommandReport::new("status");

    report.field("corpus_root", paths.corpus_root.display());
    report.field("store_dir", paths.store_dir.display());
    report.field("state_dir", paths.state_dir.display());
    report.field("progress_file", paths.progress_file.display());
    report.field("report_file", paths.report_file.display());
    report.detail(format!(
        "thresholds=extract:{:.2} exact:{:.2} report_floor:{:.2}",
        cfg.thresholds.extract_match, cfg.thresholds.dedup_exact, cfg.thresholds.report_floor
    ));

    if !paths.corpus_root.is_dir() {
        report.issue(format!("missing corpus root {}", paths.corpus_root.display()));
    }
    let store = match RecordStore::open(&paths.store_dir) {
        Ok(store) => store,
        Err(err) => {
            report.issue(err.to_string());
            return Ok(report);
        }
    };

    let records = store.load_all()?;
    let malformed = records.iter().filter(|r| r.record.is_none()).count();
    report.field("records", records.len());
    report.field("records_malformed", malformed);

    let ids: Vec<_> = records.into_iter().map(|r| r.id).collect();
    match progress::load(&paths.progress_file) {
        Ok(saved) => match ProgressState::resume(&ids, saved).1 {
            Resume::Fresh => report.detail("progress=none"),
            Resume::Resumed(n) => {
                report.detail(format!("progress=resumable processed={n}/{}", ids.len()))
            }
            Resume::Stale(n) => report.detail(format!("progress=stale processed={n}")),
        },
        Err(err) => report.issue(format!("progress unreadable: {err:#}")),
    }

    // References whose record file is gone.
    let Ok(corpus) = Corpus::new(&paths, &cfg.corpus) else {
        return Ok(report);
    };
    let known: BTreeSet<String> = ids.iter().map(|id| id.file_name()).collect();
    let format = ReferenceFormat::new(&paths.link_prefix())?;
    let mut dangling = 0usize;
    for doc in corpus.documents()? {
        let content = fs::read_to_string(&doc)
            .with_context(|| format!("failed to read {}", doc.display()))?;
        for file in format.referenced_files(&content) {
            if !known.contains(file) {
                dangling += 1;
                report.issue(format!(
                    "{} references missing record {file}",
                    corpus.relative(&doc)
                ));
            }
        }
    }
    report.field("dangling_references", dangling);

    Ok(report)
}
