use anyhow::Result;

use crate::commands::{CommandReport, ThresholdOverrides, prepare};
use crate::vault::audit::{self, AuditEvent, Phase};
use crate::vault::dedup::{DedupOptions, run_dedup};
use crate::vault::paths::PathOverrides;
use crate::vault::progress::Resume;

#[derive(Debug, Clone, Default)]
pub struct DedupCommandOptions {
    pub paths: PathOverrides,
    pub thresholds: ThresholdOverrides,
    pub dry_run: bool,
}

pub fn run(opts: &DedupCommandOptions) -> Result<CommandReport> {
    let (paths, cfg) = prepare(&opts.paths, &opts.thresholds)?;
    paths.ensure_roots()?;
    let mut report = CommandReport::new("dedup");

    let outcome = run_dedup(&paths, &cfg, &DedupOptions { dry_run: opts.dry_run })?;

    report.detail(format!(
        "thresholds=exact:{:.2} report_floor:{:.2}",
        cfg.thresholds.dedup_exact, cfg.thresholds.report_floor
    ));
    match outcome.resume {
        Resume::Fresh => report.detail("progress=fresh"),
        Resume::Resumed(n) => report.detail(format!("progress=resumed skipped={n}")),
        Resume::Stale(n) => report.detail(format!("progress=stale discarded={n}")),
    }
    if opts.dry_run {
        report.detail("dry_run=true");
    }
    report.field("records_total", outcome.records_total);
    report.field("records_malformed", outcome.records_malformed);
    report.field("records_compared", outcome.records_compared);
    for (superseded, canonical) in &outcome.merges {
        report.detail(format!("merge {superseded} -> {canonical}"));
    }
    report.field("near_duplicates", outcome.near_duplicates.len());
    report.field("documents_rewritten", outcome.documents_rewritten);
    report.field("references_rewritten", outcome.references_rewritten);
    report.field("records_deleted", outcome.records_deleted);
    if !opts.dry_run {
        report.field("report_file", paths.report_file.display());
        let compare = AuditEvent::new(Phase::DedupCompare, &paths)?
            .count("records_total", outcome.records_total)
            .count("records_compared", outcome.records_compared)
            .count("records_malformed", outcome.records_malformed);
        audit::append(&paths, &compare)?;
        let apply = AuditEvent::new(Phase::DedupApply, &paths)?
            .count("merged", outcome.merges.len())
            .count("near_duplicates", outcome.near_duplicates.len())
            .count("documents_rewritten", outcome.documents_rewritten)
            .count("records_deleted", outcome.records_deleted);
        audit::append(&paths, &apply)?;
    }

    Ok(report)
}
