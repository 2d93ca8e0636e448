use anyhow::{Context, Result};
use std::fs;

use crate::commands::{CommandReport, ThresholdOverrides, prepare};
use crate::vault::audit::{self, AuditEvent, Phase};
use crate::vault::extract::{ExtractOptions, run_extract};
use crate::vault::paths::PathOverrides;

#[derive(Debug, Clone, Default)]
pub struct ExtractCommandOptions {
    pub paths: PathOverrides,
    pub thresholds: ThresholdOverrides,
    pub force: bool,
    pub dry_run: bool,
    /// Create a missing record store instead of failing.
    pub create_store: bool,
}

pub fn run(opts: &ExtractCommandOptions) -> Result<CommandReport> {
    let (paths, cfg) = prepare(&opts.paths, &opts.thresholds)?;
    let mut report = CommandReport::new("extract");

    if opts.create_store && !paths.store_dir.exists() && !opts.dry_run {
        fs::create_dir_all(&paths.store_dir)
            .with_context(|| format!("failed to create {}", paths.store_dir.display()))?;
        report.field("store_created", paths.store_dir.display());
    }
    paths.ensure_roots()?;

    let outcome = run_extract(
        &paths,
        &cfg,
        &ExtractOptions {
            force: opts.force,
            dry_run: opts.dry_run,
        },
    )?;

    report.field("corpus_root", paths.corpus_root.display());
    report.field("store_dir", paths.store_dir.display());
    if opts.dry_run {
        report.detail("dry_run=true");
    }
    report.field("documents_scanned", outcome.documents_scanned);
    report.field("documents_skipped", outcome.documents_skipped);
    report.field("documents_rewritten", outcome.documents_rewritten);
    report.field("fragments_found", outcome.fragments_found);
    report.field("fragments_empty", outcome.fragments_empty);
    report.field("records_created", outcome.records_created);
    report.field("records_reused", outcome.records_reused);
    for collision in &outcome.collisions {
        report.issue(format!("identifier collision, document left unchanged: {collision}"));
    }

    if !opts.dry_run {
        let event = AuditEvent::new(Phase::Extract, &paths)?
            .ok(report.ok)
            .count("documents_rewritten", outcome.documents_rewritten)
            .count("records_created", outcome.records_created)
            .count("records_reused", outcome.records_reused)
            .count("collisions", outcome.collisions.len());
        audit::append(&paths, &event)?;
    }

    Ok(report)
}
