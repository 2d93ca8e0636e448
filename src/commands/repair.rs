use anyhow::Result;

use crate::commands::{CommandReport, ThresholdOverrides, prepare};
use crate::vault::audit::{self, AuditEvent, Phase};
use crate::vault::paths::PathOverrides;
use crate::vault::repair::run_repair;
use crate::vault::store::RecordStore;

#[derive(Debug, Clone, Default)]
pub struct RepairOptions {
    pub paths: PathOverrides,
    pub dry_run: bool,
}

pub fn run(opts: &RepairOptions) -> Result<CommandReport> {
    let (paths, _cfg) = prepare(&opts.paths, &ThresholdOverrides::default())?;
    let store = RecordStore::open(&paths.store_dir)?;
    let outcome = run_repair(&store, opts.dry_run)?;

    let mut report = CommandReport::new("repair");
    if opts.dry_run {
        report.detail("dry_run=true");
    }
    report.field("records_scanned", outcome.scanned);
    report.field("records_rewritten", outcome.rewritten.len());
    report.field("records_unchanged", outcome.unchanged);
    for id in &outcome.rewritten {
        report.detail(format!("fixed {id}"));
    }
    for (id, reason) in &outcome.unrecoverable {
        report.issue(format!("{id}: {reason}; left as is"));
    }

    if !opts.dry_run {
        let event = AuditEvent::new(Phase::Repair, &paths)?
            .ok(report.ok)
            .count("rewritten", outcome.rewritten.len())
            .count("unrecoverable", outcome.unrecoverable.len());
        audit::append(&paths, &event)?;
    }
    Ok(report)
}
