use anyhow::Result;

use crate::commands::{CommandReport, ThresholdOverrides, prepare};
use crate::vault::paths::PathOverrides;
use crate::vault::scan::run_scan;
use crate::vault::store::RecordStore;

pub const DEFAULT_SCAN_THRESHOLD: f64 = 0.80;

#[derive(Debug, Clone)]
pub struct ScanCommandOptions {
    pub paths: PathOverrides,
    pub threshold: f64,
}

impl Default for ScanCommandOptions {
    fn default() -> Self {
        Self {
            paths: PathOverrides::default(),
            threshold: DEFAULT_SCAN_THRESHOLD,
        }
    }
}

pub fn run(opts: &ScanCommandOptions) -> Result<CommandReport> {
    let (paths, _cfg) = prepare(&opts.paths, &ThresholdOverrides::default())?;
    if !(opts.threshold > 0.0 && opts.threshold <= 1.0) {
        anyhow::bail!("scan threshold must be in (0, 1], got {}", opts.threshold);
    }
    let store = RecordStore::open(&paths.store_dir)?;
    let outcome = run_scan(&store, opts.threshold)?;

    let mut report = CommandReport::new("scan");
    report.detail(format!("threshold={:.2}", opts.threshold));
    report.field("records_total", outcome.records_total);
    report.field("records_malformed", outcome.records_malformed);
    report.field("similar_pairs", outcome.pairs.len());
    for pair in &outcome.pairs {
        report.detail(pair.line());
    }
    Ok(report)
}
