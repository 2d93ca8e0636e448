use crate::vault::dedup::comparable_sequences;
use crate::vault::report::NearDuplicate;
use crate::vault::similarity::{ratio, upper_bound};
use crate::vault::store::RecordStore;
use anyhow::Result;

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub records_total: usize,
    pub records_malformed: usize,
    pub pairs: Vec<NearDuplicate>,
}

/// Every record pair scoring at or above `threshold`, in store order. Read-only.
pub fn run_scan(store: &RecordStore, threshold: f64) -> Result<ScanOutcome> {
    let records = store.load_all()?;
    let sequences = comparable_sequences(&records);
    let mut outcome = ScanOutcome {
        records_total: records.len(),
        records_malformed: sequences.iter().filter(|s| s.is_none()).count(),
        pairs: Vec::new(),
    };

    for (i, a) in sequences.iter().enumerate() {
        let Some(a) = a else {
            continue;
        };
        for (j, b) in sequences.iter().enumerate().skip(i + 1) {
            let Some(b) = b else {
                continue;
            };
            if upper_bound(a, b) < threshold {
                continue;
            }
            let score = ratio(a, b);
            if score >= threshold {
                outcome.pairs.push(NearDuplicate {
                    first: records[i].id.clone(),
                    second: records[j].id.clone(),
                    score,
                });
            }
        }
    }
    Ok(outcome)
}
