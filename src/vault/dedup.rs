use crate::error::{VaultError, VaultErrorCode};
use crate::vault::config::VaultConfig;
use crate::vault::corpus::Corpus;
use crate::vault::paths::VaultPaths;
use crate::vault::progress::{self, ProgressState, Resume};
use crate::vault::record::RecordId;
use crate::vault::reference::{ReferenceFormat, rewrite_document};
use crate::vault::report::{self, NearDuplicate};
use crate::vault::similarity::{Sequence, ratio, upper_bound};
use crate::vault::store::{RecordStore, StoredRecord};
use crate::vault::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct DedupOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub records_total: usize,
    pub records_malformed: usize,
    pub records_compared: usize,
    pub resume: Resume,
    /// `(superseded, canonical)`, canonical never superseded itself.
    pub merges: Vec<(RecordId, RecordId)>,
    pub near_duplicates: Vec<NearDuplicate>,
    pub documents_rewritten: usize,
    pub references_rewritten: usize,
    pub records_deleted: usize,
}

/// Union-find over store indices whose root is always the lowest index in
/// its set, so every superseded record points straight at the survivor.
#[derive(Debug, Clone)]
pub struct MergeMapping {
    parent: Vec<usize>,
}

impl MergeMapping {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    pub fn find(&mut self, index: usize) -> usize {
        let mut root = index;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cursor = index;
        while self.parent[cursor] != root {
            let next = self.parent[cursor];
            self.parent[cursor] = root;
            cursor = next;
        }
        root
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (keep, absorb) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[absorb] = keep;
    }

    pub fn entries(&mut self, ids: &[RecordId]) -> Vec<(RecordId, RecordId)> {
        (0..ids.len())
            .filter_map(|i| {
                let root = self.find(i);
                (root != i).then(|| (ids[i].clone(), ids[root].clone()))
            })
            .collect()
    }
}

/// Payloads prepared for comparison; malformed records get `None` and never match.
pub fn comparable_sequences(records: &[StoredRecord]) -> Vec<Option<Sequence>> {
    records
        .iter()
        .map(|stored| stored.is_comparable().then(|| Sequence::new(stored.payload())))
        .collect()
}

/// Exclusive advisory lock held for the lifetime of a pass.
pub struct PassLock {
    _file: File,
}

impl PassLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        if file.try_lock_exclusive().is_err() {
            return Err(VaultError::PassLocked(path.to_path_buf()).into());
        }
        Ok(Self { _file: file })
    }
}

struct Comparison {
    mapping: MergeMapping,
    near_duplicates: Vec<NearDuplicate>,
    records_compared: usize,
}

fn load_saved_progress(path: &Path) -> Result<Option<ProgressState>> {
    match progress::load(path) {
        Ok(saved) => Ok(saved),
        Err(err) => {
            let Some(corrupt @ VaultError::ProgressCorrupt { .. }) = err.downcast_ref::<VaultError>()
            else {
                return Err(err);
            };
            warn::emit(WarnEvent {
                code: corrupt.code().as_str(),
                stage: "dedup",
                action: "load-progress",
                target: &path.display().to_string(),
                reason: "starting-fresh-pass",
                err: &format!("{err:#}"),
            });
            Ok(None)
        }
    }
}

fn compare_all(
    ids: &[RecordId],
    sequences: &[Option<Sequence>],
    state: &mut ProgressState,
    cfg: &VaultConfig,
    progress_file: Option<&Path>,
) -> Result<Comparison> {
    let exact = cfg.thresholds.dedup_exact;
    let floor = cfg.thresholds.report_floor;
    let cutoff = floor.min(exact);
    let mut mapping = MergeMapping::new(ids.len());
    let mut near_duplicates = Vec::new();
    let mut records_compared = 0usize;

    for (i, id) in ids.iter().enumerate() {
        if state.is_processed(id) {
            continue;
        }
        if let Some(a) = &sequences[i] {
            for (j, other) in sequences.iter().enumerate().skip(i + 1) {
                let Some(b) = other else {
                    continue;
                };
                if upper_bound(a, b) < cutoff {
                    continue;
                }
                let score = ratio(a, b);
                if score >= exact {
                    mapping.union(i, j);
                } else if score >= floor {
                    near_duplicates.push(NearDuplicate {
                        first: id.clone(),
                        second: ids[j].clone(),
                        score,
                    });
                }
            }
        }
        records_compared += 1;
        state.mark(id);
        if let Some(path) = progress_file {
            progress::save(path, state)?;
        }
    }

    Ok(Comparison {
        mapping,
        near_duplicates,
        records_compared,
    })
}

pub fn run_dedup(
    paths: &VaultPaths,
    cfg: &VaultConfig,
    opts: &DedupOptions,
) -> Result<DedupOutcome> {
    let store = RecordStore::open(&paths.store_dir)?;
    let corpus = Corpus::new(paths, &cfg.corpus)?;
    let _lock = PassLock::acquire(&paths.lock_file)?;

    let records = store.load_all()?;
    let ids: Vec<RecordId> = records.iter().map(|r| r.id.clone()).collect();
    let sequences = comparable_sequences(&records);
    let records_malformed = sequences.iter().filter(|s| s.is_none()).count();

    let saved = load_saved_progress(&paths.progress_file)?;
    let (mut state, resume) = ProgressState::resume(&ids, saved);
    if let Resume::Stale(dropped) = resume {
        warn::emit(WarnEvent {
            code: VaultErrorCode::E006ProgressCorrupt.as_str(),
            stage: "dedup",
            action: "resume",
            target: &paths.progress_file.display().to_string(),
            reason: "store-changed-since-last-pass",
            err: &format!("discarded {dropped} processed ids"),
        });
    }

    let progress_file = (!opts.dry_run).then_some(paths.progress_file.as_path());
    let mut comparison = compare_all(&ids, &sequences, &mut state, cfg, progress_file)?;
    let merges = comparison.mapping.entries(&ids);

    let mut outcome = DedupOutcome {
        records_total: ids.len(),
        records_malformed,
        records_compared: comparison.records_compared,
        resume,
        merges,
        near_duplicates: comparison.near_duplicates,
        documents_rewritten: 0,
        references_rewritten: 0,
        records_deleted: 0,
    };
    if opts.dry_run {
        return Ok(outcome);
    }

    // Every comparison is done: only now does the corpus change.
    if !outcome.merges.is_empty() {
        let format = ReferenceFormat::new(&paths.link_prefix())?;
        for doc in corpus.documents()? {
            let replaced = rewrite_document(&format, &doc, &outcome.merges)?;
            if replaced > 0 {
                outcome.documents_rewritten += 1;
                outcome.references_rewritten += replaced;
            }
        }
        for (superseded, _) in &outcome.merges {
            if store.delete(superseded)? {
                outcome.records_deleted += 1;
            }
        }
    }

    report::write(
        &paths.report_file,
        &outcome.near_duplicates,
        cfg.thresholds.report_floor,
        cfg.thresholds.dedup_exact,
    )?;
    progress::clear(&paths.progress_file)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::paths::test_paths;
    use tempfile::tempdir;

    fn plant(paths: &VaultPaths, id: &str, payload: &str) {
        fs::create_dir_all(&paths.store_dir).expect("mkdir store");
        fs::write(
            paths.store_dir.join(format!("{id}.md")),
            format!("---\ntags: [snippet, python]\n---\n```python\n{payload}\n```\n"),
        )
        .expect("plant record");
    }

    fn store_ids(paths: &VaultPaths) -> Vec<String> {
        RecordStore::open(&paths.store_dir)
            .expect("store")
            .list_ids()
            .expect("ids")
            .into_iter()
            .map(|id| id.to_string())
            .collect()
    }

    #[test]
    fn trailing_space_duplicate_is_merged_into_first() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        plant(&paths, "py_A", "x=1");
        plant(&paths, "py_B", "x=1 ");
        let note = tmp.path().join("note.md");
        fs::write(&note, "see ![[Snippets/py_B.md]] and ![[Snippets/py_B.md]]\n").expect("note");

        let outcome =
            run_dedup(&paths, &VaultConfig::default(), &DedupOptions::default()).expect("dedup");
        assert_eq!(
            outcome.merges,
            vec![(RecordId::from("py_B"), RecordId::from("py_A"))]
        );
        assert_eq!(outcome.records_deleted, 1);
        assert_eq!(outcome.references_rewritten, 2);
        assert_eq!(store_ids(&paths), vec!["py_A"]);
        assert_eq!(
            fs::read_to_string(&note).expect("read"),
            "see ![[Snippets/py_A.md]] and ![[Snippets/py_A.md]]\n"
        );
        assert!(!paths.progress_file.exists());
    }

    #[test]
    fn chains_flatten_onto_earliest_record() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        plant(&paths, "py_a", "print('same')");
        plant(&paths, "py_b", "print('same')");
        plant(&paths, "py_c", "print('same')");
        fs::write(
            tmp.path().join("n.md"),
            "![[Snippets/py_b.md]]\n![[Snippets/py_c.md]]\n",
        )
        .expect("note");

        let outcome =
            run_dedup(&paths, &VaultConfig::default(), &DedupOptions::default()).expect("dedup");
        assert_eq!(
            outcome.merges,
            vec![
                (RecordId::from("py_b"), RecordId::from("py_a")),
                (RecordId::from("py_c"), RecordId::from("py_a")),
            ]
        );
        let text = fs::read_to_string(tmp.path().join("n.md")).expect("read");
        assert_eq!(text, "![[Snippets/py_a.md]]\n![[Snippets/py_a.md]]\n");
    }

    #[test]
    fn mapping_roots_never_appear_as_keys() {
        let mut mapping = MergeMapping::new(4);
        mapping.union(2, 3);
        mapping.union(1, 3);
        mapping.union(0, 2);
        let ids: Vec<RecordId> = ["a", "b", "c", "d"].into_iter().map(RecordId::from).collect();
        let entries = mapping.entries(&ids);
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|(_, to)| to.as_str() == "a"));
    }

    #[test]
    fn report_holds_only_the_near_band() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        plant(&paths, "py_1", "abcdefghijklmnopqrst");
        plant(&paths, "py_2", "abcdefghijklmnopqrsX");
        plant(&paths, "py_3", "abcdefghijklmnopqrst");
        plant(&paths, "py_4", "completely unrelated");

        let outcome =
            run_dedup(&paths, &VaultConfig::default(), &DedupOptions::default()).expect("dedup");
        // py_3 merges into py_1; both near pairs with py_2 are reported.
        assert_eq!(
            outcome.merges,
            vec![(RecordId::from("py_3"), RecordId::from("py_1"))]
        );
        let pairs: Vec<(&str, &str)> = outcome
            .near_duplicates
            .iter()
            .map(|p| (p.first.as_str(), p.second.as_str()))
            .collect();
        assert_eq!(pairs, vec![("py_1", "py_2"), ("py_2", "py_3")]);
        assert!(outcome.near_duplicates.iter().all(|p| p.score >= 0.9 && p.score < 1.0));

        let report = fs::read_to_string(&paths.report_file).expect("report");
        assert!(report.contains("py_1.md and py_2.md (Similarity: 0.95)"));
        assert!(!report.contains("py_4"));
    }

    #[test]
    fn malformed_records_never_merge() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        fs::create_dir_all(&paths.store_dir).expect("mkdir");
        fs::write(paths.store_dir.join("py_x.md"), "broken").expect("write");
        fs::write(paths.store_dir.join("py_y.md"), "also broken").expect("write");

        let outcome =
            run_dedup(&paths, &VaultConfig::default(), &DedupOptions::default()).expect("dedup");
        assert_eq!(outcome.records_malformed, 2);
        assert!(outcome.merges.is_empty());
        assert_eq!(store_ids(&paths).len(), 2);
    }

    #[test]
    fn resumed_pass_skips_processed_records() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        plant(&paths, "py_1", "first distinct payload");
        plant(&paths, "py_2", "y = 2");
        plant(&paths, "py_3", "y = 2");
        fs::write(tmp.path().join("n.md"), "![[Snippets/py_3.md]]\n").expect("note");

        // An interrupted pass got as far as the first record.
        let ids: Vec<RecordId> = ["py_1", "py_2", "py_3"].into_iter().map(RecordId::from).collect();
        let mut state = ProgressState::for_store(&ids);
        state.mark(&ids[0]);
        progress::save(&paths.progress_file, &state).expect("save");

        let outcome =
            run_dedup(&paths, &VaultConfig::default(), &DedupOptions::default()).expect("dedup");
        assert_eq!(outcome.resume, Resume::Resumed(1));
        assert_eq!(outcome.records_compared, 2);
        assert_eq!(
            outcome.merges,
            vec![(RecordId::from("py_3"), RecordId::from("py_2"))]
        );
        assert_eq!(
            fs::read_to_string(tmp.path().join("n.md")).expect("read"),
            "![[Snippets/py_2.md]]\n"
        );
        assert!(!paths.progress_file.exists());
    }

    #[test]
    fn comparison_stage_persists_only_progress() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        plant(&paths, "py_A", "x=1");
        plant(&paths, "py_B", "x=1");
        let note = tmp.path().join("note.md");
        fs::write(&note, "![[Snippets/py_B.md]]\n").expect("note");

        let records = RecordStore::open(&paths.store_dir)
            .expect("store")
            .load_all()
            .expect("load");
        let ids: Vec<RecordId> = records.iter().map(|r| r.id.clone()).collect();
        let sequences = comparable_sequences(&records);
        let mut state = ProgressState::for_store(&ids);
        let mut comparison = compare_all(
            &ids,
            &sequences,
            &mut state,
            &VaultConfig::default(),
            Some(&paths.progress_file),
        )
        .expect("compare");

        // Stopping here, before the apply step, is what an interrupted pass looks like.
        assert_eq!(comparison.mapping.entries(&ids).len(), 1);
        let saved = progress::load(&paths.progress_file)
            .expect("load progress")
            .expect("progress saved");
        assert_eq!(saved.processed.len(), 2);
        assert_eq!(store_ids(&paths), vec!["py_A", "py_B"]);
        assert_eq!(fs::read_to_string(&note).expect("read"), "![[Snippets/py_B.md]]\n");
        assert!(!paths.report_file.exists());
    }

    #[test]
    fn dry_run_leaves_everything_in_place() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        plant(&paths, "py_A", "x=1");
        plant(&paths, "py_B", "x=1");
        let note = tmp.path().join("note.md");
        fs::write(&note, "![[Snippets/py_B.md]]\n").expect("note");

        let opts = DedupOptions { dry_run: true };
        let outcome = run_dedup(&paths, &VaultConfig::default(), &opts).expect("dedup");
        assert_eq!(outcome.merges.len(), 1);
        assert_eq!(store_ids(&paths).len(), 2);
        assert_eq!(fs::read_to_string(&note).expect("read"), "![[Snippets/py_B.md]]\n");
        assert!(!paths.progress_file.exists());
        assert!(!paths.report_file.exists());
    }

    #[test]
    fn second_pass_is_rejected_while_locked() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        plant(&paths, "py_A", "x=1");
        let _held = PassLock::acquire(&paths.lock_file).expect("first lock");

        let err = run_dedup(&paths, &VaultConfig::default(), &DedupOptions::default())
            .expect_err("locked");
        let typed = err.downcast_ref::<VaultError>().expect("typed");
        assert!(matches!(typed, VaultError::PassLocked(_)));
    }
}
