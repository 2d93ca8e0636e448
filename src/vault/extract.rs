use crate::error::VaultError;
use crate::vault::config::VaultConfig;
use crate::vault::corpus::Corpus;
use crate::vault::fragment::{Fragment, fragments};
use crate::vault::paths::VaultPaths;
use crate::vault::record::{Record, RecordId};
use crate::vault::reference::ReferenceFormat;
use crate::vault::similarity::{Sequence, ratio, upper_bound};
use crate::vault::store::{RecordStore, WriteOutcome};
use crate::vault::util::write_atomic;
use crate::vault::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// Process documents that already contain a reference.
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractOutcome {
    pub documents_scanned: usize,
    pub documents_skipped: usize,
    pub documents_rewritten: usize,
    pub fragments_found: usize,
    pub fragments_empty: usize,
    pub records_created: usize,
    pub records_reused: usize,
    pub collisions: Vec<String>,
}

#[derive(Debug, Clone)]
struct KnownRecord {
    id: RecordId,
    sequence: Sequence,
}

pub struct Extractor<'a> {
    store: &'a RecordStore,
    format: &'a ReferenceFormat,
    match_threshold: f64,
    context_lines: usize,
    dry_run: bool,
    known: Vec<KnownRecord>,
}

impl<'a> Extractor<'a> {
    pub fn new(
        store: &'a RecordStore,
        format: &'a ReferenceFormat,
        cfg: &VaultConfig,
        dry_run: bool,
    ) -> Result<Self> {
        let known = store
            .load_all()?
            .into_iter()
            .filter_map(|stored| {
                let record = stored.record?;
                Some(KnownRecord {
                    id: record.id,
                    sequence: Sequence::new(&record.payload),
                })
            })
            .collect();
        Ok(Self {
            store,
            format,
            match_threshold: cfg.thresholds.extract_match,
            context_lines: cfg.corpus.context_lines,
            dry_run,
            known,
        })
    }

    /// First known record, in store order, scoring at or above the threshold.
    fn find_match(&self, payload: &Sequence) -> Option<&RecordId> {
        self.known
            .iter()
            .filter(|known| upper_bound(&known.sequence, payload) >= self.match_threshold)
            .find(|known| ratio(&known.sequence, payload) >= self.match_threshold)
            .map(|known| &known.id)
    }

    /// Reuses a known record or plans a new one; planned records join `known`
    /// right away so later fences in the same document can match them.
    fn resolve(
        &mut self,
        fragment: &Fragment,
        source_note: &str,
        planned: &mut Vec<Record>,
    ) -> (RecordId, bool) {
        let sequence = Sequence::new(&fragment.payload);
        if let Some(id) = self.find_match(&sequence) {
            return (id.clone(), true);
        }

        let record = Record::new(
            &fragment.language,
            &fragment.payload,
            source_note,
            &fragment.context,
        );
        let id = record.id.clone();
        self.known.push(KnownRecord {
            id: id.clone(),
            sequence,
        });
        planned.push(record);
        (id, false)
    }

    /// Checks every planned record against the store before writing any, so a
    /// collision leaves no record behind for a document that stays unchanged.
    fn persist(&self, planned: &[Record], outcome: &mut ExtractOutcome) -> Result<()> {
        let mut checked = Vec::with_capacity(planned.len());
        for record in planned {
            checked.push((record, self.store.check_new(record)?));
        }
        for (record, write) in checked {
            match write {
                WriteOutcome::Created => {
                    if !self.dry_run {
                        self.store.write_new(record)?;
                    }
                    outcome.records_created += 1;
                }
                WriteOutcome::AlreadyPresent => outcome.records_reused += 1,
            }
        }
        Ok(())
    }

    /// Replaces each non-empty fence with a reference. `None` when nothing was
    /// replaced, so the caller leaves the document untouched.
    pub fn extract_content(
        &mut self,
        content: &str,
        source_note: &str,
        outcome: &mut ExtractOutcome,
    ) -> Result<Option<String>> {
        let mut out = String::with_capacity(content.len());
        let mut cursor = 0usize;
        let mut replaced = 0usize;
        let mut matched = 0usize;
        let mut planned = Vec::new();
        let known_before = self.known.len();

        for fragment in fragments(content, self.context_lines) {
            outcome.fragments_found += 1;
            if fragment.payload.is_empty() {
                outcome.fragments_empty += 1;
                continue;
            }
            let (id, reused) = self.resolve(&fragment, source_note, &mut planned);
            if reused {
                matched += 1;
            }
            out.push_str(&content[cursor..fragment.span.start]);
            out.push_str(&self.format.token(&id));
            cursor = fragment.span.end;
            replaced += 1;
        }

        if let Err(err) = self.persist(&planned, outcome) {
            self.known.truncate(known_before);
            return Err(err);
        }
        outcome.records_reused += matched;

        if replaced == 0 {
            return Ok(None);
        }
        out.push_str(&content[cursor..]);
        Ok(Some(out))
    }

    pub fn extract_document(
        &mut self,
        path: &Path,
        source_note: &str,
        force: bool,
        outcome: &mut ExtractOutcome,
    ) -> Result<()> {
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        outcome.documents_scanned += 1;

        if !force && self.format.contains_reference(&content) {
            outcome.documents_skipped += 1;
            return Ok(());
        }

        let Some(updated) = self.extract_content(&content, source_note, outcome)? else {
            return Ok(());
        };
        if !self.dry_run {
            write_atomic(path, &updated)?;
        }
        outcome.documents_rewritten += 1;
        Ok(())
    }
}

pub fn run_extract(
    paths: &VaultPaths,
    cfg: &VaultConfig,
    opts: &ExtractOptions,
) -> Result<ExtractOutcome> {
    let store = RecordStore::open(&paths.store_dir)?;
    let corpus = Corpus::new(paths, &cfg.corpus)?;
    let format = ReferenceFormat::new(&paths.link_prefix())?;
    let mut extractor = Extractor::new(&store, &format, cfg, opts.dry_run)?;
    let mut outcome = ExtractOutcome::default();

    for doc in corpus.documents()? {
        let source_note = corpus.relative(&doc);
        match extractor.extract_document(&doc, &source_note, opts.force, &mut outcome) {
            Ok(()) => {}
            Err(err) => {
                let Some(collision @ VaultError::IdentifierCollision { id, .. }) =
                    err.downcast_ref::<VaultError>()
                else {
                    return Err(err);
                };
                warn::emit(WarnEvent {
                    code: collision.code().as_str(),
                    stage: "extract",
                    action: "write-record",
                    target: &source_note,
                    reason: "document-left-unchanged",
                    err: &format!("{err:#}"),
                });
                outcome.collisions.push(format!("{source_note}: {id}"));
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::paths::test_paths;
    use tempfile::tempdir;

    fn setup(root: &Path) -> (VaultPaths, VaultConfig) {
        let paths = test_paths(root);
        fs::create_dir_all(&paths.store_dir).expect("mkdir store");
        (paths, VaultConfig::default())
    }

    #[test]
    fn identical_fences_share_one_record() {
        let tmp = tempdir().expect("tempdir");
        let (paths, cfg) = setup(tmp.path());
        let note = tmp.path().join("note.md");
        fs::write(
            &note,
            "A:\n```python\nprint(1)\n```\nB:\n```python\nprint(1)\n```\n",
        )
        .expect("write");

        let outcome = run_extract(&paths, &cfg, &ExtractOptions::default()).expect("extract");
        assert_eq!(outcome.records_created, 1);
        assert_eq!(outcome.records_reused, 1);

        let store = RecordStore::open(&paths.store_dir).expect("store");
        let ids = store.list_ids().expect("ids");
        assert_eq!(ids.len(), 1);

        let token = format!("![[Snippets/{}]]", ids[0].file_name());
        let rewritten = fs::read_to_string(&note).expect("read");
        assert_eq!(rewritten, format!("A:\n{token}\nB:\n{token}\n"));
    }

    #[test]
    fn document_without_fences_is_untouched() {
        let tmp = tempdir().expect("tempdir");
        let (paths, cfg) = setup(tmp.path());
        let note = tmp.path().join("plain.md");
        let body = "# Heading\n\nNo code here, only `inline` bits.\n";
        fs::write(&note, body).expect("write");

        let outcome = run_extract(&paths, &cfg, &ExtractOptions::default()).expect("extract");
        assert_eq!(outcome.records_created, 0);
        assert_eq!(outcome.documents_rewritten, 0);
        assert_eq!(fs::read_to_string(&note).expect("read"), body);
        assert!(
            RecordStore::open(&paths.store_dir)
                .expect("store")
                .list_ids()
                .expect("ids")
                .is_empty()
        );
    }

    #[test]
    fn documents_with_references_are_skipped_unless_forced() {
        let tmp = tempdir().expect("tempdir");
        let (paths, cfg) = setup(tmp.path());
        let note = tmp.path().join("mixed.md");
        let body = "![[Snippets/old.md]]\n```bash\necho new\n```\n";
        fs::write(&note, body).expect("write");

        let outcome = run_extract(&paths, &cfg, &ExtractOptions::default()).expect("extract");
        assert_eq!(outcome.documents_skipped, 1);
        assert_eq!(fs::read_to_string(&note).expect("read"), body);

        let forced = ExtractOptions {
            force: true,
            dry_run: false,
        };
        let outcome = run_extract(&paths, &cfg, &forced).expect("extract");
        assert_eq!(outcome.records_created, 1);
        assert!(!fs::read_to_string(&note).expect("read").contains("echo new"));
    }

    #[test]
    fn second_forced_run_creates_nothing_new() {
        let tmp = tempdir().expect("tempdir");
        let (paths, cfg) = setup(tmp.path());
        let body = "```js\nconsole.log('a')\n```\n\n```sql\nselect 1;\n```\n";
        fs::write(tmp.path().join("first.md"), body).expect("write");
        run_extract(&paths, &cfg, &ExtractOptions::default()).expect("first run");

        fs::write(tmp.path().join("first.md"), body).expect("restore original");
        let forced = ExtractOptions {
            force: true,
            dry_run: false,
        };
        let outcome = run_extract(&paths, &cfg, &forced).expect("second run");
        assert_eq!(outcome.records_created, 0);
        assert_eq!(outcome.records_reused, 2);
    }

    #[test]
    fn similar_fragment_reuses_existing_record() {
        let tmp = tempdir().expect("tempdir");
        let (paths, cfg) = setup(tmp.path());
        fs::write(
            tmp.path().join("a.md"),
            "```python\ndef add(a, b):\n    return a + b\n```\n",
        )
        .expect("write a");
        fs::write(
            tmp.path().join("b.md"),
            "```python\ndef add(x, y):\n    return x + y\n```\n",
        )
        .expect("write b");

        let outcome = run_extract(&paths, &cfg, &ExtractOptions::default()).expect("extract");
        assert_eq!(outcome.records_created, 1);
        assert_eq!(outcome.records_reused, 1);
        let a = fs::read_to_string(tmp.path().join("a.md")).expect("read a");
        let b = fs::read_to_string(tmp.path().join("b.md")).expect("read b");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_fence_is_left_in_place() {
        let tmp = tempdir().expect("tempdir");
        let (paths, cfg) = setup(tmp.path());
        let note = tmp.path().join("empty.md");
        let body = "```bash\n  \n```\n";
        fs::write(&note, body).expect("write");

        let outcome = run_extract(&paths, &cfg, &ExtractOptions::default()).expect("extract");
        assert_eq!(outcome.fragments_empty, 1);
        assert_eq!(outcome.records_created, 0);
        assert_eq!(fs::read_to_string(&note).expect("read"), body);
    }

    #[test]
    fn collision_leaves_document_unchanged() {
        let tmp = tempdir().expect("tempdir");
        let (paths, cfg) = setup(tmp.path());
        let record = Record::new("python", "print(42)", "x.md", "");
        // Same identifier, different payload, unparseable by the matcher.
        fs::write(
            paths.store_dir.join(record.id.file_name()),
            "corrupted file without metadata",
        )
        .expect("plant");
        let note = tmp.path().join("note.md");
        let body = "```python\nprint(42)\n```\n";
        fs::write(&note, body).expect("write");

        let outcome = run_extract(&paths, &cfg, &ExtractOptions::default()).expect("extract");
        assert_eq!(outcome.collisions.len(), 1);
        assert_eq!(fs::read_to_string(&note).expect("read"), body);
    }

    #[test]
    fn collision_on_later_fence_writes_no_record_for_earlier_ones() {
        let tmp = tempdir().expect("tempdir");
        let (paths, cfg) = setup(tmp.path());
        let clashing = Record::new("python", "print(42)", "x.md", "");
        let clash_path = paths.store_dir.join(clashing.id.file_name());
        fs::write(&clash_path, "corrupted file without metadata").expect("plant");
        let note = tmp.path().join("note.md");
        let body = "```bash
ls -la /var/log
```
```python
print(42)
```
";
        fs::write(&note, body).expect("write");

        let outcome = run_extract(&paths, &cfg, &ExtractOptions::default()).expect("extract");
        assert_eq!(outcome.collisions.len(), 1);
        assert_eq!(outcome.records_created, 0);
        assert_eq!(fs::read_to_string(&note).expect("read"), body);

        let store = RecordStore::open(&paths.store_dir).expect("store");
        assert_eq!(store.list_ids().expect("ids"), vec![clashing.id]);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let tmp = tempdir().expect("tempdir");
        let (paths, cfg) = setup(tmp.path());
        let note = tmp.path().join("note.md");
        let body = "```go\nfmt.Println(1)\n```\n";
        fs::write(&note, body).expect("write");

        let opts = ExtractOptions {
            force: false,
            dry_run: true,
        };
        let outcome = run_extract(&paths, &cfg, &opts).expect("extract");
        assert_eq!(outcome.records_created, 1);
        assert_eq!(outcome.documents_rewritten, 1);
        assert_eq!(fs::read_to_string(&note).expect("read"), body);
        assert!(
            RecordStore::open(&paths.store_dir)
                .expect("store")
                .list_ids()
                .expect("ids")
                .is_empty()
        );
    }
}
