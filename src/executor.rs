/// Plan execution with copy verification.
///
/// The executor applies an [`OperationPlan`] to the filesystem. Every copy is
/// verified (size and content hash) before it counts; a move only removes its
/// source after the copy verified. Failures are recorded per file and never
/// stop the batch.
///
/// Entries are partitioned by destination directory. Partitions run in
/// parallel on the current rayon pool, entries within a partition run in plan
/// order on a single worker.
use crate::content_hash::{HashError, hash_file};
use crate::error::FileErrorKind;
use crate::job::CancelToken;
use crate::plan::{Action, OperationPlan, PlanEntry, PlanReason};
use crate::record::FileRecord;
use crate::report::{OperationResult, Outcome};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Byte transport used for copies. Swappable so tests can inject faults.
pub trait Transfer: Send + Sync {
    /// Copy `source` into a new file at `destination`, never overwriting.
    fn copy(&self, source: &Path, destination: &Path) -> io::Result<u64>;
}

/// Plain streamed copy into a freshly created file.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdTransfer;

impl Transfer for StdTransfer {
    fn copy(&self, source: &Path, destination: &Path) -> io::Result<u64> {
        let mut reader = File::open(source)?;
        let mut writer = File::options()
            .write(true)
            .create_new(true)
            .open(destination)?;
        let written = io::copy(&mut reader, &mut writer)?;
        writer.sync_all()?;
        Ok(written)
    }
}

/// Applies (or simulates) a plan.
pub struct Executor {
    transfer: Arc<dyn Transfer>,
    chunk_size: usize,
    preserve_timestamps: bool,
    dry_run: bool,
}

impl Executor {
    pub fn new(
        transfer: Arc<dyn Transfer>,
        chunk_size: usize,
        preserve_timestamps: bool,
        dry_run: bool,
    ) -> Self {
        Self {
            transfer,
            chunk_size,
            preserve_timestamps,
            dry_run,
        }
    }

    /// Execute every entry and return one result per completed entry, in plan order.
    ///
    /// `cancel` is checked before each move or copy; entries not started when it
    /// trips are left out of the results. `on_result` is called as each entry
    /// finishes, from whichever worker ran it.
    pub fn execute(
        &self,
        plan: &OperationPlan,
        records: &[FileRecord],
        cancel: &CancelToken,
        on_result: &(dyn Fn(&OperationResult) + Sync),
    ) -> Vec<OperationResult> {
        let mut results: Vec<(usize, OperationResult)> = Vec::with_capacity(plan.len());
        let mut partitions: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();

        for (index, entry) in plan.entries.iter().enumerate() {
            match (&entry.action, &entry.destination) {
                (Action::Move | Action::Copy, Some(destination)) => {
                    let folder = destination.parent().unwrap_or(Path::new("")).to_path_buf();
                    partitions.entry(folder).or_default().push(index);
                }
                _ => {
                    let mut result = OperationResult::from_entry(entry, Outcome::Skipped);
                    if entry.reason == PlanReason::Unreadable {
                        result.error = Some(FileErrorKind::Unreadable);
                    }
                    on_result(&result);
                    results.push((index, result));
                }
            }
        }

        debug!(
            partitions = partitions.len(),
            dry_run = self.dry_run,
            "executing plan"
        );

        let partitions: Vec<Vec<usize>> = partitions.into_values().collect();
        let executed: Vec<Vec<(usize, OperationResult)>> = partitions
            .par_iter()
            .map(|indices| {
                let mut done = Vec::with_capacity(indices.len());
                for &index in indices {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let entry = &plan.entries[index];
                    let record = records.get(entry.record.0);
                    let result = self.apply(entry, record);
                    on_result(&result);
                    done.push((index, result));
                }
                done
            })
            .collect();

        results.extend(executed.into_iter().flatten());
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    fn apply(&self, entry: &PlanEntry, record: Option<&FileRecord>) -> OperationResult {
        let Some(destination) = entry.destination.as_deref() else {
            return OperationResult::from_entry(entry, Outcome::Skipped);
        };

        let outcome = if self.dry_run {
            self.simulate(entry)
        } else {
            self.transfer_verified(entry, record, destination)
        };

        match outcome {
            Ok(()) => {
                debug!(
                    source = %entry.source.display(),
                    destination = %destination.display(),
                    action = ?entry.action,
                    dry_run = self.dry_run,
                    "file organized"
                );
                OperationResult::from_entry(entry, Outcome::Succeeded)
            }
            Err((kind, message)) => {
                warn!(
                    source = %entry.source.display(),
                    destination = %destination.display(),
                    error = %kind,
                    "{}",
                    message
                );
                OperationResult::failed(entry, kind, message)
            }
        }
    }

    /// Dry-run check: the source must still be there to be moved.
    fn simulate(&self, entry: &PlanEntry) -> Result<(), (FileErrorKind, String)> {
        fs::metadata(&entry.source)
            .map(|_| ())
            .map_err(|e| (FileErrorKind::from(&e), format!("source unavailable: {}", e)))
    }

    fn transfer_verified(
        &self,
        entry: &PlanEntry,
        record: Option<&FileRecord>,
        destination: &Path,
    ) -> Result<(), (FileErrorKind, String)> {
        let io_failure =
            |what: &str, e: io::Error| (FileErrorKind::from(&e), format!("{}: {}", what, e));
        // Entries that have started run to completion; only the job token
        // stops work between entries.
        let no_cancel = CancelToken::new();

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| io_failure("create destination folder", e))?;
        }

        let source_len = fs::metadata(&entry.source)
            .map_err(|e| io_failure("read source metadata", e))?
            .len();
        let expected = match record.and_then(|r| r.hash) {
            Some(hash) => hash,
            None => hash_file(&entry.source, self.chunk_size, &no_cancel)
                .map_err(|e| hash_failure("hash source", e))?,
        };

        if let Err(e) = self.transfer.copy(&entry.source, destination) {
            if e.kind() != io::ErrorKind::AlreadyExists {
                remove_partial(destination);
            }
            return Err(io_failure("copy", e));
        }

        let copied_len = fs::metadata(destination)
            .map(|m| m.len())
            .map_err(|e| io_failure("read copy metadata", e));
        let verified = copied_len.and_then(|len| {
            if len != source_len {
                return Err((
                    FileErrorKind::Integrity,
                    format!("copy has {} bytes, source has {}", len, source_len),
                ));
            }
            let actual = hash_file(destination, self.chunk_size, &no_cancel)
                .map_err(|e| hash_failure("hash copy", e))?;
            if actual != expected {
                return Err((
                    FileErrorKind::Integrity,
                    "copy content hash does not match source".to_string(),
                ));
            }
            Ok(())
        });
        if let Err(failure) = verified {
            remove_partial(destination);
            return Err(failure);
        }

        if self.preserve_timestamps
            && let Some(modified) = record.and_then(|r| r.modified)
            && let Err(e) = File::options()
                .write(true)
                .open(destination)
                .and_then(|f| f.set_modified(modified))
        {
            warn!(path = %destination.display(), error = %e, "could not preserve modification time");
        }

        if entry.action == Action::Move
            && let Err(e) = fs::remove_file(&entry.source)
        {
            remove_partial(destination);
            return Err(io_failure("remove source after copy", e));
        }

        info!(
            source = %entry.source.display(),
            destination = %destination.display(),
            action = ?entry.action,
            "transfer verified"
        );
        Ok(())
    }
}

fn hash_failure(what: &str, err: HashError) -> (FileErrorKind, String) {
    match err {
        HashError::Io(e) => (FileErrorKind::from(&e), format!("{}: {}", what, e)),
        HashError::Cancelled => (FileErrorKind::Io, format!("{}: cancelled", what)),
    }
}

fn remove_partial(destination: &Path) {
    if let Err(e) = fs::remove_file(destination)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %destination.display(), error = %e, "could not remove partial copy");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DuplicateRole, RecordId};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes one flipped byte so verification fails.
    struct CorruptingTransfer;

    impl Transfer for CorruptingTransfer {
        fn copy(&self, source: &Path, destination: &Path) -> io::Result<u64> {
            let mut data = fs::read(source)?;
            if let Some(first) = data.first_mut() {
                *first ^= 0xFF;
            }
            fs::write(destination, &data)?;
            Ok(data.len() as u64)
        }
    }

    fn setup(action: Action) -> (TempDir, Vec<FileRecord>, OperationPlan) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("a.txt");
        fs::write(&source, "some content").expect("Failed to write file");
        let record = FileRecord::new(RecordId(0), source.clone(), 12, None);
        let plan = OperationPlan {
            entries: vec![PlanEntry {
                record: RecordId(0),
                source,
                action,
                destination: Some(temp_dir.path().join("Documents").join("a.txt")),
                reason: PlanReason::Category,
                category: "Documents".to_string(),
                role: DuplicateRole::Unique,
                size: 12,
            }],
        };
        (temp_dir, vec![record], plan)
    }

    fn executor(transfer: Arc<dyn Transfer>, dry_run: bool) -> Executor {
        Executor::new(transfer, 4, true, dry_run)
    }

    #[test]
    fn test_move_creates_directory_and_removes_source() {
        let (temp_dir, records, plan) = setup(Action::Move);

        let results = executor(Arc::new(StdTransfer), false).execute(
            &plan,
            &records,
            &CancelToken::new(),
            &|_| {},
        );

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, Outcome::Succeeded);
        assert!(!temp_dir.path().join("a.txt").exists());
        let moved = temp_dir.path().join("Documents/a.txt");
        assert_eq!(fs::read_to_string(moved).unwrap(), "some content");
    }

    #[test]
    fn test_copy_keeps_source() {
        let (temp_dir, records, plan) = setup(Action::Copy);

        let results = executor(Arc::new(StdTransfer), false).execute(
            &plan,
            &records,
            &CancelToken::new(),
            &|_| {},
        );

        assert_eq!(results[0].outcome, Outcome::Succeeded);
        assert!(temp_dir.path().join("a.txt").exists());
        assert!(temp_dir.path().join("Documents/a.txt").exists());
    }

    #[test]
    fn test_integrity_failure_preserves_source() {
        let (temp_dir, records, plan) = setup(Action::Move);

        let results = executor(Arc::new(CorruptingTransfer), false).execute(
            &plan,
            &records,
            &CancelToken::new(),
            &|_| {},
        );

        assert_eq!(results[0].outcome, Outcome::Failed);
        assert_eq!(results[0].error, Some(FileErrorKind::Integrity));
        let source = temp_dir.path().join("a.txt");
        assert_eq!(fs::read_to_string(source).unwrap(), "some content");
        assert!(!temp_dir.path().join("Documents/a.txt").exists());
    }

    #[test]
    fn test_existing_destination_is_not_overwritten() {
        let (temp_dir, records, plan) = setup(Action::Move);
        fs::create_dir_all(temp_dir.path().join("Documents")).unwrap();
        fs::write(temp_dir.path().join("Documents/a.txt"), "intruder").unwrap();

        let results = executor(Arc::new(StdTransfer), false).execute(
            &plan,
            &records,
            &CancelToken::new(),
            &|_| {},
        );

        assert_eq!(results[0].error, Some(FileErrorKind::DestinationExists));
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("Documents/a.txt")).unwrap(),
            "intruder"
        );
        assert!(temp_dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let (temp_dir, records, plan) = setup(Action::Move);

        let results = executor(Arc::new(StdTransfer), true).execute(
            &plan,
            &records,
            &CancelToken::new(),
            &|_| {},
        );

        assert_eq!(results[0].outcome, Outcome::Succeeded);
        assert!(temp_dir.path().join("a.txt").exists());
        assert!(!temp_dir.path().join("Documents").exists());
    }

    #[test]
    fn test_cancelled_before_start_runs_nothing() {
        let (temp_dir, records, plan) = setup(Action::Move);
        let token = CancelToken::new();
        token.cancel();

        let results =
            executor(Arc::new(StdTransfer), false).execute(&plan, &records, &token, &|_| {});

        assert!(results.is_empty());
        assert!(temp_dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_results_follow_plan_order() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut records = Vec::new();
        let mut entries = Vec::new();
        for (i, (name, folder)) in [("a.txt", "Z"), ("b.txt", "A"), ("c.txt", "M")]
            .iter()
            .enumerate()
        {
            let source = temp_dir.path().join(name);
            fs::write(&source, name).unwrap();
            records.push(FileRecord::new(RecordId(i), source.clone(), 5, None));
            entries.push(PlanEntry {
                record: RecordId(i),
                source,
                action: Action::Copy,
                destination: Some(temp_dir.path().join(folder).join(name)),
                reason: PlanReason::Category,
                category: folder.to_string(),
                role: DuplicateRole::Unique,
                size: 5,
            });
        }
        let plan = OperationPlan { entries };
        let seen = Mutex::new(0usize);

        let results = executor(Arc::new(StdTransfer), false).execute(
            &plan,
            &records,
            &CancelToken::new(),
            &|_| *seen.lock().unwrap() += 1,
        );

        let ids: Vec<_> = results.iter().map(|r| r.record).collect();
        assert_eq!(ids, vec![Some(RecordId(0)), Some(RecordId(1)), Some(RecordId(2))]);
        assert_eq!(*seen.lock().unwrap(), 3);
    }
}
