/// Backup snapshots of files a job is about to remove, and restoring them.
///
/// A snapshot lives in its own directory under the backup root:
///
/// ```text
/// <backup_root>/<snapshot id>/
///     manifest.json
///     files/<path relative to the source root>
/// ```
///
/// The manifest is written last, through a temporary file and a rename, so a
/// snapshot directory without `manifest.json` was never committed. If any copy
/// fails the whole directory is removed and the job must not go on.
use crate::error::BackupError;
use crate::job::CancelToken;
use crate::plan::{OperationPlan, resolve_collision};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the committed manifest inside a snapshot directory.
pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_TMP_FILE: &str = "manifest.json.tmp";
const FILES_DIR: &str = "files";

/// One backed-up file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Absolute path the file had when it was backed up.
    pub original: PathBuf,
    /// Location of the copy, relative to the snapshot directory.
    pub backup: PathBuf,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
}

/// Manifest of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub source_root: PathBuf,
    pub entries: Vec<BackupEntry>,
    /// Snapshot directory. Not stored in the manifest.
    #[serde(skip)]
    pub location: PathBuf,
}

impl BackupSnapshot {
    pub fn manifest_path(&self) -> PathBuf {
        self.location.join(MANIFEST_FILE)
    }

    pub fn backup_path(&self, entry: &BackupEntry) -> PathBuf {
        self.location.join(&entry.backup)
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Outcome of restoring a snapshot.
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Number of files copied back to their original location.
    pub restored: usize,
    /// Entries whose backup copy is missing.
    pub skipped: Vec<(PathBuf, String)>,
    pub failed: Vec<(PathBuf, String)>,
    /// Files that were in the way, and where they were moved to.
    pub set_aside: Vec<(PathBuf, PathBuf)>,
}

impl RestoreReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Creates, lists, prunes and restores snapshots under one backup root.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_root: PathBuf,
}

impl BackupManager {
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            backup_root: backup_root.into(),
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// The manifest a snapshot of `plan` would have, without touching the disk.
    ///
    /// Only `move` entries are included; copies leave their source in place.
    pub fn plan_snapshot(
        &self,
        source_root: &Path,
        plan: &OperationPlan,
    ) -> Result<BackupSnapshot, BackupError> {
        let created_at = Utc::now();
        let id = created_at.format("%Y%m%dT%H%M%S%.3fZ").to_string();

        let entries = plan
            .moves()
            .map(|entry| {
                let relative = entry
                    .source
                    .strip_prefix(source_root)
                    .map_err(|_| BackupError::OutsideRoot(entry.source.clone()))?;
                Ok(BackupEntry {
                    original: entry.source.clone(),
                    backup: Path::new(FILES_DIR).join(relative),
                    size: entry.size,
                    timestamp: created_at,
                })
            })
            .collect::<Result<Vec<_>, BackupError>>()?;

        Ok(BackupSnapshot {
            location: self.backup_root.join(&id),
            id,
            created_at,
            source_root: source_root.to_path_buf(),
            entries,
        })
    }

    /// Copy every file `plan` will move and commit the manifest.
    ///
    /// Returns `Ok(None)` when the plan moves nothing. On error nothing is left
    /// behind under the backup root.
    pub fn snapshot(
        &self,
        source_root: &Path,
        plan: &OperationPlan,
        cancel: &CancelToken,
    ) -> Result<Option<BackupSnapshot>, BackupError> {
        if plan.moves().next().is_none() {
            debug!("plan moves nothing, no backup needed");
            return Ok(None);
        }

        let mut snapshot = self.plan_snapshot(source_root, plan)?;
        fs::create_dir_all(&self.backup_root).map_err(|source| BackupError::Io {
            operation: "create backup root",
            path: self.backup_root.clone(),
            source,
        })?;
        snapshot.location = self.create_snapshot_dir(&snapshot.id)?;
        if let Some(name) = snapshot.location.file_name() {
            snapshot.id = name.to_string_lossy().into_owned();
        }

        let written = self
            .copy_entries(&mut snapshot, cancel)
            .and_then(|()| self.commit(&snapshot));
        if let Err(err) = written {
            warn!(snapshot = %snapshot.location.display(), error = %err, "backup failed, discarding snapshot");
            if let Err(e) = fs::remove_dir_all(&snapshot.location) {
                warn!(snapshot = %snapshot.location.display(), error = %e, "could not remove incomplete snapshot");
            }
            return Err(err);
        }

        info!(
            snapshot = %snapshot.location.display(),
            files = snapshot.entries.len(),
            bytes = snapshot.total_bytes(),
            "backup committed"
        );
        Ok(Some(snapshot))
    }

    fn create_snapshot_dir(&self, id: &str) -> Result<PathBuf, BackupError> {
        let mut candidate = self.backup_root.join(id);
        let mut counter = 1usize;
        loop {
            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    candidate = self.backup_root.join(format!("{}-{}", id, counter));
                    counter += 1;
                }
                Err(source) => {
                    return Err(BackupError::Io {
                        operation: "create snapshot directory",
                        path: candidate,
                        source,
                    });
                }
            }
        }
    }

    fn copy_entries(
        &self,
        snapshot: &mut BackupSnapshot,
        cancel: &CancelToken,
    ) -> Result<(), BackupError> {
        let location = snapshot.location.clone();
        for entry in &mut snapshot.entries {
            if cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }

            let target = location.join(&entry.backup);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|source| BackupError::Io {
                    operation: "create backup folder",
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            entry.size = fs::copy(&entry.original, &target).map_err(|source| BackupError::Io {
                operation: "copy",
                path: entry.original.clone(),
                source,
            })?;
            entry.timestamp = Utc::now();
            preserve_modified(&entry.original, &target);
            debug!(original = %entry.original.display(), backup = %target.display(), "file backed up");
        }
        Ok(())
    }

    fn commit(&self, snapshot: &BackupSnapshot) -> Result<(), BackupError> {
        let manifest = snapshot.manifest_path();
        let json =
            serde_json::to_string_pretty(snapshot).map_err(|source| BackupError::Manifest {
                path: manifest.clone(),
                source,
            })?;

        let tmp = snapshot.location.join(MANIFEST_TMP_FILE);
        fs::write(&tmp, json).map_err(|source| BackupError::Io {
            operation: "write manifest",
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &manifest).map_err(|source| BackupError::Io {
            operation: "commit manifest",
            path: manifest.clone(),
            source,
        })
    }

    /// Read the committed manifest of a snapshot directory.
    pub fn load(snapshot_dir: &Path) -> Result<BackupSnapshot, BackupError> {
        let manifest = snapshot_dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&manifest).map_err(|source| BackupError::Io {
            operation: "read manifest",
            path: manifest.clone(),
            source,
        })?;
        let mut snapshot: BackupSnapshot =
            serde_json::from_str(&content).map_err(|source| BackupError::Manifest {
                path: manifest,
                source,
            })?;
        snapshot.location = snapshot_dir.to_path_buf();
        Ok(snapshot)
    }

    /// Copy every file of a snapshot back to its original path.
    ///
    /// A file already sitting at an original path is renamed aside with a
    /// `.bak.<timestamp>` suffix first. The snapshot itself is left untouched.
    pub fn restore(snapshot_dir: &Path) -> Result<RestoreReport, BackupError> {
        let snapshot = Self::load(snapshot_dir)?;
        let mut report = RestoreReport::default();

        for entry in &snapshot.entries {
            let backup = snapshot.backup_path(entry);
            if !backup.is_file() {
                report
                    .skipped
                    .push((entry.original.clone(), "backup copy not found".to_string()));
                continue;
            }

            match restore_file(&backup, &entry.original) {
                Ok(set_aside) => {
                    report.restored += 1;
                    if let Some(aside) = set_aside {
                        report.set_aside.push((entry.original.clone(), aside));
                    }
                }
                Err(e) => {
                    warn!(path = %entry.original.display(), error = %e, "restore failed");
                    report.failed.push((entry.original.clone(), e.to_string()));
                }
            }
        }

        info!(
            snapshot = %snapshot_dir.display(),
            restored = report.restored,
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "restore finished"
        );
        Ok(report)
    }

    /// Committed snapshots under the backup root, oldest first.
    pub fn list_snapshots(&self) -> Result<Vec<BackupSnapshot>, BackupError> {
        let dir = match fs::read_dir(&self.backup_root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(BackupError::Io {
                    operation: "list snapshots",
                    path: self.backup_root.clone(),
                    source,
                });
            }
        };

        let mut snapshots = Vec::new();
        for entry in dir.flatten() {
            let path = entry.path();
            if !path.join(MANIFEST_FILE).is_file() {
                continue;
            }
            match Self::load(&path) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(snapshot = %path.display(), error = %e, "ignoring unreadable snapshot"),
            }
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(snapshots)
    }

    /// Delete all but the newest `keep` snapshots. Returns the removed directories.
    pub fn prune(&self, keep: usize) -> Result<Vec<PathBuf>, BackupError> {
        let snapshots = self.list_snapshots()?;
        let excess = snapshots.len().saturating_sub(keep);
        let mut removed = Vec::with_capacity(excess);

        for snapshot in snapshots.into_iter().take(excess) {
            fs::remove_dir_all(&snapshot.location).map_err(|source| BackupError::Io {
                operation: "remove snapshot",
                path: snapshot.location.clone(),
                source,
            })?;
            debug!(snapshot = %snapshot.location.display(), "snapshot pruned");
            removed.push(snapshot.location);
        }
        Ok(removed)
    }
}

/// Returns where a conflicting file was moved to, if there was one.
fn restore_file(backup: &Path, original: &Path) -> io::Result<Option<PathBuf>> {
    let mut set_aside = None;
    if original.exists() {
        let aside = resolve_collision(&conflict_path(original), |p| p.exists());
        fs::rename(original, &aside)?;
        set_aside = Some(aside);
    }
    if let Some(parent) = original.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(backup, original)?;
    preserve_modified(backup, original);
    Ok(set_aside)
}

/// `file.txt` becomes `file.txt.bak.20251109-143052`.
fn conflict_path(original: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let filename = original
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    original.with_file_name(format!("{}.bak.{}", filename, timestamp))
}

fn preserve_modified(from: &Path, to: &Path) {
    let modified = match fs::metadata(from).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return,
    };
    if let Err(e) = File::options()
        .write(true)
        .open(to)
        .and_then(|f| f.set_modified(modified))
    {
        debug!(path = %to.display(), error = %e, "could not preserve modification time");
    }
}
