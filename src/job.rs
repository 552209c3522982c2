//! Job orchestration.
//!
//! An [`Orchestrator`] runs one job per call to [`Orchestrator::start`]: scan,
//! analyze (classify and find duplicates), plan, back up, execute, report. The
//! work happens on a dedicated thread; the returned [`JobHandle`] can cancel
//! it, poll its progress and collect the [`Report`].
//!
//! Only configuration, plan validation and backup failures end a job with an
//! error. Everything that goes wrong with a single file ends up in the report.

use crate::backup::BackupManager;
use crate::config::{CompiledFilters, JobConfig};
use crate::duplicates::{DuplicateDetector, DuplicateGroup};
use crate::error::{BackupError, JobError, JobResult};
use crate::executor::{Executor, StdTransfer, Transfer};
use crate::file_category::Classifier;
use crate::plan::{Action, DUPLICATES_DIR, OperationPlan, PlanBuilder};
use crate::record::{FileRecord, RecordId};
use crate::report::{DuplicateStats, OperationResult, Report};
use crate::scanner::{ScanEntry, ScanOptions, Scanner, SymlinkPolicy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{Dispatch, debug, error, info, warn};

/// Cooperative cancellation flag shared between a job and its handle.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A stage stopped because its [`CancelToken`] tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Job lifecycle. `Done`, `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Scanning,
    Analyzing,
    Planning,
    BackingUp,
    Executing,
    Reporting,
    Done,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Analyzing => "analyzing",
            Self::Planning => "planning",
            Self::BackingUp => "backing_up",
            Self::Executing => "executing",
            Self::Reporting => "reporting",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a running job.
///
/// While scanning, `files_completed` counts files discovered and `files_total`
/// is unknown. While executing, it counts finished plan entries out of the
/// plan's length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub state: JobState,
    pub files_completed: u64,
    pub files_total: Option<u64>,
    pub current_path: Option<PathBuf>,
}

/// Receives job events. Called from job and worker threads.
pub trait ProgressSink: Send + Sync {
    fn on_state(&self, _state: JobState) {}

    fn on_progress(&self, _progress: &Progress) {}
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {}

struct Tracker {
    progress: Mutex<Progress>,
    sink: Arc<dyn ProgressSink>,
}

impl Tracker {
    fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            progress: Mutex::new(Progress::default()),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Progress {
        self.lock().clone()
    }

    fn enter(&self, state: JobState, files_total: Option<u64>) {
        {
            let mut progress = self.lock();
            *progress = Progress {
                state,
                files_completed: 0,
                files_total,
                current_path: None,
            };
        }
        debug!(state = %state, "job state changed");
        self.sink.on_state(state);
    }

    /// State change that keeps the last counters.
    fn set_state(&self, state: JobState) {
        self.lock().state = state;
        debug!(state = %state, "job state changed");
        self.sink.on_state(state);
    }

    fn advance(&self, path: &Path) {
        let snapshot = {
            let mut progress = self.lock();
            progress.files_completed += 1;
            progress.current_path = Some(path.to_path_buf());
            progress.clone()
        };
        self.sink.on_progress(&snapshot);
    }
}

/// Source roots with a live job. Shared by clones of an [`Orchestrator`].
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl JobRegistry {
    /// Claim `root`. Fails if a live job's root is the same as, inside, or
    /// contains `root`.
    pub fn acquire(&self, root: &Path) -> JobResult<RootGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active
            .iter()
            .any(|live| live.starts_with(root) || root.starts_with(live))
        {
            return Err(JobError::Conflict {
                root: root.to_path_buf(),
            });
        }
        active.insert(root.to_path_buf());
        Ok(RootGuard {
            registry: self.clone(),
            root: root.to_path_buf(),
        })
    }

    pub fn is_active(&self, root: &Path) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(root)
    }
}

/// Releases its root when dropped.
#[derive(Debug)]
pub struct RootGuard {
    registry: JobRegistry,
    root: PathBuf,
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        self.registry
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.root);
    }
}

/// Starts jobs. Collaborators (progress sink, log dispatcher, byte transport)
/// are injected here rather than looked up globally.
#[derive(Clone)]
pub struct Orchestrator {
    registry: JobRegistry,
    progress: Arc<dyn ProgressSink>,
    dispatch: Option<Dispatch>,
    transfer: Arc<dyn Transfer>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            registry: JobRegistry::default(),
            progress: Arc::new(SilentProgress),
            dispatch: None,
            transfer: Arc::new(StdTransfer),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Send every log event of this orchestrator's jobs to `dispatch`.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn with_transfer(mut self, transfer: Arc<dyn Transfer>) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Validate, claim the source root and start the job on its own thread.
    ///
    /// # Errors
    ///
    /// Configuration errors, unusable roots and [`JobError::Conflict`] are
    /// returned here, before anything touches the filesystem.
    pub fn start(
        &self,
        source_root: impl AsRef<Path>,
        dest_root: impl AsRef<Path>,
        config: JobConfig,
    ) -> JobResult<JobHandle> {
        let (source_root, dest_root) = (source_root.as_ref(), dest_root.as_ref());
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, || {
                self.start_job(source_root, dest_root, config)
            }),
            None => self.start_job(source_root, dest_root, config),
        }
    }

    /// Start a job and wait for its report.
    pub fn run(
        &self,
        source_root: impl AsRef<Path>,
        dest_root: impl AsRef<Path>,
        config: JobConfig,
    ) -> JobResult<Report> {
        self.start(source_root, dest_root, config)?.result()
    }

    fn start_job(
        &self,
        source_root: &Path,
        dest_root: &Path,
        config: JobConfig,
    ) -> JobResult<JobHandle> {
        config.validate()?;
        let classifier = Classifier::from_table(&config.category_table)?;
        let filters = config.filters.clone().compile()?;

        let source_root = resolve_source_root(source_root)?;
        let dest_root = resolve_dest_root(dest_root)?;
        let backup_root = absolute(&config.backup_root_for(&source_root))?;

        let guard = self.registry.acquire(&source_root)?;
        let pool = self.worker_pool(config.workers)?;

        let cancel = CancelToken::new();
        let tracker = Arc::new(Tracker::new(self.progress.clone()));
        let job = Job {
            source_root,
            dest_root,
            backup_root,
            config,
            classifier,
            filters,
            transfer: self.transfer.clone(),
            tracker: tracker.clone(),
            cancel: cancel.clone(),
            pool,
            started_at: Utc::now(),
        };

        let dispatch = self.dispatch.clone();
        let thread = std::thread::Builder::new()
            .name("dirsort-job".to_string())
            .spawn(move || {
                let _guard = guard;
                match dispatch {
                    Some(dispatch) => tracing::dispatcher::with_default(&dispatch, || job.run()),
                    None => job.run(),
                }
            })
            .map_err(|e| JobError::Worker {
                reason: format!("could not spawn job thread: {}", e),
            })?;

        Ok(JobHandle {
            cancel,
            tracker,
            thread,
        })
    }

    /// Rayon pool for hashing and execution. Workers log to the injected
    /// dispatcher when there is one.
    fn worker_pool(&self, workers: usize) -> JobResult<rayon::ThreadPool> {
        let dispatch = self.dispatch.clone();
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("dirsort-worker-{}", i))
            .spawn_handler(move |thread| {
                let dispatch = dispatch.clone();
                let mut builder = std::thread::Builder::new();
                if let Some(name) = thread.name() {
                    builder = builder.name(name.to_owned());
                }
                if let Some(stack_size) = thread.stack_size() {
                    builder = builder.stack_size(stack_size);
                }
                builder.spawn(move || match dispatch {
                    Some(dispatch) => tracing::dispatcher::with_default(&dispatch, || thread.run()),
                    None => thread.run(),
                })?;
                Ok(())
            })
            .build()
            .map_err(|e| JobError::Worker {
                reason: format!("could not build worker pool: {}", e),
            })
    }
}

/// Handle to a running job.
pub struct JobHandle {
    cancel: CancelToken,
    tracker: Arc<Tracker>,
    thread: JoinHandle<JobResult<Report>>,
}

impl JobHandle {
    /// Ask the job to stop before its next unit of work. The job still
    /// produces a report covering what it completed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn progress(&self) -> Progress {
        self.tracker.snapshot()
    }

    pub fn state(&self) -> JobState {
        self.tracker.snapshot().state
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the job to end.
    pub fn result(self) -> JobResult<Report> {
        match self.thread.join() {
            Ok(result) => result,
            Err(panic) => {
                self.tracker.set_state(JobState::Failed);
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "job thread panicked".to_string());
                Err(JobError::Worker { reason })
            }
        }
    }
}

struct Job {
    source_root: PathBuf,
    dest_root: PathBuf,
    backup_root: PathBuf,
    config: JobConfig,
    classifier: Classifier,
    filters: CompiledFilters,
    transfer: Arc<dyn Transfer>,
    tracker: Arc<Tracker>,
    cancel: CancelToken,
    pool: rayon::ThreadPool,
    started_at: DateTime<Utc>,
}

/// What a job has produced so far.
#[derive(Default)]
struct Progressed {
    results: Vec<OperationResult>,
    groups: Vec<DuplicateGroup>,
    backup_manifest: Option<PathBuf>,
}

impl Job {
    fn run(self) -> JobResult<Report> {
        info!(
            source = %self.source_root.display(),
            dest = %self.dest_root.display(),
            dry_run = self.config.dry_run,
            "job started"
        );
        match self.pipeline() {
            Ok(report) => {
                self.tracker.set_state(report.state);
                info!(
                    state = %report.state,
                    moved = report.counts.moved,
                    copied = report.counts.copied,
                    skipped = report.counts.skipped,
                    duplicates = report.counts.duplicates,
                    errors = report.counts.errors,
                    "job finished"
                );
                Ok(report)
            }
            Err(err) => {
                self.tracker.set_state(JobState::Failed);
                error!(error = %err, "job failed");
                Err(err)
            }
        }
    }

    fn pipeline(&self) -> JobResult<Report> {
        let mut done = Progressed::default();

        self.tracker.enter(JobState::Scanning, None);
        let Some(mut records) = self.scan(&mut done.results) else {
            return Ok(self.report(JobState::Cancelled, done));
        };

        self.tracker
            .enter(JobState::Analyzing, Some(records.len() as u64));
        self.classify(&mut records);
        let detector = DuplicateDetector::new(self.config.chunk_size);
        let tracker = &self.tracker;
        match self.pool.install(|| {
            detector.detect_with_progress(&mut records, &self.cancel, &|path| {
                tracker.advance(path)
            })
        }) {
            Ok(groups) => done.groups = groups,
            Err(Cancelled) => return Ok(self.report(JobState::Cancelled, done)),
        }

        self.tracker.enter(JobState::Planning, None);
        let plan = PlanBuilder::new(&self.dest_root, &self.classifier, &self.config)
            .build(&records)?;
        debug!(
            entries = plan.len(),
            moves = plan.count(Action::Move),
            copies = plan.count(Action::Copy),
            "plan validated"
        );
        if self.cancel.is_cancelled() {
            return Ok(self.report(JobState::Cancelled, done));
        }

        if self.config.backup_enabled {
            self.tracker.enter(JobState::BackingUp, None);
            match self.backup(&plan) {
                Ok(manifest) => done.backup_manifest = manifest,
                Err(BackupError::Cancelled) => {
                    return Ok(self.report(JobState::Cancelled, done));
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.tracker
            .enter(JobState::Executing, Some(plan.len() as u64));
        let executor = Executor::new(
            self.transfer.clone(),
            self.config.chunk_size,
            self.config.preserve_timestamps,
            self.config.dry_run,
        );
        let tracker = &self.tracker;
        let executed = self.pool.install(|| {
            executor.execute(&plan, &records, &self.cancel, &|result| {
                tracker.advance(&result.source)
            })
        });
        done.results.extend(executed);

        let state = if self.cancel.is_cancelled() {
            JobState::Cancelled
        } else {
            JobState::Done
        };
        Ok(self.report(state, done))
    }

    /// Collect records in canonical order. `None` if cancelled.
    ///
    /// Redirected duplicates are never rescanned, so a later run can't
    /// promote one of them to the original of its group.
    fn scan(&self, unreadable: &mut Vec<OperationResult>) -> Option<Vec<FileRecord>> {
        let options = ScanOptions {
            excluded_dirs: self.config.excluded_dirs.clone(),
            excluded_paths: vec![
                self.backup_root.clone(),
                self.dest_root.join(DUPLICATES_DIR),
            ],
            symlinks: if self.config.follow_symlinks {
                SymlinkPolicy::Follow
            } else {
                SymlinkPolicy::Skip
            },
            filters: self.filters.clone(),
        };
        let scanner = Scanner::new(&self.source_root, options);
        let mut walk = scanner.walk(self.cancel.clone());

        let mut files = Vec::new();
        for entry in walk.by_ref() {
            self.tracker.advance(entry.path());
            match entry {
                ScanEntry::File {
                    path,
                    size,
                    modified,
                } => files.push((path, size, modified)),
                ScanEntry::Unreadable { path, reason } => {
                    unreadable.push(OperationResult::unreadable(path, reason));
                }
            }
        }
        if walk.was_cancelled() {
            info!(files = walk.files_seen(), "scan cancelled");
            return None;
        }

        // Component-wise, so `a/x` comes before `a-b/x`.
        files.sort_by(|a, b| a.0.cmp(&b.0));
        info!(files = files.len(), unreadable = unreadable.len(), "scan complete");
        Some(
            files
                .into_iter()
                .enumerate()
                .map(|(i, (path, size, modified))| FileRecord::new(RecordId(i), path, size, modified))
                .collect(),
        )
    }

    fn classify(&self, records: &mut [FileRecord]) {
        for record in records.iter_mut() {
            let category = self
                .classifier
                .classify(record.file_name().unwrap_or_default());
            record.category = Some(category.name.clone());
        }
    }

    /// Snapshot the files `plan` moves. In a dry run nothing is written.
    fn backup(&self, plan: &OperationPlan) -> Result<Option<PathBuf>, BackupError> {
        let manager = BackupManager::new(&self.backup_root);
        if self.config.dry_run {
            let snapshot = manager.plan_snapshot(&self.source_root, plan)?;
            info!(files = snapshot.entries.len(), "dry run, backup not written");
            return Ok(None);
        }

        let Some(snapshot) = manager.snapshot(&self.source_root, plan, &self.cancel)? else {
            return Ok(None);
        };
        if self.config.max_backups > 0 {
            match manager.prune(self.config.max_backups) {
                Ok(removed) if !removed.is_empty() => {
                    info!(removed = removed.len(), "old backups pruned")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "could not prune old backups"),
            }
        }
        Ok(Some(snapshot.manifest_path()))
    }

    fn report(&self, state: JobState, mut done: Progressed) -> Report {
        self.tracker.set_state(JobState::Reporting);
        done.results.sort_by(|a, b| a.source.cmp(&b.source));
        Report {
            state,
            dry_run: self.config.dry_run,
            source_root: self.source_root.clone(),
            dest_root: self.dest_root.clone(),
            counts: Report::counts_for(&done.results),
            categories: Report::categories_for(&done.results),
            duplicate_stats: DuplicateStats::from_groups(&done.groups),
            backup_manifest: done.backup_manifest,
            results: done.results,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

fn resolve_source_root(path: &Path) -> JobResult<PathBuf> {
    let invalid = |source| JobError::InvalidRoot {
        path: path.to_path_buf(),
        source,
    };
    let canonical = fs::canonicalize(path).map_err(invalid)?;
    if !canonical.is_dir() {
        return Err(invalid(io::Error::new(
            io::ErrorKind::NotADirectory,
            "source root is not a directory",
        )));
    }
    Ok(canonical)
}

/// The destination may not exist yet. Its nearest existing ancestor is
/// canonicalized so destinations compare equal to scanned source paths.
fn resolve_dest_root(path: &Path) -> JobResult<PathBuf> {
    let invalid = |source| JobError::InvalidRoot {
        path: path.to_path_buf(),
        source,
    };
    let absolute = absolute(path)?;

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    let resolved = loop {
        match fs::canonicalize(existing) {
            Ok(canonical) => {
                break missing
                    .iter()
                    .rev()
                    .fold(canonical, |acc: PathBuf, part| acc.join(part));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => break absolute.clone(),
                }
            }
            Err(e) => return Err(invalid(e)),
        }
    };

    if resolved.exists() && !resolved.is_dir() {
        return Err(invalid(io::Error::new(
            io::ErrorKind::NotADirectory,
            "destination root is not a directory",
        )));
    }
    Ok(resolved)
}

fn absolute(path: &Path) -> JobResult<PathBuf> {
    std::path::absolute(path).map_err(|source| JobError::InvalidRoot {
        path: path.to_path_buf(),
        source,
    })
}
