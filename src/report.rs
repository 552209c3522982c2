//! Job outcome report.
//!
//! The report is a plain serializable value. Rendering it (HTML, text, a table)
//! is left to whoever consumes it.

use crate::duplicates::DuplicateGroup;
use crate::error::FileErrorKind;
use crate::job::JobState;
use crate::plan::{Action, PlanEntry, PlanReason};
use crate::record::{DuplicateRole, RecordId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Skipped,
    Failed,
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    /// `None` for entries that never became records (unreadable during traversal).
    pub record: Option<RecordId>,
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub action: Action,
    pub reason: PlanReason,
    pub category: Option<String>,
    pub role: DuplicateRole,
    pub outcome: Outcome,
    pub error: Option<FileErrorKind>,
    pub message: Option<String>,
}

impl OperationResult {
    pub fn from_entry(entry: &PlanEntry, outcome: Outcome) -> Self {
        Self {
            record: Some(entry.record),
            source: entry.source.clone(),
            destination: entry.destination.clone(),
            action: entry.action,
            reason: entry.reason,
            category: Some(entry.category.clone()),
            role: entry.role,
            outcome,
            error: None,
            message: None,
        }
    }

    pub fn failed(entry: &PlanEntry, error: FileErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: Some(error),
            message: Some(message.into()),
            ..Self::from_entry(entry, Outcome::Failed)
        }
    }

    /// A path that could not be read while walking the tree.
    pub fn unreadable(source: PathBuf, message: impl Into<String>) -> Self {
        Self {
            record: None,
            source,
            destination: None,
            action: Action::Skip,
            reason: PlanReason::Unreadable,
            category: None,
            role: DuplicateRole::Unique,
            outcome: Outcome::Skipped,
            error: Some(FileErrorKind::Unreadable),
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub moved: usize,
    pub copied: usize,
    pub skipped: usize,
    /// Files identified as duplicates, whatever happened to them.
    pub duplicates: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateStats {
    pub groups: usize,
    pub duplicate_files: usize,
    pub wasted_bytes: u64,
}

impl DuplicateStats {
    pub fn from_groups(groups: &[DuplicateGroup]) -> Self {
        Self {
            groups: groups.len(),
            duplicate_files: groups.iter().map(|g| g.duplicates().len()).sum(),
            wasted_bytes: groups.iter().map(DuplicateGroup::wasted_bytes).sum(),
        }
    }
}

/// Final, immutable summary of a job.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// `Done` or `Cancelled`.
    pub state: JobState,
    pub dry_run: bool,
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    pub counts: ReportCounts,
    /// Successfully organized non-duplicate files per category.
    pub categories: BTreeMap<String, usize>,
    pub duplicate_stats: DuplicateStats,
    /// Committed backup manifest, if a backup was taken.
    pub backup_manifest: Option<PathBuf>,
    pub results: Vec<OperationResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Report {
    pub fn counts_for(results: &[OperationResult]) -> ReportCounts {
        let mut counts = ReportCounts::default();
        for result in results {
            if result.role == DuplicateRole::Duplicate {
                counts.duplicates += 1;
            }
            match result.outcome {
                Outcome::Failed => counts.errors += 1,
                Outcome::Skipped => counts.skipped += 1,
                Outcome::Succeeded if result.reason == PlanReason::DuplicateRedirect => {}
                Outcome::Succeeded => match result.action {
                    Action::Move => counts.moved += 1,
                    Action::Copy => counts.copied += 1,
                    Action::Skip => counts.skipped += 1,
                },
            }
        }
        counts
    }

    pub fn categories_for(results: &[OperationResult]) -> BTreeMap<String, usize> {
        let mut categories = BTreeMap::new();
        for result in results {
            if result.outcome == Outcome::Succeeded
                && result.action != Action::Skip
                && result.reason != PlanReason::DuplicateRedirect
                && let Some(category) = &result.category
            {
                *categories.entry(category.clone()).or_insert(0) += 1;
            }
        }
        categories
    }

    /// Results that ended in failure.
    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| r.outcome == Outcome::Failed)
    }

    pub fn is_complete(&self) -> bool {
        self.state == JobState::Done
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
