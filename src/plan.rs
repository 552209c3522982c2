//! Plan building: one action and one destination per record.
//!
//! Destinations are resolved in canonical record order. A destination that is
//! already assigned earlier in the plan, or that exists on disk, gets a numeric
//! suffix before its extension (`a.txt`, `a_1.txt`, `a_2.txt`, ...). Running the
//! builder twice over the same tree therefore yields the same plan.

use crate::config::{JobConfig, OperationMode, OrganizationMode};
use crate::error::ConfigError;
use crate::file_category::Classifier;
use crate::record::{DuplicateRole, FileRecord, RecordId};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Folder under the destination root that receives redirected duplicates.
pub const DUPLICATES_DIR: &str = "Duplicates";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Move,
    Copy,
    Skip,
}

impl From<OperationMode> for Action {
    fn from(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Move => Self::Move,
            OperationMode::Copy => Self::Copy,
        }
    }
}

/// Why an entry got its action and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    Category,
    CategoryYear,
    DuplicateRedirect,
    DuplicateSkipped,
    AlreadyOrganized,
    Unreadable,
}

impl PlanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::CategoryYear => "category_year",
            Self::DuplicateRedirect => "duplicate_redirect",
            Self::DuplicateSkipped => "duplicate_skipped",
            Self::AlreadyOrganized => "already_organized",
            Self::Unreadable => "unreadable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub record: RecordId,
    pub source: PathBuf,
    pub action: Action,
    /// `None` for skipped entries.
    pub destination: Option<PathBuf>,
    pub reason: PlanReason,
    pub category: String,
    pub role: DuplicateRole,
    pub size: u64,
}

/// The validated set of actions for a job, in canonical record order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationPlan {
    pub entries: Vec<PlanEntry>,
}

impl OperationPlan {
    /// Fail if two entries still share a destination.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for destination in self.entries.iter().filter_map(|e| e.destination.as_ref()) {
            if !seen.insert(destination) {
                return Err(ConfigError::DestinationCollision(destination.clone()));
            }
        }
        Ok(())
    }

    pub fn count(&self, action: Action) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    /// Entries whose source will be removed.
    pub fn moves(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.action == Action::Move)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Computes a plan from analyzed records.
pub struct PlanBuilder<'a> {
    dest_root: &'a Path,
    classifier: &'a Classifier,
    operation_mode: OperationMode,
    organization_mode: OrganizationMode,
    skip_duplicates: bool,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(dest_root: &'a Path, classifier: &'a Classifier, config: &JobConfig) -> Self {
        Self {
            dest_root,
            classifier,
            operation_mode: config.operation_mode,
            organization_mode: config.organization_mode,
            skip_duplicates: config.skip_duplicates,
        }
    }

    /// Build and validate the plan. `records` must be in canonical order.
    pub fn build(&self, records: &[FileRecord]) -> Result<OperationPlan, ConfigError> {
        let mut assigned: HashSet<PathBuf> = HashSet::new();
        let mut entries = Vec::with_capacity(records.len());

        for record in records {
            let category = match &record.category {
                Some(name) => name.clone(),
                None => self
                    .classifier
                    .classify(record.file_name().unwrap_or_default())
                    .name
                    .clone(),
            };
            let mut entry = PlanEntry {
                record: record.id,
                source: record.path.clone(),
                action: Action::Skip,
                destination: None,
                reason: PlanReason::Unreadable,
                category,
                role: record.role,
                size: record.size,
            };

            if record.unreadable {
                entries.push(entry);
                continue;
            }
            if record.role == DuplicateRole::Duplicate && self.skip_duplicates {
                entry.reason = PlanReason::DuplicateSkipped;
                entries.push(entry);
                continue;
            }

            let (target, reason) = self.target_for(record, &entry.category);
            if target == record.path {
                entry.reason = PlanReason::AlreadyOrganized;
                entries.push(entry);
                continue;
            }

            let destination = resolve_collision(&target, |candidate| {
                assigned.contains(candidate) || candidate.exists()
            });
            if destination != target {
                debug!(
                    source = %record.path.display(),
                    destination = %destination.display(),
                    "destination renamed to avoid collision"
                );
            }
            assigned.insert(destination.clone());

            entry.action = self.operation_mode.into();
            entry.destination = Some(destination);
            entry.reason = reason;
            entries.push(entry);
        }

        let plan = OperationPlan { entries };
        plan.validate()?;
        Ok(plan)
    }

    fn target_for(&self, record: &FileRecord, category: &str) -> (PathBuf, PlanReason) {
        let file_name = record.path.file_name().unwrap_or_default();

        if record.role == DuplicateRole::Duplicate {
            return (
                self.dest_root.join(DUPLICATES_DIR).join(file_name),
                PlanReason::DuplicateRedirect,
            );
        }

        let template = self
            .classifier
            .category(category)
            .map(|c| c.template_for(&self.organization_mode))
            .unwrap_or_else(|| self.organization_mode.default_template());
        let reason = if template.contains("{year}") {
            PlanReason::CategoryYear
        } else {
            PlanReason::Category
        };
        let folder = render_template(template, category, || record.year_label());
        (self.dest_root.join(folder).join(file_name), reason)
    }
}

/// Expand `{category}` and `{year}` into a relative folder path.
pub fn render_template(template: &str, category: &str, year: impl FnOnce() -> String) -> PathBuf {
    let mut rendered = template.replace("{category}", category);
    if rendered.contains("{year}") {
        rendered = rendered.replace("{year}", &year());
    }
    rendered
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Append `_1`, `_2`, ... before the extension until `taken` says no.
pub fn resolve_collision(target: &Path, mut taken: impl FnMut(&Path) -> bool) -> PathBuf {
    if !taken(target) {
        return target.to_path_buf();
    }

    let parent = target.parent().unwrap_or_else(|| Path::new(""));
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = target
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1usize;
    loop {
        let candidate = parent.join(format!("{}_{}{}", stem, counter, extension));
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}
