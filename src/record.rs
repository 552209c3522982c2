//! Per-file state carried through a job.

use crate::content_hash::ContentHash;
use chrono::{DateTime, Datelike, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::time::SystemTime;

/// Index of a record within a job. Records are numbered in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(pub usize);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a record stands with respect to byte-identical copies of itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateRole {
    #[default]
    Unique,
    Original,
    Duplicate,
}

/// A file discovered under the source root.
///
/// Traversal fills in path, size and modification time. Classification,
/// hashing and duplicate detection fill in the rest before planning.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: RecordId,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub hash: Option<ContentHash>,
    pub category: Option<String>,
    pub role: DuplicateRole,
    pub group: Option<usize>,
    /// Set when the file could not be read while hashing.
    pub unreadable: bool,
}

impl FileRecord {
    pub fn new(id: RecordId, path: PathBuf, size: u64, modified: Option<SystemTime>) -> Self {
        Self {
            id,
            path,
            size,
            modified,
            hash: None,
            category: None,
            role: DuplicateRole::Unique,
            group: None,
            unreadable: false,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Year folder name derived from the modification time, `Unknown` when absent.
    pub fn year_label(&self) -> String {
        year_label(self.modified)
    }
}

pub fn year_label(modified: Option<SystemTime>) -> String {
    match modified {
        Some(time) if time >= SystemTime::UNIX_EPOCH => {
            let local: DateTime<Local> = time.into();
            local.year().to_string()
        }
        _ => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_year_label_from_mtime() {
        // Mid-2021 so the local timezone cannot push it into another year.
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_625_000_000);
        assert_eq!(year_label(Some(time)), "2021");
    }

    #[test]
    fn test_year_label_unknown_without_mtime() {
        assert_eq!(year_label(None), "Unknown");
    }

    #[test]
    fn test_new_record_is_unique() {
        let record = FileRecord::new(RecordId(0), PathBuf::from("/tmp/a.txt"), 3, None);
        assert_eq!(record.role, DuplicateRole::Unique);
        assert_eq!(record.file_name(), Some("a.txt"));
        assert!(record.hash.is_none());
    }
}
