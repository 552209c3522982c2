//! Duplicate detection.
//!
//! Files are bucketed by size first; only buckets with two or more members are
//! hashed, so a file whose size is unique in the tree is never read. Within a
//! bucket, files are grouped by streamed content hash. The earliest member of
//! each group in canonical order is the original; the rest are duplicates.

use crate::content_hash::{ContentHash, HashError, hash_file};
use crate::job::{CancelToken, Cancelled};
use crate::record::{DuplicateRole, FileRecord, RecordId};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

/// Files sharing size and content hash.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub id: usize,
    #[serde(serialize_with = "serialize_hash")]
    pub hash: ContentHash,
    pub size: u64,
    /// Members in canonical order; the first is the original.
    pub members: Vec<RecordId>,
    pub original: RecordId,
}

impl DuplicateGroup {
    pub fn duplicates(&self) -> &[RecordId] {
        &self.members[1..]
    }

    /// Bytes that would be freed by keeping only the original.
    pub fn wasted_bytes(&self) -> u64 {
        self.size * self.duplicates().len() as u64
    }
}

fn serialize_hash<S: serde::Serializer>(hash: &ContentHash, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(hash.to_hex().as_str())
}

/// Groups records by content.
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    chunk_size: usize,
}

impl DuplicateDetector {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// Assign duplicate roles and group ids in place.
    ///
    /// `records` must be in canonical order with `records[i].id == RecordId(i)`.
    /// Hashing runs on the current rayon pool. Files that fail to hash are
    /// marked unreadable and left out of every group.
    pub fn detect(
        &self,
        records: &mut [FileRecord],
        cancel: &CancelToken,
    ) -> Result<Vec<DuplicateGroup>, Cancelled> {
        self.detect_with_progress(records, cancel, &|_| {})
    }

    /// Like [`detect`](Self::detect), calling `on_analyzed` once per record as
    /// soon as nothing more needs to be read from it. Files with a unique size
    /// are reported up front, the rest as their hashes complete.
    pub fn detect_with_progress(
        &self,
        records: &mut [FileRecord],
        cancel: &CancelToken,
        on_analyzed: &(dyn Fn(&Path) + Sync),
    ) -> Result<Vec<DuplicateGroup>, Cancelled> {
        let mut by_size: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (index, record) in records.iter().enumerate() {
            if !record.unreadable {
                by_size.entry(record.size).or_default().push(index);
            }
        }

        let mut candidates: Vec<usize> = by_size
            .into_values()
            .filter(|bucket| bucket.len() > 1)
            .flatten()
            .collect();
        candidates.sort_unstable();
        for (index, record) in records.iter().enumerate() {
            if candidates.binary_search(&index).is_err() {
                on_analyzed(&record.path);
            }
        }
        debug!(
            candidates = candidates.len(),
            total = records.len(),
            "hashing files that share a size"
        );

        let snapshot: &[FileRecord] = records;
        let hashed: Vec<(usize, Result<ContentHash, HashError>)> = candidates
            .par_iter()
            .map(|&index| {
                let result = if cancel.is_cancelled() {
                    Err(HashError::Cancelled)
                } else {
                    hash_file(&snapshot[index].path, self.chunk_size, cancel)
                };
                if !matches!(result, Err(HashError::Cancelled)) {
                    on_analyzed(&snapshot[index].path);
                }
                (index, result)
            })
            .collect();

        for (index, result) in hashed {
            match result {
                Ok(hash) => records[index].hash = Some(hash),
                Err(HashError::Cancelled) => return Err(Cancelled),
                Err(HashError::Io(err)) => {
                    warn!(path = %records[index].path.display(), error = %err, "failed to hash file");
                    records[index].unreadable = true;
                }
            }
        }

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        let mut group_of: HashMap<(u64, ContentHash), usize> = HashMap::new();
        for index in candidates {
            let record = &records[index];
            let Some(hash) = record.hash else { continue };
            match group_of.get(&(record.size, hash)) {
                Some(&group) => groups[group].members.push(record.id),
                None => {
                    group_of.insert((record.size, hash), groups.len());
                    groups.push(DuplicateGroup {
                        id: groups.len(),
                        hash,
                        size: record.size,
                        members: vec![record.id],
                        original: record.id,
                    });
                }
            }
        }

        let mut groups: Vec<DuplicateGroup> = groups
            .into_iter()
            .filter(|group| group.members.len() > 1)
            .collect();
        for (id, group) in groups.iter_mut().enumerate() {
            group.id = id;
            for (position, member) in group.members.iter().enumerate() {
                let record = &mut records[member.0];
                record.group = Some(id);
                record.role = if position == 0 {
                    DuplicateRole::Original
                } else {
                    DuplicateRole::Duplicate
                };
            }
        }

        info!(
            groups = groups.len(),
            duplicates = groups.iter().map(|g| g.duplicates().len()).sum::<usize>(),
            "duplicate detection complete"
        );
        Ok(groups)
    }
}
