//! Directory traversal.
//!
//! [`Scanner::walk`] yields files lazily in canonical order (path components
//! compared bytewise, the same order as `Path`'s `Ord`), independent of the
//! order the platform returns directory entries in. Entries that can't be
//! read are yielded as [`ScanEntry::Unreadable`] and the walk carries on.

use crate::config::CompiledFilters;
use crate::job::CancelToken;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// What to do with symbolic links found under the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymlinkPolicy {
    /// Symlinks are ignored entirely.
    #[default]
    Skip,
    /// Symlinks are followed; each real directory and file is visited once.
    Follow,
}

/// Traversal settings.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Directory names (case-insensitive) that are never descended into.
    pub excluded_dirs: Vec<String>,
    /// Absolute paths that are never descended into.
    pub excluded_paths: Vec<PathBuf>,
    pub symlinks: SymlinkPolicy,
    pub filters: CompiledFilters,
}

/// A single traversal result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEntry {
    File {
        path: PathBuf,
        size: u64,
        modified: Option<SystemTime>,
    },
    Unreadable {
        path: PathBuf,
        reason: String,
    },
}

impl ScanEntry {
    pub fn path(&self) -> &Path {
        match self {
            Self::File { path, .. } | Self::Unreadable { path, .. } => path,
        }
    }
}

/// Walks one source root.
pub struct Scanner {
    root: PathBuf,
    options: ScanOptions,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, options: ScanOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a fresh walk. Each call restarts from the root.
    pub fn walk(&self, cancel: CancelToken) -> ScanIter<'_> {
        let follow = self.options.symlinks == SymlinkPolicy::Follow;
        let excluded_names: Vec<String> = self
            .options
            .excluded_dirs
            .iter()
            .map(|name| name.to_lowercase())
            .collect();
        let excluded_paths = self.options.excluded_paths.clone();
        let mut visited_dirs: HashSet<PathBuf> = HashSet::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(follow)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                if !entry.file_type().is_dir() {
                    return true;
                }
                if entry.depth() > 0 {
                    let name = entry.file_name().to_string_lossy().to_lowercase();
                    if excluded_names.contains(&name) {
                        debug!(path = %entry.path().display(), "skipping excluded directory");
                        return false;
                    }
                    if excluded_paths.iter().any(|p| entry.path().starts_with(p)) {
                        debug!(path = %entry.path().display(), "skipping excluded path");
                        return false;
                    }
                }
                if follow
                    && let Ok(canonical) = fs::canonicalize(entry.path())
                    && !visited_dirs.insert(canonical)
                {
                    debug!(path = %entry.path().display(), "directory already visited");
                    return false;
                }
                true
            });

        ScanIter {
            inner: Box::new(walker),
            root: &self.root,
            filters: &self.options.filters,
            follow,
            seen_files: HashSet::new(),
            cancel,
            files_seen: 0,
            cancelled: false,
        }
    }
}

/// Lazy traversal over a root. Stops early once the cancel token trips.
pub struct ScanIter<'a> {
    inner: Box<dyn Iterator<Item = walkdir::Result<DirEntry>> + 'a>,
    root: &'a Path,
    filters: &'a CompiledFilters,
    follow: bool,
    seen_files: HashSet<PathBuf>,
    cancel: CancelToken,
    files_seen: u64,
    cancelled: bool,
}

impl ScanIter<'_> {
    /// Number of entries yielded so far.
    pub fn files_seen(&self) -> u64 {
        self.files_seen
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    fn file_entry(&mut self, entry: &DirEntry) -> Option<ScanEntry> {
        let relative = entry.path().strip_prefix(self.root).unwrap_or(entry.path());
        if !self.filters.should_include(relative) {
            debug!(path = %entry.path().display(), "filtered out");
            return None;
        }

        if self.follow
            && let Ok(canonical) = fs::canonicalize(entry.path())
            && !self.seen_files.insert(canonical)
        {
            debug!(path = %entry.path().display(), "file already visited through another link");
            return None;
        }

        match entry.metadata() {
            Ok(metadata) => {
                if !self.filters.accepts_size(metadata.len()) {
                    return None;
                }
                Some(ScanEntry::File {
                    path: entry.path().to_path_buf(),
                    size: metadata.len(),
                    modified: metadata.modified().ok(),
                })
            }
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "unreadable file");
                Some(ScanEntry::Unreadable {
                    path: entry.path().to_path_buf(),
                    reason: err.to_string(),
                })
            }
        }
    }
}

impl Iterator for ScanIter<'_> {
    type Item = ScanEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cancel.is_cancelled() {
                self.cancelled = true;
                return None;
            }

            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    if err.loop_ancestor().is_some() {
                        debug!(error = %err, "skipping symlink cycle");
                        continue;
                    }
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.to_path_buf());
                    warn!(path = %path.display(), error = %err, "unreadable entry");
                    self.files_seen += 1;
                    return Some(ScanEntry::Unreadable {
                        path,
                        reason: err.to_string(),
                    });
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            if let Some(scanned) = self.file_entry(&entry) {
                self.files_seen += 1;
                return Some(scanned);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_EXCLUDED_DIRS, FilterRules};
    use tempfile::TempDir;

    fn options() -> ScanOptions {
        ScanOptions {
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect(),
            excluded_paths: Vec::new(),
            symlinks: SymlinkPolicy::Skip,
            filters: FilterRules::default().compile().unwrap(),
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).expect("Failed to create parent");
        fs::write(path, content).expect("Failed to write file");
    }

    fn walked_paths(scanner: &Scanner) -> Vec<PathBuf> {
        scanner
            .walk(CancelToken::new())
            .map(|entry| entry.path().to_path_buf())
            .collect()
    }

    #[test]
    fn test_walk_is_in_canonical_order() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(root, "b.txt", "b");
        write(root, "a/z.txt", "z");
        write(root, "a.txt", "a");
        write(root, "a/b/c.txt", "c");

        let paths = walked_paths(&Scanner::new(root, options()));
        let mut sorted = paths.clone();
        sorted.sort();

        assert_eq!(paths.len(), 4);
        assert_eq!(paths, sorted);
    }

    #[test]
    fn test_walk_orders_by_component_not_by_string() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(root, "a-b/x.txt", "1");
        write(root, "a.txt", "2");
        write(root, "a/x.txt", "3");

        let paths = walked_paths(&Scanner::new(root, options()));

        // As strings, "a-b/x.txt" < "a.txt" < "a/x.txt".
        assert_eq!(
            paths,
            vec![root.join("a/x.txt"), root.join("a-b/x.txt"), root.join("a.txt")]
        );
    }

    #[test]
    fn test_walk_skips_excluded_dirs_and_paths() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(root, "keep.txt", "k");
        write(root, "node_modules/pkg/index.js", "x");
        write(root, "backups/old.txt", "o");

        let mut opts = options();
        opts.excluded_paths.push(root.join("backups"));
        let paths = walked_paths(&Scanner::new(root, opts));

        assert_eq!(paths, vec![root.join("keep.txt")]);
    }

    #[test]
    fn test_walk_applies_filters() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(root, ".hidden", "h");
        write(root, "big.bin", "0123456789");
        write(root, "small.bin", "0");

        let mut opts = options();
        opts.filters = FilterRules {
            max_size: Some(5),
            ..Default::default()
        }
        .compile()
        .unwrap();
        let paths = walked_paths(&Scanner::new(root, opts));

        assert_eq!(paths, vec![root.join("small.bin")]);
    }

    #[test]
    fn test_walk_reports_size_and_mtime() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        write(temp_dir.path(), "a.txt", "hello");

        let scanner = Scanner::new(temp_dir.path(), options());
        let entries: Vec<_> = scanner.walk(CancelToken::new()).collect();
        match &entries[..] {
            [ScanEntry::File { size, modified, .. }] => {
                assert_eq!(*size, 5);
                assert!(modified.is_some());
            }
            other => panic!("unexpected entries: {:?}", other),
        }
    }

    #[test]
    fn test_walk_stops_when_cancelled() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        write(temp_dir.path(), "a.txt", "a");
        write(temp_dir.path(), "b.txt", "b");

        let token = CancelToken::new();
        let scanner = Scanner::new(temp_dir.path(), options());
        let mut walk = scanner.walk(token.clone());
        assert!(walk.next().is_some());
        token.cancel();
        assert!(walk.next().is_none());
        assert!(walk.was_cancelled());
        assert_eq!(walk.files_seen(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_is_skipped() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(root, "dir/a.txt", "a");
        std::os::unix::fs::symlink(root.join("dir"), root.join("dir/loop"))
            .expect("Failed to create symlink");

        let mut opts = options();
        opts.symlinks = SymlinkPolicy::Follow;
        let paths = walked_paths(&Scanner::new(root, opts));

        assert_eq!(paths, vec![root.join("dir/a.txt")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_ignored_by_default() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(root, "real.txt", "r");
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("link.txt"))
            .expect("Failed to create symlink");

        let paths = walked_paths(&Scanner::new(root, options()));
        assert_eq!(paths, vec![root.join("real.txt")]);
    }
}
