//! Error types for the reorganization pipeline.
//!
//! Only [`JobError`] ever stops a job. Everything that goes wrong with a single
//! file is folded into a [`FileErrorKind`] and lands in the report instead.

use serde::Serialize;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that invalidate a configuration or a computed plan.
///
/// These are always raised before the first filesystem mutation of a job.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    /// IO error while reading configuration.
    #[error("io error reading configuration {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Invalid glob pattern provided.
    #[error("invalid glob pattern '{pattern}'")]
    InvalidGlobPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    /// Invalid regex pattern provided.
    #[error("invalid regex pattern '{pattern}'")]
    InvalidRegexPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    /// A field failed validation.
    #[error("invalid value for {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
    /// Two plan entries still share a destination after collision resolution.
    #[error("plan destination {} is assigned to more than one file", .0.display())]
    DestinationCollision(PathBuf),
}

/// Failures while taking a backup snapshot. Any of these aborts the job.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup {operation} failed for {}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("backup manifest {} is unreadable or invalid", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("backup source {} is outside the source root", .0.display())]
    OutsideRoot(PathBuf),
    #[error("backup interrupted by cancellation")]
    Cancelled,
}

/// Fatal job errors. A job that ends with one of these produces no report.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    /// Another job is already running against the same source root.
    #[error("a job is already running for {}", root.display())]
    Conflict { root: PathBuf },
    /// The source or destination root could not be resolved.
    #[error("invalid root {}", path.display())]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The job thread died before producing a result.
    #[error("job worker failed: {reason}")]
    Worker { reason: String },
}

/// Result type for whole-job operations.
pub type JobResult<T> = Result<T, JobError>;

/// What went wrong with a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileErrorKind {
    /// The file could not be read during traversal or hashing.
    Unreadable,
    /// Copied bytes did not match the source.
    Integrity,
    PermissionDenied,
    StorageFull,
    NotFound,
    /// Something appeared at the destination after planning.
    DestinationExists,
    Io,
}

impl FileErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreadable => "unreadable",
            Self::Integrity => "integrity_error",
            Self::PermissionDenied => "permission_denied",
            Self::StorageFull => "storage_full",
            Self::NotFound => "not_found",
            Self::DestinationExists => "destination_exists",
            Self::Io => "io_error",
        }
    }
}

impl From<&io::Error> for FileErrorKind {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::AlreadyExists => Self::DestinationExists,
            io::ErrorKind::StorageFull => Self::StorageFull,
            _ => Self::Io,
        }
    }
}

impl std::fmt::Display for FileErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
