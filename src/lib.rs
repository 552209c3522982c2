//! dirsort - reorganize a directory tree by file category
//!
//! This library scans a directory tree, classifies files by extension, finds
//! byte-identical duplicates, optionally backs up everything it is about to
//! move, and then moves or copies files into a category (optionally
//! year-partitioned) layout. Every copy is verified before a source is removed,
//! and the whole run is summarized in a serializable [`Report`].
//!
//! ```no_run
//! use dirsort::{JobConfig, Orchestrator};
//!
//! let report = Orchestrator::new()
//!     .run("/home/user/Downloads", "/home/user/Downloads", JobConfig::default())
//!     .expect("job failed");
//! println!("moved {} files", report.counts.moved);
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod content_hash;
pub mod duplicates;
pub mod error;
pub mod executor;
pub mod file_category;
pub mod job;
pub mod logging;
pub mod output;
pub mod plan;
pub mod record;
pub mod report;
pub mod scanner;

pub use backup::{BackupEntry, BackupManager, BackupSnapshot, RestoreReport};
pub use config::{
    CategoryRule, CategoryTable, CompiledFilters, DEFAULT_EXCLUDED_DIRS, FilterRules, JobConfig,
    OperationMode, OrganizationMode,
};
pub use content_hash::{ContentHash, hash_file};
pub use duplicates::{DuplicateDetector, DuplicateGroup};
pub use error::{BackupError, ConfigError, FileErrorKind, JobError, JobResult};
pub use executor::{Executor, StdTransfer, Transfer};
pub use file_category::{Category, CategoryMatcher, Classifier};
pub use job::{
    CancelToken, JobHandle, JobState, Orchestrator, Progress, ProgressSink, SilentProgress,
};
pub use plan::{Action, OperationPlan, PlanBuilder, PlanEntry, PlanReason};
pub use record::{DuplicateRole, FileRecord, RecordId};
pub use report::{DuplicateStats, OperationResult, Outcome, Report, ReportCounts};
pub use scanner::{ScanEntry, ScanOptions, Scanner, SymlinkPolicy};

pub use cli::{Cli, run_cli};
pub use logging::{LogFormat, init_logging, log_dispatch};
