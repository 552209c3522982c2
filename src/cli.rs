//! Command-line interface for dirsort.
//!
//! This module handles all CLI-related functionality including:
//! - Argument parsing
//! - Building a job configuration from a config file and flags
//! - Running an organize job with live progress
//! - Restoring and listing backup snapshots

use crate::backup::BackupManager;
use crate::config::{JobConfig, OperationMode, OrganizationMode};
use crate::error::ConfigError;
use crate::job::Orchestrator;
use crate::logging::{LogFormat, log_dispatch};
use crate::output::{OutputFormatter, ProgressDisplay};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

/// Sort a directory tree into category folders, with duplicate detection,
/// verified moves and optional backups.
#[derive(Debug, Parser)]
#[command(name = "dirsort", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Log debug events (overridden by DIRSORT_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Organize the files under a directory.
    Organize(OrganizeArgs),
    /// Copy the files of a backup snapshot back to where they came from.
    Restore {
        /// Snapshot directory (the one holding manifest.json).
        snapshot: PathBuf,
    },
    /// List committed snapshots under a backup root.
    Snapshots {
        backup_root: PathBuf,
    },
}

#[derive(Debug, Args)]
pub struct OrganizeArgs {
    /// Directory to organize.
    pub source: PathBuf,

    /// Where category folders are created. Defaults to the source directory.
    #[arg(long)]
    pub dest: Option<PathBuf>,

    /// Copy files instead of moving them.
    #[arg(long)]
    pub copy: bool,

    /// Add a year folder under each category.
    #[arg(long)]
    pub by_year: bool,

    /// Leave duplicates in place instead of moving them to Duplicates/.
    #[arg(long)]
    pub skip_duplicates: bool,

    /// Back up every file before it is moved.
    #[arg(long)]
    pub backup: bool,

    /// Show what would happen without touching anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Configuration file (TOML).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Worker threads for hashing and file operations.
    #[arg(long)]
    pub workers: Option<usize>,
}

impl OrganizeArgs {
    /// Load the configuration file (if any) and apply flags on top.
    ///
    /// Flags only ever switch options on; they can't undo what the file sets.
    pub fn job_config(&self) -> Result<JobConfig, ConfigError> {
        let mut config = JobConfig::load(self.config.as_deref())?;
        if self.copy {
            config.operation_mode = OperationMode::Copy;
        }
        if self.by_year {
            config.organization_mode = OrganizationMode::CategoryYear;
        }
        config.skip_duplicates |= self.skip_duplicates;
        config.backup_enabled |= self.backup;
        config.dry_run |= self.dry_run;
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        Ok(config)
    }
}

/// Runs the CLI application with parsed arguments.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use dirsort::cli::{Cli, run_cli};
///
/// let cli = Cli::parse_from(["dirsort", "organize", "/path/to/directory", "--dry-run"]);
/// if let Err(e) = run_cli(cli) {
///     eprintln!("Error: {}", e);
/// }
/// ```
pub fn run_cli(cli: Cli) -> Result<(), String> {
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    let level = if cli.verbose { "debug" } else { "warn" };

    match cli.command {
        Command::Organize(args) => organize(&args, format, level),
        Command::Restore { snapshot } => restore(&snapshot),
        Command::Snapshots { backup_root } => list_snapshots(&backup_root),
    }
}

fn organize(args: &OrganizeArgs, format: LogFormat, level: &str) -> Result<(), String> {
    let config = args
        .job_config()
        .map_err(|e| format!("Error loading configuration: {}", e))?;
    let dest = args.dest.clone().unwrap_or_else(|| args.source.clone());
    let dry_run = config.dry_run;

    if !args.json {
        OutputFormatter::info(&format!("Organizing contents of: {}", args.source.display()));
        if dry_run {
            OutputFormatter::dry_run_notice("No files will be moved, copied or backed up");
        }
    }

    let display = Arc::new(ProgressDisplay::new(args.json));
    let orchestrator = Orchestrator::new()
        .with_progress(display.clone())
        .with_dispatch(log_dispatch(format, level));

    let result = orchestrator
        .start(&args.source, &dest, config)
        .and_then(|handle| handle.result());
    display.finish();
    let report = result.map_err(|e| e.to_string())?;

    if args.json {
        let json = report
            .to_json()
            .map_err(|e| format!("Could not encode report: {}", e))?;
        println!("{}", json);
    } else {
        OutputFormatter::report_summary(&report);
    }

    if report.counts.errors > 0 {
        return Err(format!("{} file(s) could not be organized", report.counts.errors));
    }
    Ok(())
}

fn restore(snapshot: &std::path::Path) -> Result<(), String> {
    OutputFormatter::info(&format!("Restoring snapshot: {}", snapshot.display()));
    let report = BackupManager::restore(snapshot).map_err(|e| e.to_string())?;

    if report.is_complete_success() {
        OutputFormatter::success(&format!("Restored {} file(s)", report.restored));
    } else {
        OutputFormatter::warning(&format!(
            "Restored {} file(s), skipped {}, failed {}",
            report.restored,
            report.skipped.len(),
            report.failed.len()
        ));
        for (path, reason) in report.skipped.iter().chain(&report.failed) {
            OutputFormatter::error(&format!("{}: {}", path.display(), reason));
        }
    }
    for (original, aside) in &report.set_aside {
        OutputFormatter::plain(&format!(
            "  {} was in the way, kept as {}",
            original.display(),
            aside.display()
        ));
    }

    if report.failed.is_empty() {
        Ok(())
    } else {
        Err("Some files could not be restored".to_string())
    }
}

fn list_snapshots(backup_root: &std::path::Path) -> Result<(), String> {
    let snapshots = BackupManager::new(backup_root)
        .list_snapshots()
        .map_err(|e| e.to_string())?;

    if snapshots.is_empty() {
        OutputFormatter::info(&format!("No snapshots under {}", backup_root.display()));
        return Ok(());
    }

    OutputFormatter::header("SNAPSHOTS");
    for snapshot in &snapshots {
        OutputFormatter::plain(&format!(
            "{}  {}  {} file(s), {} bytes",
            snapshot.id,
            snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            snapshot.entries.len(),
            snapshot.total_bytes()
        ));
    }
    Ok(())
}
