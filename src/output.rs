//! Output formatting and styling module.
//!
//! Provides a centralized interface for all CLI output, including colored output,
//! progress tracking, and the report summary. Library code never prints; only
//! the CLI goes through here.

use crate::job::{JobState, Progress, ProgressSink};
use crate::report::{Outcome, Report};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;

/// Manages all CLI output with consistent styling and formatting.
///
/// This struct provides methods for:
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - Info messages (cyan)
/// - Summary tables for job reports
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use dirsort::output::OutputFormatter;
    /// OutputFormatter::success("File organized successfully!");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Prints a summary table with file counts by category.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use dirsort::output::OutputFormatter;
    /// use std::collections::BTreeMap;
    ///
    /// let mut counts = BTreeMap::new();
    /// counts.insert("Documents".to_string(), 15);
    /// counts.insert("Images".to_string(), 8);
    /// OutputFormatter::summary_table(&counts, 23);
    /// ```
    pub fn summary_table(category_counts: &BTreeMap<String, usize>, total_files: usize) {
        Self::header("SUMMARY");

        let width = category_counts
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max(8);

        println!(
            "{:<width$} | {}",
            "Category".bold(),
            "Files".bold(),
            width = width
        );
        println!("{}", "-".repeat(width + 10));

        for (category, count) in category_counts {
            println!(
                "{:<width$} | {} {}",
                category,
                count.to_string().green(),
                plural(*count),
                width = width
            );
        }

        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            plural(total_files),
            width = width
        );
    }

    /// Prints the outcome of a job: category table, counts, duplicates and failures.
    pub fn report_summary(report: &Report) {
        let organized: usize = report.categories.values().sum();
        Self::summary_table(&report.categories, organized);

        let counts = &report.counts;
        println!();
        println!(
            "{} moved, {} copied, {} skipped, {} duplicate(s), {} error(s)",
            counts.moved.to_string().green(),
            counts.copied.to_string().green(),
            counts.skipped.to_string().yellow(),
            counts.duplicates.to_string().cyan(),
            if counts.errors > 0 {
                counts.errors.to_string().red()
            } else {
                counts.errors.to_string().normal()
            }
        );

        let stats = &report.duplicate_stats;
        if stats.groups > 0 {
            Self::info(&format!(
                "{} duplicate group(s), {} bytes held by duplicates",
                stats.groups, stats.wasted_bytes
            ));
        }

        if let Some(manifest) = &report.backup_manifest {
            Self::info(&format!("Backup manifest: {}", manifest.display()));
        }

        let failures: Vec<_> = report.failures().collect();
        if !failures.is_empty() {
            Self::header("FAILURES");
            for failure in failures {
                let kind = failure.error.map(|k| k.as_str()).unwrap_or("error");
                Self::error(&format!(
                    "{} [{}] {}",
                    failure.source.display(),
                    kind,
                    failure.message.as_deref().unwrap_or("")
                ));
            }
        }

        let unreadable = report
            .results
            .iter()
            .filter(|r| r.outcome == Outcome::Skipped && r.error.is_some())
            .count();
        if unreadable > 0 {
            Self::warning(&format!("{} unreadable file(s) were skipped", unreadable));
        }

        match report.state {
            JobState::Cancelled => Self::warning("Job cancelled; the report covers completed work only"),
            _ if report.dry_run => Self::dry_run_notice("Nothing was changed"),
            _ if counts.errors == 0 => Self::success("Organization complete"),
            _ => Self::warning("Organization finished with errors"),
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

/// Progress bar fed by job events.
pub struct ProgressDisplay {
    bar: ProgressBar,
}

impl ProgressDisplay {
    /// A hidden display swallows every event.
    pub fn new(hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░")
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {pos} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

impl ProgressSink for ProgressDisplay {
    fn on_state(&self, state: JobState) {
        self.bar.set_message(state.to_string());
        if state == JobState::Scanning {
            self.bar.set_style(Self::spinner_style());
        }
    }

    fn on_progress(&self, progress: &Progress) {
        match progress.files_total {
            Some(total) => {
                if self.bar.length() != Some(total) {
                    self.bar.set_style(Self::bar_style());
                    self.bar.set_length(total);
                }
                self.bar.set_position(progress.files_completed);
            }
            None => self.bar.set_position(progress.files_completed),
        }
        if let Some(path) = progress.current_path.as_ref().and_then(|p| p.file_name()) {
            self.bar
                .set_message(format!("{} {}", progress.state, path.to_string_lossy()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_plural() {
        assert_eq!(plural(1), "file");
        assert_eq!(plural(0), "files");
        assert_eq!(plural(3), "files");
    }

    #[test]
    fn test_hidden_display_tracks_totals() {
        let display = ProgressDisplay::new(true);
        display.on_state(JobState::Executing);
        display.on_progress(&Progress {
            state: JobState::Executing,
            files_completed: 2,
            files_total: Some(5),
            current_path: Some(PathBuf::from("/src/a.txt")),
        });

        assert_eq!(display.bar.length(), Some(5));
        assert_eq!(display.bar.position(), 2);
        display.finish();
    }
}
