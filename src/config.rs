//! Job configuration and file filtering rules.
//!
//! A [`JobConfig`] is a plain value handed to the orchestrator. It can be built in
//! code or loaded from a TOML file:
//!
//! ```toml
//! operation_mode = "move"
//! organization_mode = "category_year"
//! skip_duplicates = false
//! backup_enabled = true
//! dry_run = false
//!
//! [category_table]
//! fallback = "Other"
//!
//! [[category_table.categories]]
//! name = "Images"
//! patterns = ["jpg", "png", "IMG_*"]
//!
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = [".DS_Store", "Thumbs.db"]
//! patterns = ["*.tmp"]
//! ```
//!
//! Every value is checked by [`JobConfig::validate`] before any stage runs.

use crate::error::ConfigError;
use crate::file_category::Classifier;
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory names never descended into unless the configuration says otherwise.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
    ".pytest_cache",
    ".mypy_cache",
];

/// Name of the backup directory created under the source root by default.
pub const DEFAULT_BACKUP_DIR: &str = ".dirsort_backups";

/// Placeholders accepted inside a category destination template.
pub const TEMPLATE_PLACEHOLDERS: &[&str] = &["category", "year"];

/// Whether files are moved or copied into the organized layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    #[default]
    Move,
    Copy,
}

/// How destination folders are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationMode {
    /// `<dest>/<category>/<file>`
    #[default]
    Category,
    /// `<dest>/<category>/<year>/<file>`
    CategoryYear,
}

impl OrganizationMode {
    /// Template used for categories that don't carry their own.
    pub fn default_template(&self) -> &'static str {
        match self {
            Self::Category => "{category}",
            Self::CategoryYear => "{category}/{year}",
        }
    }
}

/// One row of the category table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Category name, also used as its folder name.
    pub name: String,
    /// Extensions (`"jpg"`, `".jpg"`) or file-name globs (`"IMG_*"`).
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Destination template relative to the destination root.
    #[serde(default)]
    pub template: Option<String>,
}

impl CategoryRule {
    pub fn new(name: &str, patterns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            template: None,
        }
    }
}

/// Ordered category rules; the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTable {
    #[serde(default)]
    pub categories: Vec<CategoryRule>,
    /// Category assigned when no rule matches.
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

fn default_fallback() -> String {
    "Other".to_string()
}

impl Default for CategoryTable {
    fn default() -> Self {
        let categories = vec![
            CategoryRule::new(
                "Images",
                &[
                    "jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp", "svg", "ico",
                    "heic", "heif", "raw", "cr2", "nef", "arw", "dng", "orf", "psd",
                ],
            ),
            CategoryRule::new(
                "Videos",
                &[
                    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "3gp",
                    "ogv",
                ],
            ),
            CategoryRule::new(
                "Documents",
                &[
                    "pdf", "doc", "docx", "txt", "rtf", "odt", "tex", "wpd", "md", "markdown",
                ],
            ),
            CategoryRule::new(
                "Spreadsheets",
                &["xls", "xlsx", "csv", "ods", "xlsm", "xlsb"],
            ),
            CategoryRule::new("Presentations", &["ppt", "pptx", "odp", "key"]),
            CategoryRule::new(
                "Audio",
                &[
                    "mp3", "wav", "flac", "aac", "ogg", "wma", "m4a", "opus", "aiff", "ape",
                ],
            ),
            CategoryRule::new(
                "Archives",
                &[
                    "zip", "rar", "7z", "tar", "gz", "bz2", "xz", "iso", "dmg", "pkg",
                ],
            ),
            CategoryRule::new(
                "Code",
                &[
                    "py", "js", "java", "cpp", "c", "h", "cs", "php", "rb", "go", "rs", "swift",
                    "kt", "ts", "html", "css", "scss", "sql", "sh", "bat", "ps1", "r", "m",
                    "scala", "lua",
                ],
            ),
            CategoryRule::new(
                "Executables",
                &["exe", "msi", "app", "deb", "rpm", "apk"],
            ),
            CategoryRule::new("Fonts", &["ttf", "otf", "woff", "woff2", "eot"]),
        ];

        Self {
            categories,
            fallback: default_fallback(),
        }
    }
}

/// Everything a job needs to know about how to reorganize a tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub operation_mode: OperationMode,
    pub organization_mode: OrganizationMode,
    /// Leave duplicates where they are instead of redirecting them.
    pub skip_duplicates: bool,
    pub backup_enabled: bool,
    pub dry_run: bool,
    pub category_table: CategoryTable,
    pub filters: FilterRules,
    /// Directory names that are never descended into.
    pub excluded_dirs: Vec<String>,
    pub follow_symlinks: bool,
    /// Upper bound on hashing and executor threads.
    pub workers: usize,
    /// Read size for streamed hashing and copies, in bytes.
    pub chunk_size: usize,
    /// Carry the source modification time over to copies.
    pub preserve_timestamps: bool,
    /// Where backup snapshots are written. Defaults to `<source>/.dirsort_backups`.
    pub backup_root: Option<PathBuf>,
    /// Snapshots kept under the backup root after a new one is committed.
    /// Zero disables pruning.
    pub max_backups: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            operation_mode: OperationMode::default(),
            organization_mode: OrganizationMode::default(),
            skip_duplicates: false,
            backup_enabled: false,
            dry_run: false,
            category_table: CategoryTable::default(),
            filters: FilterRules::default(),
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect(),
            follow_symlinks: false,
            workers: 4,
            chunk_size: 64 * 1024,
            preserve_timestamps: true,
            backup_root: None,
            max_backups: 5,
        }
    }
}

impl JobConfig {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.dirsort.toml` in the current directory
    /// 3. Look for `~/.config/dirsort/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but cannot be read.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(".dirsort.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("dirsort")
                .join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Check every field. Nothing in a job runs until this passes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidField {
                field: "workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidField {
                field: "chunk_size",
                reason: "must be at least 1 byte".to_string(),
            });
        }

        validate_category_name("category_table.fallback", &self.category_table.fallback)?;
        let mut seen = HashSet::new();
        for rule in &self.category_table.categories {
            validate_category_name("category_table.categories.name", &rule.name)?;
            if !seen.insert(rule.name.to_lowercase()) {
                return Err(ConfigError::InvalidField {
                    field: "category_table.categories.name",
                    reason: format!("duplicate category '{}'", rule.name),
                });
            }
            if let Some(template) = &rule.template {
                validate_template(template)?;
            }
        }

        for dir in &self.excluded_dirs {
            if dir.is_empty() {
                return Err(ConfigError::InvalidField {
                    field: "excluded_dirs",
                    reason: "entries must not be empty".to_string(),
                });
            }
        }

        Classifier::from_table(&self.category_table)?;
        self.filters.clone().compile()?;
        Ok(())
    }

    /// Backup root for a given source root.
    pub fn backup_root_for(&self, source_root: &Path) -> PathBuf {
        self.backup_root
            .clone()
            .unwrap_or_else(|| source_root.join(DEFAULT_BACKUP_DIR))
    }
}

fn validate_category_name(field: &'static str, name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::InvalidField {
            field,
            reason: "category names must not be empty".to_string(),
        });
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ConfigError::InvalidField {
            field,
            reason: format!("'{}' is not a valid folder name", name),
        });
    }
    Ok(())
}

/// Check a destination template: relative, no `..`, known placeholders only.
pub fn validate_template(template: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidField {
        field: "category_table.categories.template",
        reason,
    };

    if template.trim().is_empty() {
        return Err(invalid("template must not be empty".to_string()));
    }
    if template.starts_with('/') || template.starts_with('\\') || Path::new(template).is_absolute()
    {
        return Err(invalid(format!("'{}' must be relative", template)));
    }
    if template.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(invalid(format!("'{}' must not contain '..'", template)));
    }

    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| invalid(format!("unclosed placeholder in '{}'", template)))?;
        let name = &after[..close];
        if !TEMPLATE_PLACEHOLDERS.contains(&name) {
            return Err(invalid(format!("unknown placeholder '{{{}}}'", name)));
        }
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err(invalid(format!("stray '}}' in '{}'", template)));
    }
    Ok(())
}

/// File filtering rules applied during traversal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether to include hidden files (starting with "."). Defaults to false.
    #[serde(default)]
    pub enable_hidden_files: bool,

    /// Rules for excluding files.
    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Rules for including files (whitelist, overrides exclude rules).
    #[serde(default)]
    pub include: IncludeRules,

    /// Files smaller than this are left alone.
    #[serde(default)]
    pub min_size: Option<u64>,

    /// Files larger than this are left alone.
    #[serde(default)]
    pub max_size: Option<u64>,
}

/// Rules for excluding files from organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact filenames to exclude (e.g., ".DS_Store", "Thumbs.db").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns matched against the path relative to the source root.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// File extensions to exclude (e.g., "bak", "tmp", "log").
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regex patterns matched against the file name.
    #[serde(default)]
    pub regex: Vec<String>,
}

/// Rules for including files, overriding exclude rules (whitelist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl FilterRules {
    /// Compile rules into matchers.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex or glob patterns are invalid, or if the
    /// size bounds are inverted.
    pub fn compile(self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(self)
    }
}

/// Pre-compiled filter rules.
#[derive(Debug, Clone)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
    min_size: Option<u64>,
    max_size: Option<u64>,
}

impl CompiledFilters {
    fn new(rules: FilterRules) -> Result<Self, ConfigError> {
        if let (Some(min), Some(max)) = (rules.min_size, rules.max_size)
            && min > max
        {
            return Err(ConfigError::InvalidField {
                field: "filters.min_size",
                reason: format!("min_size {} exceeds max_size {}", min, max),
            });
        }

        let exclude_patterns = compile_globs(&rules.exclude.patterns)?;
        let include_patterns = compile_globs(&rules.include.patterns)?;

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.into_iter().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns,
            exclude_regexes,
            include_patterns,
            min_size: rules.min_size,
            max_size: rules.max_size,
        })
    }

    /// Check whether a file (path relative to the source root) is organized.
    ///
    /// Include patterns win over everything; then hidden files, exact names,
    /// extensions, globs and regexes exclude in that order.
    pub fn should_include(&self, relative_path: &Path) -> bool {
        let file_name = relative_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self
            .include_patterns
            .iter()
            .any(|pattern| pattern.matches_path(relative_path))
        {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = relative_path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if self
            .exclude_patterns
            .iter()
            .any(|pattern| pattern.matches_path(relative_path))
        {
            return false;
        }

        !self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
    }

    /// Check the size bounds.
    pub fn accepts_size(&self, size: u64) -> bool {
        self.min_size.is_none_or(|min| size >= min) && self.max_size.is_none_or(|max| size <= max)
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|source| ConfigError::InvalidGlobPattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = JobConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.operation_mode, OperationMode::Move);
        assert_eq!(config.category_table.fallback, "Other");
    }

    #[test]
    fn test_parse_toml_config() {
        let config = JobConfig::from_toml_str(
            r#"
            operation_mode = "copy"
            organization_mode = "category_year"
            skip_duplicates = true
            dry_run = true

            [category_table]
            fallback = "Misc"

            [[category_table.categories]]
            name = "Pictures"
            patterns = [".jpg", "png"]
            template = "Media/{category}/{year}"
            "#,
        )
        .expect("Failed to parse config");

        assert_eq!(config.operation_mode, OperationMode::Copy);
        assert_eq!(config.organization_mode, OrganizationMode::CategoryYear);
        assert!(config.skip_duplicates);
        assert!(config.dry_run);
        assert!(!config.backup_enabled);
        assert_eq!(config.category_table.fallback, "Misc");
        assert_eq!(config.category_table.categories.len(), 1);
        assert_eq!(config.workers, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let result = JobConfig::from_toml_str(r#"operation_mode = "teleport""#);
        assert!(matches!(result, Err(ConfigError::ConfigInvalid(_))));
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let config = JobConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField { field: "workers", .. })
        ));
    }

    #[test]
    fn test_duplicate_category_names_are_rejected() {
        let mut config = JobConfig::default();
        config
            .category_table
            .categories
            .push(CategoryRule::new("images", &["xyz"]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_category_name_with_separator_is_rejected() {
        let mut config = JobConfig::default();
        config.category_table.fallback = "a/b".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_template_validation() {
        assert!(validate_template("{category}/{year}").is_ok());
        assert!(validate_template("Media/{category}").is_ok());
        assert!(validate_template("/abs/{category}").is_err());
        assert!(validate_template("../{category}").is_err());
        assert!(validate_template("{month}").is_err());
        assert!(validate_template("{category").is_err());
        assert!(validate_template("category}").is_err());
    }

    #[test]
    fn test_hidden_file_excluded_by_default() {
        let compiled = FilterRules::default().compile().unwrap();

        assert!(!compiled.should_include(Path::new(".DS_Store")));
        assert!(compiled.should_include(Path::new("photo.jpg")));
    }

    #[test]
    fn test_exclude_extensions_case_insensitive() {
        let rules = FilterRules {
            exclude: ExcludeRules {
                extensions: vec!["bak".to_string(), ".tmp".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let compiled = rules.compile().unwrap();

        assert!(!compiled.should_include(Path::new("file.bak")));
        assert!(!compiled.should_include(Path::new("file.TMP")));
        assert!(compiled.should_include(Path::new("file.txt")));
    }

    #[test]
    fn test_exclude_glob_respects_directory_boundaries() {
        let rules = FilterRules {
            exclude: ExcludeRules {
                patterns: vec!["**/logs/**".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let compiled = rules.compile().unwrap();

        assert!(!compiled.should_include(Path::new("logs/file.txt")));
        assert!(!compiled.should_include(Path::new("app/logs/file.txt")));
        assert!(compiled.should_include(Path::new("my_logs/file.txt")));
    }

    #[test]
    fn test_include_overrides_exclude() {
        let rules = FilterRules {
            include: IncludeRules {
                patterns: vec![".important".to_string()],
            },
            ..Default::default()
        };
        let compiled = rules.compile().unwrap();

        assert!(compiled.should_include(Path::new(".important")));
        assert!(!compiled.should_include(Path::new(".other")));
    }

    #[test]
    fn test_exclude_regex() {
        let rules = FilterRules {
            exclude: ExcludeRules {
                regex: vec![r"^test_.*\.txt$".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let compiled = rules.compile().unwrap();

        assert!(!compiled.should_include(Path::new("test_file.txt")));
        assert!(compiled.should_include(Path::new("file.txt")));
    }

    #[test]
    fn test_invalid_patterns_return_errors() {
        let bad_regex = FilterRules {
            exclude: ExcludeRules {
                regex: vec!["[invalid(".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            bad_regex.compile(),
            Err(ConfigError::InvalidRegexPattern { .. })
        ));

        let bad_glob = FilterRules {
            exclude: ExcludeRules {
                patterns: vec!["[invalid".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            bad_glob.compile(),
            Err(ConfigError::InvalidGlobPattern { .. })
        ));
    }

    #[test]
    fn test_size_bounds() {
        let rules = FilterRules {
            min_size: Some(10),
            max_size: Some(100),
            ..Default::default()
        };
        let compiled = rules.compile().unwrap();
        assert!(!compiled.accepts_size(9));
        assert!(compiled.accepts_size(10));
        assert!(compiled.accepts_size(100));
        assert!(!compiled.accepts_size(101));

        let inverted = FilterRules {
            min_size: Some(100),
            max_size: Some(10),
            ..Default::default()
        };
        assert!(inverted.compile().is_err());
    }

    #[test]
    fn test_backup_root_defaults_under_source() {
        let config = JobConfig::default();
        assert_eq!(
            config.backup_root_for(Path::new("/data")),
            PathBuf::from("/data").join(DEFAULT_BACKUP_DIR)
        );
    }
}
