/// File classification by extension or file-name pattern.
///
/// A [`Classifier`] is compiled once per job from the configured
/// [`CategoryTable`]. Classification is a pure function of the file name: rules
/// are tried in table order, the first match wins, and anything unmatched
/// falls into the fallback category.
///
/// # Examples
///
/// ```
/// use dirsort::config::CategoryTable;
/// use dirsort::file_category::Classifier;
///
/// let classifier = Classifier::from_table(&CategoryTable::default()).unwrap();
/// assert_eq!(classifier.classify("holiday.JPG").name, "Images");
/// assert_eq!(classifier.classify("notes.txt").name, "Documents");
/// assert_eq!(classifier.classify("mystery.xyz").name, "Other");
/// ```
use crate::config::{CategoryTable, OrganizationMode};
use crate::error::ConfigError;
use glob::{MatchOptions, Pattern};

/// How a single table entry matches a file name.
#[derive(Debug, Clone)]
pub enum CategoryMatcher {
    /// Lowercased extension without the leading dot. Multi-part extensions
    /// such as `tar.gz` match as a name suffix.
    Extension(String),
    /// Case-insensitive glob against the file name.
    Glob(Pattern),
}

impl CategoryMatcher {
    /// Parse a table entry. Entries with `*`, `?` or `[` are globs.
    pub fn parse(entry: &str) -> Result<Self, ConfigError> {
        if entry.contains(['*', '?', '[']) {
            let pattern = Pattern::new(entry).map_err(|source| ConfigError::InvalidGlobPattern {
                pattern: entry.to_string(),
                source,
            })?;
            return Ok(Self::Glob(pattern));
        }

        let ext = entry.trim().trim_start_matches('.').to_lowercase();
        if ext.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "category_table.categories.patterns",
                reason: format!("'{}' is not an extension or pattern", entry),
            });
        }
        Ok(Self::Extension(ext))
    }

    fn matches(&self, lower_name: &str) -> bool {
        match self {
            Self::Extension(ext) if ext.contains('.') => lower_name
                .strip_suffix(ext.as_str())
                .is_some_and(|stem| stem.len() > 1 && stem.ends_with('.')),
            Self::Extension(ext) => lower_name
                .rsplit_once('.')
                .is_some_and(|(stem, found)| !stem.is_empty() && found == ext),
            Self::Glob(pattern) => pattern.matches_with(
                lower_name,
                MatchOptions {
                    case_sensitive: false,
                    require_literal_separator: true,
                    require_literal_leading_dot: false,
                },
            ),
        }
    }
}

/// A destination category.
#[derive(Debug, Clone)]
pub struct Category {
    /// Folder name and report label.
    pub name: String,
    pub matchers: Vec<CategoryMatcher>,
    /// Destination template; `None` defers to the organization mode.
    pub template: Option<String>,
}

impl Category {
    /// Template used to build this category's destination folder.
    pub fn template_for<'a>(&'a self, mode: &OrganizationMode) -> &'a str {
        self.template
            .as_deref()
            .unwrap_or_else(|| mode.default_template())
    }
}

/// Compiled, ordered category table.
#[derive(Debug, Clone)]
pub struct Classifier {
    categories: Vec<Category>,
    fallback: Category,
}

impl Classifier {
    /// Compile a category table.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for malformed patterns.
    pub fn from_table(table: &CategoryTable) -> Result<Self, ConfigError> {
        let categories = table
            .categories
            .iter()
            .map(|rule| {
                let matchers = rule
                    .patterns
                    .iter()
                    .map(|p| CategoryMatcher::parse(p))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Category {
                    name: rule.name.clone(),
                    matchers,
                    template: rule.template.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            categories,
            fallback: Category {
                name: table.fallback.clone(),
                matchers: Vec::new(),
                template: None,
            },
        })
    }

    /// Classify a file by name. Never fails; unmatched names get the fallback.
    pub fn classify(&self, file_name: &str) -> &Category {
        let lower = file_name.to_lowercase();
        self.categories
            .iter()
            .find(|category| category.matchers.iter().any(|m| m.matches(&lower)))
            .unwrap_or(&self.fallback)
    }

    /// Look up a category by name, including the fallback.
    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories
            .iter()
            .chain(std::iter::once(&self.fallback))
            .find(|category| category.name == name)
    }

    pub fn fallback(&self) -> &Category {
        &self.fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CategoryRule;

    fn default_classifier() -> Classifier {
        Classifier::from_table(&CategoryTable::default()).expect("Failed to compile table")
    }

    #[test]
    fn test_classify_by_extension() {
        let classifier = default_classifier();
        assert_eq!(classifier.classify("a.txt").name, "Documents");
        assert_eq!(classifier.classify("c.jpg").name, "Images");
        assert_eq!(classifier.classify("song.mp3").name, "Audio");
        assert_eq!(classifier.classify("main.rs").name, "Code");
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        let classifier = default_classifier();
        assert_eq!(classifier.classify("PHOTO.JPEG").name, "Images");
        assert_eq!(classifier.classify("Report.Pdf").name, "Documents");
    }

    #[test]
    fn test_unknown_extension_falls_back() {
        let classifier = default_classifier();
        assert_eq!(classifier.classify("data.xyz").name, "Other");
        assert_eq!(classifier.classify("Makefile").name, "Other");
        assert_eq!(classifier.classify(".bashrc").name, "Other");
    }

    #[test]
    fn test_first_match_wins() {
        let table = CategoryTable {
            categories: vec![
                CategoryRule::new("Scans", &["SCAN_*"]),
                CategoryRule::new("Documents", &["pdf"]),
            ],
            fallback: "Other".to_string(),
        };
        let classifier = Classifier::from_table(&table).unwrap();

        assert_eq!(classifier.classify("scan_001.pdf").name, "Scans");
        assert_eq!(classifier.classify("invoice.pdf").name, "Documents");
    }

    #[test]
    fn test_multi_part_extension() {
        let table = CategoryTable {
            categories: vec![
                CategoryRule::new("Tarballs", &["tar.gz"]),
                CategoryRule::new("Compressed", &["gz"]),
            ],
            fallback: "Other".to_string(),
        };
        let classifier = Classifier::from_table(&table).unwrap();

        assert_eq!(classifier.classify("src.tar.gz").name, "Tarballs");
        assert_eq!(classifier.classify("log.gz").name, "Compressed");
        assert_eq!(classifier.classify(".tar.gz").name, "Compressed");
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = default_classifier();
        for name in ["a.txt", "b.PNG", "c", "d.unknown"] {
            assert_eq!(classifier.classify(name).name, classifier.classify(name).name);
        }
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let table = CategoryTable {
            categories: vec![CategoryRule::new("Broken", &["[abc"])],
            fallback: "Other".to_string(),
        };
        assert!(Classifier::from_table(&table).is_err());

        let empty = CategoryTable {
            categories: vec![CategoryRule::new("Empty", &["."])],
            fallback: "Other".to_string(),
        };
        assert!(Classifier::from_table(&empty).is_err());
    }

    #[test]
    fn test_template_defaults_to_mode() {
        let classifier = default_classifier();
        let images = classifier.category("Images").unwrap();
        assert_eq!(images.template_for(&OrganizationMode::Category), "{category}");
        assert_eq!(
            images.template_for(&OrganizationMode::CategoryYear),
            "{category}/{year}"
        );
        assert!(classifier.category("Other").is_some());
        assert!(classifier.category("Nope").is_none());
    }
}
