//! Output comparators
//!
//! A comparator decides whether a downloaded output matches its expected
//! file. Comparators are looked up by name in an explicit
//! [`ComparatorRegistry`]; an unknown name is a configuration error.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use difference::{Changeset, Difference};

use crate::common::{Error, Result};

/// Name used when an expected output does not pick a comparator
pub const DEFAULT_COMPARATOR: &str = "default";

/// Lines of a mismatch diff echoed to the log
const DIFF_PREVIEW_LINES: usize = 20;

/// Decimal places kept by [`RoundedCsv`]
const CSV_PRECISION: i32 = 2;

/// Verification predicate over an actual and an expected file
pub trait Comparator: Send + Sync {
    /// `Ok(true)` when `actual` matches `expected`
    fn compare(&self, actual: &Path, expected: &Path) -> Result<bool>;
}

/// Named comparators available to test cases
#[derive(Clone)]
pub struct ComparatorRegistry {
    comparators: BTreeMap<String, Arc<dyn Comparator>>,
}

impl ComparatorRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            comparators: BTreeMap::new(),
        }
    }

    /// A registry holding the built-in comparators
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let line_diff: Arc<dyn Comparator> = Arc::new(LineDiff);
        let exact: Arc<dyn Comparator> = Arc::new(Exact);
        registry.insert(DEFAULT_COMPARATOR, line_diff.clone());
        registry.insert("line_diff", line_diff);
        registry.insert("exact", exact.clone());
        registry.insert("filecmp", exact);
        registry.register("csv_same_row_and_col_lengths", CsvShape);
        registry.register("rounded_comparison_csv", RoundedCsv::default());
        registry
    }

    /// Add or replace a comparator
    pub fn register<C: Comparator + 'static>(&mut self, name: &str, comparator: C) {
        self.insert(name, Arc::new(comparator));
    }

    fn insert(&mut self, name: &str, comparator: Arc<dyn Comparator>) {
        self.comparators.insert(name.to_string(), comparator);
    }

    /// Look up a comparator; `None` selects the default
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn Comparator>> {
        let name = name.unwrap_or(DEFAULT_COMPARATOR);
        self.comparators
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownComparator {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.comparators.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.comparators.keys().map(String::as_str).collect()
    }
}

impl Default for ComparatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ComparatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComparatorRegistry")
            .field("names", &self.names())
            .finish()
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })
}

/// Path of the diff written next to a mismatching output
pub fn diff_path(actual: &Path) -> PathBuf {
    let mut name = actual
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".diff");
    actual.with_file_name(name)
}

/// Line based diff; matches when there are no changed lines
///
/// Files are equal only when their bytes are; the text diff is a preview.
/// On mismatch the diff is written to `<actual>.diff` and its first lines
/// are logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineDiff;

impl LineDiff {
    fn diff_lines(expected: &str, actual: &str) -> Vec<String> {
        let changeset = Changeset::new(expected, actual, "\n");
        let mut lines = Vec::new();
        for diff in &changeset.diffs {
            match diff {
                Difference::Same(_) => {}
                Difference::Rem(x) => lines.extend(x.split('\n').map(|l| format!("-{}", l))),
                Difference::Add(x) => lines.extend(x.split('\n').map(|l| format!("+{}", l))),
            }
        }
        lines
    }
}

impl Comparator for LineDiff {
    fn compare(&self, actual: &Path, expected: &Path) -> Result<bool> {
        let actual_bytes = read_bytes(actual)?;
        let expected_bytes = read_bytes(expected)?;
        if actual_bytes == expected_bytes {
            return Ok(true);
        }
        let actual_text = String::from_utf8_lossy(&actual_bytes);
        let expected_text = String::from_utf8_lossy(&expected_bytes);

        let mut lines = vec![
            format!("--- {}", expected.display()),
            format!("+++ {}", actual.display()),
        ];
        lines.extend(Self::diff_lines(&expected_text, &actual_text));

        let preview = lines
            .iter()
            .take(DIFF_PREVIEW_LINES)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        tracing::info!("Output differs from {}:\n{}\n...", expected.display(), preview);

        let diff_file = diff_path(actual);
        let mut content = lines.join("\n");
        content.push('\n');
        std::fs::write(&diff_file, content)?;
        tracing::debug!("Diff written to {}", diff_file.display());

        Ok(false)
    }
}

/// Byte-for-byte equality
#[derive(Debug, Clone, Copy, Default)]
pub struct Exact;

impl Comparator for Exact {
    fn compare(&self, actual: &Path, expected: &Path) -> Result<bool> {
        let a = std::fs::read(actual)?;
        let e = std::fs::read(expected)?;
        Ok(a == e)
    }
}

fn csv_rows(path: &Path) -> Result<Vec<csv::StringRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

    reader
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })
}

/// Same number of rows, and the same number of columns in every row
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvShape;

impl Comparator for CsvShape {
    fn compare(&self, actual: &Path, expected: &Path) -> Result<bool> {
        let actual_cols: Vec<usize> = csv_rows(actual)?.iter().map(|r| r.len()).collect();
        let expected_cols: Vec<usize> = csv_rows(expected)?.iter().map(|r| r.len()).collect();

        if actual_cols.is_empty() || expected_cols.is_empty() {
            return Ok(false);
        }
        Ok(actual_cols == expected_cols)
    }
}

/// Field by field CSV comparison; numbers are compared after rounding
///
/// Rows are walked over the expected file. Extra actual rows and extra
/// fields beyond the shorter row are not checked.
#[derive(Debug, Clone, Copy)]
pub struct RoundedCsv {
    pub precision: i32,
}

impl Default for RoundedCsv {
    fn default() -> Self {
        Self {
            precision: CSV_PRECISION,
        }
    }
}

impl RoundedCsv {
    fn round(&self, value: f64) -> f64 {
        let factor = 10f64.powi(self.precision);
        (value * factor).round() / factor
    }

    fn fields_match(&self, actual: &str, expected: &str) -> bool {
        match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
            (Ok(a), Ok(e)) if self.round(a) == self.round(e) => true,
            _ => actual == expected,
        }
    }
}

impl Comparator for RoundedCsv {
    fn compare(&self, actual: &Path, expected: &Path) -> Result<bool> {
        let actual_rows = csv_rows(actual)?;
        let expected_rows = csv_rows(expected)?;

        for (idx, expected_row) in expected_rows.iter().enumerate() {
            let Some(actual_row) = actual_rows.get(idx) else {
                tracing::info!("Actual output is shorter than expected output");
                return Ok(false);
            };
            for (a, e) in actual_row.iter().zip(expected_row.iter()) {
                if !self.fields_match(a, e) {
                    tracing::info!(
                        "Difference in row {}: expected field '{}', actual field '{}'",
                        idx + 1,
                        e,
                        a
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
