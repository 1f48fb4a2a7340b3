//! CSV reading for the exported Copilot datasets.
//!
//! Turns a CSV file into a typed [`Dataset`]: header names are normalized,
//! required columns are checked, every record is normalized cell by cell,
//! records that cannot be decoded or fail on a required field are excluded
//! and reported, and exact duplicates of accepted records are dropped.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use csv::StringRecord;
use insights_core::error::{InsightsError, Result};
use insights_core::models::{DatasetVersion, Value, ValueKind};
use insights_core::normalizer::CellNormalizer;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::dataset::{CsvRow, Dataset, ExcludedRow, LoadReport};

// ── Public API ────────────────────────────────────────────────────────────────

/// Normalize a header cell: strip a BOM, trim, lowercase, spaces → `_`.
///
/// ```
/// use insights_data::reader::normalize_header;
///
/// assert_eq!(normalize_header(" Active users FTE "), "active_users_fte");
/// assert_eq!(normalize_header("total_seats_nonFTE"), "total_seats_nonfte");
/// ```
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Read `path` into a dataset of `R` rows.
///
/// Fails with [`InsightsError::SourceNotFound`] when the path is not a
/// regular file and with [`InsightsError::Schema`] when a required column is
/// missing. Row-level problems never fail the load; they are counted in the
/// dataset's [`LoadReport`].
pub fn read_dataset<R: CsvRow>(path: &Path) -> Result<Dataset<R>> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Err(InsightsError::SourceNotFound(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(InsightsError::SourceNotFound(path.to_path_buf()))
        }
        Err(source) => {
            return Err(InsightsError::FileRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let file = File::open(path).map_err(|source| InsightsError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let csv_err = |source: csv::Error| InsightsError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let headers = reader.headers().map_err(csv_err)?.clone();
    let columns = ColumnIndex::from_headers(&headers);

    let missing: Vec<String> = R::REQUIRED
        .iter()
        .filter(|name| !columns.contains(name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(InsightsError::Schema {
            dataset: R::KIND.display_name(),
            missing,
        });
    }

    let capabilities: BTreeSet<String> = R::OPTIONAL
        .iter()
        .filter(|name| columns.contains(name))
        .map(|name| name.to_string())
        .collect();

    let mut rows: Vec<R> = Vec::new();
    let mut report = LoadReport::default();
    let mut seen: HashSet<Vec<String>> = HashSet::new();

    for result in reader.records() {
        report.rows_read += 1;
        let record = match result {
            Ok(record) => record,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => return Err(csv_err(e)),
            Err(e) => {
                let line = e
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(report.rows_read as u64 + 1);
                debug!(line, error = %e, "excluding unreadable record");
                report.excluded.push(ExcludedRow {
                    line,
                    column: None,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        // Header is line 1, so the first data record is line 2.
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(report.rows_read as u64 + 1);
        let raw = RawRecord {
            columns: &columns,
            record: &record,
            line,
        };

        match R::from_record(&raw) {
            Ok(row) => {
                let fingerprint: Vec<String> =
                    record.iter().map(|c| c.trim().to_string()).collect();
                if seen.insert(fingerprint) {
                    rows.push(row);
                } else {
                    report.duplicates_removed += 1;
                }
            }
            Err(e) => {
                let column = match &e {
                    InsightsError::Normalization { column, .. } => Some(column.clone()),
                    _ => None,
                };
                debug!(line, error = %e, "excluding record");
                report.excluded.push(ExcludedRow {
                    line,
                    column,
                    reason: e.to_string(),
                });
            }
        }
    }

    if !report.excluded.is_empty() {
        warn!(
            path = %path.display(),
            excluded = report.excluded.len(),
            "records excluded during load"
        );
    }
    debug!(
        path = %path.display(),
        dataset = R::KIND.as_str(),
        rows_read = report.rows_read,
        rows = rows.len(),
        duplicates = report.duplicates_removed,
        "CSV loaded"
    );

    let version = DatasetVersion {
        kind: R::KIND,
        source: path.to_path_buf(),
        modified,
        loaded_at: Utc::now(),
        row_count: rows.len(),
    };
    Ok(Dataset::new(rows, capabilities, report, version))
}

// ── ColumnIndex ───────────────────────────────────────────────────────────────

/// Normalized header name → field position. The first occurrence wins.
#[derive(Debug, Default)]
pub struct ColumnIndex {
    positions: HashMap<String, usize>,
}

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> Self {
        let mut positions = HashMap::new();
        for (idx, raw) in headers.iter().enumerate() {
            positions.entry(normalize_header(raw)).or_insert(idx);
        }
        Self { positions }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }
}

// ── RawRecord ─────────────────────────────────────────────────────────────────

/// One CSV record with typed, column-named accessors.
///
/// Required accessors fail on empty or malformed cells; optional accessors
/// return `None` for absent columns, empty cells and unparseable values.
pub struct RawRecord<'a> {
    columns: &'a ColumnIndex,
    record: &'a StringRecord,
    line: u64,
}

impl<'a> RawRecord<'a> {
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Raw cell text, or `None` when the column is absent or the record short.
    pub fn cell(&self, column: &str) -> Option<&'a str> {
        self.columns
            .position(column)
            .and_then(|idx| self.record.get(idx))
    }

    pub fn required(&self, column: &str, kind: ValueKind) -> Result<Value> {
        let raw = self.cell(column).unwrap_or("");
        match CellNormalizer::normalize(column, raw, kind) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(InsightsError::Normalization {
                line: Some(self.line),
                column: column.to_string(),
                value: raw.trim().to_string(),
                expected: "a non-empty value",
            }),
            Err(e) => Err(e.at_line(self.line)),
        }
    }

    pub fn optional(&self, column: &str, kind: ValueKind) -> Option<Value> {
        let raw = self.cell(column)?;
        match CellNormalizer::normalize(column, raw, kind) {
            Ok(value) => value,
            Err(e) => {
                debug!(line = self.line, error = %e, "ignoring malformed optional cell");
                None
            }
        }
    }

    pub fn text(&self, column: &str) -> Result<String> {
        self.required(column, ValueKind::Text)
            .map(|v| v.to_string())
    }

    pub fn integer(&self, column: &str) -> Result<i64> {
        self.required(column, ValueKind::Integer)
            .map(|v| v.as_i64().unwrap_or_default())
    }

    pub fn decimal(&self, column: &str) -> Result<Decimal> {
        self.required(column, ValueKind::Decimal)
            .map(|v| v.as_decimal().unwrap_or_default())
    }

    pub fn boolean(&self, column: &str) -> Result<bool> {
        self.required(column, ValueKind::Boolean)
            .map(|v| v.as_bool().unwrap_or_default())
    }

    pub fn date(&self, column: &str) -> Result<NaiveDate> {
        self.required(column, ValueKind::Date)
            .map(|v| v.as_date().unwrap_or_default())
    }

    pub fn opt_text(&self, column: &str) -> Option<String> {
        self.optional(column, ValueKind::Text).map(|v| v.to_string())
    }

    pub fn opt_integer(&self, column: &str) -> Option<i64> {
        self.optional(column, ValueKind::Integer)
            .and_then(|v| v.as_i64())
    }

    pub fn opt_percent(&self, column: &str) -> Option<f64> {
        self.optional(column, ValueKind::Percent)
            .and_then(|v| v.as_f64())
    }

    pub fn opt_boolean(&self, column: &str) -> Option<bool> {
        self.optional(column, ValueKind::Boolean)
            .and_then(|v| v.as_bool())
    }

    pub fn opt_date(&self, column: &str) -> Option<NaiveDate> {
        self.optional(column, ValueKind::Date)
            .and_then(|v| v.as_date())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment_adoption::AdoptionRow;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write");
        file.flush().expect("flush");
        file
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("Month"), "month");
        assert_eq!(normalize_header("\u{feff}Month"), "month");
        assert_eq!(normalize_header("Active_users_FTE"), "active_users_fte");
        assert_eq!(normalize_header("active  users fte"), "active_users_fte");
    }

    #[test]
    fn test_missing_file_is_source_not_found() {
        let err = read_dataset::<AdoptionRow>(Path::new("/nonexistent/segment.csv")).unwrap_err();
        assert!(matches!(err, InsightsError::SourceNotFound(_)));
    }

    #[test]
    fn test_directory_is_source_not_found() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let err = read_dataset::<AdoptionRow>(dir.path()).unwrap_err();
        assert!(matches!(err, InsightsError::SourceNotFound(_)));
    }

    #[test]
    fn test_missing_required_column_is_schema_error() {
        let file = write_csv("Month,Segment,Active_users_FTE\n2025-01,Asia,80\n");
        let err = read_dataset::<AdoptionRow>(file.path()).unwrap_err();
        match err {
            InsightsError::Schema { missing, .. } => {
                assert_eq!(missing, vec!["total_seats_fte".to_string()]);
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_mixed_case_headers_resolve() {
        let file = write_csv("MONTH, segment ,active users FTE,Total_Seats_FTE\n2025-01,Asia,80,100\n");
        let ds = read_dataset::<AdoptionRow>(file.path()).expect("load");
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.rows()[0].active_fte, 80);
    }

    #[test]
    fn test_bad_required_cell_excludes_row_with_context() {
        let file = write_csv(
            "Month,Segment,Active_users_FTE,total_seats_FTE\n\
             2025-01,Asia,80,100\n\
             2025-02,Asia,lots,100\n\
             2025-03,,85,100\n",
        );
        let ds = read_dataset::<AdoptionRow>(file.path()).expect("load");
        assert_eq!(ds.len(), 1);

        let report = ds.report();
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.excluded_count(), 2);
        assert_eq!(report.excluded[0].line, 3);
        assert_eq!(report.excluded[0].column.as_deref(), Some("active_users_fte"));
        assert_eq!(report.excluded[1].line, 4);
        assert_eq!(report.excluded[1].column.as_deref(), Some("segment"));
    }

    #[test]
    fn test_exact_duplicates_removed_order_preserved() {
        let file = write_csv(
            "Month,Segment,Active_users_FTE,total_seats_FTE\n\
             2025-01,Europe,50,60\n\
             2025-01,Asia,80,100\n\
             2025-01,Europe,50,60\n",
        );
        let ds = read_dataset::<AdoptionRow>(file.path()).expect("load");
        let segments: Vec<&str> = ds.rows().iter().map(|r| r.segment.as_str()).collect();
        assert_eq!(segments, vec!["Europe", "Asia"]);
        assert_eq!(ds.report().duplicates_removed, 1);
    }

    #[test]
    fn test_undecodable_record_is_excluded() {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(b"Month,Segment,Active_users_FTE,total_seats_FTE\n").expect("write");
        file.write_all(b"2025-01,Asia,80,100\n").expect("write");
        file.write_all(b"2025-02,Eur\xffope,90,100\n").expect("write");
        file.write_all(b"2025-03,Asia,85,100\n").expect("write");
        file.flush().expect("flush");

        let ds = read_dataset::<AdoptionRow>(file.path()).expect("load");
        let months: Vec<String> = ds.rows().iter().map(|r| r.month.to_string()).collect();
        assert_eq!(months, vec!["2025-01", "2025-03"]);

        let report = ds.report();
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.excluded_count(), 1);
        assert_eq!(report.excluded[0].line, 3);
        assert_eq!(report.excluded[0].column, None);
    }

    #[test]
    fn test_repeated_invalid_record_counts_as_excluded() {
        let file = write_csv(
            "Month,Segment,Active_users_FTE,total_seats_FTE\n\
             2025-01,Asia,lots,100\n\
             2025-01,Asia,lots,100\n\
             2025-02,Asia,90,100\n",
        );
        let ds = read_dataset::<AdoptionRow>(file.path()).expect("load");
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.report().excluded_count(), 2);
        assert_eq!(ds.report().duplicates_removed, 0);
    }

    #[test]
    fn test_capabilities_track_optional_columns() {
        let file = write_csv(
            "Month,Segment,Active_users_FTE,total_seats_FTE,billing_adoption_FTE\n\
             2025-01,Asia,80,100,75%\n",
        );
        let ds = read_dataset::<AdoptionRow>(file.path()).expect("load");
        assert!(ds.has_column("billing_adoption_fte"));
        assert!(!ds.has_column("active_users_nonfte"));
        assert_eq!(ds.version().row_count, 1);
    }
}
