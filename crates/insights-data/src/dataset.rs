//! Loaded, immutable datasets and the traits their row types implement.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use insights_core::error::Result;
use insights_core::models::{DatasetKind, DatasetVersion};
use insights_core::time_utils::Month;
use serde::Serialize;

use crate::reader::RawRecord;

// ── Row traits ────────────────────────────────────────────────────────────────

/// Accessors the filter layer needs from a typed row.
///
/// Fields a dataset does not carry return `None`, which makes any filter on
/// them match nothing.
pub trait Record {
    fn segment(&self) -> &str;
    fn month(&self) -> Month;
    /// Date used by `date_range` (first day of the month for monthly rows).
    fn date(&self) -> NaiveDate;

    fn is_employee(&self) -> Option<bool> {
        None
    }

    fn enterprise(&self) -> Option<&str> {
        None
    }

    fn model(&self) -> Option<&str> {
        None
    }
}

/// A row type that can be built from one CSV record.
pub trait CsvRow: Record + Sized {
    const KIND: DatasetKind;
    /// Normalized header names that must be present.
    const REQUIRED: &'static [&'static str];
    /// Normalized header names that may be absent.
    const OPTIONAL: &'static [&'static str];

    /// Build a row; an `Err` excludes the record from the dataset.
    fn from_record(record: &RawRecord<'_>) -> Result<Self>;
}

// ── LoadReport ────────────────────────────────────────────────────────────────

/// A record dropped during load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedRow {
    /// 1-based line number in the source file.
    pub line: u64,
    pub column: Option<String>,
    pub reason: String,
}

/// What happened while turning a CSV file into rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Data records read (header excluded).
    pub rows_read: usize,
    pub excluded: Vec<ExcludedRow>,
    pub duplicates_removed: usize,
    /// Rows whose segment label was filled in from a sibling row.
    pub segments_backfilled: usize,
    /// Rows that received the `Unassigned` segment label.
    pub segments_unassigned: usize,
}

impl LoadReport {
    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }
}

// ── Dataset ───────────────────────────────────────────────────────────────────

/// An immutable, fully-normalized table plus its load metadata.
#[derive(Debug, Clone)]
pub struct Dataset<R> {
    rows: Vec<R>,
    capabilities: BTreeSet<String>,
    report: LoadReport,
    version: DatasetVersion,
}

impl<R> Dataset<R> {
    pub fn new(
        rows: Vec<R>,
        capabilities: BTreeSet<String>,
        report: LoadReport,
        version: DatasetVersion,
    ) -> Self {
        Self {
            rows,
            capabilities,
            report,
            version,
        }
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `true` when the header carried the optional column `name`.
    pub fn has_column(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }

    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn version(&self) -> &DatasetVersion {
        &self.version
    }

    /// Post-load fix-ups (segment backfill) before the dataset is shared.
    pub(crate) fn rows_mut(&mut self) -> &mut Vec<R> {
        &mut self.rows
    }

    pub(crate) fn report_mut(&mut self) -> &mut LoadReport {
        &mut self.report
    }

    /// Distinct values of a text field, sorted.
    pub fn distinct<'a, F>(&'a self, field: F) -> Vec<String>
    where
        F: Fn(&'a R) -> Option<&'a str>,
    {
        self.rows
            .iter()
            .filter_map(field)
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl<R: Record> Dataset<R> {
    /// Distinct segment labels, sorted.
    pub fn segments(&self) -> Vec<String> {
        self.distinct(|row| Some(row.segment()))
    }

    /// Earliest and latest month present.
    pub fn month_span(&self) -> Option<(Month, Month)> {
        let min = self.rows.iter().map(Record::month).min()?;
        let max = self.rows.iter().map(Record::month).max()?;
        Some((min, max))
    }
}
