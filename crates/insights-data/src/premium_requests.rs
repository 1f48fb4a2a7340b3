//! Row type for the premium request billing export, plus the segment
//! backfill applied after load.

use std::collections::HashMap;

use chrono::NaiveDate;
use insights_core::error::Result;
use insights_core::models::{AmountColumn, DatasetKind};
use insights_core::time_utils::Month;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::dataset::{CsvRow, Dataset, Record};
use crate::reader::RawRecord;

/// Label given to rows whose segment cannot be recovered.
pub const UNASSIGNED_SEGMENT: &str = "Unassigned";

pub const COL_REQUEST_DATE: &str = "request_date";
pub const COL_ENTERPRISE: &str = "enterprise";
pub const COL_MODEL: &str = "model";
pub const COL_QUANTITY: &str = "quantity";
pub const COL_GROSS: &str = "gross_amount";
pub const COL_DISCOUNT: &str = "discount_amount";
pub const COL_NET: &str = "net_amount";
pub const COL_MFCGD_ID: &str = "mfcgd_id";
pub const COL_IS_EMPLOYEE: &str = "is_employee";
pub const COL_SEGMENT: &str = "segment";
pub const COL_COLLECTION_DATE: &str = "collection_date";
pub const COL_GH_ID: &str = "gh_id";
pub const COL_EXCEEDS_QUOTA: &str = "exceeds_quota";

/// One billed premium request line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PremiumRow {
    pub request_date: NaiveDate,
    pub month: Month,
    pub enterprise: String,
    pub model: String,
    pub quantity: Decimal,
    pub gross_amount: Decimal,
    pub discount_amount: Decimal,
    pub net_amount: Decimal,
    /// Pseudonymous user identifier.
    pub mfcgd_id: String,
    pub is_employee: bool,
    /// Empty only between load and backfill.
    pub segment: String,
    pub collection_date: Option<NaiveDate>,
    pub gh_id: Option<String>,
    pub exceeds_quota: Option<bool>,
}

impl PremiumRow {
    pub fn amount(&self, column: AmountColumn) -> Decimal {
        match column {
            AmountColumn::NetAmount => self.net_amount,
            AmountColumn::GrossAmount => self.gross_amount,
            AmountColumn::DiscountAmount => self.discount_amount,
            AmountColumn::Quantity => self.quantity,
        }
    }
}

impl Record for PremiumRow {
    fn segment(&self) -> &str {
        &self.segment
    }

    fn month(&self) -> Month {
        self.month
    }

    fn date(&self) -> NaiveDate {
        self.request_date
    }

    fn is_employee(&self) -> Option<bool> {
        Some(self.is_employee)
    }

    fn enterprise(&self) -> Option<&str> {
        Some(&self.enterprise)
    }

    fn model(&self) -> Option<&str> {
        Some(&self.model)
    }
}

impl CsvRow for PremiumRow {
    const KIND: DatasetKind = DatasetKind::PremiumRequests;
    const REQUIRED: &'static [&'static str] = &[
        COL_REQUEST_DATE,
        COL_ENTERPRISE,
        COL_MODEL,
        COL_QUANTITY,
        COL_GROSS,
        COL_DISCOUNT,
        COL_NET,
        COL_MFCGD_ID,
        COL_IS_EMPLOYEE,
        COL_SEGMENT,
    ];
    const OPTIONAL: &'static [&'static str] =
        &[COL_COLLECTION_DATE, COL_GH_ID, COL_EXCEEDS_QUOTA];

    fn from_record(record: &RawRecord<'_>) -> Result<Self> {
        let request_date = record.date(COL_REQUEST_DATE)?;
        Ok(Self {
            request_date,
            month: Month::of(request_date),
            enterprise: record.text(COL_ENTERPRISE)?,
            model: record.text(COL_MODEL)?,
            quantity: record.decimal(COL_QUANTITY)?,
            gross_amount: record.decimal(COL_GROSS)?,
            discount_amount: record.decimal(COL_DISCOUNT)?,
            net_amount: record.decimal(COL_NET)?,
            mfcgd_id: record.text(COL_MFCGD_ID)?,
            is_employee: record.boolean(COL_IS_EMPLOYEE)?,
            // The column is required, the cell is not: backfill fills gaps.
            segment: record.opt_text(COL_SEGMENT).unwrap_or_default(),
            collection_date: record.opt_date(COL_COLLECTION_DATE),
            gh_id: record.opt_text(COL_GH_ID),
            exceeds_quota: record.opt_boolean(COL_EXCEEDS_QUOTA),
        })
    }
}

// ── Segment backfill ──────────────────────────────────────────────────────────

/// Outcome counts of [`backfill_segments`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillStats {
    pub backfilled: usize,
    pub unassigned: usize,
}

/// Fill missing segment labels and align spellings with the adoption export.
///
/// 1. An empty segment takes the label of another row with the same
///    `mfcgd_id` in the same month.
/// 2. When `canonical` labels are given, a label matching one of them
///    case-insensitively is rewritten to that spelling.
/// 3. Rows still without a label become [`UNASSIGNED_SEGMENT`].
pub fn backfill_segments(rows: &mut [PremiumRow], canonical: Option<&[String]>) -> BackfillStats {
    let mut known: HashMap<(String, Month), String> = HashMap::new();
    for row in rows.iter().filter(|r| !r.segment.is_empty()) {
        known
            .entry((row.mfcgd_id.clone(), row.month))
            .or_insert_with(|| row.segment.clone());
    }

    let canonical: HashMap<String, &str> = canonical
        .unwrap_or_default()
        .iter()
        .map(|label| (label.to_lowercase(), label.as_str()))
        .collect();

    let mut stats = BackfillStats::default();
    for row in rows.iter_mut() {
        if row.segment.is_empty() {
            if let Some(label) = known.get(&(row.mfcgd_id.clone(), row.month)) {
                row.segment = label.clone();
                stats.backfilled += 1;
            }
        }

        if row.segment.is_empty() {
            row.segment = UNASSIGNED_SEGMENT.to_string();
            stats.unassigned += 1;
        } else if let Some(label) = canonical.get(&row.segment.to_lowercase()) {
            if row.segment != *label {
                row.segment = label.to_string();
            }
        }
    }

    debug!(
        backfilled = stats.backfilled,
        unassigned = stats.unassigned,
        "premium segment backfill"
    );
    stats
}

/// Apply [`backfill_segments`] to a freshly read dataset and record the counts.
pub(crate) fn apply_backfill(dataset: &mut Dataset<PremiumRow>, canonical: Option<&[String]>) {
    let stats = backfill_segments(dataset.rows_mut(), canonical);
    let report = dataset.report_mut();
    report.segments_backfilled = stats.backfilled;
    report.segments_unassigned = stats.unassigned;
}
