//! Row type for the monthly segment adoption export.

use chrono::NaiveDate;
use insights_core::error::Result;
use insights_core::models::DatasetKind;
use insights_core::time_utils::Month;
use serde::Serialize;

use crate::dataset::{CsvRow, Record};
use crate::reader::RawRecord;

pub const COL_MONTH: &str = "month";
pub const COL_SEGMENT: &str = "segment";
pub const COL_ACTIVE_FTE: &str = "active_users_fte";
pub const COL_SEATS_FTE: &str = "total_seats_fte";
pub const COL_ACTIVE_NON_FTE: &str = "active_users_nonfte";
pub const COL_SEATS_NON_FTE: &str = "total_seats_nonfte";
pub const COL_BILLING_FTE: &str = "billing_adoption_fte";
pub const COL_BILLING_NON_FTE: &str = "billing_adoption_nonfte";

/// One segment's adoption figures for one month.
///
/// Billing adoption values are pre-computed percentages on a 0–100 scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdoptionRow {
    pub month: Month,
    pub segment: String,
    pub active_fte: i64,
    pub seats_fte: i64,
    pub active_non_fte: Option<i64>,
    pub seats_non_fte: Option<i64>,
    pub billing_adoption_fte: Option<f64>,
    pub billing_adoption_non_fte: Option<f64>,
}

impl Record for AdoptionRow {
    fn segment(&self) -> &str {
        &self.segment
    }

    fn month(&self) -> Month {
        self.month
    }

    fn date(&self) -> NaiveDate {
        self.month.first_day()
    }
}

impl CsvRow for AdoptionRow {
    const KIND: DatasetKind = DatasetKind::SegmentAdoption;
    const REQUIRED: &'static [&'static str] =
        &[COL_MONTH, COL_SEGMENT, COL_ACTIVE_FTE, COL_SEATS_FTE];
    const OPTIONAL: &'static [&'static str] = &[
        COL_ACTIVE_NON_FTE,
        COL_SEATS_NON_FTE,
        COL_BILLING_FTE,
        COL_BILLING_NON_FTE,
    ];

    fn from_record(record: &RawRecord<'_>) -> Result<Self> {
        Ok(Self {
            month: Month::of(record.date(COL_MONTH)?),
            segment: record.text(COL_SEGMENT)?,
            active_fte: record.integer(COL_ACTIVE_FTE)?,
            seats_fte: record.integer(COL_SEATS_FTE)?,
            active_non_fte: record.opt_integer(COL_ACTIVE_NON_FTE),
            seats_non_fte: record.opt_integer(COL_SEATS_NON_FTE),
            billing_adoption_fte: record.opt_percent(COL_BILLING_FTE),
            billing_adoption_non_fte: record.opt_percent(COL_BILLING_NON_FTE),
        })
    }
}
