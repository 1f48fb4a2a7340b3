//! Premium request cost analytics.
//!
//! All amounts are summed as [`Decimal`] so totals are exact to the cent.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use insights_core::error::InsightsError;
use insights_core::models::AmountColumn;
use insights_core::registry::Aggregation;
use insights_core::time_utils::{DateRange, Month};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

use crate::aggregator::{fill_months, group_by, keep_last, month_window, rank_desc};
use crate::premium_requests::PremiumRow;

/// Number of models listed in a premium summary.
pub const SUMMARY_TOP_MODELS: usize = 3;

// ── Totals ────────────────────────────────────────────────────────────────────

/// Sums over a set of premium request rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PremiumTotals {
    pub rows: usize,
    pub quantity: Decimal,
    pub gross_amount: Decimal,
    pub discount_amount: Decimal,
    pub net_amount: Decimal,
    /// Rows flagged as exceeding quota; `None` when no row carried the flag.
    pub exceeding_quota: Option<usize>,
    /// A sum hit the `Decimal` range and was clamped.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub saturated: bool,
    #[serde(skip)]
    users: BTreeSet<String>,
}

impl PremiumTotals {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a PremiumRow>) -> Self {
        let mut totals = Self::default();
        for row in rows {
            totals.add(row);
        }
        totals
    }

    pub fn add(&mut self, row: &PremiumRow) {
        self.rows += 1;
        self.saturated |= add_amount(&mut self.quantity, row.quantity, "quantity");
        self.saturated |= add_amount(&mut self.gross_amount, row.gross_amount, "gross_amount");
        self.saturated |=
            add_amount(&mut self.discount_amount, row.discount_amount, "discount_amount");
        self.saturated |= add_amount(&mut self.net_amount, row.net_amount, "net_amount");
        if let Some(exceeds) = row.exceeds_quota {
            let count = self.exceeding_quota.get_or_insert(0);
            if exceeds {
                *count += 1;
            }
        }
        if !self.users.contains(&row.mfcgd_id) {
            self.users.insert(row.mfcgd_id.clone());
        }
    }

    pub fn amount(&self, column: AmountColumn) -> Decimal {
        match column {
            AmountColumn::NetAmount => self.net_amount,
            AmountColumn::GrossAmount => self.gross_amount,
            AmountColumn::DiscountAmount => self.discount_amount,
            AmountColumn::Quantity => self.quantity,
        }
    }

    /// Distinct `mfcgd_id` values.
    pub fn distinct_users(&self) -> usize {
        self.users.len()
    }
}

/// Add `value` to `total`, clamping at the `Decimal` range.
///
/// Returns `true` when the sum was clamped.
fn add_amount(total: &mut Decimal, value: Decimal, column: &'static str) -> bool {
    match total.checked_add(value) {
        Some(sum) => {
            *total = sum;
            false
        }
        None => {
            warn!(column, "premium total out of range; clamping");
            *total = total.saturating_add(value);
            true
        }
    }
}

// ── Measures ──────────────────────────────────────────────────────────────────

/// The premium figure a metric reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PremiumMeasure {
    Sum(AmountColumn),
    DistinctUsers,
}

impl PremiumMeasure {
    /// `None` for aggregations over the adoption dataset.
    pub fn from_aggregation(aggregation: &Aggregation) -> Option<Self> {
        match aggregation {
            Aggregation::PremiumSum { column } => Some(Self::Sum(*column)),
            Aggregation::DistinctUsers => Some(Self::DistinctUsers),
            _ => None,
        }
    }

    pub fn value(&self, totals: &PremiumTotals) -> Decimal {
        match self {
            Self::Sum(column) => totals.amount(*column),
            Self::DistinctUsers => Decimal::from(totals.distinct_users()),
        }
    }

    pub fn is_monetary(&self) -> bool {
        matches!(self, Self::Sum(column) if column.is_monetary())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Sum(AmountColumn::NetAmount) => "net cost",
            Self::Sum(AmountColumn::GrossAmount) => "gross cost",
            Self::Sum(AmountColumn::DiscountAmount) => "discount",
            Self::Sum(AmountColumn::Quantity) => "premium requests",
            Self::DistinctUsers => "unique users",
        }
    }
}

// ── Dimensions ────────────────────────────────────────────────────────────────

/// What premium rows can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PremiumDimension {
    Segment,
    Model,
    Enterprise,
    Month,
}

impl PremiumDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Segment => "segment",
            Self::Model => "model",
            Self::Enterprise => "enterprise",
            Self::Month => "month",
        }
    }

    pub fn key(&self, row: &PremiumRow) -> String {
        match self {
            Self::Segment => row.segment.clone(),
            Self::Model => row.model.clone(),
            Self::Enterprise => row.enterprise.clone(),
            Self::Month => row.month.to_string(),
        }
    }
}

impl fmt::Display for PremiumDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PremiumDimension {
    type Err = InsightsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "segment" => Ok(Self::Segment),
            "model" => Ok(Self::Model),
            "enterprise" => Ok(Self::Enterprise),
            "month" => Ok(Self::Month),
            other => Err(InsightsError::InvalidArgument(format!(
                "Invalid group_by '{}': expected segment, model, enterprise or month",
                other
            ))),
        }
    }
}

/// Totals for one dimension value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PremiumGroup {
    pub key: String,
    pub totals: PremiumTotals,
}

// ── Aggregation ───────────────────────────────────────────────────────────────

/// Group `rows` by `dimension`; groups are sorted by key.
pub fn aggregate(rows: &[&PremiumRow], dimension: PremiumDimension) -> Vec<PremiumGroup> {
    group_by(rows, |r| dimension.key(r))
        .into_iter()
        .map(|(key, members)| PremiumGroup {
            key,
            totals: PremiumTotals::from_rows(members),
        })
        .collect()
}

/// The `top_n` groups of `dimension` by `measure`, highest first; ties go to
/// the smaller label.
pub fn rank(
    rows: &[&PremiumRow],
    dimension: PremiumDimension,
    measure: PremiumMeasure,
    top_n: usize,
) -> Vec<PremiumGroup> {
    let mut groups = aggregate(rows, dimension);
    rank_desc(&mut groups, |g| measure.value(&g.totals), |g| g.key.as_str());
    groups.truncate(top_n);
    groups
}

// ── Summary ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PremiumSummary {
    pub totals: PremiumTotals,
    /// Busiest models by request volume.
    pub top_models: Vec<PremiumGroup>,
    pub months: Option<(Month, Month)>,
}

pub fn summarize(rows: &[&PremiumRow]) -> PremiumSummary {
    PremiumSummary {
        totals: PremiumTotals::from_rows(rows.iter().copied()),
        top_models: rank(
            rows,
            PremiumDimension::Model,
            PremiumMeasure::Sum(AmountColumn::Quantity),
            SUMMARY_TOP_MODELS,
        ),
        months: month_window(None, rows.iter().map(|r| r.month)),
    }
}

// ── Trend ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PremiumTrendPoint {
    pub month: Month,
    pub totals: PremiumTotals,
}

/// Per-month totals across `range` (or the observed months when open).
/// Months without rows appear with zero sums.
pub fn trend(
    rows: &[&PremiumRow],
    range: Option<&DateRange>,
    limit: Option<usize>,
) -> Vec<PremiumTrendPoint> {
    let Some((start, end)) = month_window(range, rows.iter().map(|r| r.month)) else {
        return Vec::new();
    };
    let by_month: BTreeMap<Month, PremiumTotals> = group_by(rows, |r| r.month)
        .into_iter()
        .map(|(month, members)| (month, PremiumTotals::from_rows(members)))
        .collect();

    let points = fill_months(by_month, start, end)
        .into_iter()
        .map(|(month, totals)| PremiumTrendPoint { month, totals })
        .collect();
    keep_last(points, limit)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
