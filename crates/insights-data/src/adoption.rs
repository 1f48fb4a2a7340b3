//! Adoption analytics over segment adoption rows.
//!
//! Sums active users and seats per group and derives the adoption rate
//! `active / seats × 100`, rounded to two decimals. A rate over zero or
//! unknown seats is undefined (`None`). Pre-computed billing adoption
//! percentages are averaged as-is and never rounded.

use std::collections::BTreeMap;

use insights_core::formatting::{percentage, RATE_DECIMALS};
use insights_core::models::UserType;
use insights_core::registry::Aggregation;
use insights_core::time_utils::{DateRange, Month};
use serde::Serialize;
use tracing::warn;

use crate::aggregator::{fill_months, group_by, keep_last, month_window, rank_desc};
use crate::segment_adoption::AdoptionRow;

// ── Totals ────────────────────────────────────────────────────────────────────

/// Running mean of optional values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Active users and seats accumulated across adoption rows.
///
/// Non-FTE sums are `None` until a row carrying the value is added, so a
/// dataset without the non-FTE columns reports them as undefined.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdoptionTotals {
    pub rows: usize,
    pub active_fte: i64,
    pub seats_fte: i64,
    pub active_non_fte: Option<i64>,
    pub seats_non_fte: Option<i64>,
    #[serde(skip)]
    billing_fte: Mean,
    #[serde(skip)]
    billing_non_fte: Mean,
}

impl AdoptionTotals {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a AdoptionRow>) -> Self {
        let mut totals = Self::default();
        for row in rows {
            totals.add(row);
        }
        totals
    }

    pub fn add(&mut self, row: &AdoptionRow) {
        self.rows += 1;
        add_count(&mut self.active_fte, row.active_fte, "active_users_fte");
        add_count(&mut self.seats_fte, row.seats_fte, "total_seats_fte");
        if let Some(v) = row.active_non_fte {
            add_count(self.active_non_fte.get_or_insert(0), v, "active_users_nonfte");
        }
        if let Some(v) = row.seats_non_fte {
            add_count(self.seats_non_fte.get_or_insert(0), v, "total_seats_nonfte");
        }
        self.billing_fte.add(row.billing_adoption_fte);
        self.billing_non_fte.add(row.billing_adoption_non_fte);
    }

    pub fn active(&self, population: UserType) -> Option<i64> {
        match population {
            UserType::Fte => Some(self.active_fte),
            UserType::Contractor => self.active_non_fte,
        }
    }

    pub fn seats(&self, population: UserType) -> Option<i64> {
        match population {
            UserType::Fte => Some(self.seats_fte),
            UserType::Contractor => self.seats_non_fte,
        }
    }

    /// `active / seats × 100` for `population`, rounded to two decimals.
    pub fn rate(&self, population: UserType) -> Option<f64> {
        let active = self.active(population)?;
        let seats = self.seats(population)?;
        percentage(active as f64, seats as f64, RATE_DECIMALS)
    }

    pub fn fte_rate(&self) -> Option<f64> {
        self.rate(UserType::Fte)
    }

    pub fn non_fte_rate(&self) -> Option<f64> {
        self.rate(UserType::Contractor)
    }

    /// FTE plus non-FTE active users.
    pub fn active_users(&self) -> i64 {
        self.active_fte.saturating_add(self.active_non_fte.unwrap_or(0))
    }

    /// Unrounded mean of the pre-computed billing adoption percentages.
    pub fn billing_adoption(&self, population: UserType) -> Option<f64> {
        match population {
            UserType::Fte => self.billing_fte.value(),
            UserType::Contractor => self.billing_non_fte.value(),
        }
    }
}

/// Add `value` to `total`, clamping at the `i64` range.
fn add_count(total: &mut i64, value: i64, column: &'static str) {
    match total.checked_add(value) {
        Some(sum) => *total = sum,
        None => {
            warn!(column, "adoption total out of range; clamping");
            *total = total.saturating_add(value);
        }
    }
}

// ── Measures ──────────────────────────────────────────────────────────────────

/// The adoption figure a metric reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdoptionMeasure {
    Rate(UserType),
    ActiveUsers,
    BillingAdoption(UserType),
}

impl AdoptionMeasure {
    /// `None` for aggregations over the premium dataset.
    pub fn from_aggregation(aggregation: &Aggregation) -> Option<Self> {
        match aggregation {
            Aggregation::AdoptionRate { population } => Some(Self::Rate(*population)),
            Aggregation::ActiveUsers => Some(Self::ActiveUsers),
            Aggregation::BillingAdoption { population } => {
                Some(Self::BillingAdoption(*population))
            }
            _ => None,
        }
    }

    pub fn value(&self, totals: &AdoptionTotals) -> Option<f64> {
        match self {
            Self::Rate(population) => totals.rate(*population),
            Self::ActiveUsers => Some(totals.active_users() as f64),
            Self::BillingAdoption(population) => totals.billing_adoption(*population),
        }
    }

    /// `true` when the value is a 0–100 percentage.
    pub fn is_percentage(&self) -> bool {
        !matches!(self, Self::ActiveUsers)
    }
}

// ── Grouping ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdoptionGrouping {
    Overall,
    Segment,
    Month,
}

/// Totals for one group key (segment label, `YYYY-MM`, or `"all"`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdoptionGroup {
    pub key: String,
    pub totals: AdoptionTotals,
}

/// Aggregate `rows` by `grouping`; groups are sorted by key.
pub fn aggregate(rows: &[&AdoptionRow], grouping: AdoptionGrouping) -> Vec<AdoptionGroup> {
    let groups: BTreeMap<String, Vec<&AdoptionRow>> = match grouping {
        AdoptionGrouping::Overall => {
            let mut all = BTreeMap::new();
            all.insert("all".to_string(), rows.to_vec());
            all
        }
        AdoptionGrouping::Segment => group_by(rows, |r| r.segment.clone()),
        AdoptionGrouping::Month => group_by(rows, |r| r.month.to_string()),
    };
    groups
        .into_iter()
        .map(|(key, members)| AdoptionGroup {
            key,
            totals: AdoptionTotals::from_rows(members),
        })
        .collect()
}

// ── Summary ───────────────────────────────────────────────────────────────────

/// The single row with the highest FTE coverage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakRow {
    pub segment: String,
    pub month: Month,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdoptionSummary {
    pub overall: AdoptionTotals,
    pub by_segment: Vec<AdoptionGroup>,
    pub months: Option<(Month, Month)>,
    pub peak: Option<PeakRow>,
}

/// Overall and per-segment totals plus the peak FTE coverage row.
pub fn summarize(rows: &[&AdoptionRow]) -> AdoptionSummary {
    let months = month_window(None, rows.iter().map(|r| r.month));

    let mut candidates: Vec<PeakRow> = rows
        .iter()
        .filter_map(|r| {
            let rate = percentage(r.active_fte as f64, r.seats_fte as f64, RATE_DECIMALS)?;
            Some(PeakRow {
                segment: r.segment.clone(),
                month: r.month,
                rate,
            })
        })
        .collect();
    rank_desc(&mut candidates, |p| p.rate, |p| p.segment.as_str());

    AdoptionSummary {
        overall: AdoptionTotals::from_rows(rows.iter().copied()),
        by_segment: aggregate(rows, AdoptionGrouping::Segment),
        months,
        peak: candidates.into_iter().next(),
    }
}

// ── Trend ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdoptionTrendPoint {
    pub month: Month,
    pub totals: AdoptionTotals,
}

/// Per-month totals across `range` (or the observed months when open).
///
/// Months without rows appear with zero sums and undefined rates. `limit`
/// keeps only the most recent N months.
pub fn trend(
    rows: &[&AdoptionRow],
    range: Option<&DateRange>,
    limit: Option<usize>,
) -> Vec<AdoptionTrendPoint> {
    let Some((start, end)) = month_window(range, rows.iter().map(|r| r.month)) else {
        return Vec::new();
    };
    let by_month: BTreeMap<Month, AdoptionTotals> = group_by(rows, |r| r.month)
        .into_iter()
        .map(|(month, members)| (month, AdoptionTotals::from_rows(members)))
        .collect();

    let points = fill_months(by_month, start, end)
        .into_iter()
        .map(|(month, totals)| AdoptionTrendPoint { month, totals })
        .collect();
    keep_last(points, limit)
}

// ── Leaders ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentLeader {
    pub segment: String,
    pub value: Option<f64>,
    pub totals: AdoptionTotals,
}

/// Segments ranked by `measure`, highest first; ties by ascending label and
/// undefined values last. `month` restricts the ranking to a single month.
pub fn leaders(
    rows: &[&AdoptionRow],
    measure: AdoptionMeasure,
    month: Option<Month>,
    top_n: usize,
) -> Vec<SegmentLeader> {
    let scoped: Vec<&AdoptionRow> = rows
        .iter()
        .copied()
        .filter(|r| month.map_or(true, |m| r.month == m))
        .collect();

    let mut ranked: Vec<SegmentLeader> = aggregate(&scoped, AdoptionGrouping::Segment)
        .into_iter()
        .map(|group| SegmentLeader {
            value: measure.value(&group.totals),
            segment: group.key,
            totals: group.totals,
        })
        .collect();
    rank_desc(&mut ranked, |l| l.value, |l| l.segment.as_str());
    ranked.truncate(top_n);
    ranked
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn row(month: &str, segment: &str, active: i64, seats: i64) -> AdoptionRow {
        AdoptionRow {
            month: month.parse().unwrap(),
            segment: segment.into(),
            active_fte: active,
            seats_fte: seats,
            active_non_fte: None,
            seats_non_fte: None,
            billing_adoption_fte: None,
            billing_adoption_non_fte: None,
        }
    }

    fn refs(rows: &[AdoptionRow]) -> Vec<&AdoptionRow> {
        rows.iter().collect()
    }

    // ── totals ────────────────────────────────────────────────────────────────

    #[test]
    fn test_totals_clamp_instead_of_overflowing() {
        let rows = vec![
            row("2025-01", "Asia", i64::MAX, i64::MAX),
            row("2025-02", "Asia", 10, 10),
        ];
        let totals = AdoptionTotals::from_rows(&rows);
        assert_eq!(totals.active_fte, i64::MAX);
        assert_eq!(totals.seats_fte, i64::MAX);
        assert_eq!(totals.fte_rate(), Some(100.0));
    }

    #[test]
    fn test_rate_rounded_to_two_decimals() {
        let rows = vec![row("2025-01", "Asia", 1, 3)];
        let totals = AdoptionTotals::from_rows(&rows);
        assert_eq!(totals.fte_rate(), Some(33.33));
    }

    #[test]
    fn test_zero_seats_rate_undefined() {
        let rows = vec![row("2025-01", "Asia", 0, 0)];
        assert_eq!(AdoptionTotals::from_rows(&rows).fte_rate(), None);
        assert_eq!(AdoptionTotals::default().fte_rate(), None);
    }

    #[test]
    fn test_non_fte_absent_is_undefined() {
        let rows = vec![row("2025-01", "Asia", 80, 100)];
        let totals = AdoptionTotals::from_rows(&rows);
        assert_eq!(totals.active_non_fte, None);
        assert_eq!(totals.non_fte_rate(), None);
        assert_eq!(totals.active_users(), 80);
    }

    #[test]
    fn test_non_fte_sums_present_values() {
        let mut a = row("2025-01", "Asia", 80, 100);
        a.active_non_fte = Some(5);
        a.seats_non_fte = Some(10);
        let mut b = row("2025-02", "Asia", 90, 100);
        b.active_non_fte = Some(7);
        b.seats_non_fte = Some(10);
        let totals = AdoptionTotals::from_rows(&[a, b]);
        assert_eq!(totals.active_non_fte, Some(12));
        assert_eq!(totals.non_fte_rate(), Some(60.0));
        assert_eq!(totals.active_users(), 182);
    }

    #[test]
    fn test_billing_adoption_mean_unrounded() {
        let mut a = row("2025-01", "Asia", 1, 1);
        a.billing_adoption_fte = Some(70.123);
        let mut b = row("2025-02", "Asia", 1, 1);
        b.billing_adoption_fte = Some(80.0);
        let c = row("2025-03", "Asia", 1, 1);
        let totals = AdoptionTotals::from_rows(&[a, b, c]);
        let mean = totals.billing_adoption(UserType::Fte).unwrap();
        assert!((mean - 75.0615).abs() < 1e-9, "mean = {mean}");
        assert_eq!(totals.billing_adoption(UserType::Contractor), None);
    }

    // ── aggregate / summarize ─────────────────────────────────────────────────

    #[test]
    fn test_aggregate_by_segment() {
        let rows = vec![
            row("2025-01", "Europe", 50, 100),
            row("2025-01", "Asia", 80, 100),
            row("2025-02", "Asia", 90, 100),
        ];
        let groups = aggregate(&refs(&rows), AdoptionGrouping::Segment);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "Asia");
        assert_eq!(groups[0].totals.active_fte, 170);
        assert_eq!(groups[0].totals.fte_rate(), Some(85.0));
        assert_eq!(groups[1].totals.fte_rate(), Some(50.0));
    }

    #[test]
    fn test_aggregate_empty_overall_is_undefined() {
        let groups = aggregate(&[], AdoptionGrouping::Overall);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].totals.rows, 0);
        assert_eq!(groups[0].totals.fte_rate(), None);
    }

    #[test]
    fn test_summary_peak_row() {
        let rows = vec![
            row("2025-01", "Asia", 80, 100),
            row("2025-02", "Europe", 95, 100),
            row("2025-02", "Asia", 90, 100),
        ];
        let summary = summarize(&refs(&rows));
        let peak = summary.peak.unwrap();
        assert_eq!(peak.segment, "Europe");
        assert_eq!(peak.rate, 95.0);
        assert_eq!(summary.overall.active_fte, 265);
        let (first, last) = summary.months.unwrap();
        assert_eq!(first.to_string(), "2025-01");
        assert_eq!(last.to_string(), "2025-02");
    }

    // ── trend ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_trend_asia_rates() {
        let rows = vec![row("2025-01", "Asia", 80, 100), row("2025-02", "Asia", 90, 100)];
        let points = trend(&refs(&rows), None, None);
        let rates: Vec<Option<f64>> = points.iter().map(|p| p.totals.fte_rate()).collect();
        assert_eq!(rates, vec![Some(80.0), Some(90.0)]);
    }

    #[test]
    fn test_trend_emits_missing_month() {
        let rows = vec![row("2025-01", "Asia", 80, 100), row("2025-03", "Asia", 90, 100)];
        let points = trend(&refs(&rows), None, None);
        assert_eq!(points.len(), 3);
        assert_eq!(points[1].month.to_string(), "2025-02");
        assert_eq!(points[1].totals.active_fte, 0);
        assert_eq!(points[1].totals.fte_rate(), None);
    }

    #[test]
    fn test_trend_range_and_limit() {
        let rows = vec![row("2025-02", "Asia", 80, 100)];
        let range = DateRange::parse(Some("2025-01"), Some("2025-04")).unwrap();
        let points = trend(&refs(&rows), Some(&range), Some(2));
        let months: Vec<String> = points.iter().map(|p| p.month.to_string()).collect();
        assert_eq!(months, vec!["2025-03", "2025-04"]);
    }

    #[test]
    fn test_trend_no_rows_no_range_is_empty() {
        assert!(trend(&[], None, None).is_empty());
    }

    // ── leaders ───────────────────────────────────────────────────────────────

    #[test]
    fn test_leaders_ranked_with_month_scope() {
        let rows = vec![
            row("2025-01", "Asia", 80, 100),
            row("2025-01", "Europe", 80, 100),
            row("2025-01", "Americas", 90, 100),
            row("2025-02", "Europe", 10, 100),
        ];
        let month: Month = "2025-01".parse().unwrap();
        let top = leaders(&refs(&rows), AdoptionMeasure::Rate(UserType::Fte), Some(month), 2);
        let labels: Vec<&str> = top.iter().map(|l| l.segment.as_str()).collect();
        assert_eq!(labels, vec!["Americas", "Asia"]);
    }

    #[test]
    fn test_measure_from_aggregation() {
        assert_eq!(
            AdoptionMeasure::from_aggregation(&Aggregation::ActiveUsers),
            Some(AdoptionMeasure::ActiveUsers)
        );
        assert_eq!(AdoptionMeasure::from_aggregation(&Aggregation::DistinctUsers), None);
    }
}
