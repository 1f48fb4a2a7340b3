//! Cross-dataset correlation of adoption against premium cost.
//!
//! Both datasets are grouped by segment (and optionally by employee flag)
//! and inner-joined on that key. Keys present on only one side are
//! excluded from the result and listed as unmatched.

use std::collections::BTreeMap;

use insights_core::models::UserType;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::adoption::AdoptionTotals;
use crate::aggregator::group_by;
use crate::premium::PremiumTotals;
use crate::premium_requests::PremiumRow;
use crate::segment_adoption::AdoptionRow;

/// Fewest joined segments for which a coefficient is reported.
pub const MIN_CORRELATION_POINTS: usize = 3;

type JoinKey = (String, Option<UserType>);

/// One joined segment (and population when split by employee flag).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationRow {
    pub segment: String,
    pub population: Option<UserType>,
    pub adoption_rate: Option<f64>,
    pub active_users: Option<i64>,
    pub seats: Option<i64>,
    pub net_cost: Decimal,
    pub requests: Decimal,
    pub premium_users: usize,
    /// `net_cost / active_users`, two decimals; `None` without active users.
    pub cost_per_active_user: Option<Decimal>,
}

impl CorrelationRow {
    pub fn label(&self) -> String {
        match self.population {
            Some(p) => format!("{} ({})", self.segment, p.label()),
            None => self.segment.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrelationReport {
    pub rows: Vec<CorrelationRow>,
    /// Adoption keys with no premium rows.
    pub unmatched_adoption: Vec<String>,
    /// Premium keys with no adoption rows.
    pub unmatched_premium: Vec<String>,
    /// Pearson's r between adoption rate and net cost across joined rows.
    pub coefficient: Option<f64>,
}

impl CorrelationReport {
    /// Keys dropped by the join, both sides combined.
    pub fn excluded(&self) -> usize {
        self.unmatched_adoption.len() + self.unmatched_premium.len()
    }
}

/// Join adoption and premium rows on segment, optionally split by the
/// employee flag. Rows come back sorted by key.
///
/// `only` keeps a single population and implies the split.
pub fn correlate(
    adoption: &[&AdoptionRow],
    premium: &[&PremiumRow],
    by_employee: bool,
    only: Option<UserType>,
) -> CorrelationReport {
    let by_employee = by_employee || only.is_some();
    let keep = |key: &JoinKey| only.map_or(true, |p| key.1 == Some(p));

    let mut adoption_side = adoption_groups(adoption, by_employee);
    adoption_side.retain(|key, _| keep(key));
    let mut premium_side: BTreeMap<JoinKey, PremiumTotals> = group_by(premium, |r| {
        let population = by_employee.then(|| UserType::from_employee_flag(r.is_employee));
        (r.segment.clone(), population)
    })
    .into_iter()
    .filter(|(key, _)| keep(key))
    .map(|(key, members)| (key, PremiumTotals::from_rows(members)))
    .collect();

    let mut report = CorrelationReport::default();
    for ((segment, population), totals) in adoption_side {
        let key = (segment, population);
        let Some(cost) = premium_side.remove(&key) else {
            report.unmatched_adoption.push(key_label(&key));
            continue;
        };
        let (segment, population) = key;
        let metric_population = population.unwrap_or(UserType::Fte);
        let active_users = totals.active(metric_population);
        let cost_per_active_user = active_users
            .filter(|n| *n > 0)
            .map(|n| (cost.net_amount / Decimal::from(n)).round_dp(2));

        report.rows.push(CorrelationRow {
            segment,
            population,
            adoption_rate: totals.rate(metric_population),
            active_users,
            seats: totals.seats(metric_population),
            net_cost: cost.net_amount,
            requests: cost.quantity,
            premium_users: cost.distinct_users(),
            cost_per_active_user,
        });
    }
    report.unmatched_premium = premium_side.keys().map(key_label).collect();
    report.coefficient = pearson(
        report
            .rows
            .iter()
            .filter_map(|r| Some((r.adoption_rate?, r.net_cost.to_f64()?))),
    );
    report
}

fn adoption_groups(rows: &[&AdoptionRow], by_employee: bool) -> BTreeMap<JoinKey, AdoptionTotals> {
    let mut out = BTreeMap::new();
    for (segment, members) in group_by(rows, |r| r.segment.clone()) {
        let totals = AdoptionTotals::from_rows(members);
        if !by_employee {
            out.insert((segment, None), totals);
            continue;
        }
        if totals.seats_non_fte.is_some() {
            out.insert((segment.clone(), Some(UserType::Contractor)), totals.clone());
        }
        out.insert((segment, Some(UserType::Fte)), totals);
    }
    out
}

fn key_label(key: &JoinKey) -> String {
    match key.1 {
        Some(p) => format!("{} ({})", key.0, p.label()),
        None => key.0.clone(),
    }
}

/// Sample Pearson correlation; `None` below [`MIN_CORRELATION_POINTS`] pairs
/// or when either series is constant.
fn pearson(pairs: impl Iterator<Item = (f64, f64)>) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = pairs.filter(|(x, y)| x.is_finite() && y.is_finite()).collect();
    if pairs.len() < MIN_CORRELATION_POINTS {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let cov = pairs.iter().map(|(x, y)| (x - mean_x) * (y - mean_y)).sum::<f64>();
    let var_x = pairs.iter().map(|(x, _)| (x - mean_x).powi(2)).sum::<f64>();
    let var_y = pairs.iter().map(|(_, y)| (y - mean_y).powi(2)).sum::<f64>();
    if var_x <= 0.0 || var_y <= 0.0 {
        return None;
    }
    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
