//! Tool dispatch.
//!
//! Every call follows the same pipeline: resolve the tool name, authorize
//! the request, check that the tool can compute the metric, load the
//! dataset(s), filter, compute, and package the output with its provenance.
//! Nothing is loaded for a request the guard rejects.

use insights_core::error::{InsightsError, Result};
use insights_core::formatting::{format_count, format_currency, format_decimal, format_percent};
use insights_core::models::{
    DatasetVersion, FilterSpec, Provenance, QueryOutput, QueryResult, Table, UserType, Value,
};
use insights_core::registry::{MetricDefinition, MetricsRegistry};
use insights_data::adoption::{self, AdoptionMeasure, AdoptionTotals};
use insights_data::correlation::{correlate, MIN_CORRELATION_POINTS};
use insights_data::filter::filter_rows;
use insights_data::premium::{self, PremiumDimension, PremiumMeasure, PremiumTotals};
use insights_data::premium_requests::{PremiumRow, COL_EXCEEDS_QUOTA};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::data_manager::DataManager;
use crate::guard::{AuthorizedRequest, Guard};
use crate::safety::SafetyPolicy;
use crate::tools::{catalogue, ToolDescription, ToolName, ToolRequest, DEFAULT_TREND_LIMIT};

const NO_ADOPTION_ROWS: &str = "No segment adoption records match the requested scope.";
const NO_PREMIUM_ROWS: &str = "No premium request records match the requested scope.";

/// What a tool handler produced, before it is wrapped into a [`QueryResult`].
struct Computed {
    output: QueryOutput,
    summary: Vec<String>,
    datasets: Vec<DatasetVersion>,
    rows_considered: usize,
    rows_excluded: usize,
    empty: bool,
}

impl Computed {
    fn nothing_matched(columns: &[&str], message: &str, datasets: Vec<DatasetVersion>) -> Self {
        Self {
            output: QueryOutput::Table(Table::new(columns)),
            summary: vec![message.to_string()],
            datasets,
            rows_considered: 0,
            rows_excluded: 0,
            empty: true,
        }
    }
}

// ── ToolDispatcher ────────────────────────────────────────────────────────────

pub struct ToolDispatcher<'r> {
    data: DataManager,
    guard: Guard<'r>,
}

impl<'r> ToolDispatcher<'r> {
    pub fn new(data: DataManager, guard: Guard<'r>) -> Self {
        Self { data, guard }
    }

    /// Dispatcher with the standard safety policy.
    pub fn with_registry(data: DataManager, registry: &'r MetricsRegistry) -> Self {
        Self::new(data, Guard::new(registry, SafetyPolicy::standard()))
    }

    pub fn data(&self) -> &DataManager {
        &self.data
    }

    pub fn list_tools(&self) -> Vec<ToolDescription> {
        catalogue()
    }

    /// Parse JSON arguments and dispatch them.
    pub fn dispatch_json(&self, tool: Option<&str>, arguments: serde_json::Value) -> Result<QueryResult> {
        let request = ToolRequest::from_json(tool, arguments)?;
        self.dispatch(&request)
    }

    pub fn dispatch(&self, request: &ToolRequest) -> Result<QueryResult> {
        let tool: ToolName = request.tool.parse()?;
        let auth = self.guard.authorize(tool, request)?;

        let computed = match (tool, auth.metric) {
            (ToolName::DescribeMetrics, _) => self.describe_metrics(&auth),
            (ToolName::ListSegments, _) => self.list_segments()?,
            (_, Some(metric)) => self.compute(tool, metric, &auth)?,
            (_, None) => {
                return Err(InsightsError::InvalidArgument(format!(
                    "Tool '{}' requires a metric",
                    tool
                )))
            }
        };

        let min_rows = auth.metric.map_or(0, |m| m.min_aggregation_size);
        let below_min_aggregation = !computed.empty && computed.rows_considered < min_rows;
        let mut summary = computed.summary;
        if below_min_aggregation {
            summary.push(format!(
                "Note: fewer than {} records contributed to this result; treat it with caution.",
                min_rows
            ));
        }

        info!(
            tool = tool.as_str(),
            metric = auth.metric_id(),
            rows = computed.rows_considered,
            excluded = computed.rows_excluded,
            empty = computed.empty,
            "tool executed"
        );
        Ok(QueryResult {
            tool: tool.as_str().to_string(),
            metric: auth.metric_id().to_string(),
            output: computed.output,
            provenance: Provenance {
                datasets: computed.datasets,
                filters: auth.filters.clone(),
                rows_considered: computed.rows_considered,
                rows_excluded: computed.rows_excluded,
            },
            empty: computed.empty,
            below_min_aggregation,
            summary,
        })
    }

    fn compute(
        &self,
        tool: ToolName,
        metric: &MetricDefinition,
        auth: &AuthorizedRequest<'_>,
    ) -> Result<Computed> {
        let mismatch = || {
            InsightsError::InvalidArgument(format!(
                "Tool '{}' cannot compute metric '{}'",
                tool, metric.id
            ))
        };
        if !tool.accepts(&metric.aggregation) {
            return Err(mismatch());
        }

        let adoption_measure = AdoptionMeasure::from_aggregation(&metric.aggregation);
        let premium_measure = PremiumMeasure::from_aggregation(&metric.aggregation);
        match (tool, adoption_measure, premium_measure) {
            (ToolName::AdoptionSummary, Some(m), _) => self.adoption_summary(metric, m, auth),
            (ToolName::AdoptionTrend, Some(m), _) => self.adoption_trend(metric, m, auth),
            (ToolName::SegmentRanking, Some(m), _) => self.adoption_leaders(metric, m, auth),
            (ToolName::SegmentRanking, _, Some(m)) => self.premium_segment_ranking(metric, m, auth),
            (ToolName::PremiumCostSummary, _, Some(m)) => self.premium_summary(metric, m, auth),
            (ToolName::PremiumCostTrend, _, Some(m)) => self.premium_trend(metric, m, auth),
            (ToolName::ModelRanking, _, Some(m)) => self.model_ranking(metric, m, auth),
            (ToolName::AdoptionCostCorrelation, _, _) => self.correlation(auth),
            _ => Err(mismatch()),
        }
    }

    // ── Adoption tools ────────────────────────────────────────────────────

    fn adoption_summary(
        &self,
        metric: &MetricDefinition,
        measure: AdoptionMeasure,
        auth: &AuthorizedRequest<'_>,
    ) -> Result<Computed> {
        let dataset = self.data.adoption()?;
        let rows = filter_rows(dataset.rows(), &auth.filters);
        let columns = [
            "segment",
            "active_fte",
            "seats_fte",
            "fte_rate",
            "active_non_fte",
            "seats_non_fte",
            "non_fte_rate",
            metric.id.as_str(),
        ];
        if rows.is_empty() {
            return Ok(Computed::nothing_matched(
                &columns,
                NO_ADOPTION_ROWS,
                vec![dataset.version().clone()],
            ));
        }

        let summary = adoption::summarize(&rows);
        let mut table = Table::new(&columns);
        for group in &summary.by_segment {
            let t = &group.totals;
            table.push(vec![
                Some(group.key.as_str().into()),
                Some(Value::Integer(t.active_fte)),
                Some(Value::Integer(t.seats_fte)),
                t.fte_rate().map(Value::Float),
                t.active_non_fte.map(Value::Integer),
                t.seats_non_fte.map(Value::Integer),
                t.non_fte_rate().map(Value::Float),
                adoption_value(measure, measure.value(t)),
            ]);
        }

        let mut lines = vec![format!(
            "Segment adoption summary for {} during {}:",
            adoption_scope(&auth.filters),
            auth.filters.period().description()
        )];
        lines.extend(population_line("FTE", &summary.overall, UserType::Fte));
        lines.extend(population_line("Non-FTE", &summary.overall, UserType::Contractor));
        lines.push(format!(
            "- {}: {}",
            metric.name,
            format_adoption(measure, measure.value(&summary.overall))
        ));
        if let Some(peak) = &summary.peak {
            lines.push(format!(
                "Highest FTE coverage: {} at {:.1}% ({})",
                peak.segment, peak.rate, peak.month
            ));
        }

        Ok(Computed {
            output: QueryOutput::Table(table),
            summary: lines,
            datasets: vec![dataset.version().clone()],
            rows_considered: rows.len(),
            rows_excluded: 0,
            empty: false,
        })
    }

    fn adoption_trend(
        &self,
        metric: &MetricDefinition,
        measure: AdoptionMeasure,
        auth: &AuthorizedRequest<'_>,
    ) -> Result<Computed> {
        let dataset = self.data.adoption()?;
        let rows = filter_rows(dataset.rows(), &auth.filters);
        let columns = ["month", metric.id.as_str()];
        if rows.is_empty() {
            return Ok(Computed::nothing_matched(
                &columns,
                NO_ADOPTION_ROWS,
                vec![dataset.version().clone()],
            ));
        }

        let points = adoption::trend(&rows, auth.filters.date_range.as_ref(), trend_limit(auth));

        let mut table = Table::new(&columns);
        let mut lines = vec![format!(
            "{} trend for {} ({}):",
            metric.name,
            adoption_scope(&auth.filters),
            auth.filters.period().description()
        )];
        for point in &points {
            let value = measure.value(&point.totals);
            table.push(vec![
                Some(point.month.to_string().into()),
                adoption_value(measure, value),
            ]);
            let rendered = if point.totals.rows == 0 {
                "no data".to_string()
            } else {
                format_adoption(measure, value)
            };
            lines.push(format!("- {}: {}", point.month, rendered));
        }

        Ok(Computed {
            output: QueryOutput::Table(table),
            summary: lines,
            datasets: vec![dataset.version().clone()],
            rows_considered: rows.len(),
            rows_excluded: 0,
            empty: false,
        })
    }

    fn adoption_leaders(
        &self,
        metric: &MetricDefinition,
        measure: AdoptionMeasure,
        auth: &AuthorizedRequest<'_>,
    ) -> Result<Computed> {
        let dataset = self.data.adoption()?;
        let month = auth.options.month;
        let rows: Vec<_> = filter_rows(dataset.rows(), &auth.filters)
            .into_iter()
            .filter(|r| month.map_or(true, |m| r.month == m))
            .collect();
        let columns = ["segment", metric.id.as_str()];
        if rows.is_empty() {
            return Ok(Computed::nothing_matched(
                &columns,
                "No segment adoption data available for the requested period.",
                vec![dataset.version().clone()],
            ));
        }

        let leaders = adoption::leaders(&rows, measure, month, auth.options.top_n);
        let mut table = Table::new(&columns);
        let mut lines = vec![format!(
            "Top segments by {} ({}):",
            metric.name,
            ranking_period(auth)
        )];
        for leader in &leaders {
            table.push(vec![
                Some(leader.segment.as_str().into()),
                adoption_value(measure, leader.value),
            ]);
            lines.push(format!(
                "- {}: {}",
                leader.segment,
                format_adoption(measure, leader.value)
            ));
        }

        Ok(Computed {
            output: QueryOutput::Table(table),
            summary: lines,
            datasets: vec![dataset.version().clone()],
            rows_considered: rows.len(),
            rows_excluded: 0,
            empty: false,
        })
    }

    // ── Premium tools ─────────────────────────────────────────────────────

    fn premium_summary(
        &self,
        metric: &MetricDefinition,
        measure: PremiumMeasure,
        auth: &AuthorizedRequest<'_>,
    ) -> Result<Computed> {
        if let Some(dimension) = auth.options.group_by {
            return self.premium_breakdown(metric, measure, dimension, auth);
        }

        let dataset = self.data.premium()?;
        let rows = filter_rows(dataset.rows(), &auth.filters);
        if rows.is_empty() {
            return Ok(Computed {
                output: QueryOutput::Scalar {
                    label: metric.name.clone(),
                    value: None,
                },
                ..Computed::nothing_matched(&[], NO_PREMIUM_ROWS, vec![dataset.version().clone()])
            });
        }

        let summary = premium::summarize(&rows);
        let totals = &summary.totals;
        let mut lines = vec![
            format!(
                "Premium request summary for {} during {}:",
                auth.filters.scope_label(),
                auth.filters.period().description()
            ),
            format!("- Total requests: {}", format_decimal(totals.quantity, 0)),
            format!("- Unique users (by Entra ID): {}", format_count(totals.distinct_users() as i64)),
            format!("- Gross cost: {}", format_currency(totals.gross_amount)),
            format!("- Discount (free quota): {}", format_currency(totals.discount_amount)),
            format!("- Net billable cost: {}", format_currency(totals.net_amount)),
        ];
        if dataset.has_column(COL_EXCEEDS_QUOTA) {
            let exceeding = totals.exceeding_quota.unwrap_or(0);
            lines.push(format!("- Requests exceeding quota: {}", format_count(exceeding as i64)));
        }
        if totals.saturated {
            lines.push("Note: totals exceed the representable range and are clamped.".to_string());
        }
        if !summary.top_models.is_empty() {
            let models: Vec<String> = summary
                .top_models
                .iter()
                .map(|g| format!("{} ({})", g.key, format_decimal(g.totals.quantity, 0)))
                .collect();
            lines.push(format!("- Top models: {}", models.join(", ")));
        }

        Ok(Computed {
            output: QueryOutput::Scalar {
                label: metric.name.clone(),
                value: Some(premium_value(measure, totals)),
            },
            summary: lines,
            datasets: vec![dataset.version().clone()],
            rows_considered: rows.len(),
            rows_excluded: 0,
            empty: false,
        })
    }

    fn premium_breakdown(
        &self,
        metric: &MetricDefinition,
        measure: PremiumMeasure,
        dimension: PremiumDimension,
        auth: &AuthorizedRequest<'_>,
    ) -> Result<Computed> {
        let dataset = self.data.premium()?;
        let rows = filter_rows(dataset.rows(), &auth.filters);
        let columns = [
            dimension.as_str(),
            "requests",
            "gross_amount",
            "discount_amount",
            "net_amount",
            "unique_users",
            metric.id.as_str(),
        ];
        if rows.is_empty() {
            return Ok(Computed::nothing_matched(
                &columns,
                NO_PREMIUM_ROWS,
                vec![dataset.version().clone()],
            ));
        }

        let groups = premium::rank(&rows, dimension, measure, usize::MAX);
        let mut table = Table::new(&columns);
        let mut lines = vec![format!(
            "{} breakdown for {} ({}):",
            capitalize(dimension.as_str()),
            auth.filters.scope_label(),
            auth.filters.period().description()
        )];
        for group in &groups {
            let t = &group.totals;
            table.push(vec![
                Some(group.key.as_str().into()),
                Some(Value::Decimal(t.quantity)),
                Some(Value::Decimal(t.gross_amount)),
                Some(Value::Decimal(t.discount_amount)),
                Some(Value::Decimal(t.net_amount)),
                Some(Value::Integer(t.distinct_users() as i64)),
                Some(premium_value(measure, t)),
            ]);
            lines.push(format!(
                "- {}: {} requests, {} net cost, {} users",
                group.key,
                format_decimal(t.quantity, 0),
                format_currency(t.net_amount),
                format_count(t.distinct_users() as i64)
            ));
        }

        Ok(Computed {
            output: QueryOutput::Table(table),
            summary: lines,
            datasets: vec![dataset.version().clone()],
            rows_considered: rows.len(),
            rows_excluded: 0,
            empty: false,
        })
    }

    fn premium_trend(
        &self,
        metric: &MetricDefinition,
        measure: PremiumMeasure,
        auth: &AuthorizedRequest<'_>,
    ) -> Result<Computed> {
        let dataset = self.data.premium()?;
        let rows = filter_rows(dataset.rows(), &auth.filters);
        let columns = ["month", metric.id.as_str()];
        if rows.is_empty() {
            return Ok(Computed::nothing_matched(
                &columns,
                NO_PREMIUM_ROWS,
                vec![dataset.version().clone()],
            ));
        }

        let points = premium::trend(&rows, auth.filters.date_range.as_ref(), trend_limit(auth));

        let mut table = Table::new(&columns);
        let mut lines = vec![format!(
            "Premium request {} trend for {} ({}):",
            measure.label(),
            auth.filters.scope_label(),
            auth.filters.period().description()
        )];
        for point in &points {
            table.push(vec![
                Some(point.month.to_string().into()),
                Some(premium_value(measure, &point.totals)),
            ]);
            lines.push(format!(
                "- {}: {}",
                point.month,
                format_premium(measure, measure.value(&point.totals))
            ));
        }

        Ok(Computed {
            output: QueryOutput::Table(table),
            summary: lines,
            datasets: vec![dataset.version().clone()],
            rows_considered: rows.len(),
            rows_excluded: 0,
            empty: false,
        })
    }

    fn model_ranking(
        &self,
        metric: &MetricDefinition,
        measure: PremiumMeasure,
        auth: &AuthorizedRequest<'_>,
    ) -> Result<Computed> {
        let dataset = self.data.premium()?;
        let rows = filter_rows(dataset.rows(), &auth.filters);
        let columns = ["model", metric.id.as_str(), "requests"];
        if rows.is_empty() {
            return Ok(Computed::nothing_matched(
                &columns,
                NO_PREMIUM_ROWS,
                vec![dataset.version().clone()],
            ));
        }

        let ranked = premium::rank(&rows, PremiumDimension::Model, measure, auth.options.top_n);
        let mut table = Table::new(&columns);
        let mut lines = vec![format!(
            "Top AI models by {} for {} ({}):",
            measure.label(),
            auth.filters.scope_label(),
            auth.filters.period().description()
        )];
        for group in &ranked {
            let t = &group.totals;
            table.push(vec![
                Some(group.key.as_str().into()),
                Some(premium_value(measure, t)),
                Some(Value::Decimal(t.quantity)),
            ]);
            lines.push(format!(
                "- {}: {} ({} requests)",
                group.key,
                format_premium(measure, measure.value(t)),
                format_decimal(t.quantity, 0)
            ));
        }

        Ok(Computed {
            output: QueryOutput::Table(table),
            summary: lines,
            datasets: vec![dataset.version().clone()],
            rows_considered: rows.len(),
            rows_excluded: 0,
            empty: false,
        })
    }

    fn premium_segment_ranking(
        &self,
        metric: &MetricDefinition,
        measure: PremiumMeasure,
        auth: &AuthorizedRequest<'_>,
    ) -> Result<Computed> {
        let dataset = self.data.premium()?;
        let month = auth.options.month;
        let rows: Vec<&PremiumRow> = filter_rows(dataset.rows(), &auth.filters)
            .into_iter()
            .filter(|r| month.map_or(true, |m| r.month == m))
            .collect();
        let columns = ["segment", metric.id.as_str()];
        if rows.is_empty() {
            return Ok(Computed::nothing_matched(
                &columns,
                NO_PREMIUM_ROWS,
                vec![dataset.version().clone()],
            ));
        }

        let ranked = premium::rank(&rows, PremiumDimension::Segment, measure, auth.options.top_n);
        let mut table = Table::new(&columns);
        let mut lines = vec![format!(
            "Top segments by premium request {} for {} ({}):",
            measure.label(),
            auth.filters.scope_label(),
            ranking_period(auth)
        )];
        for group in &ranked {
            table.push(vec![
                Some(group.key.as_str().into()),
                Some(premium_value(measure, &group.totals)),
            ]);
            lines.push(format!(
                "- {}: {}",
                group.key,
                format_premium(measure, measure.value(&group.totals))
            ));
        }

        Ok(Computed {
            output: QueryOutput::Table(table),
            summary: lines,
            datasets: vec![dataset.version().clone()],
            rows_considered: rows.len(),
            rows_excluded: 0,
            empty: false,
        })
    }

    // ── Cross-dataset ─────────────────────────────────────────────────────

    fn correlation(&self, auth: &AuthorizedRequest<'_>) -> Result<Computed> {
        let adoption_data = self.data.adoption()?;
        let premium_data = self.data.premium()?;
        let datasets = vec![
            adoption_data.version().clone(),
            premium_data.version().clone(),
        ];

        // The adoption export has no employee flag; the population is
        // selected through the join instead.
        let adoption_filters = FilterSpec {
            user_type: None,
            ..auth.filters.clone()
        };
        let adoption_rows = filter_rows(adoption_data.rows(), &adoption_filters);
        let premium_rows = filter_rows(premium_data.rows(), &auth.filters);

        let columns = [
            "segment",
            "population",
            "adoption_rate",
            "active_users",
            "seats",
            "net_cost",
            "requests",
            "premium_users",
            "cost_per_active_user",
        ];
        let report = correlate(
            &adoption_rows,
            &premium_rows,
            auth.options.by_employee,
            auth.filters.user_type,
        );
        if report.rows.is_empty() {
            return Ok(Computed {
                rows_considered: adoption_rows.len() + premium_rows.len(),
                rows_excluded: report.excluded(),
                ..Computed::nothing_matched(
                    &columns,
                    "No segments appear in both the adoption and premium request data for the requested scope.",
                    datasets,
                )
            });
        }

        let mut table = Table::new(&columns);
        let mut lines = vec![format!(
            "Adoption versus premium request cost for {} ({}):",
            auth.filters.scope_label(),
            auth.filters.period().description()
        )];
        for row in &report.rows {
            table.push(vec![
                Some(row.segment.as_str().into()),
                row.population.map(|p| p.label().into()),
                row.adoption_rate.map(Value::Float),
                row.active_users.map(Value::Integer),
                row.seats.map(Value::Integer),
                Some(Value::Decimal(row.net_cost)),
                Some(Value::Decimal(row.requests)),
                Some(Value::Integer(row.premium_users as i64)),
                row.cost_per_active_user.map(Value::Decimal),
            ]);
            let per_user = row
                .cost_per_active_user
                .map(|c| format!(", {} per active user", format_currency(c)))
                .unwrap_or_default();
            lines.push(format!(
                "- {}: {} adoption, {} net cost{}",
                row.label(),
                format_percent(row.adoption_rate),
                format_currency(row.net_cost),
                per_user
            ));
        }
        match report.coefficient {
            Some(r) => lines.push(format!(
                "Correlation (Pearson r) across {} segments: {:.2}",
                report.rows.len(),
                r
            )),
            None => lines.push(format!(
                "Correlation not computed: needs at least {} segments with varying values.",
                MIN_CORRELATION_POINTS
            )),
        }
        if report.excluded() > 0 {
            let mut unmatched = report.unmatched_adoption.clone();
            unmatched.extend(report.unmatched_premium.iter().cloned());
            lines.push(format!("Excluded without a match: {}", unmatched.join(", ")));
        }

        Ok(Computed {
            output: QueryOutput::Table(table),
            summary: lines,
            datasets,
            rows_considered: adoption_rows.len() + premium_rows.len(),
            rows_excluded: report.excluded(),
            empty: false,
        })
    }

    // ── Catalogue tools ───────────────────────────────────────────────────

    fn describe_metrics(&self, auth: &AuthorizedRequest<'_>) -> Computed {
        let registry = self.guard.registry();
        let ids = auth.options.metric_ids.as_deref();
        let body = registry.as_markdown(ids);
        let empty = registry.describe(ids).is_empty();
        Computed {
            summary: body.lines().map(str::to_string).collect(),
            output: QueryOutput::Text { body },
            datasets: Vec::new(),
            rows_considered: 0,
            rows_excluded: 0,
            empty,
        }
    }

    fn list_segments(&self) -> Result<Computed> {
        let adoption_data = self.data.adoption()?;
        let mut datasets = vec![adoption_data.version().clone()];
        let segments = adoption_data.segments();

        let (enterprises, models) = match self.data.premium() {
            Ok(premium_data) => {
                datasets.push(premium_data.version().clone());
                (
                    premium_data.distinct(|r| Some(r.enterprise.as_str())),
                    premium_data.distinct(|r| Some(r.model.as_str())),
                )
            }
            Err(e) => {
                warn!(error = %e, "premium requests unavailable; listing segments only");
                (Vec::new(), Vec::new())
            }
        };

        let mut table = Table::new(&["kind", "value"]);
        let mut lines = Vec::new();
        for (kind, heading, values) in [
            ("segment", "Segments", &segments),
            ("enterprise", "Enterprises", &enterprises),
            ("model", "Models", &models),
        ] {
            for value in values {
                table.push(vec![Some(kind.into()), Some(value.as_str().into())]);
            }
            if !values.is_empty() {
                lines.push(format!("{}: {}", heading, values.join(", ")));
            }
        }
        if segments.is_empty() {
            lines.insert(0, "No segments found in the segment adoption dataset.".to_string());
        }

        Ok(Computed {
            output: QueryOutput::Table(table),
            summary: lines,
            datasets,
            rows_considered: adoption_data.len(),
            rows_excluded: 0,
            empty: segments.is_empty(),
        })
    }
}

// ── Rendering helpers ─────────────────────────────────────────────────────────

/// Adoption summaries name the segment rather than the user population.
/// Months a trend keeps: an explicit `limit`, otherwise the default window
/// unless the caller bounded the period with `date_range`.
fn trend_limit(auth: &AuthorizedRequest<'_>) -> Option<usize> {
    match (auth.options.limit, &auth.filters.date_range) {
        (Some(limit), _) => Some(limit),
        (None, None) => Some(DEFAULT_TREND_LIMIT),
        (None, Some(_)) => None,
    }
}

fn adoption_scope(filters: &FilterSpec) -> String {
    filters
        .segment
        .clone()
        .unwrap_or_else(|| "all segments".to_string())
}

fn ranking_period(auth: &AuthorizedRequest<'_>) -> String {
    match auth.options.month {
        Some(month) => month.to_string(),
        None => auth.filters.period().description(),
    }
}

fn population_line(label: &str, totals: &AdoptionTotals, population: UserType) -> Option<String> {
    let active = totals.active(population)?;
    let seats = totals.seats(population)?;
    let billing = totals.billing_adoption(population);
    if population == UserType::Contractor && active == 0 && seats == 0 && billing.is_none() {
        return None;
    }
    let coverage = totals
        .rate(population)
        .map(|r| format!(" ({:.1}% utilisation)", r))
        .unwrap_or_default();
    let billing = billing
        .map(|b| format!(", billing programme {:.1}%", b))
        .unwrap_or_default();
    Some(format!(
        "- {}: {} active of {} seats{}{}",
        label,
        format_count(active),
        format_count(seats),
        coverage,
        billing
    ))
}

fn adoption_value(measure: AdoptionMeasure, value: Option<f64>) -> Option<Value> {
    value.map(|v| {
        if measure.is_percentage() {
            Value::Float(v)
        } else {
            Value::Integer(v as i64)
        }
    })
}

fn format_adoption(measure: AdoptionMeasure, value: Option<f64>) -> String {
    match value {
        None => "n/a".to_string(),
        Some(v) if measure.is_percentage() => format_percent(Some(v)),
        Some(v) => format_count(v as i64),
    }
}

fn premium_value(measure: PremiumMeasure, totals: &PremiumTotals) -> Value {
    match measure {
        PremiumMeasure::DistinctUsers => Value::Integer(totals.distinct_users() as i64),
        PremiumMeasure::Sum(_) => Value::Decimal(measure.value(totals)),
    }
}

fn format_premium(measure: PremiumMeasure, value: Decimal) -> String {
    if measure.is_monetary() {
        format_currency(value)
    } else {
        format_decimal(value, 0)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use insights_core::error::GovernanceError;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const ADOPTION: &str = "\
Month,Segment,Active_users_FTE,total_seats_FTE,Active_users_nonFTE,total_seats_nonFTE,billing_adoption_FTE,billing_adoption_nonFTE
2025-01,Asia,80,100,5,10,70%,
2025-02,Asia,90,100,6,10,75%,
2025-01,Europe,50,100,0,0,,
2025-02,Europe,60,100,0,0,,
";

    const PREMIUM: &str = "\
request_date,enterprise,model,quantity,gross_amount,discount_amount,net_amount,mfcgd_id,is_employee,segment,exceeds_quota
2025-01-10,Contoso,gpt-4o,2,10.00,0,10.00,u1,true,Asia,false
2025-02-11,Contoso,claude-sonnet,1,5.00,0,5.00,u2,false,Asia,true
2025-01-12,Fabrikam,gpt-4o,4,8.00,2.00,6.00,u3,true,Europe,false
";

    struct Fixture {
        _dir: TempDir,
        segment: PathBuf,
        premium: PathBuf,
    }

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    fn fixture(adoption: &str, premium: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let segment = write(&dir, "segment_adoption.csv", adoption);
        let premium = write(&dir, "premium_requests.csv", premium);
        Fixture {
            _dir: dir,
            segment,
            premium,
        }
    }

    fn run(fx: &Fixture, request: ToolRequest) -> Result<QueryResult> {
        let registry = MetricsRegistry::builtin();
        let dispatcher =
            ToolDispatcher::with_registry(DataManager::new(&fx.segment, &fx.premium), &registry);
        dispatcher.dispatch(&request)
    }

    fn table(result: &QueryResult) -> &Table {
        match &result.output {
            QueryOutput::Table(table) => table,
            other => panic!("expected a table, got {other:?}"),
        }
    }

    // ── Pipeline ──────────────────────────────────────────────────────────

    #[test]
    fn test_unknown_tool() {
        let fx = fixture(ADOPTION, PREMIUM);
        let err = run(&fx, ToolRequest::new("delete_everything")).unwrap_err();
        assert!(matches!(err, InsightsError::UnknownTool(_)));
    }

    #[test]
    fn test_guard_runs_before_loading() {
        let registry = MetricsRegistry::builtin();
        let dispatcher = ToolDispatcher::with_registry(
            DataManager::new("/nonexistent/segment.csv", "/nonexistent/premium.csv"),
            &registry,
        );
        let err = dispatcher
            .dispatch(&ToolRequest::new("adoption_trend").with_metric("no_such_metric"))
            .unwrap_err();
        assert!(matches!(
            err,
            InsightsError::Governance(GovernanceError::UnknownMetric(_))
        ));

        let err = dispatcher
            .dispatch(&ToolRequest::new("adoption_trend"))
            .unwrap_err();
        assert!(matches!(err, InsightsError::SourceNotFound(_)));
    }

    #[test]
    fn test_tool_metric_mismatch() {
        let fx = fixture(ADOPTION, PREMIUM);
        let err = run(
            &fx,
            ToolRequest::new("adoption_trend").with_metric("premium_net_cost"),
        )
        .unwrap_err();
        assert!(matches!(err, InsightsError::InvalidArgument(_)));
    }

    #[test]
    fn test_dispatch_json() {
        let fx = fixture(ADOPTION, PREMIUM);
        let registry = MetricsRegistry::builtin();
        let dispatcher =
            ToolDispatcher::with_registry(DataManager::new(&fx.segment, &fx.premium), &registry);
        let result = dispatcher
            .dispatch_json(Some("premium_cost_summary"), json!({"filters": {"segment": "Asia"}}))
            .unwrap();
        assert_eq!(result.tool, "premium_cost_summary");
        assert_eq!(result.metric, "premium_net_cost");
        assert_eq!(dispatcher.list_tools().len(), 9);
    }

    // ── Adoption ──────────────────────────────────────────────────────────

    #[test]
    fn test_adoption_trend_rates() {
        let fx = fixture(ADOPTION, PREMIUM);
        let result = run(
            &fx,
            ToolRequest::new("adoption_trend")
                .with_metric("segment_fte_adoption")
                .with_filter("segment", "Asia"),
        )
        .unwrap();

        let rates = table(&result).column("segment_fte_adoption");
        assert_eq!(rates, vec![Some(Value::Float(80.0)), Some(Value::Float(90.0))]);
        assert_eq!(result.summary[1], "- 2025-01: 80.0%");
        assert_eq!(result.provenance.rows_considered, 2);
        assert_eq!(result.provenance.filters.segment.as_deref(), Some("Asia"));
        assert!(!result.empty);
    }

    #[test]
    fn test_adoption_trend_fills_missing_month() {
        let adoption = "\
Month,Segment,Active_users_FTE,total_seats_FTE
2025-01,Asia,80,100
2025-03,Asia,90,100
";
        let fx = fixture(adoption, PREMIUM);
        let result = run(&fx, ToolRequest::new("adoption_trend")).unwrap();

        let t = table(&result);
        assert_eq!(
            t.column("month"),
            vec![
                Some(Value::from("2025-01")),
                Some(Value::from("2025-02")),
                Some(Value::from("2025-03")),
            ]
        );
        assert_eq!(t.column("segment_fte_adoption")[1], None);
        assert_eq!(result.summary[2], "- 2025-02: no data");
    }

    #[test]
    fn test_explicit_range_is_not_cut_to_default_window() {
        let mut adoption = String::from("Month,Segment,Active_users_FTE,total_seats_FTE\n");
        for month in (1..=12).filter(|m| *m != 2) {
            adoption.push_str(&format!("2025-{month:02},Asia,80,100\n"));
        }
        let fx = fixture(&adoption, PREMIUM);

        let result = run(
            &fx,
            ToolRequest::new("adoption_trend").with_filter("date_range", "2025-01..2025-12"),
        )
        .unwrap();
        let t = table(&result);
        let months = t.column("month");
        assert_eq!(months.len(), 12);
        assert_eq!(months[0], Some(Value::from("2025-01")));
        assert_eq!(months[1], Some(Value::from("2025-02")));
        assert_eq!(t.column("segment_fte_adoption")[1], None);
        assert_eq!(months[11], Some(Value::from("2025-12")));

        let result = run(&fx, ToolRequest::new("adoption_trend")).unwrap();
        assert_eq!(table(&result).column("month").len(), DEFAULT_TREND_LIMIT);

        let mut request =
            ToolRequest::new("adoption_trend").with_filter("date_range", "2025-01..2025-12");
        request.options.limit = Some(3);
        let result = run(&fx, request).unwrap();
        assert_eq!(
            table(&result).column("month"),
            vec![
                Some(Value::from("2025-10")),
                Some(Value::from("2025-11")),
                Some(Value::from("2025-12")),
            ]
        );
    }

    #[test]
    fn test_premium_trend_keeps_explicit_range() {
        let fx = fixture(ADOPTION, PREMIUM);
        let result = run(
            &fx,
            ToolRequest::new("premium_cost_trend").with_filter("date_range", "2024-06..2025-02"),
        )
        .unwrap();
        let months = table(&result).column("month");
        assert_eq!(months.len(), 9);
        assert_eq!(months[0], Some(Value::from("2024-06")));
    }

    #[test]
    fn test_adoption_trend_limit() {
        let fx = fixture(ADOPTION, PREMIUM);
        let mut request = ToolRequest::new("adoption_trend");
        request.options.limit = Some(1);
        let result = run(&fx, request).unwrap();
        assert_eq!(table(&result).column("month"), vec![Some(Value::from("2025-02"))]);
    }

    #[test]
    fn test_unknown_segment_is_empty_not_error() {
        let fx = fixture(ADOPTION, PREMIUM);
        let result = run(
            &fx,
            ToolRequest::new("adoption_summary").with_filter("segment", "Atlantis"),
        )
        .unwrap();
        assert!(result.empty);
        assert!(table(&result).is_empty());
        assert_eq!(result.provenance.rows_considered, 0);
        assert!(!result.below_min_aggregation);
    }

    #[test]
    fn test_adoption_summary_lines() {
        let fx = fixture(ADOPTION, PREMIUM);
        let result = run(
            &fx,
            ToolRequest::new("adoption_summary").with_filter("segment", "Asia"),
        )
        .unwrap();

        assert_eq!(
            result.summary[0],
            "Segment adoption summary for Asia during all available months:"
        );
        assert_eq!(
            result.summary[1],
            "- FTE: 170 active of 200 seats (85.0% utilisation), billing programme 72.5%"
        );
        assert_eq!(
            result.summary[2],
            "- Non-FTE: 11 active of 20 seats (55.0% utilisation)"
        );
        assert!(result
            .summary
            .iter()
            .any(|l| l == "Highest FTE coverage: Asia at 90.0% (2025-02)"));
    }

    #[test]
    fn test_segment_ranking_adoption_month() {
        let fx = fixture(ADOPTION, PREMIUM);
        let mut request = ToolRequest::new("segment_ranking");
        request.options.month = Some("2025-02".to_string());
        let result = run(&fx, request).unwrap();

        let t = table(&result);
        assert_eq!(
            t.column("segment"),
            vec![Some(Value::from("Asia")), Some(Value::from("Europe"))]
        );
        assert_eq!(
            t.column("segment_fte_adoption"),
            vec![Some(Value::Float(90.0)), Some(Value::Float(60.0))]
        );
        assert_eq!(result.summary[0], "Top segments by FTE adoption rate (2025-02):");
    }

    // ── Premium ───────────────────────────────────────────────────────────

    #[test]
    fn test_premium_cost_summary_total() {
        let fx = fixture(ADOPTION, PREMIUM);
        let result = run(
            &fx,
            ToolRequest::new("premium_cost_summary")
                .with_metric("premium_net_cost")
                .with_filter("segment", "Asia"),
        )
        .unwrap();

        match &result.output {
            QueryOutput::Scalar { value, .. } => {
                assert_eq!(value.as_ref().and_then(Value::as_decimal), Some(dec!(15)));
            }
            other => panic!("expected a scalar, got {other:?}"),
        }
        assert!(result.summary.iter().any(|l| l == "- Net billable cost: $15.00"));
        assert!(result.summary.iter().any(|l| l == "- Requests exceeding quota: 1"));
        assert!(result
            .summary
            .iter()
            .any(|l| l == "- Top models: gpt-4o (2), claude-sonnet (1)"));
    }

    #[test]
    fn test_premium_summary_with_huge_amounts() {
        let huge = "\
request_date,enterprise,model,quantity,gross_amount,discount_amount,net_amount,mfcgd_id,is_employee,segment
2025-01-10,Contoso,gpt-4o,1,0,0,79228162514264337593543950335,u1,true,Asia
2025-01-11,Contoso,gpt-4o,1,0,0,79228162514264337593543950335,u2,true,Asia
";
        let fx = fixture(ADOPTION, huge);
        let result = run(&fx, ToolRequest::new("premium_cost_summary")).unwrap();

        match &result.output {
            QueryOutput::Scalar { value, .. } => {
                assert_eq!(value.as_ref().and_then(Value::as_decimal), Some(Decimal::MAX));
            }
            other => panic!("expected a scalar, got {other:?}"),
        }
        assert!(result.summary.iter().any(|l| l.contains("clamped")));
    }

    #[test]
    fn test_quota_line_needs_column() {
        let without_quota = "\
request_date,enterprise,model,quantity,gross_amount,discount_amount,net_amount,mfcgd_id,is_employee,segment
2025-01-10,Contoso,gpt-4o,2,10.00,0,10.00,u1,true,Asia
";
        let fx = fixture(ADOPTION, without_quota);
        let result = run(&fx, ToolRequest::new("premium_cost_summary")).unwrap();
        assert!(!result.summary.iter().any(|l| l.contains("exceeding quota")));

        let fx = fixture(ADOPTION, PREMIUM);
        let result = run(
            &fx,
            ToolRequest::new("premium_cost_summary").with_filter("segment", "Europe"),
        )
        .unwrap();
        assert!(result.summary.iter().any(|l| l == "- Requests exceeding quota: 0"));
    }

    #[test]
    fn test_premium_user_type_filter() {
        let fx = fixture(ADOPTION, PREMIUM);
        let result = run(
            &fx,
            ToolRequest::new("premium_cost_summary").with_filter("user_type", "contractor"),
        )
        .unwrap();
        assert_eq!(result.provenance.rows_considered, 1);
        assert!(result.summary[0].contains("contractors"));
    }

    #[test]
    fn test_premium_group_by_enterprise() {
        let fx = fixture(ADOPTION, PREMIUM);
        let mut request = ToolRequest::new("premium_cost_summary");
        request.options.group_by = Some("enterprise".to_string());
        let result = run(&fx, request).unwrap();

        let t = table(&result);
        assert_eq!(
            t.column("enterprise"),
            vec![Some(Value::from("Contoso")), Some(Value::from("Fabrikam"))]
        );
        assert_eq!(result.summary[0], "Enterprise breakdown for all users (all available months):");
        assert_eq!(result.summary[1], "- Contoso: 3 requests, $15.00 net cost, 2 users");
    }

    #[test]
    fn test_premium_cost_trend() {
        let fx = fixture(ADOPTION, PREMIUM);
        let result = run(&fx, ToolRequest::new("premium_cost_trend")).unwrap();
        let t = table(&result);
        assert_eq!(
            t.column("premium_net_cost"),
            vec![Some(Value::Decimal(dec!(16.00))), Some(Value::Decimal(dec!(5.00)))]
        );
        assert_eq!(result.summary[1], "- 2025-01: $16.00");
    }

    #[test]
    fn test_model_ranking() {
        let fx = fixture(ADOPTION, PREMIUM);
        let result = run(&fx, ToolRequest::new("model_ranking")).unwrap();
        let t = table(&result);
        assert_eq!(
            t.column("model"),
            vec![Some(Value::from("gpt-4o")), Some(Value::from("claude-sonnet"))]
        );
        assert_eq!(result.summary[1], "- gpt-4o: $16.00 (6 requests)");
    }

    #[test]
    fn test_below_min_aggregation_flag() {
        let fx = fixture(ADOPTION, PREMIUM);
        let result = run(
            &fx,
            ToolRequest::new("premium_cost_summary").with_metric("premium_unique_users"),
        )
        .unwrap();
        assert!(result.below_min_aggregation);
        assert!(result.summary.last().unwrap().starts_with("Note: fewer than 5 records"));
        match &result.output {
            QueryOutput::Scalar { value, .. } => assert_eq!(value, &Some(Value::Integer(3))),
            other => panic!("expected a scalar, got {other:?}"),
        }
    }

    // ── Correlation ───────────────────────────────────────────────────────

    #[test]
    fn test_correlation_joins_segments() {
        let fx = fixture(ADOPTION, PREMIUM);
        let result = run(&fx, ToolRequest::new("adoption_cost_correlation")).unwrap();

        let t = table(&result);
        assert_eq!(t.len(), 2);
        assert_eq!(
            t.column("adoption_rate"),
            vec![Some(Value::Float(85.0)), Some(Value::Float(55.0))]
        );
        assert_eq!(
            t.column("net_cost"),
            vec![Some(Value::Decimal(dec!(15.00))), Some(Value::Decimal(dec!(6.00)))]
        );
        assert_eq!(result.provenance.datasets.len(), 2);
        assert_eq!(result.provenance.rows_excluded, 0);
        assert!(result
            .summary
            .iter()
            .any(|l| l.starts_with("Correlation not computed")));
    }

    #[test]
    fn test_correlation_single_population() {
        let fx = fixture(ADOPTION, PREMIUM);
        let result = run(
            &fx,
            ToolRequest::new("adoption_cost_correlation").with_filter("user_type", "contractor"),
        )
        .unwrap();

        let t = table(&result);
        assert_eq!(t.column("segment"), vec![Some(Value::from("Asia"))]);
        assert_eq!(t.column("adoption_rate"), vec![Some(Value::Float(55.0))]);
        assert_eq!(t.column("net_cost"), vec![Some(Value::Decimal(dec!(5.00)))]);
    }

    // ── Catalogue ─────────────────────────────────────────────────────────

    #[test]
    fn test_list_segments() {
        let fx = fixture(ADOPTION, PREMIUM);
        let result = run(&fx, ToolRequest::new("list_segments")).unwrap();
        assert_eq!(result.metric, "list_segments");
        assert_eq!(result.summary[0], "Segments: Asia, Europe");
        assert_eq!(result.summary[1], "Enterprises: Contoso, Fabrikam");
        assert_eq!(result.summary[2], "Models: claude-sonnet, gpt-4o");
    }

    #[test]
    fn test_describe_metrics_reports_unknown_ids() {
        let fx = fixture(ADOPTION, PREMIUM);
        let mut request = ToolRequest::new("describe_metrics");
        request.options.metric_ids =
            Some(vec!["premium_net_cost".to_string(), "revenue".to_string()]);
        let result = run(&fx, request).unwrap();

        assert!(!result.empty);
        assert_eq!(result.summary.last().unwrap(), "Unknown metric ids: revenue");
    }

    #[test]
    fn test_describe_metrics_subset() {
        let fx = fixture(ADOPTION, PREMIUM);
        let mut request = ToolRequest::new("describe_metrics");
        request.options.metric_ids = Some(vec!["premium_net_cost".to_string()]);
        let result = run(&fx, request).unwrap();

        assert!(!result.empty);
        assert_eq!(result.summary.len(), 2);
        assert!(result.summary[1].starts_with("- Premium request net cost"));
        assert!(result.provenance.datasets.is_empty());
    }
}
