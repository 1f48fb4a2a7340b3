//! Tool catalogue and the JSON request shape tools are invoked with.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use insights_core::error::InsightsError;
use insights_core::registry::Aggregation;
use serde::{Deserialize, Serialize};

/// Default number of months a trend reports.
pub const DEFAULT_TREND_LIMIT: usize = 6;

/// Default number of entries a ranking reports.
pub const DEFAULT_TOP_N: usize = 5;

/// Every tool exposed to the conversational agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    AdoptionSummary,
    AdoptionTrend,
    PremiumCostSummary,
    PremiumCostTrend,
    ModelRanking,
    SegmentRanking,
    AdoptionCostCorrelation,
    DescribeMetrics,
    ListSegments,
}

impl ToolName {
    pub const ALL: [ToolName; 9] = [
        ToolName::AdoptionSummary,
        ToolName::AdoptionTrend,
        ToolName::PremiumCostSummary,
        ToolName::PremiumCostTrend,
        ToolName::ModelRanking,
        ToolName::SegmentRanking,
        ToolName::AdoptionCostCorrelation,
        ToolName::DescribeMetrics,
        ToolName::ListSegments,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::AdoptionSummary => "adoption_summary",
            ToolName::AdoptionTrend => "adoption_trend",
            ToolName::PremiumCostSummary => "premium_cost_summary",
            ToolName::PremiumCostTrend => "premium_cost_trend",
            ToolName::ModelRanking => "model_ranking",
            ToolName::SegmentRanking => "segment_ranking",
            ToolName::AdoptionCostCorrelation => "adoption_cost_correlation",
            ToolName::DescribeMetrics => "describe_metrics",
            ToolName::ListSegments => "list_segments",
        }
    }

    /// Metric used when the request names none. `None` for tools that do
    /// not compute a governed metric.
    pub fn default_metric(&self) -> Option<&'static str> {
        match self {
            ToolName::AdoptionSummary | ToolName::AdoptionTrend | ToolName::SegmentRanking => {
                Some("segment_fte_adoption")
            }
            ToolName::PremiumCostSummary | ToolName::PremiumCostTrend | ToolName::ModelRanking => {
                Some("premium_net_cost")
            }
            ToolName::AdoptionCostCorrelation => Some("adoption_cost_correlation"),
            ToolName::DescribeMetrics | ToolName::ListSegments => None,
        }
    }

    /// `true` when the tool computes a metric and goes through the full guard.
    pub fn is_governed(&self) -> bool {
        self.default_metric().is_some()
    }

    /// Whether this tool knows how to compute `aggregation`.
    pub fn accepts(&self, aggregation: &Aggregation) -> bool {
        let adoption = matches!(
            aggregation,
            Aggregation::AdoptionRate { .. }
                | Aggregation::ActiveUsers
                | Aggregation::BillingAdoption { .. }
        );
        let premium = matches!(
            aggregation,
            Aggregation::PremiumSum { .. } | Aggregation::DistinctUsers
        );
        match self {
            ToolName::AdoptionSummary | ToolName::AdoptionTrend => adoption,
            ToolName::PremiumCostSummary | ToolName::PremiumCostTrend | ToolName::ModelRanking => {
                premium
            }
            ToolName::SegmentRanking => adoption || premium,
            ToolName::AdoptionCostCorrelation => matches!(aggregation, Aggregation::Correlation),
            ToolName::DescribeMetrics | ToolName::ListSegments => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolName::AdoptionSummary => {
                "Summarise FTE and contractor adoption from the aggregated segment dataset."
            }
            ToolName::AdoptionTrend => {
                "Time-series view of an adoption metric, one entry per month."
            }
            ToolName::PremiumCostSummary => {
                "Summarise premium request usage, costs and users, optionally grouped."
            }
            ToolName::PremiumCostTrend => "Monthly premium request cost or volume.",
            ToolName::ModelRanking => "Rank AI models by a premium request metric.",
            ToolName::SegmentRanking => {
                "Rank segments by an adoption or premium request metric."
            }
            ToolName::AdoptionCostCorrelation => {
                "Compare per-segment adoption rate against premium request net cost."
            }
            ToolName::DescribeMetrics => "Return catalogue entries for the analytics metrics.",
            ToolName::ListSegments => {
                "Enumerate segments, enterprises and models present in the datasets."
            }
        }
    }

    /// Argument names and their meaning, for the tool listing.
    fn arguments(&self) -> Vec<(&'static str, &'static str)> {
        let mut args = Vec::new();
        if self.is_governed() {
            args.push(("metric", "Metric identifier from the catalogue"));
            args.push(("filters", "segment, user_type, enterprise, model, date_range"));
            args.push(("question", "Original user question, screened by the safety policy"));
        }
        match self {
            ToolName::AdoptionTrend | ToolName::PremiumCostTrend => {
                args.push(("options.limit", "Keep the most recent N months (default 6 unless date_range is given)"));
            }
            ToolName::PremiumCostSummary => {
                args.push(("options.group_by", "segment, model, enterprise or month"));
            }
            ToolName::ModelRanking => {
                args.push(("options.top_n", "Number of models (default 5)"));
            }
            ToolName::SegmentRanking => {
                args.push(("options.top_n", "Number of segments (default 5)"));
                args.push(("options.month", "Restrict the ranking to one YYYY-MM month"));
            }
            ToolName::AdoptionCostCorrelation => {
                args.push(("options.by_employee", "Split each segment into FTE and contractors"));
            }
            ToolName::DescribeMetrics => {
                args.push(("options.metric_ids", "Only describe these metric identifiers"));
            }
            _ => {}
        }
        args
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = InsightsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|tool| tool.as_str() == value.trim())
            .ok_or_else(|| InsightsError::UnknownTool(value.to_string()))
    }
}

// ── Listing ───────────────────────────────────────────────────────────────────

/// One entry of the tool listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDescription {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments: BTreeMap<&'static str, &'static str>,
}

/// Descriptions of every tool, in catalogue order.
pub fn catalogue() -> Vec<ToolDescription> {
    ToolName::ALL
        .into_iter()
        .map(|tool| ToolDescription {
            name: tool.as_str(),
            description: tool.description(),
            arguments: tool.arguments().into_iter().collect(),
        })
        .collect()
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// Tool-specific knobs. Unknown option names are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolOptions {
    pub limit: Option<usize>,
    pub group_by: Option<String>,
    pub top_n: Option<usize>,
    pub by_employee: bool,
    pub month: Option<String>,
    pub metric_ids: Option<Vec<String>>,
}

/// A raw tool invocation as received from the agent.
///
/// `filters` stays untyped until the guard has checked its keys against the
/// metric definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolRequest {
    pub tool: String,
    pub metric: Option<String>,
    pub filters: serde_json::Map<String, serde_json::Value>,
    pub options: ToolOptions,
    pub question: Option<String>,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            ..Default::default()
        }
    }

    pub fn with_metric(mut self, metric: &str) -> Self {
        self.metric = Some(metric.to_string());
        self
    }

    pub fn with_filter(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.filters.insert(key.to_string(), value.into());
        self
    }

    pub fn with_question(mut self, question: &str) -> Self {
        self.question = Some(question.to_string());
        self
    }

    /// Parse a request from JSON arguments. `tool` fills the `tool` field
    /// when the arguments do not carry one.
    pub fn from_json(tool: Option<&str>, arguments: serde_json::Value) -> Result<Self, InsightsError> {
        if !arguments.is_object() {
            return Err(InsightsError::InvalidArgument(
                "Tool arguments must be a JSON object".to_string(),
            ));
        }
        let mut request: ToolRequest = serde_json::from_value(arguments)
            .map_err(|e| InsightsError::InvalidArgument(format!("Malformed tool request: {}", e)))?;
        if let Some(tool) = tool {
            if request.tool.is_empty() {
                request.tool = tool.to_string();
            } else if request.tool != tool {
                return Err(InsightsError::InvalidArgument(format!(
                    "Tool '{}' does not match request tool '{}'",
                    tool, request.tool
                )));
            }
        }
        Ok(request)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
