//! Governance guard: every tool request passes through here before any
//! dataset is touched.
//!
//! Checks run in a fixed order. The metric must exist, every filter key must
//! be declared by the metric, and the free text must pass the safety policy.
//! Only then are filter values and options parsed into typed form.

use insights_core::error::{GovernanceError, InsightsError, Result};
use insights_core::models::{FilterKey, FilterSpec, UserType};
use insights_core::registry::{MetricDefinition, MetricsRegistry};
use insights_core::time_utils::{DateRange, Month};
use insights_data::premium::PremiumDimension;
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::safety::SafetyPolicy;
use crate::tools::{ToolName, ToolRequest, DEFAULT_TOP_N};

/// Argument aliases accepted in place of a `date_range` object.
const START_ALIAS: &str = "start_month";
const END_ALIAS: &str = "end_month";

/// Typed tool options.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedOptions {
    pub limit: Option<usize>,
    pub top_n: usize,
    pub group_by: Option<PremiumDimension>,
    pub by_employee: bool,
    pub month: Option<Month>,
    pub metric_ids: Option<Vec<String>>,
}

/// A request that passed every governance check.
#[derive(Debug, Clone)]
pub struct AuthorizedRequest<'r> {
    pub tool: ToolName,
    /// `None` only for tools that compute no metric.
    pub metric: Option<&'r MetricDefinition>,
    pub filters: FilterSpec,
    pub options: ResolvedOptions,
    pub question: Option<String>,
}

impl AuthorizedRequest<'_> {
    /// Identifier reported in results; the tool name for ungoverned tools.
    pub fn metric_id(&self) -> &str {
        self.metric.map_or(self.tool.as_str(), |m| m.id.as_str())
    }
}

pub struct Guard<'r> {
    registry: &'r MetricsRegistry,
    policy: SafetyPolicy,
}

impl<'r> Guard<'r> {
    pub fn new(registry: &'r MetricsRegistry, policy: SafetyPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn registry(&self) -> &'r MetricsRegistry {
        self.registry
    }

    /// Validate `request` for `tool`. Never reads a dataset.
    pub fn authorize(&self, tool: ToolName, request: &ToolRequest) -> Result<AuthorizedRequest<'r>> {
        let metric = self.resolve_metric(tool, request)?;
        self.check_filter_keys(tool, metric, request)?;
        self.screen(request)?;

        let filters = parse_filters(request)?;
        let options = parse_options(request)?;
        debug!(
            tool = tool.as_str(),
            metric = metric.map(|m| m.id.as_str()).unwrap_or("-"),
            filters = ?filters.keys(),
            "request authorized"
        );
        Ok(AuthorizedRequest {
            tool,
            metric,
            filters,
            options,
            question: request.question.clone(),
        })
    }

    fn resolve_metric(
        &self,
        tool: ToolName,
        request: &ToolRequest,
    ) -> Result<Option<&'r MetricDefinition>> {
        let Some(metric_id) = request.metric.as_deref().or(tool.default_metric()) else {
            return Ok(None);
        };
        match self.registry.lookup(metric_id.trim()) {
            Some(def) => Ok(Some(def)),
            None => {
                warn!(tool = tool.as_str(), metric = metric_id, "unknown metric rejected");
                Err(GovernanceError::UnknownMetric(metric_id.to_string()).into())
            }
        }
    }

    fn check_filter_keys(
        &self,
        tool: ToolName,
        metric: Option<&MetricDefinition>,
        request: &ToolRequest,
    ) -> Result<()> {
        let governing = metric.filter(|_| tool.is_governed());
        for raw_key in request.filters.keys() {
            let key = match raw_key.as_str() {
                START_ALIAS | END_ALIAS => Some(FilterKey::DateRange),
                other => other.parse::<FilterKey>().ok(),
            };
            let allowed = match (governing, key) {
                (Some(def), Some(key)) => def.allows(key),
                _ => false,
            };
            if !allowed {
                let (metric_name, allowed_list) = match governing {
                    Some(def) => (def.id.clone(), def.allowed_filter_list()),
                    None => (tool.as_str().to_string(), "none".to_string()),
                };
                warn!(
                    tool = tool.as_str(),
                    metric = %metric_name,
                    filter = %raw_key,
                    "disallowed filter rejected"
                );
                return Err(GovernanceError::DisallowedFilter {
                    metric: metric_name,
                    filter: raw_key.clone(),
                    allowed: allowed_list,
                }
                .into());
            }
        }
        Ok(())
    }

    fn screen(&self, request: &ToolRequest) -> Result<()> {
        let texts = request
            .question
            .iter()
            .map(String::as_str)
            .chain(request.filters.values().filter_map(Json::as_str));
        for text in texts {
            if let Some(violation) = self.policy.screen(text) {
                warn!(rule = %violation.rule, "unsafe request blocked");
                return Err(GovernanceError::UnsafeRequest {
                    rule: violation.rule,
                    guidance: violation.guidance,
                }
                .into());
            }
        }
        Ok(())
    }
}

// ── Value parsing ─────────────────────────────────────────────────────────────

fn parse_filters(request: &ToolRequest) -> Result<FilterSpec> {
    let filters = &request.filters;
    let mut spec = FilterSpec {
        segment: text_filter(filters.get("segment"), "segment")?,
        user_type: text_filter(filters.get("user_type"), "user_type")?
            .map(|raw| raw.parse::<UserType>())
            .transpose()?,
        enterprise: text_filter(filters.get("enterprise"), "enterprise")?,
        model: text_filter(filters.get("model"), "model")?,
        date_range: None,
    };

    let start = text_filter(filters.get(START_ALIAS), START_ALIAS)?;
    let end = text_filter(filters.get(END_ALIAS), END_ALIAS)?;
    spec.date_range = match (filters.get("date_range"), start.is_some() || end.is_some()) {
        (Some(_), true) => {
            return Err(InsightsError::InvalidArgument(
                "Use either date_range or start_month/end_month, not both".to_string(),
            ))
        }
        (Some(value), false) => Some(parse_date_range(value)?),
        (None, true) => Some(DateRange::parse(start.as_deref(), end.as_deref())?),
        (None, false) => None,
    };
    Ok(spec)
}

/// A trimmed, non-empty string filter value.
fn text_filter(value: Option<&Json>, key: &str) -> Result<Option<String>> {
    match value {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) if !s.trim().is_empty() => Ok(Some(s.trim().to_string())),
        Some(other) => Err(InsightsError::InvalidArgument(format!(
            "Filter '{}' must be a non-empty string, got {}",
            key, other
        ))),
    }
}

/// `{"start": "2025-01", "end": "2025-03"}`, `"2025-01..2025-03"`, or a
/// single `"2025-01"` month.
fn parse_date_range(value: &Json) -> Result<DateRange> {
    match value {
        Json::Object(map) => {
            for key in map.keys() {
                if key != "start" && key != "end" {
                    return Err(InsightsError::InvalidArgument(format!(
                        "date_range accepts only start and end, got '{}'",
                        key
                    )));
                }
            }
            let start = text_filter(map.get("start"), "date_range.start")?;
            let end = text_filter(map.get("end"), "date_range.end")?;
            DateRange::parse(start.as_deref(), end.as_deref())
        }
        Json::String(raw) => match raw.split_once("..") {
            Some((start, end)) => {
                let start = Some(start.trim()).filter(|s| !s.is_empty());
                let end = Some(end.trim()).filter(|s| !s.is_empty());
                DateRange::parse(start, end)
            }
            None => DateRange::parse(Some(raw.trim()), Some(raw.trim())),
        },
        other => Err(InsightsError::InvalidArgument(format!(
            "date_range must be an object or a string, got {}",
            other
        ))),
    }
}

fn parse_options(request: &ToolRequest) -> Result<ResolvedOptions> {
    let raw = &request.options;
    if raw.limit == Some(0) {
        return Err(InsightsError::InvalidArgument("limit must be at least 1".to_string()));
    }
    if raw.top_n == Some(0) {
        return Err(InsightsError::InvalidArgument("top_n must be at least 1".to_string()));
    }
    let month = raw
        .month
        .as_deref()
        .map(|m| {
            m.parse::<Month>().map_err(|_| {
                InsightsError::InvalidArgument(format!("Unable to parse '{}' as YYYY-MM month", m))
            })
        })
        .transpose()?;

    Ok(ResolvedOptions {
        limit: raw.limit,
        top_n: raw.top_n.unwrap_or(DEFAULT_TOP_N),
        group_by: raw
            .group_by
            .as_deref()
            .map(str::parse::<PremiumDimension>)
            .transpose()?,
        by_employee: raw.by_employee,
        month,
        metric_ids: raw.metric_ids.clone(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
