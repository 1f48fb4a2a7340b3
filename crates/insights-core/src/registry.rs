//! The metrics catalogue: which metrics exist and how they may be queried.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{InsightsError, Result};
use crate::models::{AmountColumn, DatasetKind, FilterKey, UserType};

/// How a metric turns filtered rows into a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Aggregation {
    /// active / seats × 100 for one population.
    AdoptionRate { population: UserType },
    /// Summed active users (both populations).
    ActiveUsers,
    /// Mean of the pre-computed billing adoption percentage.
    BillingAdoption { population: UserType },
    /// Decimal sum of a premium request column.
    PremiumSum { column: AmountColumn },
    /// Distinct `mfcgd_id` values.
    DistinctUsers,
    /// Adoption rate against premium cost, joined on segment.
    Correlation,
}

impl Aggregation {
    /// The datasets this aggregation reads.
    pub fn datasets(&self) -> &'static [DatasetKind] {
        match self {
            Aggregation::AdoptionRate { .. }
            | Aggregation::ActiveUsers
            | Aggregation::BillingAdoption { .. } => &[DatasetKind::SegmentAdoption],
            Aggregation::PremiumSum { .. } | Aggregation::DistinctUsers => {
                &[DatasetKind::PremiumRequests]
            }
            Aggregation::Correlation => {
                &[DatasetKind::SegmentAdoption, DatasetKind::PremiumRequests]
            }
        }
    }
}

/// Immutable description of one governed metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub id: String,
    pub name: String,
    pub definition: String,
    pub owner: String,
    pub datasets: Vec<DatasetKind>,
    pub allowed_filters: BTreeSet<FilterKey>,
    pub aggregation: Aggregation,
    /// Results built from fewer rows are flagged.
    pub min_aggregation_size: usize,
    pub freshness_days: u32,
}

impl MetricDefinition {
    pub fn allows(&self, key: FilterKey) -> bool {
        self.allowed_filters.contains(&key)
    }

    pub fn reads(&self, kind: DatasetKind) -> bool {
        self.datasets.contains(&kind)
    }

    /// Comma-separated allowed filter names, in declaration order.
    pub fn allowed_filter_list(&self) -> String {
        self.allowed_filters
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// One catalogue bullet, e.g. for the `describe_metrics` tool.
    pub fn as_bullet(&self) -> String {
        format!(
            "{}: {} (owner: {}; min aggregation {}; refreshed every {} days)",
            self.name,
            self.definition.trim(),
            self.owner,
            self.min_aggregation_size,
            self.freshness_days
        )
    }
}

// ── Built-in catalogue ────────────────────────────────────────────────────────

const OWNER: &str = "Engineering Productivity Analytics";

fn filters(keys: &[FilterKey]) -> BTreeSet<FilterKey> {
    keys.iter().copied().collect()
}

fn metric(
    id: &str,
    name: &str,
    definition: &str,
    aggregation: Aggregation,
    allowed: &[FilterKey],
    min_aggregation_size: usize,
) -> MetricDefinition {
    MetricDefinition {
        id: id.to_string(),
        name: name.to_string(),
        definition: definition.to_string(),
        owner: OWNER.to_string(),
        datasets: aggregation.datasets().to_vec(),
        allowed_filters: filters(allowed),
        aggregation,
        min_aggregation_size,
        freshness_days: 30,
    }
}

fn builtin_catalogue() -> Vec<MetricDefinition> {
    use FilterKey as F;
    let premium_filters = [F::Segment, F::UserType, F::Enterprise, F::Model, F::DateRange];

    vec![
        metric(
            "segment_fte_adoption",
            "FTE adoption rate",
            "Active FTE Copilot users divided by FTE seats, as a percentage.",
            Aggregation::AdoptionRate {
                population: UserType::Fte,
            },
            &[F::Segment, F::DateRange],
            1,
        ),
        metric(
            "segment_non_fte_adoption",
            "Non-FTE adoption rate",
            "Active contractor Copilot users divided by contractor seats, as a percentage.",
            Aggregation::AdoptionRate {
                population: UserType::Contractor,
            },
            &[F::Segment, F::DateRange],
            1,
        ),
        metric(
            "segment_active_users",
            "Active users",
            "Count of active Copilot users per segment, FTE and non-FTE.",
            Aggregation::ActiveUsers,
            &[F::Segment, F::DateRange],
            1,
        ),
        metric(
            "billing_adoption_fte",
            "FTE billing programme adoption",
            "Pre-computed share of FTE seats enrolled in the billing programme.",
            Aggregation::BillingAdoption {
                population: UserType::Fte,
            },
            &[F::Segment, F::DateRange],
            1,
        ),
        metric(
            "premium_net_cost",
            "Premium request net cost",
            "Billable premium request cost after the free monthly quota discount.",
            Aggregation::PremiumSum {
                column: AmountColumn::NetAmount,
            },
            &premium_filters,
            1,
        ),
        metric(
            "premium_gross_cost",
            "Premium request gross cost",
            "Premium request cost before the free quota discount.",
            Aggregation::PremiumSum {
                column: AmountColumn::GrossAmount,
            },
            &premium_filters,
            1,
        ),
        metric(
            "premium_discount",
            "Premium request discount",
            "Discount granted by the free monthly premium request quota.",
            Aggregation::PremiumSum {
                column: AmountColumn::DiscountAmount,
            },
            &premium_filters,
            1,
        ),
        metric(
            "premium_requests",
            "Premium request volume",
            "Number of premium requests made.",
            Aggregation::PremiumSum {
                column: AmountColumn::Quantity,
            },
            &premium_filters,
            1,
        ),
        metric(
            "premium_unique_users",
            "Premium request users",
            "Distinct engineers (by Entra ID) making premium requests.",
            Aggregation::DistinctUsers,
            &premium_filters,
            5,
        ),
        metric(
            "adoption_cost_correlation",
            "Adoption versus premium cost",
            "Per-segment adoption rate compared with premium request net cost.",
            Aggregation::Correlation,
            &[F::Segment, F::UserType, F::DateRange],
            1,
        ),
    ]
}

// ── Catalogue file format ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CatalogueFile {
    #[serde(default)]
    metrics: BTreeMap<String, CatalogueEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogueEntry {
    name: String,
    definition: String,
    owner: String,
    aggregation: Aggregation,
    #[serde(default)]
    allowed_filters: BTreeSet<FilterKey>,
    #[serde(default = "default_min_aggregation")]
    min_aggregation_size: usize,
    #[serde(default = "default_freshness")]
    freshness_days: u32,
}

fn default_min_aggregation() -> usize {
    1
}

fn default_freshness() -> u32 {
    30
}

// ── MetricsRegistry ───────────────────────────────────────────────────────────

static GLOBAL_REGISTRY: OnceLock<MetricsRegistry> = OnceLock::new();

/// Read-only catalogue of metric definitions keyed by identifier.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    metrics: BTreeMap<String, MetricDefinition>,
}

impl MetricsRegistry {
    /// The catalogue compiled into the binary.
    pub fn builtin() -> Self {
        let metrics = builtin_catalogue()
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();
        Self { metrics }
    }

    /// Build from explicit definitions, rejecting duplicate identifiers.
    pub fn from_definitions(definitions: Vec<MetricDefinition>) -> Result<Self> {
        let mut metrics = BTreeMap::new();
        for def in definitions {
            if def.datasets.is_empty() {
                return Err(InsightsError::Registry(format!(
                    "Metric '{}' does not read any dataset",
                    def.id
                )));
            }
            if metrics.contains_key(&def.id) {
                return Err(InsightsError::Registry(format!(
                    "Duplicate metric identifier '{}'",
                    def.id
                )));
            }
            metrics.insert(def.id.clone(), def);
        }
        Ok(Self { metrics })
    }

    /// Parse a JSON catalogue of the form `{"metrics": {"<id>": {...}}}`.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: CatalogueFile = serde_json::from_str(text)
            .map_err(|e| InsightsError::Registry(format!("Unable to parse catalogue: {}", e)))?;

        let definitions = file
            .metrics
            .into_iter()
            .map(|(id, entry)| MetricDefinition {
                id,
                name: entry.name,
                definition: entry.definition,
                owner: entry.owner,
                datasets: entry.aggregation.datasets().to_vec(),
                allowed_filters: entry.allowed_filters,
                aggregation: entry.aggregation,
                min_aggregation_size: entry.min_aggregation_size,
                freshness_days: entry.freshness_days,
            })
            .collect();
        Self::from_definitions(definitions)
    }

    /// Load a JSON catalogue file.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(InsightsError::Registry(format!(
                "Metrics registry not found at {}",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|source| InsightsError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::from_json_str(&text)?;
        tracing::info!(
            path = %path.display(),
            metrics = registry.len(),
            "loaded metrics catalogue"
        );
        Ok(registry)
    }

    /// Install the process-wide registry. Fails if one is already installed.
    pub fn install(registry: MetricsRegistry) -> Result<&'static MetricsRegistry> {
        GLOBAL_REGISTRY
            .set(registry)
            .map_err(|_| InsightsError::Registry("metrics registry already initialised".into()))?;
        Ok(Self::global())
    }

    /// The process-wide registry, defaulting to the built-in catalogue.
    pub fn global() -> &'static MetricsRegistry {
        GLOBAL_REGISTRY.get_or_init(Self::builtin)
    }

    pub fn lookup(&self, metric_id: &str) -> Option<&MetricDefinition> {
        self.metrics.get(metric_id)
    }

    /// Every definition, ordered by identifier. Each call starts afresh.
    pub fn list_metrics(&self) -> impl Iterator<Item = &MetricDefinition> + '_ {
        self.metrics.values()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Definitions for `metric_ids` (unknown ids skipped), or all of them.
    pub fn describe(&self, metric_ids: Option<&[String]>) -> Vec<&MetricDefinition> {
        match metric_ids {
            None => self.list_metrics().collect(),
            Some(ids) => ids.iter().filter_map(|id| self.lookup(id)).collect(),
        }
    }

    /// Requested ids with no definition, in request order.
    pub fn unknown_ids<'a>(&self, metric_ids: &'a [String]) -> Vec<&'a str> {
        metric_ids
            .iter()
            .map(String::as_str)
            .filter(|id| self.lookup(id).is_none())
            .collect()
    }

    /// Markdown catalogue used by the `describe_metrics` tool.
    ///
    /// Requested ids missing from the catalogue are listed on a final line.
    pub fn as_markdown(&self, metric_ids: Option<&[String]>) -> String {
        let selected = self.describe(metric_ids);
        let mut lines = if selected.is_empty() {
            vec!["No metric definitions available for the requested identifiers.".to_string()]
        } else {
            let mut lines = vec!["Metric catalogue:".to_string()];
            lines.extend(selected.iter().map(|m| format!("- {}", m.as_bullet())));
            lines
        };
        let unknown = metric_ids.map(|ids| self.unknown_ids(ids)).unwrap_or_default();
        if !unknown.is_empty() {
            lines.push(format!("Unknown metric ids: {}", unknown.join(", ")));
        }
        lines.join("\n")
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
