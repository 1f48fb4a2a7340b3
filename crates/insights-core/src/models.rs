use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::InsightsError;
use crate::time_utils::DateRange;

// ── Scalars ───────────────────────────────────────────────────────────────────

/// Type hint handed to the normalizer for one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Text,
    Integer,
    Float,
    /// Monetary amounts and request quantities.
    Decimal,
    /// Float constrained to 0–100.
    Percent,
    Boolean,
    Date,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Decimal => "decimal",
            ValueKind::Percent => "percentage",
            ValueKind::Boolean => "boolean",
            ValueKind::Date => "date",
        }
    }
}

/// A single typed cell after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Integer(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Decimal(d) => write!(f, "{}", d.normalize()),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

// ── Datasets ──────────────────────────────────────────────────────────────────

/// The two exported datasets the system reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    SegmentAdoption,
    PremiumRequests,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::SegmentAdoption => "segment_adoption",
            DatasetKind::PremiumRequests => "premium_requests",
        }
    }

    /// Label used in error messages and summaries.
    pub fn display_name(&self) -> &'static str {
        match self {
            DatasetKind::SegmentAdoption => "Segment adoption",
            DatasetKind::PremiumRequests => "Premium requests",
        }
    }
}

/// Identifies the exact snapshot a result was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub kind: DatasetKind,
    pub source: PathBuf,
    /// Modification time of the source file when it was read.
    pub modified: DateTime<Utc>,
    pub loaded_at: DateTime<Utc>,
    pub row_count: usize,
}

// ── Amount columns ────────────────────────────────────────────────────────────

/// Summable numeric columns of the premium requests export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountColumn {
    NetAmount,
    GrossAmount,
    DiscountAmount,
    Quantity,
}

impl AmountColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmountColumn::NetAmount => "net_amount",
            AmountColumn::GrossAmount => "gross_amount",
            AmountColumn::DiscountAmount => "discount_amount",
            AmountColumn::Quantity => "quantity",
        }
    }

    /// `true` for the three monetary columns.
    pub fn is_monetary(&self) -> bool {
        !matches!(self, AmountColumn::Quantity)
    }
}

impl FromStr for AmountColumn {
    type Err = InsightsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "net_amount" | "net" | "cost" => Ok(AmountColumn::NetAmount),
            "gross_amount" | "gross" => Ok(AmountColumn::GrossAmount),
            "discount_amount" | "discount" => Ok(AmountColumn::DiscountAmount),
            "quantity" | "requests" => Ok(AmountColumn::Quantity),
            other => Err(InsightsError::InvalidArgument(format!(
                "Unknown amount column '{}'",
                other
            ))),
        }
    }
}

// ── Filters ───────────────────────────────────────────────────────────────────

/// The filter keys a request may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKey {
    Segment,
    UserType,
    Enterprise,
    Model,
    DateRange,
}

impl FilterKey {
    pub const ALL: [FilterKey; 5] = [
        FilterKey::Segment,
        FilterKey::UserType,
        FilterKey::Enterprise,
        FilterKey::Model,
        FilterKey::DateRange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKey::Segment => "segment",
            FilterKey::UserType => "user_type",
            FilterKey::Enterprise => "enterprise",
            FilterKey::Model => "model",
            FilterKey::DateRange => "date_range",
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKey {
    type Err = InsightsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "segment" => Ok(FilterKey::Segment),
            "user_type" => Ok(FilterKey::UserType),
            "enterprise" => Ok(FilterKey::Enterprise),
            "model" => Ok(FilterKey::Model),
            "date_range" => Ok(FilterKey::DateRange),
            other => Err(InsightsError::InvalidArgument(format!(
                "Unknown filter key: {}",
                other
            ))),
        }
    }
}

/// Employee (FTE) versus contractor population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Fte,
    Contractor,
}

impl UserType {
    /// The `is_employee` value this user type selects.
    pub fn is_employee(&self) -> bool {
        matches!(self, UserType::Fte)
    }

    pub fn from_employee_flag(is_employee: bool) -> Self {
        if is_employee {
            UserType::Fte
        } else {
            UserType::Contractor
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UserType::Fte => "FTE",
            UserType::Contractor => "contractors",
        }
    }
}

impl FromStr for UserType {
    type Err = InsightsError;

    /// Case-insensitive; accepts `fte`/`employee` and `contractor`/`non_fte`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "fte" | "employee" => Ok(UserType::Fte),
            "contractor" | "contractors" | "non_fte" | "nonfte" => Ok(UserType::Contractor),
            other => Err(InsightsError::InvalidArgument(format!(
                "Invalid user_type '{}': expected fte or contractor",
                other
            ))),
        }
    }
}

/// Filters applied to a single query. Absent fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
}

impl FilterSpec {
    /// The keys this spec actually sets.
    pub fn keys(&self) -> BTreeSet<FilterKey> {
        let mut keys = BTreeSet::new();
        if self.segment.is_some() {
            keys.insert(FilterKey::Segment);
        }
        if self.user_type.is_some() {
            keys.insert(FilterKey::UserType);
        }
        if self.enterprise.is_some() {
            keys.insert(FilterKey::Enterprise);
        }
        if self.model.is_some() {
            keys.insert(FilterKey::Model);
        }
        if self.date_range.is_some() {
            keys.insert(FilterKey::DateRange);
        }
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Range to report in summaries (unbounded when no date filter is set).
    pub fn period(&self) -> DateRange {
        self.date_range.unwrap_or_default()
    }

    /// Human-readable scope, e.g. `"Asia FTE"` or `"all users"`.
    pub fn scope_label(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(segment) = &self.segment {
            parts.push(segment);
        }
        if let Some(enterprise) = &self.enterprise {
            parts.push(enterprise);
        }
        if let Some(model) = &self.model {
            parts.push(model);
        }
        if let Some(user_type) = &self.user_type {
            parts.push(user_type.label());
        }
        if parts.is_empty() {
            "all users".to_string()
        } else {
            parts.join(" ")
        }
    }
}

// ── Query results ─────────────────────────────────────────────────────────────

/// A small result table; `None` cells are undefined values (e.g. a rate over
/// zero seats).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<Value>>>,
}

impl Table {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Option<Value>>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All cells of the named column, in row order.
    pub fn column(&self, name: &str) -> Vec<Option<Value>> {
        let Some(idx) = self.columns.iter().position(|c| c == name) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .map(|row| row.get(idx).cloned().flatten())
            .collect()
    }
}

/// The computed payload of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOutput {
    Scalar { label: String, value: Option<Value> },
    Table(Table),
    Text { body: String },
}

/// Where a result came from and what shaped it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub datasets: Vec<DatasetVersion>,
    pub filters: FilterSpec,
    /// Rows left after filtering that fed the computation.
    pub rows_considered: usize,
    /// Rows or groups dropped by a join (correlation only).
    #[serde(default)]
    pub rows_excluded: usize,
}

/// Result returned to the tool caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub tool: String,
    pub metric: String,
    pub output: QueryOutput,
    pub provenance: Provenance,
    /// The filters matched zero rows.
    pub empty: bool,
    /// Fewer rows than the metric's minimum aggregation size contributed.
    #[serde(default)]
    pub below_min_aggregation: bool,
    /// Rendered lines for the conversational agent.
    pub summary: Vec<String>,
}

impl QueryResult {
    /// The rendered summary as a single block of text.
    pub fn render(&self) -> String {
        self.summary.join("\n")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
