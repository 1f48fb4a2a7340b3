use std::path::PathBuf;
use thiserror::Error;

/// Rejections produced by the governance guard before any query runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GovernanceError {
    /// The requested metric identifier is not in the metrics registry.
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// A filter key was supplied that the metric does not declare.
    #[error("Filter '{filter}' is not allowed for metric {metric} (allowed: {allowed})")]
    DisallowedFilter {
        metric: String,
        filter: String,
        allowed: String,
    },

    /// Free text in the request matched a safety rule.
    #[error("Unsafe request blocked by rule '{rule}': {guidance}")]
    UnsafeRequest { rule: String, guidance: String },
}

/// All errors produced by the insights crates.
#[derive(Error, Debug)]
pub enum InsightsError {
    /// The configured CSV path does not resolve to a readable file.
    #[error("Source not found: {0}")]
    SourceNotFound(PathBuf),

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The CSV reader failed on a record or the header.
    #[error("Failed to parse CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Required columns are missing from the header row.
    #[error("Schema error: {dataset} CSV missing required columns: {}", missing.join(", "))]
    Schema {
        dataset: &'static str,
        missing: Vec<String>,
    },

    /// A cell could not be coerced into the expected type.
    #[error("Cannot normalize {column}={value:?} as {expected}{}", line.map(|l| format!(" (line {l})")).unwrap_or_default())]
    Normalization {
        line: Option<u64>,
        column: String,
        value: String,
        expected: &'static str,
    },

    /// The governance guard refused the request.
    #[error(transparent)]
    Governance(#[from] GovernanceError),

    /// The tool name is not part of the tool catalogue.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A request argument is malformed or inconsistent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The metrics catalogue could not be built.
    #[error("Metrics registry error: {0}")]
    Registry(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl InsightsError {
    /// Attach a line number to a normalization error raised without one.
    pub fn at_line(self, at: u64) -> Self {
        match self {
            InsightsError::Normalization {
                line: None,
                column,
                value,
                expected,
            } => InsightsError::Normalization {
                line: Some(at),
                column,
                value,
                expected,
            },
            other => other,
        }
    }

    /// `true` for errors the caller can fix by changing the request.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            InsightsError::Governance(_)
                | InsightsError::UnknownTool(_)
                | InsightsError::InvalidArgument(_)
        )
    }
}

/// Convenience alias used throughout the insights crates.
pub type Result<T> = std::result::Result<T, InsightsError>;
