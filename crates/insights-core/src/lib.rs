//! Shared building blocks for Copilot Insights.
//!
//! Holds the error taxonomy, the typed data model, month/date helpers, the
//! CSV cell normalizer, the metrics registry and CLI settings.

pub mod error;
pub mod formatting;
pub mod models;
pub mod normalizer;
pub mod registry;
pub mod settings;
pub mod time_utils;

pub use error::{GovernanceError, InsightsError, Result};
