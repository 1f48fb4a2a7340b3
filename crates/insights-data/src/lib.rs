//! Data layer for Copilot Insights.
//!
//! Reads the segment adoption and premium request CSV exports into typed,
//! cached datasets and provides the analytics engines that run over them:
//! filtering, adoption rates, premium cost sums, rankings, trends and the
//! cross-dataset correlation.

pub mod adoption;
pub mod aggregator;
pub mod correlation;
pub mod dataset;
pub mod filter;
pub mod loader;
pub mod premium;
pub mod premium_requests;
pub mod reader;
pub mod segment_adoption;

pub use insights_core as core;
