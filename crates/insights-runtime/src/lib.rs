//! Runtime layer for Copilot Insights.
//!
//! Owns the dataset caches, runs every tool request through the governance
//! guard and dispatches it to the analytics engines.

pub mod data_manager;
pub mod dispatch;
pub mod guard;
pub mod safety;
pub mod tools;

pub use insights_core as core;
pub use insights_data as data;
