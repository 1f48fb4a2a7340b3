//! Cached access to the two Copilot exports.
//!
//! [`DataManager`] owns one [`DatasetCache`] per row type. Callers receive
//! `Arc` snapshots; a reload after the source file changes swaps the cache
//! entry without disturbing readers that still hold the previous snapshot.
//!
//! The premium dataset depends on the adoption dataset: its segment labels
//! are canonicalized to the adoption spelling, so a reload of the adoption
//! export also invalidates the cached premium dataset.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use insights_core::error::{InsightsError, Result};
use insights_core::models::DatasetKind;
use insights_core::settings::Settings;
use insights_data::dataset::Dataset;
use insights_data::loader::{load_premium_requests, load_segment_adoption, DatasetCache};
use insights_data::premium_requests::PremiumRow;
use insights_data::segment_adoption::AdoptionRow;
use serde::Serialize;
use tracing::warn;

// ── Health ────────────────────────────────────────────────────────────────────

/// Load status of one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetHealth {
    pub dataset: DatasetKind,
    pub source: PathBuf,
    /// `"ok"` or `"error"`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicates_removed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DatasetHealth {
    fn loaded<R>(dataset: &Dataset<R>) -> Self {
        let version = dataset.version();
        Self {
            dataset: version.kind,
            source: version.source.clone(),
            status: "ok",
            rows: Some(dataset.len()),
            excluded: Some(dataset.report().excluded_count()),
            duplicates_removed: Some(dataset.report().duplicates_removed),
            error: None,
        }
    }

    fn failed(kind: DatasetKind, source: &Path, error: &InsightsError) -> Self {
        Self {
            dataset: kind,
            source: source.to_path_buf(),
            status: "error",
            rows: None,
            excluded: None,
            duplicates_removed: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// `"ok"` when every dataset loads, `"degraded"` otherwise.
    pub status: &'static str,
    pub datasets: Vec<DatasetHealth>,
}

impl HealthReport {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

// ── DataManager ───────────────────────────────────────────────────────────────

/// Owns the dataset caches for the configured CSV paths.
///
/// # Example
/// ```no_run
/// use insights_runtime::data_manager::DataManager;
///
/// let manager = DataManager::new("data/segment_adoption.csv", "data/premium.csv");
/// let adoption = manager.adoption()?;
/// println!("{} adoption rows", adoption.len());
/// # Ok::<(), insights_core::InsightsError>(())
/// ```
pub struct DataManager {
    segment_csv: PathBuf,
    premium_csv: PathBuf,
    adoption_cache: DatasetCache<AdoptionRow>,
    premium_cache: DatasetCache<PremiumRow>,
}

impl DataManager {
    pub fn new(segment_csv: impl Into<PathBuf>, premium_csv: impl Into<PathBuf>) -> Self {
        Self {
            segment_csv: segment_csv.into(),
            premium_csv: premium_csv.into(),
            adoption_cache: DatasetCache::new(),
            premium_cache: DatasetCache::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.segment_csv, &settings.premium_csv)
    }

    pub fn segment_csv(&self) -> &Path {
        &self.segment_csv
    }

    pub fn premium_csv(&self) -> &Path {
        &self.premium_csv
    }

    /// The segment adoption dataset, reloaded when the file changed.
    pub fn adoption(&self) -> Result<Arc<Dataset<AdoptionRow>>> {
        self.adoption_cache
            .get_or_load(&self.segment_csv, None, load_segment_adoption)
    }

    /// The premium requests dataset with segment labels aligned to the
    /// adoption export.
    ///
    /// A missing or unreadable adoption export does not block premium
    /// queries; labels are then left in their original spelling.
    pub fn premium(&self) -> Result<Arc<Dataset<PremiumRow>>> {
        let adoption = match self.adoption() {
            Ok(dataset) => Some(dataset),
            Err(e) => {
                warn!(error = %e, "segment adoption unavailable; premium labels not canonicalized");
                None
            }
        };
        let canonical = adoption.as_ref().map(|ds| ds.segments());
        let depends_on = adoption.as_ref().map(|ds| ds.version().modified);

        self.premium_cache
            .get_or_load(&self.premium_csv, depends_on, |path| {
                load_premium_requests(path, canonical.as_deref())
            })
    }

    /// Try to load both datasets and report what happened.
    pub fn health(&self) -> HealthReport {
        let adoption = match self.adoption() {
            Ok(ds) => DatasetHealth::loaded(ds.as_ref()),
            Err(e) => DatasetHealth::failed(DatasetKind::SegmentAdoption, &self.segment_csv, &e),
        };
        let premium = match self.premium() {
            Ok(ds) => DatasetHealth::loaded(ds.as_ref()),
            Err(e) => DatasetHealth::failed(DatasetKind::PremiumRequests, &self.premium_csv, &e),
        };
        let datasets = vec![adoption, premium];
        let status = if datasets.iter().all(|d| d.status == "ok") {
            "ok"
        } else {
            "degraded"
        };
        HealthReport { status, datasets }
    }

    /// Drop every cached dataset, forcing the next call to reload.
    pub fn invalidate(&self) {
        self.adoption_cache.invalidate();
        self.premium_cache.invalidate();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
