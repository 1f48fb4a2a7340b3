//! Dataset loading with a modification-time keyed cache.
//!
//! A [`DatasetCache`] maps a canonical source path to the last dataset read
//! from it. A lookup whose file is unchanged returns the cached [`Arc`]; a
//! changed modification time (or dependency stamp) triggers a reload that
//! replaces the entry. Readers holding the previous `Arc` are unaffected.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use insights_core::error::{InsightsError, Result};
use tracing::{debug, info};

use crate::dataset::{CsvRow, Dataset};
use crate::premium_requests::{apply_backfill, PremiumRow};
use crate::reader::read_dataset;
use crate::segment_adoption::AdoptionRow;

// ── Loaders ───────────────────────────────────────────────────────────────────

/// Read the segment adoption export.
pub fn load_segment_adoption(path: &Path) -> Result<Dataset<AdoptionRow>> {
    read_dataset::<AdoptionRow>(path)
}

/// Read the premium requests export and backfill segment labels.
///
/// `canonical_segments` are the adoption dataset's labels, used to align
/// spellings across the two exports.
pub fn load_premium_requests(
    path: &Path,
    canonical_segments: Option<&[String]>,
) -> Result<Dataset<PremiumRow>> {
    let mut dataset = read_dataset::<PremiumRow>(path)?;
    apply_backfill(&mut dataset, canonical_segments);
    Ok(dataset)
}

// ── DatasetCache ──────────────────────────────────────────────────────────────

/// What a cached entry was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Freshness {
    modified: SystemTime,
    /// Version of another dataset the load depended on.
    depends_on: Option<DateTime<Utc>>,
}

struct CacheEntry<R> {
    freshness: Freshness,
    dataset: Arc<Dataset<R>>,
}

/// Thread-safe cache of loaded datasets of one row type.
pub struct DatasetCache<R> {
    entries: RwLock<HashMap<PathBuf, CacheEntry<R>>>,
}

impl<R> Default for DatasetCache<R> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<R: CsvRow> DatasetCache<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path` with the plain CSV reader, reusing the cached dataset when
    /// the file is unchanged.
    pub fn load(&self, path: &Path) -> Result<Arc<Dataset<R>>> {
        self.get_or_load(path, None, read_dataset::<R>)
    }

    /// Return the cached dataset for `path` if it is still fresh, otherwise
    /// run `loader` and cache its result.
    ///
    /// `depends_on` is part of the cache key: a different value forces a
    /// reload even when the file itself is unchanged.
    pub fn get_or_load<F>(
        &self,
        path: &Path,
        depends_on: Option<DateTime<Utc>>,
        loader: F,
    ) -> Result<Arc<Dataset<R>>>
    where
        F: FnOnce(&Path) -> Result<Dataset<R>>,
    {
        let (key, modified) = source_stamp(path)?;
        let freshness = Freshness {
            modified,
            depends_on,
        };

        {
            let entries = self
                .entries
                .read()
                .map_err(|_| InsightsError::Other(anyhow::anyhow!("dataset cache lock poisoned")))?;
            if let Some(entry) = entries.get(&key) {
                if entry.freshness == freshness {
                    debug!(path = %key.display(), "dataset cache hit");
                    return Ok(Arc::clone(&entry.dataset));
                }
            }
        }

        let dataset = Arc::new(loader(&key)?);
        info!(
            path = %key.display(),
            dataset = dataset.version().kind.as_str(),
            rows = dataset.len(),
            excluded = dataset.report().excluded_count(),
            "dataset loaded"
        );

        let mut entries = self
            .entries
            .write()
            .map_err(|_| InsightsError::Other(anyhow::anyhow!("dataset cache lock poisoned")))?;
        entries.insert(
            key,
            CacheEntry {
                freshness,
                dataset: Arc::clone(&dataset),
            },
        );
        Ok(dataset)
    }

    /// Drop every cached dataset.
    pub fn invalidate(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
            debug!("dataset cache invalidated");
        }
    }

    /// Number of cached datasets.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical path and modification time of a source file.
fn source_stamp(path: &Path) -> Result<(PathBuf, SystemTime)> {
    let canonical = std::fs::canonicalize(path)
        .map_err(|_| InsightsError::SourceNotFound(path.to_path_buf()))?;
    let metadata = std::fs::metadata(&canonical).map_err(|source| InsightsError::FileRead {
        path: canonical.clone(),
        source,
    })?;
    if !metadata.is_file() {
        return Err(InsightsError::SourceNotFound(path.to_path_buf()));
    }
    let modified = metadata
        .modified()
        .map_err(|source| InsightsError::FileRead {
            path: canonical.clone(),
            source,
        })?;
    Ok((canonical, modified))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
