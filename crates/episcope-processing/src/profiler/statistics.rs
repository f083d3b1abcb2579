//! Global statistics pass over the raw source.
//!
//! The median age is computed once from the whole source before any chunk
//! is normalized, so the imputed value cannot depend on how the source is
//! chunked. Only the age column (and the de-duplication key, when enabled)
//! is read, and ages are kept as counts per distinct value.

use crate::cleaner::DuplicateFilter;
use crate::error::{CleaningError, Result, ResultExt};
use crate::source::{ChunkIter, RawChunk, RawSource};
use crate::utils::{MedianHistogram, coerce_age, string_column};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};

/// File name of the cached statistic inside the staging root.
pub const STATISTIC_FILE: &str = "statistic.json";

/// Imputation value shared by every chunk of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStatistic {
    median_age: f64,
    /// Rows whose age coerced to a number.
    pub valid_values: usize,
    /// Rows read by the pass.
    pub rows_scanned: usize,
    /// Fingerprint of the source the median was computed from.
    #[serde(default)]
    pub source: String,
}

impl GlobalStatistic {
    /// Wrap a median computed elsewhere.
    pub fn from_median(median_age: f64) -> Self {
        Self {
            median_age,
            valid_values: 0,
            rows_scanned: 0,
            source: String::new(),
        }
    }

    pub fn median_age(&self) -> f64 {
        self.median_age
    }

    /// Compute the median age of `age_column` over the whole source.
    ///
    /// # Errors
    ///
    /// Returns [`CleaningError::NoValidAgeData`] when no row has a usable age,
    /// including when the column is absent.
    pub fn compute(source: &dyn RawSource, age_column: &str, chunk_size: usize) -> Result<Self> {
        Self::compute_with(source, age_column, chunk_size, None, |_| Ok(()))
    }

    /// Like [`compute`](Self::compute), skipping rows `dedup` has already
    /// seen and calling `observe` after every chunk. An error from `observe`
    /// aborts the pass.
    pub fn compute_with<F>(
        source: &dyn RawSource,
        age_column: &str,
        chunk_size: usize,
        mut dedup: Option<DuplicateFilter>,
        mut observe: F,
    ) -> Result<Self>
    where
        F: FnMut(&RawChunk) -> Result<()>,
    {
        if !source.has_column(age_column) {
            return Err(CleaningError::NoValidAgeData(age_column.to_string())
                .with_context(format!("Column absent from {}", source.describe())));
        }

        let mut columns = vec![age_column.to_string()];
        if let Some(filter) = &dedup {
            for key in source.present_columns(filter.key_columns()) {
                if !columns.contains(&key) {
                    columns.push(key);
                }
            }
        }

        let mut ages = MedianHistogram::new();
        let mut rows_scanned = 0usize;

        for chunk in ChunkIter::new(source, columns, chunk_size) {
            let chunk = chunk?;
            rows_scanned += chunk.data.height();

            let data = match dedup.as_mut() {
                Some(filter) => filter.filter(chunk.data.clone())?.0,
                None => chunk.data.clone(),
            };
            if let Some(column) = string_column(&data, age_column).context("Statistics pass")? {
                for age in (&column).into_iter().flatten().filter_map(coerce_age) {
                    ages.push(age);
                }
            }

            debug!(
                "Statistics pass: chunk {} ({} rows scanned, {} valid ages, {} distinct)",
                chunk.index,
                rows_scanned,
                ages.len(),
                ages.distinct()
            );
            observe(&chunk)?;
        }

        let valid_values = ages.len();
        let median_age = ages
            .median()
            .ok_or_else(|| CleaningError::NoValidAgeData(age_column.to_string()))?;

        info!(
            "Median age {} from {} valid values ({} rows)",
            median_age, valid_values, rows_scanned
        );

        Ok(Self {
            median_age,
            valid_values,
            rows_scanned,
            source: source.fingerprint(),
        })
    }

    /// Whether this statistic was computed from `source` as it is now.
    pub fn matches(&self, source: &dyn RawSource) -> bool {
        !self.source.is_empty() && self.source == source.fingerprint()
    }

    /// Persist the statistic into `dir` so a later run can skip the pass.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).context("Creating staging root")?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(STATISTIC_FILE), json).context("Caching global statistic")?;
        Ok(())
    }

    /// Load a statistic cached by [`save`](Self::save), if any.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(STATISTIC_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).context("Reading cached global statistic")?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Load the cached statistic only if it was computed from `source`.
    pub fn load_for(dir: &Path, source: &dyn RawSource) -> Result<Option<Self>> {
        match Self::load(dir)? {
            Some(cached) if cached.matches(source) => Ok(Some(cached)),
            Some(_) => {
                warn!(
                    "Cached statistic under {} belongs to another source; ignoring it",
                    dir.display()
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Remove the cached statistic from `dir`. A missing cache is not an error.
    pub fn discard(dir: &Path) -> Result<()> {
        match fs::remove_file(dir.join(STATISTIC_FILE)) {
            Ok(()) => {
                debug!("Removed cached statistic under {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CleaningError::Io(e).with_context("Removing cached statistic")),
        }
    }
}
