//! Shared utilities for the cleaning pipeline.
//!
//! Scalar coercions used by both the statistics pass and the normalizer,
//! so a value is judged "numeric" the same way in both places.

use crate::types::Label;
use polars::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

// =============================================================================
// String Parsing Utilities
// =============================================================================

/// Coerce a raw field to a number.
///
/// Surrounding whitespace is ignored. Empty strings, non-numeric text,
/// `NaN` and infinities do not coerce.
///
/// # Example
///
/// ```rust,ignore
/// use episcope_processing::utils::coerce_number;
///
/// assert_eq!(coerce_number(" 1 "), Some(1.0));
/// assert_eq!(coerce_number("A"), None);
/// ```
pub fn coerce_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Coerce a raw age field. Negative values are not ages and do not coerce.
pub fn coerce_age(raw: &str) -> Option<f64> {
    coerce_number(raw).filter(|v| *v >= 0.0)
}

// =============================================================================
// Streaming Median
// =============================================================================

/// Exact median over a stream of values, kept as a count per distinct value.
///
/// Memory grows with the number of distinct values, not with the number of
/// values pushed. Even counts take the mean of the two middle values.
///
/// # Example
///
/// ```rust,ignore
/// use episcope_processing::utils::MedianHistogram;
///
/// let mut ages = MedianHistogram::new();
/// for age in [34.0, 27.0, 34.0, 61.0] {
///     ages.push(age);
/// }
/// assert_eq!(ages.median(), Some(34.0));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MedianHistogram {
    counts: BTreeMap<u64, usize>,
    total: usize,
}

impl MedianHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one value. Non-finite values are ignored.
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        *self.counts.entry(Self::key(value)).or_default() += 1;
        self.total += 1;
    }

    /// Values recorded so far.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Distinct values recorded so far.
    pub fn distinct(&self) -> usize {
        self.counts.len()
    }

    pub fn median(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }

        let lower_rank = (self.total - 1) / 2;
        let upper_rank = self.total / 2;
        let mut lower = None;
        let mut seen = 0usize;

        for (key, count) in &self.counts {
            seen += count;
            let value = Self::value(*key);
            if lower.is_none() && lower_rank < seen {
                lower = Some(value);
            }
            if upper_rank < seen {
                let lower = lower.unwrap_or(value);
                return Some(if lower == value {
                    value
                } else {
                    (lower + value) / 2.0
                });
            }
        }
        None
    }

    // order-preserving map from f64 to u64; -0.0 folds into 0.0
    fn key(value: f64) -> u64 {
        let value = if value == 0.0 { 0.0 } else { value };
        let bits = value.to_bits();
        if bits >> 63 == 1 { !bits } else { bits | (1 << 63) }
    }

    fn value(key: u64) -> f64 {
        if key >> 63 == 1 {
            f64::from_bits(key & !(1 << 63))
        } else {
            f64::from_bits(!key)
        }
    }
}

// =============================================================================
// DataFrame Utilities
// =============================================================================

/// View a column as strings, casting when the source typed it otherwise.
///
/// Returns `None` when the column does not exist, which callers treat as an
/// all-null column.
pub fn string_column(df: &DataFrame, name: &str) -> PolarsResult<Option<StringChunked>> {
    match df.column(name) {
        Ok(column) => {
            let series = column.as_materialized_series();
            let as_str = if series.dtype() == &DataType::String {
                series.clone()
            } else {
                series.cast(&DataType::String)?
            };
            Ok(Some(as_str.str()?.clone()))
        }
        Err(_) => Ok(None),
    }
}

/// Value at `idx` of an optional string column.
#[inline]
pub fn value_at<'a>(column: &'a Option<StringChunked>, idx: usize) -> Option<&'a str> {
    column.as_ref().and_then(|c| c.get(idx))
}

/// Per-label counts for log lines: `zika=3, dengue=10, chikungunya=7`.
pub fn format_counts(counts: &BTreeMap<Label, usize>) -> String {
    counts
        .iter()
        .map(|(label, n)| format!("{}={}", label, n))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Randomness
// =============================================================================

/// Random generator for sampling and shuffling: seeded when reproducibility
/// is requested, entropy otherwise.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

// =============================================================================
// Tests
// =============================================================================
