//! Streaming removal of repeated notifications.

use crate::error::Result;
use crate::utils::{string_column, value_at};
use polars::prelude::*;
use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Drops rows whose composite key was already seen earlier in the run.
///
/// Keeps one 64-bit digest per distinct key, so memory grows with the number
/// of distinct notifications rather than with their width. The first
/// occurrence of a key wins.
#[derive(Debug, Default)]
pub struct DuplicateFilter {
    key_columns: Vec<String>,
    seen: HashSet<u64>,
}

impl DuplicateFilter {
    pub fn new(key_columns: Vec<String>) -> Self {
        Self {
            key_columns,
            seen: HashSet::new(),
        }
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// Number of distinct keys seen so far.
    pub fn distinct(&self) -> usize {
        self.seen.len()
    }

    /// Filter a raw chunk. Returns the kept rows and the number dropped.
    ///
    /// Key columns absent from the chunk count as null.
    pub fn filter(&mut self, df: DataFrame) -> Result<(DataFrame, usize)> {
        let keys = self
            .key_columns
            .iter()
            .map(|c| string_column(&df, c))
            .collect::<PolarsResult<Vec<_>>>()?;

        let mut keep = Vec::with_capacity(df.height());
        for idx in 0..df.height() {
            let mut hasher = DefaultHasher::new();
            for column in &keys {
                value_at(column, idx).hash(&mut hasher);
            }
            keep.push(self.seen.insert(hasher.finish()));
        }

        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped == 0 {
            return Ok((df, 0));
        }

        let mask = BooleanChunked::from_slice("keep".into(), &keep);
        Ok((df.filter(&mask)?, dropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Vec<String> {
        vec!["dt_notific".to_string(), "cs_sexo".to_string()]
    }

    #[test]
    fn test_drops_repeats_within_chunk() {
        let df = df!(
            "dt_notific" => &["2024-01-01", "2024-01-01", "2024-01-02"],
            "cs_sexo" => &["F", "F", "F"]
        )
        .unwrap();

        let mut filter = DuplicateFilter::new(keys());
        let (kept, dropped) = filter.filter(df).unwrap();
        assert_eq!(kept.height(), 2);
        assert_eq!(dropped, 1);
        assert_eq!(filter.distinct(), 2);
    }

    #[test]
    fn test_drops_repeats_across_chunks() {
        let first = df!("dt_notific" => &["a"], "cs_sexo" => &["M"]).unwrap();
        let second = df!("dt_notific" => &["a", "b"], "cs_sexo" => &["M", "M"]).unwrap();

        let mut filter = DuplicateFilter::new(keys());
        assert_eq!(filter.filter(first).unwrap().1, 0);

        let (kept, dropped) = filter.filter(second).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(kept.height(), 1);
    }

    #[test]
    fn test_null_differs_from_empty_string() {
        let df = df!(
            "dt_notific" => &[None, Some("")],
            "cs_sexo" => &[Some("F"), Some("F")]
        )
        .unwrap();

        let (kept, _) = DuplicateFilter::new(keys()).filter(df).unwrap();
        assert_eq!(kept.height(), 2);
    }
}
