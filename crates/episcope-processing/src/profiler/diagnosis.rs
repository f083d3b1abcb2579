//! Field coverage per disease.
//!
//! Streams the raw source and counts, for each raw label value, how many
//! rows carry a non-null value in each column. Symptom fields are filled
//! very unevenly across the three notification systems; this shows which
//! ones are usable before training on them.

use crate::cleaner::DuplicateFilter;
use crate::error::Result;
use crate::source::{ChunkIter, RawSource};
use crate::utils::string_column;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Non-null counts per column, grouped by raw label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDiagnosis {
    /// Rows read from the source.
    pub total_rows: usize,
    /// Repeated notifications skipped before counting.
    #[serde(default)]
    pub duplicates_dropped: usize,
    /// Rows with a null label. They are not grouped.
    pub unlabeled_rows: usize,
    /// Rows per raw label value.
    pub rows_per_label: BTreeMap<String, usize>,
    /// raw label -> column -> non-null count
    pub non_null: BTreeMap<String, BTreeMap<String, usize>>,
}

impl SourceDiagnosis {
    /// Diagnose every column of `source`, grouped by `label_column`.
    ///
    /// With `dedup`, repeated notifications are dropped before any count.
    pub fn compute(
        source: &dyn RawSource,
        label_column: &str,
        chunk_size: usize,
        mut dedup: Option<DuplicateFilter>,
    ) -> Result<Self> {
        let columns = source.column_names().to_vec();
        let mut diagnosis = Self::default();

        for chunk in ChunkIter::new(source, columns.clone(), chunk_size) {
            let chunk = chunk?;
            diagnosis.total_rows += chunk.data.height();

            let data = match dedup.as_mut() {
                Some(filter) => {
                    let (kept, dropped) = filter.filter(chunk.data)?;
                    diagnosis.duplicates_dropped += dropped;
                    kept
                }
                None => chunk.data,
            };

            let labels = string_column(&data, label_column)?;
            let Some(labels) = labels else {
                diagnosis.unlabeled_rows += data.height();
                continue;
            };

            let validity: Vec<(String, BooleanChunked)> = columns
                .iter()
                .filter(|c| c.as_str() != label_column)
                .map(|c| -> PolarsResult<(String, BooleanChunked)> {
                    let column = data.column(c)?;
                    Ok((c.clone(), column.is_not_null()))
                })
                .collect::<PolarsResult<_>>()?;

            for (idx, label) in (&labels).into_iter().enumerate() {
                let Some(label) = label else {
                    diagnosis.unlabeled_rows += 1;
                    continue;
                };

                *diagnosis.rows_per_label.entry(label.to_string()).or_default() += 1;
                let counts = diagnosis.non_null.entry(label.to_string()).or_default();
                for (name, mask) in &validity {
                    if mask.get(idx).unwrap_or(false) {
                        *counts.entry(name.clone()).or_default() += 1;
                    }
                }
            }
        }

        Ok(diagnosis)
    }

    /// Columns of `label`, most populated first.
    pub fn ranked_columns(&self, label: &str) -> Vec<(String, usize)> {
        let mut ranked: Vec<(String, usize)> = self
            .non_null
            .get(label)
            .map(|counts| counts.iter().map(|(c, n)| (c.clone(), *n)).collect())
            .unwrap_or_default();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::DataFrameSource;

    #[test]
    fn test_counts_non_null_per_label() {
        let df = df!(
            "febre" => &[Some("1"), None, Some("2"), Some("1")],
            "artrite" => &[None, None, Some("1"), None],
            "doenca_alvo" => &[Some("dengue"), Some("dengue"), Some("chikungunya"), None]
        )
        .unwrap();
        let src = DataFrameSource::new(df);

        let diagnosis = SourceDiagnosis::compute(&src, "doenca_alvo", 3, None).unwrap();
        assert_eq!(diagnosis.total_rows, 4);
        assert_eq!(diagnosis.unlabeled_rows, 1);
        assert_eq!(diagnosis.rows_per_label["dengue"], 2);
        assert_eq!(diagnosis.non_null["dengue"]["febre"], 1);
        assert!(!diagnosis.non_null["dengue"].contains_key("artrite"));
        assert_eq!(diagnosis.non_null["chikungunya"]["artrite"], 1);

        let ranked = diagnosis.ranked_columns("chikungunya");
        assert_eq!(ranked[0], ("artrite".to_string(), 1));
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_missing_label_column() {
        let src = DataFrameSource::new(df!("febre" => &["1", "0"]).unwrap());
        let diagnosis = SourceDiagnosis::compute(&src, "doenca_alvo", 10, None).unwrap();
        assert_eq!(diagnosis.unlabeled_rows, 2);
        assert!(diagnosis.non_null.is_empty());
    }

    #[test]
    fn test_repeated_notifications_counted_once() {
        let df = df!(
            "dt_notific" => &["2024-01-01", "2024-01-01", "2024-01-02"],
            "febre" => &[Some("1"), Some("1"), None],
            "doenca_alvo" => &["zika", "zika", "zika"]
        )
        .unwrap();
        let src = DataFrameSource::new(df);
        let keys = vec!["dt_notific".to_string(), "doenca_alvo".to_string()];

        let diagnosis =
            SourceDiagnosis::compute(&src, "doenca_alvo", 2, Some(DuplicateFilter::new(keys)))
                .unwrap();
        assert_eq!(diagnosis.total_rows, 3);
        assert_eq!(diagnosis.duplicates_dropped, 1);
        assert_eq!(diagnosis.rows_per_label["zika"], 2);
        assert_eq!(diagnosis.non_null["zika"]["febre"], 1);
    }
}
