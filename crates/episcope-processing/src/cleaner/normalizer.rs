//! Per-record cleaning of raw notifications into the training feature vector.
//!
//! The same scalar coercions back both the row form ([`RecordNormalizer::normalize`])
//! and the columnar form ([`RecordNormalizer::normalize_chunk`]) used by the
//! streaming pass.

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::profiler::GlobalStatistic;
use crate::types::{
    AGE_OUTPUT_COLUMN, LABEL_OUTPUT_COLUMN, Label, NormalizedRecord, RawRecord,
    SEX_ENCODED_COLUMN, TARGET_ENCODED_COLUMN,
};
use crate::utils::{coerce_age, coerce_number, string_column, value_at};
use polars::prelude::*;
use std::collections::BTreeMap;

/// Symptom indicator: 1 only when the raw code is numerically 1.
#[inline]
pub fn encode_symptom(raw: Option<&str>) -> u8 {
    match raw.and_then(coerce_number) {
        Some(v) if v == 1.0 => 1,
        _ => 0,
    }
}

/// Sex code: `M` 0, `F` 1, anything else -1. Case-sensitive.
#[inline]
pub fn encode_sex(raw: Option<&str>) -> i8 {
    match raw {
        Some("M") => 0,
        Some("F") => 1,
        _ => -1,
    }
}

/// Age, falling back to `median` when the raw value does not coerce.
#[inline]
pub fn impute_age(raw: Option<&str>, median: f64) -> f64 {
    raw.and_then(coerce_age).unwrap_or(median)
}

/// Normalized rows of one chunk, split by label.
#[derive(Debug, Default)]
pub struct NormalizedChunk {
    /// One frame per label that received at least one row.
    pub by_label: BTreeMap<Label, DataFrame>,
    /// Rows kept.
    pub accepted: usize,
    /// Rows excluded for a missing or unmapped label.
    pub rejected: usize,
}

/// Column buffers for the output schema.
#[derive(Debug)]
pub(crate) struct OutputColumns {
    symptoms: Vec<Vec<i32>>,
    sex: Vec<i32>,
    age: Vec<f64>,
}

impl OutputColumns {
    pub(crate) fn new(symptom_count: usize) -> Self {
        Self {
            symptoms: vec![Vec::new(); symptom_count],
            sex: Vec::new(),
            age: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, record: &NormalizedRecord) {
        for (column, value) in self.symptoms.iter_mut().zip(&record.symptoms) {
            column.push(i32::from(*value));
        }
        self.sex.push(i32::from(record.sexo_encoded));
        self.age.push(record.idade);
    }

    /// Build the output frame. All rows carry `label`.
    pub(crate) fn into_frame(self, symptom_names: &[String], label: Label) -> PolarsResult<DataFrame> {
        let height = self.age.len();
        let mut columns: Vec<Column> = Vec::with_capacity(symptom_names.len() + 4);

        for (name, values) in symptom_names.iter().zip(self.symptoms) {
            columns.push(Column::new(name.as_str().into(), values));
        }
        columns.push(Column::new(SEX_ENCODED_COLUMN.into(), self.sex));
        columns.push(Column::new(AGE_OUTPUT_COLUMN.into(), self.age));
        columns.push(Column::new(
            LABEL_OUTPUT_COLUMN.into(),
            vec![label.as_str(); height],
        ));
        columns.push(Column::new(
            TARGET_ENCODED_COLUMN.into(),
            vec![label.encoded(); height],
        ));

        DataFrame::new(columns)
    }
}

/// A zero-row frame with the output schema.
pub fn empty_output_frame(symptom_names: &[String]) -> PolarsResult<DataFrame> {
    // the label value is irrelevant for zero rows
    OutputColumns::new(symptom_names.len()).into_frame(symptom_names, Label::Zika)
}

/// Cleans raw notifications with a fixed imputation value.
///
/// Construction requires a [`GlobalStatistic`], so no row can be normalized
/// before the statistics pass has finished.
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    symptom_columns: Vec<String>,
    sex_column: String,
    age_column: String,
    label_column: String,
    median_age: f64,
}

impl RecordNormalizer {
    pub fn new(config: &PipelineConfig, statistic: &GlobalStatistic) -> Self {
        Self {
            symptom_columns: config.symptom_columns.clone(),
            sex_column: config.sex_column.clone(),
            age_column: config.age_column.clone(),
            label_column: config.label_column.clone(),
            median_age: statistic.median_age(),
        }
    }

    pub fn symptom_columns(&self) -> &[String] {
        &self.symptom_columns
    }

    pub fn label_column(&self) -> &str {
        &self.label_column
    }

    /// Normalize one record. `None` means the record is excluded.
    pub fn normalize(&self, record: &RawRecord) -> Option<NormalizedRecord> {
        let label = record.get(&self.label_column).and_then(Label::from_raw)?;

        Some(NormalizedRecord {
            symptoms: self
                .symptom_columns
                .iter()
                .map(|c| encode_symptom(record.get(c)))
                .collect(),
            sexo_encoded: encode_sex(record.get(&self.sex_column)),
            idade: impute_age(record.get(&self.age_column), self.median_age),
            label,
        })
    }

    /// Normalize every row of a raw chunk and split the survivors by label.
    ///
    /// Columns missing from the chunk read as null: symptoms become 0, sex -1,
    /// age the median. A missing label column rejects every row.
    pub fn normalize_chunk(&self, df: &DataFrame) -> Result<NormalizedChunk> {
        let symptoms = self
            .symptom_columns
            .iter()
            .map(|c| string_column(df, c))
            .collect::<PolarsResult<Vec<_>>>()?;
        let sex = string_column(df, &self.sex_column)?;
        let age = string_column(df, &self.age_column)?;
        let label = string_column(df, &self.label_column)?;

        let mut buffers: BTreeMap<Label, OutputColumns> = BTreeMap::new();
        let mut chunk = NormalizedChunk::default();

        for idx in 0..df.height() {
            let Some(row_label) = value_at(&label, idx).and_then(Label::from_raw) else {
                chunk.rejected += 1;
                continue;
            };

            let record = NormalizedRecord {
                symptoms: symptoms
                    .iter()
                    .map(|column| encode_symptom(value_at(column, idx)))
                    .collect(),
                sexo_encoded: encode_sex(value_at(&sex, idx)),
                idade: impute_age(value_at(&age, idx), self.median_age),
                label: row_label,
            };

            buffers
                .entry(row_label)
                .or_insert_with(|| OutputColumns::new(self.symptom_columns.len()))
                .push(&record);
            chunk.accepted += 1;
        }

        for (row_label, columns) in buffers {
            let frame = columns.into_frame(&self.symptom_columns, row_label)?;
            chunk.by_label.insert(row_label, frame);
        }

        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SYMPTOM_COLUMNS;
    use pretty_assertions::assert_eq;

    fn normalizer(median: f64) -> RecordNormalizer {
        let config = PipelineConfig::default();
        RecordNormalizer::new(&config, &GlobalStatistic::from_median(median))
    }

    #[test]
    fn test_encode_symptom() {
        assert_eq!(encode_symptom(Some("1")), 1);
        assert_eq!(encode_symptom(Some("1.0")), 1);
        assert_eq!(encode_symptom(Some("2")), 0);
        assert_eq!(encode_symptom(Some("0")), 0);
        assert_eq!(encode_symptom(Some("sim")), 0);
        assert_eq!(encode_symptom(Some("")), 0);
        assert_eq!(encode_symptom(None), 0);
    }

    #[test]
    fn test_encode_sex_is_case_sensitive() {
        assert_eq!(encode_sex(Some("M")), 0);
        assert_eq!(encode_sex(Some("F")), 1);
        assert_eq!(encode_sex(Some("f")), -1);
        assert_eq!(encode_sex(Some("I")), -1);
        assert_eq!(encode_sex(None), -1);
    }

    #[test]
    fn test_non_numeric_age_and_other_symptom_code() {
        let record = RawRecord::new()
            .with("febre", "2")
            .with("nu_idade_n", "A")
            .with("cs_sexo", "F")
            .with("doenca_alvo", "dengue");

        let normalized = normalizer(31.5).normalize(&record).unwrap();
        assert_eq!(normalized.symptoms[0], 0);
        assert_eq!(normalized.idade, 31.5);
        assert_eq!(normalized.sexo_encoded, 1);
        assert_eq!(normalized.target_encoded(), 1);
    }

    #[test]
    fn test_unmapped_label_is_rejected() {
        let n = normalizer(30.0);
        assert!(n.normalize(&RawRecord::new().with("doenca_alvo", "febre amarela")).is_none());
        assert!(n.normalize(&RawRecord::new().with_null("doenca_alvo")).is_none());
        assert!(n.normalize(&RawRecord::new().with("febre", "1")).is_none());
    }

    #[test]
    fn test_missing_fields_default_to_absent() {
        let record = RawRecord::new().with("doenca_alvo", "zika");
        let normalized = normalizer(20.0).normalize(&record).unwrap();

        assert_eq!(normalized.symptoms, vec![0; SYMPTOM_COLUMNS.len()]);
        assert_eq!(normalized.sexo_encoded, -1);
        assert_eq!(normalized.idade, 20.0);
        assert_eq!(normalized.label, Label::Zika);
    }

    #[test]
    fn test_normalize_chunk_splits_by_label() {
        let df = df!(
            "febre" => &[Some("1"), Some("2"), None, Some("1")],
            "cs_sexo" => &[Some("M"), Some("F"), Some("X"), None],
            "nu_idade_n" => &[Some("40"), Some("A"), Some(""), Some("12")],
            "doenca_alvo" => &[Some("dengue"), Some("zika"), None, Some("dengue")]
        )
        .unwrap();

        let chunk = normalizer(25.0).normalize_chunk(&df).unwrap();
        assert_eq!(chunk.accepted, 3);
        assert_eq!(chunk.rejected, 1);
        assert!(!chunk.by_label.contains_key(&Label::Chikungunya));

        let dengue = &chunk.by_label[&Label::Dengue];
        assert_eq!(dengue.height(), 2);
        assert_eq!(dengue.width(), SYMPTOM_COLUMNS.len() + 4);

        let zika = &chunk.by_label[&Label::Zika];
        let febre: Vec<Option<i32>> = zika.column("febre").unwrap().i32().unwrap().into_iter().collect();
        assert_eq!(febre, vec![Some(0)]);
        let idade: Vec<Option<f64>> = zika.column("idade").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(idade, vec![Some(25.0)]);
        let target: Vec<Option<i32>> = zika
            .column("target_encoded")
            .unwrap()
            .i32()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(target, vec![Some(0)]);
    }

    #[test]
    fn test_normalize_chunk_without_label_column() {
        let df = df!("febre" => &["1", "1"]).unwrap();
        let chunk = normalizer(25.0).normalize_chunk(&df).unwrap();
        assert_eq!(chunk.rejected, 2);
        assert!(chunk.by_label.is_empty());
    }

    #[test]
    fn test_empty_output_frame_schema() {
        let names: Vec<String> = SYMPTOM_COLUMNS.iter().map(|s| s.to_string()).collect();
        let frame = empty_output_frame(&names).unwrap();
        assert_eq!(frame.height(), 0);
        assert_eq!(frame.width(), 17);
        assert_eq!(frame.column("idade").unwrap().dtype(), &DataType::Float64);
        assert_eq!(frame.column("doenca_alvo").unwrap().dtype(), &DataType::String);
    }
}
