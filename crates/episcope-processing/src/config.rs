//! Configuration types for the cleaning pipeline.
//!
//! This module provides configuration options using the builder pattern
//! for flexible and ergonomic pipeline setup.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Default number of raw rows read per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Default number of attempts for a failing staging append.
pub const DEFAULT_MAX_CHUNK_RETRIES: usize = 3;

/// The thirteen symptom indicator columns of a case notification.
pub const SYMPTOM_COLUMNS: [&str; 13] = [
    "febre",
    "mialgia",
    "cefaleia",
    "exantema",
    "vomito",
    "nausea",
    "dor_costas",
    "conjuntvit",
    "artrite",
    "artralgia",
    "petequia_n",
    "leucopenia",
    "dor_retro",
];

/// Raw sex code column.
pub const SEX_COLUMN: &str = "cs_sexo";

/// Raw age column.
pub const AGE_COLUMN: &str = "nu_idade_n";

/// Raw disease label column. Also the label column of the output.
pub const LABEL_COLUMN: &str = "doenca_alvo";

/// Composite key identifying a single notification for de-duplication.
pub const DEDUP_KEY_COLUMNS: [&str; 5] =
    ["dt_notific", "id_municip", "nu_idade_n", "cs_sexo", "doenca_alvo"];

/// Configuration for the cleaning pipeline.
///
/// Use [`PipelineConfig::builder()`] to create a new configuration
/// with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use episcope_processing::config::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .chunk_size(50_000)
///     .seed(42)
///     .staging_dir("/var/tmp/episcope/staging")
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of raw rows read per chunk. Peak memory is proportional to it.
    /// Default: 100,000
    pub chunk_size: usize,

    /// Seed for sampling and shuffling. When set, two runs over the same
    /// source produce identical artifacts.
    /// Default: None (entropy)
    pub seed: Option<u64>,

    /// Symptom indicator columns, in output order.
    pub symptom_columns: Vec<String>,

    /// Raw sex code column.
    pub sex_column: String,

    /// Raw age column.
    pub age_column: String,

    /// Raw disease label column.
    pub label_column: String,

    /// Root directory holding one staging area per label.
    /// Default: "staging"
    pub staging_dir: PathBuf,

    /// Path of the balanced dataset (CSV).
    /// Default: "output/cleaned_arboviroses_cases.csv"
    pub output_path: PathBuf,

    /// Whether to drop repeated notifications before any other step.
    /// Default: true
    pub deduplicate: bool,

    /// Columns forming the de-duplication key.
    pub dedup_key_columns: Vec<String>,

    /// Attempts per chunk before a staging failure aborts the run.
    /// Default: 3
    pub max_chunk_retries: usize,

    /// Reuse the median age cached in the staging root by an interrupted
    /// run over the same source instead of recomputing it.
    /// Default: false
    pub reuse_statistic: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            seed: None,
            symptom_columns: SYMPTOM_COLUMNS.iter().map(|s| s.to_string()).collect(),
            sex_column: SEX_COLUMN.to_string(),
            age_column: AGE_COLUMN.to_string(),
            label_column: LABEL_COLUMN.to_string(),
            staging_dir: PathBuf::from("staging"),
            output_path: PathBuf::from("output/cleaned_arboviroses_cases.csv"),
            deduplicate: true,
            dedup_key_columns: DEDUP_KEY_COLUMNS.iter().map(|s| s.to_string()).collect(),
            max_chunk_retries: DEFAULT_MAX_CHUNK_RETRIES,
            reuse_statistic: false,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.chunk_size == 0 {
            return Err(ConfigValidationError::InvalidChunkSize(self.chunk_size));
        }

        if self.max_chunk_retries == 0 {
            return Err(ConfigValidationError::InvalidRetries(self.max_chunk_retries));
        }

        if self.symptom_columns.is_empty() {
            return Err(ConfigValidationError::NoSymptomColumns);
        }

        let mut seen = HashSet::new();
        for name in &self.symptom_columns {
            if name.trim().is_empty() {
                return Err(ConfigValidationError::EmptyColumnName("symptom_columns"));
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigValidationError::DuplicateColumn(name.clone()));
            }
        }

        for (field, value) in [
            ("sex_column", &self.sex_column),
            ("age_column", &self.age_column),
            ("label_column", &self.label_column),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigValidationError::EmptyColumnName(field));
            }
        }

        if self.deduplicate && self.dedup_key_columns.is_empty() {
            return Err(ConfigValidationError::EmptyColumnName("dedup_key_columns"));
        }

        Ok(())
    }

    /// Raw columns the streaming pass needs from each chunk.
    ///
    /// Symptoms, sex, age and label first, followed by any extra
    /// de-duplication key columns when de-duplication is enabled.
    pub fn required_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.symptom_columns.clone();
        columns.push(self.sex_column.clone());
        columns.push(self.age_column.clone());
        columns.push(self.label_column.clone());

        if self.deduplicate {
            for key in &self.dedup_key_columns {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        columns
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid chunk size: {0} (must be at least 1)")]
    InvalidChunkSize(usize),

    #[error("Invalid chunk retries: {0} (must be at least 1)")]
    InvalidRetries(usize),

    #[error("At least one symptom column is required")]
    NoSymptomColumns,

    #[error("Column '{0}' is listed more than once")]
    DuplicateColumn(String),

    #[error("Empty column name in '{0}'")]
    EmptyColumnName(&'static str),
}

/// Builder for [`PipelineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    chunk_size: Option<usize>,
    seed: Option<u64>,
    symptom_columns: Option<Vec<String>>,
    sex_column: Option<String>,
    age_column: Option<String>,
    label_column: Option<String>,
    staging_dir: Option<PathBuf>,
    output_path: Option<PathBuf>,
    deduplicate: Option<bool>,
    dedup_key_columns: Option<Vec<String>>,
    max_chunk_retries: Option<usize>,
    reuse_statistic: Option<bool>,
}

impl PipelineConfigBuilder {
    /// Set the number of raw rows read per chunk.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Fix the random seed used for sampling and shuffling.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Override the symptom column list.
    pub fn symptom_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symptom_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Set the raw sex code column.
    pub fn sex_column(mut self, column: impl Into<String>) -> Self {
        self.sex_column = Some(column.into());
        self
    }

    /// Set the raw age column.
    pub fn age_column(mut self, column: impl Into<String>) -> Self {
        self.age_column = Some(column.into());
        self
    }

    /// Set the raw disease label column.
    pub fn label_column(mut self, column: impl Into<String>) -> Self {
        self.label_column = Some(column.into());
        self
    }

    /// Set the root directory for staging areas.
    pub fn staging_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(path.into());
        self
    }

    /// Set the path of the balanced dataset.
    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Enable or disable de-duplication of raw notifications.
    pub fn deduplicate(mut self, enable: bool) -> Self {
        self.deduplicate = Some(enable);
        self
    }

    /// Override the de-duplication key.
    pub fn dedup_key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dedup_key_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Set the number of attempts per chunk append.
    pub fn max_chunk_retries(mut self, retries: usize) -> Self {
        self.max_chunk_retries = Some(retries);
        self
    }

    /// Reuse a cached median age from a previous run over the same source.
    pub fn reuse_statistic(mut self, reuse: bool) -> Self {
        self.reuse_statistic = Some(reuse);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `PipelineConfig` or an error if validation fails.
    pub fn build(self) -> Result<PipelineConfig, ConfigValidationError> {
        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            chunk_size: self.chunk_size.unwrap_or(defaults.chunk_size),
            seed: self.seed,
            symptom_columns: self.symptom_columns.unwrap_or(defaults.symptom_columns),
            sex_column: self.sex_column.unwrap_or(defaults.sex_column),
            age_column: self.age_column.unwrap_or(defaults.age_column),
            label_column: self.label_column.unwrap_or(defaults.label_column),
            staging_dir: self.staging_dir.unwrap_or(defaults.staging_dir),
            output_path: self.output_path.unwrap_or(defaults.output_path),
            deduplicate: self.deduplicate.unwrap_or(defaults.deduplicate),
            dedup_key_columns: self.dedup_key_columns.unwrap_or(defaults.dedup_key_columns),
            max_chunk_retries: self.max_chunk_retries.unwrap_or(defaults.max_chunk_retries),
            reuse_statistic: self.reuse_statistic.unwrap_or(defaults.reuse_statistic),
        };

        config.validate()?;
        Ok(config)
    }
}
