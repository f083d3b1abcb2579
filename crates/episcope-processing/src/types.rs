//! Core data types: disease labels, raw and normalized records, run summaries.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

/// Output column holding the encoded sex code.
pub const SEX_ENCODED_COLUMN: &str = "sexo_encoded";

/// Output column holding the imputed age.
pub const AGE_OUTPUT_COLUMN: &str = "idade";

/// Output column holding the disease label string.
pub const LABEL_OUTPUT_COLUMN: &str = "doenca_alvo";

/// Output column holding the integer class code.
pub const TARGET_ENCODED_COLUMN: &str = "target_encoded";

// ============================================================================
// Labels
// ============================================================================

/// Target disease of a case notification.
///
/// The integer codes are shared with the training side and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Zika,
    Dengue,
    Chikungunya,
}

impl Label {
    /// All labels, ordered by their integer code.
    pub const ALL: [Label; 3] = [Label::Zika, Label::Dengue, Label::Chikungunya];

    /// Look up a raw label string. Matching is exact; anything else is unmapped.
    pub fn from_raw(raw: &str) -> Option<Label> {
        match raw {
            "zika" => Some(Label::Zika),
            "dengue" => Some(Label::Dengue),
            "chikungunya" => Some(Label::Chikungunya),
            _ => None,
        }
    }

    /// The label string written to the output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Zika => "zika",
            Label::Dengue => "dengue",
            Label::Chikungunya => "chikungunya",
        }
    }

    /// Integer class code: zika 0, dengue 1, chikungunya 2.
    pub fn encoded(&self) -> i32 {
        match self {
            Label::Zika => 0,
            Label::Dengue => 1,
            Label::Chikungunya => 2,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// One raw case notification, as field name to (possibly null) text.
///
/// Numeric source values are carried in their textual form; coercion
/// happens in the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    fields: HashMap<String, Option<String>>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a text field.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), Some(value.into()));
        self
    }

    /// Set a numeric field.
    pub fn with_number(mut self, field: impl Into<String>, value: f64) -> Self {
        self.fields.insert(field.into(), Some(value.to_string()));
        self
    }

    /// Set a field to null.
    pub fn with_null(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into(), None);
        self
    }

    /// Value of a field. Absent and null fields both read as `None`.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }
}

/// A cleaned record ready for training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Symptom indicators in configured column order, each 0 or 1.
    pub symptoms: Vec<u8>,
    /// 0 male, 1 female, -1 anything else.
    pub sexo_encoded: i8,
    /// Age, imputed with the global median when the raw value is unusable.
    pub idade: f64,
    pub label: Label,
}

impl NormalizedRecord {
    pub fn target_encoded(&self) -> i32 {
        self.label.encoded()
    }
}

// ============================================================================
// Run Summary
// ============================================================================

/// What a pipeline run did, for logs and machine consumers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// RFC 3339 start timestamp.
    pub started_at: String,
    /// Total execution time in milliseconds.
    pub duration_ms: u64,
    /// Median age used for imputation.
    pub median_age: f64,
    /// Whether the median came from the staging cache.
    pub statistic_reused: bool,
    /// Raw rows read by the streaming pass.
    pub rows_read: usize,
    /// Rows excluded because their label was missing or unmapped.
    pub rows_rejected: usize,
    /// Rows dropped as repeated notifications.
    pub duplicates_dropped: usize,
    /// Chunks processed.
    pub chunks: usize,
    /// Rows staged per label.
    pub staged: BTreeMap<Label, usize>,
    /// Rows drawn from each label.
    pub min_count: usize,
    /// Rows in the balanced dataset.
    pub rows_written: usize,
    /// Where the balanced dataset was written.
    pub output_path: Option<PathBuf>,
    /// Non-fatal conditions worth an operator's attention.
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            started_at: chrono::Utc::now().to_rfc3339(),
            ..Self::default()
        }
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}
