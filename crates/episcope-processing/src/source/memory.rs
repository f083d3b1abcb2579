//! In-memory source over an already loaded `DataFrame`.

use super::RawSource;
use crate::error::{Result, ResultExt};
use crate::utils::string_column;
use polars::prelude::*;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Serves windows of a `DataFrame`. Useful for tests and for callers that
/// already hold a small table (for example a single API page).
#[derive(Debug, Clone)]
pub struct DataFrameSource {
    df: DataFrame,
    columns: Vec<String>,
}

impl DataFrameSource {
    pub fn new(df: DataFrame) -> Self {
        let columns = df
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        Self { df, columns }
    }
}

impl RawSource for DataFrameSource {
    fn describe(&self) -> String {
        format!("in-memory table ({} rows)", self.df.height())
    }

    fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        for name in &self.columns {
            name.hash(&mut hasher);
            if let Ok(Some(values)) = string_column(&self.df, name) {
                for value in &values {
                    value.hash(&mut hasher);
                }
            }
        }
        format!(
            "memory:{}x{}:{:016x}",
            self.df.height(),
            self.df.width(),
            hasher.finish()
        )
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn row_count(&self) -> Option<usize> {
        Some(self.df.height())
    }

    fn read_window(&self, offset: usize, len: usize, columns: &[String]) -> Result<DataFrame> {
        self.df
            .slice(offset as i64, len)
            .select(columns.iter().map(|c| c.as_str()))
            .context("Projecting window")
    }
}
