//! Raw case-record sources.
//!
//! The pipeline never loads a source whole. It asks a [`RawSource`] for
//! bounded row windows, optionally projected to the columns it needs, and
//! walks them with [`ChunkIter`].

mod csv;
mod memory;

pub use csv::CsvSource;
pub use memory::DataFrameSource;

use crate::error::Result;
use polars::prelude::*;

/// A tabular source of raw case notifications.
///
/// Implementations must return the same rows for the same window on every
/// call during a run; the statistics pass and the streaming pass both walk
/// the source and must see one static schema.
pub trait RawSource: Send + Sync {
    /// Human-readable name used in logs and errors.
    fn describe(&self) -> String;

    /// Identity of the source content. Two sources with the same fingerprint
    /// are treated as the same data when a cached statistic is reused.
    fn fingerprint(&self) -> String;

    /// Column names present in the source.
    fn column_names(&self) -> &[String];

    /// Total number of rows, when known without a scan.
    fn row_count(&self) -> Option<usize> {
        None
    }

    /// Read up to `len` rows starting at row `offset`, restricted to
    /// `columns`. Every requested column must exist in the source.
    ///
    /// Returns fewer than `len` rows (possibly none) at the end of the source.
    fn read_window(&self, offset: usize, len: usize, columns: &[String]) -> Result<DataFrame>;

    /// Whether the source has a column.
    fn has_column(&self, name: &str) -> bool {
        self.column_names().iter().any(|c| c == name)
    }

    /// The subset of `wanted` that exists in the source, order preserved.
    fn present_columns(&self, wanted: &[String]) -> Vec<String> {
        wanted
            .iter()
            .filter(|c| self.has_column(c))
            .cloned()
            .collect()
    }
}

/// One bounded window of raw rows.
#[derive(Debug)]
pub struct RawChunk {
    /// Zero-based chunk number.
    pub index: usize,
    /// Row offset of the first row in the source.
    pub offset: usize,
    pub data: DataFrame,
}

/// Sequential iterator over bounded windows of a [`RawSource`].
///
/// Stops after the first short window, or after an error.
pub struct ChunkIter<'a> {
    source: &'a dyn RawSource,
    columns: Vec<String>,
    chunk_size: usize,
    index: usize,
    offset: usize,
    done: bool,
}

impl<'a> ChunkIter<'a> {
    pub fn new(source: &'a dyn RawSource, columns: Vec<String>, chunk_size: usize) -> Self {
        Self {
            source,
            columns,
            chunk_size: chunk_size.max(1),
            index: 0,
            offset: 0,
            done: false,
        }
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = Result<RawChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let data = match self
            .source
            .read_window(self.offset, self.chunk_size, &self.columns)
        {
            Ok(df) => df,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let height = data.height();
        if height < self.chunk_size {
            self.done = true;
        }
        if height == 0 {
            return None;
        }

        let chunk = RawChunk {
            index: self.index,
            offset: self.offset,
            data,
        };
        self.index += 1;
        self.offset += height;
        Some(Ok(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(rows: usize) -> DataFrameSource {
        let ages: Vec<String> = (0..rows).map(|i| i.to_string()).collect();
        DataFrameSource::new(df!("nu_idade_n" => ages).unwrap())
    }

    #[test]
    fn test_chunks_cover_every_row_once() {
        let src = source(10);
        let chunks: Vec<RawChunk> = ChunkIter::new(&src, vec!["nu_idade_n".to_string()], 3)
            .collect::<Result<_>>()
            .unwrap();

        let heights: Vec<usize> = chunks.iter().map(|c| c.data.height()).collect();
        assert_eq!(heights, vec![3, 3, 3, 1]);
        assert_eq!(chunks[3].offset, 9);
        assert_eq!(chunks[3].index, 3);
    }

    #[test]
    fn test_chunks_exact_multiple() {
        let src = source(6);
        let count = ChunkIter::new(&src, vec!["nu_idade_n".to_string()], 3).count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_chunks_empty_source() {
        let src = source(0);
        assert_eq!(ChunkIter::new(&src, vec!["nu_idade_n".to_string()], 3).count(), 0);
    }

    #[test]
    fn test_present_columns_filters_missing() {
        let src = source(1);
        let wanted = vec!["febre".to_string(), "nu_idade_n".to_string()];
        assert_eq!(src.present_columns(&wanted), vec!["nu_idade_n".to_string()]);
        assert_eq!(src.row_count(), Some(1));
    }
}
