//! A single append-only staging area backed by Parquet part files.

use crate::error::{CleaningError, Result};
use crate::types::Label;
use polars::prelude::*;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const PART_PREFIX: &str = "part-";
const PART_SUFFIX: &str = ".parquet";

/// Normalized rows of one label, accumulated across chunks.
///
/// Each append becomes its own part file named after the chunk it came
/// from, so re-appending the same chunk replaces that part instead of
/// duplicating rows.
#[derive(Debug)]
pub struct ClassStagingArea {
    label: Label,
    dir: PathBuf,
    /// Set once this area holds a directory for the current run.
    created: bool,
    rows: usize,
}

impl ClassStagingArea {
    /// A staging area for `label` under `root` that has not been written yet.
    pub fn new(root: &Path, label: Label) -> Self {
        Self {
            label,
            dir: root.join(label.as_str()),
            created: false,
            rows: 0,
        }
    }

    /// Attach to whatever an earlier run committed under `root`.
    pub fn open_existing(root: &Path, label: Label) -> Result<Self> {
        let mut area = Self::new(root, label);
        if area.dir.is_dir() {
            area.created = true;
            for path in area.part_paths()? {
                let rows = Self::part_rows(&path).map_err(|e| area.failure(e))?;
                area.rows += rows;
            }
        }
        Ok(area)
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Rows committed so far.
    pub fn count(&self) -> usize {
        self.rows
    }

    /// Append the rows of chunk `chunk_index`. Empty frames are ignored.
    pub fn append(&mut self, chunk_index: usize, df: &DataFrame) -> Result<()> {
        if df.height() == 0 {
            return Ok(());
        }

        if !self.created {
            self.reset()?;
            self.created = true;
        }

        let name = format!("{}{:06}{}", PART_PREFIX, chunk_index, PART_SUFFIX);
        let final_path = self.dir.join(&name);
        let tmp_path = self.dir.join(format!(".{}.tmp", name));

        // a part left by an earlier attempt of this chunk is replaced, not added to
        let replaced_rows = if final_path.is_file() {
            Self::part_rows(&final_path).map_err(|e| self.failure(e))?
        } else {
            0
        };

        let mut frame = df.clone();
        let file = File::create(&tmp_path).map_err(|e| self.failure(e))?;
        ParquetWriter::new(file)
            .finish(&mut frame)
            .map_err(|e| self.failure(e))?;
        fs::rename(&tmp_path, &final_path).map_err(|e| self.failure(e))?;

        self.rows = self.rows.saturating_sub(replaced_rows) + df.height();
        debug!(
            "Staged {} {} rows from chunk {} ({} total)",
            df.height(),
            self.label,
            chunk_index,
            self.rows
        );
        Ok(())
    }

    /// Committed part files in chunk order.
    pub fn part_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.failure(e)),
        };

        let mut parts = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| self.failure(e))?.path();
            let is_part = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(PART_PREFIX) && n.ends_with(PART_SUFFIX));
            if is_part {
                parts.push(path);
            }
        }
        parts.sort();
        Ok(parts)
    }

    /// Read one committed part.
    pub fn read_part(&self, path: &Path) -> Result<DataFrame> {
        let file = File::open(path).map_err(|e| self.failure(e))?;
        ParquetReader::new(file).finish().map_err(|e| self.failure(e))
    }

    /// Delete the area. Deleting an absent area is not an error.
    pub fn discard(&mut self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(self.failure(e)),
        }
        self.created = false;
        self.rows = 0;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.discard()?;
        fs::create_dir_all(&self.dir).map_err(|e| self.failure(e))?;
        Ok(())
    }

    fn part_rows(path: &Path) -> std::result::Result<usize, PolarsError> {
        let file = File::open(path)?;
        ParquetReader::new(file).num_rows()
    }

    fn failure(&self, reason: impl ToString) -> CleaningError {
        CleaningError::StagingFailed {
            label: self.label.to_string(),
            reason: reason.to_string(),
        }
    }
}
