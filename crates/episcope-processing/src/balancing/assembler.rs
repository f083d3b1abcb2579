//! Final assembly of the balanced dataset.

use super::sampler::{BalancedSample, concat_frames};
use crate::cleaner::empty_output_frame;
use crate::error::{CleaningError, Result};
use polars::prelude::*;
use rand::Rng;
use rand::seq::SliceRandom;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Concatenates per-class samples, shuffles them, and writes the result.
pub struct FinalAssembler;

impl FinalAssembler {
    /// Stack the per-label samples and apply a full random permutation, so
    /// the label of a row cannot be told from its position.
    ///
    /// An empty sample yields a zero-row frame with the output schema.
    pub fn assemble<R: Rng + ?Sized>(
        sample: BalancedSample,
        symptom_columns: &[String],
        rng: &mut R,
    ) -> Result<DataFrame> {
        if sample.per_label.is_empty() {
            return Ok(empty_output_frame(symptom_columns)?);
        }

        let stacked = concat_frames(sample.per_label.into_values().collect())?;

        let mut order: Vec<IdxSize> = (0..stacked.height() as IdxSize).collect();
        order.shuffle(rng);
        let order = IdxCa::from_vec("order".into(), order);

        Ok(stacked.take(&order)?)
    }

    /// Write `df` as CSV to `path`, replacing any previous file atomically.
    ///
    /// The data goes to a hidden temporary file next to `path` and is renamed
    /// over it only after a complete, synced write.
    ///
    /// # Errors
    ///
    /// Returns [`CleaningError::PersistFailed`]; the previous file, if any,
    /// is left untouched.
    pub fn persist(df: &mut DataFrame, path: &Path) -> Result<()> {
        let tmp_path = temp_path_for(path);

        let result = Self::write_then_rename(df, path, &tmp_path);
        if result.is_err() && tmp_path.exists() {
            if let Err(e) = fs::remove_file(&tmp_path) {
                warn!("Could not remove {}: {}", tmp_path.display(), e);
            }
        }
        result.map_err(|reason| {
            CleaningError::PersistFailed(format!("{}: {}", path.display(), reason))
        })?;

        info!("Balanced dataset saved: {} ({} rows)", path.display(), df.height());
        Ok(())
    }

    fn write_then_rename(
        df: &mut DataFrame,
        path: &Path,
        tmp_path: &Path,
    ) -> std::result::Result<(), String> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let mut file = File::create(tmp_path).map_err(|e| e.to_string())?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .with_separator(b',')
            .finish(df)
            .map_err(|e| e.to_string())?;
        file.sync_all().map_err(|e| e.to_string())?;
        drop(file);

        fs::rename(tmp_path, path).map_err(|e| e.to_string())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "balanced.csv".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}
