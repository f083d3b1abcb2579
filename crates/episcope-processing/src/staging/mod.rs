//! Per-class staging of normalized rows.
//!
//! One [`ClassStagingArea`] per [`Label`], owned by a [`StagingStore`].
//! Appends for a label go through `&mut` access to its area, so writes to
//! one area are always serialized.

mod area;

pub use area::ClassStagingArea;

use crate::cleaner::NormalizedChunk;
use crate::error::{CleaningError, Result};
use crate::types::Label;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// The three staging areas of a run.
#[derive(Debug)]
pub struct StagingStore {
    root: PathBuf,
    areas: BTreeMap<Label, ClassStagingArea>,
}

impl StagingStore {
    /// Staging areas under `root`. Nothing on disk is touched until the
    /// first append of each label.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let areas = Label::ALL
            .iter()
            .map(|label| (*label, ClassStagingArea::new(&root, *label)))
            .collect();
        Self { root, areas }
    }

    /// Staging for a fresh run. Whatever an earlier run left in any of the
    /// three areas is removed before the first chunk is appended.
    pub fn fresh(root: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::new(root);
        store.discard_all()?;
        Ok(store)
    }

    /// Attach to the areas a previous run committed, for finalizing without
    /// re-streaming the source.
    pub fn open_existing(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let mut areas = BTreeMap::new();
        for label in Label::ALL {
            areas.insert(label, ClassStagingArea::open_existing(&root, label)?);
        }
        Ok(Self { root, areas })
    }

    pub fn area(&self, label: Label) -> &ClassStagingArea {
        &self.areas[&label]
    }

    /// Rows committed per label.
    pub fn counts(&self) -> BTreeMap<Label, usize> {
        self.areas
            .iter()
            .map(|(label, area)| (*label, area.count()))
            .collect()
    }

    /// Append every partition of a normalized chunk, retrying each failing
    /// partition up to `max_attempts` times.
    ///
    /// # Errors
    ///
    /// Returns [`CleaningError::ChunkPersistFailure`] once the attempts are
    /// exhausted. Partitions and chunks committed before stay on disk.
    pub fn append_chunk(
        &mut self,
        chunk_index: usize,
        chunk: &NormalizedChunk,
        max_attempts: usize,
    ) -> Result<()> {
        let max_attempts = max_attempts.max(1);

        for (label, frame) in &chunk.by_label {
            let area = self
                .areas
                .get_mut(label)
                .ok_or_else(|| CleaningError::StagingFailed {
                    label: label.to_string(),
                    reason: "no staging area".to_string(),
                })?;

            let mut attempt = 1;
            loop {
                match area.append(chunk_index, frame) {
                    Ok(()) => break,
                    Err(e) if attempt < max_attempts => {
                        warn!(
                            "Chunk {} append to '{}' failed (attempt {}/{}): {}",
                            chunk_index, label, attempt, max_attempts, e
                        );
                        attempt += 1;
                    }
                    Err(e) => {
                        return Err(CleaningError::ChunkPersistFailure {
                            chunk: chunk_index,
                            attempts: attempt,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Delete all three areas. Areas already gone are skipped silently.
    pub fn discard_all(&mut self) -> Result<()> {
        for area in self.areas.values_mut() {
            area.discard()?;
        }
        info!("Discarded staging areas under {}", self.root.display());
        Ok(())
    }
}
