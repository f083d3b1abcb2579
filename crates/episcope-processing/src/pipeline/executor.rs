//! Chunked streaming of the raw source into the staging areas.

use crate::cleaner::{DuplicateFilter, RecordNormalizer};
use crate::config::PipelineConfig;
use crate::error::{Result, ResultExt};
use crate::profiler::GlobalStatistic;
use crate::source::{ChunkIter, RawSource};
use crate::staging::StagingStore;
use crate::types::Label;
use crate::utils::format_counts;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Running totals of the streaming pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    /// Raw rows read.
    pub rows_read: usize,
    /// Rows excluded for a missing or unmapped label.
    pub rows_rejected: usize,
    /// Rows dropped as repeated notifications.
    pub duplicates_dropped: usize,
    /// Chunks processed.
    pub chunks: usize,
    /// Rows committed per label.
    pub staged: BTreeMap<Label, usize>,
}

/// Reads the source in bounded chunks, normalizes each one and appends the
/// survivors to their label's staging area.
///
/// Can only be built from a [`GlobalStatistic`], so streaming never starts
/// before the statistics pass has finished.
pub struct StreamProcessor {
    normalizer: RecordNormalizer,
    dedup: Option<DuplicateFilter>,
    columns: Vec<String>,
    chunk_size: usize,
    max_attempts: usize,
}

impl StreamProcessor {
    pub fn new(config: &PipelineConfig, statistic: &GlobalStatistic) -> Self {
        let dedup = config
            .deduplicate
            .then(|| DuplicateFilter::new(config.dedup_key_columns.clone()));

        Self {
            normalizer: RecordNormalizer::new(config, statistic),
            dedup,
            columns: config.required_columns(),
            chunk_size: config.chunk_size,
            max_attempts: config.max_chunk_retries,
        }
    }

    /// Stream `source` into `store`.
    ///
    /// `observe` runs after every committed chunk with the running totals; an
    /// error from it (e.g. cancellation) stops the pass. Parts committed
    /// before the stop stay on disk.
    pub fn run<F>(
        &mut self,
        source: &dyn RawSource,
        store: &mut StagingStore,
        mut observe: F,
    ) -> Result<StreamStats>
    where
        F: FnMut(&StreamStats) -> Result<()>,
    {
        let columns = source.present_columns(&self.columns);
        for missing in self.columns.iter().filter(|c| !columns.contains(c)) {
            warn!("Column '{}' absent from {}; treated as null", missing, source.describe());
        }
        if !columns.iter().any(|c| c == self.normalizer.label_column()) {
            warn!(
                "Label column '{}' absent; every row will be rejected",
                self.normalizer.label_column()
            );
        }

        let mut stats = StreamStats::default();

        for chunk in ChunkIter::new(source, columns, self.chunk_size) {
            let chunk = chunk.context("Reading raw chunk")?;
            let height = chunk.data.height();
            stats.rows_read += height;

            let data = match self.dedup.as_mut() {
                Some(filter) => {
                    let (kept, dropped) = filter.filter(chunk.data)?;
                    stats.duplicates_dropped += dropped;
                    kept
                }
                None => chunk.data,
            };

            let normalized = self
                .normalizer
                .normalize_chunk(&data)
                .context(format!("Normalizing chunk {}", chunk.index))?;
            stats.rows_rejected += normalized.rejected;

            if normalized.accepted > 0 {
                store.append_chunk(chunk.index, &normalized, self.max_attempts)?;
            } else {
                debug!("Chunk {} has no rows to stage", chunk.index);
            }

            stats.chunks += 1;
            stats.staged = store.counts();
            info!(
                "Chunk {}: {} rows read, {} rejected, staged {}",
                chunk.index,
                height,
                normalized.rejected,
                format_counts(&stats.staged)
            );

            observe(&stats)?;
        }

        info!(
            "Streaming finished: {} chunks, {} rows read, {} rejected, {} duplicates dropped",
            stats.chunks, stats.rows_read, stats.rows_rejected, stats.duplicates_dropped
        );
        if let Some(filter) = &self.dedup {
            debug!("{} distinct notifications seen", filter.distinct());
        }
        Ok(stats)
    }
}
