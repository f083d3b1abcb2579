//! Undersampling of the staged classes to the size of the smallest one.

use crate::error::{CleaningError, Result};
use crate::staging::{ClassStagingArea, StagingStore};
use crate::types::Label;
use crate::utils::format_counts;
use polars::prelude::*;
use rand::Rng;
use rand::seq::index;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Equal-size draws from every staging area.
#[derive(Debug, Default)]
pub struct BalancedSample {
    /// Rows drawn from each label.
    pub min_count: usize,
    /// Rows staged per label before sampling.
    pub staged: BTreeMap<Label, usize>,
    /// Drawn rows per label. Empty when any label had no rows.
    pub per_label: BTreeMap<Label, DataFrame>,
}

impl BalancedSample {
    /// True when some label had nothing staged and nothing was drawn.
    pub fn is_empty(&self) -> bool {
        self.min_count == 0
    }
}

/// Draws `min_count` rows from every label, uniformly and without replacement.
pub struct BalancedSampler;

impl BalancedSampler {
    /// Sample every area of `store` down to the smallest staged count.
    ///
    /// A label with no rows yields an empty sample and a warning rather than
    /// an error.
    pub fn sample<R: Rng + ?Sized>(store: &StagingStore, rng: &mut R) -> Result<BalancedSample> {
        let staged = store.counts();
        let min_count = staged.values().copied().min().unwrap_or(0);

        info!(
            "Staged rows: {} (drawing {} per class)",
            format_counts(&staged),
            min_count
        );

        let mut sample = BalancedSample {
            min_count,
            staged,
            per_label: BTreeMap::new(),
        };

        if min_count == 0 {
            warn!("At least one class has no rows; the balanced dataset will be empty");
            return Ok(sample);
        }

        for label in Label::ALL {
            let frame = Self::sample_area(store.area(label), min_count, rng)?;
            sample.per_label.insert(label, frame);
        }

        Ok(sample)
    }

    /// Draw `amount` rows of one area.
    ///
    /// Row positions are drawn over the whole area first, then the parts are
    /// scanned in order keeping only the drawn positions, so at most one part
    /// plus the sample is held in memory.
    pub fn sample_area<R: Rng + ?Sized>(
        area: &ClassStagingArea,
        amount: usize,
        rng: &mut R,
    ) -> Result<DataFrame> {
        let total = area.count();
        if amount > total {
            return Err(CleaningError::StagingFailed {
                label: area.label().to_string(),
                reason: format!("cannot draw {} rows from {}", amount, total),
            });
        }

        let mut selected = index::sample(rng, total, amount).into_vec();
        selected.sort_unstable();

        let mut pieces: Vec<DataFrame> = Vec::new();
        let mut offset = 0usize;
        let mut cursor = 0usize;

        for path in area.part_paths()? {
            if cursor == selected.len() {
                break;
            }

            let part = area.read_part(&path)?;
            let end = offset + part.height();

            let mut keep = vec![false; part.height()];
            while cursor < selected.len() && selected[cursor] < end {
                keep[selected[cursor] - offset] = true;
                cursor += 1;
            }

            if keep.iter().any(|k| *k) {
                let mask = BooleanChunked::from_slice("keep".into(), &keep);
                pieces.push(part.filter(&mask)?);
            }
            offset = end;
        }

        if cursor < selected.len() {
            return Err(CleaningError::StagingFailed {
                label: area.label().to_string(),
                reason: format!("expected {} rows on disk, found {}", total, offset),
            });
        }

        debug!("Drew {} of {} {} rows", amount, total, area.label());
        concat_frames(pieces)
    }
}

/// Stack frames sharing one schema.
pub(crate) fn concat_frames(frames: Vec<DataFrame>) -> Result<DataFrame> {
    let mut frames = frames.into_iter();
    let Some(mut out) = frames.next() else {
        return Ok(DataFrame::empty());
    };
    for frame in frames {
        out.vstack_mut(&frame)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaner::NormalizedChunk;
    use crate::utils::make_rng;
    use std::collections::HashSet;

    fn staged_store(root: &std::path::Path, counts: [(Label, usize); 3], chunk: usize) -> StagingStore {
        let mut store = StagingStore::new(root);
        let mut next_id = 0i64;
        let mut chunk_index = 0;

        for (label, rows) in counts {
            let mut remaining = rows;
            while remaining > 0 {
                let take = remaining.min(chunk);
                let ids: Vec<i64> = (next_id..next_id + take as i64).collect();
                next_id += take as i64;

                let mut normalized = NormalizedChunk::default();
                normalized.by_label.insert(label, df!("id" => ids).unwrap());
                store.append_chunk(chunk_index, &normalized, 1).unwrap();

                chunk_index += 1;
                remaining -= take;
            }
        }
        store
    }

    fn ids(df: &DataFrame) -> Vec<i64> {
        df.column("id").unwrap().i64().unwrap().into_no_null_iter().collect()
    }

    #[test]
    fn test_sample_equal_counts_without_duplicates() {
        let root = tempfile::tempdir().unwrap();
        let store = staged_store(
            root.path(),
            [(Label::Dengue, 10), (Label::Zika, 3), (Label::Chikungunya, 7)],
            4,
        );

        let mut rng = make_rng(Some(1));
        let sample = BalancedSampler::sample(&store, &mut rng).unwrap();

        assert_eq!(sample.min_count, 3);
        for label in Label::ALL {
            let drawn = ids(&sample.per_label[&label]);
            assert_eq!(drawn.len(), 3);
            let unique: HashSet<i64> = drawn.iter().copied().collect();
            assert_eq!(unique.len(), 3);
        }
    }

    #[test]
    fn test_sample_empty_class_gives_empty_sample() {
        let root = tempfile::tempdir().unwrap();
        let store = staged_store(
            root.path(),
            [(Label::Dengue, 5), (Label::Zika, 0), (Label::Chikungunya, 2)],
            10,
        );

        let sample = BalancedSampler::sample(&store, &mut make_rng(Some(1))).unwrap();
        assert!(sample.is_empty());
        assert!(sample.per_label.is_empty());
        assert_eq!(sample.staged[&Label::Dengue], 5);
    }

    #[test]
    fn test_sample_is_reproducible_with_seed() {
        let root = tempfile::tempdir().unwrap();
        let store = staged_store(
            root.path(),
            [(Label::Dengue, 50), (Label::Zika, 20), (Label::Chikungunya, 30)],
            7,
        );

        let a = BalancedSampler::sample(&store, &mut make_rng(Some(99))).unwrap();
        let b = BalancedSampler::sample(&store, &mut make_rng(Some(99))).unwrap();
        for label in Label::ALL {
            assert_eq!(ids(&a.per_label[&label]), ids(&b.per_label[&label]));
        }
    }

    #[test]
    fn test_every_row_can_be_drawn_across_parts() {
        let root = tempfile::tempdir().unwrap();
        let store = staged_store(
            root.path(),
            [(Label::Dengue, 12), (Label::Zika, 1), (Label::Chikungunya, 1)],
            3,
        );
        let area = store.area(Label::Dengue);

        let mut seen = HashSet::new();
        let mut rng = make_rng(Some(5));
        for _ in 0..400 {
            seen.extend(ids(&BalancedSampler::sample_area(area, 1, &mut rng).unwrap()));
        }
        // dengue ids are 0..12, spread over four parts
        assert_eq!(seen.len(), 12);
    }

    #[test]
    fn test_sample_area_rejects_oversized_draw() {
        let root = tempfile::tempdir().unwrap();
        let store = staged_store(
            root.path(),
            [(Label::Dengue, 2), (Label::Zika, 1), (Label::Chikungunya, 1)],
            3,
        );
        let err = BalancedSampler::sample_area(store.area(Label::Zika), 5, &mut make_rng(None))
            .unwrap_err();
        assert_eq!(err.error_code(), "STAGING_FAILED");
    }
}
