//! Main cleaning pipeline module.
//!
//! This module provides the core `Pipeline` struct and builder for
//! orchestrating a cleaning run: statistics pass, streaming pass, balanced
//! sampling, final assembly and staging cleanup.

use crate::balancing::{BalancedSampler, FinalAssembler};
use crate::cleaner::DuplicateFilter;
use crate::config::{ConfigValidationError, PipelineConfig};
use crate::error::{CleaningError, Result, ResultExt};
use crate::pipeline::executor::StreamProcessor;
use crate::pipeline::progress::{
    CancellationToken, ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate,
};
use crate::profiler::{GlobalStatistic, SourceDiagnosis};
use crate::source::RawSource;
use crate::staging::StagingStore;
use crate::types::RunSummary;
use crate::utils::{format_counts, make_rng};
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// The main cleaning pipeline.
///
/// Use [`Pipeline::builder()`] to create a new pipeline with custom configuration.
///
/// # Example
///
/// ```rust,ignore
/// use episcope_processing::{CsvSource, Pipeline, PipelineConfig, CancellationToken};
///
/// let token = CancellationToken::new();
/// let source = CsvSource::open("data/arboviroses_cases.csv")?;
///
/// let summary = Pipeline::builder()
///     .config(PipelineConfig::builder().seed(42).build()?)
///     .cancellation_token(token.clone())
///     .on_progress(|update| {
///         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
///     })
///     .build()?
///     .run(&source)?;
///
/// println!("{} rows written", summary.rows_written);
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: CancellationToken,
}

// Pipeline must be movable onto a worker thread
static_assertions::assert_impl_all!(Pipeline: Send);

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Clean `source` into a balanced, shuffled dataset at the configured
    /// output path.
    ///
    /// The median age is computed over the whole source before any row is
    /// normalized. Staging is discarded only after the dataset was written.
    ///
    /// # Errors
    ///
    /// Returns `Err(CleaningError::Cancelled)` if the pipeline was cancelled
    /// via the cancellation token; committed staging parts are kept. A
    /// [`CleaningError::PersistFailed`] also keeps staging so that
    /// [`finalize`](Self::finalize) can retry the write.
    pub fn run(&self, source: &dyn RawSource) -> Result<RunSummary> {
        self.finish(self.run_internal(source))
    }

    /// Sample, assemble and persist from the staging areas a previous run
    /// left behind, without reading the source again.
    pub fn finalize(&self) -> Result<RunSummary> {
        self.finish(self.finalize_internal())
    }

    /// Count, per raw label, the non-null values of every column of `source`.
    pub fn diagnose(&self, source: &dyn RawSource) -> Result<SourceDiagnosis> {
        info!("Diagnosing {}", source.describe());
        let diagnosis = SourceDiagnosis::compute(
            source,
            &self.config.label_column,
            self.config.chunk_size,
            self.duplicate_filter(),
        )
        .context("Source diagnosis")?;
        info!(
            "{} rows, {} duplicates, {} unlabeled, {} distinct labels",
            diagnosis.total_rows,
            diagnosis.duplicates_dropped,
            diagnosis.unlabeled_rows,
            diagnosis.rows_per_label.len()
        );
        Ok(diagnosis)
    }

    /// Remove every staging area and the cached statistic. Missing pieces
    /// are skipped.
    pub fn cleanup(&self) -> Result<()> {
        let root = &self.config.staging_dir;
        StagingStore::new(root.clone())
            .discard_all()
            .context("Staging cleanup")?;

        GlobalStatistic::discard(root).context("Staging cleanup")?;

        // only an empty root is removed; anything else there is not ours
        if fs::read_dir(root).is_ok_and(|mut entries| entries.next().is_none()) {
            fs::remove_dir(root).context("Staging cleanup")?;
        }
        Ok(())
    }

    fn finish(&self, result: Result<RunSummary>) -> Result<RunSummary> {
        match result {
            Ok(summary) => {
                self.report_progress(ProgressUpdate::complete(format!(
                    "Balanced dataset ready: {} rows",
                    summary.rows_written
                )));
                Ok(summary)
            }
            Err(e) => {
                if e.is_cancelled() {
                    self.report_progress(ProgressUpdate::cancelled());
                } else {
                    self.report_progress(ProgressUpdate::failed(e.to_string()));
                }
                error!("Pipeline error: {}", e);
                Err(e)
            }
        }
    }

    /// Check if cancellation has been requested.
    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(CleaningError::Cancelled);
        }
        Ok(())
    }

    fn duplicate_filter(&self) -> Option<DuplicateFilter> {
        self.config
            .deduplicate
            .then(|| DuplicateFilter::new(self.config.dedup_key_columns.clone()))
    }

    /// Report progress if a reporter is configured.
    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }

    fn run_internal(&self, source: &dyn RawSource) -> Result<RunSummary> {
        let start_time = Instant::now();
        let mut summary = RunSummary::new();

        info!("Starting cleaning run over {}", source.describe());
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Initializing,
            0.0,
            "Starting cleaning run...",
        ));
        self.check_cancelled()?;

        // Phase 1: the imputation value, from the whole source
        let statistic = self
            .global_statistic(source, &mut summary)
            .context("Statistics pass")?;
        summary.median_age = statistic.median_age();

        // Phase 2: stream into staging
        self.check_cancelled()?;
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Streaming,
            0.0,
            format!("Streaming in chunks of {} rows", self.config.chunk_size),
        ));

        let expected_rows = source.row_count().unwrap_or(statistic.rows_scanned);
        // areas an interrupted run left behind must not leak into this one
        let mut store =
            StagingStore::fresh(self.config.staging_dir.clone()).context("Preparing staging")?;
        let mut processor = StreamProcessor::new(&self.config, &statistic);

        let stats = processor
            .run(source, &mut store, |stats| {
                self.report_progress(ProgressUpdate::with_items(
                    PipelineStage::Streaming,
                    format!("Chunk {}", stats.chunks),
                    stats.rows_read.min(expected_rows),
                    expected_rows,
                    format!(
                        "{} rows read, {} rejected, staged {}",
                        stats.rows_read,
                        stats.rows_rejected,
                        format_counts(&stats.staged)
                    ),
                ));
                self.check_cancelled()
            })
            .context("Streaming pass")?;

        summary.rows_read = stats.rows_read;
        summary.rows_rejected = stats.rows_rejected;
        summary.duplicates_dropped = stats.duplicates_dropped;
        summary.chunks = stats.chunks;

        // Phase 3: balance, assemble, clean up
        self.balance_and_persist(&mut store, &mut summary)?;

        summary.duration_ms = start_time.elapsed().as_millis() as u64;
        info!("Cleaning run completed in {}ms", summary.duration_ms);
        Ok(summary)
    }

    fn finalize_internal(&self) -> Result<RunSummary> {
        let start_time = Instant::now();
        let mut summary = RunSummary::new();
        let root = &self.config.staging_dir;

        info!("Finalizing from staging under {}", root.display());
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Initializing,
            0.0,
            "Opening staging areas...",
        ));
        self.check_cancelled()?;

        let mut store = StagingStore::open_existing(root.clone()).context("Opening staging")?;
        if let Some(statistic) = GlobalStatistic::load(root).context("Opening staging")? {
            summary.median_age = statistic.median_age();
            summary.statistic_reused = true;
        }

        self.balance_and_persist(&mut store, &mut summary)?;

        summary.duration_ms = start_time.elapsed().as_millis() as u64;
        info!("Finalize completed in {}ms", summary.duration_ms);
        Ok(summary)
    }

    /// Load the cached median when allowed and computed from this source,
    /// otherwise scan the source and cache the result.
    fn global_statistic(
        &self,
        source: &dyn RawSource,
        summary: &mut RunSummary,
    ) -> Result<GlobalStatistic> {
        let root = &self.config.staging_dir;

        if self.config.reuse_statistic {
            if let Some(cached) = GlobalStatistic::load_for(root, source)? {
                info!("Reusing cached median age {}", cached.median_age());
                summary.statistic_reused = true;
                return Ok(cached);
            }
            warn!("No usable cached statistic under {}; computing it", root.display());
        }

        self.report_progress(ProgressUpdate::new(
            PipelineStage::Statistics,
            0.0,
            format!("Computing median of '{}'", self.config.age_column),
        ));

        let total_rows = source.row_count();
        let statistic = GlobalStatistic::compute_with(
            source,
            &self.config.age_column,
            self.config.chunk_size,
            self.duplicate_filter(),
            |chunk| {
                let scanned = chunk.offset + chunk.data.height();
                let update = match total_rows {
                    Some(total) => ProgressUpdate::with_items(
                        PipelineStage::Statistics,
                        format!("Chunk {}", chunk.index),
                        scanned,
                        total,
                        format!("{} rows scanned", scanned),
                    ),
                    None => ProgressUpdate::with_sub_stage(
                        PipelineStage::Statistics,
                        format!("Chunk {}", chunk.index),
                        0.0,
                        format!("{} rows scanned", scanned),
                    ),
                };
                self.report_progress(update);
                self.check_cancelled()
            },
        )?;

        if let Err(e) = statistic.save(root) {
            warn!("Could not cache statistic: {}", e);
            summary.add_warning(format!("Statistic not cached: {}", e));
        }

        Ok(statistic)
    }

    fn balance_and_persist(&self, store: &mut StagingStore, summary: &mut RunSummary) -> Result<()> {
        self.check_cancelled()?;
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Sampling,
            0.0,
            "Drawing equal samples per class",
        ));

        // one generator for sampling and shuffling keeps seeded runs identical
        let mut rng = make_rng(self.config.seed);
        let sample = BalancedSampler::sample(store, &mut rng).context("Balanced sampling")?;

        summary.staged = sample.staged.clone();
        summary.min_count = sample.min_count;
        if sample.is_empty() {
            summary.add_warning(format!(
                "At least one class has no staged rows ({}); the balanced dataset is empty",
                format_counts(&summary.staged)
            ));
        }

        self.check_cancelled()?;
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Assembling,
            0.0,
            format!("Shuffling {} rows per class", sample.min_count),
        ));

        let mut df = FinalAssembler::assemble(sample, &self.config.symptom_columns, &mut rng)
            .context("Final assembly")?;
        FinalAssembler::persist(&mut df, &self.config.output_path)
            .context("Persisting balanced dataset")?;

        summary.rows_written = df.height();
        summary.output_path = Some(self.config.output_path.clone());

        self.report_progress(ProgressUpdate::new(
            PipelineStage::Cleanup,
            0.0,
            "Discarding staging areas",
        ));
        // the dataset is already in place; leftovers are only a warning
        if let Err(e) = store.discard_all() {
            warn!("Staging cleanup failed: {}", e);
            summary.add_warning(format!("Staging not fully discarded: {}", e));
        }
        if let Err(e) = GlobalStatistic::discard(&self.config.staging_dir) {
            warn!("Cached statistic not removed: {}", e);
            summary.add_warning(format!("Cached statistic not removed: {}", e));
        }

        Ok(())
    }
}

/// Builder for creating a [`Pipeline`] instance.
///
/// Use [`Pipeline::builder()`] to get started.
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: Option<CancellationToken>,
}

static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set a progress reporter for receiving updates during a run.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use episcope_processing::{ProgressReporter, ProgressUpdate};
    /// use std::sync::Arc;
    ///
    /// struct StageLogger;
    ///
    /// impl ProgressReporter for StageLogger {
    ///     fn report(&self, update: ProgressUpdate) {
    ///         println!("{}: {}", update.stage.display_name(), update.message);
    ///     }
    /// }
    ///
    /// let pipeline = Pipeline::builder()
    ///     .progress_reporter(Arc::new(StageLogger))
    ///     .build()?;
    /// ```
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    ///
    /// Convenience over [`progress_reporter`](Self::progress_reporter).
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Set a cancellation token for stopping the pipeline.
    ///
    /// Clone the token and call [`CancellationToken::cancel()`] from any
    /// thread. The pipeline stops before its next stage or chunk with
    /// [`CleaningError::Cancelled`].
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Build the pipeline.
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> std::result::Result<Pipeline, ConfigValidationError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(Pipeline {
            config,
            progress_reporter: self.progress_reporter,
            cancellation_token: self.cancellation_token.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::STATISTIC_FILE;
    use crate::source::DataFrameSource;
    use crate::types::Label;
    use polars::prelude::*;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn source() -> DataFrameSource {
        let labels: Vec<&str> = std::iter::repeat_n("dengue", 4)
            .chain(std::iter::repeat_n("zika", 2))
            .chain(std::iter::repeat_n("chikungunya", 3))
            .collect();
        let ages: Vec<String> = (0..labels.len()).map(|i| (20 + i).to_string()).collect();
        let df = df!(
            "febre" => vec!["1"; labels.len()],
            "cs_sexo" => vec!["F"; labels.len()],
            "nu_idade_n" => ages,
            "doenca_alvo" => labels
        )
        .unwrap();
        DataFrameSource::new(df)
    }

    /// One row per label, every row aged `age`.
    fn labelled_source(labels: &[&str], age: &str) -> DataFrameSource {
        let dates: Vec<String> = (0..labels.len())
            .map(|i| format!("2024-03-{:02}", i + 1))
            .collect();
        let df = df!(
            "dt_notific" => dates,
            "febre" => vec!["1"; labels.len()],
            "cs_sexo" => vec!["M"; labels.len()],
            "nu_idade_n" => vec![age; labels.len()],
            "doenca_alvo" => labels.to_vec()
        )
        .unwrap();
        DataFrameSource::new(df)
    }

    /// A pipeline that cancels itself once its first chunk is staged.
    fn cancelling_pipeline(config: &PipelineConfig) -> Pipeline {
        let token = CancellationToken::new();
        let trigger = token.clone();
        Pipeline::builder()
            .config(config.clone())
            .cancellation_token(token)
            .on_progress(move |update| {
                if update.stage == PipelineStage::Streaming && update.sub_stage.is_some() {
                    trigger.cancel();
                }
            })
            .build()
            .unwrap()
    }

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfig::builder()
            .chunk_size(4)
            .seed(7)
            .staging_dir(dir.join("staging"))
            .output_path(dir.join("out").join("balanced.csv"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_pipeline_builder_default() {
        let pipeline = Pipeline::builder().build().unwrap();
        assert_eq!(pipeline.config().chunk_size, 100_000);
        assert!(!pipeline.cancellation_token.is_cancelled());
    }

    #[test]
    fn test_pipeline_builder_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.chunk_size = 0;
        assert!(Pipeline::builder().config(config).build().is_err());
    }

    #[test]
    fn test_pipeline_builder_with_progress_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let pipeline = Pipeline::builder()
            .on_progress(move |_update| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        pipeline.report_progress(ProgressUpdate::new(PipelineStage::Sampling, 0.5, "Test"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_check_cancelled() {
        let token = CancellationToken::new();
        let pipeline = Pipeline::builder()
            .cancellation_token(token.clone())
            .build()
            .unwrap();

        assert!(pipeline.check_cancelled().is_ok());
        token.cancel();
        assert!(matches!(pipeline.check_cancelled(), Err(CleaningError::Cancelled)));
    }

    #[test]
    fn test_run_balances_and_discards_staging() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let stages = Arc::new(Mutex::new(Vec::new()));
        let seen = stages.clone();

        let summary = Pipeline::builder()
            .config(config.clone())
            .on_progress(move |update| seen.lock().unwrap().push(update.stage))
            .build()
            .unwrap()
            .run(&source())
            .unwrap();

        assert_eq!(summary.rows_read, 9);
        assert_eq!(summary.min_count, 2);
        assert_eq!(summary.rows_written, 6);
        assert_eq!(summary.staged[&Label::Dengue], 4);
        assert_eq!(summary.median_age, 24.0);
        assert!(summary.warnings.is_empty());
        assert!(config.output_path.is_file());
        assert!(!config.staging_dir.join("dengue").exists());
        assert!(!config.staging_dir.join(STATISTIC_FILE).exists());

        let stages = stages.lock().unwrap();
        assert_eq!(stages.first(), Some(&PipelineStage::Initializing));
        assert!(stages.contains(&PipelineStage::Statistics));
        assert!(stages.contains(&PipelineStage::Streaming));
        assert_eq!(stages.last(), Some(&PipelineStage::Complete));
    }

    #[test]
    fn test_cancelled_run_keeps_staged_parts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let token = CancellationToken::new();
        let trigger = token.clone();

        let pipeline = Pipeline::builder()
            .config(config.clone())
            .cancellation_token(token)
            .on_progress(move |update| {
                if update.stage == PipelineStage::Streaming && update.sub_stage.is_some() {
                    trigger.cancel();
                }
            })
            .build()
            .unwrap();

        let error = pipeline.run(&source()).unwrap_err();
        assert!(error.is_cancelled());
        assert!(config.staging_dir.join("dengue").is_dir());
        assert!(!config.output_path.exists());

        // the committed chunk can still be finalized, though it holds no zika rows
        let summary = Pipeline::builder()
            .config(config.clone())
            .build()
            .unwrap()
            .finalize()
            .unwrap();
        assert!(summary.statistic_reused);
        assert_eq!(summary.staged[&Label::Dengue], 4);
        assert_eq!(summary.rows_written, 0);
        assert_eq!(summary.warnings.len(), 1);
    }

    #[test]
    fn test_reuse_statistic_skips_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        let mut cached = GlobalStatistic::from_median(50.0);
        cached.source = source().fingerprint();
        cached.save(&config.staging_dir).unwrap();
        config.reuse_statistic = true;

        let summary = Pipeline::builder()
            .config(config)
            .build()
            .unwrap()
            .run(&source())
            .unwrap();

        assert!(summary.statistic_reused);
        assert_eq!(summary.median_age, 50.0);
    }

    #[test]
    fn test_statistic_of_another_source_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.reuse_statistic = true;

        // a completed run leaves no cache behind
        Pipeline::builder()
            .config(config.clone())
            .build()
            .unwrap()
            .run(&labelled_source(&["dengue", "zika", "chikungunya"], "80"))
            .unwrap();
        assert!(!config.staging_dir.join(STATISTIC_FILE).exists());

        // nor does a cache from a different table apply
        let mut other = GlobalStatistic::from_median(80.0);
        other.source = labelled_source(&["dengue"], "80").fingerprint();
        other.save(&config.staging_dir).unwrap();

        let summary = Pipeline::builder()
            .config(config)
            .build()
            .unwrap()
            .run(&labelled_source(&["dengue", "zika", "chikungunya"], "5"))
            .unwrap();

        assert!(!summary.statistic_reused);
        assert_eq!(summary.median_age, 5.0);
    }

    #[test]
    fn test_new_run_truncates_areas_of_interrupted_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        // first run stages zika and chikungunya rows, then stops
        let first = labelled_source(
            &["zika", "zika", "chikungunya", "chikungunya", "dengue", "dengue"],
            "99",
        );
        let error = cancelling_pipeline(&config).run(&first).unwrap_err();
        assert!(error.is_cancelled());
        let left_over = StagingStore::open_existing(config.staging_dir.clone()).unwrap();
        assert_eq!(left_over.counts()[&Label::Zika], 2);

        // second run stages only dengue before it stops too
        let second = labelled_source(
            &["dengue", "dengue", "dengue", "dengue", "zika", "chikungunya"],
            "11",
        );
        let error = cancelling_pipeline(&config).run(&second).unwrap_err();
        assert!(error.is_cancelled());

        let summary = Pipeline::builder()
            .config(config.clone())
            .build()
            .unwrap()
            .finalize()
            .unwrap();
        assert_eq!(summary.staged[&Label::Zika], 0);
        assert_eq!(summary.staged[&Label::Chikungunya], 0);
        assert_eq!(summary.staged[&Label::Dengue], 4);
        assert_eq!(summary.median_age, 11.0);
        assert_eq!(summary.rows_written, 0);
    }

    #[test]
    fn test_cleanup_removes_staging_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let pipeline = Pipeline::builder().config(config.clone()).build().unwrap();

        GlobalStatistic::from_median(30.0)
            .save(&config.staging_dir)
            .unwrap();
        fs::create_dir_all(config.staging_dir.join("zika")).unwrap();

        pipeline.cleanup().unwrap();
        assert!(!config.staging_dir.exists());

        // nothing left to remove
        pipeline.cleanup().unwrap();
    }

    #[test]
    fn test_diagnose_counts_labels() {
        let pipeline = Pipeline::builder().build().unwrap();
        let diagnosis = pipeline.diagnose(&source()).unwrap();
        assert_eq!(diagnosis.total_rows, 9);
        assert_eq!(diagnosis.rows_per_label["zika"], 2);
    }
}
