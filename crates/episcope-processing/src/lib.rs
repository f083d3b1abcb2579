//! Arbovirus Case Cleaning Library
//!
//! Turns raw dengue, zika and chikungunya case notifications, far larger than
//! memory, into an exactly class-balanced, shuffled feature table for
//! classifier training.
//!
//! # Overview
//!
//! A run has two phases over the raw source:
//!
//! - **Statistics pass**: the median age over the whole source, computed once
//!   before any row is cleaned
//! - **Streaming pass**: bounded chunks are normalized (symptoms to 0/1, sex
//!   codes, age imputation, label lookup) and appended to one staging area
//!   per disease
//!
//! followed by:
//!
//! - **Balanced sampling**: every class is undersampled to the smallest one
//! - **Final assembly**: concatenate, shuffle, write atomically, drop staging
//! - **Progress Reporting**: per-stage and per-chunk updates with cancellation
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use episcope_processing::{CsvSource, Pipeline, PipelineConfig};
//!
//! let source = CsvSource::open("data/arboviroses_cases.csv")?;
//!
//! let config = PipelineConfig::builder()
//!     .chunk_size(100_000)
//!     .seed(42)
//!     .output_path("output/cleaned_arboviroses_cases.csv")
//!     .build()?;
//!
//! let summary = Pipeline::builder()
//!     .config(config)
//!     .on_progress(|update| {
//!         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
//!     })
//!     .build()?
//!     .run(&source)?;
//!
//! println!("{} rows per class", summary.min_count);
//! ```
//!
//! # Recovery
//!
//! Staging areas survive cancellation and a failed final write. Call
//! [`Pipeline::finalize`] to sample and write again from what is staged, or
//! [`Pipeline::cleanup`] to drop it. With `reuse_statistic` set, a new run
//! over the same, unchanged source takes the median cached by the interrupted
//! one instead of rescanning. A successful run removes staging and the cache.

pub mod balancing;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod profiler;
pub mod source;
pub mod staging;
pub mod types;
pub mod utils;

// Re-exports for convenient access
pub use balancing::{BalancedSample, BalancedSampler, FinalAssembler};
pub use cleaner::{DuplicateFilter, NormalizedChunk, RecordNormalizer};
pub use config::{ConfigValidationError, PipelineConfig, PipelineConfigBuilder};
pub use error::{CleaningError, Result as CleaningResult, ResultExt};
pub use pipeline::{
    CancellationToken, ClosureProgressReporter, Pipeline, PipelineBuilder, PipelineStage,
    ProgressReporter, ProgressUpdate, StreamProcessor, StreamStats,
};
pub use profiler::{GlobalStatistic, SourceDiagnosis};
pub use source::{ChunkIter, CsvSource, DataFrameSource, RawChunk, RawSource};
pub use staging::{ClassStagingArea, StagingStore};
pub use types::{Label, NormalizedRecord, RawRecord, RunSummary};
