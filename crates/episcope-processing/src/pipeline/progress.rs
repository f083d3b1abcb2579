//! Progress reporting and cancellation support for the cleaning pipeline.
//!
//! This module provides types for tracking pipeline progress and supporting
//! cancellation from other threads (e.g., a job runner's shutdown hook).
//!
//! # Example
//!
//! ```rust,ignore
//! use episcope_processing::{Pipeline, CancellationToken};
//!
//! let token = CancellationToken::new();
//! let token_clone = token.clone();
//!
//! // In another thread
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(5));
//!     token_clone.cancel();
//! });
//!
//! let summary = Pipeline::builder()
//!     .cancellation_token(token)
//!     .on_progress(|update| {
//!         println!("[{:?}] {}", update.stage, update.message);
//!     })
//!     .build()?
//!     .run(&source);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stages of the cleaning pipeline.
///
/// Each stage represents a major phase of a run. Progress updates include
/// both the current stage and optional sub-stage information (e.g. the
/// chunk being streamed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Pipeline is initializing
    Initializing,
    /// Computing the median age over the whole source
    Statistics,
    /// Normalizing chunks into the staging areas
    Streaming,
    /// Drawing equal-size samples from the staging areas
    Sampling,
    /// Shuffling and writing the balanced dataset
    Assembling,
    /// Removing the staging areas
    Cleanup,
    /// Pipeline completed successfully
    Complete,
    /// Pipeline was cancelled
    Cancelled,
    /// Pipeline failed with an error
    Failed,
}

impl PipelineStage {
    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::Statistics => "Computing Statistics",
            Self::Streaming => "Streaming Chunks",
            Self::Sampling => "Balancing Classes",
            Self::Assembling => "Writing Dataset",
            Self::Cleanup => "Cleaning Up",
            Self::Complete => "Complete",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }

    /// Returns the typical weight of this stage in the overall pipeline (0.0 - 1.0).
    ///
    /// The two passes over the source dominate a run.
    pub fn weight(&self) -> f32 {
        match self {
            Self::Initializing => 0.02,
            Self::Statistics => 0.18,
            Self::Streaming => 0.60,
            Self::Sampling => 0.08,
            Self::Assembling => 0.10,
            Self::Cleanup => 0.02,
            Self::Complete => 0.0,
            Self::Cancelled => 0.0,
            Self::Failed => 0.0,
        }
    }

    /// Returns the cumulative progress at the start of this stage.
    pub fn base_progress(&self) -> f32 {
        match self {
            Self::Initializing => 0.0,
            Self::Statistics => 0.02,
            Self::Streaming => 0.20,
            Self::Sampling => 0.80,
            Self::Assembling => 0.88,
            Self::Cleanup => 0.98,
            Self::Complete => 1.0,
            Self::Cancelled => 0.0,
            Self::Failed => 0.0,
        }
    }
}

/// Detailed progress update with sub-stage information.
///
/// This struct provides comprehensive progress information including:
/// - Current pipeline stage
/// - Optional sub-stage for granular tracking (e.g., "Chunk 3")
/// - Overall and stage-specific progress percentages
/// - Human-readable message
/// - Item counts for iterative operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Current pipeline stage
    pub stage: PipelineStage,

    /// Optional sub-stage description (e.g., "Chunk 3")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_stage: Option<String>,

    /// Overall progress (0.0 - 1.0)
    pub progress: f32,

    /// Progress within current stage (0.0 - 1.0)
    pub stage_progress: f32,

    /// Human-readable message describing current activity
    pub message: String,

    /// Number of items processed in current stage (for iterative operations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_processed: Option<usize>,

    /// Total items in current stage (for iterative operations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_total: Option<usize>,
}

impl ProgressUpdate {
    /// Creates a new progress update for a stage without sub-stage info.
    pub fn new(stage: PipelineStage, stage_progress: f32, message: impl Into<String>) -> Self {
        let progress = stage.base_progress() + (stage.weight() * stage_progress);
        Self {
            stage,
            sub_stage: None,
            progress: progress.clamp(0.0, 1.0),
            stage_progress: stage_progress.clamp(0.0, 1.0),
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Creates a new progress update with sub-stage information.
    pub fn with_sub_stage(
        stage: PipelineStage,
        sub_stage: impl Into<String>,
        stage_progress: f32,
        message: impl Into<String>,
    ) -> Self {
        let progress = stage.base_progress() + (stage.weight() * stage_progress);
        Self {
            stage,
            sub_stage: Some(sub_stage.into()),
            progress: progress.clamp(0.0, 1.0),
            stage_progress: stage_progress.clamp(0.0, 1.0),
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Creates a new progress update with item counts.
    pub fn with_items(
        stage: PipelineStage,
        sub_stage: impl Into<String>,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Self {
        let stage_progress = if total > 0 {
            current as f32 / total as f32
        } else {
            0.0
        };
        let progress = stage.base_progress() + (stage.weight() * stage_progress);
        Self {
            stage,
            sub_stage: Some(sub_stage.into()),
            progress: progress.clamp(0.0, 1.0),
            stage_progress: stage_progress.clamp(0.0, 1.0),
            message: message.into(),
            items_processed: Some(current),
            items_total: Some(total),
        }
    }

    /// Creates a completion progress update.
    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            stage: PipelineStage::Complete,
            sub_stage: None,
            progress: 1.0,
            stage_progress: 1.0,
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Creates a cancelled progress update.
    pub fn cancelled() -> Self {
        Self {
            stage: PipelineStage::Cancelled,
            sub_stage: None,
            progress: 0.0,
            stage_progress: 0.0,
            message: "Pipeline cancelled".to_string(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Creates a failed progress update.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            stage: PipelineStage::Failed,
            sub_stage: None,
            progress: 0.0,
            stage_progress: 0.0,
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }
}

/// Trait for receiving progress updates during a run.
///
/// Implementations must be `Send + Sync`; the pipeline may run on a worker
/// thread while updates are consumed elsewhere (a terminal, a job queue).
///
/// # Example
///
/// ```rust,ignore
/// use episcope_processing::{ProgressReporter, ProgressUpdate};
///
/// struct JsonLinesReporter;
///
/// impl ProgressReporter for JsonLinesReporter {
///     fn report(&self, update: ProgressUpdate) {
///         if let Ok(line) = serde_json::to_string(&update) {
///             eprintln!("{line}");
///         }
///     }
/// }
/// ```
pub trait ProgressReporter: Send + Sync {
    /// Called when progress is made.
    ///
    /// Streaming reports once per chunk. Implementations should not block.
    fn report(&self, update: ProgressUpdate);
}

/// Wrapper that implements [`ProgressReporter`] using a closure.
///
/// ```rust,ignore
/// Pipeline::builder()
///     .on_progress(|update| {
///         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
///     })
///     .build()?
///     .run(&source);
/// ```
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

/// Token for cancelling a running pipeline.
///
/// Clones share one atomic flag. The pipeline checks the token before each
/// stage and between chunks, and returns
/// [`CleaningError::Cancelled`](crate::error::CleaningError::Cancelled) once
/// it is set. Staging parts committed before that point stay on disk.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);
static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Safe to call from any thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether this token or any of its clones was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can drive another run.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_cancellation_token_shared_between_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());

        token.cancel();
        assert!(other.is_cancelled());

        other.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_progress_update_position_within_stage() {
        let update = ProgressUpdate::new(PipelineStage::Streaming, 0.5, "Streaming");
        assert_eq!(update.stage, PipelineStage::Streaming);
        assert!(update.sub_stage.is_none());
        assert!((update.progress - 0.50).abs() < 1e-6);
    }

    #[test]
    fn test_progress_update_with_items() {
        let update =
            ProgressUpdate::with_items(PipelineStage::Streaming, "Chunk 2", 2, 4, "Chunk 2 staged");
        assert_eq!(update.sub_stage.as_deref(), Some("Chunk 2"));
        assert_eq!(update.stage_progress, 0.5);
        assert_eq!(update.items_processed, Some(2));
        assert_eq!(update.items_total, Some(4));
    }

    #[test]
    fn test_progress_update_with_zero_total() {
        let update = ProgressUpdate::with_items(PipelineStage::Sampling, "dengue", 0, 0, "");
        assert_eq!(update.stage_progress, 0.0);
    }

    #[test]
    fn test_terminal_updates() {
        assert_eq!(ProgressUpdate::complete("Done").progress, 1.0);
        assert_eq!(ProgressUpdate::cancelled().stage, PipelineStage::Cancelled);
        assert_eq!(ProgressUpdate::failed("boom").message, "boom");
    }

    #[test]
    fn test_closure_progress_reporter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let reporter = ClosureProgressReporter::new(move |_update| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        reporter.report(ProgressUpdate::new(PipelineStage::Statistics, 0.0, "Scanning"));
        reporter.report(ProgressUpdate::complete("Done"));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stage_weights_sum_to_one() {
        let stages = [
            PipelineStage::Initializing,
            PipelineStage::Statistics,
            PipelineStage::Streaming,
            PipelineStage::Sampling,
            PipelineStage::Assembling,
            PipelineStage::Cleanup,
        ];
        let total: f32 = stages.iter().map(|s| s.weight()).sum();
        assert!((total - 1.0).abs() < 0.01);

        for pair in stages.windows(2) {
            let expected = pair[0].base_progress() + pair[0].weight();
            assert!((pair[1].base_progress() - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_stage_json_values() {
        let expectations = [
            (PipelineStage::Statistics, "\"statistics\""),
            (PipelineStage::Streaming, "\"streaming\""),
            (PipelineStage::Assembling, "\"assembling\""),
            (PipelineStage::Cancelled, "\"cancelled\""),
        ];
        for (stage, expected) in expectations {
            assert_eq!(serde_json::to_string(&stage).unwrap(), expected);
        }
    }

    #[test]
    fn test_progress_update_json_round_trip() {
        let update =
            ProgressUpdate::with_items(PipelineStage::Sampling, "zika", 1, 3, "Sampling zika");
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"stage\":\"sampling\""));
        assert!(json.contains("\"items_total\":3"));

        let back: ProgressUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sub_stage.as_deref(), Some("zika"));
    }

    #[test]
    fn test_cancellation_across_threads() {
        let token = CancellationToken::new();
        let worker_token = token.clone();
        token.cancel();

        let seen = std::thread::spawn(move || worker_token.is_cancelled())
            .join()
            .unwrap();
        assert!(seen);
    }
}
