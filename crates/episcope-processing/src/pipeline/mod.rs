//! Pipeline module.
//!
//! This module provides the cleaning pipeline, its streaming executor and
//! progress/cancellation plumbing.

mod builder;
mod executor;
pub mod progress;

pub use builder::{Pipeline, PipelineBuilder};
pub use executor::{StreamProcessor, StreamStats};
pub use progress::{
    CancellationToken, ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate,
};
