//! Whole-source profiling passes.
//!
//! This module provides:
//! - The global statistics pass (median age) that must finish before streaming
//! - A per-disease field coverage diagnosis of the raw source

mod diagnosis;
mod statistics;

pub use diagnosis::SourceDiagnosis;
pub use statistics::{GlobalStatistic, STATISTIC_FILE};
