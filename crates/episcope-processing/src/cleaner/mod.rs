//! Row-level cleaning for the streaming pass.
//!
//! This module provides:
//! - Normalization of raw notifications into the training feature vector
//! - Optional removal of repeated notifications

mod dedup;
mod normalizer;

pub use dedup::DuplicateFilter;
pub use normalizer::{
    NormalizedChunk, RecordNormalizer, empty_output_frame, encode_sex, encode_symptom, impute_age,
};
