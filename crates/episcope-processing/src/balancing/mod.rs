//! Class balancing and final assembly.
//!
//! This module provides:
//! - Undersampling of every staged class to the smallest class size
//! - Concatenation, shuffling and atomic persistence of the result

mod assembler;
mod sampler;

pub use assembler::FinalAssembler;
pub use sampler::{BalancedSample, BalancedSampler};
