//! # depthmesh algorithms
//!
//! Point-cloud and mesh analysis used around the processing pipeline:
//! incremental accumulation of depth samples with duplicate rejection and
//! a size cap, the spatial indices behind duplicate search, mesh quality
//! metrics with their tiers and hard minimums, and bilateral smoothing.

pub mod accumulator;
pub mod spatial;
pub mod quality;
pub mod smoothing;

// Re-export commonly used items
pub use accumulator::*;
pub use spatial::*;
pub use quality::*;
pub use smoothing::*;
