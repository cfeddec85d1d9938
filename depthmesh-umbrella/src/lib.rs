//! # depthmesh
//!
//! Bounded-memory point-cloud-to-mesh processing for depth-sensor scans.
//!
//! This is the umbrella crate that provides convenient access to all depthmesh
//! functionality. You can use this crate to get everything in one place, or use
//! individual crates for more granular control over dependencies.
//!
//! ## Features
//!
//! - **Core**: Scan records, point clouds, meshes, quality tiers and errors
//! - **Algorithms**: Point accumulation and mesh quality validation
//! - **Simplification**: Quadric error metric decimation
//! - **GPU**: Chunk planning, buffer scopes and compute back-ends
//! - **Pipeline**: The `MeshProcessor` entry point and its cache
//!
//! ## Quick Start
//!
//! ```rust
//! use depthmesh::prelude::*;
//!
//! let mut accumulator = PointCloudAccumulator::new();
//! let points = vec![
//!     Point3f::new(0.0, 0.0, 0.0),
//!     Point3f::new(0.1, 0.0, 0.0),
//!     Point3f::new(0.0, 0.1, 0.0),
//! ];
//! let acceptable = accumulator.accumulate(&points, &[0.9, 0.9, 0.9]).unwrap();
//! assert!(!acceptable);
//! assert_eq!(accumulator.len(), 3);
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: Enables algorithms, simplification and pipeline
//! - `algorithms`: Accumulation and quality validation
//! - `simplification`: Mesh decimation
//! - `gpu`: Chunked compute back-ends
//! - `pipeline`: Whole-scan processing (implies the three above)
//! - `all`: Enables all features

// Re-export core functionality
pub use depthmesh_core::*;

// Re-export sub-crates
#[cfg(feature = "algorithms")]
pub use depthmesh_algorithms as algorithms;

#[cfg(feature = "simplification")]
pub use depthmesh_simplification as simplification;

#[cfg(feature = "gpu")]
pub use depthmesh_gpu as gpu;

#[cfg(feature = "pipeline")]
pub use depthmesh_pipeline as pipeline;

/// Convenient imports for common use cases
pub mod prelude {
    pub use depthmesh_core::*;

    #[cfg(feature = "algorithms")]
    pub use depthmesh_algorithms::*;

    #[cfg(feature = "simplification")]
    pub use depthmesh_simplification::*;

    #[cfg(feature = "gpu")]
    pub use depthmesh_gpu::*;

    #[cfg(feature = "pipeline")]
    pub use depthmesh_pipeline::*;
}
