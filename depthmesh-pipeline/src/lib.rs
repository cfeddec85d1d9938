//! # depthmesh pipeline
//!
//! The scan-to-mesh entry point. [`MeshProcessor::process`] takes packed
//! scan records, runs them through the chunked kernel under a memory
//! budget, merges and welds the chunks, optionally decimates, classifies
//! and validates the result, and caches it by input [`Fingerprint`].
//!
//! Host services are consumed through the traits in [`collaborators`]:
//! performance monitoring, background task lifetime and compression.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use depthmesh_gpu::{CpuBackend, MemoryBudget};
//! use depthmesh_pipeline::{MeshProcessor, PerformanceBudget, ProcessorConfig};
//!
//! fn example(scan: &[u8]) -> depthmesh_core::Result<()> {
//!     let processor = MeshProcessor::new(
//!         CpuBackend::new(),
//!         Arc::new(MemoryBudget::new(512 * 1024 * 1024)),
//!         ProcessorConfig::default().with_target_reduction(0.5),
//!     )?
//!     .with_performance_monitor(Arc::new(PerformanceBudget::default()));
//!
//!     let mesh = processor.process(scan)?;
//!     println!("{} triangles, {} quality", mesh.triangle_count(), mesh.quality());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod collaborators;
pub mod config;
pub mod processor;
pub mod weld;

// Re-export commonly used items
pub use cache::{Fingerprint, ProcessedMeshCache};
pub use collaborators::{
    BackgroundTaskManager, BudgetViolation, CancellationToken, CompressionService, PerformanceBudget,
    PerformanceMonitor, PerformanceSample, TaskId,
};
pub use config::{ProcessorConfig, DEFAULT_CACHE_BUDGET_BYTES};
pub use processor::MeshProcessor;
pub use weld::weld_vertices;
