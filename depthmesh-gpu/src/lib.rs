//! # depthmesh GPU
//!
//! Chunked execution of the scan-record kernel under a memory budget.
//!
//! Serialized scans are split into triangle-aligned chunks by the
//! [`BufferManager`], which preflights available memory before every
//! allocation and releases each chunk's buffers when its [`ChunkScope`]
//! ends. The kernel itself runs on a [`ComputeBackend`]: [`CpuBackend`]
//! uses rayon, [`WgpuBackend`] runs a WGSL compute shader.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use depthmesh_gpu::{BufferConfig, BufferManager, CpuBackend, MemoryBudget};
//! use depthmesh_core::decode_scan_records;
//!
//! fn example(bytes: &[u8]) -> depthmesh_core::Result<()> {
//!     let manager = BufferManager::new(BufferConfig::default(), Arc::new(MemoryBudget::unlimited()));
//!     let backend = CpuBackend::new();
//!     let records = decode_scan_records(bytes)?;
//!     let plan = manager.plan(bytes.len())?;
//!     for chunk in plan.iter() {
//!         let start = chunk.vertex_offset as usize;
//!         let mut scope = manager.allocate(&backend, chunk)?;
//!         let output = scope.dispatch(&records[start..start + chunk.vertex_count])?;
//!         println!("chunk {} produced {} vertices", chunk.index, output.vertex_count());
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod buffers;
pub mod device;
pub mod wgpu_backend;

// Re-export commonly used items
pub use backend::{process_records, process_triangle, triangle_normal, ChunkOutput, ComputeBackend, CpuBackend, CpuBuffers};
pub use buffers::{
    plan_chunks, BufferConfig, BufferManager, Chunk, ChunkPlan, ChunkScope, MemoryBudget, MemoryProbe,
    DEFAULT_MAX_CHUNK_BYTES,
};
pub use device::GpuContext;
pub use wgpu_backend::{WgpuBackend, WgpuBuffers};
