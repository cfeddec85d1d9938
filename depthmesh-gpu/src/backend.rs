//! Compute back-ends for the chunk kernel
//!
//! The kernel turns one chunk of scan records into chunk-local mesh
//! buffers. Positions are copied through, normals are normalized with a
//! face-normal fallback, confidences are clamped to `[0, 1]` and indices
//! are emitted sequentially from zero. The processor adds each chunk's
//! vertex offset when merging.

use depthmesh_core::{Point3f, Result, ScanVertex, Vector3f};
use rayon::prelude::*;

use crate::buffers::Chunk;

/// Chunk-local kernel output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkOutput {
    pub positions: Vec<Point3f>,
    pub normals: Vec<Vector3f>,
    pub confidences: Vec<f32>,
    /// Sequential, starting at zero for every chunk
    pub indices: Vec<u32>,
}

impl ChunkOutput {
    pub fn with_capacity(vertices: usize) -> Self {
        Self {
            positions: Vec::with_capacity(vertices),
            normals: Vec::with_capacity(vertices),
            confidences: Vec::with_capacity(vertices),
            indices: Vec::with_capacity(vertices),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.normals.clear();
        self.confidences.clear();
        self.indices.clear();
    }
}

/// A device that can run the chunk kernel.
///
/// Buffers are created per chunk, immediately before dispatch, and handed
/// back through [`ComputeBackend::release`] when the owning scope ends.
pub trait ComputeBackend: Send + Sync {
    /// Device-side resources for one chunk
    type Buffers: Send;

    fn name(&self) -> &str;

    /// Number of chunks this device can work on at once
    fn queue_count(&self) -> usize;

    /// Create the buffers needed to process `chunk`
    fn create_buffers(&self, chunk: &Chunk) -> Result<Self::Buffers>;

    /// Run the kernel over `records` and copy the results out. Blocks
    /// until the device has finished.
    fn dispatch(&self, buffers: &mut Self::Buffers, records: &[ScanVertex]) -> Result<ChunkOutput>;

    /// Return a chunk's buffers to the device
    fn release(&self, buffers: Self::Buffers) {
        drop(buffers);
    }
}

fn is_finite(v: &Vector3f) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// Unit normal of a triangle, `+Z` when it has no usable area
pub fn triangle_normal(p0: &Point3f, p1: &Point3f, p2: &Point3f) -> Vector3f {
    let cross = (p1 - p0).cross(&(p2 - p0));
    if !is_finite(&cross) {
        return Vector3f::z();
    }
    cross.try_normalize(f32::EPSILON).unwrap_or_else(Vector3f::z)
}

/// Kernel output for one triangle of records
pub fn process_triangle(records: &[ScanVertex; 3]) -> [(Point3f, Vector3f, f32); 3] {
    let p = records.map(|r| r.position());
    let face = triangle_normal(&p[0], &p[1], &p[2]);

    let mut out = [(Point3f::origin(), Vector3f::z(), 0.0f32); 3];
    for (k, record) in records.iter().enumerate() {
        let n = record.normal();
        let normal = if is_finite(&n) {
            n.try_normalize(f32::EPSILON).unwrap_or(face)
        } else {
            face
        };
        let confidence = if record.confidence.is_nan() {
            0.0
        } else {
            record.confidence.clamp(0.0, 1.0)
        };
        out[k] = (p[k], normal, confidence);
    }
    out
}

/// Run the chunk kernel on the CPU, one triangle per work item
pub fn process_records(records: &[ScanVertex], output: &mut ChunkOutput) {
    let triangles: Vec<[(Point3f, Vector3f, f32); 3]> = records
        .par_chunks_exact(3)
        .map(|t| process_triangle(&[t[0], t[1], t[2]]))
        .collect();

    output.clear();
    for (position, normal, confidence) in triangles.into_iter().flatten() {
        output.indices.push(output.positions.len() as u32);
        output.positions.push(position);
        output.normals.push(normal);
        output.confidences.push(confidence);
    }
}

/// Output storage reused across one chunk's dispatch
#[derive(Debug, Default)]
pub struct CpuBuffers {
    output: ChunkOutput,
}

/// Rayon-backed reference back-end
#[derive(Debug, Clone)]
pub struct CpuBackend {
    queues: usize,
}

impl CpuBackend {
    /// Back-end with one queue per available core
    pub fn new() -> Self {
        Self {
            queues: rayon::current_num_threads().max(1),
        }
    }

    /// Back-end advertising a fixed number of queues
    pub fn with_queues(queues: usize) -> Self {
        Self {
            queues: queues.max(1),
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    type Buffers = CpuBuffers;

    fn name(&self) -> &str {
        "cpu"
    }

    fn queue_count(&self) -> usize {
        self.queues
    }

    fn create_buffers(&self, chunk: &Chunk) -> Result<CpuBuffers> {
        Ok(CpuBuffers {
            output: ChunkOutput::with_capacity(chunk.vertex_count),
        })
    }

    fn dispatch(&self, buffers: &mut CpuBuffers, records: &[ScanVertex]) -> Result<ChunkOutput> {
        process_records(records, &mut buffers.output);
        Ok(std::mem::take(&mut buffers.output))
    }
}
