//! Chunk planning and scoped buffer allocation
//!
//! Serialized scans larger than the chunk budget are split into
//! triangle-aligned chunks that are processed one buffer set at a time.
//! Every allocation is preceded by a memory preflight against a
//! [`MemoryProbe`], and buffers live in a [`ChunkScope`] that returns them
//! to the back-end when dropped, on success and failure alike.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use depthmesh_core::{Error, Result, ScanVertex, SCAN_TRIANGLE_STRIDE, SCAN_VERTEX_STRIDE};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{ChunkOutput, ComputeBackend};

/// Default chunk budget, 100 MiB
pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 100 * 1024 * 1024;

/// Source of the currently available memory figure
pub trait MemoryProbe: Send + Sync {
    /// Bytes the process may still allocate
    fn available_bytes(&self) -> u64;
}

impl<F> MemoryProbe for F
where
    F: Fn() -> u64 + Send + Sync,
{
    fn available_bytes(&self) -> u64 {
        self()
    }
}

/// Fixed memory allowance, for devices with a known budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    bytes: u64,
}

impl MemoryBudget {
    pub fn new(bytes: u64) -> Self {
        Self { bytes }
    }

    /// An allowance large enough never to fail a preflight
    pub fn unlimited() -> Self {
        Self { bytes: u64::MAX }
    }
}

impl MemoryProbe for MemoryBudget {
    fn available_bytes(&self) -> u64 {
        self.bytes
    }
}

/// Configuration for [`BufferManager`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Upper bound on the serialized bytes handled per chunk
    pub max_chunk_bytes: u64,
    /// Memory required per chunk byte, covering vertex, normal and index
    /// buffers
    pub memory_multiplier: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            memory_multiplier: 3,
        }
    }
}

impl BufferConfig {
    pub fn with_max_chunk_bytes(mut self, bytes: u64) -> Self {
        self.max_chunk_bytes = bytes;
        self
    }

    pub fn with_memory_multiplier(mut self, multiplier: u64) -> Self {
        self.memory_multiplier = multiplier;
        self
    }
}

/// One contiguous, triangle-aligned slice of the serialized input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the plan; merge order follows it
    pub index: usize,
    pub byte_offset: usize,
    pub byte_len: usize,
    /// Index of this chunk's first vertex in the merged mesh
    pub vertex_offset: u32,
    pub vertex_count: usize,
}

impl Chunk {
    pub fn byte_range(&self) -> Range<usize> {
        self.byte_offset..self.byte_offset + self.byte_len
    }

    pub fn triangle_count(&self) -> usize {
        self.vertex_count / 3
    }
}

/// Sequential split of an input into chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    chunks: Vec<Chunk>,
    total_bytes: usize,
}

impl ChunkPlan {
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn total_vertices(&self) -> usize {
        self.total_bytes / SCAN_VERTEX_STRIDE
    }

    /// Size of the biggest chunk, which bounds the preflight requirement
    pub fn largest_chunk_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.byte_len).max().unwrap_or(0)
    }
}

/// Split `byte_size` bytes of scan records into chunks of at most
/// `max_chunk_bytes`, each holding whole triangles.
///
/// # Arguments
/// * `byte_size` - Length of the serialized input
/// * `max_chunk_bytes` - Chunk budget, at least one triangle record
///
/// # Returns
/// * `Result<ChunkPlan>` - A single chunk when the input fits the budget
pub fn plan_chunks(byte_size: usize, max_chunk_bytes: u64) -> Result<ChunkPlan> {
    if byte_size == 0 {
        return Err(Error::InvalidInputData("scan data is empty".to_string()));
    }
    if byte_size % SCAN_TRIANGLE_STRIDE != 0 {
        return Err(Error::InvalidInputData(format!(
            "{} bytes is not a whole number of {}-byte triangle records",
            byte_size, SCAN_TRIANGLE_STRIDE
        )));
    }
    let total_vertices = byte_size / SCAN_VERTEX_STRIDE;
    if u32::try_from(total_vertices).is_err() {
        return Err(Error::InvalidInputData(format!(
            "{} vertices exceed the 32-bit index range",
            total_vertices
        )));
    }

    let budget = usize::try_from(max_chunk_bytes).unwrap_or(usize::MAX);
    let chunk_bytes = budget - budget % SCAN_TRIANGLE_STRIDE;
    if chunk_bytes == 0 {
        return Err(Error::InvalidInputData(format!(
            "chunk budget of {} bytes cannot hold one {}-byte triangle",
            max_chunk_bytes, SCAN_TRIANGLE_STRIDE
        )));
    }

    let mut chunks = Vec::with_capacity(byte_size.div_ceil(chunk_bytes));
    let mut byte_offset = 0usize;
    while byte_offset < byte_size {
        let byte_len = chunk_bytes.min(byte_size - byte_offset);
        chunks.push(Chunk {
            index: chunks.len(),
            byte_offset,
            byte_len,
            vertex_offset: (byte_offset / SCAN_VERTEX_STRIDE) as u32,
            vertex_count: byte_len / SCAN_VERTEX_STRIDE,
        });
        byte_offset += byte_len;
    }

    debug!(byte_size, chunk_bytes, chunks = chunks.len(), "planned chunks");
    Ok(ChunkPlan {
        chunks,
        total_bytes: byte_size,
    })
}

#[derive(Debug, Default)]
struct Accounting {
    in_use: AtomicU64,
    peak: AtomicU64,
}

impl Accounting {
    fn reserve(&self, bytes: u64) {
        let now = self.in_use.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn release(&self, bytes: u64) {
        self.in_use.fetch_sub(bytes, Ordering::SeqCst);
    }
}

/// Plans chunks, checks memory and hands out scoped buffer sets
pub struct BufferManager {
    config: BufferConfig,
    probe: Arc<dyn MemoryProbe>,
    accounting: Arc<Accounting>,
    /// Serializes preflight and reservation
    gate: Mutex<()>,
}

impl BufferManager {
    pub fn new(config: BufferConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            config,
            probe,
            accounting: Arc::new(Accounting::default()),
            gate: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Plan `byte_size` bytes against the configured chunk budget
    pub fn plan(&self, byte_size: usize) -> Result<ChunkPlan> {
        plan_chunks(byte_size, self.config.max_chunk_bytes)
    }

    /// Memory needed to process a chunk of `chunk_bytes`
    pub fn required_bytes(&self, chunk_bytes: u64) -> u64 {
        chunk_bytes.saturating_mul(self.config.memory_multiplier)
    }

    /// Available memory after subtracting live reservations
    pub fn available_bytes(&self) -> u64 {
        self.probe
            .available_bytes()
            .saturating_sub(self.accounting.in_use.load(Ordering::SeqCst))
    }

    /// Check that a chunk of `chunk_bytes` could be allocated right now
    pub fn preflight(&self, chunk_bytes: u64) -> Result<()> {
        let required = self.required_bytes(chunk_bytes);
        let available = self.available_bytes();
        if available < required {
            warn!(available, required, "memory preflight failed");
            return Err(Error::InsufficientMemory {
                available,
                required,
            });
        }
        Ok(())
    }

    /// How many chunks of up to `chunk_bytes` can hold buffers at once,
    /// between 1 and `max_lanes`.
    ///
    /// Fails like [`preflight`](Self::preflight) when not even one fits.
    pub fn concurrent_chunks(&self, chunk_bytes: u64, max_lanes: usize) -> Result<usize> {
        self.preflight(chunk_bytes)?;
        let required = self.required_bytes(chunk_bytes).max(1);
        let fits = (self.available_bytes() / required).min(max_lanes as u64) as usize;
        Ok(fits.max(1))
    }

    /// Reserve memory for `chunk` and create its buffers on `backend`.
    ///
    /// The reservation is returned if buffer creation fails; otherwise it
    /// is held by the returned scope until the scope is dropped.
    pub fn allocate<'a, B: ComputeBackend>(
        &self,
        backend: &'a B,
        chunk: &Chunk,
    ) -> Result<ChunkScope<'a, B>> {
        let reserved = {
            let _gate = self.gate.lock();
            self.preflight(chunk.byte_len as u64)?;
            let reserved = self.required_bytes(chunk.byte_len as u64);
            self.accounting.reserve(reserved);
            reserved
        };

        match backend.create_buffers(chunk) {
            Ok(buffers) => {
                debug!(chunk = chunk.index, reserved, backend = backend.name(), "allocated chunk buffers");
                Ok(ChunkScope {
                    backend,
                    buffers: Some(buffers),
                    chunk: *chunk,
                    reserved,
                    accounting: Arc::clone(&self.accounting),
                })
            }
            Err(e) => {
                self.accounting.release(reserved);
                Err(e)
            }
        }
    }

    /// Bytes currently reserved by live chunk scopes
    pub fn in_use_bytes(&self) -> u64 {
        self.accounting.in_use.load(Ordering::SeqCst)
    }

    /// Highest reservation total observed since creation or the last reset
    pub fn peak_bytes(&self) -> u64 {
        self.accounting.peak.load(Ordering::SeqCst)
    }

    pub fn reset_peak(&self) {
        self.accounting
            .peak
            .store(self.in_use_bytes(), Ordering::SeqCst);
    }
}

/// Buffers for one chunk, released back to the back-end on drop
pub struct ChunkScope<'a, B: ComputeBackend> {
    backend: &'a B,
    buffers: Option<B::Buffers>,
    chunk: Chunk,
    reserved: u64,
    accounting: Arc<Accounting>,
}

impl<'a, B: ComputeBackend> ChunkScope<'a, B> {
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn reserved_bytes(&self) -> u64 {
        self.reserved
    }

    /// Run the chunk kernel over this chunk's records
    pub fn dispatch(&mut self, records: &[ScanVertex]) -> Result<ChunkOutput> {
        if records.len() != self.chunk.vertex_count {
            return Err(Error::InvalidInputData(format!(
                "chunk {} expects {} records, got {}",
                self.chunk.index,
                self.chunk.vertex_count,
                records.len()
            )));
        }
        match self.buffers.as_mut() {
            Some(buffers) => self.backend.dispatch(buffers, records),
            None => Err(Error::CommandEncodingFailed(format!(
                "chunk {} buffers already released",
                self.chunk.index
            ))),
        }
    }
}

impl<'a, B: ComputeBackend> Drop for ChunkScope<'a, B> {
    fn drop(&mut self) {
        if let Some(buffers) = self.buffers.take() {
            self.backend.release(buffers);
        }
        self.accounting.release(self.reserved);
        debug!(chunk = self.chunk.index, released = self.reserved, "released chunk buffers");
    }
}
