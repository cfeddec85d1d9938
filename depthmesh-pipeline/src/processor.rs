//! Whole-scan processing: chunked kernel dispatch, merge, decimation and
//! validation.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

use depthmesh_algorithms::{bilateral_smooth, QualityValidator};
use depthmesh_core::{decode_scan_records, Error, MeshData, ProcessedMesh, Result};
use depthmesh_gpu::{BufferManager, Chunk, ChunkOutput, ChunkPlan, ComputeBackend, MemoryProbe};
use depthmesh_simplification::DecimationEngine;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::cache::{Fingerprint, ProcessedMeshCache};
use crate::collaborators::{
    BackgroundTaskManager, CancellationToken, CompressionService, PerformanceMonitor, PerformanceSample, TaskGuard,
};
use crate::config::ProcessorConfig;
use crate::weld::weld_vertices;

/// Where each chunk's bytes come from during dispatch
enum ChunkSource<'a> {
    Raw(&'a [u8]),
    /// One compressed blob per planned chunk
    Compressed(Vec<Vec<u8>>),
}

/// Turns serialized scan records into validated, cached meshes.
///
/// Every collaborator is injected; a processor owns its back-end, buffer
/// manager and worker pool, and may share its cache with other processors.
pub struct MeshProcessor<B: ComputeBackend> {
    config: ProcessorConfig,
    backend: B,
    buffers: BufferManager,
    decimator: DecimationEngine,
    validator: QualityValidator,
    cache: Arc<ProcessedMeshCache>,
    pool: ThreadPool,
    /// Worker threads in `pool`, the most chunks ever in flight
    lanes: usize,
    monitor: Option<Arc<dyn PerformanceMonitor>>,
    tasks: Option<Arc<dyn BackgroundTaskManager>>,
    compression: Option<Arc<dyn CompressionService>>,
}

impl<B: ComputeBackend> MeshProcessor<B> {
    /// Create a processor dispatching to `backend`, checking memory
    /// against `probe`
    pub fn new(backend: B, probe: Arc<dyn MemoryProbe>, config: ProcessorConfig) -> Result<Self> {
        let cache = Arc::new(ProcessedMeshCache::new(config.cache_budget_bytes)?);
        let lanes = backend.queue_count().min(config.max_concurrent_chunks).max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(lanes)
            .thread_name(|index| format!("depthmesh-chunk-{}", index))
            .build()
            .map_err(|e| Error::ProcessingFailed {
                operation: "setup".to_string(),
                reason: format!("failed to create chunk pool: {}", e),
            })?;

        info!(backend = backend.name(), lanes, "mesh processor ready");
        Ok(Self {
            buffers: BufferManager::new(config.buffer.clone(), probe),
            decimator: DecimationEngine::with_config(config.decimation.clone()),
            validator: QualityValidator::with_config(config.quality.clone()),
            config,
            backend,
            cache,
            pool,
            lanes,
            monitor: None,
            tasks: None,
            compression: None,
        })
    }

    /// Share `cache` instead of the processor's own
    pub fn with_cache(mut self, cache: Arc<ProcessedMeshCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_performance_monitor(mut self, monitor: Arc<dyn PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_task_manager(mut self, tasks: Arc<dyn BackgroundTaskManager>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_compression(mut self, compression: Arc<dyn CompressionService>) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn buffer_manager(&self) -> &BufferManager {
        &self.buffers
    }

    pub fn cache(&self) -> &Arc<ProcessedMeshCache> {
        &self.cache
    }

    /// Cache key for `data` under this processor's output settings
    pub fn fingerprint(&self, data: &[u8]) -> Fingerprint {
        Fingerprint::of_with(data, self.config.output_digest())
    }

    /// Like [`process`](Self::process), after checking the companion
    /// photogrammetry feature count
    pub fn process_with_features(&self, data: &[u8], feature_count: usize) -> Result<Arc<ProcessedMesh>> {
        if feature_count < self.config.min_feature_count {
            return Err(Error::InsufficientFeatures {
                found: feature_count,
                required: self.config.min_feature_count,
            });
        }
        self.process(data)
    }

    /// Process serialized scan records into a validated mesh.
    ///
    /// # Arguments
    /// * `data` - Packed [`ScanVertex`](depthmesh_core::ScanVertex) records,
    ///   three per triangle
    ///
    /// # Returns
    /// * `Result<Arc<ProcessedMesh>>` - The cached mesh for identical input,
    ///   otherwise a freshly processed one. A mesh that fails the hard
    ///   minimums is returned inside [`Error::QualityInsufficient`].
    pub fn process(&self, data: &[u8]) -> Result<Arc<ProcessedMesh>> {
        let token = CancellationToken::new();
        let _task = TaskGuard::begin(self.tasks.as_deref(), "mesh processing", &token);
        self.process_inner(data, &token)
    }

    fn process_inner(&self, data: &[u8], token: &CancellationToken) -> Result<Arc<ProcessedMesh>> {
        let started = Instant::now();
        let fingerprint = self.fingerprint(data);
        if let Some(mesh) = self.cache.get(&fingerprint) {
            info!(fingerprint = fingerprint.value(), "returning cached mesh");
            return Ok(mesh);
        }

        let plan = self.buffers.plan(data.len())?;
        let lanes = self
            .buffers
            .concurrent_chunks(plan.largest_chunk_bytes() as u64, self.lanes)?;
        self.buffers.reset_peak();
        info!(
            bytes = data.len(),
            chunks = plan.len(),
            lanes,
            vertices = plan.total_vertices(),
            backend = self.backend.name(),
            "processing scan"
        );

        let source = self.stage(data, &plan)?;
        let outputs = self.dispatch_chunks(&plan, &source, lanes, token, started)?;
        drop(source);

        let mut mesh = merge_outputs(&plan, outputs);
        self.report("merge", started)?;

        if self.config.weld {
            mesh = weld_vertices(&mesh);
            self.report("weld", started)?;
        }

        if let Some(params) = &self.config.smoothing {
            mesh = bilateral_smooth(&mesh, params)?;
            self.report("smoothing", started)?;
        }

        if let Some(reduction) = self.config.target_reduction {
            mesh = self.decimator.decimate_mesh(&mesh, reduction)?;
            self.report("decimation", started)?;
        }

        let quality = self.validator.classify_mesh(&mesh);
        let processed = Arc::new(ProcessedMesh::new(mesh, quality));
        let validation = self.validator.validate(&processed);
        self.report("validation", started)?;

        if let Err(reason) = validation {
            return Err(Error::QualityInsufficient {
                reason,
                mesh: Some(processed),
            });
        }

        self.cache
            .set(fingerprint, Arc::clone(&processed), processed.size_bytes());
        info!(
            vertices = processed.vertex_count(),
            triangles = processed.triangle_count(),
            %quality,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan processed"
        );
        Ok(processed)
    }

    /// Compress oversized inputs chunk by chunk when a codec is installed
    fn stage<'a>(&self, data: &'a [u8], plan: &ChunkPlan) -> Result<ChunkSource<'a>> {
        match &self.compression {
            Some(codec) if plan.len() > 1 => {
                let blobs = plan
                    .iter()
                    .map(|chunk| codec.compress(&data[chunk.byte_range()]))
                    .collect::<Result<Vec<_>>>()?;
                debug!(
                    raw = data.len(),
                    staged = blobs.iter().map(Vec::len).sum::<usize>(),
                    "staged compressed chunks"
                );
                Ok(ChunkSource::Compressed(blobs))
            }
            _ => Ok(ChunkSource::Raw(data)),
        }
    }

    fn chunk_bytes<'a>(&self, source: &'a ChunkSource<'_>, chunk: &Chunk) -> Result<Cow<'a, [u8]>> {
        match source {
            ChunkSource::Raw(data) => Ok(Cow::Borrowed(&data[chunk.byte_range()])),
            ChunkSource::Compressed(blobs) => {
                let codec = self.compression.as_ref().ok_or_else(|| Error::ProcessingFailed {
                    operation: format!("chunk {}", chunk.index),
                    reason: "compression service was removed".to_string(),
                })?;
                let bytes = codec.decompress(&blobs[chunk.index], chunk.byte_len)?;
                if bytes.len() != chunk.byte_len {
                    return Err(Error::InvalidInputData(format!(
                        "chunk {} decompressed to {} bytes, expected {}",
                        chunk.index,
                        bytes.len(),
                        chunk.byte_len
                    )));
                }
                Ok(Cow::Owned(bytes))
            }
        }
    }

    /// Run every chunk on the worker pool, at most `lanes` at a time.
    /// Results come back in plan order whatever order chunks finish in.
    fn dispatch_chunks(
        &self,
        plan: &ChunkPlan,
        source: &ChunkSource<'_>,
        lanes: usize,
        token: &CancellationToken,
        started: Instant,
    ) -> Result<Vec<ChunkOutput>> {
        if lanes < self.lanes {
            debug!(lanes, pool = self.lanes, "available memory limits chunk concurrency");
        }
        let mut outputs = Vec::with_capacity(plan.len());
        for wave in plan.chunks().chunks(lanes.max(1)) {
            let finished = self.pool.install(|| {
                wave.par_iter()
                    .map(|chunk| self.run_chunk(chunk, source, token, started))
                    .collect::<Result<Vec<_>>>()
            })?;
            outputs.extend(finished);
        }
        Ok(outputs)
    }

    fn run_chunk(
        &self,
        chunk: &Chunk,
        source: &ChunkSource<'_>,
        token: &CancellationToken,
        started: Instant,
    ) -> Result<ChunkOutput> {
        if token.is_cancelled() {
            warn!(chunk = chunk.index, "cancelled before chunk submission");
            return Err(Error::Cancelled);
        }

        let bytes = self.chunk_bytes(source, chunk)?;
        let records = decode_scan_records(&bytes)?;
        drop(bytes);

        let output = {
            let mut scope = self.buffers.allocate(&self.backend, chunk)?;
            scope.dispatch(&records)?
        };
        debug!(chunk = chunk.index, vertices = output.vertex_count(), "chunk complete");

        self.report(&format!("chunk {}", chunk.index), started)?;
        Ok(output)
    }

    fn report(&self, operation: &str, started: Instant) -> Result<()> {
        let Some(monitor) = &self.monitor else {
            return Ok(());
        };
        let sample = PerformanceSample {
            operation: operation.to_string(),
            elapsed: started.elapsed(),
            peak_memory_bytes: self.buffers.peak_bytes(),
        };
        monitor.report(&sample).map_err(|violation| {
            warn!(operation, %violation, "performance budget exceeded");
            Error::ProcessingFailed {
                operation: operation.to_string(),
                reason: violation.to_string(),
            }
        })
    }
}

/// Concatenate chunk outputs in plan order, shifting each chunk's local
/// indices by its vertex offset
fn merge_outputs(plan: &ChunkPlan, outputs: Vec<ChunkOutput>) -> MeshData {
    let total = plan.total_vertices();
    let mut vertices = Vec::with_capacity(total);
    let mut normals = Vec::with_capacity(total);
    let mut confidences = Vec::with_capacity(total);
    let mut indices = Vec::with_capacity(total);

    for (chunk, output) in plan.iter().zip(outputs) {
        indices.extend(output.indices.iter().map(|i| i + chunk.vertex_offset));
        vertices.extend(output.positions);
        normals.extend(output.normals);
        confidences.extend(output.confidences);
    }

    MeshData::from_parts(vertices, normals, indices).with_confidences(confidences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthmesh_core::{encode_scan_records, ScanVertex, SCAN_TRIANGLE_STRIDE};
    use depthmesh_gpu::{plan_chunks, CpuBackend, MemoryBudget};

    fn strip(triangles: usize) -> Vec<u8> {
        let records: Vec<ScanVertex> = (0..triangles * 3)
            .map(|i| ScanVertex {
                position: [i as f32, (i % 3) as f32, 0.0],
                normal: [0.0, 0.0, 1.0],
                confidence: 0.9,
            })
            .collect();
        encode_scan_records(&records)
    }

    #[test]
    fn test_merge_offsets_indices_in_plan_order() {
        let plan = plan_chunks(SCAN_TRIANGLE_STRIDE * 3, SCAN_TRIANGLE_STRIDE as u64).unwrap();
        let outputs: Vec<ChunkOutput> = plan
            .iter()
            .map(|chunk| {
                let mut out = ChunkOutput::with_capacity(3);
                for k in 0..3 {
                    out.positions.push(depthmesh_core::Point3f::new(chunk.index as f32, k as f32, 0.0));
                    out.normals.push(depthmesh_core::Vector3f::z());
                    out.confidences.push(1.0);
                    out.indices.push(k);
                }
                out
            })
            .collect();

        let mesh = merge_outputs(&plan, outputs);
        assert_eq!(mesh.indices, (0..9).collect::<Vec<u32>>());
        assert_eq!(mesh.vertices[4].x, 1.0);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_features_checked_first() {
        let processor =
            MeshProcessor::new(CpuBackend::new(), Arc::new(MemoryBudget::unlimited()), ProcessorConfig::default())
                .unwrap();
        let err = processor.process_with_features(&strip(1), 99).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientFeatures {
                found: 99,
                required: 100
            }
        ));
    }

    #[test]
    fn test_rejects_malformed_input() {
        let processor =
            MeshProcessor::new(CpuBackend::new(), Arc::new(MemoryBudget::unlimited()), ProcessorConfig::default())
                .unwrap();
        assert!(matches!(processor.process(&[]), Err(Error::InvalidInputData(_))));
        let mut data = strip(2);
        data.truncate(data.len() - 28);
        assert!(matches!(processor.process(&data), Err(Error::InvalidInputData(_))));
    }
}
