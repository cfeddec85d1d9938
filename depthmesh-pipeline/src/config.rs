//! Processor configuration

use depthmesh_algorithms::{ProcessingParameters, QualityConfig};
use depthmesh_gpu::BufferConfig;
use depthmesh_simplification::DecimationConfig;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

/// Default cache budget, 64 MiB
pub const DEFAULT_CACHE_BUDGET_BYTES: usize = 64 * 1024 * 1024;

/// Configuration for [`MeshProcessor`](crate::MeshProcessor)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub buffer: BufferConfig,
    pub quality: QualityConfig,
    pub decimation: DecimationConfig,
    /// Fraction of vertices to remove after meshing; `None` skips decimation
    pub target_reduction: Option<f32>,
    /// Merge records with identical positions into shared vertices
    pub weld: bool,
    /// Bilateral smoothing of the welded mesh; `None` skips it
    pub smoothing: Option<ProcessingParameters>,
    /// Upper bound on chunks in flight, further limited by the back-end's
    /// queue count
    pub max_concurrent_chunks: usize,
    /// Minimum photogrammetry feature count accepted by
    /// [`MeshProcessor::process_with_features`](crate::MeshProcessor::process_with_features)
    pub min_feature_count: usize,
    pub cache_budget_bytes: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            quality: QualityConfig::default(),
            decimation: DecimationConfig::default(),
            target_reduction: None,
            weld: true,
            smoothing: None,
            max_concurrent_chunks: 2,
            min_feature_count: 100,
            cache_budget_bytes: DEFAULT_CACHE_BUDGET_BYTES,
        }
    }
}

impl ProcessorConfig {
    pub fn with_buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn with_quality(mut self, quality: QualityConfig) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_decimation(mut self, decimation: DecimationConfig) -> Self {
        self.decimation = decimation;
        self
    }

    /// Decimate every mesh by `reduction` before validation
    pub fn with_target_reduction(mut self, reduction: f32) -> Self {
        self.target_reduction = Some(reduction);
        self
    }

    pub fn with_weld(mut self, weld: bool) -> Self {
        self.weld = weld;
        self
    }

    pub fn with_smoothing(mut self, params: ProcessingParameters) -> Self {
        self.smoothing = Some(params);
        self
    }

    pub fn with_max_concurrent_chunks(mut self, chunks: usize) -> Self {
        self.max_concurrent_chunks = chunks;
        self
    }

    pub fn with_min_feature_count(mut self, count: usize) -> Self {
        self.min_feature_count = count;
        self
    }

    pub fn with_cache_budget_bytes(mut self, bytes: usize) -> Self {
        self.cache_budget_bytes = bytes;
        self
    }

    /// Digest of every setting that shapes a processed mesh.
    ///
    /// Buffer sizing, concurrency and the cache budget are left out since
    /// they change how work is split, not what it produces.
    pub fn output_digest(&self) -> u64 {
        let mut h = FxHasher::default();
        h.write_u8(self.weld as u8);
        match self.target_reduction {
            Some(r) => {
                h.write_u8(1);
                h.write_u32(r.to_bits());
            }
            None => h.write_u8(0),
        }
        match &self.smoothing {
            Some(p) => {
                h.write_u8(1);
                for v in [p.spatial_sigma, p.range_sigma, p.confidence_threshold, p.feature_weight] {
                    h.write_u32(v.to_bits());
                }
                h.write_u32(p.iterations);
            }
            None => h.write_u8(0),
        }

        let d = &self.decimation;
        h.write_u8(d.candidates as u8);
        h.write_usize(d.all_pairs_vertex_limit);
        h.write_u64(d.singular_epsilon.to_bits());

        let q = &self.quality;
        for v in [
            q.poor_density,
            q.acceptable_density,
            q.good_density,
            q.poor_consistency,
            q.acceptable_consistency,
            q.good_consistency,
            q.min_mean_confidence,
            q.feature_angle,
        ] {
            h.write_u32(v.to_bits());
        }
        h.write_usize(q.min_vertices);
        h.write_usize(q.min_triangles);
        h.write_usize(q.detailed_metrics_threshold);
        h.write_u8(q.normal_consistency as u8);
        h.finish()
    }
}
