//! Incremental point accumulation
//!
//! Merges per-frame depth samples into one growing scan cloud. Low
//! confidence samples and near-duplicates are rejected on the way in,
//! and the cloud is thinned by uniform stride whenever it outgrows its
//! cap.

use crate::spatial::{DuplicateIndex, DuplicateSearch};
use depthmesh_core::{Bounded, ConfidentPoint3f, Error, Point3f, Result, ScanPointCloud};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for [`PointCloudAccumulator`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorConfig {
    /// Samples below this confidence are discarded
    pub confidence_threshold: f32,
    /// Samples strictly closer than this to a retained point are rejected
    pub duplicate_distance: f32,
    /// Cardinality cap enforced by stride downsampling
    pub max_points: usize,
    pub min_points: usize,
    /// Minimum points per unit of bounding-box volume
    pub min_density: f32,
    /// Minimum dominant-axis span relative to `target_extent`
    pub min_coverage: f32,
    pub target_extent: f32,
    pub duplicate_search: DuplicateSearch,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            duplicate_distance: 0.005,
            max_points: 100_000,
            min_points: 1_000,
            min_density: 0.5,
            min_coverage: 0.7,
            target_extent: 0.3,
            duplicate_search: DuplicateSearch::Grid,
        }
    }
}

impl AccumulatorConfig {
    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_duplicate_distance(mut self, distance: f32) -> Self {
        self.duplicate_distance = distance;
        self
    }

    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points;
        self
    }

    pub fn with_min_points(mut self, min_points: usize) -> Self {
        self.min_points = min_points;
        self
    }

    pub fn with_duplicate_search(mut self, search: DuplicateSearch) -> Self {
        self.duplicate_search = search;
        self
    }
}

/// Snapshot of the accumulator's admission metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorStats {
    pub point_count: usize,
    pub density: f32,
    pub coverage: f32,
    pub mean_confidence: Option<f32>,
    pub acceptable: bool,
}

/// Owns the scan cloud for one capture session
pub struct PointCloudAccumulator {
    config: AccumulatorConfig,
    cloud: ScanPointCloud,
    index: Box<dyn DuplicateIndex>,
}

impl PointCloudAccumulator {
    /// Create an empty accumulator with default configuration
    pub fn new() -> Self {
        Self::with_config(AccumulatorConfig::default())
    }

    pub fn with_config(config: AccumulatorConfig) -> Self {
        let index = config.duplicate_search.build(config.duplicate_distance);
        Self {
            config,
            cloud: ScanPointCloud::new(),
            index,
        }
    }

    pub fn config(&self) -> &AccumulatorConfig {
        &self.config
    }

    /// Merge a batch of depth samples into the cloud.
    ///
    /// Non-finite samples, samples below the confidence threshold and
    /// samples within the duplicate distance of a retained point (including
    /// ones accepted earlier in the same batch) are skipped. If the cloud
    /// then exceeds its cap it is downsampled by uniform stride.
    ///
    /// # Arguments
    /// * `points` - Sample positions
    /// * `confidences` - Per-sample confidence, index-aligned with `points`
    ///
    /// # Returns
    /// * `Result<bool>` - Whether the cloud now passes the admission gate
    pub fn accumulate(&mut self, points: &[Point3f], confidences: &[f32]) -> Result<bool> {
        if points.len() != confidences.len() {
            return Err(Error::InvalidInputData(format!(
                "{} points but {} confidences",
                points.len(),
                confidences.len()
            )));
        }

        let mut accepted = 0usize;
        let mut low_confidence = 0usize;
        let mut duplicates = 0usize;
        let mut non_finite = 0usize;

        for (point, &confidence) in points.iter().zip(confidences) {
            if !point.coords.iter().all(|v| v.is_finite()) || !confidence.is_finite() {
                non_finite += 1;
                continue;
            }
            if confidence < self.config.confidence_threshold {
                low_confidence += 1;
                continue;
            }
            if self.index.has_duplicate(point) {
                duplicates += 1;
                continue;
            }
            self.index.insert(*point);
            self.cloud.push(ConfidentPoint3f::new(*point, confidence));
            accepted += 1;
        }

        debug!(
            batch = points.len(),
            accepted,
            low_confidence,
            duplicates,
            non_finite,
            total = self.cloud.len(),
            "accumulated depth samples"
        );

        if self.cloud.len() > self.config.max_points {
            self.downsample();
        }

        Ok(self.is_acceptable())
    }

    /// Keep every k-th point, with k chosen so the result fits the cap
    fn downsample(&mut self) {
        let before = self.cloud.len();
        let stride = before / self.config.max_points.max(1) + 1;
        self.cloud.retain_stride(stride);

        let positions: Vec<Point3f> = self.cloud.positions().collect();
        self.index.rebuild(&positions);

        debug!(before, after = self.cloud.len(), stride, "downsampled scan cloud");
    }

    /// Points per unit of bounding-box volume, 0 for a flat or empty cloud
    pub fn density(&self) -> f32 {
        match self.cloud.bounding_box() {
            Some(bbox) if bbox.volume() > 0.0 => self.cloud.len() as f32 / bbox.volume(),
            _ => 0.0,
        }
    }

    /// Dominant-axis span relative to the target extent, capped at 1
    pub fn coverage(&self) -> f32 {
        if self.config.target_extent <= 0.0 {
            return 0.0;
        }
        self.cloud
            .bounding_box()
            .map_or(0.0, |bbox| (bbox.max_extent() / self.config.target_extent).min(1.0))
    }

    /// Admission gate for mesh generation. Failing it is not an error;
    /// the caller decides whether to keep capturing.
    pub fn is_acceptable(&self) -> bool {
        self.cloud.len() >= self.config.min_points
            && self.density() > self.config.min_density
            && self.coverage() > self.config.min_coverage
    }

    pub fn stats(&self) -> AccumulatorStats {
        AccumulatorStats {
            point_count: self.cloud.len(),
            density: self.density(),
            coverage: self.coverage(),
            mean_confidence: self.cloud.mean_confidence(),
            acceptable: self.is_acceptable(),
        }
    }

    /// Drop every retained point, ready for the next scan session
    pub fn reset(&mut self) {
        self.cloud.clear();
        self.index.clear();
    }

    pub fn cloud(&self) -> &ScanPointCloud {
        &self.cloud
    }

    pub fn len(&self) -> usize {
        self.cloud.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cloud.is_empty()
    }
}

impl Default for PointCloudAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
