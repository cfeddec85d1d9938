//! Feature-preserving bilateral smoothing of welded scan meshes
//!
//! Each vertex moves along its own normal by a weighted mean of the
//! normal-direction offsets to its one-ring neighbours (Fleishman et al.,
//! "Bilateral mesh denoising", 2003). Neighbours below the confidence
//! threshold do not vote, and vertices sitting on a crease are damped by
//! the feature weight.

use depthmesh_core::{Error, MeshData, Point3f, Result, Vector3f};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Smoothing parameters shared with the capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessingParameters {
    /// Falloff with neighbour distance, in scene units
    pub spatial_sigma: f32,
    /// Falloff with offset along the vertex normal, in scene units
    pub range_sigma: f32,
    /// Neighbours with lower confidence are ignored
    pub confidence_threshold: f32,
    /// 0 smooths creases like flat regions, 1 damps them the most
    pub feature_weight: f32,
    pub iterations: u32,
}

impl Default for ProcessingParameters {
    fn default() -> Self {
        Self {
            spatial_sigma: 0.01,
            range_sigma: 0.005,
            confidence_threshold: 0.5,
            feature_weight: 0.5,
            iterations: 1,
        }
    }
}

impl ProcessingParameters {
    pub fn with_sigmas(mut self, spatial: f32, range: f32) -> Self {
        self.spatial_sigma = spatial;
        self.range_sigma = range;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_feature_weight(mut self, weight: f32) -> Self {
        self.feature_weight = weight;
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    fn validate(&self) -> Result<()> {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        if !positive(self.spatial_sigma) || !positive(self.range_sigma) {
            return Err(Error::InvalidInputData(format!(
                "smoothing sigmas must be positive, got spatial {} and range {}",
                self.spatial_sigma, self.range_sigma
            )));
        }
        if !(0.0..=1.0).contains(&self.feature_weight) {
            return Err(Error::InvalidInputData(format!(
                "feature weight {} outside [0, 1]",
                self.feature_weight
            )));
        }
        Ok(())
    }
}

/// Neighbours of every vertex in first-seen order
fn one_rings(mesh: &MeshData) -> Vec<Vec<u32>> {
    let mut rings = vec![Vec::new(); mesh.vertex_count()];
    for [a, b, c] in mesh.triangles() {
        for (from, to) in [(a, b), (a, c), (b, a), (b, c), (c, a), (c, b)] {
            let ring: &mut Vec<u32> = &mut rings[from as usize];
            if from != to && !ring.contains(&to) {
                ring.push(to);
            }
        }
    }
    rings
}

struct Filter<'a> {
    params: &'a ProcessingParameters,
    normals: &'a [Option<Vector3f>],
    trusted: &'a [bool],
    rings: &'a [Vec<u32>],
}

impl Filter<'_> {
    fn vertex(&self, i: usize, positions: &[Point3f]) -> Point3f {
        let p = positions[i];
        let Some(n) = self.normals[i] else {
            return p;
        };
        let two_spatial = 2.0 * self.params.spatial_sigma * self.params.spatial_sigma;
        let two_range = 2.0 * self.params.range_sigma * self.params.range_sigma;

        let mut weighted = 0.0f32;
        let mut total = 0.0f32;
        let mut agreement = 0.0f32;
        let mut voters = 0usize;
        for &j in &self.rings[i] {
            let j = j as usize;
            if !self.trusted[j] {
                continue;
            }
            let d = positions[j] - p;
            let h = n.dot(&d);
            let w = (-d.norm_squared() / two_spatial).exp() * (-h * h / two_range).exp();
            weighted += w * h;
            total += w;
            if let Some(nj) = self.normals[j] {
                agreement += n.dot(&nj).abs();
                voters += 1;
            }
        }
        if total <= f32::EPSILON {
            return p;
        }

        let crease = if voters == 0 {
            0.0
        } else {
            1.0 - agreement / voters as f32
        };
        let damping = (1.0 - self.params.feature_weight * crease).clamp(0.0, 1.0);
        p + n * (weighted / total * damping)
    }
}

/// Smooth vertex positions of a welded mesh, leaving topology, normals and
/// confidences untouched.
///
/// # Errors
/// `InvalidInputData` for non-positive sigmas, a feature weight outside
/// [0, 1], or a mesh failing [`MeshData::validate`].
pub fn bilateral_smooth(mesh: &MeshData, params: &ProcessingParameters) -> Result<MeshData> {
    params.validate()?;
    mesh.validate()?;
    if mesh.is_empty() || params.iterations == 0 {
        return Ok(mesh.clone());
    }

    let normals: Vec<Option<Vector3f>> = mesh
        .normals
        .iter()
        .map(|n| n.try_normalize(f32::EPSILON))
        .collect();
    let trusted: Vec<bool> = match &mesh.confidences {
        Some(confidences) => confidences
            .iter()
            .map(|&c| c >= params.confidence_threshold)
            .collect(),
        None => vec![true; mesh.vertex_count()],
    };
    let rings = one_rings(mesh);
    let filter = Filter {
        params,
        normals: &normals,
        trusted: &trusted,
        rings: &rings,
    };

    let mut positions = mesh.vertices.clone();
    for _ in 0..params.iterations {
        positions = (0..positions.len())
            .into_par_iter()
            .map(|i| filter.vertex(i, &positions))
            .collect();
    }

    let max_shift = positions
        .iter()
        .zip(&mesh.vertices)
        .map(|(a, b)| (a - b).norm())
        .fold(0.0f32, f32::max);
    debug!(
        vertices = positions.len(),
        iterations = params.iterations,
        max_shift,
        "bilateral smoothing"
    );

    Ok(MeshData {
        vertices: positions,
        ..mesh.clone()
    })
}
