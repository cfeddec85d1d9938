//! Mesh quality metrics and validation
//!
//! Two separate contracts live here. [`QualityValidator::classify`] maps
//! density and normal consistency to an advisory [`MeshQuality`] tier,
//! while [`QualityValidator::validate`] enforces hard minimums and reports
//! a [`QualityShortfall`]. A `poor` tier is not a rejection and a
//! rejection says nothing about the tier.

use depthmesh_core::{Bounded, MeshData, MeshQuality, Point3f, ProcessedMesh, QualityShortfall, Vector3f};
use itertools::Itertools;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How normal consistency pairs up normals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormalConsistency {
    /// Consecutive entries of the normal array
    #[default]
    Sequential,
    /// Endpoints of every unique mesh edge
    Adjacency,
}

/// Configuration for [`QualityValidator`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Density below which a mesh is `poor`
    pub poor_density: f32,
    pub acceptable_density: f32,
    pub good_density: f32,
    /// Consistency below which a mesh is `poor`
    pub poor_consistency: f32,
    pub acceptable_consistency: f32,
    pub good_consistency: f32,
    pub min_vertices: usize,
    pub min_triangles: usize,
    pub min_mean_confidence: f32,
    /// Vertex count from which feature and smoothness metrics are computed
    pub detailed_metrics_threshold: usize,
    pub normal_consistency: NormalConsistency,
    /// Dihedral angle, in degrees, above which an edge counts as a feature
    pub feature_angle: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            poor_density: 100.0,
            acceptable_density: 500.0,
            good_density: 1000.0,
            poor_consistency: 0.3,
            acceptable_consistency: 0.6,
            good_consistency: 0.8,
            min_vertices: 1_000,
            min_triangles: 500,
            min_mean_confidence: 0.8,
            detailed_metrics_threshold: 10_000,
            normal_consistency: NormalConsistency::Sequential,
            feature_angle: 30.0,
        }
    }
}

impl QualityConfig {
    pub fn with_normal_consistency(mut self, mode: NormalConsistency) -> Self {
        self.normal_consistency = mode;
        self
    }

    pub fn with_minimums(mut self, vertices: usize, triangles: usize, mean_confidence: f32) -> Self {
        self.min_vertices = vertices;
        self.min_triangles = triangles;
        self.min_mean_confidence = mean_confidence;
        self
    }

    pub fn with_detailed_metrics_threshold(mut self, vertices: usize) -> Self {
        self.detailed_metrics_threshold = vertices;
        self
    }
}

/// Measurements taken over one mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub vertex_count: usize,
    pub triangle_count: usize,
    /// Vertices per unit of bounding-box volume
    pub point_density: f32,
    pub normal_consistency: f32,
    /// Share of unique edges shared by exactly two triangles
    pub surface_completeness: f32,
    /// Mean `1 - |cos|` between supplied and geometric vertex normals
    pub noise_level: f32,
    pub mean_confidence: Option<f32>,
    /// Share of sharp edges whose endpoint normals also disagree
    pub feature_preservation: Option<f32>,
    /// Mean `|cos|` between the faces of each interior edge
    pub surface_smoothness: Option<f32>,
}

/// Metrics together with the tier they classify to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub metrics: QualityMetrics,
    pub quality: MeshQuality,
}

/// Vertices per unit of bounding-box volume; 0 when the box is flat
pub fn point_density(vertices: &[Point3f]) -> f32 {
    match vertices.bounding_box() {
        Some(bbox) if bbox.volume() > 0.0 => vertices.len() as f32 / bbox.volume(),
        _ => 0.0,
    }
}

/// Mean `|dot(n[i], n[i + 1])|` over consecutive normals.
///
/// Order dependent: this is a cheap proxy that only means something when
/// neighbouring array entries are spatially close. Fewer than two normals
/// give 0.
pub fn sequential_normal_consistency(normals: &[Vector3f]) -> f32 {
    if normals.len() < 2 {
        return 0.0;
    }
    let sum: f32 = normals
        .iter()
        .tuple_windows()
        .map(|(a, b)| a.dot(b).abs())
        .sum();
    sum / (normals.len() - 1) as f32
}

/// Mean `|dot|` between the normals at the two ends of every unique edge.
///
/// Edges reaching past the end of `normals` are skipped, so a malformed
/// index buffer lowers the sample count instead of panicking. No usable
/// edge gives 0.
pub fn adjacency_normal_consistency(normals: &[Vector3f], indices: &[u32]) -> f32 {
    let (sum, count) = edge_faces(indices)
        .iter()
        .filter_map(|edge| {
            let a = normals.get(edge.a as usize)?;
            let b = normals.get(edge.b as usize)?;
            Some(a.dot(b).abs())
        })
        .fold((0.0f32, 0usize), |(sum, count), d| (sum + d, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// One undirected edge and the triangles that use it
struct EdgeFaces {
    a: u32,
    b: u32,
    faces: Vec<usize>,
}

/// Unique undirected edges in first-seen order
fn edge_faces(indices: &[u32]) -> Vec<EdgeFaces> {
    let mut slots: FxHashMap<(u32, u32), usize> = FxHashMap::default();
    let mut edges: Vec<EdgeFaces> = Vec::new();
    for (face, tri) in indices.chunks_exact(3).enumerate() {
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            if a == b {
                continue;
            }
            let (a, b) = if a < b { (a, b) } else { (b, a) };
            let slot = *slots.entry((a, b)).or_insert_with(|| {
                edges.push(EdgeFaces { a, b, faces: Vec::new() });
                edges.len() - 1
            });
            edges[slot].faces.push(face);
        }
    }
    edges
}

/// Classifies meshes into quality tiers and enforces hard minimums
#[derive(Debug, Clone, Default)]
pub struct QualityValidator {
    config: QualityConfig,
}

impl QualityValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Tier for a density and consistency pair. Density is the primary
    /// gate and consistency the secondary; both bounds are inclusive.
    pub fn tier(&self, density: f32, consistency: f32) -> MeshQuality {
        let c = &self.config;
        if density < c.poor_density || consistency < c.poor_consistency {
            MeshQuality::Poor
        } else if density < c.acceptable_density || consistency < c.acceptable_consistency {
            MeshQuality::Acceptable
        } else if density < c.good_density || consistency < c.good_consistency {
            MeshQuality::Good
        } else {
            MeshQuality::Excellent
        }
    }

    /// Classify vertex and normal arrays using sequential consistency
    pub fn classify(&self, vertices: &[Point3f], normals: &[Vector3f]) -> MeshQuality {
        let density = point_density(vertices);
        let consistency = sequential_normal_consistency(normals);
        self.tier(density, consistency)
    }

    /// Classify a mesh with the configured consistency mode
    pub fn classify_mesh(&self, mesh: &MeshData) -> MeshQuality {
        let density = point_density(&mesh.vertices);
        let consistency = self.normal_consistency(mesh);
        let quality = self.tier(density, consistency);
        info!(%quality, density, consistency, "classified mesh");
        quality
    }

    fn normal_consistency(&self, mesh: &MeshData) -> f32 {
        match self.config.normal_consistency {
            NormalConsistency::Sequential => sequential_normal_consistency(&mesh.normals),
            NormalConsistency::Adjacency => adjacency_normal_consistency(&mesh.normals, &mesh.indices),
        }
    }

    /// Enforce the hard minimums on a processed mesh
    pub fn validate(&self, mesh: &ProcessedMesh) -> Result<(), QualityShortfall> {
        let mean_confidence = mesh
            .confidences()
            .filter(|c| !c.is_empty())
            .map(|c| c.iter().sum::<f32>() / c.len() as f32);
        self.check_minimums(mesh.vertex_count(), mesh.triangle_count(), mean_confidence)
    }

    /// Enforce the hard minimums on a working mesh
    pub fn validate_mesh(&self, mesh: &MeshData) -> Result<(), QualityShortfall> {
        self.check_minimums(mesh.vertex_count(), mesh.triangle_count(), mesh.mean_confidence())
    }

    fn check_minimums(
        &self,
        vertices: usize,
        triangles: usize,
        mean_confidence: Option<f32>,
    ) -> Result<(), QualityShortfall> {
        let c = &self.config;
        let result = if vertices < c.min_vertices {
            Err(QualityShortfall::TooFewVertices {
                found: vertices,
                required: c.min_vertices,
            })
        } else if triangles < c.min_triangles {
            Err(QualityShortfall::TooFewTriangles {
                found: triangles,
                required: c.min_triangles,
            })
        } else {
            match mean_confidence {
                Some(found) if found < c.min_mean_confidence => Err(QualityShortfall::LowConfidence {
                    found,
                    required: c.min_mean_confidence,
                }),
                _ => Ok(()),
            }
        };

        if let Err(reason) = &result {
            warn!(%reason, "mesh failed validation");
        }
        result
    }

    /// Measure a mesh and classify it. Expects a mesh that passes
    /// [`MeshData::validate`].
    ///
    /// Feature preservation and surface smoothness are only computed for
    /// meshes with at least `detailed_metrics_threshold` vertices.
    pub fn analyze(&self, mesh: &MeshData) -> QualityReport {
        let edges = edge_faces(&mesh.indices);
        let face_normals: Vec<Option<Vector3f>> = mesh
            .indices
            .par_chunks_exact(3)
            .map(|t| mesh.face_normal([t[0], t[1], t[2]]))
            .collect();

        let point_density = point_density(&mesh.vertices);
        let normal_consistency = self.normal_consistency(mesh);
        let surface_completeness = if edges.is_empty() {
            0.0
        } else {
            edges.iter().filter(|e| e.faces.len() == 2).count() as f32 / edges.len() as f32
        };
        let noise_level = noise_level(mesh, &face_normals);

        let detailed = mesh.vertex_count() >= self.config.detailed_metrics_threshold;
        let (feature_preservation, surface_smoothness) = if detailed {
            let interior: Vec<(u32, u32, Vector3f, Vector3f)> = edges
                .iter()
                .filter(|e| e.faces.len() == 2)
                .filter_map(|e| {
                    let n0 = face_normals[e.faces[0]]?;
                    let n1 = face_normals[e.faces[1]]?;
                    Some((e.a, e.b, n0, n1))
                })
                .collect();
            debug!(interior_edges = interior.len(), "computing detailed quality metrics");
            (
                Some(self.feature_preservation(mesh, &interior)),
                Some(surface_smoothness(&interior)),
            )
        } else {
            (None, None)
        };

        let metrics = QualityMetrics {
            vertex_count: mesh.vertex_count(),
            triangle_count: mesh.triangle_count(),
            point_density,
            normal_consistency,
            surface_completeness,
            noise_level,
            mean_confidence: mesh.mean_confidence(),
            feature_preservation,
            surface_smoothness,
        };
        let quality = self.tier(point_density, normal_consistency);
        QualityReport { metrics, quality }
    }

    fn feature_preservation(&self, mesh: &MeshData, interior: &[(u32, u32, Vector3f, Vector3f)]) -> f32 {
        let sharp_cos = self.config.feature_angle.to_radians().cos();
        let vertex_cos = (self.config.feature_angle * 0.5).to_radians().cos();

        let (sharp, kept) = interior
            .par_iter()
            .filter(|(_, _, n0, n1)| n0.dot(n1) < sharp_cos)
            .map(|&(a, b, _, _)| {
                let agree = mesh.normals[a as usize].dot(&mesh.normals[b as usize]);
                (1usize, usize::from(agree < vertex_cos))
            })
            .reduce(|| (0, 0), |x, y| (x.0 + y.0, x.1 + y.1));

        if sharp == 0 {
            1.0
        } else {
            kept as f32 / sharp as f32
        }
    }
}

fn noise_level(mesh: &MeshData, face_normals: &[Option<Vector3f>]) -> f32 {
    let mut accumulated = vec![Vector3f::zeros(); mesh.vertex_count()];
    for (tri, normal) in mesh.triangles().zip(face_normals) {
        if let Some(n) = normal {
            for v in tri {
                accumulated[v as usize] += n;
            }
        }
    }

    // Deviations are collected in vertex order and summed sequentially so
    // the result does not depend on how rayon split the work
    let deviations: Vec<f32> = accumulated
        .par_iter()
        .zip(mesh.normals.par_iter())
        .filter_map(|(geometric, supplied)| {
            let g = geometric.try_normalize(f32::EPSILON)?;
            let s = supplied.try_normalize(f32::EPSILON)?;
            Some(1.0 - g.dot(&s).abs())
        })
        .collect();

    if deviations.is_empty() {
        0.0
    } else {
        deviations.iter().sum::<f32>() / deviations.len() as f32
    }
}

fn surface_smoothness(interior: &[(u32, u32, Vector3f, Vector3f)]) -> f32 {
    if interior.is_empty() {
        return 1.0;
    }
    let sum: f32 = interior.iter().map(|(_, _, n0, n1)| n0.dot(n1).abs()).sum();
    sum / interior.len() as f32
}
