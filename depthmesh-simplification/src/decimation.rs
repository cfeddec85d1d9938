//! Quadric error metric decimation
//!
//! Greedy edge collapse driven by per-vertex quadrics. Every vertex starts
//! with the sum of the plane quadrics of its incident faces; candidate
//! pairs are ranked by the error of their optimal merged position and
//! collapsed cheapest-first until the vertex budget is met.
//!
//! Collapses only record a remap from the removed vertex to its survivor.
//! The index buffer is rewritten once at the end, which is where
//! triangles that lost a corner are dropped.

use crate::quadric::{Quadric, SINGULAR_DETERMINANT};
use crate::MeshSimplifier;
use depthmesh_core::{Error, MeshData, Point3f, Result, Vector3f};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Which vertex pairs are considered for collapse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateStrategy {
    /// Unique edges of the current triangulation, rebuilt after every pass
    MeshEdges,
    /// Every unordered pair of live vertices, including non-adjacent ones
    AllPairs,
}

impl Default for CandidateStrategy {
    fn default() -> Self {
        CandidateStrategy::MeshEdges
    }
}

/// Configuration for [`DecimationEngine`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecimationConfig {
    pub candidates: CandidateStrategy,
    /// Above this vertex count `AllPairs` degrades to `MeshEdges`
    pub all_pairs_vertex_limit: usize,
    /// Determinant magnitude treated as a singular quadric system
    pub singular_epsilon: f64,
}

impl Default for DecimationConfig {
    fn default() -> Self {
        Self {
            candidates: CandidateStrategy::MeshEdges,
            all_pairs_vertex_limit: 4096,
            singular_epsilon: SINGULAR_DETERMINANT,
        }
    }
}

impl DecimationConfig {
    pub fn with_candidates(mut self, candidates: CandidateStrategy) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_all_pairs_vertex_limit(mut self, limit: usize) -> Self {
        self.all_pairs_vertex_limit = limit;
        self
    }

    pub fn with_singular_epsilon(mut self, epsilon: f64) -> Self {
        self.singular_epsilon = epsilon;
        self
    }
}

/// Number of vertices kept when decimating `vertex_count` vertices by
/// `target_reduction`: `ceil(n * (1 - t))`
pub fn target_vertex_count(vertex_count: usize, target_reduction: f32) -> usize {
    ((vertex_count as f64) * (1.0 - f64::from(target_reduction))).ceil() as usize
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    v1: u32,
    v2: u32,
    cost: f64,
}

/// Working state of one decimation run
struct CollapseState {
    positions: Vec<Point3f>,
    normals: Vec<Vector3f>,
    confidences: Option<Vec<f32>>,
    quadrics: Vec<Quadric>,
    /// Survivor of each vertex; `parent[v] == v` while `v` is live
    parent: Vec<u32>,
    live: usize,
}

impl CollapseState {
    fn new(mesh: &MeshData) -> Self {
        let n = mesh.vertex_count();
        let mut quadrics = vec![Quadric::zero(); n];
        let mut degenerate = 0usize;

        for tri in mesh.triangles() {
            let [a, b, c] = tri.map(|i| i as usize);
            match Quadric::from_triangle(&mesh.vertices[a], &mesh.vertices[b], &mesh.vertices[c]) {
                Some(q) => {
                    quadrics[a] += q;
                    quadrics[b] += q;
                    quadrics[c] += q;
                }
                None => degenerate += 1,
            }
        }
        if degenerate > 0 {
            debug!(degenerate, "skipped zero-area triangles when building quadrics");
        }

        Self {
            positions: mesh.vertices.clone(),
            normals: mesh.normals.clone(),
            confidences: mesh.confidences.clone(),
            quadrics,
            parent: (0..n as u32).collect(),
            live: n,
        }
    }

    fn is_live(&self, v: u32) -> bool {
        self.parent[v as usize] == v
    }

    /// Current survivor of `v`, compressing the path on the way
    fn resolve(&mut self, v: u32) -> u32 {
        let mut root = v;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        let mut cur = v;
        while self.parent[cur as usize] != root {
            let next = self.parent[cur as usize];
            self.parent[cur as usize] = root;
            cur = next;
        }
        root
    }

    fn candidate(&self, v1: u32, v2: u32, epsilon: f64) -> Candidate {
        let q = self.quadrics[v1 as usize] + self.quadrics[v2 as usize];
        let (_, cost) = q.collapse_target(
            &self.positions[v1 as usize],
            &self.positions[v2 as usize],
            epsilon,
        );
        Candidate { v1, v2, cost }
    }

    /// Merge `v2` into `v1`
    fn collapse(&mut self, v1: u32, v2: u32, epsilon: f64) {
        let (a, b) = (v1 as usize, v2 as usize);
        let q = self.quadrics[a] + self.quadrics[b];
        let (position, _) = q.collapse_target(&self.positions[a], &self.positions[b], epsilon);

        self.positions[a] = position;
        self.quadrics[a] = q;

        let n1 = self.normals[a];
        self.normals[a] = (n1 + self.normals[b])
            .try_normalize(f32::EPSILON)
            .unwrap_or(n1);

        if let Some(confidences) = self.confidences.as_mut() {
            confidences[a] = (confidences[a] + confidences[b]) * 0.5;
        }

        self.parent[b] = v1;
        self.live -= 1;
    }

    /// Compact live vertices and rewrite the index buffer.
    ///
    /// Returns the mesh and the number of triangles dropped for
    /// losing a distinct corner.
    fn into_mesh(mut self, indices: &[u32]) -> (MeshData, usize) {
        let n = self.positions.len();
        let mut new_index = vec![u32::MAX; n];
        let mut vertices = Vec::with_capacity(self.live);
        let mut normals = Vec::with_capacity(self.live);
        let mut confidences = self.confidences.as_ref().map(|_| Vec::with_capacity(self.live));

        for v in 0..n {
            if self.is_live(v as u32) {
                new_index[v] = vertices.len() as u32;
                vertices.push(self.positions[v]);
                normals.push(self.normals[v]);
                if let (Some(out), Some(src)) = (confidences.as_mut(), self.confidences.as_ref()) {
                    out.push(src[v]);
                }
            }
        }

        let mut out_indices = Vec::with_capacity(indices.len());
        let mut dropped = 0usize;
        for tri in indices.chunks_exact(3) {
            let a = new_index[self.resolve(tri[0]) as usize];
            let b = new_index[self.resolve(tri[1]) as usize];
            let c = new_index[self.resolve(tri[2]) as usize];
            if a != b && b != c && a != c {
                out_indices.extend_from_slice(&[a, b, c]);
            } else {
                dropped += 1;
            }
        }

        let mesh = MeshData {
            vertices,
            normals,
            indices: out_indices,
            confidences,
        };
        (mesh, dropped)
    }
}

/// Quadric error metric mesh decimator
#[derive(Debug, Clone, Default)]
pub struct DecimationEngine {
    config: DecimationConfig,
}

impl DecimationEngine {
    /// Create an engine with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DecimationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecimationConfig {
        &self.config
    }

    /// Decimate a mesh given as parallel vertex/normal arrays and an index
    /// buffer.
    ///
    /// # Arguments
    /// * `vertices` - Vertex positions
    /// * `normals` - Per-vertex normals, index-aligned with `vertices`
    /// * `indices` - Triangle corner indices
    /// * `target_reduction` - Fraction of vertices to remove, in `[0, 1]`
    ///
    /// # Returns
    /// * `Result<MeshData>` - Mesh with at most `ceil(n * (1 - t))` vertices,
    ///   or fewer only when no valid candidate pair remains
    pub fn decimate(
        &self,
        vertices: &[Point3f],
        normals: &[Vector3f],
        indices: &[u32],
        target_reduction: f32,
    ) -> Result<MeshData> {
        let mesh = MeshData::from_parts(vertices.to_vec(), normals.to_vec(), indices.to_vec());
        self.decimate_mesh(&mesh, target_reduction)
    }

    /// Decimate a [`MeshData`], carrying confidences through the collapses
    pub fn decimate_mesh(&self, mesh: &MeshData, target_reduction: f32) -> Result<MeshData> {
        if mesh.vertices.is_empty() {
            return Err(Error::InvalidInputData("mesh has no vertices".to_string()));
        }
        if !(0.0..=1.0).contains(&target_reduction) {
            return Err(Error::InvalidInputData(format!(
                "target reduction {} must be between 0.0 and 1.0",
                target_reduction
            )));
        }
        mesh.validate()?;

        if target_reduction == 0.0 {
            return Ok(mesh.clone());
        }

        let original = mesh.vertex_count();
        let target = target_vertex_count(original, target_reduction);
        let strategy = self.effective_strategy(original);
        info!(
            vertices = original,
            triangles = mesh.triangle_count(),
            target,
            ?strategy,
            "decimating mesh"
        );

        let mut state = CollapseState::new(mesh);
        let mut passes = 0usize;
        let mut collapses = 0usize;

        while state.live > target {
            let candidates = self.rank_candidates(&mut state, &mesh.indices, strategy);
            if candidates.is_empty() {
                break;
            }
            passes += 1;

            let mut collapsed = 0usize;
            for c in &candidates {
                if state.live <= target {
                    break;
                }
                if !state.is_live(c.v1) || !state.is_live(c.v2) {
                    continue;
                }
                state.collapse(c.v1, c.v2, self.config.singular_epsilon);
                collapsed += 1;
            }
            debug!(pass = passes, candidates = candidates.len(), collapsed, live = state.live, "collapse pass");

            collapses += collapsed;
            if collapsed == 0 {
                break;
            }
        }

        let (result, dropped) = state.into_mesh(&mesh.indices);
        info!(
            vertices = result.vertex_count(),
            triangles = result.triangle_count(),
            passes,
            collapses,
            dropped_triangles = dropped,
            "decimation finished"
        );
        Ok(result)
    }

    fn effective_strategy(&self, vertex_count: usize) -> CandidateStrategy {
        match self.config.candidates {
            CandidateStrategy::AllPairs if vertex_count > self.config.all_pairs_vertex_limit => {
                warn!(
                    vertex_count,
                    limit = self.config.all_pairs_vertex_limit,
                    "too many vertices for all-pairs candidates, using mesh edges"
                );
                CandidateStrategy::MeshEdges
            }
            other => other,
        }
    }

    /// Candidate pairs in ascending cost; ties keep first-seen order
    fn rank_candidates(
        &self,
        state: &mut CollapseState,
        indices: &[u32],
        strategy: CandidateStrategy,
    ) -> Vec<Candidate> {
        let epsilon = self.config.singular_epsilon;
        let mut candidates = Vec::new();

        match strategy {
            CandidateStrategy::MeshEdges => {
                let mut seen = FxHashSet::default();
                for tri in indices.chunks_exact(3) {
                    for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                        let ra = state.resolve(a);
                        let rb = state.resolve(b);
                        if ra == rb {
                            continue;
                        }
                        let (v1, v2) = if ra < rb { (ra, rb) } else { (rb, ra) };
                        if seen.insert((v1, v2)) {
                            candidates.push(state.candidate(v1, v2, epsilon));
                        }
                    }
                }
            }
            CandidateStrategy::AllPairs => {
                let live: Vec<u32> = (0..state.positions.len() as u32)
                    .filter(|&v| state.is_live(v))
                    .collect();
                for (i, &v1) in live.iter().enumerate() {
                    for &v2 in &live[i + 1..] {
                        candidates.push(state.candidate(v1, v2, epsilon));
                    }
                }
            }
        }

        candidates.sort_by(|a, b| a.cost.total_cmp(&b.cost));
        candidates
    }
}

impl MeshSimplifier for DecimationEngine {
    fn simplify(&self, mesh: &MeshData, reduction_ratio: f32) -> Result<MeshData> {
        self.decimate_mesh(mesh, reduction_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_tetrahedron() -> MeshData {
        let vertices = vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(0.5, 1.0, 0.0),
            Point3f::new(0.5, 0.5, 1.0),
        ];
        let normals = vertices
            .iter()
            .map(|v| (v - Point3f::new(0.5, 0.5, 0.25)).normalize())
            .collect();
        MeshData::from_parts(vertices, normals, vec![0, 2, 1, 0, 1, 3, 1, 2, 3, 2, 0, 3])
    }

    fn make_plane_grid(cols: usize, rows: usize, spacing: f32) -> MeshData {
        let mut vertices = Vec::with_capacity(cols * rows);
        for y in 0..rows {
            for x in 0..cols {
                vertices.push(Point3f::new(x as f32 * spacing, y as f32 * spacing, 0.0));
            }
        }
        let mut indices = Vec::with_capacity((cols - 1) * (rows - 1) * 6);
        for y in 0..(rows - 1) {
            for x in 0..(cols - 1) {
                let tl = (y * cols + x) as u32;
                let tr = tl + 1;
                let bl = tl + cols as u32;
                let br = bl + 1;
                indices.extend_from_slice(&[tl, bl, tr, tr, bl, br]);
            }
        }
        let normals = vec![Vector3f::z(); vertices.len()];
        MeshData::from_parts(vertices, normals, indices)
    }

    fn make_curved_surface(size: usize) -> MeshData {
        let mut mesh = make_plane_grid(size, size, 1.0);
        for v in mesh.vertices.iter_mut() {
            v.z = (v.x * 0.5).sin() * (v.y * 0.5).cos();
        }
        let n = size as f32;
        for (normal, v) in mesh.normals.iter_mut().zip(&mesh.vertices) {
            *normal = Vector3f::new(v.x - n * 0.5, v.y - n * 0.5, n).normalize();
        }
        mesh
    }

    fn sequential_consistency(normals: &[Vector3f]) -> f32 {
        let pairs = normals.len() - 1;
        normals
            .windows(2)
            .map(|w| w[0].dot(&w[1]).abs())
            .sum::<f32>()
            / pairs as f32
    }

    fn assert_well_formed(mesh: &MeshData) {
        assert!(mesh.validate().is_ok());
        for [a, b, c] in mesh.triangles() {
            assert!(a != b && b != c && a != c, "degenerate triangle {:?}", [a, b, c]);
        }
    }

    #[test]
    fn test_creation() {
        let engine = DecimationEngine::new();
        assert_eq!(engine.config().candidates, CandidateStrategy::MeshEdges);
        assert_eq!(engine.config().all_pairs_vertex_limit, 4096);
        assert_eq!(engine.config().singular_epsilon, 1e-10);
    }

    #[test]
    fn test_target_vertex_count_rounds_up() {
        assert_eq!(target_vertex_count(10, 0.5), 5);
        assert_eq!(target_vertex_count(3, 0.5), 2);
        assert_eq!(target_vertex_count(7, 1.0), 0);
        assert_eq!(target_vertex_count(7, 0.0), 7);
    }

    #[test]
    fn test_empty_mesh() {
        let engine = DecimationEngine::new();
        let result = engine.decimate(&[], &[], &[], 0.5);
        assert!(matches!(result, Err(Error::InvalidInputData(_))));
    }

    #[test]
    fn test_invalid_reduction_ratio() {
        let engine = DecimationEngine::new();
        let mesh = make_tetrahedron();
        assert!(engine.decimate_mesh(&mesh, -0.1).is_err());
        assert!(engine.decimate_mesh(&mesh, 1.5).is_err());
        assert!(engine.decimate_mesh(&mesh, f32::NAN).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_indices() {
        let engine = DecimationEngine::new();
        let mesh = make_tetrahedron();
        let result = engine.decimate(&mesh.vertices, &mesh.normals, &[0, 1, 9], 0.5);
        assert!(matches!(result, Err(Error::InvalidInputData(_))));
    }

    #[test]
    fn test_zero_reduction() {
        let engine = DecimationEngine::new();
        let mesh = make_curved_surface(6);
        let result = engine.decimate_mesh(&mesh, 0.0).unwrap();
        assert_eq!(result, mesh);
    }

    #[test]
    fn test_tetrahedron_full_reduction_terminates() {
        let engine = DecimationEngine::new();
        let result = engine.decimate_mesh(&make_tetrahedron(), 1.0).unwrap();
        assert!(result.vertex_count() >= 1);
        assert_eq!(result.triangle_count(), 0);
        assert_well_formed(&result);
    }

    #[test]
    fn test_planar_grid_reaches_exact_target() {
        // 51 x 101 vertices, 10,000 triangles
        let mesh = make_plane_grid(51, 101, 0.002);
        assert_eq!(mesh.triangle_count(), 10_000);

        let engine = DecimationEngine::new();
        let result = engine.decimate_mesh(&mesh, 0.9).unwrap();

        assert_eq!(result.vertex_count(), target_vertex_count(mesh.vertex_count(), 0.9));
        assert!(result.triangle_count() > 0);
        assert_well_formed(&result);
        assert_relative_eq!(sequential_consistency(&result.normals), 1.0, epsilon = 1e-5);
        for v in &result.vertices {
            assert_relative_eq!(v.z, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_curved_surface_stays_well_formed() {
        let engine = DecimationEngine::new();
        let mesh = make_curved_surface(12);
        for ratio in [0.25, 0.5, 0.75] {
            let result = engine.decimate_mesh(&mesh, ratio).unwrap();
            assert!(result.vertex_count() <= target_vertex_count(mesh.vertex_count(), ratio));
            assert!(result.triangle_count() <= mesh.triangle_count());
            assert_well_formed(&result);
            for n in &result.normals {
                assert_relative_eq!(n.norm(), 1.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_cheapest_collapses_go_first() {
        // Flat 5x5 grid with the centre vertex lifted; flat edges cost
        // nothing so the peak must survive a single collapse.
        let mut mesh = make_plane_grid(5, 5, 1.0);
        mesh.vertices[12].z = 1.0;

        let engine = DecimationEngine::new();
        let result = engine.decimate_mesh(&mesh, 0.05).unwrap();
        assert_eq!(result.vertex_count(), 24);
        assert!(result.vertices.iter().any(|v| (v.z - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_confidences_are_averaged() {
        let mut mesh = make_plane_grid(4, 4, 1.0);
        let confidences: Vec<f32> = (0..16).map(|i| if i % 2 == 0 { 1.0 } else { 0.5 }).collect();
        mesh.confidences = Some(confidences);

        let engine = DecimationEngine::new();
        let result = engine.decimate_mesh(&mesh, 0.5).unwrap();
        let out = result.confidences.as_ref().unwrap();
        assert_eq!(out.len(), result.vertex_count());
        assert!(out.iter().all(|&c| (0.5..=1.0).contains(&c)));
        assert!(out.iter().any(|&c| c < 1.0 && c > 0.5));
    }

    #[test]
    fn test_all_pairs_joins_disconnected_parts() {
        // Two separate triangles; mesh edges can shrink each to a point
        // but never join them
        let vertices = vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
            Point3f::new(0.0, 0.0, 0.001),
            Point3f::new(1.0, 0.0, 0.001),
            Point3f::new(0.0, 1.0, 0.001),
        ];
        let normals = vec![Vector3f::z(); 6];
        let indices = vec![0, 1, 2, 3, 4, 5];

        let edges = DecimationEngine::new()
            .decimate(&vertices, &normals, &indices, 0.9)
            .unwrap();
        assert_eq!(edges.vertex_count(), 2);

        let config = DecimationConfig::default().with_candidates(CandidateStrategy::AllPairs);
        let all_pairs = DecimationEngine::with_config(config)
            .decimate(&vertices, &normals, &indices, 0.9)
            .unwrap();
        assert_eq!(all_pairs.vertex_count(), 1);
        assert_eq!(all_pairs.triangle_count(), 0);
    }

    #[test]
    fn test_all_pairs_limit_falls_back_to_edges() {
        let mesh = make_plane_grid(10, 10, 1.0);
        let config = DecimationConfig::default()
            .with_candidates(CandidateStrategy::AllPairs)
            .with_all_pairs_vertex_limit(50);
        let engine = DecimationEngine::with_config(config);
        assert_eq!(engine.effective_strategy(100), CandidateStrategy::MeshEdges);

        let result = engine.decimate_mesh(&mesh, 0.5).unwrap();
        assert_eq!(result.vertex_count(), 50);
        assert_well_formed(&result);
    }

    #[test]
    fn test_simplifier_trait() {
        let engine = DecimationEngine::new();
        let simplifier: &dyn MeshSimplifier = &engine;
        let mesh = make_curved_surface(8);
        let result = simplifier.simplify(&mesh, 0.5).unwrap();
        assert!(result.vertex_count() <= 32);
    }
}
