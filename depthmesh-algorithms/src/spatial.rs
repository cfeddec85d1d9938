//! Duplicate-point search structures
//!
//! Both indices answer the same question with the same comparison: is
//! any indexed point strictly closer than the threshold to a query. The
//! grid hashes points into cells one threshold wide, so every candidate
//! neighbour lies in the 27 cells around the query's cell.

use depthmesh_core::Point3f;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Index over retained points answering "is there a point within the
/// duplicate distance of this one"
pub trait DuplicateIndex: Send + Sync {
    /// Whether an indexed point lies strictly closer than the threshold
    fn has_duplicate(&self, query: &Point3f) -> bool;

    /// Add a retained point
    fn insert(&mut self, point: Point3f);

    /// Replace the indexed set with `points`
    fn rebuild(&mut self, points: &[Point3f]);

    /// Number of indexed points
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self) {
        self.rebuild(&[]);
    }
}

/// Strategy used by the accumulator for duplicate rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DuplicateSearch {
    /// Scan every retained point in insertion order
    Linear,
    /// Uniform hash grid with cells one threshold wide
    #[default]
    Grid,
}

impl DuplicateSearch {
    /// Create an empty index for this strategy
    pub fn build(self, threshold: f32) -> Box<dyn DuplicateIndex> {
        match self {
            DuplicateSearch::Linear => Box::new(LinearScan::new(threshold)),
            DuplicateSearch::Grid => Box::new(UniformGrid::new(threshold)),
        }
    }
}

#[inline]
fn within(a: &Point3f, b: &Point3f, threshold_sq: f32) -> bool {
    (a - b).norm_squared() < threshold_sq
}

/// Brute force duplicate search for small point sets
#[derive(Debug, Clone)]
pub struct LinearScan {
    points: Vec<Point3f>,
    threshold_sq: f32,
}

impl LinearScan {
    pub fn new(threshold: f32) -> Self {
        Self {
            points: Vec::new(),
            threshold_sq: threshold * threshold,
        }
    }
}

impl DuplicateIndex for LinearScan {
    fn has_duplicate(&self, query: &Point3f) -> bool {
        self.points.iter().any(|p| within(p, query, self.threshold_sq))
    }

    fn insert(&mut self, point: Point3f) {
        self.points.push(point);
    }

    fn rebuild(&mut self, points: &[Point3f]) {
        self.points.clear();
        self.points.extend_from_slice(points);
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}

type CellKey = [i64; 3];

/// Spatial hash over cubic cells of the duplicate distance
#[derive(Debug, Clone)]
pub struct UniformGrid {
    cell_size: f64,
    threshold_sq: f32,
    cells: FxHashMap<CellKey, Vec<Point3f>>,
    len: usize,
}

impl UniformGrid {
    pub fn new(threshold: f32) -> Self {
        let cell_size = if threshold > 0.0 { f64::from(threshold) } else { 1.0 };
        Self {
            cell_size,
            threshold_sq: threshold * threshold,
            cells: FxHashMap::default(),
            len: 0,
        }
    }

    fn key(&self, p: &Point3f) -> CellKey {
        [
            (f64::from(p.x) / self.cell_size).floor() as i64,
            (f64::from(p.y) / self.cell_size).floor() as i64,
            (f64::from(p.z) / self.cell_size).floor() as i64,
        ]
    }

    /// Number of occupied cells
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

impl DuplicateIndex for UniformGrid {
    fn has_duplicate(&self, query: &Point3f) -> bool {
        if self.threshold_sq <= 0.0 {
            return false;
        }
        let [cx, cy, cz] = self.key(query);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let key = [cx.saturating_add(dx), cy.saturating_add(dy), cz.saturating_add(dz)];
                    if let Some(bucket) = self.cells.get(&key) {
                        if bucket.iter().any(|p| within(p, query, self.threshold_sq)) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    fn insert(&mut self, point: Point3f) {
        let key = self.key(&point);
        self.cells.entry(key).or_default().push(point);
        self.len += 1;
    }

    fn rebuild(&mut self, points: &[Point3f]) {
        self.cells.clear();
        self.len = 0;
        for p in points {
            self.insert(*p);
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(search: DuplicateSearch, points: &[Point3f]) -> Box<dyn DuplicateIndex> {
        let mut index = search.build(0.005);
        index.rebuild(points);
        index
    }

    #[test]
    fn test_threshold_is_strict() {
        let points = [Point3f::new(0.0, 0.0, 0.0)];
        for search in [DuplicateSearch::Linear, DuplicateSearch::Grid] {
            let index = filled(search, &points);
            assert!(index.has_duplicate(&Point3f::new(0.004, 0.0, 0.0)));
            assert!(!index.has_duplicate(&Point3f::new(0.006, 0.0, 0.0)));
            assert!(!index.has_duplicate(&Point3f::new(0.004, 0.004, 0.0)));
        }
    }

    #[test]
    fn test_grid_finds_neighbours_across_cells() {
        // Straddles the cell boundary at x = 0.005 and at the origin
        let index = filled(DuplicateSearch::Grid, &[Point3f::new(0.0049, -0.0001, 0.0)]);
        assert!(index.has_duplicate(&Point3f::new(0.0051, 0.0001, 0.0)));
        assert!(index.has_duplicate(&Point3f::new(0.0049, -0.0001, -0.0001)));
    }

    #[test]
    fn test_grid_matches_linear_scan() {
        let stored: Vec<Point3f> = (0..200)
            .map(|i| {
                let t = i as f32 * 0.37;
                Point3f::new(t.sin() * 0.05, t.cos() * 0.05, (t * 0.5).sin() * 0.05)
            })
            .collect();
        let linear = filled(DuplicateSearch::Linear, &stored);
        let grid = filled(DuplicateSearch::Grid, &stored);

        for i in 0..500 {
            let t = i as f32 * 0.113;
            let q = Point3f::new((t * 1.3).sin() * 0.05, (t * 0.7).cos() * 0.05, t.sin() * 0.05);
            assert_eq!(linear.has_duplicate(&q), grid.has_duplicate(&q), "query {:?}", q);
        }
    }

    #[test]
    fn test_rebuild_and_clear() {
        let mut grid = UniformGrid::new(0.005);
        grid.insert(Point3f::new(1.0, 1.0, 1.0));
        grid.insert(Point3f::new(-1.0, 1.0, 1.0));
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.cell_count(), 2);

        grid.rebuild(&[Point3f::new(0.0, 0.0, 0.0)]);
        assert_eq!(grid.len(), 1);
        assert!(!grid.has_duplicate(&Point3f::new(1.0, 1.0, 1.0)));

        grid.clear();
        assert!(grid.is_empty());
    }

    #[test]
    fn test_zero_threshold_never_rejects() {
        let mut grid = UniformGrid::new(0.0);
        grid.insert(Point3f::origin());
        assert!(!grid.has_duplicate(&Point3f::origin()));
    }
}
