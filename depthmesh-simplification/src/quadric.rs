//! Quadric error metric
//!
//! A quadric is the symmetric 4x4 matrix `sum(p * p^T)` over the planes
//! `p = [a b c d]` touching a vertex, with `(a, b, c)` the unit plane
//! normal and `d` its signed offset. Evaluating `v^T Q v` at the
//! homogeneous point `v = [x y z 1]` gives the summed squared distance
//! from `v` to those planes.

use depthmesh_core::Point3f;
use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};
use std::ops::{Add, AddAssign};

/// Determinant magnitude at or below which the 3x3 block is singular
pub const SINGULAR_DETERMINANT: f64 = 1e-10;

/// Accumulated squared-distance-to-plane error at a vertex
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadric(Matrix4<f64>);

impl Quadric {
    /// The quadric of no planes
    pub fn zero() -> Self {
        Self(Matrix4::zeros())
    }

    /// Outer product of a plane equation with itself
    pub fn from_plane(plane: &Vector4<f64>) -> Self {
        Self(plane * plane.transpose())
    }

    /// Plane equation of a triangle, `None` when it has no area
    pub fn triangle_plane(v0: &Point3f, v1: &Point3f, v2: &Point3f) -> Option<Vector4<f64>> {
        let p0 = v0.coords.cast::<f64>();
        let e1 = v1.coords.cast::<f64>() - p0;
        let e2 = v2.coords.cast::<f64>() - p0;
        let n = e1.cross(&e2).try_normalize(f64::EPSILON)?;
        let d = -n.dot(&p0);
        Some(Vector4::new(n.x, n.y, n.z, d))
    }

    /// Quadric of a triangle's supporting plane
    pub fn from_triangle(v0: &Point3f, v1: &Point3f, v2: &Point3f) -> Option<Self> {
        Self::triangle_plane(v0, v1, v2).map(|p| Self::from_plane(&p))
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.0
    }

    /// `v^T Q v` at `v = [x y z 1]`
    pub fn evaluate(&self, p: &Vector3<f64>) -> f64 {
        let v = Vector4::new(p.x, p.y, p.z, 1.0);
        (v.transpose() * self.0 * v)[0]
    }

    /// Position minimizing the error, from the upper-left 3x3 block.
    ///
    /// Returns `None` when the block's determinant magnitude is at or
    /// below `epsilon`.
    pub fn optimal_position(&self, epsilon: f64) -> Option<Vector3<f64>> {
        let a: Matrix3<f64> = self.0.fixed_view::<3, 3>(0, 0).into_owned();
        if a.determinant().abs() <= epsilon {
            return None;
        }
        let b: Vector3<f64> = -self.0.fixed_view::<3, 1>(0, 3).into_owned();
        a.try_inverse().map(|inv| inv * b)
    }

    /// Collapse position and cost for merging two vertices under this
    /// (already summed) quadric. Falls back to the midpoint when the
    /// system is singular.
    pub fn collapse_target(&self, a: &Point3f, b: &Point3f, epsilon: f64) -> (Point3f, f64) {
        let position = self.optimal_position(epsilon).unwrap_or_else(|| {
            (a.coords.cast::<f64>() + b.coords.cast::<f64>()) * 0.5
        });
        let cost = self.evaluate(&position).max(0.0);
        (Point3f::from(position.cast::<f32>()), cost)
    }
}

impl Default for Quadric {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add for Quadric {
    type Output = Quadric;

    fn add(self, rhs: Quadric) -> Quadric {
        Quadric(self.0 + rhs.0)
    }
}

impl AddAssign for Quadric {
    fn add_assign(&mut self, rhs: Quadric) {
        self.0 += rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_plane_quadric_measures_squared_distance() {
        let q = Quadric::from_plane(&Vector4::new(0.0, 0.0, 1.0, 0.0));
        assert_relative_eq!(q.evaluate(&Vector3::new(3.0, -2.0, 0.0)), 0.0);
        assert_relative_eq!(q.evaluate(&Vector3::new(0.0, 0.0, 2.0)), 4.0);
    }

    #[test]
    fn test_quadric_is_symmetric() {
        let plane = Vector4::new(0.6, 0.0, 0.8, -1.5);
        let q = Quadric::from_plane(&plane);
        assert_eq!(*q.matrix(), q.matrix().transpose());
    }

    #[test]
    fn test_degenerate_triangle_has_no_plane() {
        let a = Point3f::new(0.0, 0.0, 0.0);
        let b = Point3f::new(1.0, 1.0, 1.0);
        let c = Point3f::new(2.0, 2.0, 2.0);
        assert!(Quadric::from_triangle(&a, &b, &c).is_none());
    }

    #[test]
    fn test_triangle_plane_offset() {
        let plane = Quadric::triangle_plane(
            &Point3f::new(0.0, 0.0, 2.0),
            &Point3f::new(1.0, 0.0, 2.0),
            &Point3f::new(0.0, 1.0, 2.0),
        )
        .unwrap();
        assert_relative_eq!(plane.z, 1.0);
        assert_relative_eq!(plane.w, -2.0);
    }

    #[test]
    fn test_optimal_position_at_plane_intersection() {
        let mut q = Quadric::from_plane(&Vector4::new(1.0, 0.0, 0.0, -1.0));
        q += Quadric::from_plane(&Vector4::new(0.0, 1.0, 0.0, -2.0));
        q += Quadric::from_plane(&Vector4::new(0.0, 0.0, 1.0, -3.0));

        let p = q.optimal_position(SINGULAR_DETERMINANT).unwrap();
        assert_relative_eq!(p, Vector3::new(1.0, 2.0, 3.0), epsilon = 1e-9);
        assert_relative_eq!(q.evaluate(&p), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_singular_system_falls_back_to_midpoint() {
        // Coplanar faces only constrain one direction
        let q = Quadric::from_plane(&Vector4::new(0.0, 0.0, 1.0, 0.0))
            + Quadric::from_plane(&Vector4::new(0.0, 0.0, 1.0, 0.0));
        assert!(q.optimal_position(SINGULAR_DETERMINANT).is_none());

        let (pos, cost) = q.collapse_target(
            &Point3f::new(0.0, 0.0, 0.0),
            &Point3f::new(2.0, 4.0, 0.0),
            SINGULAR_DETERMINANT,
        );
        assert_eq!(pos, Point3f::new(1.0, 2.0, 0.0));
        assert_relative_eq!(cost, 0.0);
    }
}
