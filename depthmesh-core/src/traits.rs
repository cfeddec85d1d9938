//! Core traits for depthmesh

use crate::{mesh::*, point::*, point_cloud::*};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3f,
    pub max: Point3f,
}

impl Aabb {
    /// Bounding box of a set of points, `None` when the set is empty
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Point3f>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut min = first;
        let mut max = first;

        for p in iter {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);

            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        Some(Self { min, max })
    }

    /// Per-axis size
    pub fn extent(&self) -> Vector3f {
        self.max - self.min
    }

    /// Product of the three axis extents
    pub fn volume(&self) -> f32 {
        let e = self.extent();
        e.x * e.y * e.z
    }

    /// Span along the dominant axis
    pub fn max_extent(&self) -> f32 {
        self.extent().max()
    }

    pub fn center(&self) -> Point3f {
        nalgebra::center(&self.min, &self.max)
    }
}

/// Objects with spatial extent
pub trait Bounded {
    /// Get the bounding box of the object, `None` if it has no points
    fn bounding_box(&self) -> Option<Aabb>;

    /// Get the center point of the object
    fn center(&self) -> Option<Point3f> {
        self.bounding_box().map(|b| b.center())
    }
}

impl Bounded for [Point3f] {
    fn bounding_box(&self) -> Option<Aabb> {
        Aabb::from_points(self.iter().copied())
    }
}

impl Bounded for ScanPointCloud {
    fn bounding_box(&self) -> Option<Aabb> {
        Aabb::from_points(self.positions())
    }
}

impl Bounded for MeshData {
    fn bounding_box(&self) -> Option<Aabb> {
        self.vertices.bounding_box()
    }
}

impl Bounded for ProcessedMesh {
    fn bounding_box(&self) -> Option<Aabb> {
        self.vertices().bounding_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_aabb_volume_and_extent() {
        let points = [
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(0.3, 0.1, 0.0),
            Point3f::new(0.1, 0.2, 0.05),
        ];
        let bbox = points.bounding_box().unwrap();
        assert_relative_eq!(bbox.max_extent(), 0.3);
        assert_relative_eq!(bbox.volume(), 0.3 * 0.2 * 0.05, epsilon = 1e-7);
        assert_relative_eq!(bbox.center().y, 0.1);
    }

    #[test]
    fn test_empty_has_no_bounds() {
        let empty: [Point3f; 0] = [];
        assert!(empty.bounding_box().is_none());
        assert!(ScanPointCloud::new().center().is_none());
    }

    #[test]
    fn test_scan_cloud_bounds_use_positions() {
        let cloud = ScanPointCloud::from_samples(vec![
            ConfidentPoint3f::new(Point3f::new(-1.0, 0.0, 0.0), 0.9),
            ConfidentPoint3f::new(Point3f::new(1.0, 2.0, 0.0), 0.9),
        ]);
        let bbox = cloud.bounding_box().unwrap();
        assert_eq!(bbox.min, Point3f::new(-1.0, 0.0, 0.0));
        assert_eq!(bbox.max, Point3f::new(1.0, 2.0, 0.0));
    }
}
