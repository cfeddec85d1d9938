//! Vertex welding for merged triangle soups

use depthmesh_core::{MeshData, Point3f, Vector3f};
use rustc_hash::FxHashMap;
use tracing::debug;

fn position_key(p: &Point3f) -> [u32; 3] {
    [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()]
}

/// Merge vertices with bit-identical positions.
///
/// Welded normals are the renormalized mean of their sources, falling back
/// to the first source normal when the mean vanishes. Confidences are
/// averaged. Triangles that lose a distinct corner are dropped.
pub fn weld_vertices(mesh: &MeshData) -> MeshData {
    let mut lookup: FxHashMap<[u32; 3], u32> = FxHashMap::default();
    let mut remap = Vec::with_capacity(mesh.vertices.len());
    let mut vertices: Vec<Point3f> = Vec::new();
    let mut first_normals: Vec<Vector3f> = Vec::new();
    let mut normal_sums: Vec<Vector3f> = Vec::new();
    let mut confidence_sums: Vec<f32> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();

    for (i, position) in mesh.vertices.iter().enumerate() {
        let normal = mesh.normals[i];
        let id = *lookup.entry(position_key(position)).or_insert_with(|| {
            vertices.push(*position);
            first_normals.push(normal);
            normal_sums.push(Vector3f::zeros());
            confidence_sums.push(0.0);
            counts.push(0);
            (vertices.len() - 1) as u32
        });
        let slot = id as usize;
        normal_sums[slot] += normal;
        if let Some(confidences) = &mesh.confidences {
            confidence_sums[slot] += confidences[i];
        }
        counts[slot] += 1;
        remap.push(id);
    }

    let normals: Vec<Vector3f> = normal_sums
        .iter()
        .zip(&first_normals)
        .map(|(sum, first)| sum.try_normalize(f32::EPSILON).unwrap_or(*first))
        .collect();

    let mut indices = Vec::with_capacity(mesh.indices.len());
    for t in mesh.triangles() {
        let [a, b, c] = t.map(|i| remap[i as usize]);
        if a != b && b != c && a != c {
            indices.extend_from_slice(&[a, b, c]);
        }
    }

    debug!(
        before = mesh.vertices.len(),
        after = vertices.len(),
        dropped_triangles = mesh.triangle_count() - indices.len() / 3,
        "welded vertices"
    );

    let welded = MeshData::from_parts(vertices, normals, indices);
    match &mesh.confidences {
        Some(_) => {
            let confidences = confidence_sums
                .iter()
                .zip(&counts)
                .map(|(sum, &count)| sum / count as f32)
                .collect();
            welded.with_confidences(confidences)
        }
        None => welded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Two triangles of a unit quad as a soup, sharing the diagonal
    fn quad_soup() -> MeshData {
        let p = [
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
        ];
        MeshData::from_parts(p.to_vec(), vec![Vector3f::z(); 6], (0..6).collect())
            .with_confidences(vec![0.6, 0.8, 1.0, 1.0, 0.6, 0.7])
    }

    #[test]
    fn test_shared_corners_are_welded() {
        let welded = weld_vertices(&quad_soup());
        assert_eq!(welded.vertex_count(), 4);
        assert_eq!(welded.indices, vec![0, 1, 2, 0, 2, 3]);
        assert!(welded.validate().is_ok());

        let confidences = welded.confidences.as_ref().unwrap();
        assert_relative_eq!(confidences[0], 0.8);
        assert_relative_eq!(confidences[2], 0.8);
        assert_relative_eq!(confidences[3], 0.7);
    }

    #[test]
    fn test_normals_are_averaged() {
        let mut soup = quad_soup();
        soup.normals[0] = Vector3f::x();
        soup.normals[3] = Vector3f::z();
        let welded = weld_vertices(&soup);
        let expected = Vector3f::new(1.0, 0.0, 1.0).normalize();
        assert_relative_eq!(welded.normals[0], expected, epsilon = 1e-6);
    }

    #[test]
    fn test_opposite_normals_keep_first() {
        let mut soup = quad_soup();
        soup.normals[3] = -Vector3f::z();
        let welded = weld_vertices(&soup);
        assert_eq!(welded.normals[0], Vector3f::z());
    }

    #[test]
    fn test_collapsed_triangles_are_dropped() {
        let p = Point3f::new(0.5, 0.5, 0.5);
        let mesh = MeshData::from_parts(
            vec![p, p, Point3f::new(1.0, 0.0, 0.0)],
            vec![Vector3f::z(); 3],
            vec![0, 1, 2],
        );
        let welded = weld_vertices(&mesh);
        assert_eq!(welded.vertex_count(), 2);
        assert!(welded.indices.is_empty());
        assert!(welded.confidences.is_none());
    }
}
