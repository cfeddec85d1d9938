//! Mesh data structures and functionality

use crate::error::{Error, Result};
use crate::point::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse fitness tier of a mesh, ordered from worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshQuality {
    Poor,
    Acceptable,
    Good,
    Excellent,
}

impl fmt::Display for MeshQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeshQuality::Poor => "poor",
            MeshQuality::Acceptable => "acceptable",
            MeshQuality::Good => "good",
            MeshQuality::Excellent => "excellent",
        };
        f.write_str(name)
    }
}

/// Mutable indexed triangle mesh used between processing stages.
///
/// `vertices` and `normals` are index-aligned; `indices` holds one `u32`
/// per triangle corner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub vertices: Vec<Point3f>,
    pub normals: Vec<Vector3f>,
    pub indices: Vec<u32>,
    /// Per-vertex capture confidence, when the source carried it
    pub confidences: Option<Vec<f32>>,
}

impl MeshData {
    /// Create a new empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mesh from parallel vertex/normal arrays and an index buffer
    pub fn from_parts(vertices: Vec<Point3f>, normals: Vec<Vector3f>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            normals,
            indices,
            confidences: None,
        }
    }

    /// Attach per-vertex confidences
    pub fn with_confidences(mut self, confidences: Vec<f32>) -> Self {
        self.confidences = Some(confidences);
        self
    }

    /// Get the number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Get the number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Check if the mesh has no vertices or no triangles
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }

    /// Iterate triangles as index triples
    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]])
    }

    /// Check the layout invariants: aligned attribute arrays, whole
    /// triangles and in-range indices.
    pub fn validate(&self) -> Result<()> {
        if self.vertices.len() != self.normals.len() {
            return Err(Error::InvalidInputData(format!(
                "{} vertices but {} normals",
                self.vertices.len(),
                self.normals.len()
            )));
        }
        if let Some(confidences) = &self.confidences {
            if confidences.len() != self.vertices.len() {
                return Err(Error::InvalidInputData(format!(
                    "{} vertices but {} confidences",
                    self.vertices.len(),
                    confidences.len()
                )));
            }
        }
        if self.indices.len() % 3 != 0 {
            return Err(Error::InvalidInputData(format!(
                "index buffer length {} is not divisible by 3",
                self.indices.len()
            )));
        }
        let n = self.vertices.len();
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= n) {
            return Err(Error::InvalidInputData(format!(
                "index {} out of range for {} vertices",
                bad, n
            )));
        }
        Ok(())
    }

    /// Unit normal of a triangle, `None` when it has no area
    pub fn face_normal(&self, triangle: [u32; 3]) -> Option<Vector3f> {
        let v0 = self.vertices[triangle[0] as usize];
        let v1 = self.vertices[triangle[1] as usize];
        let v2 = self.vertices[triangle[2] as usize];
        (v1 - v0).cross(&(v2 - v0)).try_normalize(f32::EPSILON)
    }

    /// Mean per-vertex confidence, when confidences are present
    pub fn mean_confidence(&self) -> Option<f32> {
        let confidences = self.confidences.as_ref()?;
        if confidences.is_empty() {
            return None;
        }
        Some(confidences.iter().sum::<f32>() / confidences.len() as f32)
    }

    /// Bytes held by the attribute and index arrays
    pub fn size_bytes(&self) -> usize {
        self.vertices.len() * std::mem::size_of::<Point3f>()
            + self.normals.len() * std::mem::size_of::<Vector3f>()
            + self.indices.len() * std::mem::size_of::<u32>()
            + self
                .confidences
                .as_ref()
                .map_or(0, |c| c.len() * std::mem::size_of::<f32>())
    }
}

/// Terminal, read-only result of one processing run.
///
/// Shared with downstream consumers behind an `Arc`; there is no way to
/// mutate it after construction.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProcessedMesh {
    vertices: Vec<Point3f>,
    normals: Vec<Vector3f>,
    indices: Vec<u32>,
    confidences: Option<Vec<f32>>,
    quality: MeshQuality,
}

impl ProcessedMesh {
    /// Freeze processed mesh buffers together with their quality tier
    pub fn new(mesh: MeshData, quality: MeshQuality) -> Self {
        Self {
            vertices: mesh.vertices,
            normals: mesh.normals,
            indices: mesh.indices,
            confidences: mesh.confidences,
            quality,
        }
    }

    pub fn vertices(&self) -> &[Point3f] {
        &self.vertices
    }

    pub fn normals(&self) -> &[Vector3f] {
        &self.normals
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn confidences(&self) -> Option<&[f32]> {
        self.confidences.as_deref()
    }

    pub fn quality(&self) -> MeshQuality {
        self.quality
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Copy the buffers out into a mutable working mesh
    pub fn to_mesh_data(&self) -> MeshData {
        MeshData {
            vertices: self.vertices.clone(),
            normals: self.normals.clone(),
            indices: self.indices.clone(),
            confidences: self.confidences.clone(),
        }
    }

    /// Approximate heap footprint, used for cache accounting
    pub fn size_bytes(&self) -> usize {
        self.vertices.len() * std::mem::size_of::<Point3f>()
            + self.normals.len() * std::mem::size_of::<Vector3f>()
            + self.indices.len() * std::mem::size_of::<u32>()
            + self
                .confidences
                .as_ref()
                .map_or(0, |c| c.len() * std::mem::size_of::<f32>())
    }
}

impl fmt::Debug for ProcessedMesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessedMesh")
            .field("vertices", &self.vertices.len())
            .field("triangles", &self.triangle_count())
            .field("has_confidences", &self.confidences.is_some())
            .field("quality", &self.quality)
            .finish()
    }
}
