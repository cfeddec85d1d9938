//! Point types and the serialized scan record

use bytemuck::{Pod, Zeroable};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A 3D point with floating point coordinates
pub type Point3f = Point3<f32>;

/// A 3D vector with floating point components
pub type Vector3f = Vector3<f32>;

/// A depth sample with the sensor's confidence in it (0 to 1)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct ConfidentPoint3f {
    pub position: Point3f,
    pub confidence: f32,
}

unsafe impl Pod for ConfidentPoint3f {}
unsafe impl Zeroable for ConfidentPoint3f {}

impl ConfidentPoint3f {
    pub fn new(position: Point3f, confidence: f32) -> Self {
        Self {
            position,
            confidence,
        }
    }
}

impl Default for ConfidentPoint3f {
    fn default() -> Self {
        Self {
            position: Point3f::origin(),
            confidence: 1.0,
        }
    }
}

/// One record of serialized scan data.
///
/// Records are packed without padding (28 bytes) in native byte order.
/// Every three consecutive records describe one triangle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct ScanVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub confidence: f32,
}

/// Size in bytes of one serialized [`ScanVertex`]
pub const SCAN_VERTEX_STRIDE: usize = std::mem::size_of::<ScanVertex>();

/// Size in bytes of one serialized triangle (three records)
pub const SCAN_TRIANGLE_STRIDE: usize = SCAN_VERTEX_STRIDE * 3;

impl ScanVertex {
    pub fn new(position: Point3f, normal: Vector3f, confidence: f32) -> Self {
        Self {
            position: [position.x, position.y, position.z],
            normal: [normal.x, normal.y, normal.z],
            confidence,
        }
    }

    pub fn position(&self) -> Point3f {
        Point3f::new(self.position[0], self.position[1], self.position[2])
    }

    pub fn normal(&self) -> Vector3f {
        Vector3f::new(self.normal[0], self.normal[1], self.normal[2])
    }
}

/// Serialize scan records into the byte layout consumed by mesh processing
pub fn encode_scan_records(records: &[ScanVertex]) -> Vec<u8> {
    bytemuck::cast_slice(records).to_vec()
}

/// Decode a byte range of whole scan records.
///
/// The input does not need to be aligned.
pub fn decode_scan_records(bytes: &[u8]) -> Result<Vec<ScanVertex>> {
    if bytes.len() % SCAN_VERTEX_STRIDE != 0 {
        return Err(Error::InvalidInputData(format!(
            "{} bytes is not a whole number of {}-byte scan records",
            bytes.len(),
            SCAN_VERTEX_STRIDE
        )));
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}
