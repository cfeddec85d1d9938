//! Core data structures and traits for depthmesh
//!
//! This crate provides the fundamental types shared by the scan-to-mesh
//! engine: depth samples and point clouds, the serialized scan record,
//! working and processed meshes, quality tiers and the error taxonomy.

pub mod point;
pub mod point_cloud;
pub mod mesh;
pub mod traits;
pub mod error;

pub use point::*;
pub use point_cloud::*;
pub use mesh::*;
pub use traits::*;
pub use error::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Matrix3, Matrix4, Point3, Vector3, Vector4};
