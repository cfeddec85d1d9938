//! Mesh decimation for depthmesh
//!
//! This crate reduces reconstructed scan meshes to a vertex budget with
//! greedy quadric error metric edge collapse:
//! - [`Quadric`] plane-distance error matrices
//! - [`DecimationEngine`] cheapest-first pair collapse

pub mod quadric;
pub mod decimation;

pub use quadric::*;
pub use decimation::*;

use depthmesh_core::{MeshData, Result};

/// Simplify a mesh by reducing the number of vertices
pub trait MeshSimplifier {
    /// Simplify mesh with target reduction ratio (0.0 = no reduction, 1.0 = maximum reduction)
    fn simplify(&self, mesh: &MeshData, reduction_ratio: f32) -> Result<MeshData>;
}
