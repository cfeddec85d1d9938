//! Error types for depthmesh

use std::sync::Arc;
use thiserror::Error;

use crate::mesh::ProcessedMesh;

/// Main error type for depthmesh operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input data: {0}")]
    InvalidInputData(String),

    #[error("Insufficient features: found {found}, at least {required} required")]
    InsufficientFeatures { found: usize, required: usize },

    #[error("Buffer creation failed: {0}")]
    BufferCreationFailed(String),

    #[error("Command encoding failed: {0}")]
    CommandEncodingFailed(String),

    #[error("Insufficient memory: {available} bytes available, {required} bytes required")]
    InsufficientMemory { available: u64, required: u64 },

    /// Hard validation minimums were not met. The mesh, when one was
    /// produced, is attached for inspection.
    #[error("Mesh quality insufficient: {reason}")]
    QualityInsufficient {
        reason: QualityShortfall,
        mesh: Option<Arc<ProcessedMesh>>,
    },

    #[error("Processing failed during {operation}: {reason}")]
    ProcessingFailed { operation: String, reason: String },

    #[error("Processing cancelled before all chunks were submitted")]
    Cancelled,

    #[error("GPU error: {0}")]
    Gpu(String),
}

impl Error {
    /// The mesh attached to a `QualityInsufficient` rejection, if any
    pub fn rejected_mesh(&self) -> Option<&Arc<ProcessedMesh>> {
        match self {
            Error::QualityInsufficient { mesh, .. } => mesh.as_ref(),
            _ => None,
        }
    }
}

/// Reason a mesh failed the hard validation minimums
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityShortfall {
    #[error("{found} vertices, at least {required} required")]
    TooFewVertices { found: usize, required: usize },

    #[error("{found} triangles, at least {required} required")]
    TooFewTriangles { found: usize, required: usize },

    #[error("mean confidence {found:.3} is below {required:.3}")]
    LowConfidence { found: f32, required: f32 },
}

/// Result type alias for depthmesh operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(feature = "gpu")]
impl From<wgpu::BufferAsyncError> for Error {
    fn from(e: wgpu::BufferAsyncError) -> Self {
        Error::Gpu(e.to_string())
    }
}
