//! Error types for delta mush operations.

use deltamush_config::ConfigError;

/// Errors that can occur while building caches or deforming a frame.
///
/// Every variant is a caller-side precondition failure or a cache I/O
/// failure; a frame that returns one of these leaves the previous output
/// untouched.
#[derive(Debug, thiserror::Error)]
pub enum DeltaMushError {
    #[error("{what} has {actual} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Index list length {0} is not a multiple of 3")]
    MalformedTriangles(usize),

    #[error("Triangle {triangle} references vertex {index} but the mesh has {vertex_count} vertices")]
    TriangleIndexOutOfRange {
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },

    #[error("Vertex {vertex} references bone {bone} but only {bone_count} bones are bound")]
    BoneIndexOutOfRange {
        vertex: usize,
        bone: u32,
        bone_count: usize,
    },

    #[error("Vertex {vertex} has {found} neighbors, more than the {capacity} slots available")]
    NeighborOverflow {
        vertex: usize,
        found: usize,
        capacity: usize,
    },

    #[error("Invalid adjacency data: {0}")]
    CacheShape(String),

    #[error("Invalid settings: {0}")]
    Config(#[from] ConfigError),

    #[error("Adjacency cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize adjacency cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result alias for delta mush operations.
pub type Result<T> = std::result::Result<T, DeltaMushError>;

/// Fail with [`DeltaMushError::LengthMismatch`] unless `actual == expected`.
pub(crate) fn ensure_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(DeltaMushError::LengthMismatch {
            what,
            expected,
            actual,
        })
    }
}
