//! Delta mush deformation for skinned triangle meshes.
//!
//! Each frame the skin-blended mesh is smoothed with an iterative
//! neighbor-averaging filter, then a precomputed rest-pose "delta" (rest
//! geometry minus its own smoothed version) is re-added to recover the detail
//! the smoothing removed. This removes candy-wrapper twisting and joint volume
//! loss without corrective shapes.
//!
//! # Architecture
//!
//! ## Key Components
//!
//! - **Adjacency**: fixed-width neighbor graph built once from topology, with a
//!   pluggable cache store
//! - **Smoothing**: uniform and distance-weighted Laplacian filters over the graph
//! - **Delta**: rest-pose residuals keyed by iteration count and filter
//! - **Skinning**: bone matrix blending applied to surface and delta vectors
//! - **Deformer**: per-frame state machine (blend → smooth → reapply deltas)
//! - **Parallel**: the same frame restated as per-vertex kernels over
//!   ping-pong buffers
//!
//! Mesh topology is static; the graph and deltas are long-lived caches and the
//! deformed output is rebuilt from scratch every frame.

pub mod adjacency;
pub mod delta;
pub mod deformer;
pub mod error;
pub mod mesh;
pub mod parallel;
pub mod skinning;
pub mod smoothing;

#[cfg(test)]
pub(crate) mod test_meshes;

pub use adjacency::{
    AdjacencyGraph, AdjacencyStore, JsonFileAdjacencyStore, MemoryAdjacencyStore,
    build_adjacency, load_or_build,
};
pub use delta::{DeltaBuffers, DeltaPass, compute_deltas};
pub use deformer::{DeformStage, FrameDeformer};
pub use error::{DeltaMushError, Result};
pub use mesh::{Aabb, BoneWeight, DeformedMesh, SkinnedMesh, bone_matrices};
pub use parallel::{PackedVertex, ParallelDispatchPipeline};
pub use skinning::{BoneWeightField, SkinBlender, blend_matrix};
pub use smoothing::{LaplacianFilter, smooth_iterations};

pub use deltamush_config::{
    AdjacencySettings, Backend, ConfigError, DeltaMushSettings, FilterKind, NeighborOverflow,
    SkinQuality,
};
