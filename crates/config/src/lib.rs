//! Shared settings for delta mush deformation
//!
//! This crate provides the single source of truth for the per-frame deformer
//! settings (iteration count, filter choice, toggles) and the one-time
//! adjacency discovery settings, shared by the sequential and parallel
//! backends and by any host engine integration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "bevy")]
use bevy::prelude::Resource;

/// Default number of smoothing iterations
pub const DEFAULT_ITERATIONS: u32 = 10;

/// Default neighbor slots per vertex in the adjacency graph
pub const DEFAULT_MAX_NEIGHBORS: usize = 16;

/// Default squared distance under which two vertices count as coincident
pub const DEFAULT_MIN_SQR_DISTANCE: f32 = 1e-8;

/// Default number of vertices per parallel dispatch group
pub const DEFAULT_WORKGROUP_SIZE: usize = 64;

/// Errors raised when settings are out of range.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("max_neighbors must be at least 1")]
    ZeroNeighbors,
    #[error("min_sqr_distance must be finite and non-negative, got {0}")]
    InvalidTolerance(f32),
    #[error("workgroup_size must be at least 1")]
    ZeroWorkgroup,
}

/// Which neighbor-averaging filter smooths the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Arithmetic mean of neighbor values
    Uniform,
    /// Neighbors weighted by inverse distance, normalized to sum 1
    #[default]
    DistanceWeighted,
}

/// How many bone influences are blended per vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkinQuality {
    /// First influence only
    Bone1,
    /// First two influences, weighted `w0` and `1 - w0`
    Bone2,
    /// All four influences
    #[default]
    Bone4,
}

/// Which execution path runs the per-frame stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Whole-array loops, one stage after another
    Sequential,
    /// Per-vertex kernels over double-buffered storage
    #[default]
    Parallel,
}

/// What adjacency discovery does when a vertex has more neighbors than slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborOverflow {
    /// Keep the first `max_neighbors` in discovery order and log a warning
    #[default]
    Truncate,
    /// Fail the build
    Error,
}

/// Settings for building the vertex adjacency graph.
///
/// Changing these requires rebuilding the graph; they are not read per frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjacencySettings {
    /// Neighbor slots per vertex
    pub max_neighbors: usize,
    /// Squared distance under which vertices are merged (seam welding)
    pub min_sqr_distance: f32,
    /// Behavior on rows with more neighbors than slots
    pub overflow: NeighborOverflow,
}

impl Default for AdjacencySettings {
    fn default() -> Self {
        Self {
            max_neighbors: DEFAULT_MAX_NEIGHBORS,
            min_sqr_distance: DEFAULT_MIN_SQR_DISTANCE,
            overflow: NeighborOverflow::default(),
        }
    }
}

impl AdjacencySettings {
    /// Create settings with the given slot count and default tolerance
    pub fn with_max_neighbors(max_neighbors: usize) -> Self {
        Self {
            max_neighbors,
            ..Self::default()
        }
    }

    /// Check that the settings describe a buildable graph
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_neighbors == 0 {
            return Err(ConfigError::ZeroNeighbors);
        }
        if !self.min_sqr_distance.is_finite() || self.min_sqr_distance < 0.0 {
            return Err(ConfigError::InvalidTolerance(self.min_sqr_distance));
        }
        Ok(())
    }
}

/// Per-frame deformer settings.
///
/// The deformer compares `iterations` and `filter` against the values its
/// cached deltas were built with and rebuilds them on mismatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "bevy", derive(Resource))]
#[serde(default)]
pub struct DeltaMushSettings {
    /// Smoothing iterations per frame
    pub iterations: u32,
    /// Smoothing filter
    pub filter: FilterKind,
    /// Smooth normals and re-add normal deltas
    pub deform_normals: bool,
    /// Skip re-adding position deltas (shows the raw smoothed surface)
    pub smooth_only: bool,
    /// Blend with smoothed per-bone weights instead of the 4-slot records
    pub use_prefiltered_weights: bool,
    /// Normalize output normals after the normal delta is re-added
    pub renormalize_normals: bool,
    /// Bone influences blended per vertex
    pub skin_quality: SkinQuality,
    /// Execution path
    pub backend: Backend,
    /// Vertices per dispatch group on the parallel backend
    pub workgroup_size: usize,
}

impl Default for DeltaMushSettings {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            filter: FilterKind::default(),
            deform_normals: true,
            smooth_only: false,
            use_prefiltered_weights: false,
            renormalize_normals: false,
            skin_quality: SkinQuality::default(),
            backend: Backend::default(),
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
        }
    }
}

impl DeltaMushSettings {
    /// Create default settings with the given iteration count
    pub fn with_iterations(iterations: u32) -> Self {
        Self {
            iterations,
            ..Self::default()
        }
    }

    /// Check that the settings can drive a frame
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workgroup_size == 0 {
            return Err(ConfigError::ZeroWorkgroup);
        }
        Ok(())
    }

    /// Whether smoothing runs at all this frame
    pub fn smooths(&self) -> bool {
        self.iterations > 0
    }
}
