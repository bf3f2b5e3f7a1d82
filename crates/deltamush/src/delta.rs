//! Rest-pose residuals that restore detail after per-frame smoothing.

use deltamush_config::{DeltaMushSettings, FilterKind};
use glam::Vec3;
use tracing::debug;

use crate::adjacency::AdjacencyGraph;
use crate::error::{Result, ensure_len};
use crate::smoothing::smooth_iterations;

/// `rest - smooth^N(rest)` for positions and normals, tagged with the
/// parameters that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaBuffers {
    pub delta_v: Vec<Vec3>,
    pub delta_n: Vec<Vec3>,
    iterations: u32,
    filter: FilterKind,
}

impl DeltaBuffers {
    /// Compute both deltas from rest-pose positions and normals.
    pub fn compute(
        positions: &[Vec3],
        normals: &[Vec3],
        graph: &AdjacencyGraph,
        filter: FilterKind,
        iterations: u32,
    ) -> Result<Self> {
        debug!(
            "DeltaBuffers::compute: {} vertices, {} iterations, {:?}",
            positions.len(),
            iterations,
            filter
        );
        Ok(Self {
            delta_v: compute_deltas(positions, graph, filter, iterations)?,
            delta_n: compute_deltas(normals, graph, filter, iterations)?,
            iterations,
            filter,
        })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn filter(&self) -> FilterKind {
        self.filter
    }

    /// Whether these deltas are valid for the given settings.
    ///
    /// Zero-iteration deltas are all zero whatever the filter.
    pub fn matches(&self, iterations: u32, filter: FilterKind) -> bool {
        self.iterations == iterations && (iterations == 0 || self.filter == filter)
    }

    /// Zero deltas, valid for zero iterations under any filter.
    pub fn zeroed(vertex_count: usize) -> Self {
        Self {
            delta_v: vec![Vec3::ZERO; vertex_count],
            delta_n: vec![Vec3::ZERO; vertex_count],
            iterations: 0,
            filter: FilterKind::default(),
        }
    }
}

/// Which bone-space deltas are re-added to the smoothed surface.
///
/// Both backends reapply deltas through [`DeltaPass::apply`], as a loop or
/// fused into the last smoothing kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeltaPass {
    pub position: bool,
    pub normal: bool,
    /// Normalize the normal after its delta is added
    pub renormalize: bool,
}

impl DeltaPass {
    pub fn for_settings(settings: &DeltaMushSettings) -> Self {
        let smooths = settings.smooths();
        Self {
            position: smooths && !settings.smooth_only,
            normal: smooths && settings.deform_normals,
            renormalize: settings.renormalize_normals,
        }
    }

    /// Whether the pass changes anything.
    pub fn is_noop(&self) -> bool {
        !self.position && !self.normal
    }

    pub fn apply(&self, position: Vec3, normal: Vec3, delta_v: Vec3, delta_n: Vec3) -> (Vec3, Vec3) {
        let position = if self.position { position + delta_v } else { position };
        let normal = if self.normal {
            let normal = normal + delta_n;
            if self.renormalize { normal.normalize_or_zero() } else { normal }
        } else {
            normal
        };
        (position, normal)
    }
}

/// Residual between a field and its `iterations`-times smoothed version.
///
/// Zero iterations yields all-zero deltas without running the filter.
pub fn compute_deltas(
    field: &[Vec3],
    graph: &AdjacencyGraph,
    filter: FilterKind,
    iterations: u32,
) -> Result<Vec<Vec3>> {
    if iterations == 0 {
        ensure_len("delta field", graph.vertex_count(), field.len())?;
        return Ok(vec![Vec3::ZERO; field.len()]);
    }

    let smoothed = smooth_iterations(&filter, field, graph, iterations)?;
    Ok(field
        .iter()
        .zip(&smoothed)
        .map(|(original, smoothed)| *original - *smoothed)
        .collect())
}
