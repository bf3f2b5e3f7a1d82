//! Laplacian smoothing over the adjacency graph.
//!
//! Both filters map a per-vertex field to a new field of the same length and
//! never touch their input, so iterating is a matter of feeding one pass's
//! output to the next. Sentinel slots are skipped for both the sum and the
//! normalization, and a vertex without valid neighbors keeps its value.

use deltamush_config::FilterKind;
use glam::Vec3;

use crate::adjacency::AdjacencyGraph;
use crate::error::{Result, ensure_len};

/// Lower bound on neighbor distance for the distance-weighted filter.
pub const DISTANCE_EPSILON: f32 = 1e-6;

/// One iteration of neighbor averaging.
///
/// Implementors only choose the raw weight of a neighbor; normalization and
/// sentinel handling are shared.
pub trait LaplacianFilter {
    /// Unnormalized weight of `neighbor` as seen from `center`.
    fn neighbor_weight(&self, center: Vec3, neighbor: Vec3) -> f32;

    /// Normalized weights of the valid neighbors of `vertex`, in row order.
    ///
    /// Distances are measured on `metric`. Empty for an isolated vertex.
    fn neighbor_weights(&self, vertex: usize, metric: &[Vec3], graph: &AdjacencyGraph) -> Vec<f32> {
        let center = metric[vertex];
        let raw: Vec<f32> = graph
            .neighbors(vertex)
            .map(|n| self.neighbor_weight(center, metric[n]))
            .collect();
        let total: f32 = raw.iter().sum();
        if total <= 0.0 {
            return Vec::new();
        }
        raw.into_iter().map(|w| w / total).collect()
    }

    /// Smoothed value of a single vertex, reading the field through `value`.
    ///
    /// Lets interleaved buffers be smoothed one component at a time.
    fn smooth_vertex_by(
        &self,
        vertex: usize,
        graph: &AdjacencyGraph,
        value: &dyn Fn(usize) -> Vec3,
    ) -> Vec3 {
        let center = value(vertex);
        let mut sum = Vec3::ZERO;
        let mut total = 0.0;
        for n in graph.neighbors(vertex) {
            let neighbor = value(n);
            let w = self.neighbor_weight(center, neighbor);
            sum += neighbor * w;
            total += w;
        }
        if total > 0.0 { sum / total } else { center }
    }

    /// Smoothed value of a single vertex, measuring distances on the field.
    fn smooth_vertex(&self, vertex: usize, field: &[Vec3], graph: &AdjacencyGraph) -> Vec3 {
        self.smooth_vertex_by(vertex, graph, &|i| field[i])
    }

    /// Write one smoothing pass of `field` into `out`.
    ///
    /// Both slices must hold one entry per graph vertex.
    fn smooth_into(&self, field: &[Vec3], graph: &AdjacencyGraph, out: &mut [Vec3]) -> Result<()> {
        ensure_len("smoothing field", graph.vertex_count(), field.len())?;
        ensure_len("smoothing output", field.len(), out.len())?;
        for (vertex, value) in out.iter_mut().enumerate() {
            *value = self.smooth_vertex(vertex, field, graph);
        }
        Ok(())
    }

    /// One smoothing pass into a fresh buffer.
    fn smooth(&self, field: &[Vec3], graph: &AdjacencyGraph) -> Result<Vec<Vec3>> {
        let mut out = vec![Vec3::ZERO; field.len()];
        self.smooth_into(field, graph, &mut out)?;
        Ok(out)
    }

    /// One smoothing pass over `width` scalars per vertex (row-major).
    ///
    /// Used for per-bone weight vectors. Distances come from `metric`, since
    /// the rows themselves have no geometric meaning.
    fn smooth_rows(
        &self,
        rows: &[f32],
        width: usize,
        metric: &[Vec3],
        graph: &AdjacencyGraph,
    ) -> Result<Vec<f32>> {
        ensure_len("weight rows", graph.vertex_count() * width, rows.len())?;
        ensure_len("row metric", graph.vertex_count(), metric.len())?;

        let mut out = rows.to_vec();
        for vertex in 0..graph.vertex_count() {
            let weights = self.neighbor_weights(vertex, metric, graph);
            if weights.is_empty() {
                continue;
            }
            let target = &mut out[vertex * width..(vertex + 1) * width];
            target.fill(0.0);
            for (n, w) in graph.neighbors(vertex).zip(weights) {
                let source = &rows[n * width..(n + 1) * width];
                for (t, s) in target.iter_mut().zip(source) {
                    *t += s * w;
                }
            }
        }
        Ok(out)
    }
}

impl LaplacianFilter for FilterKind {
    fn neighbor_weight(&self, center: Vec3, neighbor: Vec3) -> f32 {
        match self {
            FilterKind::Uniform => 1.0,
            FilterKind::DistanceWeighted => 1.0 / center.distance(neighbor).max(DISTANCE_EPSILON),
        }
    }
}

/// Run `iterations` smoothing passes starting from `field`.
///
/// Two buffers alternate so each pass reads the complete previous one.
/// Zero iterations returns a copy of the input.
pub fn smooth_iterations<F: LaplacianFilter + ?Sized>(
    filter: &F,
    field: &[Vec3],
    graph: &AdjacencyGraph,
    iterations: u32,
) -> Result<Vec<Vec3>> {
    ensure_len("smoothing field", graph.vertex_count(), field.len())?;

    let mut current = field.to_vec();
    let mut next = vec![Vec3::ZERO; field.len()];
    for _ in 0..iterations {
        filter.smooth_into(&current, graph, &mut next)?;
        std::mem::swap(&mut current, &mut next);
    }
    Ok(current)
}
