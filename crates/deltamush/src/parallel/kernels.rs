//! Per-vertex kernels and the grouped dispatch that runs them.
//!
//! A kernel invocation reads shared, immutable inputs and writes exactly one
//! output slot, so every group of a dispatch can run on its own worker.

use deltamush_config::FilterKind;
use glam::Mat4;
use rayon::prelude::*;

use super::PackedVertex;
use crate::adjacency::AdjacencyGraph;
use crate::delta::DeltaPass;
use crate::smoothing::LaplacianFilter;

/// Run `kernel` once per slot of `out`, `workgroup_size` slots per group.
///
/// Returns once every group has finished; that return is the barrier
/// between dependent dispatches.
pub(super) fn dispatch<K>(out: &mut [PackedVertex], workgroup_size: usize, kernel: K)
where
    K: Fn(usize) -> PackedVertex + Sync,
{
    out.par_chunks_mut(workgroup_size)
        .enumerate()
        .for_each(|(group, lanes)| {
            let base = group * workgroup_size;
            for (lane, slot) in lanes.iter_mut().enumerate() {
                *slot = kernel(base + lane);
            }
        });
}

/// Kernel A: move one vertex by its blend matrix.
///
/// Surface positions are points; delta positions are directions and skip
/// the translation. Normals are always directions.
pub(super) fn deform(matrix: Mat4, source: PackedVertex, as_point: bool) -> PackedVertex {
    let position = if as_point {
        matrix.transform_point3(source.position())
    } else {
        matrix.transform_vector3(source.position())
    };
    PackedVertex::new(position, matrix.transform_vector3(source.normal()))
}

/// Kernel B: one smoothing step for one vertex.
///
/// With `delta_pass` set (last iteration only) the bone-space delta is added
/// in the same invocation.
pub(super) fn smooth(
    vertex: usize,
    filter: FilterKind,
    graph: &AdjacencyGraph,
    current: &[PackedVertex],
    smooth_normals: bool,
    delta: &[PackedVertex],
    delta_pass: Option<DeltaPass>,
) -> PackedVertex {
    let position = filter.smooth_vertex_by(vertex, graph, &|i| current[i].position());
    let normal = if smooth_normals {
        filter.smooth_vertex_by(vertex, graph, &|i| current[i].normal())
    } else {
        current[vertex].normal()
    };

    match delta_pass {
        Some(pass) => combine(PackedVertex::new(position, normal), delta[vertex], pass),
        None => PackedVertex::new(position, normal),
    }
}

/// Add a vertex's bone-space delta under `pass`.
pub(super) fn combine(surface: PackedVertex, delta: PackedVertex, pass: DeltaPass) -> PackedVertex {
    let (position, normal) = pass.apply(
        surface.position(),
        surface.normal(),
        delta.position(),
        delta.normal(),
    );
    PackedVertex::new(position, normal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_dispatch_covers_every_slot_once() {
        for workgroup_size in [1, 3, 4, 64] {
            let mut out = vec![PackedVertex::default(); 10];
            dispatch(&mut out, workgroup_size, |v| {
                PackedVertex::new(Vec3::splat(v as f32), Vec3::ZERO)
            });
            for (v, slot) in out.iter().enumerate() {
                assert_eq!(slot.position(), Vec3::splat(v as f32));
            }
        }
    }

    #[test]
    fn test_deform_point_vs_direction() {
        let matrix = Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0));
        let source = PackedVertex::new(Vec3::X, Vec3::Z);

        let point = deform(matrix, source, true);
        assert_eq!(point.position(), Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(point.normal(), Vec3::Z);

        let direction = deform(matrix, source, false);
        assert_eq!(direction.position(), Vec3::X);
    }
}
