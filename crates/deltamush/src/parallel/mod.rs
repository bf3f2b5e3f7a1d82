//! Data-parallel restatement of a frame.
//!
//! The frame is split into independent per-vertex kernels over upload-ready
//! buffers, dispatched in groups the way a compute shader would be:
//!
//! 1. **Deform** (kernel A) runs twice: rest surface into surface buffer 0,
//!    rest deltas into the delta buffer.
//! 2. **Smooth** (kernel B) runs once per iteration, reading one surface
//!    buffer and writing the other. The delta pass is fused into the last
//!    iteration.
//! 3. **Combine** adds deltas without smoothing, for prefiltered weights.
//!
//! Each dispatch returns only after all of its groups have run, so no
//! vertex ever reads a buffer that the same dispatch is writing.

mod kernels;

use deltamush_config::{DEFAULT_WORKGROUP_SIZE, FilterKind};
use glam::Vec3;
use tracing::trace;

use crate::adjacency::AdjacencyGraph;
use crate::delta::{DeltaBuffers, DeltaPass};
use crate::error::{Result, ensure_len};
use crate::mesh::DeformedMesh;
use crate::skinning::SkinBlender;

/// Interleaved position and normal, one storage buffer element (24 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct PackedVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl PackedVertex {
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }
}

fn pack(positions: &[Vec3], normals: &[Vec3]) -> Vec<PackedVertex> {
    positions
        .iter()
        .zip(normals)
        .map(|(&p, &n)| PackedVertex::new(p, n))
        .collect()
}

/// Split the surface pair into (read, write) halves.
fn ping_pong(
    surfaces: &mut [Vec<PackedVertex>; 2],
    read: usize,
) -> (&[PackedVertex], &mut [PackedVertex]) {
    let [first, second] = surfaces;
    if read == 0 {
        (first.as_slice(), second.as_mut_slice())
    } else {
        (second.as_slice(), first.as_mut_slice())
    }
}

/// Buffers and kernel dispatch for the parallel backend.
#[derive(Debug, Clone)]
pub struct ParallelDispatchPipeline {
    workgroup_size: usize,
    rest: Vec<PackedVertex>,
    rest_deltas: Vec<PackedVertex>,
    /// `(iterations, filter)` of the uploaded rest deltas
    delta_key: Option<(u32, FilterKind)>,
    surfaces: [Vec<PackedVertex>; 2],
    /// Bone-space deltas written by the second deform dispatch
    deltas: Vec<PackedVertex>,
    /// Surface buffer holding the latest result
    front: usize,
    dispatch_count: u64,
}

impl ParallelDispatchPipeline {
    /// Upload the rest pose and allocate the working buffers.
    pub fn new(positions: &[Vec3], normals: &[Vec3]) -> Result<Self> {
        ensure_len("rest normals", positions.len(), normals.len())?;
        let vertex_count = positions.len();
        Ok(Self {
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
            rest: pack(positions, normals),
            rest_deltas: vec![PackedVertex::default(); vertex_count],
            delta_key: None,
            surfaces: [
                vec![PackedVertex::default(); vertex_count],
                vec![PackedVertex::default(); vertex_count],
            ],
            deltas: vec![PackedVertex::default(); vertex_count],
            front: 0,
            dispatch_count: 0,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.rest.len()
    }

    pub fn workgroup_size(&self) -> usize {
        self.workgroup_size
    }

    pub fn set_workgroup_size(&mut self, workgroup_size: usize) {
        self.workgroup_size = workgroup_size.max(1);
    }

    /// Groups per dispatch: `ceil(vertex_count / workgroup_size)`.
    pub fn workgroup_count(&self) -> usize {
        self.vertex_count().div_ceil(self.workgroup_size)
    }

    /// Kernel dispatches issued since creation.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count
    }

    /// Whether the uploaded rest deltas are `deltas`.
    pub fn holds_deltas(&self, deltas: &DeltaBuffers) -> bool {
        self.delta_key == Some((deltas.iterations(), deltas.filter()))
    }

    pub fn upload_deltas(&mut self, deltas: &DeltaBuffers) -> Result<()> {
        ensure_len("position deltas", self.vertex_count(), deltas.delta_v.len())?;
        ensure_len("normal deltas", self.vertex_count(), deltas.delta_n.len())?;
        self.rest_deltas = pack(&deltas.delta_v, &deltas.delta_n);
        self.delta_key = Some((deltas.iterations(), deltas.filter()));
        trace!(
            "ParallelDispatchPipeline: uploaded deltas for {} iterations",
            deltas.iterations()
        );
        Ok(())
    }

    /// Kernel A, twice: surface into buffer 0, rest deltas into the delta
    /// buffer.
    ///
    /// With prefiltered weights the surface source is `rest - delta`.
    pub fn deform(&mut self, blender: &SkinBlender<'_>) -> Result<()> {
        ensure_len("blend weights", self.vertex_count(), blender.vertex_count())?;
        let workgroup_size = self.workgroup_size;
        let rest = &self.rest;
        let rest_deltas = &self.rest_deltas;
        let subtract_deltas = blender.is_prefiltered();

        kernels::dispatch(&mut self.surfaces[0], workgroup_size, |v| {
            let source = if subtract_deltas {
                PackedVertex::new(
                    rest[v].position() - rest_deltas[v].position(),
                    rest[v].normal() - rest_deltas[v].normal(),
                )
            } else {
                rest[v]
            };
            kernels::deform(blender.vertex_matrix(v), source, true)
        });
        kernels::dispatch(&mut self.deltas, workgroup_size, |v| {
            kernels::deform(blender.vertex_matrix(v), rest_deltas[v], false)
        });

        self.front = 0;
        self.dispatch_count += 2;
        Ok(())
    }

    /// Kernel B, `iterations` times, ping-ponging between the surface
    /// buffers. `pass` is fused into the last iteration.
    pub fn smooth(
        &mut self,
        filter: FilterKind,
        graph: &AdjacencyGraph,
        iterations: u32,
        smooth_normals: bool,
        pass: DeltaPass,
    ) -> Result<()> {
        ensure_len("adjacency rows", self.vertex_count(), graph.vertex_count())?;
        let workgroup_size = self.workgroup_size;
        for iteration in 0..iterations {
            let delta_pass = (iteration + 1 == iterations).then_some(pass);
            let deltas = &self.deltas;
            let (current, next) = ping_pong(&mut self.surfaces, self.front);
            kernels::dispatch(next, workgroup_size, |v| {
                kernels::smooth(v, filter, graph, current, smooth_normals, deltas, delta_pass)
            });
            self.front ^= 1;
            self.dispatch_count += 1;
        }
        Ok(())
    }

    /// Add the bone-space deltas to the current surface without smoothing.
    pub fn combine(&mut self, pass: DeltaPass) {
        if pass.is_noop() {
            return;
        }
        let deltas = &self.deltas;
        let (current, next) = ping_pong(&mut self.surfaces, self.front);
        kernels::dispatch(next, self.workgroup_size, |v| {
            kernels::combine(current[v], deltas[v], pass)
        });
        self.front ^= 1;
        self.dispatch_count += 1;
    }

    /// The latest surface result.
    pub fn surface(&self) -> &[PackedVertex] {
        &self.surfaces[self.front]
    }

    /// Bone-space deltas from the last deform dispatch.
    pub fn deltas(&self) -> &[PackedVertex] {
        &self.deltas
    }

    /// Copy the result and the bone-space deltas into `out`.
    pub fn read_back(&self, out: &mut DeformedMesh) {
        let surface = self.surface();
        out.vertices.clear();
        out.vertices.extend(surface.iter().map(PackedVertex::position));
        out.normals.clear();
        out.normals.extend(surface.iter().map(PackedVertex::normal));
        out.delta_v.clear();
        out.delta_v.extend(self.deltas.iter().map(PackedVertex::position));
        out.delta_n.clear();
        out.delta_n.extend(self.deltas.iter().map(PackedVertex::normal));
    }
}
