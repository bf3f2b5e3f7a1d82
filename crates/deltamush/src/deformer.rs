//! Per-frame delta mush deformation.
//!
//! [`FrameDeformer`] owns the long-lived caches (deltas, prefiltered weights,
//! parallel buffers) for one mesh and turns each frame's bone transforms
//! into a [`DeformedMesh`]. A frame walks one fixed path through
//! [`DeformStage`]; settings that change the cache key rebuild the deltas
//! before the frame starts.

use std::sync::Arc;

use deltamush_config::{Backend, DeltaMushSettings};
use glam::{Mat4, Vec3};
use tracing::{debug, trace};

use crate::adjacency::AdjacencyGraph;
use crate::delta::{DeltaBuffers, DeltaPass};
use crate::error::{Result, ensure_len};
use crate::mesh::{DeformedMesh, SkinnedMesh, bone_matrices};
use crate::parallel::ParallelDispatchPipeline;
use crate::skinning::{BoneWeightField, SkinBlender};
use crate::smoothing::LaplacianFilter;

/// Where the current frame is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeformStage {
    /// No frame in flight
    #[default]
    Idle,
    /// Surface and deltas are in bone space
    BonesBlended,
    /// Smoothing iterations are done
    Smoothed,
    /// Deltas have been re-added
    DeltaReapplied,
    /// Output is complete and can be handed to the renderer
    Ready,
}

/// Deforms one skinned mesh frame after frame.
#[derive(Debug)]
pub struct FrameDeformer {
    mesh: Arc<SkinnedMesh>,
    graph: Arc<AdjacencyGraph>,
    deltas: DeltaBuffers,
    prefiltered: Option<BoneWeightField>,
    pipeline: Option<ParallelDispatchPipeline>,
    output: DeformedMesh,
    /// Spare field for sequential ping-pong smoothing
    scratch: Vec<Vec3>,
    stage: DeformStage,
    delta_recomputations: u64,
    prefilter_recomputations: u64,
}

impl FrameDeformer {
    /// Create a deformer for a mesh and its adjacency graph.
    ///
    /// Fails if the mesh is inconsistent or the graph was built for a
    /// different vertex count.
    pub fn new(mesh: Arc<SkinnedMesh>, graph: Arc<AdjacencyGraph>) -> Result<Self> {
        mesh.validate()?;
        ensure_len("adjacency rows", mesh.vertex_count(), graph.vertex_count())?;

        let vertex_count = mesh.vertex_count();
        Ok(Self {
            mesh,
            graph,
            deltas: DeltaBuffers::zeroed(vertex_count),
            prefiltered: None,
            pipeline: None,
            output: DeformedMesh::new(vertex_count),
            scratch: vec![Vec3::ZERO; vertex_count],
            stage: DeformStage::Idle,
            delta_recomputations: 0,
            prefilter_recomputations: 0,
        })
    }

    pub fn mesh(&self) -> &Arc<SkinnedMesh> {
        &self.mesh
    }

    pub fn graph(&self) -> &Arc<AdjacencyGraph> {
        &self.graph
    }

    pub fn stage(&self) -> DeformStage {
        self.stage
    }

    /// The last frame's output.
    pub fn output(&self) -> &DeformedMesh {
        &self.output
    }

    /// Rest deltas for the last frame's settings.
    pub fn deltas(&self) -> &DeltaBuffers {
        &self.deltas
    }

    pub fn prefiltered_weights(&self) -> Option<&BoneWeightField> {
        self.prefiltered.as_ref()
    }

    /// How many times the deltas have been rebuilt.
    pub fn delta_recomputations(&self) -> u64 {
        self.delta_recomputations
    }

    /// How many times the prefiltered weights have been rebuilt.
    pub fn prefilter_recomputations(&self) -> u64 {
        self.prefilter_recomputations
    }

    /// Build the caches `settings` needs ahead of the first frame.
    pub fn prepare(&mut self, settings: &DeltaMushSettings) -> Result<()> {
        settings.validate()?;
        self.refresh_caches(settings)
    }

    /// Deform one frame.
    ///
    /// `bone_world` holds each bone's world transform, in the order of the
    /// mesh's inverse bind poses. On error the previous output is kept.
    pub fn deform(
        &mut self,
        settings: &DeltaMushSettings,
        bone_world: &[Mat4],
    ) -> Result<&DeformedMesh> {
        settings.validate()?;
        let bones = bone_matrices(bone_world, &self.mesh.inverse_bind_poses)?;
        self.refresh_caches(settings)?;

        self.stage = DeformStage::Idle;
        match settings.backend {
            Backend::Sequential => self.run_sequential(settings, &bones)?,
            Backend::Parallel => self.run_parallel(settings, &bones)?,
        }
        advance(&mut self.stage, DeformStage::Ready);
        Ok(&self.output)
    }

    /// Rebuild deltas and prefiltered weights whose key no longer matches.
    fn refresh_caches(&mut self, settings: &DeltaMushSettings) -> Result<()> {
        let iterations = settings.iterations;
        let filter = settings.filter;

        if !self.deltas.matches(iterations, filter) {
            debug!(
                "FrameDeformer: deltas built for {} x {:?}, settings want {} x {:?}; recomputing",
                self.deltas.iterations(),
                self.deltas.filter(),
                iterations,
                filter
            );
            self.deltas = DeltaBuffers::compute(
                &self.mesh.positions,
                &self.mesh.normals,
                &self.graph,
                filter,
                iterations,
            )?;
            self.delta_recomputations += 1;
        }

        let prefilter_stale = !self
            .prefiltered
            .as_ref()
            .is_some_and(|field| field.matches(iterations, filter));
        if settings.use_prefiltered_weights && prefilter_stale {
            self.prefiltered = Some(BoneWeightField::prefiltered(
                &self.mesh.bone_weights,
                self.mesh.bone_count(),
                &self.mesh.positions,
                &self.graph,
                filter,
                iterations,
            )?);
            self.prefilter_recomputations += 1;
        }
        Ok(())
    }

    fn run_sequential(&mut self, settings: &DeltaMushSettings, bones: &[Mat4]) -> Result<()> {
        let mesh = &self.mesh;
        let deltas = &self.deltas;
        let blender = blender_for(settings, mesh, self.prefiltered.as_ref(), bones);
        let prefiltered = blender.is_prefiltered();
        let out = &mut self.output;

        for v in 0..mesh.vertex_count() {
            let matrix = blender.vertex_matrix(v);
            let (delta_v, delta_n) = (deltas.delta_v[v], deltas.delta_n[v]);
            let (position, normal) = if prefiltered {
                (mesh.positions[v] - delta_v, mesh.normals[v] - delta_n)
            } else {
                (mesh.positions[v], mesh.normals[v])
            };
            out.vertices[v] = matrix.transform_point3(position);
            out.normals[v] = matrix.transform_vector3(normal);
            out.delta_v[v] = matrix.transform_vector3(delta_v);
            out.delta_n[v] = matrix.transform_vector3(delta_n);
        }
        advance(&mut self.stage, DeformStage::BonesBlended);

        // Prefiltered weights already produce the smoothed rest surface.
        if !prefiltered {
            let filter = settings.filter;
            for _ in 0..settings.iterations {
                filter.smooth_into(&self.output.vertices, &self.graph, &mut self.scratch)?;
                std::mem::swap(&mut self.output.vertices, &mut self.scratch);
                if settings.deform_normals {
                    filter.smooth_into(&self.output.normals, &self.graph, &mut self.scratch)?;
                    std::mem::swap(&mut self.output.normals, &mut self.scratch);
                }
            }
        }
        advance(&mut self.stage, DeformStage::Smoothed);

        let pass = DeltaPass::for_settings(settings);
        if !pass.is_noop() {
            let out = &mut self.output;
            for v in 0..out.vertex_count() {
                (out.vertices[v], out.normals[v]) =
                    pass.apply(out.vertices[v], out.normals[v], out.delta_v[v], out.delta_n[v]);
            }
        }
        advance(&mut self.stage, DeformStage::DeltaReapplied);
        Ok(())
    }

    fn run_parallel(&mut self, settings: &DeltaMushSettings, bones: &[Mat4]) -> Result<()> {
        let mesh = &self.mesh;
        let pipeline = match self.pipeline.take() {
            Some(pipeline) => pipeline,
            None => ParallelDispatchPipeline::new(&mesh.positions, &mesh.normals)?,
        };
        let pipeline = self.pipeline.insert(pipeline);
        pipeline.set_workgroup_size(settings.workgroup_size);
        if !pipeline.holds_deltas(&self.deltas) {
            pipeline.upload_deltas(&self.deltas)?;
        }

        let blender = blender_for(settings, mesh, self.prefiltered.as_ref(), bones);
        pipeline.deform(&blender)?;
        advance(&mut self.stage, DeformStage::BonesBlended);

        let pass = DeltaPass::for_settings(settings);
        if blender.is_prefiltered() {
            pipeline.combine(pass);
        } else {
            pipeline.smooth(
                settings.filter,
                &self.graph,
                settings.iterations,
                settings.deform_normals,
                pass,
            )?;
        }
        // The delta pass is fused into the last smoothing dispatch.
        advance(&mut self.stage, DeformStage::Smoothed);
        advance(&mut self.stage, DeformStage::DeltaReapplied);
        pipeline.read_back(&mut self.output);
        Ok(())
    }
}

fn advance(stage: &mut DeformStage, next: DeformStage) {
    trace!("FrameDeformer: {:?} -> {:?}", stage, next);
    *stage = next;
}

/// Pick the weight source for this frame.
///
/// `prefiltered` is present whenever the settings ask for it, since the
/// caches are refreshed before a frame starts.
fn blender_for<'a>(
    settings: &DeltaMushSettings,
    mesh: &'a SkinnedMesh,
    prefiltered: Option<&'a BoneWeightField>,
    bones: &'a [Mat4],
) -> SkinBlender<'a> {
    match prefiltered {
        Some(field) if settings.use_prefiltered_weights => SkinBlender::prefiltered(bones, field),
        _ => SkinBlender::from_records(bones, &mesh.bone_weights, settings.skin_quality),
    }
}
