//! Linear blend skinning.
//!
//! A vertex's blend matrix is the weighted sum of its bones' skinning
//! matrices, entry by entry. The same matrix moves the surface (as a point
//! and a direction) and the rest-pose deltas (as directions), so the deltas
//! follow the local rotation of the skin they are re-added to.

use deltamush_config::{FilterKind, SkinQuality};
use glam::{Mat4, Vec3};
use tracing::debug;

use crate::adjacency::AdjacencyGraph;
use crate::error::{Result, ensure_len};
use crate::mesh::BoneWeight;
use crate::smoothing::LaplacianFilter;

/// Rows whose weights sum to less than this are not renormalized.
const MIN_WEIGHT_SUM: f32 = 1e-6;

/// Blend matrix for one 4-slot weight record.
///
/// `Bone1` takes the first bone as-is, `Bone2` weights the first two bones
/// `w0` and `1 - w0`, and `Bone4` uses all four weights unchanged.
///
/// # Panics
///
/// Panics if a used slot names a bone outside `bones`.
pub fn blend_matrix(weight: &BoneWeight, bones: &[Mat4], quality: SkinQuality) -> Mat4 {
    let bone = |slot: usize| bones[weight.indices[slot] as usize];
    let w = weight.weights;
    match quality {
        SkinQuality::Bone1 => bone(0),
        SkinQuality::Bone2 => bone(0) * w[0] + bone(1) * (1.0 - w[0]),
        SkinQuality::Bone4 => {
            bone(0) * w[0] + bone(1) * w[1] + bone(2) * w[2] + bone(3) * w[3]
        }
    }
}

/// Dense per-vertex weights over every bone, smoothed over the mesh.
///
/// Built once per (iterations, filter) pair and blended in place of the
/// 4-slot records, which spreads each bone's influence past its painted
/// region.
#[derive(Debug, Clone, PartialEq)]
pub struct BoneWeightField {
    bone_count: usize,
    /// `vertex * bone_count + bone`
    weights: Vec<f32>,
    iterations: u32,
    filter: FilterKind,
}

impl BoneWeightField {
    /// Spread 4-slot records into dense rows without smoothing.
    ///
    /// Slots naming the same bone accumulate.
    pub fn from_records(records: &[BoneWeight], bone_count: usize) -> Self {
        let mut weights = vec![0.0; records.len() * bone_count];
        for (vertex, record) in records.iter().enumerate() {
            let row = &mut weights[vertex * bone_count..(vertex + 1) * bone_count];
            for (bone, w) in record.influences() {
                if let Some(slot) = row.get_mut(bone as usize) {
                    *slot += w;
                }
            }
        }
        Self {
            bone_count,
            weights,
            iterations: 0,
            filter: FilterKind::default(),
        }
    }

    /// Smooth the records `iterations` times and renormalize every row.
    ///
    /// Distances for the weighted filter are measured on the rest positions.
    pub fn prefiltered(
        records: &[BoneWeight],
        bone_count: usize,
        rest_positions: &[Vec3],
        graph: &AdjacencyGraph,
        filter: FilterKind,
        iterations: u32,
    ) -> Result<Self> {
        ensure_len("bone weights", graph.vertex_count(), records.len())?;
        ensure_len("rest positions", graph.vertex_count(), rest_positions.len())?;
        debug!(
            "BoneWeightField::prefiltered: {} vertices x {} bones, {} iterations, {:?}",
            records.len(),
            bone_count,
            iterations,
            filter
        );

        let mut field = Self::from_records(records, bone_count);
        for _ in 0..iterations {
            field.weights =
                filter.smooth_rows(&field.weights, bone_count, rest_positions, graph)?;
        }
        field.renormalize();
        field.iterations = iterations;
        field.filter = filter;
        Ok(field)
    }

    fn renormalize(&mut self) {
        if self.bone_count == 0 {
            return;
        }
        for row in self.weights.chunks_exact_mut(self.bone_count) {
            let sum: f32 = row.iter().sum();
            if sum.abs() < MIN_WEIGHT_SUM {
                continue;
            }
            row.iter_mut().for_each(|w| *w /= sum);
        }
    }

    pub fn bone_count(&self) -> usize {
        self.bone_count
    }

    pub fn vertex_count(&self) -> usize {
        if self.bone_count == 0 {
            0
        } else {
            self.weights.len() / self.bone_count
        }
    }

    /// Weights of one vertex, one per bone.
    pub fn row(&self, vertex: usize) -> &[f32] {
        &self.weights[vertex * self.bone_count..(vertex + 1) * self.bone_count]
    }

    /// Whether this field was built for the given settings.
    ///
    /// Unsmoothed fields match any filter.
    pub fn matches(&self, iterations: u32, filter: FilterKind) -> bool {
        self.iterations == iterations && (iterations == 0 || self.filter == filter)
    }

    /// Blend matrix for one vertex over every bone.
    pub fn blend(&self, vertex: usize, bones: &[Mat4]) -> Mat4 {
        self.row(vertex)
            .iter()
            .zip(bones)
            .fold(Mat4::ZERO, |acc, (&w, bone)| acc + *bone * w)
    }
}

/// Per-frame source of vertex blend matrices.
///
/// Borrowing the bone matrices for the frame lets both backends ask for a
/// vertex's matrix from any worker.
#[derive(Debug, Clone, Copy)]
pub struct SkinBlender<'a> {
    bones: &'a [Mat4],
    source: WeightSource<'a>,
}

#[derive(Debug, Clone, Copy)]
enum WeightSource<'a> {
    Records {
        records: &'a [BoneWeight],
        quality: SkinQuality,
    },
    Prefiltered(&'a BoneWeightField),
}

impl<'a> SkinBlender<'a> {
    /// Blend with the mesh's 4-slot records.
    pub fn from_records(bones: &'a [Mat4], records: &'a [BoneWeight], quality: SkinQuality) -> Self {
        Self {
            bones,
            source: WeightSource::Records { records, quality },
        }
    }

    /// Blend with a smoothed dense weight field.
    pub fn prefiltered(bones: &'a [Mat4], field: &'a BoneWeightField) -> Self {
        Self {
            bones,
            source: WeightSource::Prefiltered(field),
        }
    }

    pub fn is_prefiltered(&self) -> bool {
        matches!(self.source, WeightSource::Prefiltered(_))
    }

    /// Number of vertices this blender has weights for.
    pub fn vertex_count(&self) -> usize {
        match self.source {
            WeightSource::Records { records, .. } => records.len(),
            WeightSource::Prefiltered(field) => field.vertex_count(),
        }
    }

    pub fn vertex_matrix(&self, vertex: usize) -> Mat4 {
        match self.source {
            WeightSource::Records { records, quality } => {
                blend_matrix(&records[vertex], self.bones, quality)
            }
            WeightSource::Prefiltered(field) => field.blend(vertex, self.bones),
        }
    }
}
