//! Skinned mesh input, bone matrices and the per-frame output buffer.

use glam::{Mat4, Vec3};

use crate::error::{DeltaMushError, Result, ensure_len};

/// Up to four bone influences for one vertex.
///
/// Laid out for direct upload as a GPU storage buffer element (32 bytes).
/// Unused slots carry weight 0; their index must still name a bound bone.
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct BoneWeight {
    pub indices: [u32; 4],
    pub weights: [f32; 4],
}

impl BoneWeight {
    /// Full influence from a single bone.
    pub fn single(bone: u32) -> Self {
        Self {
            indices: [bone, 0, 0, 0],
            weights: [1.0, 0.0, 0.0, 0.0],
        }
    }

    /// Iterate over the `(bone, weight)` slots.
    pub fn influences(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.indices.iter().copied().zip(self.weights.iter().copied())
    }
}

/// Immutable mesh asset data, loaded once per session.
#[derive(Debug, Clone)]
pub struct SkinnedMesh {
    /// Rest-pose vertex positions
    pub positions: Vec<Vec3>,
    /// Rest-pose vertex normals (same length as positions)
    pub normals: Vec<Vec3>,
    /// Triangle vertex indices
    pub triangles: Vec<[u32; 3]>,
    /// Per-vertex bone influences (same length as positions)
    pub bone_weights: Vec<BoneWeight>,
    /// Inverse bind pose per bone
    pub inverse_bind_poses: Vec<Mat4>,
}

impl SkinnedMesh {
    /// Build a mesh and check every precondition the deformer relies on.
    pub fn new(
        positions: Vec<Vec3>,
        normals: Vec<Vec3>,
        triangles: Vec<[u32; 3]>,
        bone_weights: Vec<BoneWeight>,
        inverse_bind_poses: Vec<Mat4>,
    ) -> Result<Self> {
        let mesh = Self {
            positions,
            normals,
            triangles,
            bone_weights,
            inverse_bind_poses,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    /// Build a mesh from a flat index list (3 indices per triangle).
    pub fn from_flat_indices(
        positions: Vec<Vec3>,
        normals: Vec<Vec3>,
        indices: &[u32],
        bone_weights: Vec<BoneWeight>,
        inverse_bind_poses: Vec<Mat4>,
    ) -> Result<Self> {
        let triangles = triangles_from_flat(indices)?;
        Self::new(positions, normals, triangles, bone_weights, inverse_bind_poses)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn bone_count(&self) -> usize {
        self.inverse_bind_poses.len()
    }

    /// Check array lengths, triangle indices and bone indices.
    pub fn validate(&self) -> Result<()> {
        let vertex_count = self.vertex_count();
        ensure_len("normals", vertex_count, self.normals.len())?;
        ensure_len("bone weights", vertex_count, self.bone_weights.len())?;
        validate_triangles(&self.triangles, vertex_count)?;

        let bone_count = self.bone_count();
        for (vertex, weight) in self.bone_weights.iter().enumerate() {
            if let Some(&bone) = weight
                .indices
                .iter()
                .find(|&&bone| bone as usize >= bone_count)
            {
                return Err(DeltaMushError::BoneIndexOutOfRange {
                    vertex,
                    bone,
                    bone_count,
                });
            }
        }
        Ok(())
    }
}

/// Split a flat index list into triangles.
pub fn triangles_from_flat(indices: &[u32]) -> Result<Vec<[u32; 3]>> {
    if indices.len() % 3 != 0 {
        return Err(DeltaMushError::MalformedTriangles(indices.len()));
    }
    Ok(indices
        .chunks_exact(3)
        .map(|tri| [tri[0], tri[1], tri[2]])
        .collect())
}

/// Check that every triangle index names an existing vertex.
pub(crate) fn validate_triangles(triangles: &[[u32; 3]], vertex_count: usize) -> Result<()> {
    for (triangle, tri) in triangles.iter().enumerate() {
        if let Some(&index) = tri.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(DeltaMushError::TriangleIndexOutOfRange {
                triangle,
                index,
                vertex_count,
            });
        }
    }
    Ok(())
}

/// Skinning matrix per bone: `world[b] * inverse_bind[b]`.
///
/// `world` comes from the animation system every frame.
pub fn bone_matrices(world: &[Mat4], inverse_bind_poses: &[Mat4]) -> Result<Vec<Mat4>> {
    ensure_len("bone world transforms", inverse_bind_poses.len(), world.len())?;
    Ok(world
        .iter()
        .zip(inverse_bind_poses)
        .map(|(world, inverse_bind)| *world * *inverse_bind)
        .collect())
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        points.iter().fold(Self::empty(), |mut aabb, &p| {
            aabb.expand(p);
            aabb
        })
    }

    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }
}

/// Working buffers for one frame, handed to the renderer when ready.
///
/// Same length and ordering as the input mesh. Overwritten every frame.
#[derive(Debug, Clone, Default)]
pub struct DeformedMesh {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// Position delta carried into bone space this frame
    pub delta_v: Vec<Vec3>,
    /// Normal delta carried into bone space this frame
    pub delta_n: Vec<Vec3>,
}

impl DeformedMesh {
    pub fn new(vertex_count: usize) -> Self {
        Self {
            vertices: vec![Vec3::ZERO; vertex_count],
            normals: vec![Vec3::ZERO; vertex_count],
            delta_v: vec![Vec3::ZERO; vertex_count],
            delta_n: vec![Vec3::ZERO; vertex_count],
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Bounds of the deformed vertices, for culling in the renderer.
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(&self.vertices)
    }
}
