//! Small meshes shared by the unit tests.

use glam::{Mat4, Vec3};

use crate::mesh::{BoneWeight, SkinnedMesh};

/// Regular-ish tetrahedron: every vertex neighbors the other three.
pub fn tetrahedron() -> (Vec<Vec3>, Vec<[u32; 3]>) {
    let positions = vec![
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
    ];
    let triangles = vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]];
    (positions, triangles)
}

/// Unit quad split along the 1-3 diagonal, with the second triangle using
/// seam copies of vertices 1 (index 4) and 3 (index 5).
pub fn seam_split_quad() -> (Vec<Vec3>, Vec<[u32; 3]>) {
    let positions = vec![
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
    ];
    let triangles = vec![[0, 1, 3], [4, 2, 5]];
    (positions, triangles)
}

/// `n` x `n` vertex grid in the XZ plane with unit spacing.
pub fn planar_grid(n: usize) -> (Vec<Vec3>, Vec<[u32; 3]>) {
    let mut positions = Vec::with_capacity(n * n);
    for z in 0..n {
        for x in 0..n {
            positions.push(Vec3::new(x as f32, 0.0, z as f32));
        }
    }

    let mut triangles = Vec::new();
    for z in 0..n - 1 {
        for x in 0..n - 1 {
            let i = (z * n + x) as u32;
            let right = i + 1;
            let down = i + n as u32;
            triangles.push([i, down, right]);
            triangles.push([right, down, down + 1]);
        }
    }
    (positions, triangles)
}

/// Single-bone skinned mesh from bare geometry (normals point up).
pub fn rigid_mesh(positions: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> SkinnedMesh {
    let count = positions.len();
    SkinnedMesh::new(
        positions,
        vec![Vec3::Y; count],
        triangles,
        vec![BoneWeight::single(0); count],
        vec![Mat4::IDENTITY],
    )
    .unwrap()
}

pub const CYLINDER_RINGS: usize = 9;
pub const CYLINDER_SEGMENTS: usize = 8;
pub const CYLINDER_HEIGHT: f32 = 2.0;

/// Open cylinder along +Y skinned to two bones: bone 0 at the base and bone 1
/// at mid-height. The last column duplicates the first (a UV seam), and the
/// weights ramp from bone 0 to bone 1 over the middle third.
pub fn two_bone_cylinder() -> SkinnedMesh {
    let columns = CYLINDER_SEGMENTS + 1;
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut bone_weights = Vec::new();

    for ring in 0..CYLINDER_RINGS {
        let y = CYLINDER_HEIGHT * ring as f32 / (CYLINDER_RINGS - 1) as f32;
        let t = ((y - CYLINDER_HEIGHT / 3.0) / (CYLINDER_HEIGHT / 3.0)).clamp(0.0, 1.0);
        for segment in 0..columns {
            let angle = std::f32::consts::TAU * (segment % CYLINDER_SEGMENTS) as f32
                / CYLINDER_SEGMENTS as f32;
            let (s, c) = angle.sin_cos();
            positions.push(Vec3::new(0.5 * c, y, 0.5 * s));
            normals.push(Vec3::new(c, 0.0, s));
            bone_weights.push(BoneWeight {
                indices: [0, 1, 0, 0],
                weights: [1.0 - t, t, 0.0, 0.0],
            });
        }
    }

    let mut triangles = Vec::new();
    for ring in 0..CYLINDER_RINGS - 1 {
        for segment in 0..CYLINDER_SEGMENTS {
            let a = (ring * columns + segment) as u32;
            let b = a + 1;
            let c = a + columns as u32;
            let d = c + 1;
            triangles.push([a, c, b]);
            triangles.push([b, c, d]);
        }
    }

    let inverse_bind_poses = vec![
        Mat4::IDENTITY,
        Mat4::from_translation(Vec3::new(0.0, -CYLINDER_HEIGHT / 2.0, 0.0)),
    ];

    SkinnedMesh::new(positions, normals, triangles, bone_weights, inverse_bind_poses).unwrap()
}

/// World transforms that twist bone 1 about the cylinder axis by `angle`.
pub fn twist_pose(angle: f32) -> Vec<Mat4> {
    vec![
        Mat4::IDENTITY,
        Mat4::from_translation(Vec3::new(0.0, CYLINDER_HEIGHT / 2.0, 0.0))
            * Mat4::from_rotation_y(angle),
    ]
}

/// World transforms that leave the cylinder in its rest pose.
pub fn rest_pose() -> Vec<Mat4> {
    twist_pose(0.0)
}

pub fn max_distance(a: &[Vec3], b: &[Vec3]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(a, b)| a.distance(*b))
        .fold(0.0, f32::max)
}
