//! Conversion of collider shapes into native surface triangles.

use puppet_geom::{Pose, Vec3, rotate_yaw};
use puppet_native::{SurfaceTri, TerrainClass};

use crate::MeshData;

// Corner indices for the 12 triangles of a box, outward winding.
const BOX_TRIS: [[usize; 3]; 12] = [
    // -X
    [0, 1, 3],
    [0, 3, 2],
    // +X
    [5, 4, 6],
    [5, 6, 7],
    // -Y
    [0, 4, 5],
    [0, 5, 1],
    // +Y
    [2, 3, 7],
    [2, 7, 6],
    // -Z
    [4, 0, 2],
    [4, 2, 6],
    // +Z
    [1, 5, 7],
    [1, 7, 3],
];

#[inline]
fn transform(local: Vec3, pose: &Pose, scale: Vec3, world_scale: f32) -> Vec3 {
    let scaled = Vec3::new(local.x * scale.x, local.y * scale.y, local.z * scale.z);
    (rotate_yaw(scaled, pose.yaw_deg) + pose.pos) * world_scale
}

/// Append the 12 triangles of a box collider.
pub fn box_tris(
    half: Vec3,
    pose: &Pose,
    scale: Vec3,
    world_scale: f32,
    terrain: TerrainClass,
    out: &mut Vec<SurfaceTri>,
) {
    let mut corners = [Vec3::ZERO; 8];
    for (i, c) in corners.iter_mut().enumerate() {
        let local = Vec3::new(
            if i & 4 != 0 { half.x } else { -half.x },
            if i & 2 != 0 { half.y } else { -half.y },
            if i & 1 != 0 { half.z } else { -half.z },
        );
        *c = transform(local, pose, scale, world_scale);
    }
    for idx in BOX_TRIS {
        out.push(SurfaceTri::new(
            corners[idx[0]],
            corners[idx[1]],
            corners[idx[2]],
            terrain,
        ));
    }
}

/// Append every complete triangle of an indexed mesh.
pub fn mesh_tris(
    mesh: &MeshData,
    pose: &Pose,
    scale: Vec3,
    world_scale: f32,
    terrain: TerrainClass,
    out: &mut Vec<SurfaceTri>,
) {
    for tri in mesh.indices.chunks_exact(3) {
        let fetch = |i: u32| -> Option<Vec3> {
            mesh.positions
                .get(i as usize)
                .map(|&p| transform(p, pose, scale, world_scale))
        };
        let (Some(a), Some(b), Some(c)) = (fetch(tri[0]), fetch(tri[1]), fetch(tri[2])) else {
            // Out-of-range index; drop the triangle rather than the mesh.
            continue;
        };
        out.push(SurfaceTri::new(a, b, c, terrain));
    }
}
