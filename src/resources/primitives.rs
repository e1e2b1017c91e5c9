//! Procedural Primitives
//!
//! Small generated meshes: the unit sphere used for point-light volumes,
//! plus a plane and a cube for tooling and tests. All return a
//! [`CpuMesh`] ready for pool upload.

use glam::Vec4;

use crate::streaming::import::{CpuMesh, bounding_sphere};

/// UV sphere of `radius` centered at the origin.
#[must_use]
pub fn uv_sphere(radius: f32, segments: u32, rings: u32) -> CpuMesh {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let mut mesh = CpuMesh::default();

    for ring in 0..=rings {
        let v = ring as f32 / rings as f32;
        let phi = v * std::f32::consts::PI;
        let (sin_phi, cos_phi) = phi.sin_cos();
        for segment in 0..=segments {
            let u = segment as f32 / segments as f32;
            let theta = u * std::f32::consts::TAU;
            let (sin_theta, cos_theta) = theta.sin_cos();

            let normal = [sin_phi * cos_theta, cos_phi, sin_phi * sin_theta];
            mesh.positions
                .extend_from_slice(&[normal[0] * radius, normal[1] * radius, normal[2] * radius]);
            mesh.normals.extend_from_slice(&normal);
            mesh.uvs.extend_from_slice(&[u, v]);
        }
    }

    let stride = segments + 1;
    for ring in 0..rings {
        for segment in 0..segments {
            let a = ring * stride + segment;
            let b = a + stride;
            mesh.indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }

    mesh.bounding_sphere = Vec4::new(0.0, 0.0, 0.0, radius);
    mesh
}

/// XZ plane of `size` × `size` centered at the origin, facing +Y.
#[must_use]
pub fn plane(size: f32) -> CpuMesh {
    let h = size * 0.5;
    let mesh = CpuMesh {
        positions: vec![-h, 0.0, -h, h, 0.0, -h, h, 0.0, h, -h, 0.0, h],
        normals: vec![0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0],
        uvs: vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0],
        indices: vec![0, 2, 1, 0, 3, 2],
        bounding_sphere: Vec4::ZERO,
    };
    with_bounds(mesh)
}

/// Axis-aligned cube of `size` edge length centered at the origin.
#[must_use]
pub fn cube(size: f32) -> CpuMesh {
    let h = size * 0.5;
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        // normal, tangent u, tangent v
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];

    let mut mesh = CpuMesh::default();
    for (f, (n, tu, tv)) in faces.iter().enumerate() {
        let base = (f * 4) as u32;
        for (cu, cv) in [(-1.0f32, -1.0f32), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let p = [
                (n[0] + tu[0] * cu + tv[0] * cv) * h,
                (n[1] + tu[1] * cu + tv[1] * cv) * h,
                (n[2] + tu[2] * cu + tv[2] * cv) * h,
            ];
            mesh.positions.extend_from_slice(&p);
            mesh.normals.extend_from_slice(n);
            mesh.uvs
                .extend_from_slice(&[cu * 0.5 + 0.5, cv * 0.5 + 0.5]);
        }
        mesh.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    with_bounds(mesh)
}

fn with_bounds(mut mesh: CpuMesh) -> CpuMesh {
    mesh.bounding_sphere = bounding_sphere(&mesh.positions);
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_bounds_match_radius() {
        let mesh = uv_sphere(2.0, 16, 8);
        assert_eq!(mesh.bounding_sphere.w, 2.0);
        assert_eq!(mesh.indices.len() as u32, 16 * 8 * 6);
        assert!(mesh.indices.iter().all(|&i| i < mesh.vertex_count()));
    }

    #[test]
    fn plane_winding_faces_up() {
        let mesh = plane(2.0);
        // First triangle 0-2-1: cross product points +Y.
        assert_eq!(mesh.indices[..3], [0, 2, 1]);
        assert!((mesh.bounding_sphere.w - 2.0f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn cube_has_24_vertices() {
        let mesh = cube(1.0);
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.indices.len(), 36);
    }
}
