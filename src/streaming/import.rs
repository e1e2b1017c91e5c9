//! CPU-Side Import
//!
//! Everything in this module runs off the main thread except the
//! `upload_*` functions, which are the bodies of marshaled work items.
//! Import produces plain CPU representations — positions, normals, UVs,
//! indices and a bounding sphere for meshes; a decoded RGBA mip chain for
//! textures — and never touches the device.

use std::path::Path;

use glam::{Vec3, Vec4};
use image::imageops::FilterType;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::errors::{Result, StrataError};
use crate::resources::MeshPart;
use crate::streaming::{ColorSpace, GpuBridge, GpuMesh, GpuTexture};

/// Compile-time importer registry variants (keyed by extension in
/// [`crate::streaming::importer_for`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImporterKind {
    WavefrontMesh,
    Image,
}

// ─── Mesh import ──────────────────────────────────────────────────────────────

/// Parsed mesh, ready for pool upload.
#[derive(Debug, Clone, Default)]
pub struct CpuMesh {
    /// Tightly packed `[x, y, z]`.
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    /// Tightly packed `[u, v]`.
    pub uvs: Vec<f32>,
    pub indices: Vec<u32>,
    /// `(center.xyz, radius)`.
    pub bounding_sphere: Vec4,
}

impl CpuMesh {
    #[must_use]
    pub fn vertex_count(&self) -> u32 {
        (self.positions.len() / 3) as u32
    }
}

/// Reads and parses a Wavefront OBJ file.
pub async fn import_mesh(path: &Path) -> Result<CpuMesh> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StrataError::AssetNotFound(path.display().to_string())
        } else {
            StrataError::IoError(e)
        }
    })?;
    let text = std::str::from_utf8(&bytes).map_err(|e| StrataError::CorruptAsset {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    parse_obj(text).map_err(|detail| StrataError::CorruptAsset {
        path: path.display().to_string(),
        detail,
    })
}

/// Minimal OBJ parser: v/vt/vn and triangulated (fan) faces. Unified
/// vertices are deduplicated by their `v/vt/vn` triple.
pub fn parse_obj(text: &str) -> std::result::Result<CpuMesh, String> {
    let mut src_positions: Vec<[f32; 3]> = Vec::new();
    let mut src_uvs: Vec<[f32; 2]> = Vec::new();
    let mut src_normals: Vec<[f32; 3]> = Vec::new();

    let mut mesh = CpuMesh::default();
    let mut vertex_map: FxHashMap<(u32, u32, u32), u32> = FxHashMap::default();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        let mut words = line.split_whitespace();
        match words.next() {
            Some("v") => src_positions.push(parse_floats::<3>(&mut words, line_no)?),
            Some("vt") => src_uvs.push(parse_floats::<2>(&mut words, line_no)?),
            Some("vn") => src_normals.push(parse_floats::<3>(&mut words, line_no)?),
            Some("f") => {
                let corners: Vec<&str> = words.collect();
                if corners.len() < 3 {
                    return Err(format!("line {}: face with < 3 corners", line_no + 1));
                }
                let mut resolved = Vec::with_capacity(corners.len());
                for corner in &corners {
                    resolved.push(resolve_corner(
                        corner,
                        &src_positions,
                        &src_uvs,
                        &src_normals,
                        &mut vertex_map,
                        &mut mesh,
                        line_no,
                    )?);
                }
                for i in 1..resolved.len() - 1 {
                    mesh.indices.push(resolved[0]);
                    mesh.indices.push(resolved[i]);
                    mesh.indices.push(resolved[i + 1]);
                }
            }
            _ => {}
        }
    }

    if mesh.positions.is_empty() {
        return Err("no vertices".to_string());
    }
    if mesh.normals.iter().all(|&n| n == 0.0) {
        compute_normals(&mut mesh);
    }
    mesh.bounding_sphere = bounding_sphere(&mesh.positions);
    Ok(mesh)
}

fn parse_floats<'a, const N: usize>(
    words: &mut impl Iterator<Item = &'a str>,
    line_no: usize,
) -> std::result::Result<[f32; N], String> {
    let mut out = [0.0f32; N];
    for v in &mut out {
        *v = words
            .next()
            .ok_or_else(|| format!("line {}: missing component", line_no + 1))?
            .parse::<f32>()
            .map_err(|e| format!("line {}: {e}", line_no + 1))?;
    }
    Ok(out)
}

fn resolve_corner(
    corner: &str,
    src_positions: &[[f32; 3]],
    src_uvs: &[[f32; 2]],
    src_normals: &[[f32; 3]],
    vertex_map: &mut FxHashMap<(u32, u32, u32), u32>,
    mesh: &mut CpuMesh,
    line_no: usize,
) -> std::result::Result<u32, String> {
    let mut it = corner.split('/');
    let pi = parse_obj_index(it.next(), src_positions.len(), line_no)?
        .ok_or_else(|| format!("line {}: missing position index", line_no + 1))?;
    let ti = parse_obj_index(it.next(), src_uvs.len(), line_no)?;
    let ni = parse_obj_index(it.next(), src_normals.len(), line_no)?;

    let key = (
        pi,
        ti.map_or(u32::MAX, |i| i),
        ni.map_or(u32::MAX, |i| i),
    );
    if let Some(&idx) = vertex_map.get(&key) {
        return Ok(idx);
    }

    let idx = mesh.vertex_count();
    mesh.positions.extend_from_slice(&src_positions[pi as usize]);
    match ni {
        Some(n) => mesh.normals.extend_from_slice(&src_normals[n as usize]),
        None => mesh.normals.extend_from_slice(&[0.0; 3]),
    }
    match ti {
        Some(t) => mesh.uvs.extend_from_slice(&src_uvs[t as usize]),
        None => mesh.uvs.extend_from_slice(&[0.0; 2]),
    }
    vertex_map.insert(key, idx);
    Ok(idx)
}

/// OBJ indices are 1-based; negative indices count from the end.
fn parse_obj_index(
    word: Option<&str>,
    len: usize,
    line_no: usize,
) -> std::result::Result<Option<u32>, String> {
    let Some(word) = word else { return Ok(None) };
    if word.is_empty() {
        return Ok(None);
    }
    let raw: i64 = word
        .parse()
        .map_err(|e| format!("line {}: {e}", line_no + 1))?;
    let resolved = if raw < 0 { len as i64 + raw } else { raw - 1 };
    if resolved < 0 || resolved >= len as i64 {
        return Err(format!("line {}: index {raw} out of range", line_no + 1));
    }
    Ok(Some(resolved as u32))
}

/// Area-weighted vertex normals for meshes that ship without them.
fn compute_normals(mesh: &mut CpuMesh) {
    mesh.normals = vec![0.0; mesh.positions.len()];
    for tri in mesh.indices.chunks_exact(3) {
        let p = |i: u32| {
            let i = i as usize * 3;
            Vec3::new(
                mesh.positions[i],
                mesh.positions[i + 1],
                mesh.positions[i + 2],
            )
        };
        let n = (p(tri[1]) - p(tri[0])).cross(p(tri[2]) - p(tri[0]));
        for &i in tri {
            let i = i as usize * 3;
            mesh.normals[i] += n.x;
            mesh.normals[i + 1] += n.y;
            mesh.normals[i + 2] += n.z;
        }
    }
    for n in mesh.normals.chunks_exact_mut(3) {
        let v = Vec3::new(n[0], n[1], n[2]).normalize_or_zero();
        n.copy_from_slice(&v.to_array());
    }
}

/// AABB-centered bounding sphere `(center.xyz, radius)`.
#[must_use]
pub fn bounding_sphere(positions: &[f32]) -> Vec4 {
    if positions.is_empty() {
        return Vec4::ZERO;
    }
    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for p in positions.chunks_exact(3) {
        let v = Vec3::new(p[0], p[1], p[2]);
        min = min.min(v);
        max = max.max(v);
    }
    let center = (min + max) * 0.5;
    let mut radius_sq = 0.0f32;
    for p in positions.chunks_exact(3) {
        let v = Vec3::new(p[0], p[1], p[2]);
        radius_sq = radius_sq.max(center.distance_squared(v));
    }
    center.extend(radius_sq.sqrt())
}

/// Main-thread body: pool allocation, uploads, registry row. Runs inside
/// a drained work item.
pub fn upload_mesh(bridge: &mut GpuBridge<'_>, mesh: &CpuMesh) -> Result<GpuMesh> {
    let positions = bridge.geometry.alloc_positions(bridge.queue, &mesh.positions)?;
    let normals = bridge.geometry.alloc_normals(bridge.queue, &mesh.normals)?;
    let uvs = bridge.geometry.alloc_uvs(bridge.queue, &mesh.uvs)?;
    let indices = bridge.geometry.alloc_indices(bridge.queue, &mesh.indices)?;

    let part = MeshPart {
        guid: Uuid::new_v4(),
        positions,
        normals,
        uvs,
        indices,
        base_index: 0,
        index_count: mesh.indices.len() as u32,
        bone_weights: 0,
        bone_count: 0,
        local_sphere: mesh.bounding_sphere,
    };
    let part_id = bridge.mesh_registry.register(&part);

    Ok(GpuMesh {
        parts: vec![part_id],
        bounding_sphere: mesh.bounding_sphere,
    })
}

// ─── Texture import ───────────────────────────────────────────────────────────

/// Decoded texture with a full CPU mip chain.
pub struct CpuTexture {
    /// Mip 0 first; each level RGBA8, tightly packed.
    pub mips: Vec<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
}

/// Reads, decodes and downsamples a texture off the main thread.
pub async fn import_texture(path: &Path, color_space: ColorSpace) -> Result<CpuTexture> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StrataError::AssetNotFound(path.display().to_string())
        } else {
            StrataError::IoError(e)
        }
    })?;
    // Decode is CPU-heavy; it already runs on an import worker.
    let image = image::load_from_memory(&bytes)?.to_rgba8();
    let (width, height) = image.dimensions();

    let mip_count = (32 - width.max(height).leading_zeros()).max(1);
    let mut mips = Vec::with_capacity(mip_count as usize);
    mips.push(image.as_raw().clone());

    let mut level = image;
    for _ in 1..mip_count {
        let w = (level.width() / 2).max(1);
        let h = (level.height() / 2).max(1);
        level = image::imageops::resize(&level, w, h, FilterType::Triangle);
        mips.push(level.as_raw().clone());
    }

    Ok(CpuTexture {
        mips,
        width,
        height,
        color_space,
    })
}

/// Main-thread body: texture + view creation, mip uploads, bindless
/// insert.
pub fn upload_texture(bridge: &mut GpuBridge<'_>, cpu: &CpuTexture) -> Result<GpuTexture> {
    let format = match cpu.color_space {
        ColorSpace::Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        ColorSpace::Linear => wgpu::TextureFormat::Rgba8Unorm,
    };
    let texture = bridge.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Streamed Texture"),
        size: wgpu::Extent3d {
            width: cpu.width,
            height: cpu.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: cpu.mips.len() as u32,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    let mut w = cpu.width;
    let mut h = cpu.height;
    for (mip, data) in cpu.mips.iter().enumerate() {
        bridge.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: mip as u32,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * w),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
        w = (w / 2).max(1);
        h = (h / 2).max(1);
    }

    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let bindless_index = bridge
        .bindless
        .insert(bridge.completed_fence, view)
        .ok_or_else(|| StrataError::AllocationFailed("bindless table full".to_string()))?;

    Ok(GpuTexture {
        bindless_index,
        width: cpu.width,
        height: cpu.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD_OBJ: &str = "\
v -1 0 -1
v 1 0 -1
v 1 0 1
v -1 0 1
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 1 0
f 1/1/1 2/2/1 3/3/1 4/4/1
";

    #[test]
    fn parses_quad_with_fan_triangulation() {
        let mesh = parse_obj(QUAD_OBJ).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        // All corners share the single normal.
        assert_eq!(&mesh.normals[0..3], &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn deduplicates_shared_corners() {
        let mesh = parse_obj(QUAD_OBJ).unwrap();
        // 6 indices but only 4 unified vertices.
        assert_eq!(mesh.positions.len(), 4 * 3);
        assert_eq!(mesh.uvs.len(), 4 * 2);
    }

    #[test]
    fn negative_indices_resolve_from_end() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let mesh = parse_obj(obj).unwrap();
        assert_eq!(mesh.indices, vec![0, 1, 2]);
    }

    #[test]
    fn corrupt_face_is_an_error() {
        assert!(parse_obj("v 0 0 0\nf 1 9 1\n").is_err());
        assert!(parse_obj("f 1 2 3\n").is_err());
    }

    #[test]
    fn missing_normals_are_computed() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 0 1\nf 1 3 2\n";
        let mesh = parse_obj(obj).unwrap();
        // CCW winding 1-3-2 faces +Y.
        assert!(mesh.normals[1] > 0.99);
    }

    #[test]
    fn bounding_sphere_covers_all_vertices() {
        let mesh = parse_obj(QUAD_OBJ).unwrap();
        let s = mesh.bounding_sphere;
        assert_eq!((s.x, s.y, s.z), (0.0, 0.0, 0.0));
        assert!((s.w - 2.0f32.sqrt()).abs() < 1e-5);
    }
}
