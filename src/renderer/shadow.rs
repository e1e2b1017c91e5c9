//! Shadow Cascade Fitting
//!
//! Pure math for cascaded shadow maps, plus the optional SDSM depth
//! reducer.
//!
//! # Provided functions
//!
//! - Cascade split computation (Practical Split Scheme, lambda ∈ [0, 1])
//! - Frustum-slice corner extraction in world space
//! - Orthographic VP construction per cascade with texel-grid snapping
//! - Assembly of the cull-side [`ShadowCascadeConstants`]
//!
//! The cascade VPs use standard-Z orthographic projection; caster
//! culling disables the near plane so geometry towards the light is
//! never rejected. The containment invariant — cascade N covers its
//! view-space slice `[near, far]` in NDC — is exercised by
//! `tests/shadow_tests.rs`.

use glam::{Mat4, Vec3, Vec4Swizzles};

use crate::camera::{Frustum, RenderCamera};
use crate::gpu::{FRAME_COUNT, FrameFence};
use crate::renderer::cull::ShadowCascadeConstants;
use crate::renderer::pipeline::{PipelineCache, ShaderManager};
use crate::renderer::settings::RenderSettings;
use crate::renderer::targets::RenderTargets;

/// Maximum cascade count.
pub const MAX_CASCADES: usize = 4;

/// Fraction of each cascade's range cross-faded into the next to hide
/// seams.
pub const CASCADE_BLEND_FRACTION: f32 = 0.1;

// ============================================================================
// Cascade Split Computation
// ============================================================================

/// Computes cascade split distances using the Practical Split Scheme.
///
/// `lambda` blends between uniform (`0.0`) and logarithmic (`1.0`)
/// distribution. Returns the far distance of each cascade in view space.
#[must_use]
pub fn compute_cascade_splits(
    cascade_count: u32,
    near: f32,
    far: f32,
    lambda: f32,
) -> [f32; MAX_CASCADES] {
    let mut splits = [far; MAX_CASCADES];
    let n = (cascade_count as usize).clamp(1, MAX_CASCADES);
    // The logarithmic term needs a strictly positive near.
    let near = near.max(1e-4);

    for (i, split) in splits.iter_mut().enumerate().take(n) {
        let p = (i + 1) as f32 / n as f32;
        let log_split = near * (far / near).powf(p);
        let uni_split = near + (far - near) * p;
        *split = lambda * log_split + (1.0 - lambda) * uni_split;
    }
    splits[n - 1] = far;
    splits
}

// ============================================================================
// Frustum Corners in World Space
// ============================================================================

/// The 8 world-space corners of the view frustum slice
/// `[slice_near, slice_far]`.
#[must_use]
pub fn compute_frustum_corners_world(
    camera: &RenderCamera,
    slice_near: f32,
    slice_far: f32,
) -> [Vec3; 8] {
    let proj = camera.projection_matrix;
    let tan_half_fov = 1.0 / proj.y_axis.y;
    let aspect = proj.y_axis.y / proj.x_axis.x;

    let h_near = tan_half_fov * slice_near;
    let w_near = h_near * aspect;
    let h_far = tan_half_fov * slice_far;
    let w_far = h_far * aspect;

    // Corners in view space (RH: -Z is forward)
    let corners_view = [
        Vec3::new(-w_near, -h_near, -slice_near),
        Vec3::new(w_near, -h_near, -slice_near),
        Vec3::new(w_near, h_near, -slice_near),
        Vec3::new(-w_near, h_near, -slice_near),
        Vec3::new(-w_far, -h_far, -slice_far),
        Vec3::new(w_far, -h_far, -slice_far),
        Vec3::new(w_far, h_far, -slice_far),
        Vec3::new(-w_far, h_far, -slice_far),
    ];

    let inv_view = camera.view_matrix.inverse();
    let mut corners_world = [Vec3::ZERO; 8];
    for (i, c) in corners_view.iter().enumerate() {
        corners_world[i] = inv_view.transform_point3(*c);
    }
    corners_world
}

// ============================================================================
// Cascade VP Construction
// ============================================================================

/// Builds the orthographic VP for one cascade.
///
/// Fits the slice corners in a *world-anchored*, rotation-only light
/// frame, extends Z towards the light for off-screen casters, and snaps
/// the window bounds to the shadow texel grid. Anchoring the frame at
/// the world origin is what makes the snap effective: a fixed world
/// point keeps fixed light-space coordinates while the camera moves, so
/// quantizing the window origin quantizes its texel coordinate.
#[must_use]
pub fn build_cascade_vp(
    light_direction: Vec3,
    frustum_corners: &[Vec3; 8],
    shadow_map_size: u32,
    caster_extension: f32,
) -> Mat4 {
    let safe_dir = if light_direction.length_squared() > 1e-6 {
        light_direction.normalize()
    } else {
        -Vec3::Z
    };

    let up = if safe_dir.y.abs() > 0.99 {
        Vec3::X
    } else {
        Vec3::Y
    };
    let light_view = Mat4::look_to_rh(Vec3::ZERO, safe_dir, up);

    let mut ls_min = Vec3::splat(f32::MAX);
    let mut ls_max = Vec3::splat(f32::MIN);
    for c in frustum_corners {
        let ls = light_view.transform_point3(*c);
        ls_min = ls_min.min(ls);
        ls_max = ls_max.max(ls);
    }

    // In RH light view, ls_max.z is towards the light. Extend so casters
    // between the slice and the light still land in the map.
    let base_z_range = (ls_max.z - ls_min.z).max(1.0);
    ls_max.z += caster_extension.max(base_z_range);
    ls_min.z -= base_z_range.max(50.0);

    // Texel snap.
    let texels = shadow_map_size as f32;
    let units_per_texel_x = (ls_max.x - ls_min.x) / texels;
    let units_per_texel_y = (ls_max.y - ls_min.y) / texels;
    if units_per_texel_x > 0.0 {
        ls_min.x = (ls_min.x / units_per_texel_x).floor() * units_per_texel_x;
        ls_max.x = (ls_max.x / units_per_texel_x).ceil() * units_per_texel_x;
    }
    if units_per_texel_y > 0.0 {
        ls_min.y = (ls_min.y / units_per_texel_y).floor() * units_per_texel_y;
        ls_max.y = (ls_max.y / units_per_texel_y).ceil() * units_per_texel_y;
    }

    let proj = Mat4::orthographic_rh(
        ls_min.x, ls_max.x, ls_min.y, ls_max.y,
        // near/far are -z planes of the anchored light frame; either
        // sign is fine for an ortho map.
        -ls_max.z, -ls_min.z,
    );

    proj * light_view
}

/// Per-cascade fit result.
#[derive(Debug, Clone, Copy)]
pub struct CascadeFit {
    pub view_proj: Mat4,
    /// View-space slice bounds `[near, far]`.
    pub near: f32,
    pub far: f32,
}

/// Fits all cascades and assembles the cull-side constants.
#[must_use]
pub fn build_cascades(
    camera: &RenderCamera,
    sun_direction: Vec3,
    settings: &RenderSettings,
    shadow_range: (f32, f32),
    caster_extension: f32,
) -> ([CascadeFit; MAX_CASCADES], ShadowCascadeConstants) {
    let (range_near, range_far) = shadow_range;
    let splits = compute_cascade_splits(
        settings.cascade_count_clamped(),
        range_near,
        range_far,
        settings.cascade_lambda,
    );

    let mut fits = [CascadeFit {
        view_proj: Mat4::IDENTITY,
        near: range_near,
        far: range_far,
    }; MAX_CASCADES];
    let mut constants = ShadowCascadeConstants::default();

    let mut prev_split = range_near;
    for c in 0..MAX_CASCADES {
        let slice_near = prev_split;
        let slice_far = splits[c];
        prev_split = slice_far;

        let corners = compute_frustum_corners_world(camera, slice_near, slice_far);
        let vp = build_cascade_vp(
            sun_direction,
            &corners,
            settings.shadow_map_size,
            caster_extension,
        );

        fits[c] = CascadeFit {
            view_proj: vp,
            near: slice_near,
            far: slice_far,
        };

        // Caster culling: near plane disabled so geometry towards the
        // light is kept.
        let planes = Frustum::from_matrix_shadow_caster(vp).planes();
        for (p, plane) in planes.iter().enumerate() {
            constants.planes[c * 6 + p] = plane.to_array();
        }
        constants.cascade_near[c] = slice_near;
        constants.cascade_far[c] = slice_far;
        constants.light_view_proj[c] = vp.to_cols_array_2d();
    }

    (fits, constants)
}

/// NDC containment check used by the cascade invariant tests: a
/// view-space point on the slice must project inside cascade N's clip
/// volume (standard-Z: z ∈ [0, 1]).
#[must_use]
pub fn cascade_contains_world_point(fit: &CascadeFit, world: Vec3) -> bool {
    let clip = fit.view_proj * world.extend(1.0);
    if clip.w.abs() < 1e-6 {
        return false;
    }
    let ndc = clip.xyz() / clip.w;
    (-1.0..=1.0).contains(&ndc.x) && (-1.0..=1.0).contains(&ndc.y) && (0.0..=1.0).contains(&ndc.z)
}

/// Which cascade shades view depth `d`, plus the blend factor into the
/// next cascade over the last [`CASCADE_BLEND_FRACTION`] of the range.
/// Returns `None` beyond the last cascade (shadow factor 1).
#[must_use]
pub fn select_cascade(splits: &[f32; MAX_CASCADES], view_depth: f32) -> Option<(usize, f32)> {
    for (c, &far) in splits.iter().enumerate() {
        if view_depth <= far {
            let blend_start = far * (1.0 - CASCADE_BLEND_FRACTION);
            let blend = if c + 1 < MAX_CASCADES && view_depth > blend_start {
                (view_depth - blend_start) / (far - blend_start)
            } else {
                0.0
            };
            return Some((c, blend));
        }
    }
    None
}

// ============================================================================
// SDSM: depth-bounds reduction
// ============================================================================

struct ReadbackSlot {
    buffer: wgpu::Buffer,
    in_flight: bool,
}

/// Reduces the G-buffer linear depth to `(min, max)` on the GPU and reads
/// it back asynchronously; the last completed bounds tighten the next
/// frame's `shadow_far`. One frame of latency by design.
pub struct DepthBoundsReducer {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    result: wgpu::Buffer,
    slots: Vec<ReadbackSlot>,
    ready_tx: flume::Sender<usize>,
    ready_rx: flume::Receiver<usize>,
    latest: Option<(f32, f32)>,
    _fence: FrameFence,
}

impl DepthBoundsReducer {
    #[must_use]
    pub fn new(
        device: &wgpu::Device,
        shaders: &mut ShaderManager,
        pipelines: &mut PipelineCache,
        fence: FrameFence,
    ) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Depth Reduce Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(8),
                    },
                    count: None,
                },
            ],
        });

        let (module, shader_hash) = shaders.get_or_compile(
            device,
            "depth_reduce.wgsl",
            include_str!("shaders/depth_reduce.wgsl"),
        );
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Depth Reduce Pipeline Layout"),
            bind_group_layouts: &[Some(&layout)],
            immediate_size: 0,
        });
        let pipeline = pipelines.get_or_create_compute(
            &("depth_reduce", shader_hash, "reduce"),
            "Depth Reduce",
            || {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some("Depth Reduce"),
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: Some("reduce"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
            },
        );

        let result = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Depth Bounds"),
            size: 8,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let slots = (0..FRAME_COUNT)
            .map(|_| ReadbackSlot {
                buffer: device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Depth Bounds Readback"),
                    size: 8,
                    usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                    mapped_at_creation: false,
                }),
                in_flight: false,
            })
            .collect();

        let (ready_tx, ready_rx) = flume::unbounded();
        Self {
            layout,
            pipeline,
            result,
            slots,
            ready_tx,
            ready_rx,
            latest: None,
            _fence: fence,
        }
    }

    /// Records the reduction and the copy into this frame's readback
    /// slot. Skipped when the slot is still mapped from a prior use.
    pub fn encode(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        targets: &RenderTargets,
        frame: usize,
    ) {
        // Reset bounds: min = +inf bits, max = 0.
        queue.write_buffer(&self.result, 0, bytemuck::cast_slice(&[u32::MAX, 0u32]));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Depth Reduce BindGroup"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(targets.linear_depth_view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.result.as_entire_binding(),
                },
            ],
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("SDSM Depth Reduce"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (w, h) = targets.size;
            pass.dispatch_workgroups(w.div_ceil(8), h.div_ceil(8), 1);
        }

        let slot = frame % FRAME_COUNT;
        if !self.slots[slot].in_flight {
            encoder.copy_buffer_to_buffer(&self.result, 0, &self.slots[slot].buffer, 0, 8);
            self.slots[slot].in_flight = true;
        }
    }

    /// Queues the async map of this frame's readback; call after submit.
    pub fn request_readback(&mut self, frame: usize) {
        let slot = frame % FRAME_COUNT;
        if !self.slots[slot].in_flight {
            return;
        }
        let tx = self.ready_tx.clone();
        self.slots[slot]
            .buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                if result.is_ok() {
                    let _ = tx.send(slot);
                }
            });
    }

    /// Drains completed readbacks; returns the freshest bounds seen.
    pub fn poll_bounds(&mut self) -> Option<(f32, f32)> {
        while let Ok(slot) = self.ready_rx.try_recv() {
            {
                let view = self.slots[slot].buffer.slice(..).get_mapped_range();
                let words: &[u32] = bytemuck::cast_slice(&view[..]);
                if words[1] > 0 {
                    // Positive floats order like their bit patterns.
                    self.latest = Some((f32::from_bits(words[0]), f32::from_bits(words[1])));
                }
            }
            self.slots[slot].buffer.unmap();
            self.slots[slot].in_flight = false;
        }
        self.latest
    }
}

/// Applies SDSM bounds to the configured shadow range.
#[must_use]
pub fn effective_shadow_range(
    camera_near: f32,
    settings: &RenderSettings,
    bounds: Option<(f32, f32)>,
) -> (f32, f32) {
    let near = camera_near.max(0.01);
    let far = settings.shadow_far;
    match (settings.sdsm, bounds) {
        (true, Some((min_d, max_d))) => {
            let near = near.max(min_d * 0.95);
            let far = far.min(max_d * 1.05).max(near + 1.0);
            (near, far)
        }
        _ => (near, far),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_are_monotone_and_end_at_far() {
        let splits = compute_cascade_splits(4, 0.1, 400.0, 0.75);
        assert!(splits[0] < splits[1]);
        assert!(splits[1] < splits[2]);
        assert!(splits[2] < splits[3]);
        assert_eq!(splits[3], 400.0);
    }

    #[test]
    fn lambda_zero_is_uniform() {
        let splits = compute_cascade_splits(4, 0.0, 100.0, 0.0);
        assert!((splits[0] - 25.0).abs() < 1e-3);
        assert!((splits[1] - 50.0).abs() < 1e-3);
        assert!((splits[2] - 75.0).abs() < 1e-3);
    }

    #[test]
    fn cascade_selection_and_blend() {
        let splits = [10.0, 50.0, 150.0, 400.0];
        assert_eq!(select_cascade(&splits, 5.0), Some((0, 0.0)));
        // Last 10% of cascade 0 blends towards cascade 1.
        let (c, blend) = select_cascade(&splits, 9.8).unwrap();
        assert_eq!(c, 0);
        assert!(blend > 0.0 && blend <= 1.0);
        assert_eq!(select_cascade(&splits, 380.0).map(|s| s.0), Some(3));
        // Beyond the far shadow range: no cascade, factor 1.
        assert_eq!(select_cascade(&splits, 500.0), None);
    }

    #[test]
    fn sdsm_tightens_range() {
        let settings = RenderSettings {
            sdsm: true,
            shadow_far: 400.0,
            ..Default::default()
        };
        let (near, far) = effective_shadow_range(0.1, &settings, Some((20.0, 80.0)));
        assert!(near >= 19.0 && near <= 20.0);
        assert!(far <= 85.0);

        let off = RenderSettings {
            sdsm: false,
            ..settings
        };
        assert_eq!(effective_shadow_range(0.1, &off, Some((20.0, 80.0))).1, 400.0);
    }
}
