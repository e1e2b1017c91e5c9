//! GPU Culler
//!
//! Per-batch compute pipeline over the instance staging buffers:
//!
//! ```text
//! visibility ─► histogram ─► prefix sum ─► scatter ─► emit commands
//!   (1/inst)     (1/inst)    (1 thread)    (1/inst)    (1/sub-batch)
//! ```
//!
//! All five dispatches are recorded back to back on the frame encoder;
//! wgpu's hazard tracking inserts the UAV barriers between them. The
//! emitted buffer of packed 20-byte indexed-draw commands feeds one
//! `multi_draw_indexed_indirect` per pass-batch.
//!
//! The **Shadow4** variant tests each instance against four cascade
//! frustums in a single dispatch (one world-matrix read per instance),
//! writing four visibility regions; compaction then runs per cascade
//! with region bases carried in the draw constants.
//!
//! Numeric semantics live in `shaders/cull.wgsl`; the frustum-plane
//! convention matches [`crate::camera::Frustum`] (inward normals,
//! `dot(n, c) + d < -r` ⇒ outside).

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::gpu::{DeferredDisposal, FRAME_COUNT, GrowableBuffer};
use crate::renderer::pipeline::{PipelineCache, ShaderManager};

/// Bit 0 of [`FrustumConstants::flags`]: Hi-Z occlusion test enabled.
pub const CULL_FLAG_HIZ: u32 = 1;

/// Sub-batch flag bit: skinned mesh (radius inflated ×1.5 in the
/// visibility shader).
pub const SUBBATCH_FLAG_SKINNED: u32 = 1;

/// Frustum-constants CBV (root slot 1 of the original contract): six
/// world-space planes, the previous frame's view-projection, Hi-Z
/// parameters and the camera near plane.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct FrustumConstants {
    pub planes: [[f32; 4]; 6],
    pub prev_view_proj: [[f32; 4]; 4],
    pub hiz_size: [f32; 2],
    pub hiz_mip_count: u32,
    pub flags: u32,
    pub camera_near: f32,
    /// `projection[1][1]`, for projected-radius estimation.
    pub proj_scale_y: f32,
    pub _pad: [f32; 2],
}

impl FrustumConstants {
    #[must_use]
    pub fn new(
        planes: [Vec4; 6],
        prev_view_proj: Mat4,
        hiz_size: (u32, u32),
        hiz_mip_count: u32,
        hiz_enabled: bool,
        camera_near: f32,
        proj_scale_y: f32,
    ) -> Self {
        Self {
            planes: planes.map(Vec4::to_array),
            prev_view_proj: prev_view_proj.to_cols_array_2d(),
            hiz_size: [hiz_size.0 as f32, hiz_size.1 as f32],
            hiz_mip_count,
            flags: if hiz_enabled { CULL_FLAG_HIZ } else { 0 },
            camera_near,
            proj_scale_y,
            _pad: [0.0; 2],
        }
    }
}

/// Shadow-cascade CBV (root slot 2): 24 planes (6 × 4 cascades), the
/// per-cascade view-space slice bounds, and the light VPs shared with the
/// shadow depth pass.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ShadowCascadeConstants {
    pub planes: [[f32; 4]; 24],
    pub cascade_near: [f32; 4],
    pub cascade_far: [f32; 4],
    pub light_view_proj: [[[f32; 4]; 4]; 4],
}

impl Default for ShadowCascadeConstants {
    fn default() -> Self {
        Self::zeroed()
    }
}

// ─── Output buffers ───────────────────────────────────────────────────────────

/// Per-pass culler outputs, ring-buffered per frame. `regions` > 1 packs
/// the four shadow cascades into one buffer set.
pub struct CullBuffers {
    pub visibility: GrowableBuffer,
    pub histogram: GrowableBuffer,
    pub counters: GrowableBuffer,
    pub visible: GrowableBuffer,
    pub commands: GrowableBuffer,
    pub stats: wgpu::Buffer,
}

impl CullBuffers {
    #[must_use]
    pub fn new(device: &wgpu::Device, label_prefix: &'static str) -> Self {
        let storage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        Self {
            visibility: GrowableBuffer::new(device, "Cull Visibility", storage, 4 * 1024),
            histogram: GrowableBuffer::new(device, "Cull Histogram", storage, 4 * 256),
            counters: GrowableBuffer::new(device, "Cull Counters", storage, 4 * 256),
            visible: GrowableBuffer::new(device, "Cull Visible Indices", storage, 4 * 1024),
            commands: GrowableBuffer::new(
                device,
                "Cull Indirect Commands",
                storage | wgpu::BufferUsages::INDIRECT,
                20 * 256,
            ),
            stats: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label_prefix),
                size: 16,
                usage: storage | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
        }
    }

    /// Grows every output for `instances` × `regions` work items.
    pub fn ensure(
        &mut self,
        device: &wgpu::Device,
        disposal: &mut DeferredDisposal,
        fence: u64,
        frame: usize,
        instances: u64,
        slots: u64,
        regions: u64,
    ) {
        let n = instances.max(1) * regions;
        let k = slots.max(1) * regions;
        self.visibility.ensure(device, disposal, fence, frame, 4 * n);
        self.histogram.ensure(device, disposal, fence, frame, 4 * k);
        self.counters.ensure(device, disposal, fence, frame, 4 * k);
        self.visible.ensure(device, disposal, fence, frame, 4 * n);
        self.commands.ensure(device, disposal, fence, frame, 20 * k);
    }
}

// ─── Culler ───────────────────────────────────────────────────────────────────

pub struct GpuCuller {
    pub scene_layout: wgpu::BindGroupLayout,
    pub view_layout: wgpu::BindGroupLayout,
    pub shadow_view_layout: wgpu::BindGroupLayout,
    pub io_layout: wgpu::BindGroupLayout,

    visibility: wgpu::ComputePipeline,
    visibility_shadow4: wgpu::ComputePipeline,
    histogram: wgpu::ComputePipeline,
    prefix_sum: wgpu::ComputePipeline,
    scatter: wgpu::ComputePipeline,
    scatter_stable: wgpu::ComputePipeline,
    emit: wgpu::ComputePipeline,

    frustum_buffers: [wgpu::Buffer; FRAME_COUNT],
    shadow_buffers: [wgpu::Buffer; FRAME_COUNT],
}

const WORKGROUP: u32 = 64;

fn groups_for(count: u32) -> u32 {
    count.div_ceil(WORKGROUP).max(1)
}

impl GpuCuller {
    pub fn new(
        device: &wgpu::Device,
        shaders: &mut ShaderManager,
        pipelines: &mut PipelineCache,
        constants_layout: &wgpu::BindGroupLayout,
    ) -> Self {
        let ro = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let rw = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cull Scene Layout"),
            entries: &[ro(0), ro(1)],
        });

        let view_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cull View Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<FrustumConstants>() as u64,
                        ),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });

        let shadow_view_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Cull Shadow View Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<ShadowCascadeConstants>() as u64,
                        ),
                    },
                    count: None,
                }],
            });

        let io_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cull IO Layout"),
            entries: &[
                ro(0),
                ro(1),
                ro(2),
                rw(3),
                rw(4),
                rw(5),
                rw(6),
                rw(7),
                rw(8),
            ],
        });

        let (cull_module, cull_hash) = shaders.get_or_compile(
            device,
            "cull.wgsl",
            include_str!("shaders/cull.wgsl"),
        );
        let (shadow_module, shadow_hash) = shaders.get_or_compile(
            device,
            "cull_shadow.wgsl",
            include_str!("shaders/cull_shadow.wgsl"),
        );

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Cull Pipeline Layout"),
            bind_group_layouts: &[
                Some(&scene_layout),
                Some(&view_layout),
                Some(&io_layout),
                Some(constants_layout),
            ],
            immediate_size: 0,
        });
        let shadow_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Cull Shadow Pipeline Layout"),
            bind_group_layouts: &[
                Some(&scene_layout),
                Some(&shadow_view_layout),
                Some(&io_layout),
                Some(constants_layout),
            ],
            immediate_size: 0,
        });

        let mut compute = |label: &'static str,
                           module: &wgpu::ShaderModule,
                           shader_hash: u64,
                           entry: &'static str,
                           pl: &wgpu::PipelineLayout| {
            pipelines.get_or_create_compute(&("cull", shader_hash, entry), label, || {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(pl),
                    module,
                    entry_point: Some(entry),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
            })
        };

        let uniform = |label: &str, size: u64| {
            std::array::from_fn(|_| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
        };

        Self {
            visibility: compute(
                "Cull Visibility",
                &cull_module,
                cull_hash,
                "visibility_main",
                &layout,
            ),
            visibility_shadow4: compute(
                "Cull Shadow4 Visibility",
                &shadow_module,
                shadow_hash,
                "visibility_shadow4",
                &shadow_layout,
            ),
            histogram: compute(
                "Cull Histogram",
                &cull_module,
                cull_hash,
                "histogram_main",
                &layout,
            ),
            prefix_sum: compute(
                "Cull Prefix Sum",
                &cull_module,
                cull_hash,
                "prefix_sum_main",
                &layout,
            ),
            scatter: compute("Cull Scatter", &cull_module, cull_hash, "scatter_main", &layout),
            scatter_stable: compute(
                "Cull Scatter Stable",
                &cull_module,
                cull_hash,
                "scatter_stable_main",
                &layout,
            ),
            emit: compute("Cull Emit", &cull_module, cull_hash, "emit_main", &layout),

            frustum_buffers: uniform(
                "Frustum Constants",
                std::mem::size_of::<FrustumConstants>() as u64,
            ),
            shadow_buffers: uniform(
                "Shadow Cascade Constants",
                std::mem::size_of::<ShadowCascadeConstants>() as u64,
            ),
            scene_layout,
            view_layout,
            shadow_view_layout,
            io_layout,
        }
    }

    pub fn write_frustum(&self, queue: &wgpu::Queue, frame: usize, constants: &FrustumConstants) {
        queue.write_buffer(
            &self.frustum_buffers[frame % FRAME_COUNT],
            0,
            bytemuck::bytes_of(constants),
        );
    }

    pub fn write_shadow(
        &self,
        queue: &wgpu::Queue,
        frame: usize,
        constants: &ShadowCascadeConstants,
    ) {
        queue.write_buffer(
            &self.shadow_buffers[frame % FRAME_COUNT],
            0,
            bytemuck::bytes_of(constants),
        );
    }

    #[must_use]
    pub fn shadow_constants_buffer(&self, frame: usize) -> &wgpu::Buffer {
        &self.shadow_buffers[frame % FRAME_COUNT]
    }

    // ── Bind group assembly (per frame; buffers may have grown) ────────

    #[must_use]
    pub fn scene_bind_group(
        &self,
        device: &wgpu::Device,
        transforms: &wgpu::Buffer,
        mesh_registry: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Cull Scene BindGroup"),
            layout: &self.scene_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: transforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: mesh_registry.as_entire_binding(),
                },
            ],
        })
    }

    #[must_use]
    pub fn view_bind_group(
        &self,
        device: &wgpu::Device,
        frame: usize,
        hiz_view: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Cull View BindGroup"),
            layout: &self.view_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.frustum_buffers[frame % FRAME_COUNT].as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(hiz_view),
                },
            ],
        })
    }

    #[must_use]
    pub fn shadow_view_bind_group(&self, device: &wgpu::Device, frame: usize) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Cull Shadow View BindGroup"),
            layout: &self.shadow_view_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.shadow_buffers[frame % FRAME_COUNT].as_entire_binding(),
            }],
        })
    }

    #[must_use]
    pub fn io_bind_group(
        &self,
        device: &wgpu::Device,
        frame: usize,
        instances: &wgpu::Buffer,
        subbatch_ids: &wgpu::Buffer,
        subbatch_table: &wgpu::Buffer,
        buffers: &CullBuffers,
    ) -> wgpu::BindGroup {
        fn entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
            wgpu::BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            }
        }
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Cull IO BindGroup"),
            layout: &self.io_layout,
            entries: &[
                entry(0, instances),
                entry(1, subbatch_ids),
                entry(2, subbatch_table),
                entry(3, buffers.visibility.buffer(frame)),
                entry(4, buffers.histogram.buffer(frame)),
                entry(5, buffers.counters.buffer(frame)),
                entry(6, buffers.visible.buffer(frame)),
                entry(7, buffers.commands.buffer(frame)),
                entry(8, &buffers.stats),
            ],
        })
    }

    // ── Encoding ───────────────────────────────────────────────────────

    /// Zeroes the accumulation buffers a batch relies on. Called once per
    /// batch before its dispatches.
    pub fn clear_accumulators(&self, encoder: &mut wgpu::CommandEncoder, buffers: &CullBuffers, frame: usize) {
        encoder.clear_buffer(buffers.histogram.buffer(frame), 0, None);
        encoder.clear_buffer(&buffers.stats, 0, None);
    }

    /// Main-view culling: visibility then compaction, one region.
    pub fn encode_main(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        groups: &CullGroups<'_>,
        constants_offset: u32,
        instance_count: u32,
        subbatch_count: u32,
        stable_scatter: bool,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("GPU Cull"),
            timestamp_writes: None,
        });
        self.bind_common(&mut pass, groups, constants_offset);

        pass.set_pipeline(&self.visibility);
        pass.dispatch_workgroups(groups_for(instance_count), 1, 1);

        self.encode_compaction_inner(
            &mut pass,
            instance_count,
            subbatch_count,
            stable_scatter,
        );
    }

    /// Shadow4 visibility: one dispatch fills all four cascade regions.
    pub fn encode_shadow_visibility(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        groups: &CullGroups<'_>,
        constants_offset: u32,
        instance_count: u32,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("GPU Cull Shadow4"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.visibility_shadow4);
        pass.set_bind_group(0, groups.scene, &[]);
        pass.set_bind_group(1, groups.view, &[]);
        pass.set_bind_group(2, groups.io, &[]);
        pass.set_bind_group(3, groups.constants, &[constants_offset]);
        pass.dispatch_workgroups(groups_for(instance_count), 1, 1);
    }

    /// Histogram → prefix → scatter → emit for one region (the region
    /// bases come from the draw constants at `constants_offset`).
    pub fn encode_compaction(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        groups: &CullGroups<'_>,
        constants_offset: u32,
        instance_count: u32,
        subbatch_count: u32,
        stable_scatter: bool,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("GPU Cull Compaction"),
            timestamp_writes: None,
        });
        self.bind_common(&mut pass, groups, constants_offset);
        self.encode_compaction_inner(&mut pass, instance_count, subbatch_count, stable_scatter);
    }

    fn bind_common(
        &self,
        pass: &mut wgpu::ComputePass<'_>,
        groups: &CullGroups<'_>,
        constants_offset: u32,
    ) {
        pass.set_bind_group(0, groups.scene, &[]);
        pass.set_bind_group(1, groups.view, &[]);
        pass.set_bind_group(2, groups.io, &[]);
        pass.set_bind_group(3, groups.constants, &[constants_offset]);
    }

    fn encode_compaction_inner(
        &self,
        pass: &mut wgpu::ComputePass<'_>,
        instance_count: u32,
        subbatch_count: u32,
        stable_scatter: bool,
    ) {
        pass.set_pipeline(&self.histogram);
        pass.dispatch_workgroups(groups_for(instance_count), 1, 1);

        pass.set_pipeline(&self.prefix_sum);
        pass.dispatch_workgroups(1, 1, 1);

        if stable_scatter {
            pass.set_pipeline(&self.scatter_stable);
            pass.dispatch_workgroups(1, 1, 1);
        } else {
            pass.set_pipeline(&self.scatter);
            pass.dispatch_workgroups(groups_for(instance_count), 1, 1);
        }

        pass.set_pipeline(&self.emit);
        pass.dispatch_workgroups(groups_for(subbatch_count), 1, 1);
    }
}

/// Bind groups for one batch's dispatches.
pub struct CullGroups<'a> {
    pub scene: &'a wgpu::BindGroup,
    pub view: &'a wgpu::BindGroup,
    pub io: &'a wgpu::BindGroup,
    pub constants: &'a wgpu::BindGroup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frustum_constants_layout_matches_wgsl() {
        // WGSL: 6 vec4 + mat4x4 + vec2 + 2×u32 + 2×f32 + vec2 pad = 192.
        assert_eq!(std::mem::size_of::<FrustumConstants>(), 192);
        assert_eq!(std::mem::offset_of!(FrustumConstants, prev_view_proj), 96);
        assert_eq!(std::mem::offset_of!(FrustumConstants, hiz_size), 160);
        assert_eq!(std::mem::offset_of!(FrustumConstants, camera_near), 176);
    }

    #[test]
    fn shadow_constants_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<ShadowCascadeConstants>(), 672);
        assert_eq!(
            std::mem::offset_of!(ShadowCascadeConstants, light_view_proj),
            416
        );
    }

    #[test]
    fn workgroup_rounding() {
        assert_eq!(groups_for(0), 1);
        assert_eq!(groups_for(1), 1);
        assert_eq!(groups_for(64), 1);
        assert_eq!(groups_for(65), 2);
    }
}
