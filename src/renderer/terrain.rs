//! GPU Terrain Quadtree
//!
//! Self-contained terrain component. The CPU uploads a heightmap once,
//! builds the height-range pyramid once, and per frame records four
//! compute passes followed by an indirect self-draw — the CPU never
//! sees the tree.
//!
//! ```text
//! mark_splits ─► emit_leaves ─► build_args ─► draw_indirect (G-buffer)
//!   (1/node)       (1/node)     (1 thread)    (32x32 grid / patch)
//! ```
//!
//! The flat node indexing and the restricted-quadtree / leaf / stitch
//! rules are mirrored by the pure functions at the bottom of this file;
//! `tests/terrain_tests.rs` drives them against the quadtree invariants.
//! The shaders implement exactly the same arithmetic.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::camera::RenderCamera;
use crate::gpu::GpuContext;
use crate::renderer::pipeline::{PipelineCache, ShaderManager};
use crate::renderer::settings::RenderSettings;
use crate::renderer::targets::{
    ALBEDO_FORMAT, DATA_FORMAT, LINEAR_DEPTH_FORMAT, NORMAL_FORMAT, RenderTargets,
};

pub const STITCH_NEG_X: u32 = 1;
pub const STITCH_POS_X: u32 = 2;
pub const STITCH_NEG_Z: u32 = 4;
pub const STITCH_POS_Z: u32 = 8;

/// Patch grid resolution (quads per side).
pub const GRID_QUADS: u32 = 32;
pub const GRID_VERTICES: u32 = GRID_QUADS * GRID_QUADS * 6;

const PATCH_CAPACITY: u32 = 4096;
const HIZ_ENABLED: u32 = 1;

// ─── Flat node indexing (mirrored in terrain.wgsl) ───────────────────────────

/// First flat index of `depth`: `(4^depth − 1) / 3`.
#[must_use]
pub fn level_offset(depth: u32) -> u32 {
    ((1u32 << (2 * depth)) - 1) / 3
}

/// Node count of a complete 4-ary tree of depth `max_depth` (inclusive).
#[must_use]
pub fn total_nodes(max_depth: u32) -> u32 {
    level_offset(max_depth + 1)
}

/// Flat index of node `(depth, x, y)`, row-major per level.
#[must_use]
pub fn flat_index(depth: u32, x: u32, y: u32) -> u32 {
    level_offset(depth) + y * (1 << depth) + x
}

/// Inverse of [`flat_index`].
#[must_use]
pub fn decompose(flat: u32) -> (u32, u32, u32) {
    let mut depth = 0;
    while level_offset(depth + 1) <= flat {
        depth += 1;
    }
    let local = flat - level_offset(depth);
    let side = 1u32 << depth;
    (depth, local % side, local / side)
}

// ─── GPU records ─────────────────────────────────────────────────────────────

/// Emitted patch record (32 bytes), read by the terrain vertex stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TerrainPatch {
    /// min_x, min_z, size, unused
    pub rect: [f32; 4],
    pub lod: u32,
    pub stitch: u32,
    pub _pad: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TerrainConstants {
    planes: [[f32; 4]; 6],
    prev_view_proj: [[f32; 4]; 4],
    camera_pos: [f32; 4],
    world: [f32; 4],
    params: [f32; 4],
    counts: [u32; 4],
    hiz_params: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TerrainDrawConstants {
    view: [[f32; 4]; 4],
    view_proj: [[f32; 4]; 4],
    world: [f32; 4],
    params: [f32; 4],
}

/// World-space placement of the terrain.
#[derive(Debug, Clone, Copy)]
pub struct TerrainDesc {
    pub origin: (f32, f32),
    pub world_size: f32,
    pub height_scale: f32,
}

// ─── Component ───────────────────────────────────────────────────────────────

pub struct TerrainQuadtree {
    desc: TerrainDesc,

    heightmap: wgpu::Texture,
    heightmap_view: wgpu::TextureView,
    height_sampler: wgpu::Sampler,
    pyramid_texture: wgpu::Texture,
    pyramid_view: wgpu::TextureView,

    split_flags: wgpu::Buffer,
    patches: wgpu::Buffer,
    patch_counter: wgpu::Buffer,
    draw_args: wgpu::Buffer,
    constants: wgpu::Buffer,
    draw_constants: wgpu::Buffer,

    compute_scene_layout: wgpu::BindGroupLayout,
    compute_io_layout: wgpu::BindGroupLayout,
    io_bind_group: wgpu::BindGroup,

    mark_splits: wgpu::ComputePipeline,
    emit_leaves: wgpu::ComputePipeline,
    build_args: wgpu::ComputePipeline,

    draw_layout: wgpu::BindGroupLayout,
    patch_layout: wgpu::BindGroupLayout,
    draw_pipeline: wgpu::RenderPipeline,
}

impl TerrainQuadtree {
    /// Creates the terrain and builds the height-range pyramid
    /// (submitted immediately on its own encoder).
    pub fn new(
        gpu: &GpuContext,
        shaders: &mut ShaderManager,
        pipelines: &mut PipelineCache,
        heightmap: &[f32],
        resolution: u32,
        desc: TerrainDesc,
        settings: &RenderSettings,
    ) -> Self {
        assert_eq!(
            heightmap.len(),
            (resolution * resolution) as usize,
            "heightmap must be resolution^2 texels"
        );
        let device = &gpu.device;
        let max_depth = settings.terrain_max_depth.min(12);
        let node_count = total_nodes(max_depth);

        // 1. Raw heightmap texture.
        let hm_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Terrain Heightmap"),
            size: wgpu::Extent3d {
                width: resolution,
                height: resolution,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &hm_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(heightmap),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * resolution),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: resolution,
                height: resolution,
                depth_or_array_layers: 1,
            },
        );
        let heightmap_view = hm_texture.create_view(&wgpu::TextureViewDescriptor::default());

        // 2. Height-range pyramid (built once below).
        let pyramid_base = (resolution / 4).max(1);
        let pyramid_mips = crate::renderer::targets::mip_count_for(pyramid_base, pyramid_base);
        let pyramid = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Terrain Height Pyramid"),
            size: wgpu::Extent3d {
                width: pyramid_base,
                height: pyramid_base,
                depth_or_array_layers: 1,
            },
            mip_level_count: pyramid_mips,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rg32Float,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let pyramid_view = pyramid.create_view(&wgpu::TextureViewDescriptor::default());

        // 3. Node/patch buffers.
        let storage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let split_flags = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Split Flags"),
            size: u64::from(node_count) * 4,
            usage: storage,
            mapped_at_creation: false,
        });
        let patches = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Patches"),
            size: u64::from(PATCH_CAPACITY) * std::mem::size_of::<TerrainPatch>() as u64,
            usage: storage,
            mapped_at_creation: false,
        });
        let patch_counter = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Patch Counter"),
            size: 4,
            usage: storage,
            mapped_at_creation: false,
        });
        let draw_args = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Draw Args"),
            size: 16,
            usage: storage | wgpu::BufferUsages::INDIRECT,
            mapped_at_creation: false,
        });
        let constants = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Constants"),
            size: std::mem::size_of::<TerrainConstants>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let draw_constants = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Draw Constants"),
            size: std::mem::size_of::<TerrainDrawConstants>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // 4. Compute layouts + pipelines.
        let compute_scene_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Terrain Compute Scene Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: wgpu::BufferSize::new(
                                std::mem::size_of::<TerrainConstants>() as u64,
                            ),
                        },
                        count: None,
                    },
                    texture_entry(1),
                    texture_entry(2),
                ],
            });
        let compute_io_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Terrain Compute IO Layout"),
                entries: &[
                    storage_entry(0, false),
                    storage_entry(1, false),
                    storage_entry(2, false),
                    storage_entry(3, false),
                ],
            });

        let (module, shader_hash) = shaders.get_or_compile(
            device,
            "terrain.wgsl",
            include_str!("shaders/terrain.wgsl"),
        );
        let compute_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Terrain Compute Pipeline Layout"),
                bind_group_layouts: &[Some(&compute_scene_layout), Some(&compute_io_layout)],
                immediate_size: 0,
            });
        let mut compute = |label: &'static str, entry: &'static str| {
            pipelines.get_or_create_compute(&("terrain", shader_hash, entry), label, || {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(&compute_pipeline_layout),
                    module: &module,
                    entry_point: Some(entry),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
            })
        };
        let mark_splits = compute("Terrain Mark Splits", "mark_splits");
        let emit_leaves = compute("Terrain Emit Leaves", "emit_leaves");
        let build_args = compute("Terrain Build Args", "build_args");

        let io_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain IO BindGroup"),
            layout: &compute_io_layout,
            entries: &[
                buffer_entry(0, &split_flags),
                buffer_entry(1, &patches),
                buffer_entry(2, &patch_counter),
                buffer_entry(3, &draw_args),
            ],
        });

        // 5. Draw pipeline (G-buffer MRT).
        let height_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Terrain Height Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Terrain Draw Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<TerrainDrawConstants>() as u64,
                        ),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let patch_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Terrain Patch Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let (draw_module, draw_hash) = shaders.get_or_compile(
            device,
            "terrain_draw.wgsl",
            include_str!("shaders/terrain_draw.wgsl"),
        );
        let draw_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Terrain Draw Pipeline Layout"),
                bind_group_layouts: &[Some(&draw_layout), Some(&patch_layout)],
                immediate_size: 0,
            });
        let gbuffer_target = |format| {
            Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })
        };
        let draw_pipeline = pipelines.get_or_create_render(
            &("terrain_draw", draw_hash, gpu.depth_format),
            "Terrain Draw Pipeline",
            || {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("Terrain Draw Pipeline"),
                    layout: Some(&draw_pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &draw_module,
                        entry_point: Some("vs_main"),
                        buffers: &[],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &draw_module,
                        entry_point: Some("fs_main"),
                        targets: &[
                            gbuffer_target(ALBEDO_FORMAT),
                            gbuffer_target(NORMAL_FORMAT),
                            gbuffer_target(DATA_FORMAT),
                            gbuffer_target(LINEAR_DEPTH_FORMAT),
                        ],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        cull_mode: Some(wgpu::Face::Back),
                        ..Default::default()
                    },
                    depth_stencil: Some(wgpu::DepthStencilState {
                        format: gpu.depth_format,
                        depth_write_enabled: Some(true),
                        // Reverse-Z
                        depth_compare: Some(wgpu::CompareFunction::Greater),
                        stencil: wgpu::StencilState::default(),
                        bias: wgpu::DepthBiasState::default(),
                    }),
                    multisample: wgpu::MultisampleState::default(),
                    multiview_mask: None,
                    cache: None,
                })
            },
        );

        let terrain = Self {
            desc,
            heightmap: hm_texture,
            heightmap_view,
            height_sampler,
            pyramid_texture: pyramid,
            pyramid_view,
            split_flags,
            patches,
            patch_counter,
            draw_args,
            constants,
            draw_constants,
            compute_scene_layout,
            compute_io_layout,
            io_bind_group,
            mark_splits,
            emit_leaves,
            build_args,
            draw_layout,
            patch_layout,
            draw_pipeline,
        };

        terrain.build_height_pyramid(gpu, shaders, pipelines, pyramid_base, pyramid_mips);
        terrain
    }

    /// One-time height-range pyramid build on its own encoder.
    fn build_height_pyramid(
        &self,
        gpu: &GpuContext,
        shaders: &mut ShaderManager,
        pipelines: &mut PipelineCache,
        base: u32,
        mips: u32,
    ) {
        let device = &gpu.device;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Height Pyramid Layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rg32Float,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });
        let (module, shader_hash) = shaders.get_or_compile(
            device,
            "height_pyramid.wgsl",
            include_str!("shaders/height_pyramid.wgsl"),
        );
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Height Pyramid Pipeline Layout"),
            bind_group_layouts: &[Some(&layout)],
            immediate_size: 0,
        });
        let mut make_pipeline = |label: &'static str, entry: &'static str| {
            pipelines.get_or_create_compute(&("height_pyramid", shader_hash, entry), label, || {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: Some(entry),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
            })
        };
        let supersample = make_pipeline("Height Pyramid Supersample", "supersample");
        let downsample = make_pipeline("Height Pyramid Downsample", "downsample");

        let mip_view = |mip: u32| {
            self.pyramid_texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("Height Pyramid Mip"),
                base_mip_level: mip,
                mip_level_count: Some(1),
                ..Default::default()
            })
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Height Pyramid Build Encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Height Pyramid Build"),
                timestamp_writes: None,
            });

            for mip in 0..mips {
                let src_range = if mip == 0 { mip_view(0) } else { mip_view(mip - 1) };
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Height Pyramid BindGroup"),
                    layout: &layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&self.heightmap_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&src_range),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::TextureView(&mip_view(mip)),
                        },
                    ],
                });
                pass.set_pipeline(if mip == 0 { &supersample } else { &downsample });
                pass.set_bind_group(0, &bind_group, &[]);
                let dim = (base >> mip).max(1);
                pass.dispatch_workgroups(dim.div_ceil(8), dim.div_ceil(8), 1);
            }
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
        gpu.fence.signal(&gpu.queue);
        log::info!("Terrain height pyramid built ({base}x{base}, {mips} mips)");
    }

    /// Uploads this frame's constants.
    pub fn prepare(
        &self,
        queue: &wgpu::Queue,
        camera: &RenderCamera,
        settings: &RenderSettings,
        targets: &RenderTargets,
    ) {
        let max_depth = settings.terrain_max_depth.min(12);
        let planes = camera.frustum.planes();
        let mut flags = 0;
        if settings.hiz_enabled && targets.hiz.valid {
            flags |= HIZ_ENABLED;
        }
        let constants = TerrainConstants {
            planes: planes.map(|p| p.to_array()),
            prev_view_proj: camera.view_projection_matrix.to_cols_array_2d(),
            camera_pos: [camera.position.x, camera.position.y, camera.position.z, 0.0],
            world: [
                self.desc.origin.0,
                self.desc.origin.1,
                self.desc.world_size,
                self.desc.height_scale,
            ],
            params: [
                settings.terrain_pixel_error,
                targets.size.1 as f32,
                camera.projection_matrix.y_axis.y,
                camera.near,
            ],
            counts: [max_depth, total_nodes(max_depth), PATCH_CAPACITY, flags],
            hiz_params: [
                targets.hiz.size.0 as f32,
                targets.hiz.size.1 as f32,
                targets.hiz.mip_count as f32,
                0.0,
            ],
        };
        queue.write_buffer(&self.constants, 0, bytemuck::bytes_of(&constants));

        let heightmap_texel = 1.0 / self.heightmap.width() as f32;
        let draw = TerrainDrawConstants {
            view: camera.view_matrix.to_cols_array_2d(),
            view_proj: camera.view_projection_matrix.to_cols_array_2d(),
            world: [
                self.desc.origin.0,
                self.desc.origin.1,
                self.desc.world_size,
                self.desc.height_scale,
            ],
            params: [heightmap_texel, GRID_QUADS as f32, 0.0, 0.0],
        };
        queue.write_buffer(&self.draw_constants, 0, bytemuck::bytes_of(&draw));
    }

    /// Records the four compute passes. Runs on the frame encoder,
    /// before the G-buffer pass that consumes the patches.
    pub fn encode_update(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        targets: &RenderTargets,
        max_depth: u32,
    ) {
        encoder.clear_buffer(&self.split_flags, 0, None);
        encoder.clear_buffer(&self.patch_counter, 0, None);

        let scene = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain Scene BindGroup"),
            layout: &self.compute_scene_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.constants.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&self.pyramid_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&targets.hiz.sampled_view),
                },
            ],
        });

        let nodes = total_nodes(max_depth.min(12));
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Terrain Quadtree"),
            timestamp_writes: None,
        });
        pass.set_bind_group(0, &scene, &[]);
        pass.set_bind_group(1, &self.io_bind_group, &[]);

        pass.set_pipeline(&self.mark_splits);
        pass.dispatch_workgroups(nodes.div_ceil(64), 1, 1);

        pass.set_pipeline(&self.emit_leaves);
        pass.dispatch_workgroups(nodes.div_ceil(64), 1, 1);

        pass.set_pipeline(&self.build_args);
        pass.dispatch_workgroups(1, 1, 1);
    }

    /// Records the self-draw inside an open G-buffer render pass.
    pub fn encode_draw(&self, device: &wgpu::Device, pass: &mut wgpu::RenderPass<'_>) {
        let draw_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain Draw BindGroup"),
            layout: &self.draw_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.draw_constants.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&self.heightmap_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.height_sampler),
                },
            ],
        });
        let patch_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain Patch BindGroup"),
            layout: &self.patch_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.patches.as_entire_binding(),
            }],
        });

        pass.set_pipeline(&self.draw_pipeline);
        pass.set_bind_group(0, &draw_group, &[]);
        pass.set_bind_group(1, &patch_group, &[]);
        pass.draw_indirect(&self.draw_args, 0);
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn buffer_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

// ============================================================================
// CPU mirror of the quadtree rules (shader-equivalent, test surface)
// ============================================================================

/// Screen-space error of a node: `error · screenH / (2 · dist · tan(fov/2))`
/// with `proj_scale_y = 1 / tan(fov/2)`.
#[must_use]
pub fn screen_space_error(
    geometric_error: f32,
    distance: f32,
    screen_height: f32,
    proj_scale_y: f32,
) -> f32 {
    geometric_error * screen_height * proj_scale_y / (2.0 * distance.max(1e-3))
}

/// Parameters for the CPU reference evaluation.
#[derive(Debug, Clone, Copy)]
pub struct QuadtreeParams {
    pub origin: (f32, f32),
    pub world_size: f32,
    pub max_depth: u32,
    pub screen_height: f32,
    pub proj_scale_y: f32,
    pub pixel_error: f32,
    pub camera: Vec3,
}

/// Reference mark-splits: evaluates the split rule for every node, with
/// `height_range(depth, x, y)` supplying `(min, max)` world heights.
#[must_use]
pub fn reference_split_flags(
    params: &QuadtreeParams,
    height_range: &dyn Fn(u32, u32, u32) -> (f32, f32),
) -> Vec<bool> {
    let node_count = total_nodes(params.max_depth) as usize;
    let mut flags = vec![false; node_count];

    let mut mark_ancestors = |flags: &mut Vec<bool>, mut depth: u32, mut x: u32, mut y: u32| {
        while depth > 0 {
            depth -= 1;
            x >>= 1;
            y >>= 1;
            flags[flat_index(depth, x, y) as usize] = true;
        }
    };

    for flat in 0..node_count as u32 {
        let (depth, x, y) = decompose(flat);
        if depth >= params.max_depth {
            continue;
        }
        let size = params.world_size / (1u32 << depth) as f32;
        let (h_min, h_max) = height_range(depth, x, y);
        let center = Vec3::new(
            params.origin.0 + (x as f32 + 0.5) * size,
            (h_min + h_max) * 0.5,
            params.origin.1 + (y as f32 + 0.5) * size,
        );
        let dist = params.camera.distance(center);
        let error = screen_space_error(
            h_max - h_min,
            dist,
            params.screen_height,
            params.proj_scale_y,
        );
        if error <= params.pixel_error {
            continue;
        }

        flags[flat as usize] = true;
        mark_ancestors(&mut flags, depth, x, y);
        let side = 1u32 << depth;
        if x > 0 {
            mark_ancestors(&mut flags, depth, x - 1, y);
        }
        if x + 1 < side {
            mark_ancestors(&mut flags, depth, x + 1, y);
        }
        if y > 0 {
            mark_ancestors(&mut flags, depth, x, y - 1);
        }
        if y + 1 < side {
            mark_ancestors(&mut flags, depth, x, y + 1);
        }
    }
    flags
}

/// A reference leaf with its stitch mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceLeaf {
    pub depth: u32,
    pub x: u32,
    pub y: u32,
    pub stitch: u32,
}

/// Reference emit-leaves (no view culling): every node satisfying the
/// leaf predicate, with the stitch mask of edges bordering coarser
/// neighbors.
#[must_use]
pub fn reference_leaves(split_flags: &[bool], max_depth: u32) -> Vec<ReferenceLeaf> {
    let is_split =
        |depth: u32, x: u32, y: u32| split_flags[flat_index(depth, x, y) as usize];
    let mut leaves = Vec::new();

    for flat in 0..total_nodes(max_depth) {
        let (depth, x, y) = decompose(flat);
        let parent_ok = depth == 0 || is_split(depth - 1, x >> 1, y >> 1);
        let self_leaf = !is_split(depth, x, y) || depth == max_depth;
        if !(parent_ok && self_leaf) {
            continue;
        }

        let mut stitch = 0;
        if depth > 0 {
            let side = 1u32 << depth;
            if x > 0 && !is_split(depth - 1, (x - 1) >> 1, y >> 1) {
                stitch |= STITCH_NEG_X;
            }
            if x + 1 < side && !is_split(depth - 1, (x + 1) >> 1, y >> 1) {
                stitch |= STITCH_POS_X;
            }
            if y > 0 && !is_split(depth - 1, x >> 1, (y - 1) >> 1) {
                stitch |= STITCH_NEG_Z;
            }
            if y + 1 < side && !is_split(depth - 1, x >> 1, (y + 1) >> 1) {
                stitch |= STITCH_POS_Z;
            }
        }
        leaves.push(ReferenceLeaf {
            depth,
            x,
            y,
            stitch,
        });
    }
    leaves
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_indexing_round_trips() {
        assert_eq!(level_offset(0), 0);
        assert_eq!(level_offset(1), 1);
        assert_eq!(level_offset(2), 5);
        assert_eq!(level_offset(3), 21);
        assert_eq!(total_nodes(2), 21);

        for flat in 0..total_nodes(4) {
            let (d, x, y) = decompose(flat);
            assert_eq!(flat_index(d, x, y), flat);
            assert!(x < (1 << d) && y < (1 << d));
        }
    }

    #[test]
    fn patch_record_is_32_bytes() {
        assert_eq!(std::mem::size_of::<TerrainPatch>(), 32);
    }

    #[test]
    fn grid_vertex_count() {
        assert_eq!(GRID_VERTICES, 6144);
    }

    #[test]
    fn screen_error_shrinks_with_distance() {
        let near = screen_space_error(10.0, 10.0, 1080.0, 1.0);
        let far = screen_space_error(10.0, 1000.0, 1080.0, 1.0);
        assert!(near > far * 50.0);
    }
}
