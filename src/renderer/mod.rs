//! Deferred Renderer
//!
//! The top-level owning record of the rendering core. There are no
//! hidden globals: every subsystem lives in [`DeferredRenderer`] and is
//! passed by reference where needed, so lifetimes are explicit and
//! teardown is the drop order.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                 DeferredRenderer                  │
//! │            (frame orchestration, tick)            │
//! ├──────────────────────┬────────────────────────────┤
//! │ CommandBuffer        │  GpuCuller / HiZBuilder    │
//! │ (submissions, batch) │  (visibility, compaction)  │
//! ├──────────────────────┼────────────────────────────┤
//! │ TransformBuffer      │  TerrainQuadtree           │
//! │ MeshRegistry/Pools   │  ShadowCascades + SDSM     │
//! │ MaterialRegistry     │  Passes (G-buffer → …)     │
//! ├──────────────────────┴────────────────────────────┤
//! │     GpuContext · FrameFence · DeferredDisposal    │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! # Frame order (`tick`)
//!
//! 1. Sweep deferred disposals, drain streaming (4 ms budget)
//! 2. Flush dirty tables (transforms, registry, materials)
//! 3. Shadow4 cull → shadow cascade passes
//! 4. Main cull → G-buffer (+ terrain self-draw, custom actions)
//! 5. Hi-Z build (consumed by the *next* frame's culler), SDSM reduce
//! 6. Light cull → light pass (sun + point volumes) → skybox
//! 7. Composition → present
//!
//! The loop never unwinds across a frame boundary: `tick` catches and
//! logs recoverable errors; only device loss is returned as fatal.

pub mod batch;
pub mod cull;
pub mod hiz;
pub mod passes;
pub mod pipeline;
pub mod settings;
pub mod shadow;
pub mod targets;
pub mod terrain;
pub mod view;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::camera::RenderCamera;
use crate::errors::{Result, StrataError};
use crate::gpu::{BindlessTextures, ConstantRing, DeferredDisposal, DrawConstants, GpuContext};
use crate::resources::{
    Effect, GeometryPool, Material, MaterialRegistry, MeshPart, MeshRegistry, PassMask,
    TransformBuffer, primitives,
};
use crate::streaming::{GpuBridge, GpuMesh, StreamingManager};
use crate::utils::FpsCounter;

use self::batch::{CommandBuffer, CustomData, CustomLayout, Pass};
use self::cull::{CullGroups, FrustumConstants, GpuCuller, ShadowCascadeConstants};
use self::hiz::HiZBuilder;
use self::passes::{
    BatchDraw, ComposePass, GBufferPass, LightPass, PassLayouts, ShadowPass, SkyboxPass,
};
use self::pipeline::{PipelineCache, ShaderManager};
use self::settings::RenderSettings;
use self::shadow::{DepthBoundsReducer, build_cascades, effective_shadow_range};
use self::targets::RenderTargets;
use self::terrain::{TerrainDesc, TerrainQuadtree};
use self::view::RenderView;

// ─── Global uniforms (group 0, binding 0) ─────────────────────────────────────

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GlobalUniforms {
    view: [[f32; 4]; 4],
    proj: [[f32; 4]; 4],
    view_proj: [[f32; 4]; 4],
    inv_view: [[f32; 4]; 4],
    inv_view_proj: [[f32; 4]; 4],
    camera_pos: [f32; 4],
    screen: [f32; 4],
    sun_dir_time: [f32; 4],
    sun_color_ambient: [f32; 4],
    misc: [f32; 4],
    clear_color: [f32; 4],
}

// ─── Lights ──────────────────────────────────────────────────────────────────

new_key_type! {
    /// Handle to a registered point light.
    pub struct PointLightId;
}

/// Point light parameters; the GPU sees them as two vec4 rows of custom
/// data `[pos, radius] [color, intensity]`.
#[derive(Debug, Clone, Copy)]
pub struct PointLight {
    pub position: Vec3,
    pub radius: f32,
    pub color: Vec3,
    pub intensity: f32,
}

struct PointLightEntry {
    light: PointLight,
    transform_slot: u32,
}

#[derive(Debug, Clone, Copy)]
struct SunLight {
    direction: Vec3,
    color: Vec3,
    intensity: f32,
}

// ─── Frame statistics ────────────────────────────────────────────────────────

/// Per-frame counters surfaced to the title bar.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    pub frame_number: u64,
    pub fps: f32,
    pub frame_ms: f32,
    pub opaque_submissions: u32,
    pub shadow_submissions: u32,
    pub light_submissions: u32,
    pub streamed_items: usize,
}

impl FrameStats {
    /// One-line status for the window title.
    #[must_use]
    pub fn status_line(&self) -> String {
        format!(
            "{:.0} fps ({:.2} ms) | frame {} | draws {} (+{} shadow, {} lights) | streamed {}",
            self.fps,
            self.frame_ms,
            self.frame_number,
            self.opaque_submissions,
            self.shadow_submissions,
            self.light_submissions,
            self.streamed_items,
        )
    }
}

// ─── Renderer ────────────────────────────────────────────────────────────────

pub struct DeferredRenderer {
    gpu: GpuContext,
    settings: RenderSettings,

    shaders: ShaderManager,
    pipelines: PipelineCache,
    disposal: DeferredDisposal,
    view: RenderView,
    targets: RenderTargets,

    constants: ConstantRing,
    bindless: BindlessTextures,
    transforms: TransformBuffer,
    mesh_registry: MeshRegistry,
    geometry: GeometryPool,
    materials: MaterialRegistry,
    streaming: StreamingManager,
    command_buffer: CommandBuffer,

    culler: GpuCuller,
    hiz: HiZBuilder,
    depth_reducer: DepthBoundsReducer,
    terrain: Option<TerrainQuadtree>,

    frame_layout: wgpu::BindGroupLayout,
    shadow_render_layout: wgpu::BindGroupLayout,
    globals_buffer: wgpu::Buffer,

    gbuffer_pass: GBufferPass,
    shadow_pass: ShadowPass,
    light_pass: LightPass,
    skybox_pass: SkyboxPass,
    compose_pass: ComposePass,

    sun: SunLight,
    point_lights: SlotMap<PointLightId, PointLightEntry>,
    light_sphere_part: u32,
    light_material: u32,
    light_layout: CustomLayout,

    prev_view_proj: Mat4,
    frozen_frustum: Option<([Vec4; 6], Mat4)>,
    sdsm_bounds: Option<(f32, f32)>,
    start_time: std::time::Instant,
    fps: FpsCounter,
    stats: FrameStats,
}

impl DeferredRenderer {
    /// Creates the device and every subsystem. Shader compilation
    /// failures here are fatal by contract.
    pub async fn new<W>(
        window: W,
        settings: RenderSettings,
        width: u32,
        height: u32,
    ) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let gpu = GpuContext::new(window, &settings, width, height).await?;
        let device = &gpu.device;
        let fence = gpu.fence.clone();

        let mut shaders = ShaderManager::new();
        let mut pipelines = PipelineCache::new();
        let constants = ConstantRing::new(device);
        let mut bindless = BindlessTextures::new(device, &gpu.queue, settings.bindless_capacity);
        let transforms = TransformBuffer::new(device, fence.clone(), settings.max_transforms);
        let mesh_registry = MeshRegistry::new(device, fence.clone());
        let mut geometry = GeometryPool::new(device, fence.clone());
        let materials = MaterialRegistry::new(device, fence.clone());
        let streaming = StreamingManager::new(fence.clone())?;
        let command_buffer = CommandBuffer::new(device, fence.clone());

        let culler = GpuCuller::new(device, &mut shaders, &mut pipelines, constants.layout());
        let hiz = HiZBuilder::new(device, &mut shaders, &mut pipelines);
        let depth_reducer =
            DepthBoundsReducer::new(device, &mut shaders, &mut pipelines, fence.clone());
        let targets = RenderTargets::new(&gpu, settings.shadow_map_size);

        // Group 0 of every render pipeline.
        let frame_layout = Self::create_frame_layout(device);
        // Shadow cascade uniform, render-stage visibility (the culler has
        // its own compute-visible twin over the same buffer).
        let shadow_render_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Shadow Render Constants Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
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

        let globals_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Global Uniforms"),
            size: std::mem::size_of::<GlobalUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let layouts = PassLayouts {
            frame: &frame_layout,
            constants: constants.layout(),
            batch: command_buffer.render_layout(),
            bindless: bindless.layout(),
            shadow_constants: &shadow_render_layout,
        };
        let allow_wireframe = device.features().contains(wgpu::Features::POLYGON_MODE_LINE);
        let gbuffer_pass = GBufferPass::new(
            device,
            &mut shaders,
            &layouts,
            gpu.depth_format,
            allow_wireframe,
        );
        let shadow_pass = ShadowPass::new(device, &mut shaders, &layouts);
        let light_pass = LightPass::new(
            device,
            &mut shaders,
            &layouts,
            std::mem::size_of::<ShadowCascadeConstants>() as u64,
        );
        let skybox_pass = SkyboxPass::new(device, &mut shaders, &layouts);
        let compose_pass = ComposePass::new(device, &mut shaders, &layouts);

        // Unit sphere for point-light volumes, registered up front.
        let sphere = primitives::uv_sphere(1.0, 24, 16);
        let light_sphere_part = {
            let positions = geometry.alloc_positions(&gpu.queue, &sphere.positions)?;
            let normals = geometry.alloc_normals(&gpu.queue, &sphere.normals)?;
            let uvs = geometry.alloc_uvs(&gpu.queue, &sphere.uvs)?;
            let indices = geometry.alloc_indices(&gpu.queue, &sphere.indices)?;
            mesh_registry.register(&MeshPart {
                guid: uuid::Uuid::new_v4(),
                positions,
                normals,
                uvs,
                indices,
                base_index: 0,
                index_count: sphere.indices.len() as u32,
                bone_weights: 0,
                bone_count: 0,
                local_sphere: sphere.bounding_sphere,
            })
        };
        let light_effect = materials.register_effect(Effect::point_light());
        let light_material = materials.register(&Material::new(light_effect));
        let light_layout = CustomLayout {
            size: 32,
            align: 16,
            tag: 0x706c_6974, // point-light rows: [pos, radius][color, intensity]
        };

        // Keep the bindless bind group warm so the first frame does not
        // pay the full-array build inside the render path.
        let _ = bindless.bind_group(device);

        log::info!("Deferred renderer initialized ({width}x{height})");

        Ok(Self {
            gpu,
            settings,
            shaders,
            pipelines,
            disposal: DeferredDisposal::new(),
            view: RenderView::new(),
            targets,
            constants,
            bindless,
            transforms,
            mesh_registry,
            geometry,
            materials,
            streaming,
            command_buffer,
            culler,
            hiz,
            depth_reducer,
            terrain: None,
            frame_layout,
            shadow_render_layout,
            globals_buffer,
            gbuffer_pass,
            shadow_pass,
            light_pass,
            skybox_pass,
            compose_pass,
            sun: SunLight {
                direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
                color: Vec3::ONE,
                intensity: 0.0,
            },
            point_lights: SlotMap::with_key(),
            light_sphere_part,
            light_material,
            light_layout,
            prev_view_proj: Mat4::IDENTITY,
            frozen_frustum: None,
            sdsm_bounds: None,
            start_time: std::time::Instant::now(),
            fps: FpsCounter::new(),
            stats: FrameStats::default(),
        })
    }

    fn create_frame_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        let storage = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Frame Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<GlobalUniforms>() as u64,
                        ),
                    },
                    count: None,
                },
                storage(1), // transforms
                storage(2), // mesh registry
                storage(3), // materials
                storage(4), // positions pool
                storage(5), // normals pool
                storage(6), // uvs pool
            ],
        })
    }

    // ── External surface ───────────────────────────────────────────────

    #[must_use]
    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    #[must_use]
    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        &mut self.settings
    }

    #[must_use]
    pub fn transforms(&self) -> &TransformBuffer {
        &self.transforms
    }

    #[must_use]
    pub fn materials(&self) -> &MaterialRegistry {
        &self.materials
    }

    #[must_use]
    pub fn mesh_registry(&self) -> &MeshRegistry {
        &self.mesh_registry
    }

    #[must_use]
    pub fn streaming(&self) -> &StreamingManager {
        &self.streaming
    }

    pub fn command_buffer(&mut self) -> &mut CommandBuffer {
        &mut self.command_buffer
    }

    #[must_use]
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Rebuilds swapchain, G-buffer, light buffer and Hi-Z.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
        self.targets
            .resize(&self.gpu, &mut self.disposal, (width, height));
    }

    pub fn set_sun(&mut self, direction: Vec3, color: Vec3, intensity: f32) {
        self.sun = SunLight {
            direction: direction.normalize_or_zero(),
            color,
            intensity,
        };
    }

    pub fn add_point_light(&mut self, light: PointLight) -> Option<PointLightId> {
        let Some(slot) = self.transforms.allocate_slot() else {
            log::warn!("Transform table full; dropping point light");
            return None;
        };
        self.write_light_transform(slot, &light);
        Some(self.point_lights.insert(PointLightEntry {
            light,
            transform_slot: slot,
        }))
    }

    pub fn set_point_light(&mut self, id: PointLightId, light: PointLight) {
        if let Some(entry) = self.point_lights.get_mut(id) {
            entry.light = light;
            let slot = entry.transform_slot;
            self.write_light_transform(slot, &light);
        }
    }

    pub fn remove_point_light(&mut self, id: PointLightId) {
        if let Some(entry) = self.point_lights.remove(id) {
            self.transforms.free(entry.transform_slot);
        }
    }

    fn write_light_transform(&self, slot: u32, light: &PointLight) {
        self.transforms.set(
            slot,
            Mat4::from_scale_rotation_translation(
                Vec3::splat(light.radius),
                glam::Quat::IDENTITY,
                light.position,
            ),
        );
    }

    /// Registers a procedural mesh (pool upload + registry row), for
    /// callers that generate geometry instead of streaming it.
    pub fn register_mesh(&mut self, mesh: &crate::streaming::import::CpuMesh) -> Result<GpuMesh> {
        let positions = self.geometry.alloc_positions(&self.gpu.queue, &mesh.positions)?;
        let normals = self.geometry.alloc_normals(&self.gpu.queue, &mesh.normals)?;
        let uvs = self.geometry.alloc_uvs(&self.gpu.queue, &mesh.uvs)?;
        let indices = self.geometry.alloc_indices(&self.gpu.queue, &mesh.indices)?;
        let part_id = self.mesh_registry.register(&MeshPart {
            guid: uuid::Uuid::new_v4(),
            positions,
            normals,
            uvs,
            indices,
            base_index: 0,
            index_count: mesh.indices.len() as u32,
            bone_weights: 0,
            bone_count: 0,
            local_sphere: mesh.bounding_sphere,
        });
        Ok(GpuMesh {
            parts: vec![part_id],
            bounding_sphere: mesh.bounding_sphere,
        })
    }

    /// Installs the terrain component (heightmap in normalized [0, 1]
    /// heights, `resolution`² texels).
    pub fn set_terrain(&mut self, heightmap: &[f32], resolution: u32, desc: TerrainDesc) {
        self.terrain = Some(TerrainQuadtree::new(
            &self.gpu,
            &mut self.shaders,
            &mut self.pipelines,
            heightmap,
            resolution,
            desc,
            &self.settings,
        ));
    }

    // ── Frame ──────────────────────────────────────────────────────────

    /// Renders one frame. Recoverable failures are logged and the frame
    /// continues degraded; only unrecoverable surface/device loss is
    /// returned.
    pub fn tick(&mut self, camera: &RenderCamera) -> Result<FrameStats> {
        match self.tick_inner(camera) {
            Ok(stats) => Ok(stats),
            Err(err @ (StrataError::DeviceLost(_) | StrataError::SurfaceError(_))) => {
                log::error!("Fatal GPU error, tearing down: {err}");
                Err(err)
            }
            Err(err) => {
                log::error!("Frame error (continuing): {err}");
                self.command_buffer.clear();
                Ok(self.stats)
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn tick_inner(&mut self, camera: &RenderCamera) -> Result<FrameStats> {
        let frame = self.view.frame_index();
        let completed = self.gpu.fence.completed();
        let pending = self.gpu.fence.next_value();
        let device = self.gpu.device.clone();
        let queue = self.gpu.queue.clone();

        // 1. Frame-start sweeps; apply the vsync debug key if it moved.
        self.disposal.sweep(completed);
        self.geometry.sweep();
        let vsync = self.settings.vsync;
        self.gpu.set_vsync(vsync);

        // 2. Acquire the back buffer (waits on this ring slot's fence).
        let surface = self.view.begin_frame(&self.gpu)?;
        let surface_view = surface
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        // 3. Drain streaming with the frame budget.
        let streamed = {
            let mut bridge = GpuBridge {
                device: &device,
                queue: &queue,
                bindless: &mut self.bindless,
                geometry: &mut self.geometry,
                mesh_registry: &self.mesh_registry,
                pending_fence: pending,
                completed_fence: completed,
            };
            self.streaming.drain(&mut bridge)
        };

        // 4. Flush dirty tables.
        self.transforms.flush(&device, &queue, &mut self.disposal);
        self.mesh_registry.flush(&device, &queue, &mut self.disposal);
        self.materials.flush(&device, &queue, &mut self.disposal);

        // 5. Point-light volumes enter the normal batched path.
        for entry in self.point_lights.values() {
            let l = &entry.light;
            let rows: [f32; 8] = [
                l.position.x,
                l.position.y,
                l.position.z,
                l.radius,
                l.color.x,
                l.color.y,
                l.color.z,
                l.intensity,
            ];
            self.command_buffer.enqueue_part(
                PassMask::LIGHT,
                self.light_sphere_part,
                self.light_material,
                Some(CustomData {
                    layout: self.light_layout,
                    bytes: bytemuck::cast_slice(&rows),
                }),
                entry.transform_slot,
                false,
            );
        }

        // 6. Per-frame constants.
        self.constants.begin_frame();
        self.upload_globals(&queue, camera);
        self.update_cull_constants(&queue, camera, frame);
        let shadow_range =
            effective_shadow_range(camera.near, &self.settings, self.sdsm_bounds);
        let (_cascade_fits, shadow_constants) = build_cascades(
            camera,
            self.sun.direction,
            &self.settings,
            shadow_range,
            self.settings.shadow_far,
        );
        self.culler.write_shadow(&queue, frame, &shadow_constants);

        // 7. Batch preparation (staging uploads + draw constants).
        let debug_mode = self.settings.debug_mode;
        let push_batch = |constants: &mut ConstantRing,
                          prepared: batch::PreparedBatch,
                          visible_base: u32,
                          slot_base: u32,
                          cascade: u32|
         -> u32 {
            let mut dc = DrawConstants::new();
            dc.set_batch(
                0,
                visible_base,
                0,
                0,
                prepared.instance_count,
                prepared.subbatch_count,
            );
            dc.dw[8] = visible_base; // visibility region base
            dc.dw[9] = slot_base;
            dc.set_debug_mode(debug_mode);
            dc.set_pass_ext(0, cascade); // dw17
            dc.set_pass_ext_f32(1, 0.05); // dw18: shadow normal offset
            constants.push(dc)
        };

        let opaque = self
            .command_buffer
            .prepare_pass(&device, &queue, &mut self.disposal, frame, Pass::Opaque, 1)
            .map(|p| (p, push_batch(&mut self.constants, p, 0, 0, 0)));

        let shadow = self
            .command_buffer
            .prepare_pass(&device, &queue, &mut self.disposal, frame, Pass::Shadow, 4)
            .map(|p| {
                let offsets: SmallVec<[u32; 4]> = (0..4u32)
                    .map(|c| {
                        push_batch(
                            &mut self.constants,
                            p,
                            c * p.instance_count,
                            c * p.subbatch_count,
                            c,
                        )
                    })
                    .collect();
                (p, offsets)
            });

        let light = self
            .command_buffer
            .prepare_pass(&device, &queue, &mut self.disposal, frame, Pass::Light, 1)
            .map(|p| (p, push_batch(&mut self.constants, p, 0, 0, 0)));

        // Sun + composition constant blocks.
        let mut sun_dc = DrawConstants::new();
        sun_dc.set_debug_mode(debug_mode);
        let sun_offset = self.constants.push(sun_dc);
        let mut compose_dc = DrawConstants::new();
        compose_dc.set_debug_mode(debug_mode);
        compose_dc.set_post_inputs(0, 1);
        let compose_offset = self.constants.push(compose_dc);

        self.constants
            .flush(&device, &queue, &mut self.disposal, pending, frame);

        if let Some(terrain) = &self.terrain {
            terrain.prepare(&queue, camera, &self.settings, &self.targets);
        }
        self.hiz.prepare(&self.gpu, &self.targets);

        // 8. Bind groups (rebuilt per frame: tables may have regrown).
        let frame_group = self.create_frame_bind_group(&device);
        let constants_group = self.constants.bind_group(frame);
        let bindless_group = self.bindless.bind_group(&device).clone();
        let cull_scene = self
            .culler
            .scene_bind_group(&device, self.transforms.buffer(), self.mesh_registry.buffer());
        let cull_view = self
            .culler
            .view_bind_group(&device, frame, &self.targets.hiz.sampled_view);
        let cull_shadow_view = self.culler.shadow_view_bind_group(&device, frame);
        let shadow_render_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Shadow Render Constants BindGroup"),
            layout: &self.shadow_render_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.culler.shadow_constants_buffer(frame).as_entire_binding(),
            }],
        });
        let light_inputs = self.light_pass.inputs_bind_group(
            &device,
            &self.targets,
            self.culler.shadow_constants_buffer(frame),
        );

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });

        // 9. Shadow: Shadow4 cull then the four cascade passes.
        if let Some((prepared, ref offsets)) = shadow {
            let (instances, ids, table) = self.command_buffer.staging_buffers(Pass::Shadow, frame);
            let io = self.culler.io_bind_group(
                &device,
                frame,
                instances,
                ids,
                table,
                self.command_buffer.cull_buffers(Pass::Shadow),
            );
            let groups = CullGroups {
                scene: &cull_scene,
                view: &cull_shadow_view,
                io: &io,
                constants: constants_group,
            };
            self.culler.clear_accumulators(
                &mut encoder,
                self.command_buffer.cull_buffers(Pass::Shadow),
                frame,
            );
            self.culler.encode_shadow_visibility(
                &mut encoder,
                &groups,
                offsets[0],
                prepared.instance_count,
            );
            // Compaction per cascade needs the main view layout; the
            // frustum group stands in (those stages read neither planes
            // nor Hi-Z).
            let compaction_groups = CullGroups {
                scene: &cull_scene,
                view: &cull_view,
                io: &io,
                constants: constants_group,
            };
            for &offset in offsets {
                self.culler.encode_compaction(
                    &mut encoder,
                    &compaction_groups,
                    offset,
                    prepared.instance_count,
                    prepared.subbatch_count,
                    self.settings.stable_scatter,
                );
            }

            let commands = self.command_buffer.cull_buffers(Pass::Shadow).commands.buffer(frame);
            let batch_group = self.command_buffer.render_bind_group(&device, Pass::Shadow, frame);
            let draws: SmallVec<[Option<BatchDraw<'_>>; 4]> = (0..4usize)
                .map(|c| {
                    Some(BatchDraw {
                        commands,
                        command_offset: (c as u64)
                            * u64::from(prepared.subbatch_count)
                            * 20,
                        command_count: prepared.subbatch_count,
                        constants_offset: offsets[c],
                    })
                })
                .collect();
            self.shadow_pass.encode(
                &device,
                &mut self.pipelines,
                &mut encoder,
                &self.targets,
                &frame_group,
                constants_group,
                &batch_group,
                &shadow_render_group,
                self.geometry.index_buffer(),
                &draws,
            );
        } else {
            // Nothing casts: clear the cascade layers so stale depth
            // never shadows the scene.
            let batch_group = self.command_buffer.render_bind_group(&device, Pass::Shadow, frame);
            self.shadow_pass.encode(
                &device,
                &mut self.pipelines,
                &mut encoder,
                &self.targets,
                &frame_group,
                constants_group,
                &batch_group,
                &shadow_render_group,
                self.geometry.index_buffer(),
                &[None, None, None, None],
            );
        }

        // 10. Opaque: terrain update, main cull, G-buffer fill.
        if let Some(terrain) = &self.terrain {
            terrain.encode_update(&device, &mut encoder, &self.targets, self.settings.terrain_max_depth);
        }

        let opaque_draw = if let Some((prepared, offset)) = opaque {
            let (instances, ids, table) = self.command_buffer.staging_buffers(Pass::Opaque, frame);
            let io = self.culler.io_bind_group(
                &device,
                frame,
                instances,
                ids,
                table,
                self.command_buffer.cull_buffers(Pass::Opaque),
            );
            let groups = CullGroups {
                scene: &cull_scene,
                view: &cull_view,
                io: &io,
                constants: constants_group,
            };
            self.culler.clear_accumulators(
                &mut encoder,
                self.command_buffer.cull_buffers(Pass::Opaque),
                frame,
            );
            self.culler.encode_main(
                &mut encoder,
                &groups,
                offset,
                prepared.instance_count,
                prepared.subbatch_count,
                self.settings.stable_scatter,
            );
            Some((prepared, offset))
        } else {
            None
        };

        {
            let batch_group = self.command_buffer.render_bind_group(&device, Pass::Opaque, frame);
            let draw = opaque_draw.map(|(prepared, offset)| BatchDraw {
                commands: self.command_buffer.cull_buffers(Pass::Opaque).commands.buffer(frame),
                command_offset: 0,
                command_count: prepared.subbatch_count,
                constants_offset: offset,
            });
            self.gbuffer_pass.encode(
                &device,
                &mut self.pipelines,
                &mut encoder,
                &self.targets,
                &frame_group,
                constants_group,
                &batch_group,
                &bindless_group,
                self.geometry.index_buffer(),
                draw,
                self.terrain.as_ref(),
                self.settings.wireframe,
            );
        }
        for action in self.command_buffer.take_actions(Pass::Opaque) {
            action(&mut encoder);
        }

        // 11. Hi-Z build (for the next frame) and SDSM reduction.
        self.hiz.encode(&mut encoder, &self.targets);
        if self.settings.sdsm {
            self.depth_reducer
                .encode(&device, &queue, &mut encoder, &self.targets, frame);
        }

        // 12. Light accumulation.
        let point_draw_data = if let Some((prepared, offset)) = light {
            let (instances, ids, table) = self.command_buffer.staging_buffers(Pass::Light, frame);
            let io = self.culler.io_bind_group(
                &device,
                frame,
                instances,
                ids,
                table,
                self.command_buffer.cull_buffers(Pass::Light),
            );
            let groups = CullGroups {
                scene: &cull_scene,
                view: &cull_view,
                io: &io,
                constants: constants_group,
            };
            self.culler.clear_accumulators(
                &mut encoder,
                self.command_buffer.cull_buffers(Pass::Light),
                frame,
            );
            self.culler.encode_main(
                &mut encoder,
                &groups,
                offset,
                prepared.instance_count,
                prepared.subbatch_count,
                self.settings.stable_scatter,
            );
            Some((prepared, offset))
        } else {
            None
        };

        {
            let batch_group = self.command_buffer.render_bind_group(&device, Pass::Light, frame);
            let point_draw = point_draw_data.map(|(prepared, offset)| BatchDraw {
                commands: self.command_buffer.cull_buffers(Pass::Light).commands.buffer(frame),
                command_offset: 0,
                command_count: prepared.subbatch_count,
                constants_offset: offset,
            });
            self.light_pass.encode(
                &device,
                &mut self.pipelines,
                &mut encoder,
                &self.targets,
                &frame_group,
                constants_group,
                &batch_group,
                &light_inputs,
                self.geometry.index_buffer(),
                sun_offset,
                self.sun.intensity > 0.0,
                point_draw,
            );
        }
        for action in self.command_buffer.take_actions(Pass::Light) {
            action(&mut encoder);
        }

        // 13. Skybox + composition.
        if self.settings.skybox_enabled {
            self.skybox_pass.encode(
                &device,
                &mut self.pipelines,
                &mut encoder,
                &self.targets,
                &frame_group,
            );
        }
        self.compose_pass.encode(
            &device,
            &mut self.pipelines,
            &mut encoder,
            &self.targets,
            &surface_view,
            self.gpu.color_format(),
            &frame_group,
            constants_group,
            compose_offset,
        );
        for action in self.command_buffer.take_actions(Pass::PostProcess) {
            action(&mut encoder);
        }

        // 14. Present + frame bookkeeping.
        let stats = FrameStats {
            frame_number: self.view.frame_number(),
            fps: self.stats.fps,
            frame_ms: self.stats.frame_ms,
            opaque_submissions: self.command_buffer.submission_count(Pass::Opaque) as u32,
            shadow_submissions: self.command_buffer.submission_count(Pass::Shadow) as u32,
            light_submissions: self.command_buffer.submission_count(Pass::Light) as u32,
            streamed_items: streamed,
        };
        self.command_buffer.clear();

        self.view.present(&self.gpu, surface, encoder.finish());

        if self.settings.sdsm {
            self.depth_reducer.request_readback(frame);
            self.sdsm_bounds = self.depth_reducer.poll_bounds();
        }
        self.targets.hiz.valid = true;
        if !self.settings.freeze_culling {
            self.prev_view_proj = camera.view_projection_matrix;
        }

        self.stats = stats;
        if let Some(timing) = self.fps.update() {
            self.stats.fps = timing.fps;
            self.stats.frame_ms = timing.average_ms;
        }
        Ok(self.stats)
    }

    fn upload_globals(&mut self, queue: &wgpu::Queue, camera: &RenderCamera) {
        let (w, h) = self.targets.size;
        let globals = GlobalUniforms {
            view: camera.view_matrix.to_cols_array_2d(),
            proj: camera.projection_matrix.to_cols_array_2d(),
            view_proj: camera.view_projection_matrix.to_cols_array_2d(),
            inv_view: camera.view_matrix.inverse().to_cols_array_2d(),
            inv_view_proj: camera.view_projection_matrix.inverse().to_cols_array_2d(),
            camera_pos: [camera.position.x, camera.position.y, camera.position.z, 1.0],
            screen: [w as f32, h as f32, 1.0 / w as f32, 1.0 / h as f32],
            sun_dir_time: [
                self.sun.direction.x,
                self.sun.direction.y,
                self.sun.direction.z,
                self.start_time.elapsed().as_secs_f32(),
            ],
            sun_color_ambient: [
                self.sun.color.x * self.sun.intensity,
                self.sun.color.y * self.sun.intensity,
                self.sun.color.z * self.sun.intensity,
                self.settings.ambient_scale,
            ],
            misc: [camera.near, self.settings.debug_mode as f32, 0.0, 0.0],
            clear_color: self.settings.clear_color,
        };
        queue.write_buffer(&self.globals_buffer, 0, bytemuck::bytes_of(&globals));
    }

    fn update_cull_constants(&mut self, queue: &wgpu::Queue, camera: &RenderCamera, frame: usize) {
        // Frustum freeze keeps the previous planes and previous-VP so the
        // culling volume can be inspected from outside.
        let (planes, prev_vp) = match (self.settings.freeze_culling, self.frozen_frustum) {
            (true, Some(frozen)) => frozen,
            _ => {
                let current = (camera.frustum.planes(), self.prev_view_proj);
                self.frozen_frustum = Some(current);
                current
            }
        };

        let hiz_on =
            self.settings.hiz_enabled && self.targets.hiz.valid && self.view.frame_number() > 0;
        let constants = FrustumConstants::new(
            planes,
            prev_vp,
            self.targets.hiz.size,
            if hiz_on { self.targets.hiz.mip_count } else { 0 },
            hiz_on,
            camera.near,
            camera.projection_matrix.y_axis.y,
        );
        self.culler.write_frustum(queue, frame, &constants);
    }

    fn create_frame_bind_group(&self, device: &wgpu::Device) -> wgpu::BindGroup {
        let buffer = |binding, b: &wgpu::Buffer| wgpu::BindGroupEntry {
            binding,
            resource: b.as_entire_binding(),
        };
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Frame BindGroup"),
            layout: &self.frame_layout,
            entries: &[
                buffer(0, &self.globals_buffer),
                buffer(1, self.transforms.buffer()),
                buffer(2, self.mesh_registry.buffer()),
                buffer(3, self.materials.buffer()),
                buffer(4, self.geometry.position_buffer()),
                buffer(5, self.geometry.normal_buffer()),
                buffer(6, self.geometry.uv_buffer()),
            ],
        })
    }
}
