//! Light Accumulation Pass
//!
//! Clears the light buffer, draws the sun as one fullscreen triangle
//! (cascade blending + PCF), then the point-light volumes through the
//! batched indirect path — additive blend, no depth test, front faces
//! culled so a camera inside a volume still shades it.
//!
//! Both pipelines share one module and resolve through the
//! [`PipelineCache`] keyed by `(tag, shader hash, entry)`.

use crate::renderer::passes::{BatchDraw, PassLayouts};
use crate::renderer::pipeline::{PipelineCache, ShaderManager};
use crate::renderer::targets::{LIGHT_FORMAT, RenderTargets};

pub struct LightPass {
    /// Group 3: G-buffer inputs + shadow array + cascade uniform.
    pub inputs_layout: wgpu::BindGroupLayout,
    shadow_sampler: wgpu::Sampler,
    module: wgpu::ShaderModule,
    shader_hash: u64,
    pipeline_layout: wgpu::PipelineLayout,
}

const ADDITIVE: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

impl LightPass {
    #[must_use]
    pub fn new(
        device: &wgpu::Device,
        shaders: &mut ShaderManager,
        layouts: &PassLayouts<'_>,
        shadow_constants_size: u64,
    ) -> Self {
        let texture = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let inputs_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Light Inputs Layout"),
            entries: &[
                texture(0),
                texture(1),
                texture(2),
                texture(3),
                // Shadow cascade array + comparison sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 6,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(shadow_constants_size),
                    },
                    count: None,
                },
            ],
        });

        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Shadow PCF Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::Less),
            ..Default::default()
        });

        let (module, shader_hash) = shaders.get_or_compile(
            device,
            "light.wgsl",
            include_str!("../shaders/light.wgsl"),
        );
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Light Pipeline Layout"),
            bind_group_layouts: &[
                Some(layouts.frame),
                Some(layouts.constants),
                Some(layouts.batch),
                Some(&inputs_layout),
            ],
            immediate_size: 0,
        });

        Self {
            inputs_layout,
            shadow_sampler,
            module,
            shader_hash,
            pipeline_layout,
        }
    }

    fn build_pipeline(
        &self,
        device: &wgpu::Device,
        label: &str,
        vs: &str,
        fs: &str,
        cull: Option<wgpu::Face>,
    ) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.module,
                entry_point: Some(vs),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.module,
                entry_point: Some(fs),
                targets: &[Some(wgpu::ColorTargetState {
                    format: LIGHT_FORMAT,
                    blend: Some(ADDITIVE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                cull_mode: cull,
                ..Default::default()
            },
            // No depth test: overlapping volumes always accumulate.
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        })
    }

    /// Builds the per-frame inputs bind group (G-buffer views change on
    /// resize).
    #[must_use]
    pub fn inputs_bind_group(
        &self,
        device: &wgpu::Device,
        targets: &RenderTargets,
        shadow_constants: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        let view = |binding, v| wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(v),
        };
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Light Inputs BindGroup"),
            layout: &self.inputs_layout,
            entries: &[
                view(0, targets.albedo_view()),
                view(1, targets.normal_view()),
                view(2, targets.data_view()),
                view(3, targets.linear_depth_view()),
                view(4, &targets.shadow_array_view),
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::Sampler(&self.shadow_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: shadow_constants.as_entire_binding(),
                },
            ],
        })
    }

    pub fn encode(
        &self,
        device: &wgpu::Device,
        pipelines: &mut PipelineCache,
        encoder: &mut wgpu::CommandEncoder,
        targets: &RenderTargets,
        frame_group: &wgpu::BindGroup,
        constants_group: &wgpu::BindGroup,
        batch_group: &wgpu::BindGroup,
        inputs_group: &wgpu::BindGroup,
        index_buffer: &wgpu::Buffer,
        sun_constants_offset: u32,
        sun_enabled: bool,
        point_draw: Option<BatchDraw<'_>>,
    ) {
        let sun_pipeline = sun_enabled.then(|| {
            pipelines.get_or_create_render(
                &("light", self.shader_hash, "fs_sun"),
                "Sun Light Pipeline",
                || self.build_pipeline(device, "Sun Light Pipeline", "vs_fullscreen", "fs_sun", None),
            )
        });
        let point_pipeline = point_draw.map(|_| {
            pipelines.get_or_create_render(
                &("light", self.shader_hash, "fs_point"),
                "Point Light Pipeline",
                || {
                    self.build_pipeline(
                        device,
                        "Point Light Pipeline",
                        "vs_point",
                        "fs_point",
                        // Render back faces: the camera may be inside the
                        // volume.
                        Some(wgpu::Face::Front),
                    )
                },
            )
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Light Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: targets.light_view(),
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            ..Default::default()
        });

        pass.set_bind_group(0, frame_group, &[]);
        pass.set_bind_group(2, batch_group, &[]);
        pass.set_bind_group(3, inputs_group, &[]);

        if let Some(pipeline) = &sun_pipeline {
            pass.set_pipeline(pipeline);
            pass.set_bind_group(1, constants_group, &[sun_constants_offset]);
            pass.draw(0..3, 0..1);
        }

        if let (Some(draw), Some(pipeline)) = (point_draw, &point_pipeline) {
            pass.set_pipeline(pipeline);
            pass.set_bind_group(1, constants_group, &[draw.constants_offset]);
            pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.multi_draw_indexed_indirect(draw.commands, draw.command_offset, draw.command_count);
        }
    }
}
