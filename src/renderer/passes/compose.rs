//! Composition Pass
//!
//! Combines albedo, light accumulation and hemisphere ambient into the
//! swapchain surface, with gamma 2.2 and triangular-distribution dither.
//! Debug visualization modes are resolved here (and in the sun shader
//! for the cascade/shadow views). The pipeline resolves through the
//! [`PipelineCache`] keyed by `(tag, shader hash, surface format)` so a
//! surface-format change after a reconfigure simply misses into a new
//! entry.

use crate::renderer::passes::PassLayouts;
use crate::renderer::pipeline::{PipelineCache, ShaderManager};
use crate::renderer::targets::RenderTargets;

pub struct ComposePass {
    inputs_layout: wgpu::BindGroupLayout,
    module: wgpu::ShaderModule,
    shader_hash: u64,
    pipeline_layout: wgpu::PipelineLayout,
}

impl ComposePass {
    #[must_use]
    pub fn new(device: &wgpu::Device, shaders: &mut ShaderManager, layouts: &PassLayouts<'_>) -> Self {
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
            label: Some("Compose Inputs Layout"),
            entries: &[
                texture(0),
                texture(1),
                texture(2),
                texture(3),
                texture(4),
                texture(5),
            ],
        });

        let (module, shader_hash) = shaders.get_or_compile(
            device,
            "compose.wgsl",
            include_str!("../shaders/compose.wgsl"),
        );
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Compose Pipeline Layout"),
            bind_group_layouts: &[Some(layouts.frame), Some(layouts.constants), Some(&inputs_layout)],
            immediate_size: 0,
        });

        Self {
            inputs_layout,
            module,
            shader_hash,
            pipeline_layout,
        }
    }

    fn build_pipeline(
        &self,
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
    ) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Compose Pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        })
    }

    pub fn encode(
        &self,
        device: &wgpu::Device,
        pipelines: &mut PipelineCache,
        encoder: &mut wgpu::CommandEncoder,
        targets: &RenderTargets,
        surface_view: &wgpu::TextureView,
        surface_format: wgpu::TextureFormat,
        frame_group: &wgpu::BindGroup,
        constants_group: &wgpu::BindGroup,
        constants_offset: u32,
    ) {
        let pipeline = pipelines.get_or_create_render(
            &("compose", self.shader_hash, surface_format),
            "Compose Pipeline",
            || self.build_pipeline(device, surface_format),
        );

        let view = |binding, v| wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(v),
        };
        let inputs = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Compose Inputs BindGroup"),
            layout: &self.inputs_layout,
            entries: &[
                view(0, targets.albedo_view()),
                view(1, targets.light_view()),
                view(2, targets.data_view()),
                view(3, targets.linear_depth_view()),
                view(4, targets.normal_view()),
                view(5, &targets.hiz.sampled_view),
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Compose Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: surface_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            ..Default::default()
        });

        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, frame_group, &[]);
        pass.set_bind_group(1, constants_group, &[constants_offset]);
        pass.set_bind_group(2, &inputs, &[]);
        pass.draw(0..3, 0..1);
    }
}
