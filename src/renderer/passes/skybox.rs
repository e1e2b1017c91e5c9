//! Skybox Pass
//!
//! Procedural sky, drawn into the light buffer wherever the G-buffer has
//! no geometry (linear depth cleared to 0). Runs after light
//! accumulation, before composition. The pipeline resolves through the
//! [`PipelineCache`]; the target format is part of the key.

use crate::renderer::passes::PassLayouts;
use crate::renderer::pipeline::{PipelineCache, ShaderManager};
use crate::renderer::targets::{LIGHT_FORMAT, RenderTargets};

pub struct SkyboxPass {
    depth_layout: wgpu::BindGroupLayout,
    module: wgpu::ShaderModule,
    shader_hash: u64,
    pipeline_layout: wgpu::PipelineLayout,
}

impl SkyboxPass {
    #[must_use]
    pub fn new(device: &wgpu::Device, shaders: &mut ShaderManager, layouts: &PassLayouts<'_>) -> Self {
        let depth_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Skybox Depth Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });

        let (module, shader_hash) = shaders.get_or_compile(
            device,
            "skybox.wgsl",
            include_str!("../shaders/skybox.wgsl"),
        );
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Skybox Pipeline Layout"),
            bind_group_layouts: &[Some(layouts.frame), Some(&depth_layout)],
            immediate_size: 0,
        });

        Self {
            depth_layout,
            module,
            shader_hash,
            pipeline_layout,
        }
    }

    fn build_pipeline(&self, device: &wgpu::Device) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Skybox Pipeline"),
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
                    format: LIGHT_FORMAT,
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
        frame_group: &wgpu::BindGroup,
    ) {
        let pipeline = pipelines.get_or_create_render(
            &("skybox", self.shader_hash, LIGHT_FORMAT),
            "Skybox Pipeline",
            || self.build_pipeline(device),
        );

        let depth_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Skybox Depth BindGroup"),
            layout: &self.depth_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(targets.linear_depth_view()),
            }],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Skybox Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: targets.light_view(),
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            ..Default::default()
        });

        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, frame_group, &[]);
        pass.set_bind_group(1, &depth_group, &[]);
        pass.draw(0..3, 0..1);
    }
}
