//! Shadow Cascade Pass
//!
//! Renders the opaque shadow casters into the four-layer depth array.
//! The Shadow4 culler already produced one command region per cascade;
//! this pass runs one depth-only render pass per layer, selecting the
//! cascade's light VP through draw-constant dword 17. The depth-only
//! pipeline has no varying state beyond its shader, so its cache key is
//! just `(tag, shader hash)`.

use crate::renderer::passes::{BatchDraw, PassLayouts};
use crate::renderer::pipeline::{PipelineCache, ShaderManager};
use crate::renderer::targets::{RenderTargets, SHADOW_FORMAT};

pub struct ShadowPass {
    module: wgpu::ShaderModule,
    shader_hash: u64,
    pipeline_layout: wgpu::PipelineLayout,
}

impl ShadowPass {
    #[must_use]
    pub fn new(device: &wgpu::Device, shaders: &mut ShaderManager, layouts: &PassLayouts<'_>) -> Self {
        let (module, shader_hash) = shaders.get_or_compile(
            device,
            "shadow_depth.wgsl",
            include_str!("../shaders/shadow_depth.wgsl"),
        );
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Shadow Pipeline Layout"),
            bind_group_layouts: &[
                Some(layouts.frame),
                Some(layouts.constants),
                Some(layouts.batch),
                Some(layouts.shadow_constants),
            ],
            immediate_size: 0,
        });

        Self {
            module,
            shader_hash,
            pipeline_layout,
        }
    }

    fn build_pipeline(&self, device: &wgpu::Device) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Shadow Pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            // Depth-only: no fragment stage.
            fragment: None,
            primitive: wgpu::PrimitiveState {
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: SHADOW_FORMAT,
                depth_write_enabled: Some(true),
                // Standard-Z ortho light projection.
                depth_compare: Some(wgpu::CompareFunction::Less),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState {
                    constant: 2,
                    slope_scale: 2.0,
                    clamp: 0.0,
                },
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        })
    }

    /// One depth-only render pass per cascade layer; `draws[c]` is the
    /// cascade's command region (constants offset carries the cascade
    /// index and region bases).
    pub fn encode(
        &self,
        device: &wgpu::Device,
        pipelines: &mut PipelineCache,
        encoder: &mut wgpu::CommandEncoder,
        targets: &RenderTargets,
        frame_group: &wgpu::BindGroup,
        constants_group: &wgpu::BindGroup,
        batch_group: &wgpu::BindGroup,
        shadow_constants_group: &wgpu::BindGroup,
        index_buffer: &wgpu::Buffer,
        draws: &[Option<BatchDraw<'_>>],
    ) {
        let pipeline = draws.iter().any(Option::is_some).then(|| {
            pipelines.get_or_create_render(
                &("shadow_depth", self.shader_hash),
                "Shadow Pipeline",
                || self.build_pipeline(device),
            )
        });

        for (cascade, layer_view) in targets.shadow_layer_views.iter().enumerate() {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Shadow Cascade Pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: layer_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            let (Some(Some(draw)), Some(pipeline)) = (draws.get(cascade), &pipeline) else {
                continue;
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, frame_group, &[]);
            pass.set_bind_group(1, constants_group, &[draw.constants_offset]);
            pass.set_bind_group(2, batch_group, &[]);
            pass.set_bind_group(3, shadow_constants_group, &[]);
            pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.multi_draw_indexed_indirect(draw.commands, draw.command_offset, draw.command_count);
        }
    }
}
