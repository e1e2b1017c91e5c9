//! G-Buffer Pass
//!
//! Clears and fills the four G-buffer targets plus the reverse-Z depth
//! buffer: one `multi_draw_indexed_indirect` over the opaque batch, then
//! the terrain self-draw and any queued custom actions of the opaque
//! pass (which run on the encoder after this render pass closes).
//!
//! The pipeline is resolved through the [`PipelineCache`] per encode;
//! the polygon mode (fill / wireframe debug key) is the state that
//! varies, so the key is `(tag, shader hash, wireframe)`.

use crate::renderer::passes::{BatchDraw, PassLayouts};
use crate::renderer::pipeline::{PipelineCache, ShaderManager};
use crate::renderer::targets::{
    ALBEDO_FORMAT, DATA_FORMAT, LINEAR_DEPTH_FORMAT, NORMAL_FORMAT, RenderTargets,
};
use crate::renderer::terrain::TerrainQuadtree;

pub struct GBufferPass {
    module: wgpu::ShaderModule,
    shader_hash: u64,
    pipeline_layout: wgpu::PipelineLayout,
    depth_format: wgpu::TextureFormat,
    allow_wireframe: bool,
}

impl GBufferPass {
    #[must_use]
    pub fn new(
        device: &wgpu::Device,
        shaders: &mut ShaderManager,
        layouts: &PassLayouts<'_>,
        depth_format: wgpu::TextureFormat,
        allow_wireframe: bool,
    ) -> Self {
        let (module, shader_hash) = shaders.get_or_compile(
            device,
            "gbuffer.wgsl",
            include_str!("../shaders/gbuffer.wgsl"),
        );
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("GBuffer Pipeline Layout"),
            bind_group_layouts: &[
                Some(layouts.frame),
                Some(layouts.constants),
                Some(layouts.batch),
                Some(layouts.bindless),
            ],
            immediate_size: 0,
        });

        Self {
            module,
            shader_hash,
            pipeline_layout,
            depth_format,
            allow_wireframe,
        }
    }

    fn build_pipeline(&self, device: &wgpu::Device, wireframe: bool) -> wgpu::RenderPipeline {
        let target = |format| {
            Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })
        };
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("GBuffer Pipeline"),
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
                targets: &[
                    target(ALBEDO_FORMAT),
                    target(NORMAL_FORMAT),
                    target(DATA_FORMAT),
                    target(LINEAR_DEPTH_FORMAT),
                ],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                cull_mode: Some(wgpu::Face::Back),
                polygon_mode: if wireframe {
                    wgpu::PolygonMode::Line
                } else {
                    wgpu::PolygonMode::Fill
                },
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: self.depth_format,
                depth_write_enabled: Some(true),
                // Reverse-Z: nearer is greater.
                depth_compare: Some(wgpu::CompareFunction::Greater),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
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
        constants_group: &wgpu::BindGroup,
        batch_group: &wgpu::BindGroup,
        bindless_group: &wgpu::BindGroup,
        index_buffer: &wgpu::Buffer,
        draw: Option<BatchDraw<'_>>,
        terrain: Option<&TerrainQuadtree>,
        wireframe: bool,
    ) {
        // Resolve before the render pass opens; a hit is a map lookup.
        let wireframe = wireframe && self.allow_wireframe;
        let pipeline = draw.map(|_| {
            pipelines.get_or_create_render(
                &("gbuffer", self.shader_hash, wireframe),
                "GBuffer Pipeline",
                || self.build_pipeline(device, wireframe),
            )
        });

        let color = |view| {
            Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("GBuffer Pass"),
            color_attachments: &[
                color(targets.albedo_view()),
                color(targets.normal_view()),
                color(targets.data_view()),
                color(targets.linear_depth_view()),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: targets.depth_view(),
                depth_ops: Some(wgpu::Operations {
                    // Reverse-Z clear: far plane is 0.
                    load: wgpu::LoadOp::Clear(0.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            ..Default::default()
        });

        if let (Some(draw), Some(pipeline)) = (draw, &pipeline) {
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, frame_group, &[]);
            pass.set_bind_group(1, constants_group, &[draw.constants_offset]);
            pass.set_bind_group(2, batch_group, &[]);
            pass.set_bind_group(3, bindless_group, &[]);
            pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.multi_draw_indexed_indirect(draw.commands, draw.command_offset, draw.command_count);
        }

        if let Some(terrain) = terrain {
            terrain.encode_draw(device, &mut pass);
        }
    }
}
