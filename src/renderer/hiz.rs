//! Hi-Z Builder
//!
//! Builds the max-downsample depth pyramid from the frame's G-buffer
//! linear depth, between the G-buffer and light passes. The pyramid a
//! frame builds is consumed by the *next* frame's culler (the cull
//! constants carry the previous view-projection to match); frame 0 runs
//! with the occlusion test disabled until the first pyramid exists.

use crate::gpu::GpuContext;
use crate::renderer::pipeline::{PipelineCache, ShaderManager};
use crate::renderer::targets::{HIZ_FORMAT, RenderTargets};

pub struct HiZBuilder {
    layout: wgpu::BindGroupLayout,
    copy_pipeline: wgpu::ComputePipeline,
    downsample_pipeline: wgpu::ComputePipeline,
    /// One bind group per dispatch: [copy, mip1, mip2, …]. Rebuilt when
    /// the pyramid is recreated (resize).
    bind_groups: Vec<wgpu::BindGroup>,
    built_for: (u32, u32),
}

impl HiZBuilder {
    #[must_use]
    pub fn new(
        device: &wgpu::Device,
        shaders: &mut ShaderManager,
        pipelines: &mut PipelineCache,
    ) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Hi-Z Layout"),
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
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: HIZ_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let (module, shader_hash) =
            shaders.get_or_compile(device, "hiz.wgsl", include_str!("shaders/hiz.wgsl"));

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Hi-Z Pipeline Layout"),
            bind_group_layouts: &[Some(&layout)],
            immediate_size: 0,
        });

        let mut compute = |label: &'static str, entry: &'static str| {
            pipelines.get_or_create_compute(&("hiz", shader_hash, entry), label, || {
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

        Self {
            layout,
            copy_pipeline: compute("Hi-Z Copy", "copy_depth"),
            downsample_pipeline: compute("Hi-Z Downsample", "downsample_max"),
            bind_groups: Vec::new(),
            built_for: (0, 0),
        }
    }

    /// (Re)builds the per-mip bind groups after a pyramid recreation.
    pub fn prepare(&mut self, gpu: &GpuContext, targets: &RenderTargets) {
        if self.built_for == targets.hiz.size && !self.bind_groups.is_empty() {
            return;
        }
        self.bind_groups.clear();

        let make = |src: &wgpu::TextureView, dst: &wgpu::TextureView| {
            gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Hi-Z BindGroup"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(src),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(dst),
                    },
                ],
            })
        };

        // Copy: G-buffer linear depth -> mip 0.
        self.bind_groups
            .push(make(targets.linear_depth_view(), &targets.hiz.mip_views[0]));
        // Downsample chain: mip k-1 -> mip k.
        for mip in 1..targets.hiz.mip_count as usize {
            self.bind_groups.push(make(
                &targets.hiz.mip_views[mip - 1],
                &targets.hiz.mip_views[mip],
            ));
        }
        self.built_for = targets.hiz.size;
    }

    /// Records the full pyramid build; one dispatch per mip.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, targets: &RenderTargets) {
        let (w, h) = targets.hiz.size;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Hi-Z Build"),
            timestamp_writes: None,
        });

        pass.set_pipeline(&self.copy_pipeline);
        pass.set_bind_group(0, &self.bind_groups[0], &[]);
        pass.dispatch_workgroups(w.div_ceil(8), h.div_ceil(8), 1);

        pass.set_pipeline(&self.downsample_pipeline);
        for mip in 1..targets.hiz.mip_count {
            let mw = (w >> mip).max(1);
            let mh = (h >> mip).max(1);
            pass.set_bind_group(0, &self.bind_groups[mip as usize], &[]);
            pass.dispatch_workgroups(mw.div_ceil(8), mh.div_ceil(8), 1);
        }
    }
}

/// CPU reference of the downsample rule, shared with the property tests:
/// `mip[k][x, y] = max(mip[k-1][2x..2x+1, 2y..2y+1])` with edge clamping
/// and zero treated as +∞ at level 0.
#[must_use]
pub fn reference_downsample(src: &[f32], sw: usize, sh: usize) -> (Vec<f32>, usize, usize) {
    let dw = (sw / 2).max(1);
    let dh = (sh / 2).max(1);
    let mut dst = vec![0.0f32; dw * dh];
    for y in 0..dh {
        for x in 0..dw {
            let mut value = 0.0f32;
            for dy in 0..2 {
                for dx in 0..2 {
                    let sx = (x * 2 + dx).min(sw - 1);
                    let sy = (y * 2 + dy).min(sh - 1);
                    value = value.max(src[sy * sw + sx]);
                }
            }
            dst[y * dw + x] = value;
        }
    }
    (dst, dw, dh)
}

/// CPU reference of the mip-0 sentinel promotion.
#[must_use]
pub fn reference_sentinel(depth: f32) -> f32 {
    if depth <= 0.0 { 3.0e38 } else { depth }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsample_takes_quad_max() {
        #[rustfmt::skip]
        let src = vec![
            1.0, 2.0, 5.0, 1.0,
            3.0, 4.0, 1.0, 1.0,
            9.0, 1.0, 1.0, 8.0,
            1.0, 1.0, 7.0, 1.0,
        ];
        let (dst, dw, dh) = reference_downsample(&src, 4, 4);
        assert_eq!((dw, dh), (2, 2));
        assert_eq!(dst, vec![4.0, 5.0, 9.0, 8.0]);
    }

    #[test]
    fn odd_sizes_clamp_at_edge() {
        let src = vec![1.0, 2.0, 3.0];
        let (dst, dw, dh) = reference_downsample(&src, 3, 1);
        assert_eq!((dw, dh), (1, 1));
        // Covers texels 0, 1 (and clamped repeats); 3.0 at x=2 is only
        // reachable through the clamp of the second column pair.
        assert_eq!(dst, vec![2.0]);
    }

    #[test]
    fn sky_sentinel_is_infinite() {
        assert!(reference_sentinel(0.0) > 1.0e38);
        assert!(reference_sentinel(-5.0) > 1.0e38);
        assert_eq!(reference_sentinel(12.5), 12.5);
    }

    #[test]
    fn chain_reduces_to_scene_max() {
        let mut level: Vec<f32> = (0..64).map(|i| reference_sentinel(i as f32)).collect();
        let (mut w, mut h) = (8usize, 8usize);
        while w > 1 || h > 1 {
            let (next, nw, nh) = reference_downsample(&level, w, h);
            level = next;
            w = nw;
            h = nh;
        }
        assert_eq!(level, vec![3.0e38]); // index 0 was sky (0.0 -> +inf)
    }
}
