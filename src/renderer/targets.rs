//! Frame Render Targets
//!
//! Owns every render target the deferred pipeline draws into:
//!
//! | Target | Format | Contents |
//! |--------|--------|----------|
//! | albedo | `Rgba8Unorm` | base color, alpha = alpha-test mask |
//! | normal | `Rgb10a2Unorm` | world-space normal, 0..1 packed |
//! | data   | `Rgba8Unorm` | roughness, metallic, AO, lit flag |
//! | linear depth | `R32Float` | view-space z (cleared 0 = sky) |
//! | depth  | `Depth32Float` | reverse-Z depth-stencil |
//! | light  | `Rgba16Float` | light accumulation |
//! | hi-z   | `R32Float`, full mip chain | max-depth pyramid |
//! | shadow | `Depth32Float` ×4 layers | cascade depth array |
//!
//! Screen-sized targets are recreated on swapchain resize only; the
//! shadow array is independent of screen size. Old textures go through
//! deferred disposal.

use crate::gpu::{DeferredDisposal, GpuContext};

pub const ALBEDO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const NORMAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgb10a2Unorm;
pub const DATA_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const LINEAR_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
pub const LIGHT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const HIZ_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
pub const SHADOW_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Number of shadow cascades (fixed array layer count).
pub const CASCADE_COUNT: usize = 4;

struct Target {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl Target {
    fn new(
        device: &wgpu::Device,
        label: &str,
        size: (u32, u32),
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.0.max(1),
                height: size.1.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

/// The Hi-Z pyramid: mip 0 mirrors the previous frame's linear depth,
/// mip k is the 2×2 max-downsample of mip k−1.
pub struct HiZPyramid {
    pub texture: wgpu::Texture,
    /// Full-chain sampled view (culler).
    pub sampled_view: wgpu::TextureView,
    /// One single-mip view per level (builder storage writes).
    pub mip_views: Vec<wgpu::TextureView>,
    pub mip_count: u32,
    pub size: (u32, u32),
    /// False until the first frame has produced depth; the culler skips
    /// the occlusion test while this is unset.
    pub valid: bool,
}

impl HiZPyramid {
    fn new(device: &wgpu::Device, size: (u32, u32)) -> Self {
        let (w, h) = (size.0.max(1), size.1.max(1));
        let mip_count = mip_count_for(w, h);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Hi-Z Pyramid"),
            size: wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
            mip_level_count: mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HIZ_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let sampled_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mip_views = (0..mip_count)
            .map(|mip| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("Hi-Z Mip View"),
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();
        Self {
            texture,
            sampled_view,
            mip_views,
            mip_count,
            size: (w, h),
            valid: false,
        }
    }
}

/// Full mip chain down to 1×1: `floor(log2(max(w, h))) + 1`.
#[must_use]
pub fn mip_count_for(w: u32, h: u32) -> u32 {
    32 - w.max(h).max(1).leading_zeros()
}

/// All frame render targets plus the shadow cascade array.
pub struct RenderTargets {
    pub size: (u32, u32),

    albedo: Target,
    normal: Target,
    data: Target,
    linear_depth: Target,
    depth: Target,
    light: Target,

    pub hiz: HiZPyramid,

    shadow_texture: wgpu::Texture,
    /// Whole-array view (sun shader sampling).
    pub shadow_array_view: wgpu::TextureView,
    /// Per-cascade layer views (depth attachments).
    pub shadow_layer_views: Vec<wgpu::TextureView>,
    pub shadow_map_size: u32,
}

impl RenderTargets {
    #[must_use]
    pub fn new(gpu: &GpuContext, shadow_map_size: u32) -> Self {
        let size = gpu.size();
        let device = &gpu.device;

        let (shadow_texture, shadow_array_view, shadow_layer_views) =
            Self::create_shadow(device, shadow_map_size);

        Self {
            size,
            albedo: Self::color_target(device, "GBuffer Albedo", size, ALBEDO_FORMAT),
            normal: Self::color_target(device, "GBuffer Normal", size, NORMAL_FORMAT),
            data: Self::color_target(device, "GBuffer Data", size, DATA_FORMAT),
            linear_depth: Self::color_target(device, "GBuffer Linear Depth", size, LINEAR_DEPTH_FORMAT),
            depth: Target::new(
                device,
                "Scene Depth",
                size,
                gpu.depth_format,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            ),
            light: Self::color_target(device, "Light Buffer", size, LIGHT_FORMAT),
            hiz: HiZPyramid::new(device, size),
            shadow_texture,
            shadow_array_view,
            shadow_layer_views,
            shadow_map_size,
        }
    }

    fn color_target(
        device: &wgpu::Device,
        label: &str,
        size: (u32, u32),
        format: wgpu::TextureFormat,
    ) -> Target {
        Target::new(
            device,
            label,
            size,
            format,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        )
    }

    fn create_shadow(
        device: &wgpu::Device,
        map_size: u32,
    ) -> (wgpu::Texture, wgpu::TextureView, Vec<wgpu::TextureView>) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Shadow Cascade Array"),
            size: wgpu::Extent3d {
                width: map_size,
                height: map_size,
                depth_or_array_layers: CASCADE_COUNT as u32,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SHADOW_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let array_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Shadow Array View"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });
        let layer_views = (0..CASCADE_COUNT as u32)
            .map(|layer| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("Shadow Layer View"),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();
        (texture, array_view, layer_views)
    }

    /// Recreates the screen-sized targets; old textures retire through
    /// deferred disposal. The Hi-Z pyramid restarts invalid (frame 0
    /// semantics).
    pub fn resize(
        &mut self,
        gpu: &GpuContext,
        disposal: &mut DeferredDisposal,
        size: (u32, u32),
    ) {
        if size == self.size || size.0 == 0 || size.1 == 0 {
            return;
        }
        let device = &gpu.device;
        let fence = gpu.fence.next_value();
        log::info!("Resizing render targets: {:?} -> {size:?}", self.size);

        let mut retire = |t: Target| disposal.retire_texture(t.texture, fence);
        retire(std::mem::replace(
            &mut self.albedo,
            Self::color_target(device, "GBuffer Albedo", size, ALBEDO_FORMAT),
        ));
        retire(std::mem::replace(
            &mut self.normal,
            Self::color_target(device, "GBuffer Normal", size, NORMAL_FORMAT),
        ));
        retire(std::mem::replace(
            &mut self.data,
            Self::color_target(device, "GBuffer Data", size, DATA_FORMAT),
        ));
        retire(std::mem::replace(
            &mut self.linear_depth,
            Self::color_target(device, "GBuffer Linear Depth", size, LINEAR_DEPTH_FORMAT),
        ));
        retire(std::mem::replace(
            &mut self.depth,
            Target::new(
                device,
                "Scene Depth",
                size,
                gpu.depth_format,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            ),
        ));
        retire(std::mem::replace(
            &mut self.light,
            Self::color_target(device, "Light Buffer", size, LIGHT_FORMAT),
        ));

        let old_hiz = std::mem::replace(&mut self.hiz, HiZPyramid::new(device, size));
        disposal.retire_texture(old_hiz.texture, fence);

        self.size = size;
    }

    // ── Views ──────────────────────────────────────────────────────────

    #[must_use]
    pub fn albedo_view(&self) -> &wgpu::TextureView {
        &self.albedo.view
    }

    #[must_use]
    pub fn normal_view(&self) -> &wgpu::TextureView {
        &self.normal.view
    }

    #[must_use]
    pub fn data_view(&self) -> &wgpu::TextureView {
        &self.data.view
    }

    #[must_use]
    pub fn linear_depth_view(&self) -> &wgpu::TextureView {
        &self.linear_depth.view
    }

    #[must_use]
    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth.view
    }

    #[must_use]
    pub fn light_view(&self) -> &wgpu::TextureView {
        &self.light.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_count_reaches_one_by_one() {
        assert_eq!(mip_count_for(1, 1), 1);
        assert_eq!(mip_count_for(2, 2), 2);
        // Power-of-two: log2(max) + 1.
        assert_eq!(mip_count_for(1024, 1024), 11);
        // Non-power-of-two chains halve (floor) down to 1×1.
        assert_eq!(mip_count_for(1920, 1080), 11);
        assert_eq!(mip_count_for(1025, 7), 11);
    }
}
