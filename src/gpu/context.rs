//! GPU Context
//!
//! [`GpuContext`] holds the device, queue, surface and surface
//! configuration, and owns the shared [`FrameFence`]. It is created once
//! and passed by reference into every subsystem — there are no hidden
//! globals, and teardown order is the owner's drop order.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::errors::{Result, StrataError};
use crate::gpu::FrameFence;
use crate::renderer::settings::RenderSettings;

/// Depth format for the reverse-Z main depth-stencil.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Features the GPU-driven path cannot run without.
#[must_use]
pub fn required_features() -> wgpu::Features {
    wgpu::Features::MULTI_DRAW_INDIRECT
        | wgpu::Features::INDIRECT_FIRST_INSTANCE
        | wgpu::Features::TEXTURE_BINDING_ARRAY
        | wgpu::Features::PARTIALLY_BOUND_BINDING_ARRAY
        | wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING
        | wgpu::Features::FLOAT32_FILTERABLE
}

/// WGPU core context.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,

    /// Shared submission fence; every deferred lifetime compares against
    /// its completed value.
    pub fence: FrameFence,
    pub depth_format: wgpu::TextureFormat,
}

impl GpuContext {
    pub async fn new<W>(
        window: W,
        settings: &RenderSettings,
        width: u32,
        height: u32,
    ) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window)
            .map_err(|e| StrataError::AdapterRequestFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| StrataError::AdapterRequestFailed(e.to_string()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: required_features() | settings.extra_features,
                required_limits: settings.required_limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        let mut config = surface
            .get_default_config(&adapter, width.max(1), height.max(1))
            .ok_or_else(|| {
                StrataError::AdapterRequestFailed("Surface not supported by adapter".to_string())
            })?;

        config.present_mode = if settings.vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        surface.configure(&device, &config);

        log::info!(
            "GPU context created: {}x{} {:?}, features {:?}",
            config.width,
            config.height,
            config.format,
            required_features() | settings.extra_features
        );

        Ok(Self {
            device,
            queue,
            surface,
            config,
            fence: FrameFence::new(),
            depth_format: DEPTH_FORMAT,
        })
    }

    /// Reconfigures the surface. Render targets are rebuilt by the
    /// renderer's resize path, not here.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        let mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        if self.config.present_mode != mode {
            self.config.present_mode = mode;
            self.surface.configure(&self.device, &self.config);
        }
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    #[must_use]
    pub fn color_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }
}
