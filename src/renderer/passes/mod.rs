//! Render Passes
//!
//! Fixed-function passes of the deferred pipeline, in frame order:
//! shadow cascades → G-buffer → (Hi-Z build) → light accumulation →
//! skybox → composition. Each pass owns its pipelines; shared bind group
//! layouts come from the renderer through [`PassLayouts`].

pub mod compose;
pub mod gbuffer;
pub mod light;
pub mod shadow;
pub mod skybox;

pub use compose::ComposePass;
pub use gbuffer::GBufferPass;
pub use light::LightPass;
pub use shadow::ShadowPass;
pub use skybox::SkyboxPass;

/// Shared bind group layouts handed to pass constructors.
pub struct PassLayouts<'a> {
    /// Group 0: globals + transforms + registry + materials + pools.
    pub frame: &'a wgpu::BindGroupLayout,
    /// Group 1: draw-constant ring (dynamic offset).
    pub constants: &'a wgpu::BindGroupLayout,
    /// Group 2: instance/visible/sub-batch/custom staging.
    pub batch: &'a wgpu::BindGroupLayout,
    /// Group 3 (G-buffer): bindless texture table.
    pub bindless: &'a wgpu::BindGroupLayout,
    /// Group 3 (shadow/light): shadow cascade uniform, render-visible.
    pub shadow_constants: &'a wgpu::BindGroupLayout,
}

/// One batched indirect draw: the culler's command buffer region plus
/// the draw-constant offset that addressed it.
#[derive(Clone, Copy)]
pub struct BatchDraw<'a> {
    pub commands: &'a wgpu::Buffer,
    pub command_offset: u64,
    pub command_count: u32,
    pub constants_offset: u32,
}
