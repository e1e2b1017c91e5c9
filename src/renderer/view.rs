//! Render View — Swapchain and Frame Pacing
//!
//! Owns the per-frame ring index and the pacing fences. The surface
//! itself lives in [`GpuContext`]; this type decides *when* frames start
//! and how many may be queued.
//!
//! # Pacing
//!
//! - `begin_frame` blocks until the frame that last used this ring slot
//!   has completed, so per-frame resources (staging buffers, constant
//!   ring slices) are safe to overwrite.
//! - `present` submits, signals the fence, presents, then waits until at
//!   most one frame remains queued behind the one just submitted.

use crate::errors::Result;
use crate::gpu::{FRAME_COUNT, GpuContext};

/// Frame pacing + ring indexing.
pub struct RenderView {
    frame_index: usize,
    /// Fence value signaled by the submit that last used each ring slot.
    slot_fences: [u64; FRAME_COUNT],
    /// Fence value of the previous frame's submit (one-frame-queued cap).
    previous_submit: u64,
    frame_number: u64,
}

impl Default for RenderView {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderView {
    #[must_use]
    pub fn new() -> Self {
        Self {
            frame_index: 0,
            slot_fences: [0; FRAME_COUNT],
            previous_submit: 0,
            frame_number: 0,
        }
    }

    /// Current frame ring index ∈ {0, 1, 2}.
    #[must_use]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Monotone frame counter (frame 0 disables Hi-Z).
    #[must_use]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Waits for this ring slot's previous use, then acquires the back
    /// buffer. Surface loss reconfigures and retries once.
    pub fn begin_frame(&mut self, gpu: &GpuContext) -> Result<wgpu::SurfaceTexture> {
        gpu.fence
            .wait_for(&gpu.device, self.slot_fences[self.frame_index]);

        match gpu.surface.get_current_texture() {
            wgpu::CurrentSurfaceTexture::Success(frame)
            | wgpu::CurrentSurfaceTexture::Suboptimal(frame) => Ok(frame),
            wgpu::CurrentSurfaceTexture::Lost | wgpu::CurrentSurfaceTexture::Outdated => {
                log::warn!("Surface lost/outdated; reconfiguring");
                gpu.surface.configure(&gpu.device, &gpu.config);
                match gpu.surface.get_current_texture() {
                    wgpu::CurrentSurfaceTexture::Success(frame)
                    | wgpu::CurrentSurfaceTexture::Suboptimal(frame) => Ok(frame),
                    other => Err(crate::errors::StrataError::SurfaceError(format!(
                        "{other:?}"
                    ))),
                }
            }
            other => Err(crate::errors::StrataError::SurfaceError(format!(
                "{other:?}"
            ))),
        }
    }

    /// Submits the frame's command buffer, signals the fence, presents,
    /// advances the ring, and applies the one-frame-queued cap.
    /// Returns the submit's fence value.
    pub fn present(
        &mut self,
        gpu: &GpuContext,
        frame: wgpu::SurfaceTexture,
        commands: wgpu::CommandBuffer,
    ) -> u64 {
        gpu.queue.submit(std::iter::once(commands));
        let fence = gpu.fence.signal(&gpu.queue);
        frame.present();

        self.slot_fences[self.frame_index] = fence;
        self.frame_index = (self.frame_index + 1) % FRAME_COUNT;
        self.frame_number += 1;

        // Keep at most one frame queued: before recording frame N+1, the
        // frame N−1 submit must have completed.
        let wait_target = self.previous_submit;
        self.previous_submit = fence;
        gpu.fence.wait_for(&gpu.device, wait_target);

        fence
    }
}
