//! Deferred Disposal
//!
//! GPU memory cannot be released while an in-flight frame may still read
//! it. Every retirement is stamped `current_fence + FRAME_COUNT`; a single
//! sweep at frame start drops everything whose stamp is at or below the
//! completed fence.

use std::collections::VecDeque;

use crate::gpu::FRAME_COUNT;

enum Retired {
    Buffer(wgpu::Buffer),
    Texture(wgpu::Texture),
}

/// Retirement queue for buffers and textures referenced by in-flight
/// frames. Single-writer (main thread).
#[derive(Default)]
pub struct DeferredDisposal {
    queue: VecDeque<(u64, Retired)>,
}

impl DeferredDisposal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a buffer for destruction once `current_fence + FRAME_COUNT`
    /// completes.
    pub fn retire_buffer(&mut self, buffer: wgpu::Buffer, current_fence: u64) {
        self.queue
            .push_back((current_fence + FRAME_COUNT as u64, Retired::Buffer(buffer)));
    }

    pub fn retire_texture(&mut self, texture: wgpu::Texture, current_fence: u64) {
        self.queue
            .push_back((current_fence + FRAME_COUNT as u64, Retired::Texture(texture)));
    }

    /// Releases every resource whose stamp is `<= completed`. Called once
    /// at frame start.
    pub fn sweep(&mut self, completed: u64) {
        while let Some((stamp, _)) = self.queue.front() {
            if *stamp > completed {
                break;
            }
            match self.queue.pop_front() {
                Some((_, Retired::Buffer(b))) => b.destroy(),
                Some((_, Retired::Texture(t))) => t.destroy(),
                None => break,
            }
        }
    }

    /// Number of resources still awaiting release.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
