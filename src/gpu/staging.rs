//! Growable Per-Frame Buffers
//!
//! The instance batcher, culler and terrain pipeline all need GPU buffers
//! that are rewritten every frame and occasionally outgrow their
//! allocation. [`GrowableBuffer`] keeps one copy per frame-ring slot;
//! growth doubles the capacity and retires the old allocation through
//! [`DeferredDisposal`](crate::gpu::DeferredDisposal) so in-flight frames
//! keep their memory.

use crate::gpu::{DeferredDisposal, FRAME_COUNT};

struct Slot {
    buffer: wgpu::Buffer,
    capacity: u64,
}

/// A per-frame ring of identically-used GPU buffers with doubling growth.
pub struct GrowableBuffer {
    label: &'static str,
    usage: wgpu::BufferUsages,
    slots: [Slot; FRAME_COUNT],
}

impl GrowableBuffer {
    /// Creates the ring with `initial_capacity` bytes per slot.
    #[must_use]
    pub fn new(
        device: &wgpu::Device,
        label: &'static str,
        usage: wgpu::BufferUsages,
        initial_capacity: u64,
    ) -> Self {
        let capacity = initial_capacity.max(256);
        let slots = std::array::from_fn(|_| Slot {
            buffer: Self::create(device, label, usage, capacity),
            capacity,
        });
        Self {
            label,
            usage,
            slots,
        }
    }

    fn create(
        device: &wgpu::Device,
        label: &str,
        usage: wgpu::BufferUsages,
        size: u64,
    ) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Ensures this frame's slot holds at least `required` bytes,
    /// doubling and retiring the old buffer if not.
    pub fn ensure(
        &mut self,
        device: &wgpu::Device,
        disposal: &mut DeferredDisposal,
        current_fence: u64,
        frame: usize,
        required: u64,
    ) {
        let slot = &mut self.slots[frame % FRAME_COUNT];
        if required <= slot.capacity {
            return;
        }
        let new_capacity = (slot.capacity * 2).max(required).next_power_of_two();
        log::info!(
            "Growing buffer '{}' slot {frame}: {} -> {new_capacity} bytes",
            self.label,
            slot.capacity
        );
        let new_buffer = Self::create(device, self.label, self.usage, new_capacity);
        let old = std::mem::replace(&mut slot.buffer, new_buffer);
        disposal.retire_buffer(old, current_fence);
        slot.capacity = new_capacity;
    }

    /// Uploads `bytes` into this frame's slot at offset 0, growing first
    /// if needed.
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        disposal: &mut DeferredDisposal,
        current_fence: u64,
        frame: usize,
        bytes: &[u8],
    ) {
        if bytes.is_empty() {
            return;
        }
        self.ensure(device, disposal, current_fence, frame, bytes.len() as u64);
        // wgpu requires COPY_BUFFER_ALIGNMENT (4) sized writes; staging
        // payloads are Pod arrays and already multiples of 4.
        queue.write_buffer(&self.slots[frame % FRAME_COUNT].buffer, 0, bytes);
    }

    /// This frame's buffer.
    #[must_use]
    pub fn buffer(&self, frame: usize) -> &wgpu::Buffer {
        &self.slots[frame % FRAME_COUNT].buffer
    }

    /// This frame's capacity in bytes.
    #[must_use]
    pub fn capacity(&self, frame: usize) -> u64 {
        self.slots[frame % FRAME_COUNT].capacity
    }
}
