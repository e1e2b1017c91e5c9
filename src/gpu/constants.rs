//! Draw Constants
//!
//! The 32-dword root-constant block of the D3D12 design, delivered the
//! way this codebase delivers all per-draw data: a dynamic-offset uniform
//! ring. Each allocation is one 256-byte slice (the 32 contractual dwords
//! plus padding to the uniform-offset alignment).
//!
//! # Layout contract (do not shift)
//!
//! | dwords | contents |
//! |--------|----------|
//! | 0–1    | fullscreen post-pass input indices |
//! | 2–15   | instance-batch contract: dw2 instance base, dw3 visible-index base, dw4 sub-batch table base, dw5 custom-data base (16-byte units), dw6 instance count, dw7 sub-batch count, dw8–15 reserved |
//! | 16     | debug visualization mode (0..4) |
//! | 17–31  | per-pass extensions (light counts, cascade index, terrain parameters, screen size) |
//!
//! Shaders declare the block as `array<vec4<u32>, 8>` and bitcast lanes as
//! needed; a unit test pins the section offsets.

use bytemuck::{Pod, Zeroable};

use crate::gpu::{DeferredDisposal, FRAME_COUNT};

/// Uniform-offset alignment; also the slice stride of the ring.
pub const DRAW_CONSTANTS_STRIDE: u32 = 256;

/// Dword indices of the contractual sections.
pub mod section {
    /// Post-process input indices.
    pub const POST: usize = 0;
    /// Instance-batch contract start.
    pub const BATCH: usize = 2;
    /// Debug visualization mode.
    pub const DEBUG_MODE: usize = 16;
    /// Per-pass extension start.
    pub const PASS_EXT: usize = 17;
}

/// One 256-byte draw-constant block. Dwords 0–31 are contractual; the
/// rest pads to the dynamic-offset alignment.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct DrawConstants {
    pub dw: [u32; 64],
}

impl Default for DrawConstants {
    fn default() -> Self {
        Self { dw: [0; 64] }
    }
}

impl DrawConstants {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_post_inputs(&mut self, a: u32, b: u32) -> &mut Self {
        self.dw[section::POST] = a;
        self.dw[section::POST + 1] = b;
        self
    }

    /// Fills the instance-batch section (dwords 2–7).
    pub fn set_batch(
        &mut self,
        instance_base: u32,
        visible_base: u32,
        subbatch_base: u32,
        custom_data_base: u32,
        instance_count: u32,
        subbatch_count: u32,
    ) -> &mut Self {
        self.dw[section::BATCH] = instance_base;
        self.dw[section::BATCH + 1] = visible_base;
        self.dw[section::BATCH + 2] = subbatch_base;
        self.dw[section::BATCH + 3] = custom_data_base;
        self.dw[section::BATCH + 4] = instance_count;
        self.dw[section::BATCH + 5] = subbatch_count;
        self
    }

    pub fn set_debug_mode(&mut self, mode: u32) -> &mut Self {
        self.dw[section::DEBUG_MODE] = mode;
        self
    }

    /// Writes a per-pass extension dword (`slot` relative to dword 17).
    pub fn set_pass_ext(&mut self, slot: usize, value: u32) -> &mut Self {
        self.dw[section::PASS_EXT + slot] = value;
        self
    }

    pub fn set_pass_ext_f32(&mut self, slot: usize, value: f32) -> &mut Self {
        self.set_pass_ext(slot, value.to_bits())
    }
}

/// Per-frame ring of draw-constant slices, bound once per pass with a
/// dynamic offset per draw/dispatch.
pub struct ConstantRing {
    layout: wgpu::BindGroupLayout,
    slots: [RingSlot; FRAME_COUNT],
    staging: Vec<DrawConstants>,
}

struct RingSlot {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    capacity: u32,
}

impl ConstantRing {
    const INITIAL_CAPACITY: u32 = 64;

    #[must_use]
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Draw Constants Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT.union(wgpu::ShaderStages::COMPUTE),
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(u64::from(DRAW_CONSTANTS_STRIDE)),
                },
                count: None,
            }],
        });

        let slots =
            std::array::from_fn(|_| Self::create_slot(device, &layout, Self::INITIAL_CAPACITY));

        Self {
            layout,
            slots,
            staging: Vec::new(),
        }
    }

    fn create_slot(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        capacity: u32,
    ) -> RingSlot {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Draw Constants Buffer"),
            size: u64::from(capacity) * u64::from(DRAW_CONSTANTS_STRIDE),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Draw Constants BindGroup"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(u64::from(DRAW_CONSTANTS_STRIDE)),
                }),
            }],
        });
        RingSlot {
            buffer,
            bind_group,
            capacity,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    /// Begins a frame: clears the staging list for this ring slot.
    pub fn begin_frame(&mut self) {
        self.staging.clear();
    }

    /// Stages one block and returns its dynamic offset for
    /// `set_bind_group`.
    pub fn push(&mut self, constants: DrawConstants) -> u32 {
        let offset = self.staging.len() as u32 * DRAW_CONSTANTS_STRIDE;
        self.staging.push(constants);
        offset
    }

    /// Uploads all staged blocks for this frame, growing the slot if
    /// needed (old memory deferred-disposed).
    pub fn flush(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        disposal: &mut DeferredDisposal,
        current_fence: u64,
        frame: usize,
    ) {
        if self.staging.is_empty() {
            return;
        }
        let slot = &mut self.slots[frame % FRAME_COUNT];
        let required = self.staging.len() as u32;
        if required > slot.capacity {
            let new_capacity = (slot.capacity * 2).max(required).next_power_of_two();
            log::info!(
                "Growing draw-constant ring: {} -> {new_capacity} blocks",
                slot.capacity
            );
            let new_slot = Self::create_slot(device, &self.layout, new_capacity);
            let old = std::mem::replace(slot, new_slot);
            disposal.retire_buffer(old.buffer, current_fence);
        }
        queue.write_buffer(
            &self.slots[frame % FRAME_COUNT].buffer,
            0,
            bytemuck::cast_slice(&self.staging),
        );
    }

    /// This frame's bind group (bind with the offset returned by
    /// [`push`](Self::push)).
    #[must_use]
    pub fn bind_group(&self, frame: usize) -> &wgpu::BindGroup {
        &self.slots[frame % FRAME_COUNT].bind_group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_one_stride() {
        assert_eq!(
            std::mem::size_of::<DrawConstants>(),
            DRAW_CONSTANTS_STRIDE as usize
        );
    }

    #[test]
    fn section_offsets_are_contractual() {
        // The external contract: post 0–1, batch 2–15, debug 16, ext 17+.
        assert_eq!(section::POST, 0);
        assert_eq!(section::BATCH, 2);
        assert_eq!(section::DEBUG_MODE, 16);
        assert_eq!(section::PASS_EXT, 17);

        let mut c = DrawConstants::new();
        c.set_batch(10, 20, 30, 40, 5, 2);
        c.set_debug_mode(3);
        c.set_pass_ext(0, 7);
        assert_eq!(c.dw[2], 10);
        assert_eq!(c.dw[3], 20);
        assert_eq!(c.dw[4], 30);
        assert_eq!(c.dw[5], 40);
        assert_eq!(c.dw[6], 5);
        assert_eq!(c.dw[7], 2);
        assert_eq!(c.dw[16], 3);
        assert_eq!(c.dw[17], 7);
    }
}
