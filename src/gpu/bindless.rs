//! Bindless Texture Table
//!
//! The global descriptor heap of the D3D12 design maps onto one large
//! `binding_array<texture_2d<f32>>` bind group. A 32-bit index names a
//! view for the lifetime of its resource and is safe to store in material
//! rows, draw constants and GPU-visible tables.
//!
//! # Retirement
//!
//! Freed indices are quarantined until the fence value stamped at `free`
//! time completes; only then may [`IndexAllocator::allocate`] hand them
//! out again. This guarantees an in-flight frame never sees a slot
//! re-pointed under it.
//!
//! # Writes
//!
//! Allocation is thread-safe (internal lock). Binding a view into a slot
//! is main-thread only — view creation is marshaled through the streaming
//! queue — and marks the table dirty; the bind group is rebuilt lazily at
//! the next [`BindlessTextures::bind_group`] call. Unbound slots alias a
//! 1×1 white dummy so the full array is always valid to sample.

use std::collections::VecDeque;
use std::num::NonZeroU32;

use parking_lot::Mutex;

/// Allocator for 32-bit slots with fence-quarantined reuse.
///
/// Shared by the texture table and the transform buffer; both have the
/// same "never reuse within the in-flight window" contract.
pub struct IndexAllocator {
    next: u32,
    capacity: u32,
    free: Vec<u32>,
    retired: VecDeque<(u64, u32)>,
}

impl IndexAllocator {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            next: 0,
            capacity,
            free: Vec::new(),
            retired: VecDeque::new(),
        }
    }

    /// Hands out a fresh or fully-retired slot; `None` when the table is
    /// exhausted (caller logs and drops, per the OOM policy).
    pub fn allocate(&mut self, completed_fence: u64) -> Option<u32> {
        // Recycle quarantined slots whose retirement fence has completed.
        while let Some(&(stamp, slot)) = self.retired.front() {
            if stamp > completed_fence {
                break;
            }
            self.retired.pop_front();
            self.free.push(slot);
        }

        if let Some(slot) = self.free.pop() {
            return Some(slot);
        }
        if self.next < self.capacity {
            let slot = self.next;
            self.next += 1;
            return Some(slot);
        }
        None
    }

    /// Quarantines `slot` until `retire_fence` completes. Out-of-range
    /// frees are ignored.
    pub fn free(&mut self, slot: u32, retire_fence: u64) {
        if slot >= self.next {
            return;
        }
        self.retired.push_back((retire_fence, slot));
    }

    /// Slots currently live (allocated and not yet freed).
    #[must_use]
    pub fn live_count(&self) -> u32 {
        self.next - self.free.len() as u32 - self.retired.len() as u32
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// The process-wide bindless texture table.
pub struct BindlessTextures {
    layout: wgpu::BindGroupLayout,
    allocator: Mutex<IndexAllocator>,
    views: Vec<Option<wgpu::TextureView>>,
    dummy_view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    bind_group: Option<wgpu::BindGroup>,
    capacity: u32,
}

impl BindlessTextures {
    /// Creates the table. `capacity` must fit the device's binding-array
    /// limits; 1024 is a safe default on D3D12-class hardware.
    #[must_use]
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, capacity: u32) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bindless Texture Layout"),
            entries: &[
                // Binding 0: the texture table
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT
                        .union(wgpu::ShaderStages::COMPUTE),
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: NonZeroU32::new(capacity),
                },
                // Binding 1: shared trilinear sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT
                        .union(wgpu::ShaderStages::COMPUTE),
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Bindless Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let dummy_view = Self::create_white_dummy(device, queue);

        Self {
            layout,
            allocator: Mutex::new(IndexAllocator::new(capacity)),
            views: (0..capacity as usize).map(|_| None).collect(),
            dummy_view,
            sampler,
            bind_group: None,
            capacity,
        }
    }

    /// 1×1 white RGBA8: the default texture for missing assets and empty
    /// slots.
    fn create_white_dummy(device: &wgpu::Device, queue: &wgpu::Queue) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Bindless White Dummy"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255u8; 4],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    /// Allocates a slot and binds `view` to it. Returns the bindless
    /// index, or `None` if the table is full.
    pub fn insert(&mut self, completed_fence: u64, view: wgpu::TextureView) -> Option<u32> {
        let slot = self.allocator.lock().allocate(completed_fence)?;
        self.views[slot as usize] = Some(view);
        self.bind_group = None;
        Some(slot)
    }

    /// Unbinds `slot` and quarantines the index until `retire_fence`
    /// completes.
    pub fn remove(&mut self, slot: u32, retire_fence: u64) {
        if slot as usize >= self.views.len() {
            return;
        }
        self.views[slot as usize] = None;
        self.allocator.lock().free(slot, retire_fence);
        self.bind_group = None;
    }

    /// The table's bind group layout (group index fixed by each pipeline).
    #[must_use]
    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    /// The table bind group, rebuilt lazily after any insert/remove.
    pub fn bind_group(&mut self, device: &wgpu::Device) -> &wgpu::BindGroup {
        if self.bind_group.is_none() {
            let refs: Vec<&wgpu::TextureView> = self
                .views
                .iter()
                .map(|v| v.as_ref().unwrap_or(&self.dummy_view))
                .collect();
            self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Bindless Texture BindGroup"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureViewArray(&refs),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            }));
        }
        self.bind_group.as_ref().expect("bind group built above")
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_sequentially_then_recycles() {
        let mut alloc = IndexAllocator::new(8);
        assert_eq!(alloc.allocate(0), Some(0));
        assert_eq!(alloc.allocate(0), Some(1));
        alloc.free(0, 5);
        // Fence 5 not complete: must not reuse slot 0.
        assert_eq!(alloc.allocate(4), Some(2));
        // Fence complete: slot 0 comes back.
        assert_eq!(alloc.allocate(5), Some(0));
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut alloc = IndexAllocator::new(2);
        assert!(alloc.allocate(0).is_some());
        assert!(alloc.allocate(0).is_some());
        assert_eq!(alloc.allocate(0), None);
    }

    #[test]
    fn out_of_range_free_is_ignored() {
        let mut alloc = IndexAllocator::new(4);
        alloc.free(99, 0);
        assert_eq!(alloc.allocate(u64::MAX), Some(0));
    }

    #[test]
    fn never_reuses_before_fence_completes() {
        let mut alloc = IndexAllocator::new(1);
        assert_eq!(alloc.allocate(0), Some(0));
        alloc.free(0, 10);
        for completed in 0..10 {
            assert_eq!(alloc.allocate(completed), None, "fence {completed}");
        }
        assert_eq!(alloc.allocate(10), Some(0));
    }
}
