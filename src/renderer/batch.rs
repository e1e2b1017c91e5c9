//! Command Buffer / Instance Batcher
//!
//! Collects one draw submission per renderable per frame, buckets them by
//! pass, and forms *sub-batches* — the smallest indirect-draw unit —
//! keyed by `(material_id, mesh_part_id, extra)` where `extra` is the
//! bone-buffer id for skinned meshes or the custom-data layout id for
//! custom paths. The key is total: two submissions with equal keys always
//! land in one indirect command.
//!
//! Per pass, execution writes three per-instance staging buffers
//! (descriptor, sub-batch slot id, optional custom-data blob) plus the
//! small sub-batch table, dispatches the GPU culler over them, and the
//! owning pass issues a single `multi_draw_indexed_indirect` over the
//! emitted commands.
//!
//! Sub-batch slots are dense per batch; the histogram/counter/command
//! buffers are indexed by slot, and the emit stage resolves
//! `slot → mesh_part_id` through the sub-batch table. The visible count
//! of a sub-batch therefore always equals its emitted instance count,
//! while the key still carries material and layout identity.
//!
//! Non-ready assets are refused at enqueue (silent drop, rate-limited
//! log); the draw appears once the asset's fence completes.

use bytemuck::{Pod, Zeroable};
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_64;

use crate::gpu::{DeferredDisposal, FrameFence, GrowableBuffer};
use crate::renderer::cull::{CullBuffers, SUBBATCH_FLAG_SKINNED};
use crate::resources::{MaterialRegistry, PassMask};
use crate::streaming::{Asset, GpuMesh};
use crate::utils::RateLimiter;
use crate::warn_throttled;

/// Hard cap on instances per pass per frame; submissions beyond it are
/// clamped (and the clamp logged).
pub const MAX_BATCH_INSTANCES: usize = 1 << 20;

/// Render passes a submission can participate in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Opaque = 0,
    Shadow = 1,
    Light = 2,
    PostProcess = 3,
}

pub const PASS_COUNT: usize = 4;

impl Pass {
    #[must_use]
    pub fn mask(self) -> PassMask {
        match self {
            Pass::Opaque => PassMask::OPAQUE,
            Pass::Shadow => PassMask::SHADOW,
            Pass::Light => PassMask::LIGHT,
            Pass::PostProcess => PassMask::POST_PROCESS,
        }
    }

    pub const ALL: [Pass; PASS_COUNT] = [Pass::Opaque, Pass::Shadow, Pass::Light, Pass::PostProcess];
}

// ─── GPU-visible records ──────────────────────────────────────────────────────

/// Per-instance descriptor consumed by every vertex shader (12 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct InstanceDesc {
    pub transform_slot: u32,
    pub material_id: u32,
    /// Offset into the pass's custom-data blob in 16-byte units;
    /// `u32::MAX` when the submission carries none.
    pub custom_data_idx: u32,
}

/// Per-sub-batch record resolved by the culler's emit stage (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SubBatchRecord {
    pub mesh_part: u32,
    pub flags: u32,
    pub _pad: [u32; 2],
}

/// Packed indexed indirect command, the exact layout
/// `multi_draw_indexed_indirect` consumes (20 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

/// Packed non-indexed indirect command (terrain self-draw, 16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawCommand {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

// ─── Custom-data layout identity ──────────────────────────────────────────────

/// Identity of a per-instance custom-data layout. The id is derived from
/// `(size, align, field-layout tag)` — never from a type name — so it is
/// stable across builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CustomLayout {
    pub size: u32,
    pub align: u32,
    /// Caller-chosen tag describing the field layout (e.g. a hash of
    /// field offsets); differentiates equal-sized layouts.
    pub tag: u64,
}

impl CustomLayout {
    #[must_use]
    pub fn of<T: Pod>(tag: u64) -> Self {
        Self {
            size: std::mem::size_of::<T>() as u32,
            align: std::mem::align_of::<T>() as u32,
            tag,
        }
    }

    /// Stable 32-bit layout id.
    #[must_use]
    pub fn id(&self) -> u32 {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&self.size.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.align.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.tag.to_le_bytes());
        (xxh3_64(&bytes) & 0xFFFF_FFFF) as u32
    }
}

/// Sub-batch key; total over all submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubBatchKey {
    pub material_id: u32,
    pub mesh_part: u32,
    /// Bone-buffer id (skinned) or custom-layout id (custom data); 0
    /// otherwise.
    pub extra: u32,
}

// ─── CPU grouping ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Submission {
    pub key: SubBatchKey,
    pub transform_slot: u32,
    pub custom_data_idx: u32,
    pub skinned: bool,
}

/// Result of grouping one pass's submissions.
#[derive(Debug, Default)]
pub struct GroupedBatch {
    pub instances: Vec<InstanceDesc>,
    /// Per-instance dense sub-batch slot.
    pub subbatch_ids: Vec<u32>,
    pub table: Vec<SubBatchRecord>,
    pub keys: Vec<SubBatchKey>,
    /// Submissions dropped by the capacity clamp.
    pub clamped: usize,
}

/// Pure grouping step: assigns dense sub-batch slots in first-seen order
/// and emits the per-instance staging arrays in submission order.
#[must_use]
pub fn group_submissions(submissions: &[Submission], max_instances: usize) -> GroupedBatch {
    let mut out = GroupedBatch::default();
    let mut slot_of: FxHashMap<SubBatchKey, u32> = FxHashMap::default();

    let kept = submissions.len().min(max_instances);
    out.clamped = submissions.len() - kept;

    for sub in &submissions[..kept] {
        let slot = *slot_of.entry(sub.key).or_insert_with(|| {
            let slot = out.table.len() as u32;
            out.table.push(SubBatchRecord {
                mesh_part: sub.key.mesh_part,
                flags: if sub.skinned { SUBBATCH_FLAG_SKINNED } else { 0 },
                _pad: [0; 2],
            });
            out.keys.push(sub.key);
            slot
        });
        out.instances.push(InstanceDesc {
            transform_slot: sub.transform_slot,
            material_id: sub.key.material_id,
            custom_data_idx: sub.custom_data_idx,
        });
        out.subbatch_ids.push(slot);
    }
    out
}

// ─── Pass queue + GPU staging ─────────────────────────────────────────────────

/// Raw command-list action (terrain self-draw, debug overlays). Runs in
/// submission order within its pass; wgpu handles are `Clone`, so actions
/// own everything they touch.
pub type CustomAction = Box<dyn FnOnce(&mut wgpu::CommandEncoder) + Send>;

struct PassQueue {
    submissions: Vec<Submission>,
    custom_blob: Vec<u8>,
    actions: Vec<CustomAction>,
}

impl PassQueue {
    fn new() -> Self {
        Self {
            submissions: Vec::new(),
            custom_blob: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Appends a 16-byte-aligned blob chunk, returning its offset in
    /// 16-byte units.
    fn push_custom(&mut self, bytes: &[u8]) -> u32 {
        let idx = (self.custom_blob.len() / 16) as u32;
        self.custom_blob.extend_from_slice(bytes);
        let rem = self.custom_blob.len() % 16;
        if rem != 0 {
            self.custom_blob.extend(std::iter::repeat_n(0u8, 16 - rem));
        }
        idx
    }
}

struct PassGpu {
    instances: GrowableBuffer,
    subbatch_ids: GrowableBuffer,
    table: GrowableBuffer,
    custom: GrowableBuffer,
    cull: CullBuffers,
}

/// Per-instance custom data attached to a submission.
pub struct CustomData<'a> {
    pub layout: CustomLayout,
    pub bytes: &'a [u8],
}

/// Ready-to-draw batch summary for one pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreparedBatch {
    pub instance_count: u32,
    pub subbatch_count: u32,
}

/// The frame's draw-submission collector.
pub struct CommandBuffer {
    queues: [PassQueue; PASS_COUNT],
    gpu: [PassGpu; PASS_COUNT],
    grouped: [GroupedBatch; PASS_COUNT],
    render_layout: wgpu::BindGroupLayout,
    fence: FrameFence,
    limiter: RateLimiter,
}

impl CommandBuffer {
    #[must_use]
    pub fn new(device: &wgpu::Device, fence: FrameFence) -> Self {
        let storage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let gpu = std::array::from_fn(|_| PassGpu {
            instances: GrowableBuffer::new(device, "Batch Instances", storage, 12 * 1024),
            subbatch_ids: GrowableBuffer::new(device, "Batch SubBatch Ids", storage, 4 * 1024),
            table: GrowableBuffer::new(device, "Batch SubBatch Table", storage, 16 * 256),
            custom: GrowableBuffer::new(device, "Batch Custom Data", storage, 16 * 256),
            cull: CullBuffers::new(device, "Batch Cull Stats"),
        });

        let ro = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let render_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Batch Render Layout"),
            entries: &[ro(0), ro(1), ro(2), ro(3), ro(4)],
        });

        Self {
            queues: std::array::from_fn(|_| PassQueue::new()),
            gpu,
            grouped: std::array::from_fn(|_| GroupedBatch::default()),
            render_layout,
            fence,
            limiter: RateLimiter::per_second(),
        }
    }

    // ── Submission ─────────────────────────────────────────────────────

    /// Enqueues one renderable for this frame. The material's effect
    /// decides pass participation; a non-ready mesh is silently dropped
    /// (rate-limited log) and reappears once streamed in.
    pub fn enqueue(
        &mut self,
        materials: &MaterialRegistry,
        mesh: &Asset<GpuMesh>,
        part_index: usize,
        material_id: u32,
        custom: Option<CustomData<'_>>,
        transform_slot: u32,
    ) {
        let completed = self.fence.completed();
        let Some(gpu_mesh) = mesh.get(completed) else {
            if mesh.is_ready(completed) {
                // Failed import: permanently empty, nothing to draw.
                return;
            }
            warn_throttled!(
                self.limiter,
                "enqueue-not-ready",
                "Dropping draw for streaming asset {:?}",
                mesh.path()
            );
            return;
        };
        let Some(&mesh_part) = gpu_mesh.parts.get(part_index) else {
            warn_throttled!(
                self.limiter,
                "enqueue-bad-part",
                "Mesh {:?} has no part {part_index}",
                mesh.path()
            );
            return;
        };

        let pass_mask = materials.pass_mask(material_id);
        self.enqueue_part(pass_mask, mesh_part, material_id, custom, transform_slot, false);
    }

    /// Lower-level submission for pre-registered parts (point-light
    /// volumes, renderer internals, tests).
    pub fn enqueue_part(
        &mut self,
        pass_mask: PassMask,
        mesh_part: u32,
        material_id: u32,
        custom: Option<CustomData<'_>>,
        transform_slot: u32,
        skinned: bool,
    ) {
        let (extra, custom_bytes) = match &custom {
            Some(data) => (data.layout.id(), Some(data.bytes)),
            None => (0, None),
        };
        let key = SubBatchKey {
            material_id,
            mesh_part,
            extra,
        };

        for pass in Pass::ALL {
            if !pass_mask.contains(pass.mask()) {
                continue;
            }
            let queue = &mut self.queues[pass as usize];
            let custom_data_idx = match custom_bytes {
                Some(bytes) => queue.push_custom(bytes),
                None => u32::MAX,
            };
            queue.submissions.push(Submission {
                key,
                transform_slot,
                custom_data_idx,
                skinned,
            });
        }
    }

    /// Enqueues a raw command-encoder action into a pass.
    pub fn enqueue_action(&mut self, pass: Pass, action: CustomAction) {
        self.queues[pass as usize].actions.push(action);
    }

    #[must_use]
    pub fn submission_count(&self, pass: Pass) -> usize {
        self.queues[pass as usize].submissions.len()
    }

    // ── Per-frame execution ────────────────────────────────────────────

    /// Groups and uploads one pass's staging buffers; `regions` sizes the
    /// culler outputs (4 for the shadow pass). Returns `None` when the
    /// pass is empty.
    pub fn prepare_pass(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        disposal: &mut DeferredDisposal,
        frame: usize,
        pass: Pass,
        regions: u64,
    ) -> Option<PreparedBatch> {
        let idx = pass as usize;
        if self.queues[idx].submissions.is_empty() {
            return None;
        }

        let grouped = group_submissions(&self.queues[idx].submissions, MAX_BATCH_INSTANCES);
        if grouped.clamped > 0 {
            warn_throttled!(
                self.limiter,
                "batch-clamp",
                "{:?} pass clamped {} submissions past capacity",
                pass,
                grouped.clamped
            );
        }

        let fence = self.fence.next_value();
        let gpu = &mut self.gpu[idx];
        gpu.instances.upload(
            device,
            queue,
            disposal,
            fence,
            frame,
            bytemuck::cast_slice(&grouped.instances),
        );
        gpu.subbatch_ids.upload(
            device,
            queue,
            disposal,
            fence,
            frame,
            bytemuck::cast_slice(&grouped.subbatch_ids),
        );
        gpu.table.upload(
            device,
            queue,
            disposal,
            fence,
            frame,
            bytemuck::cast_slice(&grouped.table),
        );
        let blob = &self.queues[idx].custom_blob;
        if !blob.is_empty() {
            gpu.custom.upload(device, queue, disposal, fence, frame, blob);
        }

        let batch = PreparedBatch {
            instance_count: grouped.instances.len() as u32,
            subbatch_count: grouped.table.len() as u32,
        };
        gpu.cull.ensure(
            device,
            disposal,
            fence,
            frame,
            u64::from(batch.instance_count),
            u64::from(batch.subbatch_count),
            regions,
        );

        self.grouped[idx] = grouped;
        Some(batch)
    }

    /// The grouping produced by the last [`prepare_pass`](Self::prepare_pass)
    /// for a pass; debug tools use it to map sub-batch slots back to keys.
    #[must_use]
    pub fn last_grouping(&self, pass: Pass) -> &GroupedBatch {
        &self.grouped[pass as usize]
    }

    /// The culler outputs for a pass.
    #[must_use]
    pub fn cull_buffers(&self, pass: Pass) -> &CullBuffers {
        &self.gpu[pass as usize].cull
    }

    /// Staging buffers for the culler's IO bind group.
    #[must_use]
    pub fn staging_buffers(&self, pass: Pass, frame: usize) -> (&wgpu::Buffer, &wgpu::Buffer, &wgpu::Buffer) {
        let gpu = &self.gpu[pass as usize];
        (
            gpu.instances.buffer(frame),
            gpu.subbatch_ids.buffer(frame),
            gpu.table.buffer(frame),
        )
    }

    /// Layout of the render-side batch bind group (group 2 of every
    /// batched draw pipeline).
    #[must_use]
    pub fn render_layout(&self) -> &wgpu::BindGroupLayout {
        &self.render_layout
    }

    /// Render-side bind group: instance descriptors, visible indices,
    /// sub-batch ids, sub-batch table, custom data.
    #[must_use]
    pub fn render_bind_group(
        &self,
        device: &wgpu::Device,
        pass: Pass,
        frame: usize,
    ) -> wgpu::BindGroup {
        let gpu = &self.gpu[pass as usize];
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Batch Render BindGroup"),
            layout: &self.render_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: gpu.instances.buffer(frame).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: gpu.cull.visible.buffer(frame).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: gpu.subbatch_ids.buffer(frame).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: gpu.table.buffer(frame).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: gpu.custom.buffer(frame).as_entire_binding(),
                },
            ],
        })
    }

    /// Drains a pass's custom actions in submission order.
    pub fn take_actions(&mut self, pass: Pass) -> Vec<CustomAction> {
        std::mem::take(&mut self.queues[pass as usize].actions)
    }

    /// Clears all queues for the next frame.
    pub fn clear(&mut self) {
        for queue in &mut self.queues {
            queue.submissions.clear();
            queue.custom_blob.clear();
            queue.actions.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes_are_contractual() {
        assert_eq!(std::mem::size_of::<InstanceDesc>(), 12);
        assert_eq!(std::mem::size_of::<SubBatchRecord>(), 16);
        assert_eq!(std::mem::size_of::<DrawIndexedCommand>(), 20);
        assert_eq!(std::mem::size_of::<DrawCommand>(), 16);
    }

    fn sub(material: u32, part: u32, slot: u32) -> Submission {
        Submission {
            key: SubBatchKey {
                material_id: material,
                mesh_part: part,
                extra: 0,
            },
            transform_slot: slot,
            custom_data_idx: u32::MAX,
            skinned: false,
        }
    }

    #[test]
    fn equal_keys_share_one_subbatch() {
        let subs = [sub(1, 7, 0), sub(1, 7, 1), sub(1, 7, 2)];
        let grouped = group_submissions(&subs, usize::MAX);
        assert_eq!(grouped.table.len(), 1);
        assert_eq!(grouped.subbatch_ids, vec![0, 0, 0]);
        assert_eq!(grouped.table[0].mesh_part, 7);
    }

    #[test]
    fn distinct_materials_split_same_mesh_part() {
        // Same mesh part under two materials must not merge: the key is
        // total over (material, part, extra).
        let subs = [sub(1, 7, 0), sub(2, 7, 1), sub(1, 7, 2)];
        let grouped = group_submissions(&subs, usize::MAX);
        assert_eq!(grouped.table.len(), 2);
        assert_eq!(grouped.subbatch_ids, vec![0, 1, 0]);
    }

    #[test]
    fn instances_keep_submission_order() {
        let subs = [sub(1, 7, 10), sub(2, 8, 11), sub(1, 7, 12)];
        let grouped = group_submissions(&subs, usize::MAX);
        let slots: Vec<u32> = grouped.instances.iter().map(|i| i.transform_slot).collect();
        assert_eq!(slots, vec![10, 11, 12]);
    }

    #[test]
    fn clamp_drops_tail_and_counts() {
        let subs: Vec<Submission> = (0..10).map(|i| sub(1, 7, i)).collect();
        let grouped = group_submissions(&subs, 6);
        assert_eq!(grouped.instances.len(), 6);
        assert_eq!(grouped.clamped, 4);
    }

    #[test]
    fn layout_id_depends_on_shape_not_name() {
        #[repr(C)]
        #[derive(Clone, Copy, Pod, Zeroable)]
        struct A {
            x: [f32; 4],
        }
        #[repr(C)]
        #[derive(Clone, Copy, Pod, Zeroable)]
        struct B {
            y: [f32; 4],
        }
        // Same (size, align, tag): same id regardless of type name.
        assert_eq!(CustomLayout::of::<A>(1).id(), CustomLayout::of::<B>(1).id());
        // Different tag or size: different id.
        assert_ne!(CustomLayout::of::<A>(1).id(), CustomLayout::of::<A>(2).id());
        assert_ne!(
            CustomLayout::of::<A>(1).id(),
            CustomLayout {
                size: 32,
                align: 16,
                tag: 1
            }
            .id()
        );
    }

    #[test]
    fn visibility_totality_under_grouping() {
        // sum over sub-batches of instance counts == total instances.
        let subs: Vec<Submission> = (0..100)
            .map(|i| sub(i % 3, i % 5, i))
            .collect();
        let grouped = group_submissions(&subs, usize::MAX);
        let mut per_slot = vec![0u32; grouped.table.len()];
        for &slot in &grouped.subbatch_ids {
            per_slot[slot as usize] += 1;
        }
        assert_eq!(per_slot.iter().sum::<u32>() as usize, subs.len());
        // Every slot references the mesh part of its key.
        for (slot, key) in grouped.keys.iter().enumerate() {
            assert_eq!(grouped.table[slot].mesh_part, key.mesh_part);
        }
    }
}
