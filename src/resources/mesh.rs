//! Mesh Registry and Geometry Pool
//!
//! Mesh data is pooled: all index data lives in one `u32` index buffer,
//! all vertex attributes in per-attribute storage buffers. A "buffer
//! index" in a [`MeshPartRecord`] is therefore a stable element offset
//! into the corresponding pool — safe to pass through GPU tables and read
//! by vertex pulling, which is how the culler and every vertex shader
//! consume geometry.
//!
//! [`MeshRegistry::register`] is idempotent by part identity: each unique
//! part gets a stable 32-bit `mesh_part_id`, and registering the same part
//! again returns the same id without growing the table. The table is
//! append-only within a frame.

use glam::Vec4;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::errors::{Result, StrataError};
use crate::gpu::{DeferredDisposal, FrameFence};

// ─── Mesh Part ────────────────────────────────────────────────────────────────

/// CPU-side description of a contiguous index range within a mesh.
///
/// `positions`/`normals`/`uvs` are element offsets into the geometry
/// pool's attribute buffers; `indices` is the element offset of the
/// part's index range. `local_sphere` is `(center.xyz, radius)` in mesh
/// space.
#[derive(Debug, Clone)]
pub struct MeshPart {
    /// Identity for idempotent registration.
    pub guid: Uuid,
    pub positions: u32,
    pub normals: u32,
    pub uvs: u32,
    pub indices: u32,
    pub base_index: u32,
    pub index_count: u32,
    pub bone_weights: u32,
    pub bone_count: u32,
    pub local_sphere: Vec4,
}

impl MeshPart {
    #[must_use]
    pub fn record(&self) -> MeshPartRecord {
        MeshPartRecord {
            positions: self.positions,
            normals: self.normals,
            uvs: self.uvs,
            indices: self.indices,
            base_index: self.base_index,
            index_count: self.index_count,
            bone_weights: self.bone_weights,
            bone_count: self.bone_count,
            sphere: self.local_sphere.to_array(),
            _pad: [0; 4],
        }
    }
}

/// GPU row of the mesh-part table (64 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshPartRecord {
    pub positions: u32,
    pub normals: u32,
    pub uvs: u32,
    pub indices: u32,
    pub base_index: u32,
    pub index_count: u32,
    pub bone_weights: u32,
    pub bone_count: u32,
    /// `(center.xyz, radius)` in mesh space.
    pub sphere: [f32; 4],
    pub _pad: [u32; 4],
}

// ─── Mesh Registry ────────────────────────────────────────────────────────────

/// Identity → row mapping; append-only, idempotent by GUID.
#[derive(Default)]
pub struct RegistryIndex {
    lookup: FxHashMap<Uuid, u32>,
}

impl RegistryIndex {
    /// Returns the stable row for `guid`, inserting a new one at
    /// `row_count` on first sight. The bool is `true` when inserted.
    pub fn get_or_insert(&mut self, guid: Uuid, row_count: u32) -> (u32, bool) {
        match self.lookup.get(&guid) {
            Some(&id) => (id, false),
            None => {
                self.lookup.insert(guid, row_count);
                (row_count, true)
            }
        }
    }
}

struct RegistryTable {
    records: Vec<MeshPartRecord>,
    index: RegistryIndex,
    /// First row not yet uploaded.
    clean_rows: usize,
}

/// Process-wide table of mesh-part records.
pub struct MeshRegistry {
    table: Mutex<RegistryTable>,
    buffer: wgpu::Buffer,
    gpu_capacity: u32,
    fence: FrameFence,
}

const REGISTRY_INITIAL_CAPACITY: u32 = 256;
const RECORD_SIZE: u64 = std::mem::size_of::<MeshPartRecord>() as u64;

impl MeshRegistry {
    #[must_use]
    pub fn new(device: &wgpu::Device, fence: FrameFence) -> Self {
        Self {
            table: Mutex::new(RegistryTable {
                records: Vec::new(),
                index: RegistryIndex::default(),
                clean_rows: 0,
            }),
            buffer: Self::create(device, REGISTRY_INITIAL_CAPACITY),
            gpu_capacity: REGISTRY_INITIAL_CAPACITY,
            fence,
        }
    }

    fn create(device: &wgpu::Device, rows: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Mesh Registry"),
            size: u64::from(rows) * RECORD_SIZE,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Registers a part and returns its stable `mesh_part_id`.
    /// Idempotent: the same part always maps to the same id.
    pub fn register(&self, part: &MeshPart) -> u32 {
        let mut table = self.table.lock();
        let row_count = table.records.len() as u32;
        let (id, inserted) = table.index.get_or_insert(part.guid, row_count);
        if inserted {
            table.records.push(part.record());
        }
        id
    }

    /// Number of registered parts.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.table.lock().records.len() as u32
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of one record (culling tests, debug).
    #[must_use]
    pub fn record(&self, id: u32) -> Option<MeshPartRecord> {
        self.table.lock().records.get(id as usize).copied()
    }

    /// Uploads rows appended since the last flush; grows by doubling with
    /// deferred disposal of the old table.
    pub fn flush(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        disposal: &mut DeferredDisposal,
    ) {
        let mut table = self.table.lock();
        let rows = table.records.len() as u32;
        if rows == 0 {
            return;
        }

        if rows > self.gpu_capacity {
            let new_capacity = (self.gpu_capacity * 2).max(rows).next_power_of_two();
            log::info!(
                "Growing mesh registry: {} -> {new_capacity} rows",
                self.gpu_capacity
            );
            let new_buffer = Self::create(device, new_capacity);
            let old = std::mem::replace(&mut self.buffer, new_buffer);
            disposal.retire_buffer(old, self.fence.next_value());
            self.gpu_capacity = new_capacity;
            table.clean_rows = 0;
        }

        if table.clean_rows < table.records.len() {
            let new = &table.records[table.clean_rows..];
            queue.write_buffer(
                &self.buffer,
                table.clean_rows as u64 * RECORD_SIZE,
                bytemuck::cast_slice(new),
            );
            table.clean_rows = table.records.len();
        }
    }

    #[must_use]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

// ─── Pool Allocator ───────────────────────────────────────────────────────────

/// First-fit range allocator over element offsets, with coalescing frees.
///
/// Backs the geometry pool; kept free of GPU types so the allocation
/// policy is directly testable.
pub struct PoolAllocator {
    capacity: u32,
    /// Sorted, disjoint, coalesced free ranges.
    free: Vec<std::ops::Range<u32>>,
}

impl PoolAllocator {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            free: vec![0..capacity],
        }
    }

    /// Allocates `count` contiguous elements.
    pub fn allocate(&mut self, count: u32) -> Result<u32> {
        if count == 0 {
            return Ok(0);
        }
        for i in 0..self.free.len() {
            let range = self.free[i].clone();
            if range.end - range.start >= count {
                let offset = range.start;
                if range.end - range.start == count {
                    self.free.remove(i);
                } else {
                    self.free[i].start += count;
                }
                return Ok(offset);
            }
        }
        Err(StrataError::PoolExhausted { requested: count })
    }

    /// Returns a range to the pool, coalescing with neighbors.
    pub fn release(&mut self, offset: u32, count: u32) {
        if count == 0 {
            return;
        }
        let end = offset + count;
        let idx = self
            .free
            .binary_search_by_key(&offset, |r| r.start)
            .unwrap_or_else(|i| i);
        self.free.insert(idx, offset..end);

        // Coalesce with the following range, then the preceding one.
        if idx + 1 < self.free.len() && self.free[idx].end == self.free[idx + 1].start {
            self.free[idx].end = self.free[idx + 1].end;
            self.free.remove(idx + 1);
        }
        if idx > 0 && self.free[idx - 1].end == self.free[idx].start {
            self.free[idx - 1].end = self.free[idx].end;
            self.free.remove(idx);
        }
    }

    /// Total free elements.
    #[must_use]
    pub fn free_total(&self) -> u32 {
        self.free.iter().map(|r| r.end - r.start).sum()
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

// ─── Geometry Pool ────────────────────────────────────────────────────────────

/// Default pool sizes; a part that does not fit is dropped with a log
/// line, per the OOM policy.
pub const DEFAULT_POOL_INDICES: u32 = 4 << 20;
pub const DEFAULT_POOL_VERTICES: u32 = 1 << 20;

struct PoolBuffer {
    buffer: wgpu::Buffer,
    allocator: PoolAllocator,
    /// Quarantined ranges awaiting their retirement fence.
    retired: Vec<(u64, u32, u32)>,
}

impl PoolBuffer {
    fn sweep(&mut self, completed: u64) {
        let mut i = 0;
        while i < self.retired.len() {
            if self.retired[i].0 <= completed {
                let (_, offset, count) = self.retired.swap_remove(i);
                self.allocator.release(offset, count);
            } else {
                i += 1;
            }
        }
    }
}

/// Pooled index + vertex storage for all meshes.
///
/// Element layouts: indices `u32`, positions `3 × f32`, normals
/// `3 × f32`, uvs `2 × f32`. Offsets returned by the `alloc_*` methods are
/// element offsets (not bytes) — the values stored in
/// [`MeshPartRecord`]s.
pub struct GeometryPool {
    indices: PoolBuffer,
    positions: PoolBuffer,
    normals: PoolBuffer,
    uvs: PoolBuffer,
    fence: FrameFence,
}

impl GeometryPool {
    #[must_use]
    pub fn new(device: &wgpu::Device, fence: FrameFence) -> Self {
        Self::with_capacity(device, fence, DEFAULT_POOL_INDICES, DEFAULT_POOL_VERTICES)
    }

    #[must_use]
    pub fn with_capacity(
        device: &wgpu::Device,
        fence: FrameFence,
        index_capacity: u32,
        vertex_capacity: u32,
    ) -> Self {
        let make = |label: &'static str, bytes: u64, extra: wgpu::BufferUsages, cap: u32| {
            PoolBuffer {
                buffer: device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size: bytes,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | extra,
                    mapped_at_creation: false,
                }),
                allocator: PoolAllocator::new(cap),
                retired: Vec::new(),
            }
        };
        Self {
            indices: make(
                "Geometry Pool Indices",
                u64::from(index_capacity) * 4,
                wgpu::BufferUsages::INDEX,
                index_capacity,
            ),
            positions: make(
                "Geometry Pool Positions",
                u64::from(vertex_capacity) * 12,
                wgpu::BufferUsages::empty(),
                vertex_capacity,
            ),
            normals: make(
                "Geometry Pool Normals",
                u64::from(vertex_capacity) * 12,
                wgpu::BufferUsages::empty(),
                vertex_capacity,
            ),
            uvs: make(
                "Geometry Pool UVs",
                u64::from(vertex_capacity) * 8,
                wgpu::BufferUsages::empty(),
                vertex_capacity,
            ),
            fence,
        }
    }

    /// Returns quarantined ranges whose fences completed to the free
    /// lists. Called from the frame-start sweep.
    pub fn sweep(&mut self) {
        let completed = self.fence.completed();
        self.indices.sweep(completed);
        self.positions.sweep(completed);
        self.normals.sweep(completed);
        self.uvs.sweep(completed);
    }

    pub fn alloc_indices(&mut self, queue: &wgpu::Queue, data: &[u32]) -> Result<u32> {
        let offset = self.indices.allocator.allocate(data.len() as u32)?;
        queue.write_buffer(
            &self.indices.buffer,
            u64::from(offset) * 4,
            bytemuck::cast_slice(data),
        );
        Ok(offset)
    }

    /// `data` is tightly packed `[x, y, z]` triplets; returns the vertex
    /// element offset.
    pub fn alloc_positions(&mut self, queue: &wgpu::Queue, data: &[f32]) -> Result<u32> {
        debug_assert_eq!(data.len() % 3, 0);
        let offset = self.positions.allocator.allocate(data.len() as u32 / 3)?;
        queue.write_buffer(
            &self.positions.buffer,
            u64::from(offset) * 12,
            bytemuck::cast_slice(data),
        );
        Ok(offset)
    }

    pub fn alloc_normals(&mut self, queue: &wgpu::Queue, data: &[f32]) -> Result<u32> {
        debug_assert_eq!(data.len() % 3, 0);
        let offset = self.normals.allocator.allocate(data.len() as u32 / 3)?;
        queue.write_buffer(
            &self.normals.buffer,
            u64::from(offset) * 12,
            bytemuck::cast_slice(data),
        );
        Ok(offset)
    }

    pub fn alloc_uvs(&mut self, queue: &wgpu::Queue, data: &[f32]) -> Result<u32> {
        debug_assert_eq!(data.len() % 2, 0);
        let offset = self.uvs.allocator.allocate(data.len() as u32 / 2)?;
        queue.write_buffer(
            &self.uvs.buffer,
            u64::from(offset) * 8,
            bytemuck::cast_slice(data),
        );
        Ok(offset)
    }

    /// Quarantines a part's ranges until the in-flight window drains.
    pub fn release_part(&mut self, part: &MeshPart, vertex_count: u32) {
        let retire = self.fence.next_value() + crate::gpu::FRAME_COUNT as u64;
        self.indices
            .retired
            .push((retire, part.indices, part.index_count));
        self.positions
            .retired
            .push((retire, part.positions, vertex_count));
        self.normals
            .retired
            .push((retire, part.normals, vertex_count));
        self.uvs.retired.push((retire, part.uvs, vertex_count));
    }

    /// The pooled index buffer (bound as the index buffer of every
    /// indexed indirect draw).
    #[must_use]
    pub fn index_buffer(&self) -> &wgpu::Buffer {
        &self.indices.buffer
    }

    #[must_use]
    pub fn position_buffer(&self) -> &wgpu::Buffer {
        &self.positions.buffer
    }

    #[must_use]
    pub fn normal_buffer(&self) -> &wgpu::Buffer {
        &self.normals.buffer
    }

    #[must_use]
    pub fn uv_buffer(&self) -> &wgpu::Buffer {
        &self.uvs.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_64_bytes() {
        assert_eq!(std::mem::size_of::<MeshPartRecord>(), 64);
    }

    #[test]
    fn registration_is_idempotent_by_identity() {
        let mut index = RegistryIndex::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let mut rows = 0u32;
        let (id_a, inserted) = index.get_or_insert(a, rows);
        assert!(inserted);
        rows += 1;
        let (id_b, inserted) = index.get_or_insert(b, rows);
        assert!(inserted);
        rows += 1;

        // Re-registering never grows the table and returns the same ids.
        for _ in 0..10 {
            let (id, inserted) = index.get_or_insert(a, rows);
            assert_eq!((id, inserted), (id_a, false));
            let (id, inserted) = index.get_or_insert(b, rows);
            assert_eq!((id, inserted), (id_b, false));
        }
        assert_ne!(id_a, id_b);
    }

    #[test]
    fn pool_first_fit_and_coalesce() {
        let mut pool = PoolAllocator::new(100);
        let a = pool.allocate(10).unwrap();
        let b = pool.allocate(20).unwrap();
        let c = pool.allocate(30).unwrap();
        assert_eq!((a, b, c), (0, 10, 30));

        pool.release(b, 20);
        // First fit reuses the hole.
        let d = pool.allocate(15).unwrap();
        assert_eq!(d, 10);

        pool.release(a, 10);
        pool.release(d, 15);
        pool.release(c, 30);
        // Everything coalesced back into one range.
        assert_eq!(pool.free_total(), 100);
        assert_eq!(pool.allocate(100).unwrap(), 0);
    }

    #[test]
    fn pool_exhaustion_is_an_error() {
        let mut pool = PoolAllocator::new(8);
        pool.allocate(8).unwrap();
        assert!(matches!(
            pool.allocate(1),
            Err(StrataError::PoolExhausted { requested: 1 })
        ));
    }

    #[test]
    fn fragmented_pool_rejects_large_contiguous() {
        let mut pool = PoolAllocator::new(30);
        let a = pool.allocate(10).unwrap();
        let _b = pool.allocate(10).unwrap();
        let c = pool.allocate(10).unwrap();
        pool.release(a, 10);
        pool.release(c, 10);
        // 20 elements free, but not contiguous.
        assert_eq!(pool.free_total(), 20);
        assert!(pool.allocate(20).is_err());
        assert_eq!(pool.allocate(10).unwrap(), 0);
    }
}
