//! Transform Buffer
//!
//! A process-wide structured buffer of row-major world matrices, indexed
//! by a persistent *transform slot*. Owners write on change; once per
//! frame the renderer uploads the dirty rows, merging contiguous dirty
//! spans into single copies.
//!
//! # Thread safety
//!
//! `allocate_slot` / `set` / `free` are thread-safe (internal lock);
//! [`TransformBuffer::flush`] is main-thread only, like all device-level
//! mutation.
//!
//! # Slot lifecycle
//!
//! A freed slot is quarantined until its retirement fence completes, so a
//! new owner can never observe the previous owner's matrix: reallocation
//! resets the row to identity and marks it dirty.

use glam::Mat4;
use parking_lot::Mutex;

use crate::gpu::bindless::IndexAllocator;
use crate::gpu::{DeferredDisposal, FrameFence};

const INITIAL_CAPACITY: u32 = 1024;
const ROW_SIZE: u64 = std::mem::size_of::<Mat4>() as u64;

struct Table {
    rows: Vec<Mat4>,
    /// One bit per row.
    dirty: Vec<u64>,
    allocator: IndexAllocator,
}

impl Table {
    fn mark_dirty(&mut self, slot: u32) {
        let word = slot as usize / 64;
        if word >= self.dirty.len() {
            self.dirty.resize(word + 1, 0);
        }
        self.dirty[word] |= 1 << (slot % 64);
    }
}

/// The global world-matrix table.
pub struct TransformBuffer {
    table: Mutex<Table>,
    buffer: wgpu::Buffer,
    gpu_capacity: u32,
    fence: FrameFence,
}

impl TransformBuffer {
    #[must_use]
    pub fn new(device: &wgpu::Device, fence: FrameFence, max_slots: u32) -> Self {
        let buffer = Self::create(device, INITIAL_CAPACITY);
        Self {
            table: Mutex::new(Table {
                rows: Vec::new(),
                dirty: Vec::new(),
                allocator: IndexAllocator::new(max_slots),
            }),
            buffer,
            gpu_capacity: INITIAL_CAPACITY,
            fence,
        }
    }

    fn create(device: &wgpu::Device, rows: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Transform Buffer"),
            size: u64::from(rows) * ROW_SIZE,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Allocates a slot for a renderable. Returns `None` when the table is
    /// at its configured maximum (caller logs and drops the renderable).
    pub fn allocate_slot(&self) -> Option<u32> {
        let mut table = self.table.lock();
        let slot = table.allocator.allocate(self.fence.completed())?;
        let idx = slot as usize;
        if idx >= table.rows.len() {
            table.rows.resize(idx + 1, Mat4::IDENTITY);
        }
        // A recycled slot must not leak the previous owner's matrix.
        table.rows[idx] = Mat4::IDENTITY;
        table.mark_dirty(slot);
        Some(slot)
    }

    /// Writes a slot's world matrix and marks it dirty. Out-of-range slots
    /// are ignored.
    pub fn set(&self, slot: u32, matrix: Mat4) {
        let mut table = self.table.lock();
        if (slot as usize) < table.rows.len() {
            table.rows[slot as usize] = matrix;
            table.mark_dirty(slot);
        }
    }

    /// Frees a slot; the index is quarantined for the in-flight window.
    /// Out-of-range frees are ignored.
    pub fn free(&self, slot: u32) {
        let mut table = self.table.lock();
        let retire = self.fence.next_value() + crate::gpu::FRAME_COUNT as u64;
        table.allocator.free(slot, retire);
    }

    /// Uploads all dirty rows, merging contiguous spans. Grows the GPU
    /// buffer by doubling (old memory deferred-disposed, full re-upload).
    pub fn flush(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        disposal: &mut DeferredDisposal,
    ) {
        let mut table = self.table.lock();
        let row_count = table.rows.len() as u32;

        if row_count > self.gpu_capacity {
            let new_capacity = (self.gpu_capacity * 2).max(row_count).next_power_of_two();
            log::info!(
                "Growing transform buffer: {} -> {new_capacity} slots",
                self.gpu_capacity
            );
            let new_buffer = Self::create(device, new_capacity);
            let old = std::mem::replace(&mut self.buffer, new_buffer);
            disposal.retire_buffer(old, self.fence.next_value());
            self.gpu_capacity = new_capacity;
            // Everything must land in the fresh allocation.
            queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&table.rows));
            table.dirty.fill(0);
            return;
        }

        let spans = dirty_spans(&table.dirty, table.rows.len());
        for span in spans {
            let bytes = bytemuck::cast_slice(&table.rows[span.clone()]);
            queue.write_buffer(&self.buffer, span.start as u64 * ROW_SIZE, bytes);
        }
        table.dirty.fill(0);
    }

    /// The GPU-side table, for bind group assembly.
    #[must_use]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Current row count (slots ever allocated).
    #[must_use]
    pub fn len(&self) -> u32 {
        self.table.lock().rows.len() as u32
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of one row, for tests and debug readouts.
    #[must_use]
    pub fn row(&self, slot: u32) -> Option<Mat4> {
        self.table.lock().rows.get(slot as usize).copied()
    }
}

/// Scans the dirty bitset and merges contiguous dirty rows into spans.
#[must_use]
pub fn dirty_spans(bits: &[u64], row_count: usize) -> Vec<std::ops::Range<usize>> {
    let mut spans = Vec::new();
    let mut current: Option<std::ops::Range<usize>> = None;

    for row in 0..row_count {
        let word = bits.get(row / 64).copied().unwrap_or(0);
        let is_dirty = word & (1 << (row % 64)) != 0;
        match (&mut current, is_dirty) {
            (Some(span), true) => span.end = row + 1,
            (None, true) => current = Some(row..row + 1),
            (Some(_), false) => {
                if let Some(span) = current.take() {
                    spans.push(span);
                }
            }
            (None, false) => {}
        }
    }
    if let Some(span) = current {
        spans.push(span);
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits_of(rows: &[usize]) -> Vec<u64> {
        let max = rows.iter().copied().max().unwrap_or(0);
        let mut bits = vec![0u64; max / 64 + 1];
        for &r in rows {
            bits[r / 64] |= 1 << (r % 64);
        }
        bits
    }

    #[test]
    fn merges_contiguous_rows() {
        let bits = bits_of(&[0, 1, 2, 5, 6, 9]);
        let spans = dirty_spans(&bits, 16);
        assert_eq!(spans, vec![0..3, 5..7, 9..10]);
    }

    #[test]
    fn empty_bitset_yields_no_spans() {
        assert!(dirty_spans(&[], 0).is_empty());
        assert!(dirty_spans(&[0, 0], 100).is_empty());
    }

    #[test]
    fn span_crossing_word_boundary() {
        let bits = bits_of(&[62, 63, 64, 65]);
        let spans = dirty_spans(&bits, 128);
        assert_eq!(spans, vec![62..66]);
    }

    #[test]
    fn all_dirty_is_one_span() {
        let bits = vec![u64::MAX];
        assert_eq!(dirty_spans(&bits, 64), vec![0..64]);
    }
}
