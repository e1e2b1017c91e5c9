//! Frame Fence
//!
//! wgpu has no user-visible fence object; completion is observed through
//! [`wgpu::Queue::on_submitted_work_done`]. [`FrameFence`] turns that into
//! the monotone fence-value model the rest of the renderer is written
//! against:
//!
//! - [`FrameFence::signal`] is called immediately after a `queue.submit`
//!   and returns the fence value that submission will complete.
//! - [`FrameFence::completed`] is the highest value whose work the GPU has
//!   finished.
//!
//! Deferred disposal, bindless index retirement, transform-slot quarantine
//! and asset readiness all compare their stamped value against
//! `completed()`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotone submission fence shared across the renderer.
///
/// Cloning is cheap; all clones observe the same counter. Thread-safe.
#[derive(Clone)]
pub struct FrameFence {
    next: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
}

impl Default for FrameFence {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameFence {
    #[must_use]
    pub fn new() -> Self {
        Self {
            // Value 0 is "already complete": assets stamped 0 are ready
            // before any submission.
            next: Arc::new(AtomicU64::new(1)),
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registers completion of all work submitted so far and returns the
    /// fence value it will signal. Call directly after `queue.submit`.
    pub fn signal(&self, queue: &wgpu::Queue) -> u64 {
        let value = self.next.fetch_add(1, Ordering::AcqRel);
        let completed = Arc::clone(&self.completed);
        queue.on_submitted_work_done(move || {
            completed.fetch_max(value, Ordering::AcqRel);
        });
        value
    }

    /// Highest fence value the GPU has completed.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// The value the next [`signal`](Self::signal) will return.
    #[must_use]
    pub fn next_value(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// Blocks until `value` completes. Used by the frame pacer to keep at
    /// most one frame queued behind the one being recorded.
    pub fn wait_for(&self, device: &wgpu::Device, value: u64) {
        while self.completed() < value {
            // Polling drives the completion callbacks on native.
            let _ = device.poll(wgpu::PollType::Wait);
        }
    }

    /// Test-only: force the completed value forward without a GPU.
    #[cfg(test)]
    pub(crate) fn force_complete(&self, value: u64) {
        self.completed.fetch_max(value, Ordering::AcqRel);
        self.next.fetch_max(value + 1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_zero_complete() {
        let fence = FrameFence::new();
        assert_eq!(fence.completed(), 0);
        assert_eq!(fence.next_value(), 1);
    }

    #[test]
    fn force_complete_is_monotone() {
        let fence = FrameFence::new();
        fence.force_complete(5);
        fence.force_complete(3);
        assert_eq!(fence.completed(), 5);
    }
}
