//! GPU Core
//!
//! This module wraps the graphics API and owns the process-wide GPU
//! machinery every other renderer component builds on:
//!
//! - [`GpuContext`]: device, queue, surface — creation and resize
//! - [`FrameFence`]: monotone submission fence; every upload and frame
//!   submit signals it, and all deferred lifetimes compare against its
//!   completed value
//! - [`DeferredDisposal`]: retirement queue for GPU memory that may still
//!   be referenced by in-flight frames
//! - [`GrowableBuffer`]: per-frame-ring staging/output buffers with
//!   doubling growth and deferred disposal of the old allocation
//! - [`BindlessTextures`]: the global texture table (`binding_array`),
//!   handing out stable 32-bit view indices
//! - [`DrawConstants`] / [`ConstantRing`]: the 32-dword draw-constant
//!   block, ring-allocated with dynamic offsets
//!
//! # Frame ring
//!
//! Transient per-frame resources exist in `FRAME_COUNT` copies selected by
//! the frame index (advanced on present). A copy is safe to overwrite once
//! the fence signaled for its last use has completed.

pub mod bindless;
pub mod constants;
pub mod context;
pub mod disposal;
pub mod fence;
pub mod staging;

pub use bindless::{BindlessTextures, IndexAllocator};
pub use constants::{ConstantRing, DrawConstants};
pub use context::GpuContext;
pub use disposal::DeferredDisposal;
pub use fence::FrameFence;
pub use staging::GrowableBuffer;

/// Number of frames in flight; sizes every per-frame resource ring and
/// every deferred-retirement window.
pub const FRAME_COUNT: usize = 3;
