//! Process-Wide GPU Tables
//!
//! The tables every shader stage reads through stable 32-bit ids:
//!
//! - [`TransformBuffer`]: world matrices indexed by transform slot
//! - [`MeshRegistry`] + [`GeometryPool`]: mesh-part records and the pooled
//!   index/vertex storage they point into
//! - [`MaterialRegistry`]: material rows (params + bindless texture
//!   indices) keyed by `material_id`
//!
//! All three share the lifecycle rules of the frame ring: ids are never
//! reused while a frame that might read them is in flight, and GPU-side
//! growth retires the old allocation through deferred disposal.

pub mod materials;
pub mod mesh;
pub mod primitives;
pub mod transforms;

pub use materials::{Effect, EffectId, Material, MaterialRegistry, PassMask};
pub use mesh::{GeometryPool, MeshPart, MeshPartRecord, MeshRegistry, PoolAllocator};
pub use transforms::TransformBuffer;
