#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! # Strata
//!
//! A GPU-driven deferred rendering core on wgpu: per-entity submissions
//! batched into indirect draws, culled and stream-compacted entirely on
//! the GPU, with a self-driving quadtree terrain, cascaded shadow maps,
//! Hi-Z occlusion and asynchronous asset streaming gated by fence
//! values.
//!
//! The crate deliberately ends at the rendering contract: scene graphs,
//! ECS lifecycles, importer zoos, physics and audio are callers.

pub mod camera;
pub mod errors;
pub mod gpu;
pub mod renderer;
pub mod resources;
pub mod streaming;
pub mod utils;

pub use camera::{Camera, Frustum, RenderCamera};
pub use errors::{Result, StrataError};
pub use gpu::{FRAME_COUNT, GpuContext};
pub use renderer::batch::{CommandBuffer, CustomData, CustomLayout, Pass};
pub use renderer::settings::RenderSettings;
pub use renderer::terrain::TerrainDesc;
pub use renderer::{DeferredRenderer, FrameStats, PointLight, PointLightId};
pub use resources::{Effect, Material, MeshPart, PassMask, TransformBuffer};
pub use streaming::{Asset, ColorSpace, GpuMesh, GpuTexture, LoadedAsset, StreamingManager};
pub use utils::FpsCounter;
