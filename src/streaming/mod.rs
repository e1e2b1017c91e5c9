//! Asset Streaming
//!
//! The streaming contract in three steps:
//!
//! 1. **Parse off-thread.** `load_mesh` / `load_texture` return an
//!    [`Asset`] handle immediately and hand the CPU-side import (file IO,
//!    decode, bounding sphere) to the tokio runtime.
//! 2. **Create on-thread.** The parsed result is marshaled back through a
//!    `flume` MPSC of boxed work items; [`StreamingManager::drain`] runs
//!    them on the main thread with a 4 ms wall-clock budget per frame.
//!    Only these work items touch the device (buffer/texture creation,
//!    view creation, uploads).
//! 3. **Gate by fence.** Each drained item stamps its asset with the
//!    fence value the frame's submit will signal;
//!    [`Asset::is_ready`]`(completed)` is `ready_fence <= completed`.
//!    Draw submission refuses non-ready assets (silent drop; the draw
//!    appears when the asset becomes ready).
//!
//! A failed import stamps the asset ready-but-empty and logs a warning, so
//! it is never retried in a tight loop; the scene load continues.

pub mod import;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::errors::{Result, StrataError};
use crate::gpu::{BindlessTextures, FrameFence};
use crate::resources::{GeometryPool, MeshPart, MeshRegistry};

/// Wall-clock budget for one frame's drain; remaining items wait for the
/// next frame to preserve pacing.
pub const DRAIN_BUDGET: Duration = Duration::from_millis(4);

// ─── Asset handle ─────────────────────────────────────────────────────────────

enum AssetState<T> {
    Loading,
    /// Uploaded; usable once `ready_fence` completes.
    Ready { value: T, ready_fence: u64 },
    /// Import failed: permanently "ready" with no payload so callers stop
    /// waiting and nothing retries it.
    Failed,
}

struct AssetShared<T> {
    guid: Uuid,
    path: PathBuf,
    state: Mutex<AssetState<T>>,
}

/// Shared handle to a streaming asset. Clone freely; all clones observe
/// the same state.
pub struct Asset<T> {
    shared: Arc<AssetShared<T>>,
}

impl<T> Clone for Asset<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Asset<T> {
    fn loading(path: PathBuf) -> Self {
        Self {
            shared: Arc::new(AssetShared {
                guid: Uuid::new_v4(),
                path,
                state: Mutex::new(AssetState::Loading),
            }),
        }
    }

    /// 128-bit asset identity.
    #[must_use]
    pub fn guid(&self) -> Uuid {
        self.shared.guid
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    fn resolve(&self, value: T, ready_fence: u64) {
        *self.shared.state.lock() = AssetState::Ready { value, ready_fence };
    }

    fn fail(&self) {
        *self.shared.state.lock() = AssetState::Failed;
    }

    /// True once the upload fence has completed — or the import failed
    /// (ready-but-empty).
    #[must_use]
    pub fn is_ready(&self, completed_fence: u64) -> bool {
        match &*self.shared.state.lock() {
            AssetState::Loading => false,
            AssetState::Ready { ready_fence, .. } => *ready_fence <= completed_fence,
            AssetState::Failed => true,
        }
    }

    /// The payload, if ready and non-empty.
    #[must_use]
    pub fn get(&self, completed_fence: u64) -> Option<T>
    where
        T: Clone,
    {
        match &*self.shared.state.lock() {
            AssetState::Ready { value, ready_fence } if *ready_fence <= completed_fence => {
                Some(value.clone())
            }
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn test_resolve(&self, value: T, ready_fence: u64) {
        self.resolve(value, ready_fence);
    }

    #[cfg(test)]
    pub(crate) fn test_fail(&self) {
        self.fail();
    }

    #[cfg(test)]
    pub(crate) fn test_loading(path: PathBuf) -> Self {
        Self::loading(path)
    }
}

/// A streamed mesh: one registered part id per sub-mesh, plus the whole
/// mesh's bounding sphere.
#[derive(Debug, Clone)]
pub struct GpuMesh {
    pub parts: Vec<u32>,
    pub bounding_sphere: glam::Vec4,
}

/// A streamed texture: its slot in the bindless table.
#[derive(Debug, Clone, Copy)]
pub struct GpuTexture {
    pub bindless_index: u32,
    pub width: u32,
    pub height: u32,
}

/// Result of an extension-dispatched [`StreamingManager::load_async`].
pub enum LoadedAsset {
    Mesh(Asset<GpuMesh>),
    Texture(Asset<GpuTexture>),
}

/// Color-space interpretation of decoded texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Srgb,
    Linear,
}

// ─── Cancellation ─────────────────────────────────────────────────────────────

/// Cooperative cancellation for scene streaming; checked between file
/// parses. Partially uploaded assets remain valid.
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// ─── Main-thread bridge ───────────────────────────────────────────────────────

/// Mutable view of the GPU-side tables a drained work item may touch.
/// Constructed by the renderer for each drain; this is the only path on
/// which streamed data reaches the device.
pub struct GpuBridge<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub bindless: &'a mut BindlessTextures,
    pub geometry: &'a mut GeometryPool,
    pub mesh_registry: &'a MeshRegistry,
    /// Fence value the frame's submit will signal; drained items stamp
    /// their assets with it.
    pub pending_fence: u64,
    pub completed_fence: u64,
}

type WorkItem = Box<dyn FnOnce(&mut GpuBridge<'_>) + Send>;

// ─── Manager ──────────────────────────────────────────────────────────────────

/// Owns the import runtime and the main-thread work queue.
pub struct StreamingManager {
    runtime: tokio::runtime::Runtime,
    work_tx: flume::Sender<WorkItem>,
    work_rx: flume::Receiver<WorkItem>,
    cancel: CancellationToken,
    fence: FrameFence,
}

impl StreamingManager {
    pub fn new(fence: FrameFence) -> Result<Self> {
        // File IO runs on the blocking pool; no reactor drivers needed.
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(std::thread::available_parallelism().map_or(2, usize::from))
            .thread_name("strata-import")
            .build()?;
        let (work_tx, work_rx) = flume::unbounded();
        Ok(Self {
            runtime,
            work_tx,
            work_rx,
            cancel: CancellationToken::new(),
            fence,
        })
    }

    /// Token shared by all in-flight loads of this manager.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Begins an async mesh load; the returned handle resolves after a
    /// future drain's frame submit completes.
    pub fn load_mesh(&self, path: impl Into<PathBuf>) -> Asset<GpuMesh> {
        let path = path.into();
        let asset = Asset::loading(path.clone());
        let handle = asset.clone();
        let tx = self.work_tx.clone();
        let cancel = self.cancel.clone();

        self.runtime.spawn(async move {
            if cancel.is_cancelled() {
                handle.fail();
                return;
            }
            match import::import_mesh(&path).await {
                Ok(cpu_mesh) => {
                    let item: WorkItem = Box::new(move |bridge| {
                        match import::upload_mesh(bridge, &cpu_mesh) {
                            Ok(mesh) => handle.resolve(mesh, bridge.pending_fence),
                            Err(e) => {
                                log::warn!("Mesh upload failed for {}: {e}", path.display());
                                handle.fail();
                            }
                        }
                    });
                    let _ = tx.send(item);
                }
                Err(e) => {
                    log::warn!("Mesh import failed for {}: {e}", path.display());
                    handle.fail();
                }
            }
        });
        asset
    }

    /// Extension-dispatched load: meshes and textures share one entry
    /// point. Textures default to sRGB (color maps).
    pub fn load_async(&self, path: impl Into<PathBuf>) -> Result<LoadedAsset> {
        let path = path.into();
        match importer_for(&path)? {
            import::ImporterKind::WavefrontMesh => Ok(LoadedAsset::Mesh(self.load_mesh(path))),
            import::ImporterKind::Image => {
                Ok(LoadedAsset::Texture(self.load_texture(path, ColorSpace::Srgb)))
            }
        }
    }

    /// Begins an async texture load (decode + CPU mip chain off-thread;
    /// texture/view creation and bindless insert on drain).
    pub fn load_texture(
        &self,
        path: impl Into<PathBuf>,
        color_space: ColorSpace,
    ) -> Asset<GpuTexture> {
        let path = path.into();
        let asset = Asset::loading(path.clone());
        let handle = asset.clone();
        let tx = self.work_tx.clone();
        let cancel = self.cancel.clone();

        self.runtime.spawn(async move {
            if cancel.is_cancelled() {
                handle.fail();
                return;
            }
            match import::import_texture(&path, color_space).await {
                Ok(cpu_texture) => {
                    let item: WorkItem = Box::new(move |bridge| {
                        match import::upload_texture(bridge, &cpu_texture) {
                            Ok(texture) => handle.resolve(texture, bridge.pending_fence),
                            Err(e) => {
                                log::warn!("Texture upload failed for {}: {e}", path.display());
                                handle.fail();
                            }
                        }
                    });
                    let _ = tx.send(item);
                }
                Err(e) => {
                    log::warn!("Texture import failed for {}: {e}", path.display());
                    handle.fail();
                }
            }
        });
        asset
    }

    /// Runs queued GPU-creation items on the main thread until the queue
    /// empties or the budget is spent. Returns the number of items run.
    pub fn drain(&self, bridge: &mut GpuBridge<'_>) -> usize {
        drain_with_budget(&self.work_rx, DRAIN_BUDGET, |item| item(&mut *bridge))
    }

    /// Items waiting for a future drain.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.work_rx.len()
    }

    #[must_use]
    pub fn fence(&self) -> &FrameFence {
        &self.fence
    }
}

/// Budgeted queue drain: always makes progress (at least one item if any
/// is queued), stops once `budget` wall time has elapsed.
pub fn drain_with_budget<T>(
    rx: &flume::Receiver<T>,
    budget: Duration,
    mut apply: impl FnMut(T),
) -> usize {
    let start = Instant::now();
    let mut ran = 0;
    while let Ok(item) = rx.try_recv() {
        apply(item);
        ran += 1;
        if start.elapsed() >= budget {
            break;
        }
    }
    ran
}

/// Resolves the importer for a path by extension; the registry is
/// compile-time explicit rather than reflection-driven.
pub fn importer_for(path: &Path) -> Result<import::ImporterKind> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "obj" => Ok(import::ImporterKind::WavefrontMesh),
        "png" | "jpg" | "jpeg" | "hdr" => Ok(import::ImporterKind::Image),
        _ => Err(StrataError::MissingImporter(path.display().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_gates_on_fence() {
        let asset: Asset<u32> = Asset::test_loading(PathBuf::from("a.obj"));
        assert!(!asset.is_ready(100));
        asset.test_resolve(7, 5);
        assert!(!asset.is_ready(4));
        assert!(asset.is_ready(5));
        assert_eq!(asset.get(5), Some(7));
        assert_eq!(asset.get(4), None);
    }

    #[test]
    fn failed_asset_is_ready_but_empty() {
        let asset: Asset<u32> = Asset::test_loading(PathBuf::from("missing.obj"));
        asset.test_fail();
        assert!(asset.is_ready(0));
        assert_eq!(asset.get(u64::MAX), None);
    }

    #[test]
    fn drain_budget_always_makes_progress() {
        let (tx, rx) = flume::unbounded();
        for i in 0..10 {
            tx.send(i).unwrap();
        }
        let mut seen = Vec::new();
        // Zero budget still runs one item.
        let ran = drain_with_budget(&rx, Duration::ZERO, |i| seen.push(i));
        assert_eq!(ran, 1);
        assert_eq!(seen, vec![0]);
        // A generous budget drains the rest.
        let ran = drain_with_budget(&rx, Duration::from_secs(1), |i| seen.push(i));
        assert_eq!(ran, 9);
    }

    #[test]
    fn importer_registry_dispatches_by_extension() {
        assert!(matches!(
            importer_for(Path::new("tree.obj")),
            Ok(import::ImporterKind::WavefrontMesh)
        ));
        assert!(matches!(
            importer_for(Path::new("bark.PNG")),
            Ok(import::ImporterKind::Image)
        ));
        assert!(importer_for(Path::new("scene.fbx")).is_err());
    }

    #[test]
    fn cancellation_is_sticky() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.clone().is_cancelled());
    }
}
