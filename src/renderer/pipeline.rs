//! Shader Manager and Pipeline Cache
//!
//! WGSL sources are embedded with `include_str!` and compiled once per
//! process; modules are cached by the xxh3 hash of their source so hot
//! paths never re-enter the compiler.
//!
//! Pipelines go through [`PipelineCache`]: a single-level lookup keyed
//! by the hash of a caller-supplied state key (shader hash plus the
//! state that varies — polygon mode, target format, entry point).
//! Passes resolve their pipelines through the cache at encode time and
//! the compute components at build time; the first lookup builds, every
//! later one is a map hit.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};
use xxhash_rust::xxh3::xxh3_64;

fn fx_hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

// ─── Shader modules ───────────────────────────────────────────────────────────

/// Compiles and caches WGSL modules by source hash.
#[derive(Default)]
pub struct ShaderManager {
    modules: FxHashMap<u64, wgpu::ShaderModule>,
}

impl ShaderManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled module for `source` plus its stable hash.
    ///
    /// Compilation failure at startup is fatal by contract: wgpu reports
    /// invalid WGSL through the device error machinery and the renderer
    /// constructor propagates it as a startup error.
    pub fn get_or_compile(
        &mut self,
        device: &wgpu::Device,
        label: &str,
        source: &str,
    ) -> (wgpu::ShaderModule, u64) {
        let hash = xxh3_64(source.as_bytes());
        if let Some(module) = self.modules.get(&hash) {
            return (module.clone(), hash);
        }
        log::debug!("Compiling shader '{label}' ({hash:016x})");
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(source)),
        });
        self.modules.insert(hash, module.clone());
        (module, hash)
    }

    /// Number of compiled modules (debug stats).
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

// ─── Pipelines ────────────────────────────────────────────────────────────────

/// Single-level pipeline cache.
///
/// Keys are arbitrary `Hash` values; a tagged tuple like
/// `("gbuffer", shader_hash, wireframe)` is the usual shape. The key
/// must cover every input that changes the pipeline — shader hash,
/// entry point, target formats, polygon mode — so a hit is always safe
/// to reuse.
#[derive(Default)]
pub struct PipelineCache {
    render_lookup: FxHashMap<u64, wgpu::RenderPipeline>,
    compute_lookup: FxHashMap<u64, wgpu::ComputePipeline>,
}

impl PipelineCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a render pipeline by state key, building it on first
    /// use.
    pub fn get_or_create_render<K: Hash>(
        &mut self,
        key: &K,
        label: &str,
        build: impl FnOnce() -> wgpu::RenderPipeline,
    ) -> wgpu::RenderPipeline {
        let hash = fx_hash_key(key);
        if let Some(pipeline) = self.render_lookup.get(&hash) {
            return pipeline.clone();
        }
        log::debug!("Building render pipeline '{label}' ({hash:016x})");
        let pipeline = build();
        self.render_lookup.insert(hash, pipeline.clone());
        pipeline
    }

    /// Looks up a compute pipeline by state key, building it on first
    /// use.
    pub fn get_or_create_compute<K: Hash>(
        &mut self,
        key: &K,
        label: &str,
        build: impl FnOnce() -> wgpu::ComputePipeline,
    ) -> wgpu::ComputePipeline {
        let hash = fx_hash_key(key);
        if let Some(pipeline) = self.compute_lookup.get(&hash) {
            return pipeline.clone();
        }
        log::debug!("Building compute pipeline '{label}' ({hash:016x})");
        let pipeline = build();
        self.compute_lookup.insert(hash, pipeline.clone());
        pipeline
    }

    // ── Stats ──────────────────────────────────────────────────────────

    /// Number of cached render pipelines.
    #[must_use]
    pub fn render_count(&self) -> usize {
        self.render_lookup.len()
    }

    /// Number of cached compute pipelines.
    #[must_use]
    pub fn compute_count(&self) -> usize {
        self.compute_lookup.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_keys_hash_deterministically() {
        let a = fx_hash_key(&("gbuffer", 0xDEAD_BEEFu64, false));
        let b = fx_hash_key(&("gbuffer", 0xDEAD_BEEFu64, false));
        assert_eq!(a, b);
    }

    #[test]
    fn state_keys_separate_variants() {
        let fill = fx_hash_key(&("gbuffer", 0xDEAD_BEEFu64, false));
        let wire = fx_hash_key(&("gbuffer", 0xDEAD_BEEFu64, true));
        let other_pass = fx_hash_key(&("shadow_depth", 0xDEAD_BEEFu64, false));
        assert_ne!(fill, wire);
        assert_ne!(fill, other_pass);
    }
}
