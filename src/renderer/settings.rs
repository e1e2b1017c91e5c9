//! Render Settings Configuration
//!
//! Configuration for the rendering core. Quality fields round-trip
//! through serde (project config files); device-selection fields carry
//! wgpu types and fall back to defaults on deserialize.
//!
//! # Debug keys
//!
//! The debug toggles documented in the external contract map to plain
//! fields here: `vsync`, `wireframe`, `freeze_culling`, `sdsm`,
//! `debug_mode`, `hiz_enabled`. Callers flip them between frames.

use serde::{Deserialize, Serialize};

/// Debug visualization modes, cycled via a single value (dword 16 of the
/// draw constants).
pub const DEBUG_MODE_COUNT: u32 = 5;

/// Configuration options for the rendering system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Enable vertical synchronization.
    pub vsync: bool,

    /// Background clear color (linear RGBA).
    pub clear_color: [f32; 4],

    /// Hemisphere ambient intensity applied at composition.
    pub ambient_scale: f32,

    // ── Shadows ────────────────────────────────────────────────────────
    /// Shadow map resolution per cascade.
    pub shadow_map_size: u32,

    /// Number of cascades (clamped to 4).
    pub cascade_count: u32,

    /// PSSM split blend: 0 = uniform, 1 = logarithmic.
    pub cascade_lambda: f32,

    /// Shadowed range end in view space.
    pub shadow_far: f32,

    /// Tighten `shadow_far` from the reduced depth bounds of the previous
    /// frame (SDSM).
    pub sdsm: bool,

    // ── Culling ────────────────────────────────────────────────────────
    /// Hi-Z occlusion culling (frustum culling always runs).
    pub hiz_enabled: bool,

    /// Freeze the culling frustum at its current value (debug).
    pub freeze_culling: bool,

    /// Deterministic single-threaded scatter: visible instances stay in
    /// submission order within each sub-batch (debug tools, replay).
    pub stable_scatter: bool,

    // ── Terrain ────────────────────────────────────────────────────────
    /// Screen-space error threshold in pixels for quadtree splitting.
    pub terrain_pixel_error: f32,

    /// Maximum quadtree depth.
    pub terrain_max_depth: u32,

    // ── Sky ────────────────────────────────────────────────────────────
    /// Procedural skybox pass; when off, sky pixels compose to the clear
    /// color.
    pub skybox_enabled: bool,

    // ── Debug ──────────────────────────────────────────────────────────
    /// 0 = off, 1 = cascade viz, 2 = raw shadow factor, 3 = depth,
    /// 4 = x-ray occlusion.
    pub debug_mode: u32,

    pub wireframe: bool,

    // ── Device selection (not serialized) ──────────────────────────────
    #[serde(skip, default = "default_power_preference")]
    pub power_preference: wgpu::PowerPreference,

    #[serde(skip, default = "wgpu::Features::empty")]
    pub extra_features: wgpu::Features,

    #[serde(skip, default = "wgpu::Limits::default")]
    pub required_limits: wgpu::Limits,

    /// Bindless texture table capacity; must fit device limits.
    pub bindless_capacity: u32,

    /// Maximum transform slots.
    pub max_transforms: u32,
}

fn default_power_preference() -> wgpu::PowerPreference {
    wgpu::PowerPreference::HighPerformance
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            vsync: true,
            clear_color: [0.015, 0.02, 0.035, 1.0],
            ambient_scale: 0.25,

            shadow_map_size: 2048,
            cascade_count: 4,
            cascade_lambda: 0.75,
            shadow_far: 400.0,
            sdsm: false,

            hiz_enabled: true,
            freeze_culling: false,
            stable_scatter: false,

            terrain_pixel_error: 2.0,
            terrain_max_depth: 8,

            skybox_enabled: false,
            debug_mode: 0,
            wireframe: false,

            power_preference: default_power_preference(),
            extra_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),

            bindless_capacity: 1024,
            max_transforms: 1 << 20,
        }
    }
}

impl RenderSettings {
    /// Advances the debug visualization mode (wraps at
    /// [`DEBUG_MODE_COUNT`]).
    pub fn cycle_debug_mode(&mut self) {
        self.debug_mode = (self.debug_mode + 1) % DEBUG_MODE_COUNT;
    }

    #[must_use]
    pub fn cascade_count_clamped(&self) -> u32 {
        self.cascade_count.clamp(1, 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_mode_wraps() {
        let mut s = RenderSettings {
            debug_mode: DEBUG_MODE_COUNT - 1,
            ..Default::default()
        };
        s.cycle_debug_mode();
        assert_eq!(s.debug_mode, 0);
    }
}
