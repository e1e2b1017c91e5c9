//! Materials and Effects
//!
//! An [`Effect`] declares which passes its materials participate in and
//! names the shader pair the pass pipelines are built from. A
//! [`Material`] is a parameter set over an effect; registering it
//! compiles it to a 32-bit `material_id` — a row in the GPU material
//! table read by the G-buffer and light shaders through the per-instance
//! descriptor.
//!
//! Failure policy: a material whose textures never became ready samples
//! the white dummy (slot semantics of the bindless table); a material
//! whose effect failed to build at runtime falls back to
//! [`Material::fallback`], the magenta unlit material.

use bitflags::bitflags;
use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::gpu::{DeferredDisposal, FrameFence};

bitflags! {
    /// Which passes an effect participates in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PassMask: u32 {
        const OPAQUE = 1 << 0;
        const SHADOW = 1 << 1;
        const LIGHT = 1 << 2;
        const POST_PROCESS = 1 << 3;
    }
}

new_key_type! {
    /// Handle to a registered effect.
    pub struct EffectId;
}

/// Shader + pass participation recipe shared by many materials.
#[derive(Debug, Clone)]
pub struct Effect {
    pub name: &'static str,
    pub pass_mask: PassMask,
    /// True for the unlit paths (skips the BRDF, `lit` G-buffer flag 0).
    pub unlit: bool,
}

impl Effect {
    /// The standard opaque PBR effect: draws into G-buffer and shadows.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            name: "standard",
            pass_mask: PassMask::OPAQUE | PassMask::SHADOW,
            unlit: false,
        }
    }

    /// Unlit: G-buffer only, `lit` flag 0 so the composition passes the
    /// albedo through.
    #[must_use]
    pub fn unlit() -> Self {
        Self {
            name: "unlit",
            pass_mask: PassMask::OPAQUE,
            unlit: true,
        }
    }

    /// Point-light volumes: light pass only, parameters via custom data.
    #[must_use]
    pub fn point_light() -> Self {
        Self {
            name: "point_light",
            pass_mask: PassMask::LIGHT,
            unlit: true,
        }
    }
}

bitflags! {
    /// Per-material shading flags mirrored into the GPU row.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MaterialFlags: u32 {
        const UNLIT = 1 << 0;
        const ALPHA_TEST = 1 << 1;
        const SKINNED = 1 << 2;
    }
}

/// GPU row of the material table (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialRecord {
    pub base_color: [f32; 4],
    /// roughness, metallic, alpha cutoff, ambient occlusion strength
    pub params: [f32; 4],
    pub albedo_tex: u32,
    pub normal_tex: u32,
    pub rough_metal_tex: u32,
    pub flags: u32,
}

/// CPU-side material description.
#[derive(Debug, Clone)]
pub struct Material {
    pub effect: EffectId,
    pub base_color: [f32; 4],
    pub roughness: f32,
    pub metallic: f32,
    pub alpha_cutoff: f32,
    pub ao_strength: f32,
    /// Bindless indices; `u32::MAX` = unset (white dummy via slot 0
    /// convention is *not* used — unset samples flat parameters).
    pub albedo_tex: u32,
    pub normal_tex: u32,
    pub rough_metal_tex: u32,
    pub flags: MaterialFlags,
}

impl Material {
    #[must_use]
    pub fn new(effect: EffectId) -> Self {
        Self {
            effect,
            base_color: [1.0, 1.0, 1.0, 1.0],
            roughness: 0.8,
            metallic: 0.0,
            alpha_cutoff: 0.0,
            ao_strength: 1.0,
            albedo_tex: u32::MAX,
            normal_tex: u32::MAX,
            rough_metal_tex: u32::MAX,
            flags: MaterialFlags::empty(),
        }
    }

    /// Binds a texture by semantic name. Unknown names are logged and
    /// ignored (runtime hot-path: never fatal).
    pub fn set_texture(&mut self, name: &str, bindless_index: u32) {
        match name {
            "albedo" => self.albedo_tex = bindless_index,
            "normal" => self.normal_tex = bindless_index,
            "rough_metal" => self.rough_metal_tex = bindless_index,
            _ => log::warn!("Material::set_texture: unknown slot '{name}'"),
        }
    }

    /// Sets a scalar/vector parameter by semantic name.
    pub fn set_parameter(&mut self, name: &str, value: f32) {
        match name {
            "roughness" => self.roughness = value,
            "metallic" => self.metallic = value,
            "alpha_cutoff" => {
                self.alpha_cutoff = value;
                self.flags.set(MaterialFlags::ALPHA_TEST, value > 0.0);
            }
            "ao_strength" => self.ao_strength = value,
            _ => log::warn!("Material::set_parameter: unknown parameter '{name}'"),
        }
    }

    pub fn set_base_color(&mut self, rgba: [f32; 4]) {
        self.base_color = rgba;
    }

    fn record(&self, unlit: bool) -> MaterialRecord {
        let mut flags = self.flags;
        flags.set(MaterialFlags::UNLIT, unlit || flags.contains(MaterialFlags::UNLIT));
        MaterialRecord {
            base_color: self.base_color,
            params: [
                self.roughness,
                self.metallic,
                self.alpha_cutoff,
                self.ao_strength,
            ],
            albedo_tex: self.albedo_tex,
            normal_tex: self.normal_tex,
            rough_metal_tex: self.rough_metal_tex,
            flags: flags.bits(),
        }
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

struct MaterialTable {
    effects: SlotMap<EffectId, Effect>,
    rows: Vec<MaterialRecord>,
    row_effects: Vec<EffectId>,
    clean_rows: usize,
}

/// Process-wide material table; `material_id` is the row index.
pub struct MaterialRegistry {
    table: Mutex<MaterialTable>,
    buffer: wgpu::Buffer,
    gpu_capacity: u32,
    fence: FrameFence,
    /// Row 0: the magenta unlit fallback, always present.
    fallback_id: u32,
}

const MATERIAL_INITIAL_CAPACITY: u32 = 256;
const MATERIAL_ROW_SIZE: u64 = std::mem::size_of::<MaterialRecord>() as u64;

impl MaterialRegistry {
    #[must_use]
    pub fn new(device: &wgpu::Device, fence: FrameFence) -> Self {
        let mut effects = SlotMap::with_key();
        let unlit_effect = effects.insert(Effect::unlit());

        let mut fallback = Material::new(unlit_effect);
        fallback.base_color = [1.0, 0.0, 1.0, 1.0];

        let mut registry = Self {
            table: Mutex::new(MaterialTable {
                effects,
                rows: Vec::new(),
                row_effects: Vec::new(),
                clean_rows: 0,
            }),
            buffer: Self::create(device, MATERIAL_INITIAL_CAPACITY),
            gpu_capacity: MATERIAL_INITIAL_CAPACITY,
            fence,
            fallback_id: 0,
        };
        registry.fallback_id = registry.register(&fallback);
        registry
    }

    fn create(device: &wgpu::Device, rows: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Material Table"),
            size: u64::from(rows) * MATERIAL_ROW_SIZE,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    pub fn register_effect(&self, effect: Effect) -> EffectId {
        self.table.lock().effects.insert(effect)
    }

    #[must_use]
    pub fn effect(&self, id: EffectId) -> Option<Effect> {
        self.table.lock().effects.get(id).cloned()
    }

    /// Pass participation for a material row; fallback rows draw opaque
    /// only.
    #[must_use]
    pub fn pass_mask(&self, material_id: u32) -> PassMask {
        let table = self.table.lock();
        table
            .row_effects
            .get(material_id as usize)
            .and_then(|id| table.effects.get(*id))
            .map_or(PassMask::OPAQUE, |e| e.pass_mask)
    }

    /// Compiles a material to its `material_id` row. An unknown effect id
    /// compiles to the magenta fallback row.
    pub fn register(&self, material: &Material) -> u32 {
        let mut table = self.table.lock();
        let Some(effect) = table.effects.get(material.effect).cloned() else {
            log::warn!("Material references unknown effect; using fallback");
            return self.fallback_id;
        };
        let id = table.rows.len() as u32;
        table.rows.push(material.record(effect.unlit));
        table.row_effects.push(material.effect);
        id
    }

    /// Rewrites an existing row (e.g. a streamed texture became ready and
    /// `set_texture` re-pointed it).
    pub fn update(&self, material_id: u32, material: &Material) {
        let mut table = self.table.lock();
        let Some(effect) = table.effects.get(material.effect).cloned() else {
            return;
        };
        if let Some(row) = table.rows.get_mut(material_id as usize) {
            *row = material.record(effect.unlit);
            table.clean_rows = table.clean_rows.min(material_id as usize);
        }
    }

    /// The magenta unlit fallback row.
    #[must_use]
    pub fn fallback_id(&self) -> u32 {
        self.fallback_id
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        self.table.lock().rows.len() as u32
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        disposal: &mut DeferredDisposal,
    ) {
        let mut table = self.table.lock();
        let rows = table.rows.len() as u32;
        if rows == 0 {
            return;
        }
        if rows > self.gpu_capacity {
            let new_capacity = (self.gpu_capacity * 2).max(rows).next_power_of_two();
            log::info!(
                "Growing material table: {} -> {new_capacity} rows",
                self.gpu_capacity
            );
            let new_buffer = Self::create(device, new_capacity);
            let old = std::mem::replace(&mut self.buffer, new_buffer);
            disposal.retire_buffer(old, self.fence.next_value());
            self.gpu_capacity = new_capacity;
            table.clean_rows = 0;
        }
        if table.clean_rows < table.rows.len() {
            let new = &table.rows[table.clean_rows..];
            queue.write_buffer(
                &self.buffer,
                table.clean_rows as u64 * MATERIAL_ROW_SIZE,
                bytemuck::cast_slice(new),
            );
            table.clean_rows = table.rows.len();
        }
    }

    #[must_use]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_record_is_48_bytes() {
        assert_eq!(std::mem::size_of::<MaterialRecord>(), 48);
    }

    #[test]
    fn alpha_cutoff_sets_alpha_test_flag() {
        let mut m = Material::new(EffectId::default());
        m.set_parameter("alpha_cutoff", 0.5);
        assert!(m.flags.contains(MaterialFlags::ALPHA_TEST));
        m.set_parameter("alpha_cutoff", 0.0);
        assert!(!m.flags.contains(MaterialFlags::ALPHA_TEST));
    }
}
