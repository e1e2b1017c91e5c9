//! Render Camera and Frustum
//!
//! The rendering core does not own a scene graph; callers hand it a
//! [`RenderCamera`] snapshot per frame. The camera convention is
//! right-handed, reverse-Z with an infinite far plane
//! (`Mat4::perspective_infinite_reverse_rh`): near maps to NDC z = 1,
//! infinity to z = 0.
//!
//! [`Frustum`] extracts world-space planes with the Gribb-Hartmann method.
//! Planes are stored as `Vec4` with the convention
//! `dot(plane.xyz, p) + plane.w >= -radius` ⇒ sphere not outside this
//! plane. Three constructors cover the three depth conventions in use:
//!
//! - [`Frustum::from_matrix`] — reverse-Z perspective (main camera);
//!   the far plane is disabled (infinite projection).
//! - [`Frustum::from_matrix_standard_z`] — standard-Z (ortho light VPs).
//! - [`Frustum::from_matrix_shadow_caster`] — standard-Z with the near
//!   plane disabled so casters towards the light are never culled.

use glam::{Mat4, Vec3, Vec3A, Vec4, Vec4Swizzles};

/// Stack-only camera snapshot handed to the renderer each frame (POD).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RenderCamera {
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
    pub view_projection_matrix: Mat4,
    /// World-space position, needed by the light pass.
    pub position: Vec3A,
    /// World-space culling frustum.
    pub frustum: Frustum,
    pub near: f32,
    /// `f32::INFINITY` for the infinite-perspective main camera.
    pub far: f32,
}

/// Projection state for the main camera.
#[derive(Debug, Clone)]
pub struct Camera {
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,

    world_matrix: Mat4,
    view_matrix: Mat4,
    projection_matrix: Mat4,
    view_projection_matrix: Mat4,
    frustum: Frustum,
}

impl Camera {
    /// Creates a reverse-Z infinite perspective camera.
    ///
    /// `fov` is the vertical field of view in degrees.
    #[must_use]
    pub fn new_perspective(fov: f32, aspect: f32, near: f32) -> Self {
        let mut cam = Self {
            fov: fov.to_radians(),
            aspect,
            near,
            far: f32::INFINITY,

            world_matrix: Mat4::IDENTITY,
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            view_projection_matrix: Mat4::IDENTITY,
            frustum: Frustum::default(),
        };
        cam.update_projection_matrix();
        cam
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if (self.aspect - aspect).abs() > f32::EPSILON {
            self.aspect = aspect;
            self.update_projection_matrix();
        }
    }

    pub fn update_projection_matrix(&mut self) {
        self.projection_matrix =
            Mat4::perspective_infinite_reverse_rh(self.fov, self.aspect, self.near);
        self.view_projection_matrix = self.projection_matrix * self.view_matrix;
        self.frustum = Frustum::from_matrix(self.view_projection_matrix);
    }

    /// Updates the cached view/VP matrices from a world transform.
    pub fn update_view_projection(&mut self, world_transform: &Mat4) {
        self.world_matrix = *world_transform;
        self.view_matrix = world_transform.inverse();
        self.view_projection_matrix = self.projection_matrix * self.view_matrix;
        self.frustum = Frustum::from_matrix(self.view_projection_matrix);
    }

    #[must_use]
    pub fn extract_render_camera(&self) -> RenderCamera {
        RenderCamera {
            view_matrix: self.view_matrix,
            projection_matrix: self.projection_matrix,
            view_projection_matrix: self.view_projection_matrix,
            position: self.world_matrix.w_axis.xyz().into(),
            frustum: self.frustum,
            near: self.near,
            far: self.far,
        }
    }
}

/// Six world-space planes: Left, Right, Bottom, Top, Near, Far.
///
/// A zero plane is inert (never culls); the reverse-Z constructor zeroes
/// the far plane, the shadow-caster constructor zeroes the near plane.
#[derive(Debug, Clone, Copy, Default)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extracts planes from a reverse-Z view-projection matrix.
    ///
    /// The far plane is disabled: the infinite projection has none.
    #[must_use]
    pub fn from_matrix(m: Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];

        let mut planes = [Vec4::ZERO; 6];
        planes[0] = rows[3] + rows[0]; // Left
        planes[1] = rows[3] - rows[0]; // Right
        planes[2] = rows[3] + rows[1]; // Bottom
        planes[3] = rows[3] - rows[1]; // Top
        // Reverse-Z: the near plane corresponds to NDC z = 1 (keep z_c <= w_c).
        planes[4] = rows[3] - rows[2]; // Near
        planes[5] = Vec4::ZERO; // Far: infinite projection

        Self::normalized(planes)
    }

    /// Extracts planes from a standard-Z view-projection matrix
    /// (NDC z ∈ [0, 1], near → 0). Used for shadow light frusta.
    #[must_use]
    pub fn from_matrix_standard_z(m: Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];

        let mut planes = [Vec4::ZERO; 6];
        planes[0] = rows[3] + rows[0]; // Left
        planes[1] = rows[3] - rows[0]; // Right
        planes[2] = rows[3] + rows[1]; // Bottom
        planes[3] = rows[3] - rows[1]; // Top
        planes[4] = rows[2]; // Near (z_c >= 0)
        planes[5] = rows[3] - rows[2]; // Far

        Self::normalized(planes)
    }

    /// Like [`from_matrix_standard_z`](Self::from_matrix_standard_z) but
    /// with the near plane disabled, so geometry between the light and the
    /// slice is kept as a potential caster.
    #[must_use]
    pub fn from_matrix_shadow_caster(m: Mat4) -> Self {
        let mut f = Self::from_matrix_standard_z(m);
        f.planes[4] = Vec4::ZERO;
        f
    }

    fn normalized(mut planes: [Vec4; 6]) -> Self {
        for plane in &mut planes {
            let length = Vec3::new(plane.x, plane.y, plane.z).length();
            if length > 1e-6 {
                *plane /= length;
            } else {
                // Degenerate normal: make the plane inert.
                *plane = Vec4::ZERO;
            }
        }
        Self { planes }
    }

    /// Raw planes in GPU order, for the cull-constants CBV.
    #[must_use]
    pub fn planes(&self) -> [Vec4; 6] {
        self.planes
    }

    /// Sphere-frustum intersection test.
    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        for plane in &self.planes {
            if plane.x == 0.0 && plane.y == 0.0 && plane.z == 0.0 {
                continue;
            }
            let dist = plane.x * center.x + plane.y * center.y + plane.z * center.z + plane.w;
            if dist < -radius {
                return false;
            }
        }
        true
    }

    /// AABB-frustum intersection via the p-vertex test.
    #[must_use]
    pub fn intersects_box(&self, min: Vec3, max: Vec3) -> bool {
        for plane in &self.planes {
            if plane.x == 0.0 && plane.y == 0.0 && plane.z == 0.0 {
                continue;
            }
            // Nearest AABB corner along the plane normal: if even that
            // corner is outside, the whole box is.
            let p = Vec3::new(
                if plane.x >= 0.0 { max.x } else { min.x },
                if plane.y >= 0.0 { max.y } else { min.y },
                if plane.z >= 0.0 { max.z } else { min.z },
            );
            let dist = plane.x * p.x + plane.y * p.y + plane.z * p.z + plane.w;
            if dist < 0.0 {
                return false;
            }
        }
        true
    }
}
