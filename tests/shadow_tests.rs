//! Shadow Cascade Tests
//!
//! Tests for:
//! - PSSM split computation (lambda blend, monotonicity)
//! - Cascade VP fitting and slice containment in NDC
//! - Texel snapping stability under camera translation
//! - Cascade selection with cross-fade and the beyond-range case

use glam::{Mat4, Vec3, Vec3A};

use strata::camera::{Camera, Frustum};
use strata::renderer::settings::RenderSettings;
use strata::renderer::shadow::{
    CASCADE_BLEND_FRACTION, build_cascade_vp, build_cascades, cascade_contains_world_point,
    compute_cascade_splits, compute_frustum_corners_world, select_cascade,
};

fn test_camera() -> strata::camera::RenderCamera {
    let mut cam = Camera::new_perspective(60.0, 16.0 / 9.0, 0.1);
    cam.update_view_projection(&Mat4::IDENTITY);
    cam.extract_render_camera()
}

// ============================================================================
// Split computation
// ============================================================================

#[test]
fn splits_cover_range_monotonically() {
    let splits = compute_cascade_splits(4, 0.1, 400.0, 0.75);
    let mut prev = 0.1;
    for &s in &splits {
        assert!(s > prev, "splits must increase: {splits:?}");
        prev = s;
    }
    assert_eq!(splits[3], 400.0);
}

#[test]
fn log_splits_bias_towards_near() {
    let log = compute_cascade_splits(4, 0.1, 400.0, 1.0);
    let uni = compute_cascade_splits(4, 0.1, 400.0, 0.0);
    // Logarithmic distribution puts the first split far closer.
    assert!(log[0] < uni[0] * 0.1);
}

// ============================================================================
// Slice containment (the cascade invariant)
// ============================================================================

#[test]
fn cascade_contains_its_view_slice() {
    let camera = test_camera();
    let settings = RenderSettings {
        cascade_count: 4,
        cascade_lambda: 0.75,
        shadow_far: 400.0,
        ..Default::default()
    };
    let sun = Vec3::new(-0.4, -1.0, -0.2).normalize();
    let (fits, _constants) = build_cascades(&camera, sun, &settings, (0.1, 400.0), 400.0);

    for (c, fit) in fits.iter().enumerate() {
        // Points on the slice's frustum corners must project inside the
        // cascade's NDC volume.
        let corners = compute_frustum_corners_world(&camera, fit.near, fit.far);
        for corner in corners {
            assert!(
                cascade_contains_world_point(fit, corner),
                "cascade {c} must contain its slice corner {corner:?}"
            );
        }
        // And interior points along the view axis.
        let mid = (fit.near + fit.far) * 0.5;
        assert!(cascade_contains_world_point(fit, Vec3::new(0.0, 0.0, -mid)));
    }
}

#[test]
fn mesh_at_depth_20_lands_in_first_two_cascades() {
    let settings = RenderSettings {
        cascade_count: 4,
        cascade_lambda: 0.75,
        shadow_far: 400.0,
        ..Default::default()
    };
    let splits = compute_cascade_splits(4, 0.1, settings.shadow_far, settings.cascade_lambda);

    // View depth 20 with a lambda-0.75 / far-400 split lands in cascade
    // 0 or 1 depending on blend; 380 is cascade 3; 500 is past the range.
    let (c20, _) = select_cascade(&splits, 20.0).unwrap();
    assert!(c20 <= 1, "view-z 20 should be in cascades 0-1, got {c20}");
    let (c380, _) = select_cascade(&splits, 380.0).unwrap();
    assert_eq!(c380, 3);
    assert_eq!(select_cascade(&splits, 500.0), None);
}

#[test]
fn cross_fade_engages_in_last_tenth() {
    let splits = [10.0, 50.0, 150.0, 400.0];
    let fade_free = select_cascade(&splits, 8.9).unwrap();
    assert_eq!(fade_free.1, 0.0);
    let fading = select_cascade(&splits, 10.0 * (1.0 - CASCADE_BLEND_FRACTION) + 0.5).unwrap();
    assert!(fading.1 > 0.0 && fading.1 <= 1.0);
    // The last cascade never fades (there is nothing to fade into).
    let last = select_cascade(&splits, 399.0).unwrap();
    assert_eq!(last.0, 3);
    assert_eq!(last.1, 0.0);
}

// ============================================================================
// VP fitting
// ============================================================================

#[test]
fn texel_snap_quantizes_camera_motion() {
    let camera = test_camera();
    let corners = compute_frustum_corners_world(&camera, 0.1, 50.0);
    let sun = Vec3::new(-0.3, -1.0, -0.1).normalize();
    let map_size = 2048u32;

    let vp_a = build_cascade_vp(sun, &corners, map_size, 400.0);
    let p = Vec3::new(3.0, 1.0, -20.0);
    let a = vp_a.project_point3(p);

    // Slide the camera by sub-texel amounts. Whenever the snapped ortho
    // window keeps its extent (the common case), the window origin may
    // only move by whole texels, so the projected point's texel-space
    // delta must be integral.
    let mut checked = 0;
    for i in 1..=8 {
        let shift = Vec3::new(0.003 * i as f32, 0.0, 0.002 * i as f32);
        let mut cam_b = Camera::new_perspective(60.0, 16.0 / 9.0, 0.1);
        cam_b.update_view_projection(&Mat4::from_translation(shift));
        let corners_b = compute_frustum_corners_world(&cam_b.extract_render_camera(), 0.1, 50.0);
        let vp_b = build_cascade_vp(sun, &corners_b, map_size, 400.0);

        // Same window extent <=> same ortho scale.
        let same_extent = (vp_b.x_axis.x - vp_a.x_axis.x).abs() < 1e-7
            && (vp_b.y_axis.y - vp_a.y_axis.y).abs() < 1e-7;
        if !same_extent {
            continue;
        }
        checked += 1;

        let b = vp_b.project_point3(p);
        let texels = map_size as f32 * 0.5;
        let dx = (a.x - b.x) * texels;
        let dy = (a.y - b.y) * texels;
        assert!(
            (dx - dx.round()).abs() < 1e-2 && (dy - dy.round()).abs() < 1e-2,
            "snap must quantize movement to whole texels, got ({dx}, {dy})"
        );
    }
    assert!(checked > 0, "no shift kept the window extent; test is inert");
}

#[test]
fn caster_frustum_keeps_geometry_towards_light() {
    let camera = test_camera();
    let settings = RenderSettings::default();
    let sun = Vec3::new(0.0, -1.0, 0.0);
    let (fits, constants) = build_cascades(&camera, sun, &settings, (0.1, 400.0), 400.0);

    // A caster high above the slice (towards the light) must survive the
    // caster frustum of cascade 0 even though it is outside the slice.
    let caster = Vec3::new(0.0, 200.0, -5.0);
    let planes: Vec<glam::Vec4> = constants.planes[0..6]
        .iter()
        .map(|p| glam::Vec4::from_array(*p))
        .collect();
    let outside = planes.iter().any(|plane| {
        if plane.truncate() == Vec3::ZERO {
            return false;
        }
        plane.truncate().dot(caster) + plane.w < -1.0
    });
    assert!(
        !outside,
        "caster towards the light must not be culled by cascade 0"
    );
    // Sanity: the fits agree with the constants.
    assert_eq!(fits[0].view_proj.to_cols_array_2d(), constants.light_view_proj[0]);
}

// ============================================================================
// Reverse-Z camera conventions (main view, used by cascade slicing)
// ============================================================================

#[test]
fn reverse_z_near_maps_to_one() {
    let cam = Camera::new_perspective(60.0, 1.0, 0.1);
    let rc = cam.extract_render_camera();
    let near_point = rc.projection_matrix * glam::Vec4::new(0.0, 0.0, -0.1, 1.0);
    let ndc_z = near_point.z / near_point.w;
    assert!((ndc_z - 1.0).abs() < 1e-4, "near must map to 1, got {ndc_z}");
}

#[test]
fn reverse_z_infinity_maps_to_zero() {
    let cam = Camera::new_perspective(60.0, 1.0, 0.1);
    let rc = cam.extract_render_camera();
    let far_point = rc.projection_matrix * glam::Vec4::new(0.0, 0.0, -100_000.0, 1.0);
    assert!((far_point.z / far_point.w).abs() < 0.01);
}

#[test]
fn frustum_culls_behind_camera() {
    let frustum = Frustum::from_matrix(
        Mat4::perspective_infinite_reverse_rh(1.0, 1.0, 0.1) * Mat4::IDENTITY,
    );
    assert!(frustum.intersects_sphere(Vec3::new(0.0, 0.0, -5.0), 1.0));
    assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, 10.0), 1.0));
    assert!(!frustum.intersects_sphere(Vec3::new(-1000.0, 0.0, -5.0), 1.0));
}

#[test]
fn render_camera_position_tracks_world() {
    let mut cam = Camera::new_perspective(60.0, 1.0, 0.1);
    cam.update_view_projection(&Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
    let rc = cam.extract_render_camera();
    assert_eq!(rc.position, Vec3A::new(1.0, 2.0, 3.0));
}
