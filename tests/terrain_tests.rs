//! Terrain Quadtree Tests
//!
//! Drives the CPU mirror of the GPU quadtree rules (the shaders
//! implement the same arithmetic) against the quadtree invariants:
//! - flat indexing round-trips
//! - far camera ⇒ shallow tree, near camera ⇒ max-depth refinement
//! - the restricted-quadtree property (edge-adjacent leaves differ by
//!   at most one level)
//! - leaves tile the world exactly
//! - stitch masks mark exactly the coarser-neighbor edges

use glam::Vec3;

use strata::renderer::terrain::{
    QuadtreeParams, ReferenceLeaf, STITCH_NEG_X, STITCH_NEG_Z, STITCH_POS_X, STITCH_POS_Z,
    decompose, flat_index, level_offset, reference_leaves, reference_split_flags, total_nodes,
};

/// Gently rolling terrain: each node's height range scales with its
/// footprint (0.6% roughness), which keeps subdivision going toward the
/// camera while staying shallow at distance.
fn fractal_range(world_size: f32) -> impl Fn(u32, u32, u32) -> (f32, f32) {
    move |depth, _x, _y| {
        let node_size = world_size / (1u32 << depth) as f32;
        (0.0, (node_size * 0.006).min(60.0))
    }
}

fn params(camera: Vec3, max_depth: u32) -> QuadtreeParams {
    QuadtreeParams {
        origin: (-512.0, -512.0),
        world_size: 1024.0,
        max_depth,
        screen_height: 1080.0,
        proj_scale_y: 1.0 / (30.0f32.to_radians()).tan(),
        pixel_error: 2.0,
        camera,
    }
}

fn max_leaf_depth(leaves: &[ReferenceLeaf]) -> u32 {
    leaves.iter().map(|l| l.depth).max().unwrap_or(0)
}

// ============================================================================
// Indexing
// ============================================================================

#[test]
fn level_offsets_follow_geometric_series() {
    assert_eq!(level_offset(0), 0);
    assert_eq!(level_offset(1), 1);
    assert_eq!(level_offset(2), 5);
    assert_eq!(level_offset(3), 21);
    assert_eq!(level_offset(4), 85);
    assert_eq!(total_nodes(3), 85);
}

#[test]
fn decompose_inverts_flat_index() {
    for flat in 0..total_nodes(5) {
        let (d, x, y) = decompose(flat);
        assert_eq!(flat_index(d, x, y), flat);
    }
}

// ============================================================================
// Far / near refinement
// ============================================================================

#[test]
fn high_camera_yields_shallow_tree() {
    let p = params(Vec3::new(0.0, 1000.0, 0.0), 8);
    let flags = reference_split_flags(&p, &fractal_range(p.world_size));
    let leaves = reference_leaves(&flags, p.max_depth);

    assert!(
        max_leaf_depth(&leaves) <= 3,
        "camera at height 1000 should stay shallow, got depth {}",
        max_leaf_depth(&leaves)
    );
    assert!(
        leaves.len() <= 16,
        "expected at most 16 leaves, got {}",
        leaves.len()
    );
}

#[test]
fn low_camera_refines_to_max_depth_below_it() {
    let p = params(Vec3::new(1.0, 5.0, 1.0), 6);
    let flags = reference_split_flags(&p, &fractal_range(p.world_size));
    let leaves = reference_leaves(&flags, p.max_depth);

    assert_eq!(
        max_leaf_depth(&leaves),
        p.max_depth,
        "tree must refine to max depth under a low camera"
    );

    // The most-refined leaves cluster around the camera footprint.
    let camera_cell = leaves
        .iter()
        .filter(|l| l.depth == p.max_depth)
        .any(|l| {
            let size = p.world_size / (1u32 << l.depth) as f32;
            let min_x = p.origin.0 + l.x as f32 * size;
            let min_z = p.origin.1 + l.y as f32 * size;
            (min_x..min_x + size).contains(&p.camera.x)
                && (min_z..min_z + size).contains(&p.camera.z)
        });
    assert!(camera_cell, "the cell under the camera must be max depth");
}

// ============================================================================
// Restricted quadtree + tiling
// ============================================================================

/// Edge-adjacency test on the world grid at the finer leaf's resolution.
fn leaves_share_edge(a: &ReferenceLeaf, b: &ReferenceLeaf) -> bool {
    // Promote both to integer rects in units of the deepest level.
    let depth = a.depth.max(b.depth);
    let scale_a = 1u32 << (depth - a.depth);
    let scale_b = 1u32 << (depth - b.depth);
    let (ax0, ay0) = (a.x * scale_a, a.y * scale_a);
    let (ax1, ay1) = (ax0 + scale_a, ay0 + scale_a);
    let (bx0, by0) = (b.x * scale_b, b.y * scale_b);
    let (bx1, by1) = (bx0 + scale_b, by0 + scale_b);

    let x_touch = ax1 == bx0 || bx1 == ax0;
    let y_touch = ay1 == by0 || by1 == ay0;
    let x_overlap = ax0 < bx1 && bx0 < ax1;
    let y_overlap = ay0 < by1 && by0 < ay1;
    (x_touch && y_overlap) || (y_touch && x_overlap)
}

#[test]
fn adjacent_leaves_differ_by_at_most_one_level() {
    for camera in [
        Vec3::new(1.0, 5.0, 1.0),
        Vec3::new(-400.0, 20.0, 300.0),
        Vec3::new(100.0, 60.0, -80.0),
    ] {
        let p = params(camera, 6);
        let flags = reference_split_flags(&p, &fractal_range(p.world_size));
        let leaves = reference_leaves(&flags, p.max_depth);

        for (i, a) in leaves.iter().enumerate() {
            for b in &leaves[i + 1..] {
                if leaves_share_edge(a, b) {
                    assert!(
                        a.depth.abs_diff(b.depth) <= 1,
                        "restricted property violated between {a:?} and {b:?} (camera {camera:?})"
                    );
                }
            }
        }
    }
}

#[test]
fn leaves_tile_the_world_exactly() {
    let p = params(Vec3::new(10.0, 30.0, -25.0), 5);
    let flags = reference_split_flags(&p, &fractal_range(p.world_size));
    let leaves = reference_leaves(&flags, p.max_depth);

    // Sum of leaf areas in units of the deepest grid must cover the
    // whole world exactly once.
    let unit = 1u64 << (2 * p.max_depth);
    let covered: u64 = leaves
        .iter()
        .map(|l| 1u64 << (2 * (p.max_depth - l.depth)))
        .sum();
    assert_eq!(covered, unit, "leaves must tile the world exactly once");
}

// ============================================================================
// Stitch masks
// ============================================================================

#[test]
fn stitch_marks_exactly_coarser_edges() {
    let p = params(Vec3::new(1.0, 5.0, 1.0), 6);
    let flags = reference_split_flags(&p, &fractal_range(p.world_size));
    let leaves = reference_leaves(&flags, p.max_depth);

    for leaf in &leaves {
        for (bit, dx, dz) in [
            (STITCH_NEG_X, -1i64, 0i64),
            (STITCH_POS_X, 1, 0),
            (STITCH_NEG_Z, 0, -1),
            (STITCH_POS_Z, 0, 1),
        ] {
            let nx = i64::from(leaf.x) + dx;
            let nz = i64::from(leaf.y) + dz;
            let side = i64::from(1u32 << leaf.depth);
            if nx < 0 || nz < 0 || nx >= side || nz >= side {
                assert_eq!(
                    leaf.stitch & bit,
                    0,
                    "world border must not stitch: {leaf:?}"
                );
                continue;
            }

            // The neighbor is coarser iff no same-depth leaf/node exists
            // there, which the mask must mirror exactly.
            let neighbor_coarser = leaves.iter().any(|other| {
                other.depth < leaf.depth && {
                    let shift = leaf.depth - other.depth;
                    other.x == (nx as u32) >> shift && other.y == (nz as u32) >> shift
                }
            });
            assert_eq!(
                (leaf.stitch & bit) != 0,
                neighbor_coarser,
                "stitch bit {bit} mismatch on {leaf:?} (neighbor {nx},{nz})"
            );
        }
    }
}

#[test]
fn flat_terrain_emits_single_root_leaf() {
    let p = params(Vec3::new(0.0, 100.0, 0.0), 6);
    // Zero geometric error everywhere: nothing splits.
    let flags = reference_split_flags(&p, &|_, _, _| (10.0, 10.0));
    let leaves = reference_leaves(&flags, p.max_depth);
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0].depth, 0);
    assert_eq!(leaves[0].stitch, 0);
}
