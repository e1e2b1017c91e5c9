//! Streaming Tests
//!
//! Importer registry dispatch, off-thread mesh import through the tokio
//! runtime, drain budgeting, and the bounding-sphere contract.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use strata::streaming::import::{ImporterKind, import_mesh, parse_obj};
use strata::streaming::{drain_with_budget, importer_for};

fn temp_path(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("strata-test-{}-{name}", std::process::id()));
    path
}

// ============================================================================
// Importer registry
// ============================================================================

#[test]
fn extensions_map_to_importers() {
    assert_eq!(
        importer_for(std::path::Path::new("rock.obj")).unwrap(),
        ImporterKind::WavefrontMesh
    );
    assert_eq!(
        importer_for(std::path::Path::new("albedo.jpeg")).unwrap(),
        ImporterKind::Image
    );
    assert_eq!(
        importer_for(std::path::Path::new("env.hdr")).unwrap(),
        ImporterKind::Image
    );
    // Unknown extension: missing-importer error, not a panic.
    assert!(importer_for(std::path::Path::new("scene.gltf")).is_err());
    assert!(importer_for(std::path::Path::new("LICENSE")).is_err());
}

// ============================================================================
// Off-thread import
// ============================================================================

#[test]
fn mesh_import_round_trips_through_runtime() {
    let path = temp_path("tri.obj");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "v 0 0 0\nv 1 0 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2//1 3//1").unwrap();
    drop(file);

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mesh = runtime.block_on(import_mesh(&path)).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(mesh.vertex_count(), 3);
    assert_eq!(mesh.indices, vec![0, 1, 2]);
    assert!(mesh.bounding_sphere.w > 0.0);
}

#[test]
fn missing_file_is_asset_not_found() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let err = runtime
        .block_on(import_mesh(std::path::Path::new("/definitely/not/here.obj")))
        .unwrap_err();
    assert!(matches!(err, strata::StrataError::AssetNotFound(_)));
}

#[test]
fn corrupt_bytes_are_a_corrupt_asset_error() {
    let path = temp_path("garbage.obj");
    std::fs::write(&path, b"f 1 2 9999\n").unwrap();

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let err = runtime.block_on(import_mesh(&path)).unwrap_err();
    std::fs::remove_file(&path).ok();
    assert!(matches!(err, strata::StrataError::CorruptAsset { .. }));
}

// ============================================================================
// Budgeted drain
// ============================================================================

#[test]
fn drain_respects_wall_clock_budget() {
    let (tx, rx) = flume::unbounded();
    for i in 0..1000 {
        tx.send(i).unwrap();
    }

    // Each item burns ~1ms; a 4ms budget must stop well short of 1000
    // while still making progress.
    let ran = drain_with_budget(&rx, Duration::from_millis(4), |_| {
        std::thread::sleep(Duration::from_millis(1));
    });
    assert!(ran >= 1, "drain must always process at least one item");
    assert!(ran < 100, "drain must stop near the budget, ran {ran}");
    assert!(!rx.is_empty(), "remaining items wait for the next frame");
}

#[test]
fn drain_empties_queue_under_large_budget() {
    let (tx, rx) = flume::unbounded();
    for i in 0..50 {
        tx.send(i).unwrap();
    }
    let ran = drain_with_budget(&rx, Duration::from_secs(5), |_| {});
    assert_eq!(ran, 50);
    assert!(rx.is_empty());
}

// ============================================================================
// Parser details
// ============================================================================

#[test]
fn obj_quads_triangulate_and_share_vertices() {
    let mesh = parse_obj("v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n").unwrap();
    assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
    assert_eq!(mesh.vertex_count(), 4);
    // Normals were absent: computed facing +Z for CCW winding.
    assert!(mesh.normals[2] > 0.99);
}
