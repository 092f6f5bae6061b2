//! Cell blending against the mock toolkit.

use std::sync::Arc;

use elevation_mosaic::blend::{BlendStage, CellBlender};
use elevation_mosaic::coverage::{resolve, Catalog, CellKind, CellPlan, ResolverConfig};
use elevation_mosaic::error::BlendError;
use elevation_mosaic::store::{RunId, StoreLayout};
use elevation_mosaic::tile::{resolution, NODATA, TILE_SIZE};

use super::test_utils::{
    padded_grid, tile, write_collection, write_collection_in, write_leaf, MockToolkit,
};

const HIGH: f32 = 100.0;
const LOW: f32 = 20.0;

/// Two sources with a leaf at cell 9-5-3. `s-high` outranks `s-low` (equal
/// zoom, earlier name) and has a gap over the western half of the cell.
fn two_source_catalog(root: &std::path::Path) -> Catalog {
    let cell = tile(9, 5, 3);
    let leaf = cell;
    let grid = padded_grid(&cell, 9, 16);
    let center_x = cell.xy_bounds().min_x + (TILE_SIZE / 2) as f64 * resolution(9);

    write_collection(root, "s-high", "h1", "2025-01-01T00:00:00Z", 9, &[(leaf, true)]);
    write_leaf(root, "s-high", "h1", &leaf, &grid, |x, _| {
        if x < center_x {
            NODATA
        } else {
            HIGH
        }
    });
    write_collection(root, "s-low", "l1", "2025-01-01T00:00:00Z", 9, &[(leaf, false)]);
    write_leaf(root, "s-low", "l1", &leaf, &grid, |_, _| LOW);

    Catalog::load(root).unwrap()
}

fn plan_for(catalog: &Catalog, cell: elevation_mosaic::tile::TileCoord) -> CellPlan {
    resolve(catalog, &ResolverConfig::default())
        .unwrap()
        .into_iter()
        .find(|p| p.cell == cell)
        .unwrap()
}

#[tokio::test]
async fn test_two_sources_blend_without_seam() {
    let catalog_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(two_source_catalog(catalog_dir.path()));
    let cell = tile(9, 5, 3);

    let plan = plan_for(&catalog, cell);
    assert_eq!(plan.kind, CellKind::Blend);
    let order: Vec<&str> = plan
        .manifest
        .fold_order()
        .map(|e| e.source.as_str())
        .collect();
    assert_eq!(order, vec!["s-high", "s-low"]);

    let toolkit = MockToolkit::new();
    let blender = CellBlender::new(
        Arc::clone(&toolkit),
        catalog,
        StoreLayout::new(store_dir.path()),
        2000.0,
    );
    let run = RunId::generate();
    let raster = blender.blend(&run, &plan).await.unwrap();

    assert_eq!(raster.width(), TILE_SIZE);
    assert_eq!(raster.height(), TILE_SIZE);
    assert_eq!(raster.nodata_count(), 0);
    assert_eq!(toolkit.reprojects(), 2);
    assert_eq!(blender.stage(&run, &cell), BlendStage::Cropped);

    // Along a row: low source in the west, high in the east, no hard step
    let row = TILE_SIZE / 2;
    let line: Vec<f32> = (0..TILE_SIZE).map(|c| raster.get(c, row)).collect();
    assert_eq!(line[0], LOW);
    assert_eq!(line[TILE_SIZE / 2 - 8], LOW);
    assert_eq!(line[TILE_SIZE / 2 + 16], HIGH);
    assert_eq!(line[TILE_SIZE - 1], HIGH);

    let max_step = line
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0f32, f32::max);
    assert!(
        max_step < 0.6 * (HIGH - LOW),
        "transition has a step of {max_step}"
    );
    let ramp = line.iter().filter(|&&v| v > LOW && v < HIGH).count();
    assert!((2..=8).contains(&ramp), "ramp spans {ramp} pixels");
}

#[tokio::test]
async fn test_rerun_resumes_from_sentinels() {
    let catalog_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(two_source_catalog(catalog_dir.path()));
    let plan = plan_for(&catalog, tile(9, 5, 3));

    let toolkit = MockToolkit::new();
    let blender = CellBlender::new(
        Arc::clone(&toolkit),
        catalog,
        StoreLayout::new(store_dir.path()),
        2000.0,
    );
    let run = RunId::generate();
    let first = blender.blend(&run, &plan).await.unwrap();
    let second = blender.blend(&run, &plan).await.unwrap();

    assert_eq!(first.data(), second.data());
    assert_eq!(toolkit.reprojects(), 2);
}

#[tokio::test]
async fn test_direct_copy_matches_single_layer_path() {
    let catalog_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let root = catalog_dir.path();
    let cell = tile(9, 5, 3);

    write_collection(root, "solo", "c1", "2025-03-01T00:00:00Z", 9, &[(cell, false)]);
    write_leaf(root, "solo", "c1", &cell, &padded_grid(&cell, 9, 0), |x, y| {
        ((x / 1500.0).sin() * 40.0 + (y / 900.0).cos() * 25.0 + 800.0) as f32
    });
    let catalog = Arc::new(Catalog::load(root).unwrap());

    let plan = plan_for(&catalog, cell);
    assert_eq!(plan.kind, CellKind::DirectCopy);

    let toolkit = MockToolkit::new();
    let blender = CellBlender::new(
        Arc::clone(&toolkit),
        catalog,
        StoreLayout::new(store_dir.path()),
        2000.0,
    );

    let direct = blender.blend(&RunId::generate(), &plan).await.unwrap();
    let general_plan = CellPlan {
        kind: CellKind::SingleSource,
        ..plan
    };
    let general = blender.blend(&RunId::generate(), &general_plan).await.unwrap();

    assert_eq!(toolkit.translates(), 1);
    assert_eq!(toolkit.reprojects(), 1);
    assert_eq!(direct.width(), general.width());
    assert_eq!(direct.data(), general.data());
    assert_eq!(direct.nodata_count(), 0);
}

#[tokio::test]
async fn test_full_high_source_masks_gappy_low_source() {
    let catalog_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let root = catalog_dir.path();
    let cell = tile(9, 5, 3);
    let grid = padded_grid(&cell, 9, 16);
    let bounds = cell.xy_bounds();
    let (mid_x, mid_y) = (
        (bounds.min_x + bounds.max_x) / 2.0,
        (bounds.min_y + bounds.max_y) / 2.0,
    );

    write_collection(root, "s-high", "h1", "2025-01-01T00:00:00Z", 9, &[(cell, false)]);
    write_leaf(root, "s-high", "h1", &cell, &grid, |_, _| HIGH);
    // North-west quadrant missing
    write_collection(root, "s-low", "l1", "2025-01-01T00:00:00Z", 9, &[(cell, true)]);
    write_leaf(root, "s-low", "l1", &cell, &grid, |x, y| {
        if x < mid_x && y > mid_y {
            NODATA
        } else {
            LOW
        }
    });
    let catalog = Arc::new(Catalog::load(root).unwrap());

    let plan = plan_for(&catalog, cell);
    assert_eq!(plan.kind, CellKind::Blend);

    let toolkit = MockToolkit::new();
    let blender = CellBlender::new(
        Arc::clone(&toolkit),
        catalog,
        StoreLayout::new(store_dir.path()),
        2000.0,
    );
    let raster = blender.blend(&RunId::generate(), &plan).await.unwrap();

    assert_eq!(raster.nodata_count(), 0);
    assert!(raster.data().iter().all(|&v| v == HIGH));
    // The gap-free high layer ends reprojection before the low one
    assert_eq!(toolkit.reprojects(), 1);
    assert_eq!(toolkit.reprojected_from(), vec!["EPSG:3857".to_string()]);
}

#[tokio::test]
async fn test_single_foreign_crs_leaf_is_reprojected() {
    let catalog_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let root = catalog_dir.path();
    let cell = tile(9, 5, 3);

    write_collection_in(
        root,
        "swiss",
        "c1",
        "2025-03-01T00:00:00Z",
        9,
        "EPSG:2056",
        &[(cell, false)],
    );
    write_leaf(root, "swiss", "c1", &cell, &padded_grid(&cell, 9, 0), |_, _| 450.0);
    let catalog = Arc::new(Catalog::load(root).unwrap());

    let plan = plan_for(&catalog, cell);
    assert_ne!(plan.kind, CellKind::DirectCopy);

    let toolkit = MockToolkit::new();
    let blender = CellBlender::new(
        Arc::clone(&toolkit),
        catalog,
        StoreLayout::new(store_dir.path()),
        2000.0,
    );
    let raster = blender.blend(&RunId::generate(), &plan).await.unwrap();
    assert_eq!(toolkit.reprojects(), 1);
    assert_eq!(toolkit.translates(), 0);
    assert_eq!(toolkit.reprojected_from(), vec!["EPSG:2056".to_string()]);
    assert_eq!(raster.nodata_count(), 0);

    // A stale plan still claiming a direct copy is reprojected too
    let stale = CellPlan {
        kind: CellKind::DirectCopy,
        ..plan
    };
    let copied = blender.blend(&RunId::generate(), &stale).await.unwrap();
    assert_eq!(toolkit.reprojects(), 2);
    assert_eq!(toolkit.translates(), 0);
    assert_eq!(copied.data(), raster.data());
}

#[tokio::test]
async fn test_missing_leaf_fails_cell() {
    let catalog_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(two_source_catalog(catalog_dir.path()));
    let plan = plan_for(&catalog, tile(9, 5, 3));

    std::fs::remove_file(catalog.leaf_path("s-low", "l1", &tile(9, 5, 3))).unwrap();

    let blender = CellBlender::new(
        MockToolkit::new(),
        catalog,
        StoreLayout::new(store_dir.path()),
        2000.0,
    );
    let run = RunId::generate();
    let err = blender.blend(&run, &plan).await.unwrap_err();
    assert!(matches!(err, BlendError::MissingLeaf { ref source_name, .. } if source_name == "s-low"));
    assert_eq!(blender.stage(&run, &tile(9, 5, 3)), BlendStage::Unstarted);
}
