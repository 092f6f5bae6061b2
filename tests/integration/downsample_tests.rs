//! Downsampling archived cells into coarser zooms.

use std::time::Duration;

use elevation_mosaic::pipeline::{downsample, DownsampleOptions};
use elevation_mosaic::pyramid::PyramidEncoder;
use elevation_mosaic::raster::{GeoTransform, RasterBlock};
use elevation_mosaic::store::{RunId, StoreLayout};
use elevation_mosaic::tile::{resolution, TileCoord, TileFormat, NODATA, TILE_SIZE};

use super::test_utils::{constant_tile, read_tile_values, tile};

fn options() -> DownsampleOptions {
    DownsampleOptions {
        workers: 3,
        aggregation_zoom: 9,
        extent_depth: 3,
        tile_format: TileFormat::Png,
        attribution: "test".to_string(),
    }
}

/// Publish a constant cell archive at zoom 9.
fn publish_cell(store: &StoreLayout, run: &RunId, cell: TileCoord, value: f32) {
    let transform = GeoTransform::for_bounds(&cell.xy_bounds(), resolution(9));
    let raster = RasterBlock::filled(TILE_SIZE, TILE_SIZE, value, transform);
    PyramidEncoder::new(TileFormat::Png, 0, "test")
        .write_archive(cell, raster, &store.cell_archive_path(run, &cell))
        .unwrap()
        .unwrap();
}

/// Value at the centre of each quadrant: NW, NE, SW, SE.
fn quadrants(values: &[f32]) -> [f32; 4] {
    let (a, b) = (TILE_SIZE / 4, 3 * TILE_SIZE / 4);
    [
        values[a * TILE_SIZE + a],
        values[a * TILE_SIZE + b],
        values[b * TILE_SIZE + a],
        values[b * TILE_SIZE + b],
    ]
}

#[tokio::test]
async fn test_four_children_average_to_parent() {
    let dir = tempfile::tempdir().unwrap();
    let store = StoreLayout::new(dir.path());
    let run = RunId::generate();
    for child in tile(8, 2, 1).children().unwrap() {
        publish_cell(&store, &run, child, 250.0);
    }

    let summary = downsample(&store, &run, &options()).await.unwrap();
    assert!(summary.is_success(), "{:?}", summary.failed);

    let parent = store.downsample_archive_path(&run, &tile(5, 0, 0), 8);
    let values = read_tile_values(&parent, &tile(8, 2, 1)).await.unwrap();
    assert_eq!(values, constant_tile(250.0));
    assert!(read_tile_values(&parent, &tile(8, 3, 1)).await.is_none());

    // 8-2-1 is the SW child of 7-1-0
    let level7 = store.downsample_archive_path(&run, &tile(4, 0, 0), 7);
    let values = read_tile_values(&level7, &tile(7, 1, 0)).await.unwrap();
    assert_eq!(quadrants(&values), [NODATA, NODATA, 250.0, NODATA]);

    // Every level down to the root
    for p in 0..=3 {
        assert!(store.downsample_archive_path(&run, &TileCoord::root(), p).is_file());
    }
    let root = store.downsample_archive_path(&run, &TileCoord::root(), 0);
    let values = read_tile_values(&root, &TileCoord::root()).await.unwrap();
    assert!(values.iter().any(|&v| v == 250.0));
}

#[tokio::test]
async fn test_missing_children_leave_nodata() {
    let dir = tempfile::tempdir().unwrap();
    let store = StoreLayout::new(dir.path());
    let run = RunId::generate();
    // NE child of 8-2-1 only
    publish_cell(&store, &run, tile(9, 5, 2), 80.0);

    downsample(&store, &run, &options()).await.unwrap();

    let parent = store.downsample_archive_path(&run, &tile(5, 0, 0), 8);
    let values = read_tile_values(&parent, &tile(8, 2, 1)).await.unwrap();
    assert_eq!(quadrants(&values), [NODATA, 80.0, NODATA, NODATA]);
}

#[tokio::test]
async fn test_latest_run_wins_and_untouched_cells_carry_over() {
    let dir = tempfile::tempdir().unwrap();
    let store = StoreLayout::new(dir.path());

    let first = RunId::generate();
    publish_cell(&store, &first, tile(9, 4, 2), 100.0);
    publish_cell(&store, &first, tile(9, 6, 2), 200.0);
    downsample(&store, &first, &options()).await.unwrap();

    std::thread::sleep(Duration::from_millis(2));
    let second = RunId::generate();
    publish_cell(&store, &second, tile(9, 4, 2), 300.0);
    let summary = downsample(&store, &second, &options()).await.unwrap();
    assert!(summary.is_success(), "{:?}", summary.failed);
    assert_eq!(summary.completed, 9);

    let parent = store.downsample_archive_path(&second, &tile(5, 0, 0), 8);
    let replaced = read_tile_values(&parent, &tile(8, 2, 1)).await.unwrap();
    assert_eq!(quadrants(&replaced)[0], 300.0);
    let carried = read_tile_values(&parent, &tile(8, 3, 1)).await.unwrap();
    assert_eq!(quadrants(&carried)[0], 200.0);

    // The earlier run's output is left alone
    let old = store.downsample_archive_path(&first, &tile(5, 0, 0), 8);
    let values = read_tile_values(&old, &tile(8, 2, 1)).await.unwrap();
    assert_eq!(quadrants(&values)[0], 100.0);
}

#[tokio::test]
async fn test_clean_extents_are_not_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let store = StoreLayout::new(dir.path());

    let first = RunId::generate();
    // Two cells in different level-8 extents (5-0-0 and 5-31-31)
    publish_cell(&store, &first, tile(9, 4, 2), 100.0);
    publish_cell(&store, &first, tile(9, 511, 511), 100.0);
    downsample(&store, &first, &options()).await.unwrap();

    std::thread::sleep(Duration::from_millis(2));
    let second = RunId::generate();
    publish_cell(&store, &second, tile(9, 4, 2), 120.0);
    downsample(&store, &second, &options()).await.unwrap();

    assert!(store
        .downsample_archive_path(&second, &tile(5, 0, 0), 8)
        .is_file());
    assert!(!store
        .downsample_archive_path(&second, &tile(5, 31, 31), 8)
        .exists());
    // Below the extents' common ancestor both feed the same archive
    assert!(store
        .downsample_archive_path(&second, &TileCoord::root(), 2)
        .is_file());
}
